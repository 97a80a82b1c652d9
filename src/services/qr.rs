use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose};
use image::{ImageFormat, Luma};
use qrcode::QrCode;

use crate::error::{AppError, Result};

/// Smallest side of the rendered QR code, in pixels.
const QR_MIN_SIZE: u32 = 256;

/// Renders `content` as a PNG QR code, returned as a `data:` URL.
///
/// # Arguments
///
/// * `content` - The text to encode, typically the validation URL.
///
/// # Returns
///
/// A `data:image/png;base64,...` string an `<img>` tag can display as is.
pub fn generate_qr_data_url(content: &str) -> Result<String> {
    let code = QrCode::new(content.as_bytes())
        .map_err(|e| AppError::infra("qr_generate_error", "QrError", e))?;

    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_SIZE, QR_MIN_SIZE)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| AppError::infra("qr_generate_error", "ImageError", e))?;

    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png)
    ))
}
