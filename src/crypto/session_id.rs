use rand::RngCore;
use rand::rngs::OsRng;

/// The size of a session id in bytes.
pub const SESSION_ID_SIZE: usize = 32;

/// Generates a new random session id.
///
/// # Returns
///
/// 64 lowercase hex characters drawn from the OS CSPRNG.
pub fn generate_session_id() -> String {
    let mut id = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut id);
    hex::encode(id)
}

/// Whether `candidate` has the shape of a session id.
pub fn is_well_formed(candidate: &str) -> bool {
    candidate.len() == SESSION_ID_SIZE * 2 && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}
