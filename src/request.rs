use http::{HeaderMap, Method, Request, header, request::Parts};
use tower_cookies::cookie::Cookie;

/// What the access-control code needs to know about an inbound request.
///
/// Implemented for `http::Request` and its `Parts`, so the guard runs the
/// same against a live request and against one built in a test.
pub trait InboundRequest {
    fn method(&self) -> &Method;

    fn headers(&self) -> &HeaderMap;

    /// The URI scheme if the request line carried one.
    fn uri_scheme(&self) -> Option<&str>;

    fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
    }

    /// `http` or `https`, as seen by the client.
    fn scheme(&self) -> &str {
        self.uri_scheme()
            .or_else(|| self.header(header::HeaderName::from_static("x-forwarded-proto")))
            .unwrap_or("http")
    }

    /// Value of the cookie named `name`, if sent.
    fn cookie(&self, name: &str) -> Option<String> {
        self.headers()
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| Cookie::split_parse_encoded(value.to_owned()))
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }
}

impl InboundRequest for Parts {
    fn method(&self) -> &Method {
        &self.method
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn uri_scheme(&self) -> Option<&str> {
        self.uri.scheme_str()
    }
}

impl<B> InboundRequest for Request<B> {
    fn method(&self) -> &Method {
        self.method()
    }

    fn headers(&self) -> &HeaderMap {
        self.headers()
    }

    fn uri_scheme(&self) -> Option<&str> {
        self.uri().scheme_str()
    }
}
