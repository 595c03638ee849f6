//! The owned record produced by the user callback, validated at the
//! setter boundary rather than at write time.

use crate::error::RespError;
use crate::strmap::StrMap;

#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: StrMap,
    body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Response {
        Response {
            status: 200,
            headers: StrMap::headers(),
            body: Vec::new(),
        }
    }
}

impl Response {
    pub fn new() -> Response {
        Response::default()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// `code` must be in `[1, 999]`.
    pub fn set_status(&mut self, code: u16) -> Result<(), RespError> {
        if code == 0 || code > 999 {
            return Err(RespError::Invalid("status must be in [1, 999]"));
        }
        self.status = code;
        Ok(())
    }

    /// Rejects `Content-Length` and `Transfer-Encoding` (case-insensitive) —
    /// these are synthesized by the response writer, never set by the
    /// handler.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), RespError> {
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding")
        {
            return Err(RespError::Invalid(
                "Content-Length and Transfer-Encoding are managed by the writer",
            ));
        }
        self.headers.set(name, value);
        Ok(())
    }

    pub fn unset_header(&mut self, name: &str) {
        self.headers.unset(name);
    }

    pub fn headers(&self) -> &StrMap {
        &self.headers
    }

    /// An empty slice unsets the body.
    pub fn set_body(&mut self, bytes: &[u8]) {
        self.body = bytes.to_vec();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod test {
    use super::Response;

    #[test]
    fn default_status_is_200() {
        assert_eq!(Response::new().status(), 200);
    }

    #[test]
    fn rejects_content_length_header() {
        let mut r = Response::new();
        assert!(r.set_header("Content-Length", "5").is_err());
        assert!(r.set_header("content-length", "5").is_err());
    }

    #[test]
    fn rejects_transfer_encoding_header() {
        let mut r = Response::new();
        assert!(r.set_header("Transfer-Encoding", "chunked").is_err());
    }

    #[test]
    fn rejects_zero_status() {
        let mut r = Response::new();
        assert!(r.set_status(0).is_err());
        assert!(r.set_status(1).is_ok());
        assert!(r.set_status(999).is_ok());
    }

    #[test]
    fn rejects_status_above_999() {
        let mut r = Response::new();
        assert!(r.set_status(1000).is_err());
        assert!(r.set_status(u16::MAX).is_err());
    }

    #[test]
    fn set_body_replaces_previous() {
        let mut r = Response::new();
        r.set_body(b"hello");
        assert_eq!(r.body(), b"hello");
        r.set_body(b"");
        assert_eq!(r.body(), b"");
    }
}
