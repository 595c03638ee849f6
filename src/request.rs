//! The owned/borrowed record handed to the user callback.

use crate::method::Method;
use crate::response::Response;
use crate::strmap::StrMap;

/// A fully parsed request. `body` borrows the parser's internal buffer and
/// is only valid for the duration of the callback that receives it.
#[derive(Debug)]
pub struct Request<'a> {
    pub method: Method,
    pub path: String,
    pub query: StrMap,
    pub client_ip: String,
    pub headers: StrMap,
    pub body: &'a [u8],
    pub response: Response,
}

impl<'a> Request<'a> {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Case-sensitive query-parameter lookup.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key)
    }
}
