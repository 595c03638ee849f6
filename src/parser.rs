//! Incremental HTTP/1.1 request parser: a state machine over a growable
//! buffer. Only one revision of the parser exists in this crate — the
//! rline -> headers -> body -> done shape, with an explicit `err_status`
//! field that once set, sticks, and is handled by the dispatcher rather than
//! by further parsing.

use crate::abnf::{is_pct_encoded, is_sub_delims, is_tchar, is_unreserved, is_vchar};
use crate::buf::Buf;
use crate::error::ParseError;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::strmap::StrMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Rline,
    Headers,
    Body,
    Done,
}

#[derive(Debug)]
pub struct Parser {
    state: ParserState,
    err_status: u16,
    buf: Buf,
    method: Option<Method>,
    path: String,
    query: StrMap,
    headers: StrMap,
    content_length: u64,
}

impl Default for Parser {
    fn default() -> Parser {
        Parser {
            state: ParserState::Rline,
            err_status: 0,
            buf: Buf::new(),
            method: None,
            path: String::new(),
            query: StrMap::query(),
            headers: StrMap::headers(),
            content_length: 0,
        }
    }
}

impl Parser {
    pub fn new() -> Parser {
        Parser::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn err_status(&self) -> u16 {
        self.err_status
    }

    /// Appends `bytes` and drives the state machine as far as it will go
    /// with the data available.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        self.buf.append(bytes)?;
        loop {
            if self.err_status != 0 {
                break;
            }
            let advanced = match self.state {
                ParserState::Rline => self.try_parse_rline(),
                ParserState::Headers => self.try_parse_headers(),
                ParserState::Body => self.try_parse_body(),
                ParserState::Done => break,
            };
            if advanced.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Valid once `state() == Done`. Moves the parsed fields out of the
    /// parser; `body` borrows the parser's buffer for the lifetime of the
    /// returned `Request`.
    pub fn take_request(&mut self) -> Request<'_> {
        debug_assert_eq!(self.state, ParserState::Done);
        let method = self
            .method
            .take()
            .expect("request line is parsed by the time state is Done");
        let path = std::mem::take(&mut self.path);
        let query = std::mem::replace(&mut self.query, StrMap::query());
        let headers = std::mem::replace(&mut self.headers, StrMap::headers());
        let body = &self.buf.as_slice()[..self.content_length as usize];
        Request {
            method,
            path,
            query,
            client_ip: String::new(),
            headers,
            body,
            response: Response::new(),
        }
    }

    fn try_parse_rline(&mut self) -> Option<()> {
        let (line_len, term_len) = find_eol(self.buf.as_slice())?;
        let line = self.buf.as_slice()[..line_len].to_vec();

        if line.contains(&0u8) {
            self.err_status = 400;
            return None;
        }

        let spaces: Vec<usize> = line
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b' ')
            .map(|(i, _)| i)
            .collect();
        if spaces.len() != 2 {
            self.err_status = 400;
            return None;
        }
        let (s1, s2) = (spaces[0], spaces[1]);
        if s1 == 0 || s2 == line.len() - 1 {
            self.err_status = 400;
            return None;
        }

        let method_bytes = &line[..s1];
        let target = &line[s1 + 1..s2];
        // HTTP-version substring (line[s2+1..]) is accepted but not validated.

        let method = match Method::parse(method_bytes) {
            Some(m) => m,
            None => {
                self.err_status = 501;
                return None;
            }
        };

        let (path_bytes, query_bytes): (&[u8], &[u8]) =
            match target.iter().position(|&b| b == b'?') {
                Some(qpos) => (&target[..qpos], &target[qpos + 1..]),
                None => (target, &[][..]),
            };

        if !validate_path(path_bytes) {
            self.err_status = 400;
            return None;
        }
        if !validate_query(query_bytes) {
            self.err_status = 400;
            return None;
        }

        let path = String::from_utf8(path_bytes.to_vec()).expect("validated path is ASCII");
        let mut query = StrMap::query();
        if parse_query(query_bytes, &mut query).is_err() {
            self.err_status = 400;
            return None;
        }

        self.method = Some(method);
        self.path = path;
        self.query = query;
        self.buf.pop_front(line_len + term_len);
        self.state = ParserState::Headers;
        Some(())
    }

    fn try_parse_headers(&mut self) -> Option<()> {
        loop {
            let (line_len, term_len) = find_eol(self.buf.as_slice())?;

            if line_len == 0 {
                self.buf.pop_front(term_len);
                if self.headers.contains_key("Transfer-Encoding") {
                    self.err_status = 501;
                    return None;
                }
                match self.headers.get("Content-Length") {
                    Some(v) => match parse_u64_decimal(v) {
                        Some(n) => self.content_length = n,
                        None => {
                            self.err_status = 400;
                            return None;
                        }
                    },
                    None => self.content_length = 0,
                }
                self.state = ParserState::Body;
                return Some(());
            }

            let line = self.buf.as_slice()[..line_len].to_vec();
            if line.contains(&0u8) {
                self.err_status = 400;
                return None;
            }

            let colon = match line.iter().position(|&b| b == b':') {
                Some(p) => p,
                None => {
                    self.err_status = 400;
                    return None;
                }
            };
            let name_bytes = &line[..colon];
            if name_bytes.is_empty() || !name_bytes.iter().all(|&b| is_tchar(b)) {
                self.err_status = 400;
                return None;
            }

            let mut value_bytes = &line[colon + 1..];
            while let Some((&b, rest)) = value_bytes.split_first() {
                if b == b' ' || b == b'\t' {
                    value_bytes = rest;
                } else {
                    break;
                }
            }
            while let Some((&b, rest)) = value_bytes.split_last() {
                if b == b' ' || b == b'\t' {
                    value_bytes = rest;
                } else {
                    break;
                }
            }
            if value_bytes.is_empty() {
                self.err_status = 400;
                return None;
            }
            if !value_bytes.iter().all(|&b| is_vchar(b)) {
                self.err_status = 400;
                return None;
            }

            let name = std::str::from_utf8(name_bytes).expect("tchar bytes are ASCII");
            let value = std::str::from_utf8(value_bytes).expect("vchar bytes are ASCII");

            if self.headers.contains_key(name) {
                self.err_status = 400;
                return None;
            }
            self.headers.set(name, value);
            self.buf.pop_front(line_len + term_len);
        }
    }

    fn try_parse_body(&mut self) -> Option<()> {
        if self.buf.len() as u64 == self.content_length {
            self.state = ParserState::Done;
            return Some(());
        }
        None
    }
}

/// Scans for `CR LF` or a lone `LF`. A `CR` not (yet) followed by `LF` is
/// treated as pending if it's the last byte available (it may turn into
/// `CRLF` with the next feed), otherwise as an ordinary in-line octet.
fn find_eol(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            b'\n' => return Some((i, 1)),
            b'\r' => {
                if i + 1 < buf.len() {
                    if buf[i + 1] == b'\n' {
                        return Some((i, 2));
                    }
                } else {
                    return None;
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn validate_path(bytes: &[u8]) -> bool {
    if bytes.is_empty() || bytes[0] != b'/' {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'/' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                return false;
            }
            i += 1;
        } else if c == b':' || c == b'@' || is_sub_delims(c) || is_unreserved(c) {
            i += 1;
        } else if c == b'%' {
            if is_pct_encoded(&bytes[i..]) {
                i += 3;
            } else {
                return false;
            }
        } else {
            return false;
        }
    }
    true
}

fn validate_query(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b':' || c == b'@' || c == b'/' || c == b'?' || is_sub_delims(c) || is_unreserved(c)
        {
            i += 1;
        } else if c == b'%' {
            if is_pct_encoded(&bytes[i..]) {
                i += 3;
            } else {
                return false;
            }
        } else {
            return false;
        }
    }
    true
}

fn parse_query(bytes: &[u8], map: &mut StrMap) -> Result<(), ()> {
    for segment in bytes.split(|&b| b == b'&') {
        if segment.is_empty() {
            continue;
        }
        if segment[0] == b'=' {
            return Err(());
        }
        let (key, value) = match segment.iter().position(|&b| b == b'=') {
            Some(eq) => (&segment[..eq], &segment[eq + 1..]),
            None => (segment, &[][..]),
        };
        let key = std::str::from_utf8(key).expect("validated query is ASCII");
        let value = std::str::from_utf8(value).expect("validated query is ASCII");
        map.set(key, value);
    }
    Ok(())
}

fn parse_u64_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u64>().ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_all(input: &[u8]) -> Parser {
        let mut p = Parser::new();
        p.feed(input).unwrap();
        p
    }

    fn parse_chunked(input: &[u8], chunk: usize) -> Parser {
        let mut p = Parser::new();
        for c in input.chunks(chunk.max(1)) {
            p.feed(c).unwrap();
        }
        p
    }

    #[test]
    fn s1_simple_get_with_query() {
        let input = b"GET /foo?bar=baz&x HTTP/1.1\r\nHost: example\r\n\r\n";
        let mut p = parse_all(input);
        assert_eq!(p.state(), ParserState::Done);
        assert_eq!(p.err_status(), 0);
        let req = p.take_request();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/foo");
        assert_eq!(req.query.get("bar"), Some("baz"));
        assert_eq!(req.query.get("x"), Some(""));
        assert_eq!(req.headers.get("Host"), Some("example"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn s2_post_with_body() {
        let input = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello";
        let mut p = parse_all(input);
        assert_eq!(p.state(), ParserState::Done);
        let req = p.take_request();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body, b"hello");
        assert_eq!(req.headers.get("Connection"), Some("keep-alive"));
    }

    #[test]
    fn s3_unknown_method_is_501() {
        let input = b"WEIRD / HTTP/1.1\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 501);
    }

    #[test]
    fn s4_double_slash_path_is_400() {
        let input = b"GET /foo//bar HTTP/1.1\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn s5_duplicate_header_is_400() {
        let input = b"GET / HTTP/1.1\r\nFoo: a\r\nfoo: b\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn s6_transfer_encoding_is_501() {
        let input = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 501);
    }

    #[test]
    fn property_chunking_independence() {
        let input = b"POST /p?a=1 HTTP/1.1\r\nContent-Length: 4\r\nX-Y: z\r\n\r\nabcd";
        for chunk in [1, 2, 3, 7, 1000] {
            let mut p = parse_chunked(input, chunk);
            assert_eq!(p.state(), ParserState::Done, "chunk size {chunk}");
            assert_eq!(p.err_status(), 0);
            let req = p.take_request();
            assert_eq!(req.method, Method::Post);
            assert_eq!(req.path, "/p");
            assert_eq!(req.query.get("a"), Some("1"));
            assert_eq!(req.headers.get("X-Y"), Some("z"));
            assert_eq!(req.body, b"abcd");
        }
    }

    #[test]
    fn property_nul_in_rline_is_400() {
        let input = b"GE\x00T / HTTP/1.1\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn property_nul_in_header_is_400() {
        let input = b"GET / HTTP/1.1\r\nX-A: a\x00b\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn property_pct00_in_path_is_400() {
        let input = b"GET /%00 HTTP/1.1\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn property_pct00_in_query_is_400() {
        let input = b"GET /foo?x=%00 HTTP/1.1\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn bare_lf_line_endings_accepted() {
        let input = b"GET / HTTP/1.1\nHost: x\n\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 0);
        assert_eq!(p.state(), ParserState::Done);
    }

    #[test]
    fn missing_content_length_is_zero_body() {
        let input = b"GET / HTTP/1.1\r\n\r\n";
        let mut p = parse_all(input);
        let req = p.take_request();
        assert!(req.body.is_empty());
    }

    #[test]
    fn bad_content_length_is_400() {
        let input = b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn empty_query_segment_skipped() {
        let input = b"GET /p?a=1&&b=2 HTTP/1.1\r\n\r\n";
        let mut p = parse_all(input);
        let req = p.take_request();
        assert_eq!(req.query.len(), 2);
        assert_eq!(req.query.get("a"), Some("1"));
        assert_eq!(req.query.get("b"), Some("2"));
    }

    #[test]
    fn query_segment_starting_with_equals_is_400() {
        let input = b"GET /p?=x HTTP/1.1\r\n\r\n";
        let p = parse_all(input);
        assert_eq!(p.err_status(), 400);
    }

    #[test]
    fn wrong_space_count_is_400() {
        let p = parse_all(b"GET  / HTTP/1.1\r\n\r\n");
        assert_eq!(p.err_status(), 400);
        let p = parse_all(b"GET/HTTP/1.1\r\n\r\n");
        assert_eq!(p.err_status(), 400);
    }
}
