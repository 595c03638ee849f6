//! Serializes a `Response` onto the wire. Always synthesizes `Content-Length`
//! (no chunked transfer-encoding on the response side).

use crate::status::reason;
use crate::strmap::StrMap;

/// Appends the status line, headers (including the synthesized
/// `Content-Length`) and body of `status`/`headers`/`body` to `out`.
pub fn write_response(out: &mut Vec<u8>, status: u16, headers: &StrMap, body: &[u8]) {
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(reason(status).as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"Content-Length: ");
    out.extend_from_slice(body.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
}

/// Shortcut used by the dispatcher for grammar-level failures (`err_status`
/// on the parser): status line, synthesized `Content-Length`, plain-text
/// body equal to the reason phrase.
pub fn write_error(out: &mut Vec<u8>, status: u16) {
    let empty = StrMap::headers();
    write_response(out, status, &empty, reason(status).as_bytes());
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_status_line_and_synthesized_content_length() {
        let mut out = Vec::new();
        let headers = StrMap::headers();
        write_response(&mut out, 200, &headers, b"hi");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn drops_handler_set_content_length_only() {
        let mut out = Vec::new();
        let mut headers = StrMap::headers();
        headers.set("Content-Length", "999");
        headers.set("X-Custom", "yes");
        write_response(&mut out, 200, &headers, b"");
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Content-Length").count(), 1);
        assert!(text.contains("Content-Length: 0\r\n"));
        assert!(text.contains("X-Custom: yes\r\n"));
    }

    #[test]
    fn write_error_body_is_reason_phrase() {
        let mut out = Vec::new();
        write_error(&mut out, 400);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\nBad Request"));
    }

    #[test]
    fn unknown_status_uses_null_reason() {
        let mut out = Vec::new();
        let headers = StrMap::headers();
        write_response(&mut out, 799, &headers, b"");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 799 NULL\r\n"));
    }
}
