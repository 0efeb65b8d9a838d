use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Upper bound on the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    /// A transfer coding other than `chunked` was applied.
    UnsupportedTransferEncoding,
    /// Chunk framing could not be decoded.
    InvalidChunkedBody,
    HeadersTooLarge,
    /// Declared or decoded body size exceeds the configured ceiling.
    BodyTooLarge { limit: usize },
    Incomplete,
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied. The body size is
/// checked against `max_body` as soon as the headers are complete, so an
/// oversized upload is refused before any of it is buffered. A `chunked` body
/// is decoded against the same ceiling and handed back with a Content-Length
/// in place of the Transfer-Encoding header.
pub fn parse_http_request(buf: &[u8], max_body: usize) -> Result<(Request, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end > MAX_HEADER_BYTES {
        return Err(ParseError::HeadersTooLarge);
    }

    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes).map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    if headers.contains("Transfer-Encoding") {
        if headers.contains("Content-Length") {
            return Err(ParseError::InvalidRequest);
        }
        if !is_chunked_only(&headers) {
            return Err(ParseError::UnsupportedTransferEncoding);
        }

        let (body, body_consumed) = decode_chunked(body_bytes, max_body)?;
        headers.remove("Transfer-Encoding");
        headers.insert("Content-Length", body.len().to_string());

        let request = Request {
            method,
            path: path.to_string(),
            version: version.to_string(),
            headers,
            body,
        };
        return Ok((request, headers_end + 4 + body_consumed));
    }

    let content_length = headers
        .get("Content-Length")
        .map(|v| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)
        })
        .transpose()?
        .unwrap_or(0);

    if content_length > max_body {
        return Err(ParseError::BodyTooLarge { limit: max_body });
    }

    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }

    let body = body_bytes[..content_length].to_vec();

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    let total_consumed = headers_end + 4 + content_length;
    Ok((request, total_consumed))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// True when every Transfer-Encoding value names `chunked` exactly once.
fn is_chunked_only(headers: &Headers) -> bool {
    let codings: Vec<String> = headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    codings == ["chunked"]
}

/// Decodes a `chunked` body from the front of `buf`.
///
/// Returns the decoded body and the number of bytes the framing occupied,
/// trailers included. Trailer fields are dropped.
fn decode_chunked(buf: &[u8], max_body: usize) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = match find_line_end(&buf[pos..]) {
            Some(end) => end,
            // A size line is a handful of hex digits plus optional extensions
            None if buf.len() - pos > MAX_HEADER_BYTES => return Err(ParseError::InvalidChunkedBody),
            None => return Err(ParseError::Incomplete),
        };
        let line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| ParseError::InvalidChunkedBody)?;
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunkedBody)?;
        pos += line_end + 2;

        if size == 0 {
            break;
        }
        if body.len().saturating_add(size) > max_body {
            return Err(ParseError::BodyTooLarge { limit: max_body });
        }
        if buf.len() < pos + size + 2 {
            return Err(ParseError::Incomplete);
        }
        if &buf[pos + size..pos + size + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunkedBody);
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        pos += size + 2;
    }

    let trailer_start = pos;
    loop {
        let line_end = match find_line_end(&buf[pos..]) {
            Some(end) => end,
            None if buf.len() - trailer_start > MAX_HEADER_BYTES => {
                return Err(ParseError::HeadersTooLarge);
            }
            None => return Err(ParseError::Incomplete),
        };
        pos += line_end + 2;
        if line_end == 0 {
            return Ok((body, pos));
        }
        if pos - trailer_start > MAX_HEADER_BYTES {
            return Err(ParseError::HeadersTooLarge);
        }
    }
}
