//! Multipart decoder
//!
//! Splits a fully buffered `multipart/form-data` body into the file parts it
//! carries. Decoding is best-effort: a part that cannot be parsed is skipped
//! and its siblings are still returned. Only a missing boundary is fatal.
//!
//! Body size is not checked here; the upload route caps the body before the
//! decoder ever sees it.

use std::collections::HashMap;

use axum::body::Bytes;

use crate::guard::basename;

const CRLF: &[u8] = b"\r\n";
const BLANK_LINE: &[u8] = b"\r\n\r\n";

/// One uploaded file from a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// Form field the file was attached to (may be empty)
    pub field_name: String,
    /// Basename of the client-supplied file name
    pub filename: String,
    /// Raw file bytes, sliced out of the request body without copying
    pub content: Bytes,
}

/// Structural problems that abort a whole upload request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Content-Type header missing")]
    MissingContentType,

    #[error("Only multipart/form-data supported, got {0}")]
    NotMultipart(String),

    #[error("No boundary in Content-Type")]
    MissingBoundary,
}

/// Extract the boundary from a `Content-Type` header value.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, DecodeError> {
    let mut params = content_type.split(';');
    let media_type = params.next().unwrap_or("").trim();

    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(DecodeError::NotMultipart(media_type.to_string()));
    }

    params
        .filter_map(|p| p.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|b| !b.is_empty())
        .ok_or(DecodeError::MissingBoundary)
}

/// Decode `body` into the file parts it contains, in body order.
///
/// Parts without a `filename` are ordinary form fields and are not returned.
pub fn decode(boundary: &str, body: &Bytes) -> Result<Vec<UploadPart>, DecodeError> {
    if boundary.is_empty() {
        return Err(DecodeError::MissingBoundary);
    }

    let dash_boundary = [b"--", boundary.as_bytes()].concat();
    let mut parts = Vec::new();

    // Everything before the first delimiter is preamble.
    let mut cursor = match find_delimiter(body, &dash_boundary, 0) {
        Some(Delimiter { kind: DelimiterKind::Part { next }, .. }) => next,
        _ => return Ok(parts),
    };

    loop {
        let Some(delimiter) = find_delimiter(body, &dash_boundary, cursor) else {
            tracing::debug!(offset = cursor, "Skipping unterminated multipart part");
            break;
        };

        let raw = body.slice(cursor..delimiter.content_end);
        match parse_part(raw) {
            Some(part) => parts.push(part),
            None => tracing::trace!(offset = cursor, "Skipping non-file multipart part"),
        }

        match delimiter.kind {
            DelimiterKind::Part { next } => cursor = next,
            // Anything after the close delimiter is epilogue.
            DelimiterKind::Close => break,
        }
    }

    Ok(parts)
}

struct Delimiter {
    /// End of the preceding part's content (start of the CRLF before `--boundary`)
    content_end: usize,
    kind: DelimiterKind,
}

enum DelimiterKind {
    /// Another part follows, starting at `next`
    Part { next: usize },
    /// `--boundary--` or end of body
    Close,
}

/// Find the next delimiter line at or after `from`.
///
/// A delimiter is `--boundary` at the start of the body or right after a CRLF,
/// followed by `--`, or by optional whitespace and a CRLF. Anything else is
/// content that merely looks like the boundary.
fn find_delimiter(body: &[u8], dash_boundary: &[u8], from: usize) -> Option<Delimiter> {
    let mut search = from;

    while let Some(pos) = find(body, dash_boundary, search) {
        search = pos + 1;

        let at_line_start = pos == 0 || (pos >= 2 && &body[pos - 2..pos] == CRLF);
        if !at_line_start {
            continue;
        }

        let content_end = pos.saturating_sub(2).max(from);
        let tail = &body[pos + dash_boundary.len()..];

        if tail.starts_with(b"--") || tail.is_empty() {
            return Some(Delimiter {
                content_end,
                kind: DelimiterKind::Close,
            });
        }

        let padding = tail.iter().take_while(|b| matches!(b, b' ' | b'\t')).count();
        if tail[padding..].starts_with(CRLF) {
            return Some(Delimiter {
                content_end,
                kind: DelimiterKind::Part {
                    next: pos + dash_boundary.len() + padding + CRLF.len(),
                },
            });
        }
    }

    None
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn parse_part(raw: Bytes) -> Option<UploadPart> {
    let header_end = find(&raw, BLANK_LINE, 0)?;
    let headers = parse_headers(&raw[..header_end]);

    let disposition = headers.get("content-disposition")?;
    let params = disposition_params(disposition);

    let filename = params
        .get("filename*")
        .and_then(|v| decode_ext_value(v))
        .or_else(|| params.get("filename").map(|v| unquote(v)))?;

    let filename = basename(&filename);
    if filename.is_empty() {
        return None;
    }

    Some(UploadPart {
        field_name: params.get("name").map(|v| unquote(v)).unwrap_or_default(),
        filename: filename.to_string(),
        content: raw.slice(header_end + BLANK_LINE.len()..),
    })
}

fn parse_headers(block: &[u8]) -> HashMap<String, String> {
    String::from_utf8_lossy(block)
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

/// Parameters of a `Content-Disposition` value, keyed by lowercase name.
fn disposition_params(value: &str) -> HashMap<String, String> {
    split_unquoted(value, ';')
        .into_iter()
        .filter_map(|param| param.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect()
}

/// Split on `sep` where it is not inside a quoted string.
fn split_unquoted(value: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                out.push(&value[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&value[start..]);
    out
}

// Only `\"` is unescaped: old browsers send Windows paths with bare backslashes.
fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\""),
        None => value.to_string(),
    }
}

/// Decode an RFC 5987 extended value such as `UTF-8''na%C3%AFve.txt`.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let _charset = pieces.next()?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_part(boundary: &str, name: &str, content: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file_upload\"; filename=\"{name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        out.extend_from_slice(content);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn close(boundary: &str) -> Vec<u8> {
        format!("--{boundary}--\r\n").into_bytes()
    }

    #[test]
    fn test_decode_two_files_in_order() {
        let mut body = file_part("XYZ", "a.txt", b"hello");
        body.extend(file_part("XYZ", "b.bin", b"\x00\x01"));
        body.extend(close("XYZ"));

        let parts = decode("XYZ", &Bytes::from(body)).unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].filename, "a.txt");
        assert_eq!(parts[0].field_name, "file_upload");
        assert_eq!(&parts[0].content[..], b"hello");
        assert_eq!(parts[1].filename, "b.bin");
        assert_eq!(&parts[1].content[..], b"\x00\x01");
    }

    #[test]
    fn test_binary_content_survives() {
        let content: &[u8] = b"line1\r\n\r\nline2\r\n--XYZ-not-a-delimiter\r\n--XYZZY\r\nend--";
        let mut body = file_part("XYZ", "tricky.bin", content);
        body.extend(close("XYZ"));

        let parts = decode("XYZ", &Bytes::from(body)).unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(&parts[0].content[..], content);
    }

    #[test]
    fn test_empty_file_content() {
        let mut body = file_part("b", "empty.txt", b"");
        body.extend(close("b"));

        let parts = decode("b", &Bytes::from(body)).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].content.is_empty());
    }

    #[test]
    fn test_form_fields_ignored() {
        let mut body = b"--b\r\nContent-Disposition: form-data; name=\"comment\"\r\n\r\nhi\r\n".to_vec();
        body.extend(file_part("b", "kept.txt", b"data"));
        body.extend(close("b"));

        let parts = decode("b", &Bytes::from(body)).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "kept.txt");
    }

    #[test]
    fn test_malformed_part_does_not_block_siblings() {
        let mut body = b"--b\r\nContent-Disposition: form-data; filename=\"broken\"\r\nno blank line".to_vec();
        body.extend(b"\r\n");
        body.extend(file_part("b", "good.txt", b"ok"));
        body.extend(close("b"));

        let parts = decode("b", &Bytes::from(body)).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "good.txt");
    }

    #[test]
    fn test_filenames_reduced_to_basename() {
        let mut body = file_part("b", "../../etc/passwd", b"x");
        body.extend(file_part("b", "C:\\Users\\me\\photo.jpg", b"y"));
        body.extend(file_part("b", "", b"skipped"));
        body.extend(close("b"));

        let parts = decode("b", &Bytes::from(body)).unwrap();
        let names: Vec<_> = parts.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, ["passwd", "photo.jpg"]);
    }

    #[test]
    fn test_extended_filename() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"fallback.txt\"; \
                     filename*=UTF-8''na%C3%AFve%3B.txt\r\n\r\nx\r\n--b--\r\n";

        let parts = decode("b", &Bytes::from_static(body)).unwrap();
        assert_eq!(parts[0].filename, "na\u{ef}ve;.txt");
    }

    #[test]
    fn test_quoted_semicolon_in_filename() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a;b.txt\"\r\n\r\nx\r\n--b--";

        let parts = decode("b", &Bytes::from_static(body)).unwrap();
        assert_eq!(parts[0].filename, "a;b.txt");
    }

    #[test]
    fn test_preamble_epilogue_and_unterminated_part() {
        let mut body = b"preamble text\r\n".to_vec();
        body.extend(file_part("b", "one.txt", b"1"));
        body.extend(file_part("b", "cut.txt", b"partial"));
        // No closing delimiter: the last part is truncated and must not be returned.
        body.truncate(body.len() - 2);

        let parts = decode("b", &Bytes::from(body)).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename, "one.txt");

        let mut body = file_part("b", "two.txt", b"2");
        body.extend(close("b"));
        body.extend(b"epilogue --b\r\n");
        let parts = decode("b", &Bytes::from(body)).unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_empty_boundary_is_an_error() {
        assert_eq!(
            decode("", &Bytes::from_static(b"anything")),
            Err(DecodeError::MissingBoundary)
        );
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=----WebKitFormBoundaryX"),
            Ok("----WebKitFormBoundaryX".to_string())
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; BOUNDARY=\"quoted b\""),
            Ok("quoted b".to_string())
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data"),
            Err(DecodeError::MissingBoundary)
        );
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary="),
            Err(DecodeError::MissingBoundary)
        );
        assert!(matches!(
            boundary_from_content_type("application/json"),
            Err(DecodeError::NotMultipart(_))
        ));
    }
}
