//! `multipart/form-data` splitting.
//!
//! ```text
//! --boundary\r\n
//! Content-Disposition: form-data; name="field1"\r\n
//! \r\n
//! value1\r\n
//! --boundary\r\n
//! Content-Disposition: form-data; name="file"; filename="example.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! file contents...\r\n
//! --boundary--\r\n
//! ```
//!
//! Parts are not copied. Each [`ContentItem`] records the byte range of its
//! data inside the [`RawRequestContent`], which may well be a temp file.

use std::ops::Range;

use thiserror::Error;

use crate::error::BufferError;
use crate::http::raw::RawRequestContent;

/// Part header blocks larger than this are rejected.
const MAX_PART_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("missing boundary in multipart Content-Type")]
    MissingBoundary,

    #[error("invalid multipart boundary")]
    InvalidBoundary,

    #[error("missing Content-Disposition header in part")]
    MissingContentDisposition,

    #[error("invalid part headers: {0}")]
    InvalidPartHeaders(&'static str),

    #[error("unexpected end of multipart data")]
    UnexpectedEof,

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// One part of a multipart body: a form field, or a file when `filename`
/// is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    /// Data bytes inside the raw request content.
    pub range: Range<usize>,
}

impl ContentItem {
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Boundary from `multipart/form-data; boundary=----WebKitFormBoundary...`.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        return Err(MultipartError::InvalidBoundary);
    }

    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let boundary = unquote(value);
            if boundary.is_empty() {
                return Err(MultipartError::InvalidBoundary);
            }
            return Ok(boundary.to_string());
        }
    }

    Err(MultipartError::MissingBoundary)
}

/// Splits the multipart data found in `body` into content items.
pub fn split_parts(
    raw: &mut RawRequestContent,
    body: Range<usize>,
    boundary: &str,
) -> Result<Vec<ContentItem>, MultipartError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let separator = format!("\r\n--{boundary}").into_bytes();
    let end = body.end;
    let mut items = Vec::new();

    let mut pos = raw
        .find(&delimiter, body.start, end)?
        .ok_or(MultipartError::UnexpectedEof)?;

    loop {
        pos += delimiter.len();
        let mut marker = [0u8; 2];
        if pos + 2 > end {
            return Err(MultipartError::UnexpectedEof);
        }
        raw.copy_bytes(pos, &mut marker)?;
        if &marker == b"--" {
            break;
        }
        if &marker != b"\r\n" {
            return Err(MultipartError::InvalidPartHeaders("expected CRLF after boundary"));
        }
        pos += 2;

        let headers_end = raw
            .find(b"\r\n\r\n", pos, end.min(pos + MAX_PART_HEADER_BYTES))?
            .ok_or(MultipartError::UnexpectedEof)?;
        let header_block = raw.read_range(pos..headers_end)?;
        let header_text = String::from_utf8_lossy(&header_block);

        let mut disposition = None;
        let mut content_type = None;
        for line in header_text.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }
        let disposition = disposition.ok_or(MultipartError::MissingContentDisposition)?;
        let (name, filename) = parse_content_disposition(&disposition)?;

        let data_start = headers_end + 4;
        let data_end = raw
            .find(&separator, data_start, end)?
            .ok_or(MultipartError::UnexpectedEof)?;

        items.push(ContentItem {
            name,
            filename,
            content_type,
            range: data_start..data_end,
        });

        // onto the next delimiter, past the CRLF that belongs to it
        pos = data_end + 2;
    }

    Ok(items)
}

/// `form-data; name="field"; filename="file.txt"`
fn parse_content_disposition(value: &str) -> Result<(String, Option<String>), MultipartError> {
    let mut name = None;
    let mut filename = None;

    for param in value.split(';').skip(1) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(unquote(val).to_string()),
            "filename" => filename = Some(unquote(val).to_string()),
            _ => {}
        }
    }

    let name = name.ok_or(MultipartError::InvalidPartHeaders("missing name parameter"))?;
    Ok((name, filename))
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}
