//! Raw request content: the bytes of one request as they arrive.
//!
//! Bytes are kept in memory until the configured disk threshold would be
//! exceeded. At that point everything received so far is written to a temp
//! file in the server's temp root and all later bytes are appended to that
//! file. The switch happens once and is never undone.
//!
//! ```text
//!   add_bytes ──► [ memory: BytesMut ] ──(len > threshold)──► [ temp file ]
//!                                                                  │
//!   done_adding_bytes ──► read-only; byte_at / copy_bytes allowed ◄┘
//! ```
//!
//! Line reads (`read_line`, `headers`, `length_of_headers`) work while bytes
//! are still arriving and answer `None` when the terminator is not there yet.
//! Random access by index needs the content to be complete.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::IpAddr;
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::error::BufferError;
use crate::http::headers::{ParsedHeaders, REMOTE_ADDR, REQUEST_URI};
use crate::http::parser::{RequestLine, parse_header_line, parse_request_line};

/// Default spill threshold (256 KiB).
pub const DEFAULT_DISK_THRESHOLD: usize = 256 * 1024;

/// Size of the read-through window used for file-backed content.
pub const WINDOW_SIZE: usize = 16 * 1024;

const INITIAL_CAPACITY: usize = 4096;

enum Store {
    Memory(BytesMut),
    Disk(NamedTempFile),
}

/// A cached slice of a file-backed buffer, so sequential small reads do not
/// seek the file for every byte.
#[derive(Debug, Default)]
struct ReadWindow {
    start: usize,
    data: Vec<u8>,
}

impl ReadWindow {
    fn covers(&self, offset: usize, len: usize) -> bool {
        offset >= self.start && offset + len <= self.start + self.data.len()
    }

    fn slice(&self, offset: usize, len: usize) -> &[u8] {
        let from = offset - self.start;
        &self.data[from..from + len]
    }
}

struct ContentInfo {
    line: String,
    request: Option<RequestLine>,
}

pub struct RawRequestContent {
    store: Store,
    len: usize,
    threshold: usize,
    temp_root: PathBuf,
    complete: bool,
    window: ReadWindow,
    line_start: usize,
    headers_len: Option<usize>,
    content_info: Option<ContentInfo>,
    headers: Option<ParsedHeaders>,
    headers_final: bool,
    remote_addr: Option<IpAddr>,
}

impl RawRequestContent {
    pub fn new(
        temp_root: impl Into<PathBuf>,
        threshold: usize,
        remote_addr: Option<IpAddr>,
    ) -> Self {
        Self {
            store: Store::Memory(BytesMut::with_capacity(INITIAL_CAPACITY.min(threshold.max(1)))),
            len: 0,
            threshold,
            temp_root: temp_root.into(),
            complete: false,
            window: ReadWindow::default(),
            line_start: 0,
            headers_len: None,
            content_info: None,
            headers: None,
            headers_final: false,
            remote_addr,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.store, Store::Disk(_))
    }

    /// Location of the spill file, if the content went to disk.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.store {
            Store::Disk(file) => Some(file.path()),
            Store::Memory(_) => None,
        }
    }

    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    pub fn add_bytes(&mut self, data: &[u8]) -> Result<(), BufferError> {
        if self.complete {
            return Err(BufferError::AlreadyComplete);
        }
        if data.is_empty() {
            return Ok(());
        }

        if matches!(self.store, Store::Memory(_)) && self.len + data.len() > self.threshold {
            self.spill_to_disk()?;
        }

        match &mut self.store {
            Store::Memory(buf) => buf.extend_from_slice(data),
            Store::Disk(file) => file
                .as_file_mut()
                .write_all(data)
                .map_err(BufferError::Disk)?,
        }
        self.len += data.len();
        Ok(())
    }

    fn spill_to_disk(&mut self) -> Result<(), BufferError> {
        let mut file = tempfile::Builder::new()
            .prefix("pebble-req-")
            .suffix(".tmp")
            .tempfile_in(&self.temp_root)
            .map_err(BufferError::Disk)?;

        if let Store::Memory(buf) = &self.store {
            file.as_file_mut()
                .write_all(buf)
                .map_err(BufferError::Disk)?;
        }

        debug!(
            path = %file.path().display(),
            buffered = self.len,
            threshold = self.threshold,
            "Request content spilled to disk"
        );
        self.store = Store::Disk(file);
        Ok(())
    }

    /// Marks the content read-only. Calling it again does nothing.
    pub fn done_adding_bytes(&mut self) -> Result<(), BufferError> {
        if self.complete {
            return Ok(());
        }
        self.complete = true;
        if let Store::Disk(file) = &mut self.store {
            let file = file.as_file_mut();
            file.flush().map_err(BufferError::Disk)?;
            file.seek(SeekFrom::Start(0)).map_err(BufferError::Disk)?;
        }
        Ok(())
    }

    fn require_complete(&self) -> Result<(), BufferError> {
        if self.complete {
            Ok(())
        } else {
            Err(BufferError::NotComplete)
        }
    }

    pub fn byte_at(&mut self, index: usize) -> Result<u8, BufferError> {
        self.require_complete()?;
        let mut out = [0u8; 1];
        self.read_into(index, &mut out)?;
        Ok(out[0])
    }

    pub fn copy_bytes(&mut self, offset: usize, out: &mut [u8]) -> Result<(), BufferError> {
        self.require_complete()?;
        self.read_into(offset, out)
    }

    /// Copies `range` out of complete content.
    pub fn read_range(&mut self, range: Range<usize>) -> Result<Vec<u8>, BufferError> {
        self.require_complete()?;
        self.read_vec(range)
    }

    fn read_vec(&mut self, range: Range<usize>) -> Result<Vec<u8>, BufferError> {
        let mut out = vec![0u8; range.end.saturating_sub(range.start)];
        self.read_into(range.start, &mut out)?;
        Ok(out)
    }

    fn read_into(&mut self, offset: usize, out: &mut [u8]) -> Result<(), BufferError> {
        let end = offset
            .checked_add(out.len())
            .filter(|end| *end <= self.len)
            .ok_or(BufferError::OutOfRange {
                offset,
                requested: out.len(),
                len: self.len,
            })?;
        if out.is_empty() {
            return Ok(());
        }

        match &mut self.store {
            Store::Memory(buf) => {
                out.copy_from_slice(&buf[offset..end]);
                Ok(())
            }
            Store::Disk(file) => {
                if self.window.covers(offset, out.len()) {
                    out.copy_from_slice(self.window.slice(offset, out.len()));
                    return Ok(());
                }

                if out.len() <= WINDOW_SIZE {
                    let mut data = vec![0u8; WINDOW_SIZE.min(self.len - offset)];
                    read_file_at(file.as_file_mut(), offset, &mut data, self.complete)
                        .map_err(BufferError::Disk)?;
                    self.window = ReadWindow {
                        start: offset,
                        data,
                    };
                    out.copy_from_slice(self.window.slice(offset, out.len()));
                } else {
                    read_file_at(file.as_file_mut(), offset, out, self.complete)
                        .map_err(BufferError::Disk)?;
                }
                Ok(())
            }
        }
    }

    /// First position of `needle` within `from..to`, clamped to the bytes
    /// buffered so far.
    pub fn find(&mut self, needle: &[u8], from: usize, to: usize) -> Result<Option<usize>, BufferError> {
        let to = to.min(self.len);
        if needle.is_empty() || from >= to || to - from < needle.len() {
            return Ok(None);
        }

        if let Store::Memory(buf) = &self.store {
            return Ok(buf[from..to]
                .windows(needle.len())
                .position(|w| w == needle)
                .map(|i| from + i));
        }

        let span = WINDOW_SIZE.max(needle.len());
        let mut chunk = Vec::with_capacity(span);
        let mut pos = from;
        loop {
            let take = (to - pos).min(span);
            chunk.resize(take, 0);
            self.read_into(pos, &mut chunk)?;
            if let Some(i) = chunk.windows(needle.len()).position(|w| w == needle) {
                return Ok(Some(pos + i));
            }
            if pos + take >= to {
                return Ok(None);
            }
            // overlap so a needle straddling two chunks is still seen
            pos += take - (needle.len() - 1);
        }
    }

    /// Offset just past the first `\r\n\r\n`, once it has arrived.
    pub fn length_of_headers(&mut self) -> Result<Option<usize>, BufferError> {
        if let Some(len) = self.headers_len {
            return Ok(Some(len));
        }
        let found = self.find(b"\r\n\r\n", 0, self.len)?.map(|p| p + 4);
        self.headers_len = found;
        Ok(found)
    }

    /// Body bytes, from the end of the header block to the end of content.
    pub fn body_range(&mut self) -> Result<Range<usize>, BufferError> {
        let start = self.length_of_headers()?.unwrap_or(self.len);
        Ok(start..self.len)
    }

    /// Next CRLF-terminated line, without the terminator. `None` when no
    /// terminator has arrived yet. `reset` rewinds to the first line.
    pub fn read_line(&mut self, reset: bool) -> Result<Option<String>, BufferError> {
        if reset {
            self.line_start = 0;
        }
        let start = self.line_start;
        let Some(end) = self.find(b"\r\n", start, self.len)? else {
            return Ok(None);
        };
        let bytes = self.read_vec(start..end)?;
        self.line_start = end + 2;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Reads the first line and, when it is well formed, memoizes the method,
    /// path, query and version. Returns the raw line either way; a malformed
    /// line only leaves those fields unset.
    pub fn read_content_info(&mut self) -> Result<Option<String>, BufferError> {
        let Some(line) = self.read_line(true)? else {
            return Ok(None);
        };

        let request = match parse_request_line(&line) {
            Ok(request) => Some(request),
            Err(e) => {
                trace!(line = %line, error = ?e, "Malformed request line");
                None
            }
        };
        self.content_info = Some(ContentInfo {
            line: line.clone(),
            request,
        });
        Ok(Some(line))
    }

    fn ensure_content_info(&mut self) -> Result<(), BufferError> {
        if self.content_info.is_none() {
            self.read_content_info()?;
        }
        Ok(())
    }

    /// The parsed request line, if `read_content_info` found a valid one.
    pub fn request_line(&mut self) -> Result<Option<&RequestLine>, BufferError> {
        self.ensure_content_info()?;
        Ok(self.content_info.as_ref().and_then(|c| c.request.as_ref()))
    }

    /// The first line exactly as received.
    pub fn content_info_line(&mut self) -> Result<Option<&str>, BufferError> {
        self.ensure_content_info()?;
        Ok(self.content_info.as_ref().map(|c| c.line.as_str()))
    }

    pub fn http_method(&mut self) -> Result<Option<&str>, BufferError> {
        Ok(self.request_line()?.map(|r| r.method.as_str()))
    }

    pub fn path(&mut self) -> Result<Option<&str>, BufferError> {
        Ok(self.request_line()?.map(|r| r.path.as_str()))
    }

    pub fn http_version(&mut self) -> Result<Option<&str>, BufferError> {
        Ok(self.request_line()?.and_then(|r| r.version.as_deref()))
    }

    pub fn raw_query_string(&mut self) -> Result<Option<&str>, BufferError> {
        Ok(self.request_line()?.and_then(|r| r.query.as_deref()))
    }

    /// Headers after the request line, up to the blank line.
    ///
    /// A line without a `:` ends the scan early; whatever was collected so
    /// far is kept. The result is cached once the header block is complete.
    pub fn headers(&mut self) -> Result<&ParsedHeaders, BufferError> {
        if self.headers.is_some() && self.headers_final {
            return Ok(self.headers.get_or_insert_with(ParsedHeaders::new));
        }

        self.ensure_content_info()?;
        let mut headers = ParsedHeaders::new();

        if self.read_line(true)?.is_some() {
            while let Some(line) = self.read_line(false)? {
                if line.is_empty() {
                    break;
                }
                match parse_header_line(&line) {
                    Some((key, value)) => headers.insert(&key, value),
                    None => {
                        trace!(line = %line, "Header line without separator, stopping");
                        break;
                    }
                }
            }
        }

        if let Some(addr) = self.remote_addr {
            headers.set_var(REMOTE_ADDR, addr.to_string());
        }
        if let Some(uri) = self
            .content_info
            .as_ref()
            .and_then(|c| c.request.as_ref())
            .map(RequestLine::request_uri)
        {
            headers.set_var(REQUEST_URI, uri);
        }

        self.headers_final = self.complete || self.length_of_headers()?.is_some();
        Ok(self.headers.insert(headers))
    }
}

fn read_file_at(file: &mut File, offset: usize, out: &mut [u8], complete: bool) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset as u64))?;
    file.read_exact(out)?;
    if !complete {
        // writers append at the end
        file.seek(SeekFrom::End(0))?;
    }
    Ok(())
}

impl fmt::Debug for RawRequestContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawRequestContent")
            .field("len", &self.len)
            .field("complete", &self.complete)
            .field("file_backed", &self.is_file_backed())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}
