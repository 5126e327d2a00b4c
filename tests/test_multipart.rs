use pebble::http::multipart::{MultipartError, parse_boundary, split_parts};
use pebble::http::raw::RawRequestContent;
use pebble::http::request::Request;

const BOUNDARY: &str = "----pebbleBoundary42";

fn multipart_body(file: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"title\"\r\n\r\n");
    body.extend_from_slice(b"holiday\r\n");
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"photo\"; filename=\"beach.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n",
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn request_content(body: &[u8], threshold: usize) -> RawRequestContent {
    let head = format!(
        "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut raw = RawRequestContent::new(std::env::temp_dir(), threshold, None);
    raw.add_bytes(head.as_bytes()).unwrap();
    for piece in body.chunks(1000) {
        raw.add_bytes(piece).unwrap();
    }
    raw.done_adding_bytes().unwrap();
    raw
}

/// Binary payload that contains CRLFs and dashes but never the full separator.
fn file_payload(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| match i % 97 {
            0 => b'\r',
            1 => b'\n',
            2 | 3 => b'-',
            n => n as u8,
        })
        .collect()
}

#[test]
fn test_file_bytes_are_isolated_by_range() {
    let file = file_payload(3000);
    let body = multipart_body(&file);
    let mut raw = request_content(&body, 1 << 20);
    let range = raw.body_range().unwrap();

    let items = split_parts(&mut raw, range, BOUNDARY).unwrap();
    assert_eq!(items.len(), 2);

    assert_eq!(items[0].name, "title");
    assert!(!items[0].is_file());
    assert_eq!(raw.read_range(items[0].range.clone()).unwrap(), b"holiday".to_vec());

    let photo = &items[1];
    assert_eq!(photo.name, "photo");
    assert_eq!(photo.filename.as_deref(), Some("beach.bin"));
    assert_eq!(photo.content_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(photo.len(), file.len());
    assert_eq!(raw.read_range(photo.range.clone()).unwrap(), file);
}

#[test]
fn test_file_backed_upload_splits_the_same() {
    let file = file_payload(40_000);
    let body = multipart_body(&file);

    let mut memory = request_content(&body, 1 << 20);
    let mut disk = request_content(&body, 2048);
    assert!(disk.is_file_backed());

    let memory_range = memory.body_range().unwrap();
    let disk_range = disk.body_range().unwrap();
    let from_memory = split_parts(&mut memory, memory_range, BOUNDARY).unwrap();
    let from_disk = split_parts(&mut disk, disk_range, BOUNDARY).unwrap();

    assert_eq!(from_memory, from_disk);
    assert_eq!(disk.read_range(from_disk[1].range.clone()).unwrap(), file);
}

#[test]
fn test_request_exposes_files_and_fields() {
    let file = file_payload(500);
    let raw = request_content(&multipart_body(&file), 256);
    let mut req = Request::from_content(raw).unwrap().unwrap();
    pebble::http::body::complete_form(&mut req).unwrap();

    assert_eq!(req.form_value("title"), Some("holiday"));
    let photo = req.file("photo").unwrap().clone();
    assert_eq!(req.file_bytes(&photo).unwrap(), file);
}

#[test]
fn test_truncated_body_is_an_error() {
    let body = multipart_body(b"data");
    let cut = &body[..body.len() - 30];
    let mut raw = request_content(cut, 1 << 20);
    let range = raw.body_range().unwrap();

    assert!(matches!(
        split_parts(&mut raw, range, BOUNDARY),
        Err(MultipartError::UnexpectedEof)
    ));
}

#[test]
fn test_part_without_disposition() {
    let body = format!("--{BOUNDARY}\r\nContent-Type: text/plain\r\n\r\nx\r\n--{BOUNDARY}--\r\n");
    let mut raw = request_content(body.as_bytes(), 1 << 20);
    let range = raw.body_range().unwrap();

    assert!(matches!(
        split_parts(&mut raw, range, BOUNDARY),
        Err(MultipartError::MissingContentDisposition)
    ));
}

#[test]
fn test_boundary_parsing() {
    assert_eq!(
        parse_boundary(&format!("multipart/form-data; boundary={BOUNDARY}")).unwrap(),
        BOUNDARY
    );
    assert!(parse_boundary("multipart/form-data; charset=utf-8").is_err());
}
