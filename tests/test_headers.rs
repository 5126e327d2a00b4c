use pebble::http::headers::{ParsedHeaders, REMOTE_ADDR};

#[test]
fn test_lookup_by_wire_name_or_variable() {
    let mut headers = ParsedHeaders::new();
    headers.insert("Content-Type", "text/plain");
    headers.insert("x-request-id", "42");

    assert_eq!(headers.get("content-type"), Some("text/plain"));
    assert_eq!(headers.var("HTTP_CONTENT_TYPE"), Some("text/plain"));
    assert_eq!(headers.var("HTTP_X_REQUEST_ID"), Some("42"));
    assert!(headers.contains("X-Request-Id"));
}

#[test]
fn test_repeated_headers_are_joined() {
    let mut headers = ParsedHeaders::new();
    headers.insert("Accept", "text/html");
    headers.insert("accept", "application/json");

    assert_eq!(headers.len(), 1);
    assert_eq!(headers.get("Accept"), Some("text/html, application/json"));
}

#[test]
fn test_synthesized_variables() {
    let mut headers = ParsedHeaders::new();
    headers.insert_var(REMOTE_ADDR, "10.0.0.7");
    assert_eq!(headers.var("http_remote_addr"), Some("10.0.0.7"));
    assert_eq!(headers.get("Remote-Addr"), Some("10.0.0.7"));
}

#[test]
fn test_framing_helpers() {
    let mut headers = ParsedHeaders::new();
    headers.insert("Content-Length", " 12 ");
    headers.insert("Transfer-Encoding", "gzip, Chunked");
    headers.insert("Expect", "100-Continue");
    headers.insert("Content-Type", "multipart/form-data; boundary=x");

    assert_eq!(headers.content_length(), Some(12));
    assert!(headers.is_chunked());
    assert!(headers.expect_continue());
    assert!(headers.is_multipart());

    let mut bad = ParsedHeaders::new();
    bad.insert("Content-Length", "many");
    assert_eq!(bad.content_length(), None);
    assert!(!bad.is_chunked());
    assert!(!bad.expect_continue());
}

#[test]
fn test_set_var_replaces_client_value() {
    let mut headers = ParsedHeaders::new();
    headers.insert("Remote-Addr", "6.6.6.6");
    headers.set_var(REMOTE_ADDR, "10.0.0.7");

    assert_eq!(headers.var(REMOTE_ADDR), Some("10.0.0.7"));
    assert_eq!(headers.len(), 1);
}
