use pebble::http::raw::RawRequestContent;
use pebble::http::request::{Method, MethodMask, Request, parse_urlencoded};

fn request(bytes: &[u8]) -> Request {
    let mut raw = RawRequestContent::new(
        std::env::temp_dir(),
        1024,
        Some("10.1.2.3".parse().unwrap()),
    );
    raw.add_bytes(bytes).unwrap();
    raw.done_adding_bytes().unwrap();
    Request::from_content(raw).unwrap().unwrap()
}

#[test]
fn test_request_header_retrieval() {
    let req = request(
        b"GET / HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/json\r\n\r\n",
    );

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
    assert_eq!(req.headers.var("HTTP_REMOTE_ADDR"), Some("10.1.2.3"));
}

#[test]
fn test_request_content_length_parsing() {
    let mut req = request(b"POST /api HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");

    assert_eq!(req.method, Method::POST);
    assert_eq!(req.content_length(), 5);
    assert_eq!(req.body().unwrap(), b"hello".to_vec());
}

#[test]
fn test_request_content_length_missing() {
    let req = request(b"GET / HTTP/1.1\r\n\r\n");
    assert_eq!(req.content_length(), 0);
}

#[test]
fn test_request_query_is_decoded() {
    let req = request(b"GET /search?q=rust+lang&page=2&tag=a%26b HTTP/1.1\r\n\r\n");

    assert_eq!(req.path, "/search");
    assert_eq!(req.query_string.as_deref(), Some("q=rust+lang&page=2&tag=a%26b"));
    assert_eq!(req.query_value("q"), Some("rust lang"));
    assert_eq!(req.query_value("page"), Some("2"));
    assert_eq!(req.query_value("tag"), Some("a&b"));
}

#[test]
fn test_request_cookies() {
    let req = request(b"GET / HTTP/1.1\r\nCookie: sid=abc; prefs=lang=en&theme=dark\r\n\r\n");

    assert_eq!(req.cookies.len(), 2);
    assert_eq!(req.cookies.get("sid").unwrap().value(), "abc");
}

#[test]
fn test_keep_alive_defaults_by_version() {
    assert!(request(b"GET / HTTP/1.1\r\n\r\n").keep_alive());
    assert!(!request(b"GET / HTTP/1.0\r\n\r\n").keep_alive());
    assert!(!request(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").keep_alive());
    assert!(request(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").keep_alive());
}

#[test]
fn test_request_without_version_is_http_1_0() {
    let req = request(b"GET /old\r\n\r\n");
    assert_eq!(req.version, "HTTP/1.0");
}

#[test]
fn test_unknown_method_is_rejected() {
    let mut raw = RawRequestContent::new(std::env::temp_dir(), 1024, None);
    raw.add_bytes(b"BREW /pot HTTP/1.1\r\n\r\n").unwrap();
    raw.done_adding_bytes().unwrap();
    assert!(Request::from_content(raw).unwrap().is_none());
}

#[test]
fn test_method_round_trip_names() {
    for name in ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH", "DEBUG"] {
        assert_eq!(Method::from_str(name).unwrap().as_str(), name);
    }
    assert_eq!(Method::from_str("get"), None);
}

#[test]
fn test_method_mask_parsing() {
    let mask = MethodMask::parse("GET, POST");
    assert!(mask.contains(Method::GET));
    assert!(mask.contains(Method::POST));
    assert!(!mask.contains(Method::PUT));

    assert!(MethodMask::parse("*").contains(Method::DELETE));
    assert!(MethodMask::parse("bogus").is_empty());
}

#[test]
fn test_parse_urlencoded_pairs() {
    let pairs = parse_urlencoded(b"a=1&b=two+words&c=");
    assert_eq!(
        pairs,
        vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "two words".to_string()),
            ("c".to_string(), String::new()),
        ]
    );
}
