//! HTTP/1.x request intake and response output.
//!
//! # Request path
//!
//! - **`raw`**: the raw bytes of one request, in memory or spilled to a temp file
//! - **`parser`**: request line and header line parsing
//! - **`headers`**: parsed header variables (`HTTP_*`)
//! - **`body`**: reads a complete request off the socket, honoring the size cap
//! - **`request`**: the parsed request handed to handlers
//! - **`multipart`**: splits `multipart/form-data` bodies into byte ranges
//! - **`cookie`**: request cookies and `Set-Cookie` values
//!
//! # Response path
//!
//! - **`response`**: status, headers and body buffer, with the write state
//! - **`writer`**: serializes headers once and streams the body
//! - **`error_page`**: HTML for failed requests
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Read one complete request
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Authenticate, route, run handler
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Final flush
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod body;
pub mod connection;
pub mod cookie;
pub mod error_page;
pub mod headers;
pub mod multipart;
pub mod parser;
pub mod raw;
pub mod request;
pub mod response;
pub mod writer;
