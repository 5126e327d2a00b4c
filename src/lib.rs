//! Pebble - embeddable HTTP/1.x server core
//!
//! Reads requests of any size into memory or temp files, routes them to
//! handlers and writes responses back with a single header emission.

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod server;
