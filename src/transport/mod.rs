//! Transport layer for the query gateway.
//!
//! Only HTTP is provided; it is a thin mapping onto the gateway.

pub mod http;

pub use http::{HttpTransport, router};
