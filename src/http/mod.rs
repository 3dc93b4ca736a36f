//! HTTP/1.1 client side: request encoding, streaming response parsing and a
//! job-dispatching client session.

mod client;
mod headers;
mod parser;

pub use client::{HttpClient, HttpContext, HttpHandler, Response};
pub use headers::{HeaderMap, ResponseHeaders};
pub use parser::{BodyFraming, ResponseHandler, ResponseParser};
