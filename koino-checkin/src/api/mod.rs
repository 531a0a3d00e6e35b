//! HTTP/SSE API for the check-in service

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, run, AppContext};
