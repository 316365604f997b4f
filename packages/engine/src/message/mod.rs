// packages/engine/src/message/mod.rs
//! Request and response records shared by every interceptor

pub mod body;
pub mod headers;
pub mod request;
pub mod response;
pub mod signal;

pub use body::{Body, Chunk};
pub use request::{Credentials, Request, RequestInit};
pub use response::{Response, ResponseBuilder, ResponseKind};
pub use signal::{AbortController, AbortSignal, DEFAULT_ABORT_REASON};
