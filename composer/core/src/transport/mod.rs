//! Chat Transport
//!
//! Abstracted access to the chat backend through a common trait.
//!
//! # Available Transports
//!
//! - **HTTP**: streaming POST to `<base>/api/chat`
//! - **Echo**: in-process, see [`crate::memory::EchoTransport`]
//!
//! # Usage
//!
//! ```ignore
//! use composer_core::transport::{ChatRequest, ChatTransport, HttpTransport};
//!
//! let transport = HttpTransport::new("http://localhost:3000")?;
//! let rx = transport.send_streaming(&request).await?;
//! ```

mod http;
mod traits;

pub use http::{HttpTransport, ENDPOINT_ENV};
pub use traits::{ChatRequest, ChatTransport, StreamingToken};
