//! Streaming Response Consumption
//!
//! The [`StreamingExchange`] turns a [`ChatTransport`](crate::transport::ChatTransport)
//! token stream into an assistant message that grows in place inside the
//! shared ledger, and reports progress as an explicit state machine instead
//! of completion callbacks.
//!
//! # Example
//!
//! ```ignore
//! use composer_core::streaming::{ExchangeStatus, StreamingExchange};
//!
//! let exchange = StreamingExchange::new(transport, ledger);
//! let mut status = exchange.subscribe();
//! let generation = exchange.submit(request, user_message)?;
//!
//! while status.changed().await.is_ok() {
//!     let snapshot = *status.borrow();
//!     if snapshot.generation == generation && snapshot.status.is_terminal() {
//!         break;
//!     }
//! }
//! ```

mod exchange;

pub use exchange::{
    parse_error_message, ExchangeError, ExchangeSnapshot, ExchangeStatus, StreamingExchange,
    GENERIC_ERROR_MESSAGE,
};
