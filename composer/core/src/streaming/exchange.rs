//! Streaming Exchange
//!
//! One logical request/response with the chat backend. The exchange owns the
//! confirmed side of the message ledger: it appends the user message it was
//! handed, grows the assistant reply in place as tokens arrive, and publishes
//! its status on a watch channel.
//!
//! ```text
//! Idle ──submit──▶ Submitted ──first token──▶ Streaming ──▶ Ready | Error
//!                      │                          │
//!                      └──────────stop────────────┴──▶ Stopped
//! ```
//!
//! Each submit or reload starts a new generation. A worker only publishes
//! while its generation is current, so a stopped or superseded worker can
//! never overwrite a newer state.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::ledger::MessageLedger;
use crate::messages::{ChatMessage, MessageId, MessageRole};
use crate::transport::{ChatRequest, ChatTransport, StreamingToken};

/// Shown when a failure carries no usable text
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong.";

/// Exchange state machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    /// Nothing sent yet
    #[default]
    Idle,
    /// Request sent, no token yet
    Submitted,
    /// Tokens arriving
    Streaming,
    /// Reply complete
    Ready,
    /// Backend or transport failure
    Error,
    /// Cancelled by the user
    Stopped,
}

impl ExchangeStatus {
    /// Whether a request is in flight
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::Streaming)
    }

    /// Whether this status ends a generation
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Stopped)
    }
}

/// Status of a specific generation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSnapshot {
    /// Incremented by every submit and reload
    pub generation: u64,
    /// Status of that generation
    pub status: ExchangeStatus,
}

/// Hand-off refusals
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ExchangeError {
    /// A request is already in flight
    #[error("An exchange is already in flight")]
    Busy,

    /// Reload without a previous request
    #[error("There is no previous exchange to reload")]
    NothingToReload,

    /// Called outside a Tokio runtime
    #[error("No async runtime available to run the exchange")]
    NoRuntime,
}

#[derive(Default)]
struct ExchangeState {
    snapshot: ExchangeSnapshot,
    last_request: Option<ChatRequest>,
    worker: Option<JoinHandle<()>>,
    final_message: Option<(u64, ChatMessage)>,
    error_text: Option<(u64, String)>,
}

struct Shared {
    transport: Arc<dyn ChatTransport>,
    ledger: Arc<RwLock<MessageLedger>>,
    state: Mutex<ExchangeState>,
    status_tx: watch::Sender<ExchangeSnapshot>,
}

impl Shared {
    /// Move `generation` to `status` if it is still the current generation
    fn transition(&self, generation: u64, status: ExchangeStatus) -> bool {
        let mut state = self.state.lock();
        if state.snapshot.generation != generation || state.snapshot.status.is_terminal() {
            return false;
        }
        state.snapshot.status = status;
        self.status_tx.send_replace(state.snapshot);
        true
    }

    fn fail(&self, generation: u64, text: String) {
        {
            let mut state = self.state.lock();
            if state.snapshot.generation != generation || state.snapshot.status.is_terminal() {
                return;
            }
            state.error_text = Some((generation, text.clone()));
            state.snapshot.status = ExchangeStatus::Error;
            self.status_tx.send_replace(state.snapshot);
        }
        tracing::warn!(generation, error = %text, "Exchange failed");
    }

    fn complete(&self, generation: u64, reply_id: Option<&MessageId>, message: String) {
        // Lock order is state then ledger, as in submit
        let mut state = self.state.lock();
        if state.snapshot.generation != generation || state.snapshot.status.is_terminal() {
            return;
        }
        let reply = {
            let mut ledger = self.ledger.write();
            match reply_id {
                Some(id) => {
                    if !message.is_empty() {
                        ledger.set_content(id, message);
                    }
                    ledger.get(id).cloned()
                }
                None => {
                    let reply = ChatMessage::new(MessageRole::Assistant, message);
                    ledger.push_persisted(reply.clone());
                    Some(reply)
                }
            }
        };

        state.final_message = reply.map(|m| (generation, m));
        state.snapshot.status = ExchangeStatus::Ready;
        self.status_tx.send_replace(state.snapshot);
        tracing::debug!(generation, "Exchange ready");
    }
}

async fn run_worker(shared: Arc<Shared>, generation: u64, request: ChatRequest) {
    let mut rx = match shared.transport.send_streaming(&request).await {
        Ok(rx) => rx,
        Err(e) => {
            shared.fail(generation, e.to_string());
            return;
        }
    };

    let mut reply_id: Option<MessageId> = None;
    while let Some(token) = rx.recv().await {
        match token {
            StreamingToken::Token(text) => {
                let id = match &reply_id {
                    Some(id) => id.clone(),
                    None => {
                        if !shared.transition(generation, ExchangeStatus::Streaming) {
                            return;
                        }
                        let reply = ChatMessage::new(MessageRole::Assistant, "");
                        let id = reply.id.clone();
                        shared.ledger.write().push_persisted(reply);
                        reply_id = Some(id.clone());
                        id
                    }
                };
                shared.ledger.write().append_content(&id, &text);
            }
            StreamingToken::Complete { message } => {
                shared.complete(generation, reply_id.as_ref(), message);
                return;
            }
            StreamingToken::Error(text) => {
                shared.fail(generation, text);
                return;
            }
        }
    }

    // Channel closed without a terminal token
    match reply_id {
        Some(id) => shared.complete(generation, Some(&id), String::new()),
        None => shared.fail(generation, String::new()),
    }
}

/// Wraps request/response exchanges with one chat backend
pub struct StreamingExchange {
    shared: Arc<Shared>,
}

impl StreamingExchange {
    /// Create an exchange writing into a shared ledger
    pub fn new(transport: Arc<dyn ChatTransport>, ledger: Arc<RwLock<MessageLedger>>) -> Self {
        let (status_tx, _) = watch::channel(ExchangeSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                transport,
                ledger,
                state: Mutex::new(ExchangeState::default()),
                status_tx,
            }),
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ExchangeStatus {
        self.shared.state.lock().snapshot.status
    }

    /// Current generation and status
    #[must_use]
    pub fn snapshot(&self) -> ExchangeSnapshot {
        self.shared.state.lock().snapshot
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<ExchangeSnapshot> {
        self.shared.status_tx.subscribe()
    }

    /// Hand off a new exchange
    ///
    /// Appends `user_message` to the ledger, sends the confirmed history as
    /// context and returns the new generation. Fails synchronously without
    /// touching the ledger if a request is already in flight.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Busy`] while in flight; [`ExchangeError::NoRuntime`]
    /// outside a Tokio runtime.
    pub fn submit(
        &self,
        mut request: ChatRequest,
        user_message: ChatMessage,
    ) -> Result<u64, ExchangeError> {
        let mut state = self.shared.state.lock();
        if state.snapshot.status.is_in_flight() {
            return Err(ExchangeError::Busy);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExchangeError::NoRuntime)?;

        request.messages = {
            let mut ledger = self.shared.ledger.write();
            ledger.push_persisted(user_message);
            ledger.history()
        };
        Ok(self.start(&mut state, &runtime, request))
    }

    /// Re-issue the last exchange unchanged
    ///
    /// # Errors
    ///
    /// See [`StreamingExchange::reload_with`].
    pub fn reload(&self) -> Result<u64, ExchangeError> {
        self.reload_with(|_| {})
    }

    /// Re-issue the last exchange after adjusting its settings
    ///
    /// A trailing assistant reply is dropped so the backend answers the same
    /// user message again.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Busy`] while in flight, [`ExchangeError::NothingToReload`]
    /// before the first submit, [`ExchangeError::NoRuntime`] outside a runtime.
    pub fn reload_with(
        &self,
        configure: impl FnOnce(&mut ChatRequest),
    ) -> Result<u64, ExchangeError> {
        let mut state = self.shared.state.lock();
        if state.snapshot.status.is_in_flight() {
            return Err(ExchangeError::Busy);
        }
        let mut request = state
            .last_request
            .clone()
            .ok_or(ExchangeError::NothingToReload)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExchangeError::NoRuntime)?;

        configure(&mut request);
        request.messages = {
            let mut ledger = self.shared.ledger.write();
            if let Some(dropped) = ledger.pop_trailing_assistant() {
                tracing::debug!(id = %dropped.id, "Dropped reply for reload");
            }
            ledger.history()
        };
        Ok(self.start(&mut state, &runtime, request))
    }

    fn start(
        &self,
        state: &mut ExchangeState,
        runtime: &tokio::runtime::Handle,
        request: ChatRequest,
    ) -> u64 {
        state.snapshot = ExchangeSnapshot {
            generation: state.snapshot.generation + 1,
            status: ExchangeStatus::Submitted,
        };
        let generation = state.snapshot.generation;
        self.shared.status_tx.send_replace(state.snapshot);

        tracing::debug!(
            generation,
            chat_id = %request.chat_id,
            model = %request.model,
            context = request.messages.len(),
            transport = self.shared.transport.name(),
            "Exchange submitted"
        );

        state.last_request = Some(request.clone());
        state.worker = Some(runtime.spawn(run_worker(self.shared.clone(), generation, request)));
        generation
    }

    /// Cancel the in-flight exchange; a no-op otherwise
    ///
    /// Returns whether anything was stopped.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.snapshot.status.is_in_flight() {
            return false;
        }
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        state.snapshot.status = ExchangeStatus::Stopped;
        self.shared.status_tx.send_replace(state.snapshot);
        tracing::debug!(generation = state.snapshot.generation, "Exchange stopped");
        true
    }

    /// Abandon any exchange and forget the last request (conversation switch)
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        if let Some(worker) = state.worker.take() {
            worker.abort();
        }
        state.last_request = None;
        state.final_message = None;
        state.error_text = None;
        state.snapshot = ExchangeSnapshot {
            generation: state.snapshot.generation + 1,
            status: ExchangeStatus::Idle,
        };
        self.shared.status_tx.send_replace(state.snapshot);
    }

    /// Final assistant message of a generation that reached `Ready`
    #[must_use]
    pub fn final_message(&self, generation: u64) -> Option<ChatMessage> {
        match &self.shared.state.lock().final_message {
            Some((g, message)) if *g == generation => Some(message.clone()),
            _ => None,
        }
    }

    /// Raw error text of a generation that reached `Error`
    #[must_use]
    pub fn error_text(&self, generation: u64) -> Option<String> {
        match &self.shared.state.lock().error_text {
            Some((g, text)) if *g == generation => Some(text.clone()),
            _ => None,
        }
    }

    /// The request most recently handed off
    #[must_use]
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.shared.state.lock().last_request.clone()
    }
}

impl Drop for StreamingExchange {
    fn drop(&mut self) {
        if let Some(worker) = self.shared.state.lock().worker.take() {
            worker.abort();
        }
    }
}

/// Turn backend error text into the message shown to the user
///
/// A JSON body with a string `error` field yields that field; text that is
/// not JSON is shown as is.
#[must_use]
pub fn parse_error_message(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return GENERIC_ERROR_MESSAGE.to_string();
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .filter(|e| !e.is_empty())
            .map_or_else(|| GENERIC_ERROR_MESSAGE.to_string(), str::to_string),
        Err(_) => trimmed.to_string(),
    }
}
