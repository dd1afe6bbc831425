use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::{DispatchError, Dispatcher};

/// Pre-programmed replies for deterministic testing without API calls.
pub enum MockReply {
    /// Return this text.
    Text(String),
    /// Return this error.
    Error(DispatchError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Dispatcher that replies from a fixed sequence, one entry per call.
pub struct MockDispatcher {
    replies: Vec<MockReply>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl MockDispatcher {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a dispatcher whose every call is answered with `text`.
    /// Useful when a test doesn't care how many chats it sends.
    pub fn always(text: &str) -> RepeatDispatcher {
        RepeatDispatcher {
            text: text.to_string(),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Messages received so far, in dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(&self, message: &str) -> Result<String, DispatchError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().unwrap().push(message.to_string());

        let Some(reply) = self.replies.get(idx) else {
            return Err(DispatchError::Transport(format!(
                "mock: no reply configured for call {idx}"
            )));
        };

        // Unroll nested delays iteratively.
        let mut current = reply;
        loop {
            match current {
                MockReply::Text(text) => return Ok(text.clone()),
                MockReply::Error(err) => return Err(err.clone()),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                }
            }
        }
    }
}

/// Dispatcher returning the same text forever. Built via [`MockDispatcher::always`].
pub struct RepeatDispatcher {
    text: String,
    call_count: AtomicUsize,
}

impl RepeatDispatcher {
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dispatcher for RepeatDispatcher {
    async fn dispatch(&self, _message: &str) -> Result<String, DispatchError> {
        let _ = self.call_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.text.clone())
    }
}
