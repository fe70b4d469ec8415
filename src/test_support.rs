//! Shared fakes for runtime tests: a scripted brain and an in-memory
//! transport. Exposed as a normal module so integration tests can use them;
//! nothing here touches the network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::brain::types::{TurnInput, TurnOutput};
use crate::brain::{BrainError, BrainProvider};
use crate::transport::{InboundMessage, MessagingTransport, TransportError};

/// A brain that replays scripted responses, then falls back to a fixed
/// output. Captures every input it was asked to plan for.
pub struct MockBrain {
    responses: Mutex<VecDeque<Result<TurnOutput, String>>>,
    fallback: TurnOutput,
    pub inputs: Mutex<Vec<TurnInput>>,
}

impl MockBrain {
    pub fn with_fallback(fallback: TurnOutput) -> Self {
        MockBrain {
            responses: Mutex::new(VecDeque::new()),
            fallback,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// A brain that always reports malformed output.
    pub fn always_malformed() -> Self {
        Self::with_fallback(TurnOutput::malformed("invalid_json"))
    }

    /// Queue one scripted response ahead of the fallback.
    pub fn push_output(&self, output: TurnOutput) {
        self.responses.lock().unwrap().push_back(Ok(output));
    }

    /// Queue one hard failure.
    pub fn push_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl BrainProvider for MockBrain {
    async fn generate_turn(&self, input: &TurnInput) -> Result<TurnOutput, BrainError> {
        self.inputs.lock().unwrap().push(input.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(BrainError::Request(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

/// A record of one outbound send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub content: String,
    pub thread_id: Option<String>,
}

/// In-memory transport: seeded inbound messages drain on the first poll,
/// sends are captured for assertions.
#[derive(Default)]
pub struct ScriptedTransport {
    inbox: Mutex<Vec<InboundMessage>>,
    pub sent: Mutex<Vec<SentMessage>>,
    pub fail_sends: Mutex<bool>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_inbound(&self, message: InboundMessage) {
        self.inbox.lock().unwrap().push(message);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }
}

#[async_trait]
impl MessagingTransport for ScriptedTransport {
    async fn poll(
        &self,
        _since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        let mut inbox = self.inbox.lock().unwrap();
        let take = inbox.len().min(limit);
        Ok(inbox.drain(..take).collect())
    }

    async fn send(
        &self,
        to: &str,
        content: &str,
        thread_id: Option<&str>,
    ) -> Result<String, TransportError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(TransportError::Send("scripted send failure".to_string()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            content: content.to_string(),
            thread_id: thread_id.map(str::to_string),
        });
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
