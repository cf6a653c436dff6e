//! Scripted transport for testing drivers
//!
//! Replays a queue of canned replies (or errors) in order and records every
//! command it was handed. Once the queue is empty each exchange times out with
//! zero bytes received, like a device that is switched off.

use super::{LineSettings, ResponseEnd, Transport};
use crate::error::{RigError, RigResult};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// One recorded exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    /// Port the command was addressed to
    pub port: String,
    /// Line settings the driver asked for
    pub line: LineSettings,
    /// Raw command
    pub bytes: Vec<u8>,
}

impl SentCommand {
    /// The command as text, for the ASCII devices.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// [`Transport`] answering from a queue of canned replies.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<RigResult<Vec<u8>>>>,
    sent: Mutex<Vec<SentCommand>>,
}

impl ScriptedTransport {
    /// Empty script: every exchange times out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply.
    pub fn reply(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.push(Ok(bytes.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: RigError) -> Self {
        self.push(Err(error));
        self
    }

    /// Queue a reply or failure on a shared handle.
    pub fn push(&self, reply: RigResult<Vec<u8>>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Every command sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw bytes of every command sent so far.
    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.sent().into_iter().map(|sent| sent.bytes).collect()
    }

    /// Text of every command sent so far.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent().iter().map(SentCommand::text).collect()
    }
}

impl Transport for ScriptedTransport {
    fn exchange(
        &self,
        port: &str,
        line: &LineSettings,
        command: &[u8],
        _end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentCommand {
                port: port.to_string(),
                line: *line,
                bytes: command.to_vec(),
            });

        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(RigError::Timeout {
                    port: port.to_string(),
                    received: 0,
                })
            })
    }
}
