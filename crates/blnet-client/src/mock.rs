use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::{ClientError, Command, Transport};

/// Scripted outcome of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Bytes(Vec<u8>),
    /// Connection refused by the peer.
    Refused,
    /// Peer closed the connection without sending data.
    Closed,
}

/// In-process stand-in for the bridge.
///
/// Replies are queued per command. The last queued reply for a command is
/// sticky and answers every further call.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<Command, VecDeque<MockReply>>>,
    calls: Mutex<Vec<Command>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, command: Command, reply: MockReply) -> Self {
        self.push(command, reply);
        self
    }

    pub fn push(&self, command: Command, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(command)
            .or_default()
            .push_back(reply);
    }

    /// Drops every queued reply for `command` and replaces them with `reply`.
    pub fn set(&self, command: Command, reply: MockReply) {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        replies.insert(command, VecDeque::from([reply]));
    }

    pub fn calls(&self) -> Vec<Command> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self, command: Command) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|&&called| called == command)
            .count()
    }

    fn next_reply(&self, command: Command) -> Option<MockReply> {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = replies.get_mut(&command)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, command: Command) -> Result<Vec<u8>, ClientError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);

        match self.next_reply(command) {
            Some(MockReply::Bytes(bytes)) => Ok(bytes),
            Some(MockReply::Refused) => Err(ClientError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
            Some(MockReply::Closed) | None => Err(ClientError::Closed { command }),
        }
    }
}
