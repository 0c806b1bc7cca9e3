//! Channel abstraction for sync sessions.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use std::collections::VecDeque;
use std::time::Duration;
use twsync_protocol::Message;
use twsync_tls::{
    CancelToken, ChannelError, ChannelResult, Credentials, SecureChannel, TcpTransport, Transport,
};

/// A message channel a sync session runs over.
///
/// Implementations close themselves when an operation fails; later calls
/// return [`ChannelError::Closed`].
pub trait SyncChannel {
    /// Sends one message.
    fn send(&mut self, message: &Message, timeout: Duration) -> ChannelResult<()>;

    /// Waits for one message.
    fn receive(&mut self, timeout: Duration) -> ChannelResult<Message>;

    /// Closes the channel. Idempotent.
    fn close(&mut self);

    /// Returns true until the channel has been closed.
    fn is_open(&self) -> bool;

    /// Returns the token that interrupts blocking operations.
    fn cancel_token(&self) -> CancelToken;
}

impl<T: Transport> SyncChannel for SecureChannel<T> {
    fn send(&mut self, message: &Message, timeout: Duration) -> ChannelResult<()> {
        SecureChannel::send(self, message, timeout)
    }

    fn receive(&mut self, timeout: Duration) -> ChannelResult<Message> {
        SecureChannel::receive(self, timeout)
    }

    fn close(&mut self) {
        SecureChannel::close(self)
    }

    fn is_open(&self) -> bool {
        SecureChannel::is_open(self)
    }

    fn cancel_token(&self) -> CancelToken {
        SecureChannel::cancel_token(self)
    }
}

/// Connects to the configured server and completes the TLS handshake.
pub fn connect(
    config: &SyncConfig,
    credentials: &Credentials,
) -> SyncResult<SecureChannel<TcpTransport>> {
    let transport =
        TcpTransport::connect(&config.server, config.connect_timeout).map_err(SyncError::Connect)?;
    let channel = SecureChannel::open(transport, credentials, &config.validator, &config.channel)?;
    tracing::info!(server = %config.server, "connected");
    Ok(channel)
}

/// Scripted reply of a [`MockChannel`].
#[derive(Debug)]
pub enum MockReply {
    /// Deliver a message.
    Message(Message),
    /// Fail the receive with an error.
    Fail(ChannelError),
}

/// A channel for testing that records sent messages and plays back
/// scripted replies.
///
/// Receiving with no scripted reply left times out.
#[derive(Debug)]
pub struct MockChannel {
    sent: Vec<Message>,
    replies: VecDeque<MockReply>,
    send_failure: Option<ChannelError>,
    cancel: CancelToken,
    open: bool,
}

impl MockChannel {
    /// Creates an open channel with no replies.
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            replies: VecDeque::new(),
            send_failure: None,
            cancel: CancelToken::new(),
            open: true,
        }
    }

    /// Queues a reply message.
    pub fn push_reply(&mut self, message: Message) {
        self.replies.push_back(MockReply::Message(message));
    }

    /// Queues a receive failure.
    pub fn push_failure(&mut self, error: ChannelError) {
        self.replies.push_back(MockReply::Fail(error));
    }

    /// Makes the next send fail.
    pub fn fail_next_send(&mut self, error: ChannelError) {
        self.send_failure = Some(error);
    }

    /// Returns the messages sent so far.
    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    /// Returns the number of replies not yet received.
    pub fn remaining_replies(&self) -> usize {
        self.replies.len()
    }

    fn fail<R>(&mut self, error: ChannelError) -> ChannelResult<R> {
        self.open = false;
        Err(error)
    }

    fn ready(&mut self) -> ChannelResult<()> {
        if !self.open {
            return Err(ChannelError::Closed);
        }
        if self.cancel.is_cancelled() {
            return self.fail(ChannelError::Cancelled);
        }
        Ok(())
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncChannel for MockChannel {
    fn send(&mut self, message: &Message, _timeout: Duration) -> ChannelResult<()> {
        self.ready()?;
        if let Some(error) = self.send_failure.take() {
            return self.fail(error);
        }
        self.sent.push(message.clone());
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> ChannelResult<Message> {
        self.ready()?;
        match self.replies.pop_front() {
            Some(MockReply::Message(message)) => Ok(message),
            Some(MockReply::Fail(error)) => self.fail(error),
            None => self.fail(ChannelError::Timeout),
        }
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
