//! Sync session state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::SyncStore;
use crate::transport::SyncChannel;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use twsync_protocol::{names, Cursor, Message, MessageKind, Record, SyncOutcome, SyncResponse};
use twsync_tls::{CancelToken, ChannelError};

/// Status code assumed for an error message without a usable `code` header.
const DEFAULT_ERROR_CODE: u16 = 500;

/// The state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has happened yet.
    Idle,
    /// The request is built and ready to send.
    Requesting,
    /// The request was sent; waiting for the server.
    AwaitingResponse,
    /// A response was accepted and is ready to apply.
    Applying,
    /// Replayed records were applied and the new cursor committed.
    Committed,
    /// The round failed.
    Aborted,
}

impl SessionState {
    /// Returns the lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::AwaitingResponse => "awaiting-response",
            SessionState::Applying => "applying",
            SessionState::Committed => "committed",
            SessionState::Aborted => "aborted",
        }
    }

    /// Returns true if no further step is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted)
    }

    /// Returns true while a round is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Requesting | SessionState::AwaitingResponse | SessionState::Applying
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a committed sync round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Local records sent and acknowledged.
    pub sent: usize,
    /// Replayed records applied.
    pub received: usize,
    /// Cursor the round started from.
    pub cursor_before: Cursor,
    /// Cursor committed at the end of the round.
    pub cursor: Cursor,
    /// Wall time of the round.
    pub duration: Duration,
}

/// One synchronization attempt over a channel.
///
/// The session borrows its channel and store mutably for its whole life,
/// so only one round can be in flight per channel. Drive it with
/// [`run`](Self::run) or with the individual step methods in order:
/// [`prepare`](Self::prepare), [`send_request`](Self::send_request),
/// [`await_response`](Self::await_response) and
/// [`apply_and_commit`](Self::apply_and_commit).
///
/// A failing step moves the session to [`SessionState::Aborted`] and
/// leaves the committed cursor untouched. There is no internal retry; a
/// new attempt needs a new session.
pub struct SyncSession<'a, C: SyncChannel, S: SyncStore> {
    channel: &'a mut C,
    store: &'a mut S,
    config: &'a SyncConfig,
    cancel: CancelToken,
    state: SessionState,
    started: Instant,
    cursor_before: Cursor,
    request: Option<Message>,
    batch: Vec<Record>,
    accepted: Option<(Cursor, Vec<Record>)>,
}

impl<'a, C: SyncChannel, S: SyncStore> SyncSession<'a, C, S> {
    /// Creates an idle session.
    pub fn new(channel: &'a mut C, store: &'a mut S, config: &'a SyncConfig) -> Self {
        let cancel = channel.cancel_token();
        Self {
            channel,
            store,
            config,
            cancel,
            state: SessionState::Idle,
            started: Instant::now(),
            cursor_before: Cursor::initial(),
            request: None,
            batch: Vec::new(),
            accepted: None,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the token that cancels this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns the request built by [`prepare`](Self::prepare), until sent.
    pub fn request(&self) -> Option<&Message> {
        self.request.as_ref()
    }

    /// Returns the local records sent in this round.
    pub fn batch(&self) -> &[Record] {
        &self.batch
    }

    /// Runs every remaining step of the round.
    pub fn run(&mut self) -> SyncResult<RoundReport> {
        if self.state == SessionState::Idle {
            self.prepare()?;
        }
        if self.state == SessionState::Requesting {
            self.send_request()?;
        }
        if self.state == SessionState::AwaitingResponse {
            self.await_response()?;
        }
        self.apply_and_commit()
    }

    /// Reads the cursor and pending batch and builds the request.
    ///
    /// `Idle → Requesting`.
    pub fn prepare(&mut self) -> SyncResult<()> {
        self.expect_state(SessionState::Idle, "prepare")?;
        self.started = Instant::now();
        self.check_cancelled()?;

        let limit = self.config.max_batch;
        let (cursor, mut batch) = match self.load(limit) {
            Ok(loaded) => loaded,
            Err(e) => return Err(self.abort(e)),
        };
        batch.truncate(limit);

        let request = Message::sync_request(&self.config.account, &cursor, batch.clone());
        debug!(
            cursor = %cursor,
            records = batch.len(),
            "sync request prepared"
        );
        self.cursor_before = cursor;
        self.batch = batch;
        self.request = Some(request);
        self.transition(SessionState::Requesting);
        Ok(())
    }

    /// Sends the prepared request.
    ///
    /// `Requesting → AwaitingResponse`.
    pub fn send_request(&mut self) -> SyncResult<()> {
        self.expect_state(SessionState::Requesting, "send_request")?;
        self.check_cancelled()?;

        let Some(request) = self.request.take() else {
            return Err(self.abort(SyncError::store("no prepared request")));
        };
        let timeout = self.config.channel.write_timeout;
        if let Err(e) = self.channel.send(&request, timeout) {
            return Err(self.abort(channel_error(e)));
        }
        self.transition(SessionState::AwaitingResponse);
        Ok(())
    }

    /// Receives and checks the server's response.
    ///
    /// `AwaitingResponse → Applying`.
    pub fn await_response(&mut self) -> SyncResult<()> {
        self.expect_state(SessionState::AwaitingResponse, "await_response")?;
        self.check_cancelled()?;

        let timeout = self.config.channel.read_timeout;
        let message = match self.channel.receive(timeout) {
            Ok(message) => message,
            Err(e) => return Err(self.abort(channel_error(e))),
        };
        match self.accept(message) {
            Ok((cursor, records)) => {
                debug!(
                    cursor = %cursor,
                    records = records.len(),
                    "sync response accepted"
                );
                self.accepted = Some((cursor, records));
                self.transition(SessionState::Applying);
                Ok(())
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    /// Applies the replayed records, acknowledges the sent batch and
    /// commits the new cursor.
    ///
    /// `Applying → Committed`.
    pub fn apply_and_commit(&mut self) -> SyncResult<RoundReport> {
        self.expect_state(SessionState::Applying, "apply_and_commit")?;
        self.check_cancelled()?;

        let Some((cursor, records)) = self.accepted.take() else {
            return Err(self.abort(SyncError::store("no accepted response")));
        };
        for record in &records {
            if let Err(e) = self.store.apply(record) {
                let error = SyncError::Apply {
                    id: record.id().to_string(),
                    source: Box::new(e),
                };
                return Err(self.abort(error));
            }
        }
        if let Err(e) = self.store.acknowledge(&self.batch) {
            return Err(self.abort(e));
        }
        if let Err(e) = self.store.commit_cursor(&cursor) {
            return Err(self.abort(e));
        }

        let report = RoundReport {
            sent: self.batch.len(),
            received: records.len(),
            cursor_before: self.cursor_before.clone(),
            cursor,
            duration: self.started.elapsed(),
        };
        self.transition(SessionState::Committed);
        info!(
            sent = report.sent,
            received = report.received,
            cursor = %report.cursor,
            duration_ms = report.duration.as_millis() as u64,
            "sync round committed"
        );
        Ok(report)
    }

    fn load(&self, limit: usize) -> SyncResult<(Cursor, Vec<Record>)> {
        let cursor = self.store.current_cursor()?;
        let batch = self.store.pending_batch(limit)?;
        Ok((cursor, batch))
    }

    fn accept(&self, message: Message) -> SyncResult<(Cursor, Vec<Record>)> {
        match message.kind() {
            MessageKind::ResponseSync => {
                let response = SyncResponse::from_message(message)?;
                match response.outcome {
                    SyncOutcome::Accepted { cursor } => {
                        let limit = self.config.max_inbound_records;
                        if response.records.len() > limit {
                            return Err(SyncError::TooManyRecords {
                                count: response.records.len(),
                                limit,
                            });
                        }
                        Ok((cursor, response.records))
                    }
                    SyncOutcome::Rejected { reason } => Err(SyncError::Rejected {
                        reason,
                        code: response.code,
                    }),
                }
            }
            MessageKind::Error => Err(server_error(&message)),
            kind => Err(SyncError::UnexpectedMessage {
                kind,
                expected: MessageKind::ResponseSync,
            }),
        }
    }

    fn expect_state(&self, expected: SessionState, step: &'static str) -> SyncResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SyncError::InvalidStateTransition {
                from: self.state,
                step,
            })
        }
    }

    fn check_cancelled(&mut self) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            Err(self.abort(SyncError::Cancelled))
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "sync session transition");
        self.state = next;
    }

    /// Moves to `Aborted` and returns the cause.
    ///
    /// Server refusals arrive as complete messages, so the channel stays
    /// usable after them. Every other failure closes it.
    fn abort(&mut self, error: SyncError) -> SyncError {
        let keep_channel = matches!(
            error,
            SyncError::Rejected { .. } | SyncError::ServerError { .. }
        );
        if !keep_channel {
            self.channel.close();
        }
        warn!(
            state = %self.state,
            error = %error,
            retryable = error.is_retryable(),
            "sync round aborted"
        );
        self.state = SessionState::Aborted;
        self.request = None;
        self.accepted = None;
        error
    }
}

impl<C: SyncChannel, S: SyncStore> fmt::Debug for SyncSession<'_, C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("state", &self.state)
            .field("cursor_before", &self.cursor_before)
            .field("batch", &self.batch.len())
            .finish_non_exhaustive()
    }
}

fn channel_error(error: ChannelError) -> SyncError {
    match error {
        ChannelError::Cancelled => SyncError::Cancelled,
        other => SyncError::Channel(other),
    }
}

/// Converts an error-kind message into [`SyncError::ServerError`].
pub(crate) fn server_error(message: &Message) -> SyncError {
    let code = message
        .header(names::CODE)
        .and_then(|code| code.trim().parse().ok())
        .unwrap_or(DEFAULT_ERROR_CODE);
    let status = message.header(names::STATUS).unwrap_or_default().to_string();
    SyncError::ServerError { code, status }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySyncStore;
    use crate::transport::MockChannel;
    use twsync_protocol::{Account, RejectReason};
    use uuid::Uuid;

    fn config() -> SyncConfig {
        SyncConfig::default().with_max_batch(2)
    }

    fn store_with_pending(count: usize) -> MemorySyncStore {
        let mut store = MemorySyncStore::with_cursor(Cursor::new("C0"));
        for i in 0..count {
            store.add_pending(Record::new(format!("T{i}")).with_attribute("description", "x"));
        }
        store
    }

    #[test]
    fn state_names() {
        assert_eq!(SessionState::AwaitingResponse.to_string(), "awaiting-response");
        assert!(SessionState::Committed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(SessionState::Applying.is_active());
        assert!(!SessionState::Idle.is_active());
    }

    #[test]
    fn prepare_builds_request_with_capped_batch() {
        let config = SyncConfig {
            account: Account::new("Public", "alice", Uuid::nil()),
            ..config()
        };
        let mut channel = MockChannel::new();
        let mut store = store_with_pending(3);
        let mut session = SyncSession::new(&mut channel, &mut store, &config);

        session.prepare().unwrap();
        assert_eq!(session.state(), SessionState::Requesting);
        assert_eq!(session.batch().len(), 2);
        let request = session.request().unwrap();
        assert_eq!(request.kind(), MessageKind::RequestSync);
        assert_eq!(request.header(names::CURSOR), Some("C0"));
        assert_eq!(request.header(names::USER), Some("alice"));
        assert_eq!(request.body().len(), 2);
        assert_eq!(request.body()[0].id(), "T0");
    }

    #[test]
    fn steps_out_of_order_are_refused() {
        let config = config();
        let mut channel = MockChannel::new();
        let mut store = store_with_pending(1);
        let mut session = SyncSession::new(&mut channel, &mut store, &config);

        let err = session.send_request().unwrap_err();
        assert!(matches!(
            err,
            SyncError::InvalidStateTransition {
                from: SessionState::Idle,
                step: "send_request"
            }
        ));
        assert_eq!(session.state(), SessionState::Idle);
        drop(session);
        assert!(channel.sent().is_empty());
        assert!(channel.is_open());
    }

    #[test]
    fn rejection_keeps_channel_open() {
        let config = config();
        let mut channel = MockChannel::new();
        channel.push_reply(Message::sync_rejected(&RejectReason::StaleCursor));
        let mut store = store_with_pending(1);

        let err = SyncSession::new(&mut channel, &mut store, &config)
            .run()
            .unwrap_err();
        assert!(err.is_stale_cursor());
        assert!(channel.is_open());
        assert_eq!(store.cursor(), &Cursor::new("C0"));
        assert_eq!(store.pending().len(), 1);
    }

    #[test]
    fn error_message_becomes_server_error() {
        let message = Message::error(430, "Access denied");
        assert!(matches!(
            server_error(&message),
            SyncError::ServerError { code: 430, ref status } if status == "Access denied"
        ));

        let bare = Message::new(MessageKind::Error);
        assert!(matches!(
            server_error(&bare),
            SyncError::ServerError { code: 500, .. }
        ));
    }

    #[test]
    fn cancellation_before_prepare_aborts() {
        let config = config();
        let mut channel = MockChannel::new();
        let mut store = store_with_pending(1);
        let mut session = SyncSession::new(&mut channel, &mut store, &config);
        session.cancel_token().cancel();

        assert!(matches!(session.run(), Err(SyncError::Cancelled)));
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(session.request().is_none());
        drop(session);
        assert!(!channel.is_open());
    }
}
