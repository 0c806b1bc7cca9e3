//! Account statistics request.

use crate::error::{SyncError, SyncResult};
use crate::session::server_error;
use crate::transport::SyncChannel;
use std::time::Duration;
use twsync_protocol::{names, Account, Headers, Message, MessageKind};

/// Asks the server for account statistics and returns the reply headers.
///
/// Runs outside any sync session and does not touch the store. The
/// request and reply share `timeout` each.
pub fn request_statistics<C: SyncChannel>(
    channel: &mut C,
    account: &Account,
    timeout: Duration,
) -> SyncResult<Headers> {
    let request = Message::statistics_request(account);
    channel.send(&request, timeout)?;
    let reply = channel.receive(timeout)?;

    match reply.kind() {
        MessageKind::Status => {
            let code = reply
                .header(names::CODE)
                .and_then(|code| code.trim().parse::<u16>().ok());
            if code.is_some_and(|code| code >= 400) {
                return Err(server_error(&reply));
            }
            let (_, headers, _) = reply.into_parts();
            tracing::debug!(headers = headers.len(), "statistics received");
            Ok(headers)
        }
        MessageKind::Error => Err(server_error(&reply)),
        kind => Err(SyncError::UnexpectedMessage {
            kind,
            expected: MessageKind::Status,
        }),
    }
}
