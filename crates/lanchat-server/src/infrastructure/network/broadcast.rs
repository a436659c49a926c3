//! Relays one chat message to every registered session.
//!
//! The relay goes to **every** session, the sender included, so each client
//! sees its own message come back from the server.  The registry's read lock
//! is held for the whole pass: no session can be added or removed halfway
//! through, and no session is visited twice.
//!
//! The price is that a registration or removal waits for the slowest
//! recipient.  A peer that stops reading fills its TCP window and would park
//! the relay (and, behind tokio's fair `RwLock`, every writer) forever, so
//! each recipient gets [`RECIPIENT_SEND_TIMEOUT`] before it is skipped.

use std::time::Duration;

use lanchat_core::{ErrorBatch, ErrorCode, ServerFrame, Severity};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::registry::SessionRegistry;

/// Longest one recipient may hold up a relay.
pub const RECIPIENT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `2:<sender>:<encoded_payload>` to every session.
///
/// Per-recipient failures and timeouts are recorded in `batch` and do not
/// stop delivery to the others.  Returns the number of sessions the frame
/// reached.
pub async fn broadcast(
    registry: &SessionRegistry,
    encoded_payload: &str,
    sender: &str,
    batch: &mut ErrorBatch,
) -> usize {
    let frame = ServerFrame::Relay {
        sender: sender.to_string(),
        payload: encoded_payload.to_string(),
    };

    let sessions = registry.read().await;
    let mut delivered = 0;
    for session in sessions.values() {
        let sent = timeout(RECIPIENT_SEND_TIMEOUT, session.send_frame(&frame, batch)).await;
        match sent {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(addr = %session.address, "relay stalled; recipient skipped");
                batch.add(
                    ErrorCode::TimedOut,
                    Severity::NonCritical,
                    format!("Relay to {} timed out", session.address),
                    "broadcast",
                );
            }
        }
    }
    debug!(sender, recipients = sessions.len(), delivered, "message relayed");
    delivered
}
