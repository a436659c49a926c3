//! The interface through which the chat engine notifies its host application.
//!
//! The engine never talks to a UI directly.  It calls the four methods of
//! [`EventSink`] from whichever task detected the event, so implementations
//! must be cheap and thread-safe.  Two implementations ship with the crate:
//!
//! - [`ChannelSink`] turns every callback into a [`ChatEvent`] on an unbounded
//!   channel, so a single consumer can handle events in order.
//! - [`TracingSink`] logs each event and is used when nobody is listening.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::Severity;
use crate::protocol::messages::{NotificationKind, ServerErrorKind};

/// Host-side callbacks invoked by the chat engine.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// An aggregated error summary and the worst severity it contains.
    fn on_error(&self, message: &str, severity: Severity);

    /// A relayed chat message, already decoded.
    fn on_message(&self, sender: &str, text: &str);

    /// An ERROR frame the server sent to this client.
    fn on_server_error(&self, kind: ServerErrorKind, text: &str);

    /// A NOTIFICATION frame the server sent to this client.
    fn on_notification(&self, kind: NotificationKind, text: &str);
}

/// Owned form of one [`EventSink`] callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Error { message: String, severity: Severity },
    Message { sender: String, text: String },
    ServerError { kind: ServerErrorKind, text: String },
    Notification { kind: NotificationKind, text: String },
}

/// Forwards every callback as a [`ChatEvent`] over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelSink {
    /// Creates the sink together with the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ChatEvent) {
        // A dropped receiver means the host stopped listening.
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_error(&self, message: &str, severity: Severity) {
        self.forward(ChatEvent::Error {
            message: message.to_string(),
            severity,
        });
    }

    fn on_message(&self, sender: &str, text: &str) {
        self.forward(ChatEvent::Message {
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }

    fn on_server_error(&self, kind: ServerErrorKind, text: &str) {
        self.forward(ChatEvent::ServerError {
            kind,
            text: text.to_string(),
        });
    }

    fn on_notification(&self, kind: NotificationKind, text: &str) {
        self.forward(ChatEvent::Notification {
            kind,
            text: text.to_string(),
        });
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_error(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Critical => error!(%severity, "{}", message.trim_end()),
            Severity::NonCritical => warn!(%severity, "{}", message.trim_end()),
        }
    }

    fn on_message(&self, sender: &str, text: &str) {
        info!(sender, "{text}");
    }

    fn on_server_error(&self, kind: ServerErrorKind, text: &str) {
        warn!(%kind, "server error: {text}");
    }

    fn on_notification(&self, kind: NotificationKind, text: &str) {
        info!(%kind, "notification: {text}");
    }
}
