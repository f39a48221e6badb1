//! Turn events: the message-passing form of the delivery callbacks.
//!
//! Components publish into an [`EventSink`]; the host drains the paired
//! receiver and forwards text to speech synthesis, a socket, a terminal.
//! [`crate::Orchestrator::run_turn`] is itself just such a drain that
//! forwards into two closures.

use tokio::sync::mpsc;
use tracing::debug;

/// Text the engine wants delivered to the user while a turn runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The acknowledgement (dual-path) or the whole reply (direct).
    /// Published exactly once per turn.
    Immediate(String),
    /// A stall-filling interjection from the patience monitor.
    Patience(String),
    /// The fused or degraded final reply of a dual-path turn.
    Final(String),
}

impl TurnEvent {
    pub fn text(&self) -> &str {
        match self {
            Self::Immediate(t) | Self::Patience(t) | Self::Final(t) => t,
        }
    }
}

/// Sending half of a turn's event stream.
///
/// Unbounded so that publishing never suspends the patience monitor.
/// Events published after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TurnEvent>,
}

impl EventSink {
    /// Create a sink and the receiver that observes it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TurnEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: TurnEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            debug!(?event, "turn event dropped, receiver closed");
        }
    }

    pub(crate) fn immediate(&self, text: &str) {
        self.emit(TurnEvent::Immediate(text.to_owned()));
    }

    pub(crate) fn patience(&self, text: &str) {
        self.emit(TurnEvent::Patience(text.to_owned()));
    }

    pub(crate) fn final_reply(&self, text: &str) {
        self.emit(TurnEvent::Final(text.to_owned()));
    }
}
