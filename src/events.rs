//! Observable events for front-ends
//!
//! The core never calls into UI code. Worker threads push `VoiceEvent`s into
//! a bounded channel and move on; a full channel drops the event.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::{Error, ErrorKind, Remediation};
use crate::network::client::ConnectionState;
use crate::profile::ProfileKind;

/// Event emitted by a client or server
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    PeerJoined { sender_id: u32 },
    PeerLeft { sender_id: u32 },
    ProfileAnnounced { sender_id: u32, profile: ProfileKind },
    ConnectionError {
        kind: ErrorKind,
        detail: String,
        remediation: Remediation,
    },
    /// Input level of the last capture tick in dBFS
    LevelMeter { db: f32 },
    VoxChanged { transmitting: bool },
    StateChanged(ConnectionState),
}

impl VoiceEvent {
    pub fn from_error(err: &Error) -> Self {
        let kind = err.kind();
        VoiceEvent::ConnectionError {
            kind,
            detail: err.to_string(),
            remediation: kind.remediation(),
        }
    }
}

/// Receiving side, handed to the front-end
pub type EventStream = Receiver<VoiceEvent>;

/// Sending side, cloned into every worker
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<Sender<VoiceEvent>>,
}

impl EventSink {
    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: VoiceEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn error(&self, err: &Error) {
        self.emit(VoiceEvent::from_error(err));
    }
}

/// Create a bounded event channel
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = bounded(capacity);
    (EventSink { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;

    #[test]
    fn test_full_channel_drops() {
        let (sink, stream) = channel(1);
        sink.emit(VoiceEvent::LevelMeter { db: -20.0 });
        sink.emit(VoiceEvent::LevelMeter { db: -10.0 });
        assert_eq!(stream.try_recv().unwrap(), VoiceEvent::LevelMeter { db: -20.0 });
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn test_error_event_carries_remediation() {
        let (sink, stream) = channel(4);
        let err: Error = NetworkError::Closed.into();
        sink.error(&err);
        match stream.try_recv().unwrap() {
            VoiceEvent::ConnectionError { kind, remediation, .. } => {
                assert_eq!(kind, ErrorKind::TransportError);
                assert_eq!(remediation, Remediation::Reconnect);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
