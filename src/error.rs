//! Error types for the voice engine

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify the error for the event interface
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Audio(_) => ErrorKind::PortUnavailable,
            Error::Codec(e) => e.kind(),
            Error::Network(e) => e.kind(),
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::TransportError,
        }
    }
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio port closed")]
    PortClosed,
}

/// Wire codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {declared} bytes (limit {limit})")]
    FrameTooLarge { declared: usize, limit: usize },

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Unknown flag bits: {0:#04x}")]
    UnknownFlags(u8),

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Connection closed in the middle of a frame")]
    TruncatedFrame,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Io(_) | CodecError::TruncatedFrame => ErrorKind::TransportError,
            _ => ErrorKind::ProtocolViolation,
        }
    }
}

/// Why an outbound connection could not be established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailureReason {
    Refused,
    Unreachable,
    Dns,
    Timeout,
    Handshake,
}

impl fmt::Display for ConnectFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectFailureReason::Refused => "connection refused",
            ConnectFailureReason::Unreachable => "host unreachable",
            ConnectFailureReason::Dns => "name resolution failed",
            ConnectFailureReason::Timeout => "connection timed out",
            ConnectFailureReason::Handshake => "server handshake failed",
        };
        f.write_str(s)
    }
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {target}: {reason} ({detail})")]
    ConnectFailed {
        target: String,
        reason: ConnectFailureReason,
        detail: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("Protocol violation: {0}")]
    Protocol(#[source] CodecError),

    #[error("Connection closed")]
    Closed,
}

impl NetworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NetworkError::BindFailed { .. } => ErrorKind::BindFailure,
            NetworkError::ConnectFailed { .. } => ErrorKind::ConnectFailure,
            NetworkError::Protocol(e) => e.kind(),
            NetworkError::Transport(_) | NetworkError::Closed => ErrorKind::TransportError,
        }
    }

    /// Reason for a failed connect, if this is one
    pub fn connect_reason(&self) -> Option<ConnectFailureReason> {
        match self {
            NetworkError::ConnectFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

impl From<CodecError> for NetworkError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => NetworkError::Transport(e),
            other => NetworkError::Protocol(other),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Unknown audio profile: {0}")]
    UnknownProfile(String),
}

/// Error taxonomy surfaced through `VoiceEvent::ConnectionError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PortUnavailable,
    BindFailure,
    ConnectFailure,
    ProtocolViolation,
    TransportError,
    Config,
}

impl ErrorKind {
    pub fn remediation(self) -> Remediation {
        match self {
            ErrorKind::PortUnavailable => Remediation::CheckAudioDevice,
            ErrorKind::BindFailure => Remediation::TryAnotherPort,
            ErrorKind::ConnectFailure => Remediation::CheckServerAddress,
            ErrorKind::ProtocolViolation => Remediation::CheckPeerVersion,
            ErrorKind::TransportError => Remediation::Reconnect,
            ErrorKind::Config => Remediation::FixConfiguration,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PortUnavailable => "port-unavailable",
            ErrorKind::BindFailure => "bind-failure",
            ErrorKind::ConnectFailure => "connect-failure",
            ErrorKind::ProtocolViolation => "protocol-violation",
            ErrorKind::TransportError => "transport-error",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

/// Suggested next step for the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    CheckAudioDevice,
    TryAnotherPort,
    CheckServerAddress,
    CheckPeerVersion,
    Reconnect,
    FixConfiguration,
}

impl Remediation {
    pub fn hint(self) -> &'static str {
        match self {
            Remediation::CheckAudioDevice => {
                "check that the audio device is connected and not in use"
            }
            Remediation::TryAnotherPort => "try another port",
            Remediation::CheckServerAddress => "check the server address and that it is running",
            Remediation::CheckPeerVersion => {
                "peer sent malformed data; check both ends run the same version"
            }
            Remediation::Reconnect => "connection lost; reconnect",
            Remediation::FixConfiguration => "fix the configuration value",
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err: Error = CodecError::FrameTooLarge { declared: 1 << 30, limit: 10 }.into();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        let err: Error = NetworkError::ConnectFailed {
            target: "127.0.0.1:1".into(),
            reason: ConnectFailureReason::Refused,
            detail: "refused".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::ConnectFailure);

        let err: Error = AudioError::DeviceNotFound("mic".into()).into();
        assert_eq!(err.kind(), ErrorKind::PortUnavailable);
    }

    #[test]
    fn test_port_in_use_hint() {
        assert_eq!(ErrorKind::BindFailure.remediation().hint(), "try another port");
    }
}
