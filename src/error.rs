use strum_macros::Display;
use thiserror::Error;

/// Errors returned by room, session and media engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Room error: {0} kind: {1}")]
    RoomError(String, RoomErrorKind),
    #[error("Session error: {0} kind: {1}")]
    SessionError(String, SessionErrorKind),
    #[error("Transport error: {0} kind: {1}")]
    TransportError(String, TransportErrorKind),
    #[error("Consume error: {0} kind: {1}")]
    ConsumeError(String, ConsumeErrorKind),
    #[error("Engine error: {0} kind: {1}")]
    EngineError(String, EngineErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RoomErrorKind {
    RoomNotFoundError,
    RoomClosedError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionErrorKind {
    AlreadyJoinedError,
    NotAMemberError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransportErrorKind {
    TransportNotFoundError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConsumeErrorKind {
    ProducerNotFoundError,
    SelfConsumeError,
    DuplicateConsumeError,
    IncompatibleCapabilitiesError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EngineErrorKind {
    EngineFailureError,
    EngineFatalError,
}

impl Error {
    pub fn new_room(message: String, kind: RoomErrorKind) -> Error {
        Error::RoomError(message, kind)
    }

    pub fn new_session(message: String, kind: SessionErrorKind) -> Error {
        Error::SessionError(message, kind)
    }

    pub fn new_transport(message: String, kind: TransportErrorKind) -> Error {
        Error::TransportError(message, kind)
    }

    pub fn new_consume(message: String, kind: ConsumeErrorKind) -> Error {
        Error::ConsumeError(message, kind)
    }

    pub fn new_engine(message: String, kind: EngineErrorKind) -> Error {
        Error::EngineError(message, kind)
    }

    /// Stable identifier for the error kind, used as the wire-level error code.
    pub fn code(&self) -> String {
        match self {
            Error::RoomError(_, kind) => kind.to_string(),
            Error::SessionError(_, kind) => kind.to_string(),
            Error::TransportError(_, kind) => kind.to_string(),
            Error::ConsumeError(_, kind) => kind.to_string(),
            Error::EngineError(_, kind) => kind.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::new_transport(
            "Transport abc is not found".to_string(),
            TransportErrorKind::TransportNotFoundError,
        );
        let rendered = format!("{}", error);
        println!("{}", rendered);
        assert_eq!(
            rendered,
            "Transport error: Transport abc is not found kind: TransportNotFoundError"
        );
    }

    #[test]
    fn test_error_code() {
        let error = Error::new_consume(
            "cannot consume".to_string(),
            ConsumeErrorKind::IncompatibleCapabilitiesError,
        );
        assert_eq!(error.code(), "IncompatibleCapabilitiesError");

        let error = Error::new_room(
            "room r1 is not found".to_string(),
            RoomErrorKind::RoomNotFoundError,
        );
        assert_eq!(error.code(), "RoomNotFoundError");
    }
}
