use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, SessionErrorKind};

/// User-facing identity attached to a connection at join time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerProfile {
    pub display_name: String,
}

/// The room binding of one connection. A connection belongs to at most one
/// room and the binding never changes once made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSession {
    pub room_id: String,
    pub profile: PeerProfile,
}

/// Per-connection session records, keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<String, PeerSession>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a connection to a room. A connection that already holds a
    /// session is rejected, its first binding stays in place.
    pub fn register(
        &self,
        connection_id: &str,
        room_id: &str,
        profile: PeerProfile,
    ) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(connection_id) {
            return Err(Error::new_session(
                format!(
                    "Connection {} already joined room {}",
                    connection_id, existing.room_id
                ),
                SessionErrorKind::AlreadyJoinedError,
            ));
        }
        sessions.insert(
            connection_id.to_string(),
            PeerSession {
                room_id: room_id.to_string(),
                profile,
            },
        );
        tracing::debug!("Session for {} is registered", connection_id);
        Ok(())
    }

    /// Removes a connection's session. Removing an absent session is a no-op.
    pub fn unregister(&self, connection_id: &str) -> Option<PeerSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let removed = sessions.remove(connection_id);
        if removed.is_some() {
            tracing::debug!("Session for {} is unregistered", connection_id);
        }
        removed
    }

    pub fn lookup(&self, connection_id: &str) -> Option<PeerSession> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(connection_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> PeerProfile {
        PeerProfile {
            display_name: name.to_string(),
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let table = SessionTable::new();
        table.register("c1", "r1", profile("alice")).unwrap();

        let session = table.lookup("c1").unwrap();
        assert_eq!(session.room_id, "r1");
        assert_eq!(session.profile.display_name, "alice");
        assert!(table.lookup("c2").is_none());
    }

    #[test]
    fn test_second_join_is_rejected() {
        let table = SessionTable::new();
        table.register("c1", "r1", profile("alice")).unwrap();

        let result = table.register("c1", "r2", profile("alice"));
        match result {
            Err(Error::SessionError(_, kind)) => {
                assert_eq!(kind, SessionErrorKind::AlreadyJoinedError);
            }
            other => panic!("expected session error, got {:?}", other),
        }
        // The original binding is untouched.
        assert_eq!(table.lookup("c1").unwrap().room_id, "r1");
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let table = SessionTable::new();
        table.register("c1", "r1", profile("alice")).unwrap();

        assert!(table.unregister("c1").is_some());
        assert!(table.unregister("c1").is_none());
        assert!(table.lookup("c1").is_none());

        // The connection id can be reused after unregistering.
        table.register("c1", "r2", profile("alice")).unwrap();
        assert_eq!(table.lookup("c1").unwrap().room_id, "r2");
    }
}
