use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use enclose::enc;
use tokio::sync::mpsc;

use crate::config::MediaConfig;
use crate::engine::MediaEngine;
use crate::error::{Error, RoomErrorKind};
use crate::message::ServerEvent;
use crate::room::{JoinReply, RoomHandle};

#[derive(Debug)]
pub(crate) enum RegistryEvent {
    RoomClosed(String),
}

/// Authority for which rooms exist. Room ids are client-chosen, so two
/// connections joining the same unknown id concurrently must end up in one
/// room. The handle is inserted under the map lock before anything awaits,
/// which makes lookup-or-create atomic.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
    engine: Arc<dyn MediaEngine>,
    media_config: MediaConfig,
    registry_sender: mpsc::UnboundedSender<RegistryEvent>,
}

impl RoomRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, media_config: MediaConfig) -> Arc<RoomRegistry> {
        let (registry_sender, registry_receiver) = mpsc::unbounded_channel();
        let rooms: Arc<Mutex<HashMap<String, RoomHandle>>> = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(enc!((rooms) async move {
            RoomRegistry::registry_event_loop(rooms, registry_receiver).await;
        }));
        Arc::new(RoomRegistry {
            rooms,
            engine,
            media_config,
            registry_sender,
        })
    }

    async fn registry_event_loop(
        rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
        mut receiver: mpsc::UnboundedReceiver<RegistryEvent>,
    ) {
        while let Some(event) = receiver.recv().await {
            match event {
                RegistryEvent::RoomClosed(room_id) => {
                    let mut rooms = rooms.lock().unwrap();
                    // A fresh room may already occupy the id. Drop the entry
                    // only while it still points at the closed mailbox.
                    if let Some(room) = rooms.get(&room_id) {
                        if room.is_closed() {
                            rooms.remove(&room_id);
                            tracing::debug!("Room {} is removed from the registry", room_id);
                        }
                    }
                }
            }
        }
        tracing::debug!("Registry event loop finished");
    }

    /// Joins a room, creating it when absent. The returned handle is what the
    /// caller uses for every later operation on the room.
    ///
    /// A join can race the room's own close. The closed mailbox answers with
    /// a room-closed error, which is taken as a signal to evict the stale
    /// handle and try again with a fresh room.
    pub async fn join(
        &self,
        room_id: String,
        connection_id: String,
        display_name: String,
        title: String,
        event_sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<(RoomHandle, JoinReply), Error> {
        for _ in 0..8 {
            let room = self.get_or_create(&room_id);
            match room
                .join(
                    connection_id.clone(),
                    display_name.clone(),
                    title.clone(),
                    event_sender.clone(),
                )
                .await
            {
                Ok(reply) => return Ok((room, reply)),
                Err(Error::RoomError(_, RoomErrorKind::RoomClosedError)) => {
                    tracing::debug!(
                        "Join for {} hit closing room {}, retrying",
                        connection_id,
                        room_id
                    );
                    self.evict(&room_id, &room);
                    tokio::task::yield_now().await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::new_room(
            format!("Room {} keeps closing", room_id),
            RoomErrorKind::RoomClosedError,
        ))
    }

    pub fn find(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.lock().unwrap().keys().cloned().collect()
    }

    fn get_or_create(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }
        let room = RoomHandle::spawn(
            room_id.to_string(),
            self.engine.clone(),
            self.media_config.clone(),
            self.registry_sender.clone(),
        );
        rooms.insert(room_id.to_string(), room.clone());
        room
    }

    fn evict(&self, room_id: &str, closed: &RoomHandle) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get(room_id) {
            if room.same_mailbox(closed) {
                rooms.remove(room_id);
            }
        }
    }
}

impl Drop for RoomRegistry {
    fn drop(&mut self) {
        tracing::debug!("RoomRegistry is dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackEngine;

    #[tokio::test]
    async fn test_join_creates_room_once() {
        let registry = RoomRegistry::new(LoopbackEngine::new(), MediaConfig::default());

        let (tx, _rx) = mpsc::unbounded_channel();
        let (room_a, reply_a) = registry
            .join(
                "room".to_string(),
                "a".to_string(),
                "alice".to_string(),
                "standup".to_string(),
                tx,
            )
            .await
            .unwrap();
        assert!(reply_a.is_new_room);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (room_b, reply_b) = registry
            .join(
                "room".to_string(),
                "b".to_string(),
                "bob".to_string(),
                "other".to_string(),
                tx,
            )
            .await
            .unwrap();
        assert!(!reply_b.is_new_room);
        assert!(room_a.same_mailbox(&room_b));
        assert_eq!(registry.room_ids(), vec!["room".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_router_creation_refuses_the_join() {
        let engine = LoopbackEngine::new();
        engine.kill();
        let registry = RoomRegistry::new(engine, MediaConfig::default());

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = registry
            .join(
                "room".to_string(),
                "a".to_string(),
                "alice".to_string(),
                "t".to_string(),
                tx,
            )
            .await;
        match result {
            Err(Error::EngineError(_, _)) => {}
            other => panic!("expected engine error, got {:?}", other),
        }
    }
}
