use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::broker::{TransportBroker, TransportRecord};
use crate::config::MediaConfig;
use crate::engine::{
    DtlsParameters, EngineEvent, MediaEngine, MediaKind, RouterHandle, RtpCapabilities,
    RtpParameters, TransportParameters,
};
use crate::error::{ConsumeErrorKind, Error, RoomErrorKind, SessionErrorKind, TransportErrorKind};
use crate::graph::{ConsumerRecord, MediaGraph, ProducerRecord};
use crate::message::{MemberInfo, ProducerInfo, ServerEvent, TransportDirection};
use crate::registry::RegistryEvent;

/// Reply to a successful join.
#[derive(Debug, Clone)]
pub struct JoinReply {
    pub router_capabilities: RtpCapabilities,
    pub is_new_room: bool,
    pub title: String,
    pub members: Vec<MemberInfo>,
    /// Streams already produced into the room, so a late joiner can subscribe
    /// without an extra round trip.
    pub producers: Vec<ProducerInfo>,
}

/// Reply to a successful consume. The consumer starts paused.
#[derive(Debug, Clone)]
pub struct ConsumeReply {
    pub consumer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Point-in-time view of a room's state.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub members: Vec<MemberInfo>,
    pub producers: Vec<ProducerInfo>,
    pub consumer_ids: Vec<String>,
    pub produce_transport_ids: Vec<String>,
    pub consume_transport_ids: Vec<String>,
}

/// Mailbox of one room. All state changes for the room are serialized by a
/// single task, so every operation sees the room unchanged for its whole
/// span, media engine round trips included.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub id: String,
    command_sender: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub(crate) fn spawn(
        id: String,
        engine: Arc<dyn MediaEngine>,
        media_config: MediaConfig,
        registry_sender: mpsc::UnboundedSender<RegistryEvent>,
    ) -> RoomHandle {
        let (command_sender, command_receiver) = mpsc::unbounded_channel::<RoomCommand>();
        let handle = RoomHandle {
            id: id.clone(),
            command_sender,
        };
        tokio::spawn(async move {
            Room::room_task(id, engine, media_config, registry_sender, command_receiver).await;
        });
        handle
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.command_sender.is_closed()
    }

    pub(crate) fn same_mailbox(&self, other: &RoomHandle) -> bool {
        self.command_sender.same_channel(&other.command_sender)
    }

    fn closed_error(&self) -> Error {
        Error::new_room(
            format!("Room {} is closed", self.id),
            RoomErrorKind::RoomClosedError,
        )
    }

    pub async fn join(
        &self,
        connection_id: String,
        display_name: String,
        title: String,
        event_sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<JoinReply, Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::Join {
                connection_id,
                display_name,
                title,
                event_sender,
                reply: tx,
            })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())?
    }

    pub async fn create_transport(
        &self,
        connection_id: String,
        direction: TransportDirection,
    ) -> Result<TransportParameters, Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::CreateTransport {
                connection_id,
                direction,
                reply: tx,
            })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())?
    }

    pub async fn connect_transport(
        &self,
        connection_id: String,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::ConnectTransport {
                connection_id,
                transport_id,
                dtls_parameters,
                reply: tx,
            })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())?
    }

    pub async fn produce(
        &self,
        connection_id: String,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String, Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::Produce {
                connection_id,
                transport_id,
                kind,
                rtp_parameters,
                reply: tx,
            })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())?
    }

    pub async fn consume(
        &self,
        connection_id: String,
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumeReply, Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::Consume {
                connection_id,
                transport_id,
                producer_id,
                rtp_capabilities,
                reply: tx,
            })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())?
    }

    pub async fn resume_consumer(
        &self,
        connection_id: String,
        consumer_id: String,
    ) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::ResumeConsumer {
                connection_id,
                consumer_id,
                reply: tx,
            })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Runs the disconnect cleanup for a connection. Safe to call for
    /// connections that already left and for rooms that already closed.
    pub async fn leave(&self, connection_id: String) {
        let (tx, rx) = oneshot::channel();
        if self
            .command_sender
            .send(RoomCommand::Leave {
                connection_id,
                reply: tx,
            })
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, Error> {
        let (tx, rx) = oneshot::channel();
        self.command_sender
            .send(RoomCommand::Snapshot { reply: tx })
            .map_err(|_| self.closed_error())?;
        rx.await.map_err(|_| self.closed_error())
    }
}

#[derive(Debug)]
pub(crate) enum RoomCommand {
    Join {
        connection_id: String,
        display_name: String,
        title: String,
        event_sender: mpsc::UnboundedSender<ServerEvent>,
        reply: oneshot::Sender<Result<JoinReply, Error>>,
    },
    CreateTransport {
        connection_id: String,
        direction: TransportDirection,
        reply: oneshot::Sender<Result<TransportParameters, Error>>,
    },
    ConnectTransport {
        connection_id: String,
        transport_id: String,
        dtls_parameters: DtlsParameters,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Produce {
        connection_id: String,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        reply: oneshot::Sender<Result<String, Error>>,
    },
    Consume {
        connection_id: String,
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
        reply: oneshot::Sender<Result<ConsumeReply, Error>>,
    },
    ResumeConsumer {
        connection_id: String,
        consumer_id: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Leave {
        connection_id: String,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

#[derive(Debug)]
struct Member {
    connection_id: String,
    display_name: String,
    is_admin: bool,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Debug)]
struct Room {
    id: String,
    title: String,
    router: RouterHandle,
    members: Vec<Member>,
    broker: TransportBroker,
    graph: MediaGraph,
}

impl Room {
    async fn room_task(
        id: String,
        engine: Arc<dyn MediaEngine>,
        media_config: MediaConfig,
        registry_sender: mpsc::UnboundedSender<RegistryEvent>,
        mut command_receiver: mpsc::UnboundedReceiver<RoomCommand>,
    ) {
        let (engine_event_sender, engine_event_receiver) = mpsc::unbounded_channel();
        let router = match engine
            .create_router(media_config.codecs, engine_event_sender)
            .await
        {
            Ok(router) => router,
            Err(err) => {
                tracing::error!("Room {} failed to create a router: {}", id, err);
                command_receiver.close();
                while let Some(command) = command_receiver.recv().await {
                    Room::refuse(command, &err);
                }
                drop(command_receiver);
                let _ = registry_sender.send(RegistryEvent::RoomClosed(id));
                return;
            }
        };
        tracing::debug!("Room {} is created with router {}", id, router.id());

        let room = Room {
            id: id.clone(),
            title: String::new(),
            router,
            members: Vec::new(),
            broker: TransportBroker::default(),
            graph: MediaGraph::default(),
        };
        Room::room_event_loop(
            id,
            room,
            command_receiver,
            engine_event_receiver,
            registry_sender,
        )
        .await;
    }

    async fn room_event_loop(
        id: String,
        mut room: Room,
        mut command_receiver: mpsc::UnboundedReceiver<RoomCommand>,
        mut engine_event_receiver: mpsc::UnboundedReceiver<EngineEvent>,
        registry_sender: mpsc::UnboundedSender<RegistryEvent>,
    ) {
        tracing::debug!("Room {} event loop started", id);
        loop {
            tokio::select! {
                command = command_receiver.recv() => match command {
                    Some(command) => {
                        if room.handle_command(command).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(event) = engine_event_receiver.recv() => {
                    room.handle_engine_event(event).await;
                }
            }
        }
        room.router.close().await;
        drop(room);
        // The mailbox must be closed before the registry hears about it, so
        // the registry never keeps a handle that can no longer be served.
        drop(command_receiver);
        let _ = registry_sender.send(RegistryEvent::RoomClosed(id.clone()));
        tracing::debug!("Room {} event loop finished", id);
    }

    fn refuse(command: RoomCommand, err: &Error) {
        match command {
            RoomCommand::Join { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            }
            RoomCommand::CreateTransport { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            }
            RoomCommand::ConnectTransport { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            }
            RoomCommand::Produce { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            }
            RoomCommand::Consume { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            }
            RoomCommand::ResumeConsumer { reply, .. } => {
                let _ = reply.send(Err(err.clone()));
            }
            RoomCommand::Leave { reply, .. } => {
                let _ = reply.send(());
            }
            RoomCommand::Snapshot { reply } => drop(reply),
        }
    }

    /// Returns true when the room emptied and should close.
    async fn handle_command(&mut self, command: RoomCommand) -> bool {
        match command {
            RoomCommand::Join {
                connection_id,
                display_name,
                title,
                event_sender,
                reply,
            } => {
                let result = self.join(connection_id, display_name, title, event_sender);
                let _ = reply.send(result);
                false
            }
            RoomCommand::CreateTransport {
                connection_id,
                direction,
                reply,
            } => {
                let result = self.create_transport(&connection_id, direction).await;
                let _ = reply.send(result);
                false
            }
            RoomCommand::ConnectTransport {
                connection_id,
                transport_id,
                dtls_parameters,
                reply,
            } => {
                let result = self
                    .connect_transport(&connection_id, &transport_id, dtls_parameters)
                    .await;
                let _ = reply.send(result);
                false
            }
            RoomCommand::Produce {
                connection_id,
                transport_id,
                kind,
                rtp_parameters,
                reply,
            } => {
                let result = self
                    .produce(&connection_id, &transport_id, kind, rtp_parameters)
                    .await;
                let _ = reply.send(result);
                false
            }
            RoomCommand::Consume {
                connection_id,
                transport_id,
                producer_id,
                rtp_capabilities,
                reply,
            } => {
                let result = self
                    .consume(&connection_id, &transport_id, &producer_id, rtp_capabilities)
                    .await;
                let _ = reply.send(result);
                false
            }
            RoomCommand::ResumeConsumer {
                connection_id,
                consumer_id,
                reply,
            } => {
                let result = self.resume_consumer(&connection_id, &consumer_id).await;
                let _ = reply.send(result);
                false
            }
            RoomCommand::Leave {
                connection_id,
                reply,
            } => {
                let empty = self.leave(&connection_id).await;
                let _ = reply.send(());
                if empty {
                    tracing::debug!("Room {} is empty, closing", self.id);
                }
                empty
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(RoomSnapshot {
                    members: self.member_infos(),
                    producers: self.graph.producer_infos(),
                    consumer_ids: self.graph.consumer_ids(),
                    produce_transport_ids: self
                        .broker
                        .transport_ids(TransportDirection::Produce),
                    consume_transport_ids: self
                        .broker
                        .transport_ids(TransportDirection::Consume),
                });
                false
            }
        }
    }

    fn join(
        &mut self,
        connection_id: String,
        display_name: String,
        title: String,
        event_sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<JoinReply, Error> {
        if self.member_exists(&connection_id) {
            return Err(Error::new_session(
                format!(
                    "Connection {} is already a member of room {}",
                    connection_id, self.id
                ),
                SessionErrorKind::AlreadyJoinedError,
            ));
        }
        // The first joiner creates the room: it names it and becomes admin.
        let is_new_room = self.members.is_empty();
        if is_new_room {
            self.title = title;
        }
        self.members.push(Member {
            connection_id: connection_id.clone(),
            display_name,
            is_admin: is_new_room,
            sender: event_sender,
        });
        tracing::debug!("Member {} joined room {}", connection_id, self.id);

        let members = self.member_infos();
        self.broadcast_except(
            &connection_id,
            ServerEvent::MemberJoined {
                members: members.clone(),
            },
        );
        Ok(JoinReply {
            router_capabilities: self.router.capabilities(),
            is_new_room,
            title: self.title.clone(),
            members,
            producers: self.graph.producer_infos(),
        })
    }

    async fn create_transport(
        &mut self,
        connection_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportParameters, Error> {
        self.ensure_member(connection_id)?;
        let handle = self.router.create_transport().await?;
        let parameters = handle.parameters();
        tracing::debug!(
            "Transport {} ({:?}) is created for {} in room {}",
            parameters.id,
            direction,
            connection_id,
            self.id
        );
        self.broker.record(
            direction,
            TransportRecord {
                connection_id: connection_id.to_string(),
                transport_id: parameters.id.clone(),
                handle,
            },
        );
        Ok(parameters)
    }

    async fn connect_transport(
        &mut self,
        connection_id: &str,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), Error> {
        self.ensure_member(connection_id)?;
        let handle = self.broker.resolve_any(connection_id, transport_id)?;
        handle.connect(dtls_parameters).await?;
        tracing::debug!(
            "Transport {} is connected for {} in room {}",
            transport_id,
            connection_id,
            self.id
        );
        Ok(())
    }

    async fn produce(
        &mut self,
        connection_id: &str,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String, Error> {
        self.ensure_member(connection_id)?;
        let transport =
            self.broker
                .resolve(connection_id, transport_id, TransportDirection::Produce)?;
        let producer = transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id();
        self.graph.add_producer(ProducerRecord {
            connection_id: connection_id.to_string(),
            producer_id: producer_id.clone(),
            kind,
            handle: producer,
        });
        tracing::debug!(
            "Producer {} ({}) is created by {} in room {}",
            producer_id,
            kind,
            connection_id,
            self.id
        );
        self.broadcast_except(
            connection_id,
            ServerEvent::ProducerAdded {
                producers: self.graph.producer_infos(),
                members: self.member_infos(),
            },
        );
        Ok(producer_id)
    }

    async fn consume(
        &mut self,
        connection_id: &str,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumeReply, Error> {
        self.ensure_member(connection_id)?;
        self.graph.check_subscription(connection_id, producer_id)?;
        let compatible = self
            .router
            .can_consume(producer_id, &rtp_capabilities)
            .await?;
        if !compatible {
            return Err(Error::new_consume(
                format!(
                    "Capabilities of {} cannot consume producer {}",
                    connection_id, producer_id
                ),
                ConsumeErrorKind::IncompatibleCapabilitiesError,
            ));
        }
        let transport =
            self.broker
                .resolve(connection_id, transport_id, TransportDirection::Consume)?;
        let consumer = transport.consume(producer_id, &rtp_capabilities).await?;
        let reply = ConsumeReply {
            consumer_id: consumer.id(),
            producer_id: producer_id.to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        };
        self.graph.add_consumer(ConsumerRecord {
            connection_id: connection_id.to_string(),
            consumer_id: reply.consumer_id.clone(),
            producer_id: producer_id.to_string(),
            transport_id: transport_id.to_string(),
            handle: consumer,
        });
        tracing::debug!(
            "Consumer {} is created for {} on producer {} in room {}",
            reply.consumer_id,
            connection_id,
            producer_id,
            self.id
        );
        Ok(reply)
    }

    async fn resume_consumer(
        &mut self,
        connection_id: &str,
        consumer_id: &str,
    ) -> Result<(), Error> {
        self.ensure_member(connection_id)?;
        let handle = self
            .graph
            .find_consumer(connection_id, consumer_id)
            .map(|record| record.handle.clone())
            .ok_or_else(|| {
                Error::new_transport(
                    format!("Consumer {} is not found", consumer_id),
                    TransportErrorKind::TransportNotFoundError,
                )
            })?;
        handle.resume().await?;
        tracing::debug!("Consumer {} is resumed in room {}", consumer_id, self.id);
        Ok(())
    }

    /// Disconnect cleanup. Membership is dropped first so the leave
    /// broadcast reaches only the remaining members, then the leaver's
    /// transports, received links and own producers are torn down. Returns
    /// true when the room emptied.
    async fn leave(&mut self, connection_id: &str) -> bool {
        let position = self
            .members
            .iter()
            .position(|member| member.connection_id == connection_id);
        let position = match position {
            Some(position) => position,
            None => {
                tracing::debug!(
                    "Leave for {} ignored, not a member of room {}",
                    connection_id,
                    self.id
                );
                return false;
            }
        };
        self.members.remove(position);
        tracing::debug!("Member {} left room {}", connection_id, self.id);
        self.broadcast(ServerEvent::MemberLeft {
            members: self.member_infos(),
        });

        let (produce_records, consume_records) = self.broker.remove_for_connection(connection_id);
        for record in produce_records {
            record.handle.close().await;
        }

        // Links this connection was receiving. The subscriber is gone, no
        // broadcast is needed.
        for record in self.graph.remove_consumers_for_connection(connection_id) {
            record.handle.close().await;
        }
        for record in consume_records {
            record.handle.close().await;
        }

        // Streams this connection was sending. Remaining subscribers learn of
        // each torn-down link.
        for producer in self.graph.remove_producers_for_connection(connection_id) {
            self.close_consumers_of_producer(&producer.producer_id).await;
            producer.handle.close().await;
        }

        self.members.is_empty()
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::TransportClosed(transport_id) => {
                tracing::debug!(
                    "Room {} received transport closed for {}",
                    self.id,
                    transport_id
                );
                for consumer_id in self.graph.consumers_on_transport(&transport_id) {
                    self.close_consumer_link(&consumer_id).await;
                }
                if let Some(record) = self.broker.remove(&transport_id) {
                    record.handle.close().await;
                }
            }
            EngineEvent::ProducerClosed(producer_id) => {
                tracing::debug!(
                    "Room {} received producer closed for {}",
                    self.id,
                    producer_id
                );
                self.close_consumers_of_producer(&producer_id).await;
                if let Some(record) = self.graph.remove_producer(&producer_id) {
                    record.handle.close().await;
                }
            }
        }
    }

    async fn close_consumers_of_producer(&mut self, producer_id: &str) {
        for consumer_id in self.graph.consumers_of_producer(producer_id) {
            self.close_consumer_link(&consumer_id).await;
        }
    }

    /// Tears down one forwarding link: the consumer, its transport record and
    /// a producer-closed notice to the room. Already-removed links are a
    /// no-op, so overlapping transport-closed and producer-closed events
    /// cannot double-broadcast.
    async fn close_consumer_link(&mut self, consumer_id: &str) {
        let record = match self.graph.remove_consumer(consumer_id) {
            Some(record) => record,
            None => return,
        };
        record.handle.close().await;
        if let Some(transport) = self.broker.remove_consume(&record.transport_id) {
            transport.handle.close().await;
        }
        tracing::debug!(
            "Consumer {} of {} is removed in room {}, producer {} is gone",
            record.consumer_id,
            record.connection_id,
            self.id,
            record.producer_id
        );
        self.broadcast(ServerEvent::ProducerClosed {
            producer_id: record.producer_id.clone(),
        });
    }

    fn member_exists(&self, connection_id: &str) -> bool {
        self.members
            .iter()
            .any(|member| member.connection_id == connection_id)
    }

    /// Commands queued behind a disconnect must observe the cleaned state.
    fn ensure_member(&self, connection_id: &str) -> Result<(), Error> {
        if self.member_exists(connection_id) {
            Ok(())
        } else {
            Err(Error::new_session(
                format!(
                    "Connection {} is not a member of room {}",
                    connection_id, self.id
                ),
                SessionErrorKind::NotAMemberError,
            ))
        }
    }

    fn member_infos(&self) -> Vec<MemberInfo> {
        self.members
            .iter()
            .map(|member| MemberInfo {
                connection_id: member.connection_id.clone(),
                display_name: member.display_name.clone(),
                is_admin: member.is_admin,
            })
            .collect()
    }

    fn broadcast(&self, event: ServerEvent) {
        for member in self.members.iter() {
            let _ = member.sender.send(event.clone());
        }
    }

    fn broadcast_except(&self, connection_id: &str, event: ServerEvent) {
        for member in self
            .members
            .iter()
            .filter(|member| member.connection_id != connection_id)
        {
            let _ = member.sender.send(event.clone());
        }
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        tracing::debug!("Room {} is dropped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackEngine;
    use crate::message::ServerEvent;

    fn spawn_room(id: &str) -> (RoomHandle, mpsc::UnboundedReceiver<RegistryEvent>) {
        let engine = LoopbackEngine::new();
        let (registry_sender, registry_receiver) = mpsc::unbounded_channel();
        let handle = RoomHandle::spawn(
            id.to_string(),
            engine,
            MediaConfig::default(),
            registry_sender,
        );
        (handle, registry_receiver)
    }

    #[tokio::test]
    async fn test_first_joiner_creates_and_owns_the_room() {
        let (room, _registry) = spawn_room("r1");
        let (tx, _rx) = mpsc::unbounded_channel();
        let reply = room
            .join("c1".to_string(), "alice".to_string(), "daily".to_string(), tx)
            .await
            .unwrap();
        assert!(reply.is_new_room);
        assert_eq!(reply.title, "daily");
        assert_eq!(reply.members.len(), 1);
        assert!(reply.members[0].is_admin);

        let (tx, _rx) = mpsc::unbounded_channel();
        let reply = room
            .join(
                "c2".to_string(),
                "bob".to_string(),
                "ignored".to_string(),
                tx,
            )
            .await
            .unwrap();
        assert!(!reply.is_new_room);
        // The creator's title stays.
        assert_eq!(reply.title, "daily");
        assert!(!reply.members[1].is_admin);
    }

    #[tokio::test]
    async fn test_commands_after_leave_are_rejected() {
        let (room, _registry) = spawn_room("r1");
        let (tx, _rx_a) = mpsc::unbounded_channel();
        room.join("a".to_string(), "alice".to_string(), "t".to_string(), tx)
            .await
            .unwrap();
        let (tx, _rx_b) = mpsc::unbounded_channel();
        room.join("b".to_string(), "bob".to_string(), "t".to_string(), tx)
            .await
            .unwrap();

        room.leave("a".to_string()).await;

        let result = room
            .create_transport("a".to_string(), TransportDirection::Produce)
            .await;
        match result {
            Err(Error::SessionError(_, kind)) => {
                assert_eq!(kind, SessionErrorKind::NotAMemberError);
            }
            other => panic!("expected session error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_of_unknown_connection_is_ignored() {
        let (room, _registry) = spawn_room("r1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        room.join("a".to_string(), "alice".to_string(), "t".to_string(), tx)
            .await
            .unwrap();

        room.leave("ghost".to_string()).await;

        // The room is still alive and no membership event was emitted.
        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.members.len(), 1);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_join_fanout_skips_the_joiner() {
        let (room, _registry) = spawn_room("r1");
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        room.join("a".to_string(), "alice".to_string(), "t".to_string(), tx_a)
            .await
            .unwrap();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        room.join("b".to_string(), "bob".to_string(), "t".to_string(), tx_b)
            .await
            .unwrap();

        match rx_a.try_recv() {
            Ok(ServerEvent::MemberJoined { members }) => {
                assert_eq!(members.len(), 2);
            }
            other => panic!("expected member joined, got {:?}", other),
        }
        assert!(matches!(
            rx_b.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }
}
