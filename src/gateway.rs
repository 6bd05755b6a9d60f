use std::sync::Arc;

use actix::{Actor, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, SessionErrorKind};
use crate::message::{ClientRequest, ServerEvent};
use crate::registry::RoomRegistry;
use crate::room::RoomHandle;
use crate::session::{PeerProfile, SessionTable};

/// WebSocket signaling endpoint handler for [`actix_web`]. Every client
/// connection gets one [`SignalingSession`] actor that owns the connection id
/// and relays requests to the room the connection joined.
#[derive(Debug, Clone)]
pub struct SignalingGateway {
    registry: Arc<RoomRegistry>,
    sessions: Arc<SessionTable>,
}

impl SignalingGateway {
    pub fn new(registry: Arc<RoomRegistry>, sessions: Arc<SessionTable>) -> Self {
        Self { registry, sessions }
    }

    /// Registers the signaling route with [`actix_web`]. For example,
    /// ```ignore
    /// HttpServer::new(move || {
    ///     App::new().configure(|cfg| gateway.clone().configure(cfg))
    /// })
    /// .bind("0.0.0.0:4000")?
    /// .run()
    /// .await
    /// ```
    pub fn configure(self, cfg: &mut web::ServiceConfig) {
        let gateway = web::Data::new(self);

        cfg.service(web::resource("/socket").route(web::get().to(Self::socket_route)))
            .app_data(gateway);
    }

    async fn socket_route(
        gateway: web::Data<Self>,
        req: HttpRequest,
        stream: web::Payload,
    ) -> Result<HttpResponse, actix_web::Error> {
        let session = SignalingSession::new(gateway.get_ref().clone());
        ws::start(session, &req, stream)
    }
}

/// One websocket connection. Requests arrive as text frames, are parsed into
/// [`ClientRequest`] and answered with [`ServerEvent`] frames. Room
/// broadcasts reach the actor through the event channel handed to the room
/// on join.
#[derive(Debug)]
struct SignalingSession {
    connection_id: String,
    gateway: SignalingGateway,
    room: Option<RoomHandle>,
    event_sender: mpsc::UnboundedSender<ServerEvent>,
    event_receiver: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl SignalingSession {
    fn new(gateway: SignalingGateway) -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        Self {
            connection_id: Uuid::new_v4().to_string(),
            gateway,
            room: None,
            event_sender,
            event_receiver: Some(event_receiver),
        }
    }

    fn send_error(address: &Addr<SignalingSession>, err: Error) {
        tracing::warn!("signaling error: {}", err);
        address.do_send(ServerEvent::Error {
            code: err.code(),
            message: err.to_string(),
        });
    }

    fn not_joined(&self, address: Addr<SignalingSession>) {
        Self::send_error(
            &address,
            Error::new_session(
                format!("Connection {} has not joined a room", self.connection_id),
                SessionErrorKind::NotAMemberError,
            ),
        );
    }
}

impl Actor for SignalingSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("WebSocket connection {} is started", self.connection_id);
        // Pump room events into the websocket.
        if let Some(mut receiver) = self.event_receiver.take() {
            let address = ctx.address();
            actix::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    address.do_send(event);
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("WebSocket connection {} is stopped", self.connection_id);
        let connection_id = self.connection_id.clone();
        let sessions = self.gateway.sessions.clone();
        match self.room.take() {
            Some(room) => {
                actix::spawn(async move {
                    room.leave(connection_id.clone()).await;
                    sessions.unregister(&connection_id);
                });
            }
            None => {
                sessions.unregister(&connection_id);
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SignalingSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Pong(_)) => tracing::debug!("pong received"),
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientRequest>(&text) {
                Ok(request) => {
                    ctx.address().do_send(request);
                }
                Err(error) => {
                    tracing::error!("failed to parse client request: {}\n{}", error, text);
                    ctx.address().do_send(ServerEvent::Error {
                        code: "InvalidRequestError".to_string(),
                        message: format!("failed to parse request: {}", error),
                    });
                }
            },
            Ok(ws::Message::Binary(_)) => tracing::debug!("binary frames are ignored"),
            Ok(ws::Message::Close(reason)) => ctx.close(reason),
            _ => (),
        }
    }
}

impl Handler<ClientRequest> for SignalingSession {
    type Result = ();

    fn handle(&mut self, request: ClientRequest, ctx: &mut Self::Context) -> Self::Result {
        let address = ctx.address();
        tracing::debug!("connection {} requested {:?}", self.connection_id, request);

        match request {
            ClientRequest::JoinRoom {
                room_id,
                display_name,
                title,
            } => {
                if self.room.is_some() {
                    Self::send_error(
                        &address,
                        Error::new_session(
                            format!("Connection {} already joined a room", self.connection_id),
                            SessionErrorKind::AlreadyJoinedError,
                        ),
                    );
                    return;
                }
                let connection_id = self.connection_id.clone();
                let registry = self.gateway.registry.clone();
                let sessions = self.gateway.sessions.clone();
                let event_sender = self.event_sender.clone();
                actix::spawn(async move {
                    // The session binding is taken first, so a racing second
                    // join loses before the room is touched.
                    let profile = PeerProfile {
                        display_name: display_name.clone(),
                    };
                    if let Err(err) = sessions.register(&connection_id, &room_id, profile) {
                        Self::send_error(&address, err);
                        return;
                    }
                    match registry
                        .join(
                            room_id.clone(),
                            connection_id.clone(),
                            display_name,
                            title,
                            event_sender,
                        )
                        .await
                    {
                        Ok((room, reply)) => {
                            match address.send(InternalMessage::RoomJoined(room.clone())).await {
                                Ok(()) => {
                                    address.do_send(ServerEvent::Joined {
                                        connection_id: connection_id.clone(),
                                        room_id,
                                        title: reply.title,
                                        is_new_room: reply.is_new_room,
                                        router_capabilities: reply.router_capabilities,
                                        members: reply.members,
                                        producers: reply.producers,
                                    });
                                }
                                Err(_) => {
                                    // The socket dropped while the join was in
                                    // flight. Undo it.
                                    room.leave(connection_id.clone()).await;
                                    sessions.unregister(&connection_id);
                                }
                            }
                        }
                        Err(err) => {
                            sessions.unregister(&connection_id);
                            Self::send_error(&address, err);
                        }
                    }
                });
            }
            ClientRequest::CreateTransport { direction } => match self.room.clone() {
                Some(room) => {
                    let connection_id = self.connection_id.clone();
                    actix::spawn(async move {
                        match room.create_transport(connection_id, direction).await {
                            Ok(parameters) => {
                                address.do_send(ServerEvent::TransportCreated {
                                    transport_id: parameters.id,
                                    direction,
                                    ice_parameters: parameters.ice_parameters,
                                    ice_candidates: parameters.ice_candidates,
                                    dtls_parameters: parameters.dtls_parameters,
                                });
                            }
                            Err(err) => Self::send_error(&address, err),
                        }
                    });
                }
                None => self.not_joined(address),
            },
            ClientRequest::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => match self.room.clone() {
                Some(room) => {
                    let connection_id = self.connection_id.clone();
                    actix::spawn(async move {
                        match room
                            .connect_transport(connection_id, transport_id.clone(), dtls_parameters)
                            .await
                        {
                            Ok(()) => {
                                address.do_send(ServerEvent::TransportConnected { transport_id });
                            }
                            Err(err) => Self::send_error(&address, err),
                        }
                    });
                }
                None => self.not_joined(address),
            },
            ClientRequest::Produce {
                transport_id,
                kind,
                rtp_parameters,
            } => match self.room.clone() {
                Some(room) => {
                    let connection_id = self.connection_id.clone();
                    actix::spawn(async move {
                        match room
                            .produce(connection_id, transport_id, kind, rtp_parameters)
                            .await
                        {
                            Ok(producer_id) => {
                                address.do_send(ServerEvent::Produced { producer_id });
                            }
                            Err(err) => Self::send_error(&address, err),
                        }
                    });
                }
                None => self.not_joined(address),
            },
            ClientRequest::Consume {
                transport_id,
                producer_id,
                rtp_capabilities,
            } => match self.room.clone() {
                Some(room) => {
                    let connection_id = self.connection_id.clone();
                    actix::spawn(async move {
                        match room
                            .consume(connection_id, transport_id, producer_id, rtp_capabilities)
                            .await
                        {
                            Ok(reply) => {
                                address.do_send(ServerEvent::Consumed {
                                    consumer_id: reply.consumer_id,
                                    producer_id: reply.producer_id,
                                    kind: reply.kind,
                                    rtp_parameters: reply.rtp_parameters,
                                });
                            }
                            Err(err) => Self::send_error(&address, err),
                        }
                    });
                }
                None => self.not_joined(address),
            },
            ClientRequest::ResumeConsumer { consumer_id } => match self.room.clone() {
                Some(room) => {
                    let connection_id = self.connection_id.clone();
                    actix::spawn(async move {
                        match room
                            .resume_consumer(connection_id, consumer_id.clone())
                            .await
                        {
                            Ok(()) => {
                                address.do_send(ServerEvent::ConsumerResumed { consumer_id });
                            }
                            Err(err) => Self::send_error(&address, err),
                        }
                    });
                }
                None => self.not_joined(address),
            },
        }
    }
}

impl Handler<ServerEvent> for SignalingSession {
    type Result = ();

    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) -> Self::Result {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(error) => tracing::error!("failed to serialize server event: {}", error),
        }
    }
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
enum InternalMessage {
    RoomJoined(RoomHandle),
}

impl Handler<InternalMessage> for SignalingSession {
    type Result = ();

    fn handle(&mut self, msg: InternalMessage, _ctx: &mut Self::Context) -> Self::Result {
        match msg {
            InternalMessage::RoomJoined(room) => {
                self.room = Some(room);
            }
        }
    }
}
