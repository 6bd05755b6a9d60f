use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::config::RtpCodecCapability;
use crate::engine::{
    ConsumerApi, ConsumerHandle, DtlsFingerprint, DtlsParameters, DtlsRole, EngineEvent,
    IceCandidate, IceParameters, MediaEngine, MediaKind, ProducerApi, ProducerHandle,
    RouterApi, RouterHandle, RtpCapabilities, RtpParameters, TransportApi, TransportHandle,
    TransportParameters,
};
use crate::error::{EngineErrorKind, Error};

/// In-process media engine for tests and the demo server. It negotiates
/// capabilities by codec mime type and forwards no packets.
#[derive(Debug)]
pub struct LoopbackEngine {
    death: watch::Sender<bool>,
}

impl LoopbackEngine {
    pub fn new() -> Arc<Self> {
        let (death, _) = watch::channel(false);
        tracing::debug!("LoopbackEngine is created");
        Arc::new(Self { death })
    }

    /// Simulates the engine process dying. New routers are refused and
    /// [`MediaEngine::died`] resolves.
    pub fn kill(&self) {
        if !*self.death.borrow() {
            tracing::warn!("LoopbackEngine was killed");
            let _ = self.death.send(true);
        }
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_router(
        &self,
        codecs: Vec<RtpCodecCapability>,
        event_sender: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<RouterHandle, Error> {
        if *self.death.borrow() {
            return Err(Error::new_engine(
                "Engine process is dead".to_string(),
                EngineErrorKind::EngineFatalError,
            ));
        }
        let router = LoopbackRouter::new(codecs, event_sender);
        Ok(Arc::new(router) as RouterHandle)
    }

    async fn died(&self) {
        let mut receiver = self.death.subscribe();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
struct RouterState {
    event_sender: mpsc::UnboundedSender<EngineEvent>,
    transports: Mutex<HashMap<String, Arc<LoopbackTransport>>>,
    producers: Mutex<HashMap<String, Arc<LoopbackProducer>>>,
    consumers: Mutex<HashMap<String, Arc<LoopbackConsumer>>>,
}

#[derive(Debug)]
pub struct LoopbackRouter {
    id: String,
    codecs: Vec<RtpCodecCapability>,
    state: Arc<RouterState>,
    closed: AtomicBool,
}

impl LoopbackRouter {
    fn new(
        codecs: Vec<RtpCodecCapability>,
        event_sender: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        tracing::debug!("LoopbackRouter {} is created", id);
        Self {
            id,
            codecs,
            state: Arc::new(RouterState {
                event_sender,
                transports: Mutex::new(HashMap::new()),
                producers: Mutex::new(HashMap::new()),
                consumers: Mutex::new(HashMap::new()),
            }),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RouterApi for LoopbackRouter {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn capabilities(&self) -> RtpCapabilities {
        RtpCapabilities(json!({ "codecs": self.codecs }))
    }

    async fn create_transport(&self) -> Result<TransportHandle, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new_engine(
                format!("Router {} is closed", self.id),
                EngineErrorKind::EngineFailureError,
            ));
        }
        let transport = Arc::new(LoopbackTransport::new(self.state.clone()));
        let mut transports = self.state.transports.lock().await;
        transports.insert(transport.id.clone(), transport.clone());
        Ok(transport as TransportHandle)
    }

    async fn can_consume(
        &self,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<bool, Error> {
        let producers = self.state.producers.lock().await;
        match producers.get(producer_id) {
            Some(producer) => {
                let mimes = capability_mime_types(capabilities);
                Ok(mimes.contains(&producer.mime_type.to_lowercase()))
            }
            None => Ok(false),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<Arc<LoopbackTransport>> = {
            let mut guard = self.state.transports.lock().await;
            guard.drain().map(|(_, transport)| transport).collect()
        };
        for transport in transports {
            transport.close().await;
        }
        tracing::debug!("LoopbackRouter {} is closed", self.id);
    }
}

impl Drop for LoopbackRouter {
    fn drop(&mut self) {
        tracing::debug!("LoopbackRouter {} is dropped", self.id);
    }
}

fn capability_mime_types(capabilities: &RtpCapabilities) -> Vec<String> {
    capabilities
        .0
        .get("codecs")
        .and_then(|codecs| codecs.as_array())
        .map(|codecs| {
            codecs
                .iter()
                .filter_map(|codec| codec.get("mimeType").and_then(|mime| mime.as_str()))
                .map(|mime| mime.to_lowercase())
                .collect()
        })
        .unwrap_or_default()
}

fn parameter_mime_type(kind: MediaKind, rtp_parameters: &RtpParameters) -> String {
    rtp_parameters
        .0
        .get("codecs")
        .and_then(|codecs| codecs.as_array())
        .and_then(|codecs| codecs.first())
        .and_then(|codec| codec.get("mimeType"))
        .and_then(|mime| mime.as_str())
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| match kind {
            MediaKind::Audio => "audio/opus".to_string(),
            MediaKind::Video => "video/VP8".to_string(),
        })
}

#[derive(Debug)]
pub struct LoopbackTransport {
    id: String,
    parameters: TransportParameters,
    state: Arc<RouterState>,
    connected: Mutex<Option<DtlsParameters>>,
    closed: AtomicBool,
}

impl LoopbackTransport {
    fn new(state: Arc<RouterState>) -> Self {
        let id = Uuid::new_v4().to_string();
        let parameters = connection_parameters(&id);
        tracing::debug!("LoopbackTransport {} is created", id);
        Self {
            id,
            parameters,
            state,
            connected: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

fn connection_parameters(id: &str) -> TransportParameters {
    TransportParameters {
        id: id.to_string(),
        ice_parameters: IceParameters {
            username_fragment: format!("uf{}", &id[..8]),
            password: format!("pw{}", &id[..8]),
            ice_lite: true,
        },
        ice_candidates: vec![IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1076302079,
            ip: "127.0.0.1".to_string(),
            protocol: "udp".to_string(),
            port: 40000,
            candidate_type: "host".to_string(),
        }],
        dtls_parameters: DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: format!("loopback:{}", id),
            }],
        },
    }
}

#[async_trait]
impl TransportApi for LoopbackTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn parameters(&self) -> TransportParameters {
        self.parameters.clone()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new_engine(
                format!("Transport {} is closed", self.id),
                EngineErrorKind::EngineFailureError,
            ));
        }
        let mut connected = self.connected.lock().await;
        *connected = Some(dtls_parameters);
        tracing::debug!("LoopbackTransport {} is connected", self.id);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerHandle, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new_engine(
                format!("Transport {} is closed", self.id),
                EngineErrorKind::EngineFailureError,
            ));
        }
        let producer = Arc::new(LoopbackProducer {
            id: Uuid::new_v4().to_string(),
            kind,
            mime_type: parameter_mime_type(kind, &rtp_parameters),
            rtp_parameters,
            transport_id: self.id.clone(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
        });
        tracing::debug!("LoopbackProducer {} ({}) is created", producer.id, kind);
        let mut producers = self.state.producers.lock().await;
        producers.insert(producer.id.clone(), producer.clone());
        Ok(producer as ProducerHandle)
    }

    async fn consume(
        &self,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerHandle, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new_engine(
                format!("Transport {} is closed", self.id),
                EngineErrorKind::EngineFailureError,
            ));
        }
        let (kind, mime_type, rtp_parameters) = {
            let producers = self.state.producers.lock().await;
            match producers.get(producer_id) {
                Some(producer) => (
                    producer.kind,
                    producer.mime_type.clone(),
                    producer.rtp_parameters.clone(),
                ),
                None => {
                    return Err(Error::new_engine(
                        format!("Producer {} is not found", producer_id),
                        EngineErrorKind::EngineFailureError,
                    ));
                }
            }
        };
        let mimes = capability_mime_types(capabilities);
        if !mimes.contains(&mime_type.to_lowercase()) {
            return Err(Error::new_engine(
                format!("Capabilities cannot consume producer {}", producer_id),
                EngineErrorKind::EngineFailureError,
            ));
        }
        let consumer = Arc::new(LoopbackConsumer {
            id: Uuid::new_v4().to_string(),
            producer_id: producer_id.to_string(),
            transport_id: self.id.clone(),
            kind,
            rtp_parameters,
            state: self.state.clone(),
            paused: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        tracing::debug!(
            "LoopbackConsumer {} is created for producer {}",
            consumer.id,
            producer_id
        );
        let mut consumers = self.state.consumers.lock().await;
        consumers.insert(consumer.id.clone(), consumer.clone());
        Ok(consumer as ConsumerHandle)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut transports = self.state.transports.lock().await;
            transports.remove(&self.id);
        }
        let _ = self
            .state
            .event_sender
            .send(EngineEvent::TransportClosed(self.id.clone()));
        let producers: Vec<Arc<LoopbackProducer>> = {
            let producers = self.state.producers.lock().await;
            producers
                .values()
                .filter(|producer| producer.transport_id == self.id)
                .cloned()
                .collect()
        };
        for producer in producers {
            producer.close().await;
        }
        let consumers: Vec<Arc<LoopbackConsumer>> = {
            let mut guard = self.state.consumers.lock().await;
            let own: Vec<Arc<LoopbackConsumer>> = guard
                .values()
                .filter(|consumer| consumer.transport_id == self.id)
                .cloned()
                .collect();
            for consumer in own.iter() {
                guard.remove(&consumer.id);
            }
            own
        };
        for consumer in consumers {
            consumer.closed.store(true, Ordering::SeqCst);
        }
        tracing::debug!("LoopbackTransport {} is closed", self.id);
    }
}

#[derive(Debug)]
pub struct LoopbackProducer {
    id: String,
    kind: MediaKind,
    mime_type: String,
    rtp_parameters: RtpParameters,
    transport_id: String,
    state: Arc<RouterState>,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerApi for LoopbackProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut producers = self.state.producers.lock().await;
            producers.remove(&self.id);
        }
        let _ = self
            .state
            .event_sender
            .send(EngineEvent::ProducerClosed(self.id.clone()));
        tracing::debug!("LoopbackProducer {} is closed", self.id);
    }
}

#[derive(Debug)]
pub struct LoopbackConsumer {
    id: String,
    producer_id: String,
    transport_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    state: Arc<RouterState>,
    paused: AtomicBool,
    closed: AtomicBool,
}

#[async_trait]
impl ConsumerApi for LoopbackConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new_engine(
                format!("Consumer {} is closed", self.id),
                EngineErrorKind::EngineFailureError,
            ));
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut consumers = self.state.consumers.lock().await;
        consumers.remove(&self.id);
        tracing::debug!("LoopbackConsumer {} is closed", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;

    async fn new_router(
        engine: &Arc<LoopbackEngine>,
    ) -> (RouterHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = engine
            .create_router(MediaConfig::default().codecs, tx)
            .await
            .unwrap();
        (router, rx)
    }

    fn video_parameters() -> RtpParameters {
        RtpParameters(json!({ "codecs": [{ "mimeType": "video/VP8" }] }))
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_can_consume_matches_mime_types() {
        let engine = LoopbackEngine::new();
        let (router, _rx) = new_router(&engine).await;
        let transport = router.create_transport().await.unwrap();
        let producer = transport
            .produce(MediaKind::Video, video_parameters())
            .await
            .unwrap();

        let compatible = router
            .can_consume(&producer.id(), &router.capabilities())
            .await
            .unwrap();
        assert!(compatible);

        let audio_only = RtpCapabilities(json!({ "codecs": [{ "mimeType": "audio/opus" }] }));
        let compatible = router
            .can_consume(&producer.id(), &audio_only)
            .await
            .unwrap();
        assert!(!compatible);

        let unknown = router
            .can_consume("missing", &router.capabilities())
            .await
            .unwrap();
        assert!(!unknown);
    }

    #[tokio::test]
    async fn test_consumer_starts_paused() {
        let engine = LoopbackEngine::new();
        let (router, _rx) = new_router(&engine).await;
        let produce_transport = router.create_transport().await.unwrap();
        let consume_transport = router.create_transport().await.unwrap();
        let producer = produce_transport
            .produce(MediaKind::Video, video_parameters())
            .await
            .unwrap();

        let consumer = consume_transport
            .consume(&producer.id(), &router.capabilities())
            .await
            .unwrap();
        assert!(consumer.paused());
        consumer.resume().await.unwrap();
        assert!(!consumer.paused());
        // Resuming twice is fine.
        consumer.resume().await.unwrap();
        assert!(!consumer.paused());
    }

    #[tokio::test]
    async fn test_producer_close_emits_one_event() {
        let engine = LoopbackEngine::new();
        let (router, mut rx) = new_router(&engine).await;
        let transport = router.create_transport().await.unwrap();
        let producer = transport
            .produce(MediaKind::Audio, RtpParameters(json!({})))
            .await
            .unwrap();

        producer.close().await;
        producer.close().await;

        let events = drain(&mut rx);
        assert_eq!(events, vec![EngineEvent::ProducerClosed(producer.id())]);
    }

    #[tokio::test]
    async fn test_transport_close_cascades_producers() {
        let engine = LoopbackEngine::new();
        let (router, mut rx) = new_router(&engine).await;
        let transport = router.create_transport().await.unwrap();
        let producer = transport
            .produce(MediaKind::Video, video_parameters())
            .await
            .unwrap();

        transport.close().await;
        transport.close().await;

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                EngineEvent::TransportClosed(transport.id()),
                EngineEvent::ProducerClosed(producer.id()),
            ]
        );

        let result = transport
            .produce(MediaKind::Video, video_parameters())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dead_engine_refuses_routers() {
        let engine = LoopbackEngine::new();
        engine.kill();

        let (tx, _rx) = mpsc::unbounded_channel();
        let result = engine.create_router(MediaConfig::default().codecs, tx).await;
        match result {
            Err(Error::EngineError(_, kind)) => {
                assert_eq!(kind, EngineErrorKind::EngineFatalError);
            }
            other => panic!("expected engine error, got {:?}", other),
        }

        // died() resolves promptly once killed.
        tokio::time::timeout(std::time::Duration::from_secs(1), engine.died())
            .await
            .unwrap();
    }
}
