use crate::engine::TransportHandle;
use crate::error::{Error, TransportErrorKind};
use crate::message::TransportDirection;

/// One transport owned by one connection.
#[derive(Debug, Clone)]
pub(crate) struct TransportRecord {
    pub(crate) connection_id: String,
    pub(crate) transport_id: String,
    pub(crate) handle: TransportHandle,
}

/// Transport records of a room, keyed by owner and direction. A transport id
/// resolves only for the connection that created it.
#[derive(Debug, Default)]
pub(crate) struct TransportBroker {
    produce_transports: Vec<TransportRecord>,
    consume_transports: Vec<TransportRecord>,
}

impl TransportBroker {
    pub(crate) fn record(&mut self, direction: TransportDirection, record: TransportRecord) {
        match direction {
            TransportDirection::Produce => self.produce_transports.push(record),
            TransportDirection::Consume => self.consume_transports.push(record),
        }
    }

    pub(crate) fn resolve(
        &self,
        connection_id: &str,
        transport_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportHandle, Error> {
        let records = match direction {
            TransportDirection::Produce => &self.produce_transports,
            TransportDirection::Consume => &self.consume_transports,
        };
        records
            .iter()
            .find(|record| {
                record.connection_id == connection_id && record.transport_id == transport_id
            })
            .map(|record| record.handle.clone())
            .ok_or_else(|| {
                Error::new_transport(
                    format!(
                        "Transport {} is not found for connection {}",
                        transport_id, connection_id
                    ),
                    TransportErrorKind::TransportNotFoundError,
                )
            })
    }

    /// Resolves in either direction, trying the produce side first.
    pub(crate) fn resolve_any(
        &self,
        connection_id: &str,
        transport_id: &str,
    ) -> Result<TransportHandle, Error> {
        self.resolve(connection_id, transport_id, TransportDirection::Produce)
            .or_else(|_| self.resolve(connection_id, transport_id, TransportDirection::Consume))
    }

    pub(crate) fn remove_consume(&mut self, transport_id: &str) -> Option<TransportRecord> {
        let position = self
            .consume_transports
            .iter()
            .position(|record| record.transport_id == transport_id)?;
        Some(self.consume_transports.remove(position))
    }

    /// Removes the record in whichever direction holds it.
    pub(crate) fn remove(&mut self, transport_id: &str) -> Option<TransportRecord> {
        if let Some(position) = self
            .produce_transports
            .iter()
            .position(|record| record.transport_id == transport_id)
        {
            return Some(self.produce_transports.remove(position));
        }
        self.remove_consume(transport_id)
    }

    /// Removes every transport of a connection, produce side first.
    pub(crate) fn remove_for_connection(
        &mut self,
        connection_id: &str,
    ) -> (Vec<TransportRecord>, Vec<TransportRecord>) {
        let produce = drain_by_connection(&mut self.produce_transports, connection_id);
        let consume = drain_by_connection(&mut self.consume_transports, connection_id);
        (produce, consume)
    }

    pub(crate) fn transport_ids(&self, direction: TransportDirection) -> Vec<String> {
        let records = match direction {
            TransportDirection::Produce => &self.produce_transports,
            TransportDirection::Consume => &self.consume_transports,
        };
        records
            .iter()
            .map(|record| record.transport_id.clone())
            .collect()
    }
}

fn drain_by_connection(
    records: &mut Vec<TransportRecord>,
    connection_id: &str,
) -> Vec<TransportRecord> {
    let mut removed = Vec::new();
    let mut index = 0;
    while index < records.len() {
        if records[index].connection_id == connection_id {
            removed.push(records.remove(index));
        } else {
            index += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        ConsumerHandle, DtlsParameters, MediaKind, ProducerHandle, RtpCapabilities, RtpParameters,
        TransportApi, TransportParameters,
    };
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeTransport {
        id: String,
    }

    #[async_trait]
    impl TransportApi for FakeTransport {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn parameters(&self) -> TransportParameters {
            unimplemented!()
        }

        async fn connect(&self, _dtls_parameters: DtlsParameters) -> Result<(), Error> {
            Ok(())
        }

        async fn produce(
            &self,
            _kind: MediaKind,
            _rtp_parameters: RtpParameters,
        ) -> Result<ProducerHandle, Error> {
            unimplemented!()
        }

        async fn consume(
            &self,
            _producer_id: &str,
            _rtp_capabilities: &RtpCapabilities,
        ) -> Result<ConsumerHandle, Error> {
            unimplemented!()
        }

        async fn close(&self) {}
    }

    fn record(connection_id: &str, transport_id: &str) -> TransportRecord {
        TransportRecord {
            connection_id: connection_id.to_string(),
            transport_id: transport_id.to_string(),
            handle: Arc::new(FakeTransport {
                id: transport_id.to_string(),
            }),
        }
    }

    #[test]
    fn test_resolve_is_scoped_to_owner_and_direction() {
        let mut broker = TransportBroker::default();
        broker.record(TransportDirection::Produce, record("a", "t1"));
        broker.record(TransportDirection::Consume, record("a", "t2"));

        assert!(broker
            .resolve("a", "t1", TransportDirection::Produce)
            .is_ok());
        // Wrong direction.
        let err = broker
            .resolve("a", "t1", TransportDirection::Consume)
            .unwrap_err();
        assert_eq!(
            err.code(),
            TransportErrorKind::TransportNotFoundError.to_string()
        );
        // Someone else's transport.
        assert!(broker
            .resolve("b", "t1", TransportDirection::Produce)
            .is_err());
    }

    #[test]
    fn test_resolve_any_tries_both_directions() {
        let mut broker = TransportBroker::default();
        broker.record(TransportDirection::Consume, record("a", "t1"));

        let handle = broker.resolve_any("a", "t1").unwrap();
        assert_eq!(handle.id(), "t1");
        assert!(broker.resolve_any("a", "missing").is_err());
    }

    #[test]
    fn test_remove_for_connection_partitions_by_owner() {
        let mut broker = TransportBroker::default();
        broker.record(TransportDirection::Produce, record("a", "t1"));
        broker.record(TransportDirection::Consume, record("a", "t2"));
        broker.record(TransportDirection::Consume, record("b", "t3"));

        let (produce, consume) = broker.remove_for_connection("a");
        assert_eq!(produce.len(), 1);
        assert_eq!(consume.len(), 1);
        assert_eq!(broker.transport_ids(TransportDirection::Produce).len(), 0);
        assert_eq!(
            broker.transport_ids(TransportDirection::Consume),
            vec!["t3".to_string()]
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut broker = TransportBroker::default();
        broker.record(TransportDirection::Produce, record("a", "t1"));

        assert!(broker.remove("t1").is_some());
        assert!(broker.remove("t1").is_none());
        assert!(broker.remove_consume("t1").is_none());
    }
}
