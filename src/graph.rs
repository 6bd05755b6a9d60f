use crate::engine::{ConsumerHandle, MediaKind, ProducerHandle};
use crate::error::{ConsumeErrorKind, Error};
use crate::message::ProducerInfo;

/// A media stream one connection sends into its room.
#[derive(Debug)]
pub(crate) struct ProducerRecord {
    pub connection_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub handle: ProducerHandle,
}

/// A forwarding link delivering one producer's stream to one subscriber.
#[derive(Debug)]
pub(crate) struct ConsumerRecord {
    pub connection_id: String,
    pub consumer_id: String,
    pub producer_id: String,
    pub transport_id: String,
    pub handle: ConsumerHandle,
}

/// The room's producer/consumer fan-out state.
#[derive(Debug, Default)]
pub(crate) struct MediaGraph {
    producers: Vec<ProducerRecord>,
    consumers: Vec<ConsumerRecord>,
}

impl MediaGraph {
    pub fn add_producer(&mut self, record: ProducerRecord) {
        self.producers.push(record);
    }

    pub fn add_consumer(&mut self, record: ConsumerRecord) {
        self.consumers.push(record);
    }

    pub fn producer_infos(&self) -> Vec<ProducerInfo> {
        self.producers
            .iter()
            .map(|record| ProducerInfo {
                producer_id: record.producer_id.clone(),
                connection_id: record.connection_id.clone(),
                kind: record.kind,
            })
            .collect()
    }

    /// Whether a consume request is allowed: the producer must exist, must
    /// belong to someone else, and must not already be consumed by the caller.
    pub fn check_subscription(&self, connection_id: &str, producer_id: &str) -> Result<(), Error> {
        let producer = self
            .producers
            .iter()
            .find(|record| record.producer_id == producer_id)
            .ok_or_else(|| {
                Error::new_consume(
                    format!("Producer {} is not found", producer_id),
                    ConsumeErrorKind::ProducerNotFoundError,
                )
            })?;
        if producer.connection_id == connection_id {
            return Err(Error::new_consume(
                format!("Connection {} owns producer {}", connection_id, producer_id),
                ConsumeErrorKind::SelfConsumeError,
            ));
        }
        if self.consumers.iter().any(|record| {
            record.connection_id == connection_id && record.producer_id == producer_id
        }) {
            return Err(Error::new_consume(
                format!(
                    "Connection {} already consumes producer {}",
                    connection_id, producer_id
                ),
                ConsumeErrorKind::DuplicateConsumeError,
            ));
        }
        Ok(())
    }

    pub fn find_consumer(&self, connection_id: &str, consumer_id: &str) -> Option<&ConsumerRecord> {
        self.consumers.iter().find(|record| {
            record.connection_id == connection_id && record.consumer_id == consumer_id
        })
    }

    pub fn remove_consumer(&mut self, consumer_id: &str) -> Option<ConsumerRecord> {
        let index = self
            .consumers
            .iter()
            .position(|record| record.consumer_id == consumer_id)?;
        Some(self.consumers.remove(index))
    }

    pub fn remove_producer(&mut self, producer_id: &str) -> Option<ProducerRecord> {
        let index = self
            .producers
            .iter()
            .position(|record| record.producer_id == producer_id)?;
        Some(self.producers.remove(index))
    }

    /// Consumer ids of every forwarding link fed by the given producer.
    pub fn consumers_of_producer(&self, producer_id: &str) -> Vec<String> {
        self.consumers
            .iter()
            .filter(|record| record.producer_id == producer_id)
            .map(|record| record.consumer_id.clone())
            .collect()
    }

    /// Consumer ids of every forwarding link carried by the given transport.
    pub fn consumers_on_transport(&self, transport_id: &str) -> Vec<String> {
        self.consumers
            .iter()
            .filter(|record| record.transport_id == transport_id)
            .map(|record| record.consumer_id.clone())
            .collect()
    }

    pub fn remove_producers_for_connection(&mut self, connection_id: &str) -> Vec<ProducerRecord> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.producers.len() {
            if self.producers[index].connection_id == connection_id {
                removed.push(self.producers.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    pub fn remove_consumers_for_connection(&mut self, connection_id: &str) -> Vec<ConsumerRecord> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.consumers.len() {
            if self.consumers[index].connection_id == connection_id {
                removed.push(self.consumers.remove(index));
            } else {
                index += 1;
            }
        }
        removed
    }

    pub fn consumer_ids(&self) -> Vec<String> {
        self.consumers
            .iter()
            .map(|record| record.consumer_id.clone())
            .collect()
    }
}
