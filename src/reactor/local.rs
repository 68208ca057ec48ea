//! In-process change transport backed by tokio broadcast channels

use crate::error::{HandleError, HandleResult};
use crate::reactor::{ChangeEvent, ChangeStream, ChangeTransport};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// Topic-based pub/sub living in the current process
///
/// Subscribers that fall more than `capacity` events behind observe a
/// transport error item and resume with the oldest retained event.
#[derive(Clone)]
pub struct LocalTransport {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>>,
    capacity: usize,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Transport retaining up to `capacity` undelivered events per topic
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish a payload on `topic`. Returns how many subscribers got it.
    pub fn publish(&self, topic: &str, payload: serde_json::Value) -> usize {
        self.send(ChangeEvent::new(topic, payload))
    }

    /// Publish a prepared event on its own topic
    pub fn send(&self, event: ChangeEvent) -> usize {
        let sender = self.sender(&event.topic);
        let topic = event.topic.clone();
        match sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for {}", topic);
                0
            }
        }
    }

    /// End every stream subscribed to `topic`
    pub fn close(&self, topic: &str) {
        self.lock_topics().remove(topic);
    }

    /// End every stream on every topic
    pub fn close_all(&self) {
        self.lock_topics().clear();
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<ChangeEvent> {
        self.lock_topics()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn lock_topics(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<ChangeEvent>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeTransport for LocalTransport {
    async fn subscribe(&self, topic: &str) -> HandleResult<ChangeStream> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let topic = topic.clone();
            async move {
                match receiver.recv().await {
                    Ok(event) => Some((Ok(event), receiver)),
                    Err(RecvError::Lagged(skipped)) => Some((
                        Err(HandleError::Transport {
                            topic,
                            reason: format!("subscriber lagged, {} event(s) skipped", skipped),
                        }),
                        receiver,
                    )),
                    Err(RecvError::Closed) => None,
                }
            }
        });
        Ok(stream.boxed())
    }
}
