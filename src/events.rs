//! Typed progress events with per-job fan-out
//!
//! Each job owns a broadcast channel plus an append-only history. New
//! subscribers receive the latest status snapshot, then live events.

use crate::models::Event;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

struct JobChannel {
    sender: broadcast::Sender<Event>,
    history: Vec<Event>,
}

pub struct ProgressChannel {
    channels: RwLock<HashMap<Uuid, JobChannel>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, job_id: Uuid) {
        let mut channels = self.channels.write().await;
        channels.entry(job_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
            JobChannel {
                sender,
                history: Vec::new(),
            }
        });
    }

    /// Append to the job's event log and fan out to live subscribers.
    /// A send with no receivers is not an error.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.write().await;
        let channel = channels.entry(event.job_id()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
            JobChannel {
                sender,
                history: Vec::new(),
            }
        });

        channel.history.push(event.clone());
        let _ = channel.sender.send(event);
    }

    /// Latest status snapshot plus a receiver for subsequent events
    pub async fn subscribe(
        &self,
        job_id: Uuid,
    ) -> Option<(Option<Event>, broadcast::Receiver<Event>)> {
        let channels = self.channels.read().await;
        let channel = channels.get(&job_id)?;
        Some((channel.history.last().cloned(), channel.sender.subscribe()))
    }

    /// Full append-only event log for a job
    pub async fn history(&self, job_id: Uuid) -> Vec<Event> {
        let channels = self.channels.read().await;
        channels
            .get(&job_id)
            .map(|c| c.history.clone())
            .unwrap_or_default()
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Event;

    #[tokio::test]
    async fn test_subscriber_sees_snapshot_then_live_events() {
        let channel = ProgressChannel::new();
        let job_id = Uuid::new_v4();
        channel.register(job_id).await;

        channel
            .publish(Event::JobProgress {
                job_id,
                percent: 10.0,
                current_agent: None,
            })
            .await;

        let (snapshot, mut rx) = channel.subscribe(job_id).await.unwrap();
        assert!(matches!(snapshot, Some(Event::JobProgress { percent, .. }) if percent == 10.0));

        channel
            .publish(Event::JobProgress {
                job_id,
                percent: 50.0,
                current_agent: Some("legal-counsel".to_string()),
            })
            .await;

        let live = rx.recv().await.unwrap();
        assert!(matches!(live, Event::JobProgress { percent, .. } if percent == 50.0));
    }

    #[tokio::test]
    async fn test_history_is_append_only_and_ordered() {
        let channel = ProgressChannel::new();
        let job_id = Uuid::new_v4();

        for percent in [0.0, 25.0, 75.0] {
            channel
                .publish(Event::JobProgress {
                    job_id,
                    percent,
                    current_agent: None,
                })
                .await;
        }

        let history = channel.history(job_id).await;
        assert_eq!(history.len(), 3);
        let percents: Vec<f64> = history
            .iter()
            .map(|e| match e {
                Event::JobProgress { percent, .. } => *percent,
                _ => panic!("unexpected event"),
            })
            .collect();
        assert_eq!(percents, vec![0.0, 25.0, 75.0]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let channel = ProgressChannel::new();
        let job_id = Uuid::new_v4();
        channel
            .publish(Event::JobError {
                job_id,
                kind: "test".to_string(),
                message: "no one listening".to_string(),
            })
            .await;
        assert_eq!(channel.history(job_id).await.len(), 1);
    }
}
