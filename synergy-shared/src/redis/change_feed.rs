/// Change feed over Redis pub/sub
///
/// Publishers send one JSON `RawChange` per committed row change on the
/// topic's channel. Subscribers get a bounded channel of raw changes that
/// already match their topic; parsing into typed events is left to them.
///
/// Each subscription owns a dedicated pub/sub connection and a background
/// task. The task stops when the cancellation token fires or the receiver is
/// dropped, and the connection is closed with it.
///
/// # Example
///
/// ```no_run
/// use synergy_shared::events::{RawChange, Table, Topic};
/// use synergy_shared::redis::{ChangeFeed, RedisClient, RedisConfig};
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// # async fn example() -> anyhow::Result<()> {
/// let feed = ChangeFeed::new(RedisClient::new(RedisConfig::from_env()?).await?);
/// let project_id = Uuid::new_v4();
///
/// let cancel = CancellationToken::new();
/// let mut changes = feed.subscribe(Topic::tasks(project_id), cancel.clone()).await?;
///
/// feed.publish(&RawChange::deleted(Table::Tasks, project_id, Uuid::new_v4())).await?;
/// let change = changes.recv().await;
/// cancel.cancel();
/// # Ok(())
/// # }
/// ```

use crate::events::{change_channel, RawChange, Topic};
use crate::redis::client::RedisClient;
use redis::AsyncCommands;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Buffered changes per subscriber before the reader waits
const SUBSCRIBER_BUFFER: usize = 256;

/// Change feed errors
#[derive(Error, Debug)]
pub enum ChangeFeedError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Failed to encode change: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Publish timed out")]
    Timeout,
}

/// Publishes and subscribes to row changes
#[derive(Clone)]
pub struct ChangeFeed {
    redis: RedisClient,
}

impl ChangeFeed {
    pub fn new(redis: RedisClient) -> Self {
        ChangeFeed { redis }
    }

    /// Publishes a change on its project/table channel
    ///
    /// Returns the number of subscribers that received it.
    pub async fn publish(&self, change: &RawChange) -> Result<usize, ChangeFeedError> {
        let table = match crate::events::Table::from_str(&change.table) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(table = %change.table, error = %e, "Not publishing change for unknown table");
                return Ok(0);
            }
        };

        let channel = change_channel(table, change.project_id);
        let payload = serde_json::to_string(change)?;

        let mut conn = self.redis.get_connection();
        let receivers: usize = tokio::time::timeout(
            self.redis.command_timeout(),
            conn.publish(&channel, payload),
        )
        .await
        .map_err(|_| ChangeFeedError::Timeout)??;

        tracing::debug!(
            channel = %channel,
            kind = %change.kind,
            receivers = receivers,
            "Published change"
        );

        Ok(receivers)
    }

    /// Subscribes to a topic
    ///
    /// The subscription is established before this returns, so changes
    /// published afterwards are delivered. Stops when `cancel` fires or the
    /// returned receiver is dropped.
    pub async fn subscribe(
        &self,
        topic: Topic,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawChange>, ChangeFeedError> {
        let channel = topic.channel();

        let client = redis::Client::open(self.redis.url())?;
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&channel).await?;

        tracing::info!(channel = %channel, "Subscribed to changes");

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(channel = %channel, "Change subscription cancelled");
                        break;
                    }
                    _ = tx.closed() => {
                        tracing::debug!(channel = %channel, "Change subscriber dropped");
                        break;
                    }
                    msg = stream.next() => {
                        let Some(msg) = msg else {
                            tracing::warn!(channel = %channel, "Change stream ended");
                            break;
                        };

                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::error!(channel = %channel, error = %e, "Failed to read change payload");
                                continue;
                            }
                        };

                        let change: RawChange = match serde_json::from_str(&payload) {
                            Ok(change) => change,
                            Err(e) => {
                                tracing::error!(channel = %channel, error = %e, payload = %payload, "Discarding undecodable change");
                                continue;
                            }
                        };

                        if !topic.accepts(&change) {
                            continue;
                        }

                        if tx.send(change).await.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(channel = %channel, "Change subscription closed");
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Table;
    use crate::redis::client::RedisConfig;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_publish_reaches_subscriber() {
        let feed = ChangeFeed::new(RedisClient::new(RedisConfig::local()).await.unwrap());
        let project_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let mut rx = feed.subscribe(Topic::tasks(project_id), cancel.clone()).await.unwrap();

        let change = RawChange::deleted(Table::Tasks, project_id, Uuid::new_v4());
        let receivers = feed.publish(&change).await.unwrap();
        assert_eq!(receivers, 1);

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, change);

        cancel.cancel();
    }

    #[tokio::test]
    #[ignore] // Requires running Redis instance
    async fn test_filtered_kinds_are_not_delivered() {
        let feed = ChangeFeed::new(RedisClient::new(RedisConfig::local()).await.unwrap());
        let project_id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let mut rx = feed
            .subscribe(Topic::messages(project_id), cancel.clone())
            .await
            .unwrap();

        feed.publish(&RawChange::deleted(Table::Messages, project_id, Uuid::new_v4()))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(received.is_err(), "delete should be filtered out");

        cancel.cancel();
    }
}
