/// Redis integration for realtime change fanout
///
/// ```text
/// ┌──────────────┐   PUBLISH changes:{table}:{project_id}
/// │ data service │ ────────────────────────────────┐
/// └──────────────┘                                 ▼
///                                          ┌──────────────┐
///                                          │ Redis pub/sub│
///                                          └──────────────┘
///                                                  │ SUBSCRIBE
///                                                  ▼
///                                          ┌──────────────┐
///                                          │ project view │
///                                          └──────────────┘
/// ```

pub mod change_feed;
pub mod client;

pub use change_feed::{ChangeFeed, ChangeFeedError};
pub use client::{RedisClient, RedisClientError, RedisConfig};
