/// Configuration for the sync runtime
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `REDIS_URL`: Redis connection string (required)
/// - `SYNERGY_NOTIFICATION_TTL_SECS`: how long notifications stay up (default: 5)
/// - `SYNERGY_REMOTE_TIMEOUT_SECS`: per-call remote timeout, 0 disables (default: 0)
/// - `SYNERGY_MESSAGE_MAX_LEN`: chat message limit in characters (default: 2000)
///
/// # Example
///
/// ```no_run
/// use synergy_sync::config::SyncConfig;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = SyncConfig::from_env()?;
/// println!("Notifications last {:?}", config.settings.notification_ttl);
/// # Ok(())
/// # }
/// ```

use std::env;
use std::time::Duration;
use synergy_shared::db::pool::DatabaseConfig;
use synergy_shared::models::message::DEFAULT_MAX_MESSAGE_LEN;
use synergy_shared::redis::RedisConfig;

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseConfig,

    pub redis: RedisConfig,

    pub settings: SyncSettings,
}

/// Behavior knobs of the sync core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Time before a notification expires on its own
    pub notification_ttl: Duration,

    /// Upper bound for a single remote call, `None` waits forever
    pub remote_timeout: Option<Duration>,

    /// Maximum chat message length in characters
    pub message_max_len: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            notification_ttl: Duration::from_secs(5),
            remote_timeout: None,
            message_max_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }
}

impl SyncSettings {
    /// Reads the `SYNERGY_*` variables, falling back to defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = SyncSettings::default();

        let ttl_secs = env::var("SYNERGY_NOTIFICATION_TTL_SECS")
            .unwrap_or_else(|_| defaults.notification_ttl.as_secs().to_string())
            .parse::<u64>()?;

        let timeout_secs = env::var("SYNERGY_REMOTE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u64>()?;

        let message_max_len = env::var("SYNERGY_MESSAGE_MAX_LEN")
            .unwrap_or_else(|_| defaults.message_max_len.to_string())
            .parse::<usize>()?;

        if message_max_len == 0 {
            anyhow::bail!("SYNERGY_MESSAGE_MAX_LEN must be greater than 0");
        }

        Ok(SyncSettings {
            notification_ttl: Duration::from_secs(ttl_secs),
            remote_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            message_max_len,
        })
    }
}

impl SyncConfig {
    /// Loads the full configuration
    ///
    /// # Errors
    ///
    /// Fails if a required variable is missing or a value does not parse.
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig::from_env()?;
        let redis = RedisConfig::from_env()?;
        let settings = SyncSettings::from_env()?;

        Ok(SyncConfig {
            database,
            redis,
            settings,
        })
    }
}
