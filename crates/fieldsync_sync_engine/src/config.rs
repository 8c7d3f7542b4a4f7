//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Notification id used by the mutation sync worker.
pub const MUTATION_SYNC_NOTIFICATION_ID: i32 = 1;
/// Notification id used by the photo upload worker.
pub const PHOTO_SYNC_NOTIFICATION_ID: i32 = 2;
/// Notification id used by the tile download worker.
pub const TILE_DOWNLOAD_NOTIFICATION_ID: i32 = 3;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry policy the scheduler applies to workers asking for a retry.
    pub retry: RetryConfig,
    /// Resubscription policy for the remote change stream; `None` means a
    /// failed subscription is surfaced to the caller without retrying.
    pub resubscribe: Option<RetryConfig>,
    /// Timeout for a single mutation push.
    pub push_timeout: Duration,
    /// Chunk size for photo uploads.
    pub upload_chunk_size: usize,
    /// Notification id for mutation sync progress.
    pub mutation_sync_notification_id: i32,
    /// Notification id for photo upload progress.
    pub photo_sync_notification_id: i32,
    /// Notification id for tile download progress.
    pub tile_download_notification_id: i32,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            resubscribe: Some(RetryConfig::new(u32::MAX).with_max_delay(Duration::from_secs(60))),
            push_timeout: Duration::from_secs(30),
            upload_chunk_size: 256 * 1024,
            mutation_sync_notification_id: MUTATION_SYNC_NOTIFICATION_ID,
            photo_sync_notification_id: PHOTO_SYNC_NOTIFICATION_ID,
            tile_download_notification_id: TILE_DOWNLOAD_NOTIFICATION_ID,
        }
    }

    /// Sets the worker retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the resubscription policy.
    pub fn with_resubscribe(mut self, resubscribe: Option<RetryConfig>) -> Self {
        self.resubscribe = resubscribe;
        self
    }

    /// Sets the push timeout.
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    /// Sets the photo upload chunk size.
    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential backoff policy shared by worker retries and
/// resubscription.
///
/// Attempt `n` (1-based) waits `base_delay * multiplier^(n-1)`, capped at
/// `max_delay`, plus up to `jitter` of that again at random.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts allowed, the first one included.
    pub max_attempts: u32,
    /// Wait before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any single wait, before jitter.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
    /// Random extra wait as a fraction of the computed one, in `0.0..=1.0`.
    pub jitter: f64,
}

impl RetryConfig {
    /// Policy allowing `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Policy that never retries.
    pub fn once() -> Self {
        Self::new(1).with_base_delay(Duration::ZERO).with_jitter(0.0)
    }

    /// Sets the wait before the second attempt.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Caps every wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the growth factor; values below `1.0` are raised to `1.0`.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the jitter fraction; `0.0` makes waits deterministic.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Returns true if another attempt is allowed after `attempts`.
    pub fn allows_retry_after(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Wait after failed attempt number `attempt`. Attempt 0 never waits.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let cap = self.max_delay.as_secs_f64();
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let grown = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let wait = if grown.is_finite() { grown.clamp(0.0, cap) } else { cap };

        let extra = if self.jitter > 0.0 {
            wait * self.jitter * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        Duration::from_secs_f64(wait + extra)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders() {
        let config = SyncConfig::new()
            .with_retry(RetryConfig::once())
            .with_resubscribe(None)
            .with_push_timeout(Duration::from_secs(5))
            .with_upload_chunk_size(0);

        assert_eq!(config.retry.max_attempts, 1);
        assert!(!config.retry.allows_retry_after(1));
        assert!(config.resubscribe.is_none());
        assert_eq!(config.push_timeout, Duration::from_secs(5));
        assert_eq!(config.upload_chunk_size, 1);
        assert_eq!(config.photo_sync_notification_id, PHOTO_SYNC_NOTIFICATION_ID);
    }

    #[test]
    fn shrinking_multiplier_is_refused() {
        let policy = RetryConfig::new(4)
            .with_base_delay(Duration::from_millis(250))
            .with_multiplier(-2.0)
            .with_jitter(0.0);
        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.backoff(2), Duration::from_millis(250));

        let raw = RetryConfig {
            multiplier: -2.0,
            ..policy
        };
        assert_eq!(raw.backoff(2), Duration::ZERO);
    }

    #[test]
    fn default_resubscribes_forever() {
        let resubscribe = SyncConfig::default().resubscribe.unwrap();
        assert!(resubscribe.allows_retry_after(1_000_000));
        assert!(resubscribe.backoff(40) <= Duration::from_secs(75));
    }

    #[test]
    fn backoff_grows_then_caps() {
        let policy = RetryConfig::new(8)
            .with_base_delay(Duration::from_millis(125))
            .with_max_delay(Duration::from_millis(500))
            .with_jitter(0.0);

        let waits: Vec<_> = (0..5).map(|n| policy.backoff(n)).collect();
        assert_eq!(
            waits,
            vec![
                Duration::ZERO,
                Duration::from_millis(125),
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryConfig::new(3)
            .with_base_delay(Duration::from_millis(250))
            .with_jitter(0.5);
        for _ in 0..20 {
            let wait = policy.backoff(1);
            assert!(wait >= Duration::from_millis(250));
            assert!(wait <= Duration::from_millis(375));
        }
        assert_eq!(RetryConfig::new(3).with_jitter(7.0).jitter, 1.0);
    }
}
