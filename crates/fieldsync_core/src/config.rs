//! Store configuration.

/// What happens when the remote removes an entity that still has queued
/// local mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Keep the entity (with local edits applied) until its last queued
    /// mutation is delivered or reloaded, then remove it.
    #[default]
    DeferWhilePending,
    /// Remove the entity immediately, keeping the queued mutations so they
    /// can still be delivered or reported as failed.
    Immediate,
}

/// Configuration for opening a [`LocalStore`](crate::LocalStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync (data and metadata) on every commit instead of a
    /// plain flush.
    pub sync_on_commit: bool,

    /// Remote-removal handling for entities with queued mutations.
    pub removal_policy: RemovalPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            removal_policy: RemovalPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the remote-removal policy.
    #[must_use]
    pub const fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.removal_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.removal_policy, RemovalPolicy::DeferWhilePending);
    }

    #[test]
    fn builder_chain() {
        let config = StoreConfig::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .removal_policy(RemovalPolicy::Immediate);
        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.removal_policy, RemovalPolicy::Immediate);
    }
}
