//! EK-PAR - Pipeline Configuration
//!
//! Queue sizes, interface versions and scheduling of the background task.
//! Every field has a default; a JSON config file only needs the overrides.

use crate::types::*;

/// When the commit pass runs relative to a batch of commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "snake_case"))]
pub enum CommitPolicy {
    /// Commit after every command of a batch
    #[default]
    PerCommand,
    /// Stage the whole batch, then commit once
    PerMessage,
}

/// Background pipeline configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct PipelineConfig {
    /// Command interface version; only the major number is checked
    pub command_version: Version,
    /// Version stamped on parameter map uploads
    pub parameter_map_version: Version,
    /// Command mailbox capacity (bytes)
    pub command_queue_size: usize,
    /// Status mailbox capacity (bytes)
    pub status_queue_size: usize,
    /// Parameter map mailbox capacity (bytes)
    pub parameter_map_queue_size: usize,
    /// Background tick period
    pub tick_period_us: TimeUs,
    /// Commit granularity for batches
    pub commit_policy: CommitPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_version: version::JSON_COMMAND,
            parameter_map_version: version::JSON_PARAMETER_MAP,
            command_queue_size: COMMAND_QUEUE_SIZE,
            status_queue_size: STATUS_QUEUE_SIZE,
            parameter_map_queue_size: PARAMETER_MAP_QUEUE_SIZE,
            tick_period_us: BACKGROUND_TICK_US,
            commit_policy: CommitPolicy::PerCommand,
        }
    }
}

#[cfg(feature = "std")]
impl PipelineConfig {
    /// Parse a JSON config, filling unspecified fields with defaults
    pub fn from_json(text: &str) -> core::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.command_version, version::JSON_COMMAND);
        assert_eq!(config.commit_policy, CommitPolicy::PerCommand);
        assert_eq!(config.tick_period_us, 1_000);
    }

    #[test]
    fn test_partial_json() {
        let config = PipelineConfig::from_json(
            r#"{"commit_policy": "per_message", "status_queue_size": 4096}"#,
        )
        .unwrap();
        assert_eq!(config.commit_policy, CommitPolicy::PerMessage);
        assert_eq!(config.status_queue_size, 4096);
        assert_eq!(config.command_queue_size, COMMAND_QUEUE_SIZE);
    }

    #[test]
    fn test_version_override() {
        let config = PipelineConfig::from_json(
            r#"{"command_version": {"major": 2, "minor": 0, "patch": 1}}"#,
        )
        .unwrap();
        assert_eq!(config.command_version, Version::new(2, 0, 1));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(PipelineConfig::from_json(r#"{"commit_policy": "never"}"#).is_err());
    }
}
