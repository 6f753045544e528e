use std::path::Path;

use env_flags::env_flags;
use serde::Deserialize;
use tmi_protocol::SessionLimits;

use crate::error::Error;

env_flags! {
    /// Override for `SessionLimits::heartbeat_interval`, in seconds.
    pub TMI_HEARTBEAT_INTERVAL_SECS: Option<u64> = None;
    /// Override for `SessionLimits::idle_timeout`, in seconds.
    pub TMI_IDLE_TIMEOUT_SECS: Option<u64> = None;
    /// Override for `SessionLimits::save_interval`, in seconds.
    pub TMI_SAVE_INTERVAL_SECS: Option<u64> = None;
}

/// Resolution of spec.md §9 Open Question 1: what an idempotent
/// `POST .../collaborate` does when a session already exists for the
/// diagram. Decided here as an explicit knob rather than guessed in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateSessionPolicy {
    /// Return the existing session (200) instead of failing the caller.
    ReturnExisting,
    /// Reject with a conflict; the caller must `GET` the existing session.
    Conflict,
}

impl Default for CreateSessionPolicy {
    fn default() -> Self {
        CreateSessionPolicy::ReturnExisting
    }
}

/// Runtime configuration for the collaboration core, loaded from an optional
/// `config.toml` and layered with environment overrides the way the
/// reference CLI's `Config`/`flags.rs` split does: file-backed defaults for
/// everything, environment variables only for the handful of knobs an
/// operator needs to flip without a redeploy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: SessionLimits,
    pub create_session_policy: CreateSessionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: SessionLimits::default(),
            create_session_policy: CreateSessionPolicy::default(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Internal(format!("reading {}: {e}", path.display())))?;
        let mut config: Config = toml::from_str(&text)
            .map_err(|e| Error::Internal(format!("parsing {}: {e}", path.display())))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_defaults() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(secs) = *TMI_HEARTBEAT_INTERVAL_SECS {
            self.limits.heartbeat_interval = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = *TMI_IDLE_TIMEOUT_SECS {
            self.limits.idle_timeout = std::time::Duration::from_secs(secs);
        }
        if let Some(secs) = *TMI_SAVE_INTERVAL_SECS {
            self.limits.save_interval = std::time::Duration::from_secs(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_an_empty_toml_document() {
        let config: Config = toml::from_str("").expect("empty document uses field defaults");
        assert_eq!(config, Config::default());
        assert_eq!(config.create_session_policy, CreateSessionPolicy::ReturnExisting);
    }

    #[test]
    fn a_partial_toml_document_only_overrides_what_it_names() {
        let toml_text = r#"
            create_session_policy = "conflict"

            [limits]
            max_cells = 500
        "#;
        let config: Config = toml::from_str(toml_text).expect("valid partial config");
        assert_eq!(config.create_session_policy, CreateSessionPolicy::Conflict);
        assert_eq!(config.limits.max_cells, 500);
        // Everything else in `limits` falls back to `SessionLimits::default()`.
        assert_eq!(config.limits.heartbeat_interval, SessionLimits::default().heartbeat_interval);
    }

    #[test]
    fn load_from_file_reports_missing_files_as_an_internal_error() {
        let err = Config::load_from_file(Path::new("/nonexistent/tmi-config-test.toml")).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
