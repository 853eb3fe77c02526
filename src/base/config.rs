//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc, time::Duration};

use regex::Regex;
use serde::Deserialize;

use super::types::Res;

/// Default gateway account label.
fn default_account() -> String {
    "msteams.bridge".to_string()
}

/// Default Microsoft Graph endpoint.
fn default_graph_base_url() -> String {
    "https://graph.microsoft.com/beta".to_string()
}

/// Default delay between two poll cycles, in milliseconds.
fn default_poll_interval_ms() -> u64 {
    5000
}

/// Default pattern used to strip attachment placeholders from message bodies.
fn default_attachment_tag_pattern() -> String {
    "<attachment id=.*?attachment>".to_string()
}

/// Default maximum size of a forwarded attachment, in bytes.
fn default_media_download_size() -> usize {
    1_000_000
}

/// Default maximum number of remembered local-to-remote id mappings.
fn default_id_map_capacity() -> usize {
    10_000
}

/// Default retention of a local-to-remote id mapping, in seconds.
fn default_id_map_retention_secs() -> u64 {
    24 * 60 * 60
}

/// Default capacity of the gateway handoff channel.
fn default_gateway_buffer() -> usize {
    100
}

/// Configuration for the teams-bridge application.
#[derive(Debug, Clone)]
pub struct Config {
    /// The shared, immutable settings.
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// The settings themselves, as deserialized from env and file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// OAuth bearer token for the Graph API (`ACCESS_TOKEN`).
    pub access_token: String,
    /// The team that owns the bridged channels (`TEAM_ID`).
    pub team_id: String,
    /// Channel ids to join, comma separated when given via env (`CHANNELS`).
    #[serde(default)]
    pub channels: Vec<String>,
    /// Account label stamped on every gateway envelope (`ACCOUNT`).
    #[serde(default = "default_account")]
    pub account: String,
    /// Base URL of the Graph API (`GRAPH_BASE_URL`).
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    /// Delay between poll cycles, and before the first poll after the baseline (`POLL_INTERVAL_MS`).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Regex removing attachment placeholders from inbound bodies (`ATTACHMENT_TAG_PATTERN`).
    #[serde(default = "default_attachment_tag_pattern")]
    pub attachment_tag_pattern: String,
    /// Attachments larger than this many bytes are not forwarded (`MEDIA_DOWNLOAD_SIZE`).
    #[serde(default = "default_media_download_size")]
    pub media_download_size: usize,
    /// Maximum number of local-to-remote id mappings kept for edits and deletes (`ID_MAP_CAPACITY`).
    #[serde(default = "default_id_map_capacity")]
    pub id_map_capacity: usize,
    /// How long a local-to-remote id mapping is kept, in seconds (`ID_MAP_RETENTION_SECS`).
    #[serde(default = "default_id_map_retention_secs")]
    pub id_map_retention_secs: u64,
    /// Capacity of the channel handing events to the gateway (`GATEWAY_BUFFER`).
    #[serde(default = "default_gateway_buffer")]
    pub gateway_buffer: usize,
    /// Dump every newly observed remote message at debug level (`DEBUG`).
    #[serde(default)]
    pub debug: bool,
}

impl ConfigInner {
    /// The poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The id map retention as a [`Duration`].
    pub fn id_map_retention(&self) -> Duration {
        Duration::from_secs(self.id_map_retention_secs)
    }

    /// Compiles the attachment placeholder pattern.
    pub fn attachment_tag_regex(&self) -> Res<Regex> {
        Regex::new(&self.attachment_tag_pattern).map_err(|e| anyhow::anyhow!("Invalid attachment tag pattern: {}", e))
    }
}

impl Config {
    /// Loads env overrides plus `explicit_path` (or `.hidden/config.toml` if present), then validates.
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(
            config::Environment::default()
                .prefix("TEAMS_BRIDGE")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("channels"),
        );

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Checks the invariants the bridge relies on.
    pub fn validate(&self) -> Res<()> {
        if self.team_id.is_empty() {
            return Err(anyhow::anyhow!("A team id must be configured."));
        }

        if self.channels.is_empty() {
            return Err(anyhow::anyhow!("At least one channel must be configured."));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than zero."));
        }

        if self.id_map_capacity == 0 {
            return Err(anyhow::anyhow!("Id map capacity must be greater than zero."));
        }

        if self.gateway_buffer == 0 {
            return Err(anyhow::anyhow!("Gateway buffer must be greater than zero."));
        }

        self.attachment_tag_regex()?;

        Ok(())
    }
}

// Tests.
