use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// Ingest defaults
// ---------------------------------------------------------------------------

/// Pipeline-wide fallback values. A channel whose configured threshold is
/// zero or negative uses these instead.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestDefaults {
    /// Minimum age before a changed value is saved again.
    pub min_time: HumanDuration,
    /// Age after which a value is saved unconditionally.
    pub max_time: HumanDuration,
    /// Minimum absolute change from the previous saved value.
    pub min_change: f64,
    /// How long a created alert suppresses further alerts for its channel.
    pub alert_expiry: HumanDuration,
}

impl Default for IngestDefaults {
    fn default() -> Self {
        Self {
            min_time: Duration::from_secs(30).into(),
            max_time: Duration::from_secs(30 * 60).into(),
            min_change: 1.0,
            alert_expiry: Duration::from_secs(2 * 60 * 60).into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of submissions per batch run (unlimited when absent).
    pub limit: Option<usize>,
    /// Advisory wall-clock budget, checked between submissions.
    pub max_processing_time: Option<HumanDuration>,
}

// ---------------------------------------------------------------------------
// IngestConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub ingest: IngestDefaults,
    pub batch: BatchConfig,
    pub logging: LoggingConfig,
}

impl IngestConfig {
    /// Read and parse a `sensgrid.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for IngestConfig {
    type Err = anyhow::Error;

    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: IngestConfig = toml::from_str(toml_str)?;
        if config.ingest.min_change < 0.0 {
            anyhow::bail!("ingest.min_change must be non-negative");
        }
        if config.ingest.max_time.as_duration() < config.ingest.min_time.as_duration() {
            anyhow::bail!("ingest.max_time must be >= ingest.min_time");
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
