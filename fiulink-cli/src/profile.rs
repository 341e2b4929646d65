//! Channel profiles: a list of channel configurations plus an optional
//! batch operation, stored as TOML.
//!
//! ```toml
//! [[channel]]
//! channel = 3
//! fault = "load-no-fault"
//! mode = "synchronous"
//! high-time = 100
//! low-time = 200
//! cycles = 5
//!
//! [run]
//! op = "sync"
//! ```

use anyhow::{Context, Result, bail};
use fiulink::{ChannelMask, ConfigParams, MAX_CHANNEL, Request};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Batch operation run after the channels are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchOp {
    /// SynchronousOp.
    Sync,
    /// ControlOp.
    Control,
}

/// `[run]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSection {
    /// Operation to run.
    pub op: BatchOp,
    /// Channels to act on; defaults to every configured channel.
    pub channels: Option<Vec<u8>>,
}

/// A parsed profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Profile {
    /// Channel configurations, applied in order.
    #[serde(default, rename = "channel")]
    pub channels: Vec<ConfigParams>,
    /// Optional batch operation.
    pub run: Option<RunSection>,
}

impl Profile {
    /// Read and validate a profile file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid profile {}", path.display()))
    }

    /// Parse and validate profile text.
    pub fn parse(content: &str) -> Result<Self> {
        let profile: Self = toml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() && self.run.is_none() {
            bail!("profile has no [[channel]] entries and no [run] section");
        }
        for params in &self.channels {
            params.validate()?;
        }
        if let Some(channels) = self.run.as_ref().and_then(|r| r.channels.as_ref()) {
            if channels.is_empty() {
                bail!("[run] channels is empty");
            }
            if let Some(ch) = channels.iter().find(|&&ch| ch > MAX_CHANNEL) {
                bail!("[run] channel {ch} out of range 0-{MAX_CHANNEL}");
            }
        }
        Ok(())
    }

    /// Requests in execution order.
    pub fn requests(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .channels
            .iter()
            .copied()
            .map(Request::SetConfig)
            .collect();

        if let Some(run) = &self.run {
            let mask = run
                .channels
                .as_ref()
                .map(|channels| channels.iter().copied().collect::<ChannelMask>());
            requests.push(match run.op {
                BatchOp::Sync => Request::Synchronous(mask),
                BatchOp::Control => Request::Control(mask),
            });
        }

        requests
    }
}
