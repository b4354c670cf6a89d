//! Server configuration.
//!
//! Loaded from a TOML file given with `--config` or `MCPXCODE_CONFIG`. Every
//! field is optional; without a file the defaults are used.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    catalog::{Family, ToolDescriptor},
    invoke::InvokeOptions,
    normalize::NormalizeLimits,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name reported to MCP clients.
    pub name: String,
    /// Time a process gets to exit after SIGTERM before it is killed.
    pub grace_period_ms: u64,
    /// Bytes kept per output stream.
    pub max_output_bytes: usize,
    /// Lines kept by the `binary-summary` output format.
    pub summary_lines: usize,
    /// Exported as `DEVELOPER_DIR` to select an Xcode installation.
    pub developer_dir: Option<PathBuf>,
    pub programs: Programs,
    /// Per-tool timeout overrides in seconds, keyed by tool name.
    pub timeouts: HashMap<String, u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "mcpxcode".to_string(),
            grace_period_ms: 2_000,
            max_output_bytes: 4 * 1024 * 1024,
            summary_lines: 200,
            developer_dir: None,
            programs: Programs::default(),
            timeouts: HashMap::new(),
        }
    }
}

/// Executables run for each tool family.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Programs {
    pub xcrun: String,
    pub xctrace: String,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            xcrun: Family::Xcrun.default_program().to_string(),
            xctrace: Family::Xctrace.default_program().to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            log::debug!("no config file given, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml_edit::de::from_str(content)?;
        if config.max_output_bytes == 0 {
            anyhow::bail!("max_output_bytes must be greater than zero");
        }
        if config.timeouts.values().any(|secs| *secs == 0) {
            anyhow::bail!("timeouts must be at least one second");
        }
        Ok(config)
    }

    pub fn program(&self, family: Family) -> &str {
        match family {
            Family::Xcrun => &self.programs.xcrun,
            Family::Xctrace => &self.programs.xctrace,
        }
    }

    /// Timeout for `descriptor` unless the caller overrides it.
    pub fn timeout_for(&self, descriptor: &ToolDescriptor) -> Duration {
        self.timeouts
            .get(&descriptor.name)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(descriptor.timeout)
    }

    pub fn invoke_options(&self, timeout: Duration) -> InvokeOptions {
        let env = self
            .developer_dir
            .iter()
            .map(|dir| ("DEVELOPER_DIR".to_string(), dir.display().to_string()))
            .collect();
        InvokeOptions {
            timeout,
            grace_period: Duration::from_millis(self.grace_period_ms),
            max_output_bytes: self.max_output_bytes,
            env,
        }
    }

    pub fn normalize_limits(&self) -> NormalizeLimits {
        NormalizeLimits {
            summary_lines: self.summary_lines,
            ..NormalizeLimits::default()
        }
    }
}
