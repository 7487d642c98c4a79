//! TOML configuration for look-ahead hosts.
//!
//! Any `Deserialize` type can be read from disk through [`ConfigLoader`].
//! [`ReplayConfig`] is the full document consumed by the replay tool: card
//! link settings plus one table per coordinate system with its context and
//! per-FIFO look-ahead configuration.
//!
//! ```rust,no_run
//! use crd_common::config::{ConfigLoader, ReplayConfig};
//! use std::path::Path;
//!
//! let cfg = ReplayConfig::load(Path::new("config/replay.toml")).unwrap();
//! cfg.validate().unwrap();
//! ```

use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::consts::{CRDSYS_MAX, DEFAULT_RETRY_LIMIT, FIFO_PER_CRD, LOOKAHEAD_CAPACITY};
use crate::crd::prm::{CrdPrm, LookAheadPrm};

/// Configuration loading failures.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Configuration file not found")]
    FileNotFound,

    /// I/O or TOML syntax failure.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Parsed but semantically invalid.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log verbosity, lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// `[shared]` table common to every host binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance name used in log output.
    pub service_name: String,
}

impl SharedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a TOML document into any deserializable type.
///
/// Missing files map to [`ConfigError::FileNotFound`]; read and syntax
/// failures map to [`ConfigError::ParseError`]. Semantic checks are left to
/// the type's own `validate()`.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound,
            _ => ConfigError::ParseError(e.to_string()),
        })?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Card link ──────────────────────────────────────────────────────

fn default_retry_limit() -> u8 {
    DEFAULT_RETRY_LIMIT
}

/// `[card]` table: link identity and dispatch policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardConfig {
    #[serde(default)]
    pub card_id: u8,

    /// Resends after a Timeout/Nak before the link is declared failed.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u8,

    /// Resident count that triggers an opportunistic drain. Absent means
    /// drain only on flush or a full ring.
    #[serde(default)]
    pub high_water: Option<u16>,
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            card_id: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
            high_water: None,
        }
    }
}

impl CardConfig {
    pub const MAX_RETRY_LIMIT: u8 = 10;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_limit > Self::MAX_RETRY_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "retry_limit {} exceeds {}",
                self.retry_limit,
                Self::MAX_RETRY_LIMIT
            )));
        }
        match self.high_water {
            Some(hw) if hw == 0 || hw as usize > LOOKAHEAD_CAPACITY => Err(
                ConfigError::ValidationError(format!(
                    "high_water {hw} outside 1..={LOOKAHEAD_CAPACITY}"
                )),
            ),
            _ => Ok(()),
        }
    }
}

// ─── Coordinate systems ─────────────────────────────────────────────

/// One `[[crd]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrdConfig {
    /// Coordinate-system index on the card.
    pub index: u8,
    pub prm: CrdPrm,
    /// Look-ahead configuration per FIFO, in FIFO order.
    pub fifo: Vec<LookAheadPrm, FIFO_PER_CRD>,
}

impl CrdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ctx = |msg: String| ConfigError::ValidationError(format!("crd {}: {msg}", self.index));
        if self.index as usize >= CRDSYS_MAX {
            return Err(ctx(format!("index outside 0..{CRDSYS_MAX}")));
        }
        self.prm.validate().map_err(ctx)?;
        if self.fifo.is_empty() {
            return Err(ctx("no look-ahead FIFO configured".to_string()));
        }
        for (i, la) in self.fifo.iter().enumerate() {
            la.validate()
                .and_then(|_| la.covers(self.prm.dimension))
                .map_err(|e| ctx(format!("fifo {i}: {e}")))?;
        }
        Ok(())
    }
}

/// Complete replay tool configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "crd-replay"
///
/// [card]
/// card_id = 1
/// retry_limit = 3
/// high_water = 150
///
/// [[crd]]
/// index = 0
/// [crd.prm]
/// dimension = 2
/// profile = [1, 2, 0, 0, 0, 0, 0, 0]
/// syn_vel_max = 200.0
/// syn_acc_max = 10.0
///
/// [[crd.fifo]]
/// depth = 200
/// axes = [
///     { speed_max = 200.0, acc_max = 10.0, max_step_speed = 2.0, scale = 1.0 },
///     { speed_max = 200.0, acc_max = 10.0, max_step_speed = 2.0, scale = 1.0 },
/// ]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub card: CardConfig,
    pub crd: Vec<CrdConfig, CRDSYS_MAX>,
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.card.validate()?;
        if self.crd.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[crd]] table is required".to_string(),
            ));
        }
        let mut seen = [false; CRDSYS_MAX];
        for c in &self.crd {
            c.validate()?;
            let slot = &mut seen[c.index as usize];
            if *slot {
                return Err(ConfigError::ValidationError(format!(
                    "crd {} configured twice",
                    c.index
                )));
            }
            *slot = true;
        }
        Ok(())
    }

    /// Configuration of coordinate system `index`.
    pub fn crd(&self, index: u8) -> Option<&CrdConfig> {
        self.crd.iter().find(|c| c.index == index)
    }
}
