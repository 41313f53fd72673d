//! # Application State
//!
//! Shared state handed to every handler. All escrow state lives behind
//! [`EscrowService`], which is cheap to clone and internally synchronized;
//! the API holds no entity state of its own.

use std::path::PathBuf;

use mesc_escrow::{EscrowError, EscrowService, TemplateCatalog};
use mesc_ledger::{AuditLedger, LedgerError};
use metrics_exporter_prometheus::PrometheusHandle;
use thiserror::Error;

/// Log output format for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid {
                var: "LOG_FORMAT",
                value: other.to_string(),
            }),
        }
    }
}

/// Errors raised while building configuration or state at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("failed to open audit ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to load template catalog: {0}")]
    Templates(#[from] EscrowError),
}

/// Application configuration.
///
/// Custom `Debug` redacts the auth secret.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. `None` runs in development mode.
    pub auth_token: Option<String>,
    /// JSON-lines file backing the audit ledger. `None` keeps it in memory.
    pub ledger_path: Option<PathBuf>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("ledger_path", &self.ledger_path)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            ledger_path: None,
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Read `PORT`, `AUTH_TOKEN`, `LEDGER_PATH`, and `LOG_FORMAT`.
    ///
    /// Empty variables count as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "PORT",
                value: raw,
            })?,
            None => 8080,
        };
        let log_format = match get("LOG_FORMAT") {
            Some(raw) => raw.parse()?,
            None => LogFormat::Text,
        };

        Ok(Self {
            port,
            auth_token: get("AUTH_TOKEN"),
            ledger_path: get("LEDGER_PATH").map(PathBuf::from),
            log_format,
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: EscrowService,
    pub config: AppConfig,
    /// Set by the binary once the Prometheus recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("escrows", &self.service.escrow_count())
            .field("ledger_entries", &self.service.ledger().len())
            .field("config", &self.config)
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}

impl AppState {
    /// In-memory ledger, seeded templates, default configuration.
    pub fn try_new() -> Result<Self, ConfigError> {
        Self::try_with_config(AppConfig::default())
    }

    /// Build state from `config`, replaying the JSON-lines ledger when
    /// `ledger_path` is set.
    ///
    /// Replay restores the audit log only. Escrows are not reconstructed
    /// from it.
    pub fn try_with_config(config: AppConfig) -> Result<Self, ConfigError> {
        let ledger = match &config.ledger_path {
            Some(path) => AuditLedger::open_jsonl(path)?,
            None => AuditLedger::in_memory(),
        };
        let service = EscrowService::new(ledger, TemplateCatalog::seeded()?);
        Ok(Self {
            service,
            config,
            prometheus: None,
        })
    }

    /// Attach the Prometheus handle rendered at `/metrics`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
