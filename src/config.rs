//! Layered configuration for the orchestrator binary: defaults → `erasure.toml`
//! → environment variables (mirrors `forge_config.rs`'s file-then-env
//! layering; `erasure-runtime::EngineConfig` stays a plain deserializable
//! struct and this module owns the actual sourcing).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use erasure_runtime::EngineConfig;
use serde::{Deserialize, Serialize};

fn default_db_path() -> String {
    ".erasure/state.db".to_string()
}

fn default_signing_key_path() -> Option<String> {
    None
}

/// The complete `erasure.toml` structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorToml {
    /// Path to the sqlite state file, relative to the working directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Path to a 32-byte raw ed25519 signing key. Unset generates an
    /// ephemeral key at startup (fine for local runs, not for production
    /// where signatures must stay verifiable across restarts).
    #[serde(default = "default_signing_key_path")]
    pub signing_key_path: Option<String>,
    /// Retry, worker-pool, and zombie-scan tuning (spec.md §6).
    #[serde(default)]
    pub engine: EngineConfig,
}

impl OrchestratorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).context("failed to parse erasure.toml")
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Resolved configuration: file settings with environment-variable overrides
/// applied (env wins over file, matching `ForgeToml::claude_cmd`'s
/// file-then-env precedence).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub db_path: PathBuf,
    pub signing_key_path: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl OrchestratorConfig {
    /// Loads `.env` (if present), then `config_path` (or its default
    /// location), then applies `ERASURE_*` environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("erasure.toml"));
        let toml = OrchestratorToml::load_or_default(&path)?;

        let db_path = std::env::var("ERASURE_DB_PATH")
            .unwrap_or(toml.db_path)
            .into();
        let signing_key_path = std::env::var("ERASURE_SIGNING_KEY_PATH")
            .ok()
            .or(toml.signing_key_path)
            .map(PathBuf::from);

        Ok(Self {
            db_path,
            signing_key_path,
            engine: toml.engine,
        })
    }
}
