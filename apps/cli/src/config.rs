use std::{fs, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::{Address, Commitment};
use url::Url;

pub const SETTINGS_FILE: &str = "counter.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub rpc_url: String,
    pub program_id: String,
    pub commitment: String,
    pub cluster: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".into(),
            program_id: "3YdxPVS9rGiu4btzh72zXphj1s6SUBSBfYnHYVhfdVuv".into(),
            commitment: "confirmed".into(),
            cluster: "devnet".into(),
        }
    }
}

/// Every key is optional in `counter.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    rpc_url: Option<String>,
    program_id: Option<String>,
    commitment: Option<String>,
    cluster: Option<String>,
}

/// Settings after parsing, ready for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub rpc_url: Url,
    pub program_id: Address,
    pub commitment: Commitment,
    pub cluster: String,
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    let path = Path::new(SETTINGS_FILE);
    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        apply_file_overrides(&mut settings, &raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_overrides(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.rpc_url {
        settings.rpc_url = v;
    }
    if let Some(v) = file_cfg.program_id {
        settings.program_id = v;
    }
    if let Some(v) = file_cfg.commitment {
        settings.commitment = v;
    }
    if let Some(v) = file_cfg.cluster {
        settings.cluster = v;
    }
    Ok(())
}

fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("COUNTER_RPC_URL") {
        settings.rpc_url = v;
    }
    if let Some(v) = var("APP__RPC_URL") {
        settings.rpc_url = v;
    }

    if let Some(v) = var("APP__PROGRAM_ID") {
        settings.program_id = v;
    }
    if let Some(v) = var("APP__COMMITMENT") {
        settings.commitment = v;
    }
    if let Some(v) = var("APP__CLUSTER") {
        settings.cluster = v;
    }
}

impl Settings {
    pub fn resolve(&self) -> anyhow::Result<ResolvedSettings> {
        let rpc_url = Url::parse(self.rpc_url.trim())
            .with_context(|| format!("invalid rpc url '{}'", self.rpc_url))?;
        if !matches!(rpc_url.scheme(), "http" | "https") {
            bail!("rpc url '{}' must use http or https", self.rpc_url);
        }

        let program_id = self
            .program_id
            .trim()
            .parse::<Address>()
            .context("invalid program id")?;
        let commitment = self
            .commitment
            .trim()
            .parse::<Commitment>()
            .map_err(anyhow::Error::msg)?;

        let cluster = self.cluster.trim();
        if cluster.is_empty() {
            bail!("cluster name must not be empty");
        }

        Ok(ResolvedSettings {
            rpc_url,
            program_id,
            commitment,
            cluster: cluster.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
