//! Server configuration, read from a JSON file and injected explicitly
//! wherever it is needed; there is no global configuration state.

use {
    anyhow::Context,
    serde::{Deserialize, Serialize},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
};

use crate::defaults;
use crate::transport::TlsConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct Config {
    #[serde(default = "defaults::server_port")]
    pub port: u16,
    #[serde(default = "defaults::db_root_path")]
    pub db_root_path: PathBuf,

    // Per-format object directories; unset ones land under db_root_path.
    #[serde(default)]
    pub storage_png: Option<PathBuf>,
    #[serde(default)]
    pub storage_jpg: Option<PathBuf>,
    #[serde(default)]
    pub storage_tdb: Option<PathBuf>,
    #[serde(default)]
    pub storage_bin: Option<PathBuf>,
    #[serde(default)]
    pub storage_mp4: Option<PathBuf>,
    #[serde(default)]
    pub storage_avi: Option<PathBuf>,
    #[serde(default)]
    pub storage_mov: Option<PathBuf>,
    #[serde(default)]
    pub descriptor_path: Option<PathBuf>,
    #[serde(default)]
    pub blob_path: Option<PathBuf>,

    #[serde(default)]
    pub certificate: Option<PathBuf>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub ca_certificate: Option<PathBuf>,

    #[serde(default = "defaults::autoreplicate_interval")]
    pub autoreplicate_interval: u64,
    #[serde(default = "defaults::autoreplication_unit")]
    pub autoreplication_unit: String,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,

    #[serde(default = "defaults::max_simultaneous_clients")]
    pub max_simultaneous_clients: usize,
    #[serde(default = "defaults::backend_pool_size")]
    pub backend_pool_size: usize,
    #[serde(default = "defaults::transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    #[serde(default = "defaults::expiration_sweep_interval")]
    pub expiration_sweep_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty configuration must deserialize")
    }
}

impl Config {
    /// Load the configuration from a JSON file, making contained paths
    /// relative to the file's directory.
    pub async fn load(config_path: impl AsRef<Path>) -> Result<Config, anyhow::Error> {
        let text = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("could not read {:?}", config_path.as_ref()))?;
        let mut config: Config =
            serde_json::from_str(&text).context("could not parse configuration")?;

        let config_dir = config_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.relativize(&config_dir);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.port == 0 {
            anyhow::bail!("port must be in (0, 65535]");
        }
        match self.autoreplication_unit.as_str() {
            "s" | "m" | "h" => {}
            unit => anyhow::bail!("unknown autoreplication unit {:?} (expected s, m or h)", unit),
        }
        if self.backend_pool_size == 0 || self.max_simultaneous_clients == 0 {
            anyhow::bail!("pool sizes must be nonzero");
        }
        Ok(())
    }

    fn relativize(&mut self, base: &Path) {
        if self.db_root_path.is_relative() {
            self.db_root_path = base.join(&self.db_root_path);
        }
        for path in [
            &mut self.storage_png,
            &mut self.storage_jpg,
            &mut self.storage_tdb,
            &mut self.storage_bin,
            &mut self.storage_mp4,
            &mut self.storage_avi,
            &mut self.storage_mov,
            &mut self.descriptor_path,
            &mut self.blob_path,
            &mut self.certificate,
            &mut self.private_key,
            &mut self.ca_certificate,
            &mut self.backup_path,
        ]
        .iter_mut()
        .filter_map(|p| p.as_mut())
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// TLS material for the listening socket.
    pub fn tls(&self) -> TlsConfig {
        TlsConfig {
            certificate: self.certificate.clone(),
            private_key: self.private_key.clone(),
            ca_certificate: self.ca_certificate.clone(),
        }
    }

    /// The replication period, when automatic replication is enabled.
    pub fn replication_interval(&self) -> Option<Duration> {
        if self.autoreplicate_interval == 0 || self.backup_path.is_none() {
            return None;
        }
        let seconds = match self.autoreplication_unit.as_str() {
            "m" => self.autoreplicate_interval * 60,
            "h" => self.autoreplicate_interval * 3600,
            _ => self.autoreplicate_interval,
        };
        Some(Duration::from_secs(seconds))
    }

    /// The expiration sweep period, when the sweep is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        if self.expiration_sweep_interval == 0 {
            None
        } else {
            Some(Duration::from_secs(self.expiration_sweep_interval))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let config = Config::default();
        assert_eq!(config.port, defaults::server_port());
        assert_eq!(config.backend_pool_size, defaults::backend_pool_size());
        assert!(config.tls().enabled() == false);
        assert!(config.replication_interval().is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Config, _> = serde_json::from_str(r#"{"not_a_field": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn replication_units() {
        let mut config = Config::default();
        config.autoreplicate_interval = 2;
        config.backup_path = Some(PathBuf::from("backups"));
        config.autoreplication_unit = "m".to_string();
        assert_eq!(
            config.replication_interval(),
            Some(Duration::from_secs(120))
        );
        config.autoreplication_unit = "h".to_string();
        assert_eq!(
            config.replication_interval(),
            Some(Duration::from_secs(7200))
        );
    }
}
