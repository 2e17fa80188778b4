use std::path::Path;
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a JSON file
///
/// Loaded once at startup; the snapshot is shared read-only.
#[derive(Clone)]
pub struct ConfigStore {
    config: Arc<AppConfig>,
}

impl ConfigStore {
    /// Open the store, writing defaults if the file does not exist yet
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let config = Self::load_config(path).await?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    async fn load_config(path: &Path) -> Result<AppConfig> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No configuration at {}, writing defaults", path.display());
                let config = AppConfig::default();
                Self::save_config(path, &config).await?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Get current configuration
    pub fn get(&self) -> Arc<AppConfig> {
        self.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_written_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb-gadgetd.json");

        let store = ConfigStore::new(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.get().gadget.disconnect_wait_ms, 50);

        let reopened = ConfigStore::new(&path).await.unwrap();
        assert_eq!(*reopened.get(), *store.get());
    }

    #[tokio::test]
    async fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb-gadgetd.json");
        tokio::fs::write(&path, r#"{"web":{"http_port":9000}}"#)
            .await
            .unwrap();

        let store = ConfigStore::new(&path).await.unwrap();
        let config = store.get();
        assert_eq!(config.web.http_port, 9000);
        assert_eq!(config.web.bind_address, "127.0.0.1");
        assert_eq!(config.tuning.medium_core, "4");
    }

    #[tokio::test]
    async fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb-gadgetd.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        assert!(matches!(
            ConfigStore::new(&path).await,
            Err(AppError::Config(_))
        ));
    }
}
