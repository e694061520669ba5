//! KDF cost configuration
//!
//! Cost parameters live in a plain JSON file. They are read for every
//! encrypt call; decryption uses the values embedded in the envelope.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::crypto::CostParameters;
use crate::error::Result;

/// Supplier of the cost parameters used for new encryptions
pub trait CostParameterSource: Send + Sync {
    /// Current parameters, read once per encrypt call
    fn cost_parameters(&self) -> CostParameters;

    /// Re-read the underlying configuration. Called on configuration reload.
    fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

impl CostParameterSource for CostParameters {
    fn cost_parameters(&self) -> CostParameters {
        *self
    }
}

/// Crypto settings file contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CryptoSettings {
    /// Argon2 memory cost in KiB
    pub memory: u32,
    /// Argon2 iterations
    pub iterations: u32,
    /// Argon2 lanes
    pub lanes: u32,
}

impl Default for CryptoSettings {
    fn default() -> Self {
        let defaults = CostParameters::default();
        Self {
            memory: defaults.memory_cost,
            iterations: defaults.iterations,
            lanes: defaults.lanes,
        }
    }
}

impl CryptoSettings {
    pub fn cost_parameters(&self) -> CostParameters {
        CostParameters::new(self.memory, self.iterations, self.lanes)
    }

    /// Reject values Argon2id cannot run with
    pub fn validate(&self) -> Result<()> {
        self.cost_parameters().validate()
    }
}

impl From<CostParameters> for CryptoSettings {
    fn from(params: CostParameters) -> Self {
        Self {
            memory: params.memory_cost,
            iterations: params.iterations,
            lanes: params.lanes,
        }
    }
}

/// In-memory cost parameters that can be swapped at runtime
#[derive(Debug)]
pub struct SharedCostParameters {
    params: RwLock<CostParameters>,
}

impl SharedCostParameters {
    pub fn new(params: CostParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params: RwLock::new(params),
        })
    }

    /// Replace the parameters; takes effect for the next encrypt call
    pub fn set(&self, params: CostParameters) -> Result<()> {
        params.validate()?;
        *self.params.write().unwrap_or_else(PoisonError::into_inner) = params;
        Ok(())
    }
}

impl CostParameterSource for SharedCostParameters {
    fn cost_parameters(&self) -> CostParameters {
        *self.params.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// File-backed settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: RwLock<CryptoSettings>,
}

impl SettingsManager {
    /// Load `crypto-settings.json` from the given directory
    pub fn new(config_dir: &Path) -> Result<Self> {
        Self::with_file(config_dir.join("crypto-settings.json"))
    }

    /// Load from an explicit file path; a missing file yields defaults
    pub fn with_file(settings_file: PathBuf) -> Result<Self> {
        let settings = Self::load_from_file(&settings_file)?;
        Ok(Self {
            settings_file,
            settings: RwLock::new(settings),
        })
    }

    /// Load and validate settings from file
    fn load_from_file(path: &Path) -> Result<CryptoSettings> {
        if !path.exists() {
            debug!("No crypto settings file found, using defaults");
            return Ok(CryptoSettings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: CryptoSettings = serde_json::from_str(&contents)?;
        settings.validate()?;
        debug!("Loaded crypto settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.get())?;

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        std::fs::write(&temp_path, &contents)?;
        std::fs::rename(&temp_path, &self.settings_file)?;

        debug!("Saved crypto settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> CryptoSettings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate, apply and save new settings
    pub fn update(&self, settings: CryptoSettings) -> Result<()> {
        settings.validate()?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        self.save()
    }

    pub fn settings_file(&self) -> &Path {
        &self.settings_file
    }
}

impl CostParameterSource for SettingsManager {
    fn cost_parameters(&self) -> CostParameters {
        self.get().cost_parameters()
    }

    /// Re-read the file. On error the previous settings stay in effect.
    fn refresh(&self) -> Result<()> {
        let settings = Self::load_from_file(&self.settings_file)?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        Ok(())
    }
}

impl std::fmt::Debug for SettingsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager")
            .field("settings_file", &self.settings_file)
            .field("settings", &self.get())
            .finish()
    }
}

impl From<CryptoSettings> for CostParameters {
    fn from(settings: CryptoSettings) -> Self {
        settings.cost_parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path()).unwrap();

        let settings = manager.get();
        assert_eq!(settings.memory, 65536);
        assert_eq!(settings.iterations, 3);
        assert_eq!(settings.lanes, 4);
    }

    #[test]
    fn test_settings_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let manager = SettingsManager::new(temp_dir.path()).unwrap();
            manager
                .update(CryptoSettings {
                    memory: 16384,
                    iterations: 2,
                    lanes: 1,
                })
                .unwrap();
        }

        let manager = SettingsManager::new(temp_dir.path()).unwrap();
        assert_eq!(manager.cost_parameters(), CostParameters::new(16384, 2, 1));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crypto-settings.json");
        std::fs::write(&path, r#"{ "iterations": 5 }"#).unwrap();

        let manager = SettingsManager::with_file(path).unwrap();
        assert_eq!(manager.cost_parameters(), CostParameters::new(65536, 5, 4));
    }

    #[test]
    fn test_invalid_settings_rejected_at_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crypto-settings.json");
        std::fs::write(&path, r#"{ "memory": 8192, "iterations": 1, "lanes": 0 }"#).unwrap();

        let err = SettingsManager::with_file(path).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_unparseable_settings_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crypto-settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            SettingsManager::with_file(path),
            Err(CryptoError::ConfigFormat(_))
        ));
    }

    #[test]
    fn test_refresh_picks_up_changes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crypto-settings.json");
        let manager = SettingsManager::with_file(path.clone()).unwrap();

        std::fs::write(&path, r#"{ "memory": 8192, "iterations": 1, "lanes": 1 }"#).unwrap();
        manager.refresh().unwrap();
        assert_eq!(manager.cost_parameters(), CostParameters::new(8192, 1, 1));

        // A broken file leaves the last good settings in place
        std::fs::write(&path, r#"{ "memory": 0 }"#).unwrap();
        assert!(manager.refresh().is_err());
        assert_eq!(manager.cost_parameters(), CostParameters::new(8192, 1, 1));
    }

    #[test]
    fn test_shared_parameters() {
        let shared = SharedCostParameters::new(CostParameters::new(8192, 1, 1)).unwrap();
        shared.set(CostParameters::new(16384, 2, 2)).unwrap();
        assert_eq!(shared.cost_parameters(), CostParameters::new(16384, 2, 2));

        assert!(shared.set(CostParameters::new(8192, 0, 1)).is_err());
        assert_eq!(shared.cost_parameters(), CostParameters::new(16384, 2, 2));
    }
}
