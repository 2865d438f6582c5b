use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use crate::camera::FacingMode;
use crate::decode::{DecodeOptions, InversionAttempts};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordsSettings {
    /// Realtime database root, e.g. `https://example-default-rtdb.firebaseio.com`.
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSettings {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerSettings {
    pub poll_interval_ms: u64,
    /// Upper bound a single tick waits on the decoder before moving on.
    pub decode_timeout_ms: u64,
    pub facing_mode: FacingMode,
    pub inversion: InversionAttempts,
    pub records: Option<RecordsSettings>,
    pub verification: Option<VerificationSettings>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            decode_timeout_ms: 2_000,
            facing_mode: FacingMode::Environment,
            inversion: InversionAttempts::DontInvert,
            records: None,
            verification: None,
        }
    }
}

impl ScannerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            inversion: self.inversion,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("pollIntervalMs must be greater than zero"));
        }
        if self.decode_timeout_ms == 0 {
            return Err(anyhow!("decodeTimeoutMs must be greater than zero"));
        }
        Ok(())
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScannerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("ignoring malformed settings at {}: {err}", path.display());
                ScannerSettings::default()
            })
        } else {
            ScannerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn scanner(&self) -> ScannerSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_scanner(&self, settings: ScannerSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &ScannerSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("medscan-settings-{}", uuid::Uuid::new_v4()))
            .join("settings.json")
    }

    #[test]
    fn missing_file_yields_defaults() {
        let store = SettingsStore::new(temp_path()).unwrap();
        let settings = store.scanner();
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.facing_mode, FacingMode::Environment);
        assert!(settings.records.is_none());
    }

    #[test]
    fn update_persists_camel_case_json() {
        let path = temp_path();
        let store = SettingsStore::new(path.clone()).unwrap();
        let mut settings = store.scanner();
        settings.poll_interval_ms = 250;
        settings.records = Some(RecordsSettings {
            base_url: "https://records.example".into(),
            auth_token: None,
        });
        store.update_scanner(settings.clone()).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"pollIntervalMs\": 250"));

        let reloaded = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reloaded.scanner(), settings);

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn partial_and_malformed_files_fall_back() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        fs::write(&path, r#"{ "facingMode": "user" }"#).unwrap();
        let partial = SettingsStore::new(path.clone()).unwrap().scanner();
        assert_eq!(partial.facing_mode, FacingMode::User);
        assert_eq!(partial.decode_timeout_ms, 2_000);

        fs::write(&path, "not json").unwrap();
        let malformed = SettingsStore::new(path.clone()).unwrap().scanner();
        assert_eq!(malformed, ScannerSettings::default());

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn zero_interval_is_rejected() {
        let store = SettingsStore::new(temp_path()).unwrap();
        let mut settings = store.scanner();
        settings.poll_interval_ms = 0;
        assert!(store.update_scanner(settings).is_err());
    }
}
