//! 应用配置和持久化
//!
//! 注册表后端、写入端后端和命令通道 socket 的设置，保存在
//! `~/.config/hardwarelab/settings.toml`。

use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapter::{AdapterOptions, WriteMode};
use crate::sink::firestore::{DEFAULT_ENDPOINT, FirestoreConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Bluez,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    Firestore,
    #[default]
    Memory,
}

/// 注册表设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub backend: RegistryBackend,
    /// 适配器名称（如 `hci0`），为空则使用默认适配器
    pub adapter: Option<String>,
    /// 单次发现的持续时间（秒）
    pub discovery_secs: u64,
    /// 广播通道容量
    pub broadcast_capacity: usize,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Bluez,
            adapter: None,
            discovery_secs: 12,
            broadcast_capacity: 64,
        }
    }
}

impl RegistrySettings {
    pub fn discovery_window(&self) -> Duration {
        Duration::from_secs(self.discovery_secs.max(1))
    }
}

/// 启用 Firestore 写入端的配置提示
pub const FIRESTORE_HINT: &str =
    "set `backend = \"firestore\"` and `project_id` under [sink] in settings.toml";

/// 写入端设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    pub backend: SinkBackend,
    pub endpoint: String,
    pub project_id: String,
    pub database: String,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub write_mode: WriteMode,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            backend: SinkBackend::Memory,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project_id: String::new(),
            database: "(default)".to_string(),
            api_key: None,
            auth_token: None,
            write_mode: WriteMode::Detach,
        }
    }
}

impl SinkSettings {
    pub fn firestore(&self) -> FirestoreConfig {
        FirestoreConfig {
            endpoint: self.endpoint.clone(),
            project_id: self.project_id.clone(),
            database: self.database.clone(),
            api_key: self.api_key.clone(),
            auth_token: self.auth_token.clone(),
        }
    }
}

/// 应用设置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppSettings {
    /// 命令通道 socket 路径，为空则使用 `$XDG_RUNTIME_DIR/hardwarelab.sock`
    pub socket_path: Option<PathBuf>,
    /// 详细日志模式
    pub verbose: bool,
    pub registry: RegistrySettings,
    pub sink: SinkSettings,
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hardwarelab")
            .join("settings.toml")
    }

    /// 从默认路径加载设置
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 加载设置（文件不存在或无法解析时使用默认值）
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置到默认路径
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(crate::channel::socket_path)
    }

    pub fn adapter_options(&self) -> AdapterOptions {
        AdapterOptions {
            write_mode: self.sink.write_mode,
            event_capacity: self.registry.broadcast_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.registry.backend, RegistryBackend::Bluez);
        assert_eq!(settings.registry.discovery_secs, 12);
        assert_eq!(settings.sink.backend, SinkBackend::Memory);
        assert_eq!(settings.sink.write_mode, WriteMode::Detach);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: AppSettings = toml::from_str(
            r#"
            [sink]
            backend = "firestore"
            project_id = "hardwarelab"
            write_mode = "await"
            "#,
        )
        .unwrap();

        assert_eq!(settings.sink.backend, SinkBackend::Firestore);
        assert_eq!(settings.sink.write_mode, WriteMode::Await);
        assert_eq!(settings.sink.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.sink.firestore().project_id, "hardwarelab");
        assert_eq!(settings.registry.broadcast_capacity, 64);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("hardwarelab-no-such-settings.toml");
        let settings = AppSettings::load_from(&path);
        assert!(settings.socket_path.is_none());
        assert!(!settings.verbose);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir()
            .join(format!("hardwarelab-settings-{}", std::process::id()))
            .join("settings.toml");
        let mut settings = AppSettings::default();
        settings.registry.backend = RegistryBackend::Memory;
        settings.registry.adapter = Some("hci1".to_string());

        settings.save_to(&path).unwrap();
        let loaded = AppSettings::load_from(&path);

        assert_eq!(loaded.registry.backend, RegistryBackend::Memory);
        assert_eq!(loaded.registry.adapter.as_deref(), Some("hci1"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
