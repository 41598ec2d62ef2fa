use crate::core::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 播放器配置 - 显式构造、按值注入的键值存储
///
/// 引擎只通过 get/set 消费配置，不关心持久化格式。
/// load/save 使用 JSON 文件。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerConfig {
    entries: BTreeMap<String, String>,
}

impl PlayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文件加载配置；文件不存在时返回空配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("配置文件不存在，使用默认配置: {}", path.display());
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)?;
        match serde_json::from_str(&text) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("配置文件解析失败，使用默认配置: {}", e);
                Ok(Self::new())
            }
        }
    }

    /// 保存配置到 JSON 文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| crate::core::PlayerError::Other(format!("配置序列化失败: {}", e)))?;
        std::fs::write(path.as_ref(), text)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    /// 读取 f64 值，解析失败时回退默认值
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }
}
