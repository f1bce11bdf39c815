//! Facade configuration / 配置模块
//!
//! Loaded from a JSON file; a default file is created on first run.
//!
//! ```json
//! {
//!   "context": "my-bucket",
//!   "binding": { "type": "s3", "region": "eu-west-1" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Facade configuration / 文件系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    /// Bucket / root identifier, fixed for the facade's lifetime / 存储桶
    pub context: String,
    /// Binding section; S3 with `bucket = context` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingConfig>,
}

/// Binding section / 绑定配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(rename = "type")]
    pub binding_type: String,
    /// Binding-specific fields, handed to the factory as-is
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Default for FsConfig {
    fn default() -> Self {
        let mut options = Map::new();
        options.insert("root".to_string(), Value::String("data".to_string()));
        Self {
            context: "default".to_string(),
            binding: Some(BindingConfig {
                binding_type: "local".to_string(),
                options,
            }),
        }
    }
}

impl FsConfig {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            binding: None,
        }
    }

    pub fn with_binding(mut self, binding_type: &str, options: Value) -> Self {
        let options = match options {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.binding = Some(BindingConfig {
            binding_type: binding_type.to_string(),
            options,
        });
        self
    }

    /// Reject configs the facade cannot be built from / 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.context.trim().is_empty() {
            return Err(Error::Config("context is required".to_string()));
        }
        if let Some(binding) = &self.binding {
            if binding.binding_type.trim().is_empty() {
                return Err(Error::Config("binding.type is required".to_string()));
            }
        }
        Ok(())
    }
}

/// Default config file path / 获取配置文件路径
pub fn default_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists
/// 加载配置文件，不存在则创建默认配置
pub fn load_config(path: &Path) -> Result<FsConfig> {
    if !path.exists() {
        let config = FsConfig::default();
        save_config(path, &config)?;
        tracing::info!("Created default configuration at {:?}", path);
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)?;
    let config: FsConfig = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {:?}: {}", path, e)))?;
    config.validate()?;
    tracing::info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(path: &Path, config: &FsConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
