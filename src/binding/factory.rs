//! Binding factories / 绑定工厂
//!
//! A factory turns a JSON config section into a binding, so new back-ends can
//! be plugged in without touching the facade.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::local::LocalBinding;
use super::s3::{S3Binding, S3Config};
use super::Binding;
use crate::error::{Error, Result};

/// Binding factory trait / 绑定工厂 trait
pub trait BindingFactory: Send + Sync {
    /// Binding type name used in config / 绑定类型名称
    fn binding_type(&self) -> &'static str;

    /// Create a binding scoped to `context` / 创建绑定实例
    fn create_binding(&self, context: &str, config: Value) -> Result<Arc<dyn Binding>>;
}

/// S3 factory; `bucket` defaults to the context
pub struct S3BindingFactory;

impl BindingFactory for S3BindingFactory {
    fn binding_type(&self) -> &'static str {
        "s3"
    }

    fn create_binding(&self, context: &str, mut config: Value) -> Result<Arc<dyn Binding>> {
        if let Some(obj) = config.as_object_mut() {
            obj.entry("bucket")
                .or_insert_with(|| Value::String(context.to_string()));
        }
        let config: S3Config = serde_json::from_value(config)
            .map_err(|e| Error::Config(format!("invalid s3 binding config: {}", e)))?;
        Ok(Arc::new(S3Binding::new(config)?))
    }
}

/// Local directory factory; `root` defaults to the context
pub struct LocalBindingFactory;

impl BindingFactory for LocalBindingFactory {
    fn binding_type(&self) -> &'static str {
        "local"
    }

    fn create_binding(&self, context: &str, config: Value) -> Result<Arc<dyn Binding>> {
        let root = config
            .get("root")
            .and_then(|v| v.as_str())
            .unwrap_or(context);
        if root.is_empty() {
            return Err(Error::Config("local binding needs a root directory".to_string()));
        }

        let root = PathBuf::from(root);
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Arc::new(LocalBinding::new(root)))
    }
}

/// Registry of binding factories / 绑定工厂注册表
pub struct BindingRegistry {
    factories: HashMap<String, Box<dyn BindingFactory>>,
}

impl Default for BindingRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(S3BindingFactory));
        registry.register(Box::new(LocalBindingFactory));
        registry
    }
}

impl BindingRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory, replacing one of the same type / 注册工厂
    pub fn register(&mut self, factory: Box<dyn BindingFactory>) {
        let binding_type = factory.binding_type().to_string();
        self.factories.insert(binding_type.clone(), factory);
        tracing::debug!("Binding factory registered: {}", binding_type);
    }

    pub fn binding_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Build a binding of `binding_type` for `context` / 创建绑定
    pub fn create(
        &self,
        binding_type: &str,
        context: &str,
        config: Value,
    ) -> Result<Arc<dyn Binding>> {
        let factory = self
            .factories
            .get(binding_type)
            .ok_or_else(|| Error::Config(format!("binding type not found: {}", binding_type)))?;
        let binding = factory.create_binding(context, config)?;
        tracing::info!("Binding created: {} for context {}", binding_type, context);
        Ok(binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_registry_types() {
        assert_eq!(BindingRegistry::default().binding_types(), vec!["local", "s3"]);
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = BindingRegistry::default()
            .create("ftp", "bucket", json!({}))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_local_root_defaults_to_context() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bucket");
        let binding = BindingRegistry::default()
            .create("local", root.to_str().unwrap(), json!({}))
            .unwrap();
        assert_eq!(binding.name(), "local");
        assert!(root.is_dir());
    }

    #[test]
    fn test_s3_bucket_defaults_to_context() {
        let binding = BindingRegistry::default()
            .create(
                "s3",
                "assets",
                json!({
                    "endpoint": "http://localhost:9000",
                    "access_key_id": "minio",
                    "secret_access_key": "minio123",
                    "force_path_style": true
                }),
            )
            .unwrap();
        assert_eq!(binding.name(), "s3");
    }

    #[test]
    fn test_s3_config_type_errors_are_reported() {
        let err = BindingRegistry::default()
            .create("s3", "assets", json!({ "force_path_style": "yes" }))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
