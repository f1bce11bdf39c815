//! Remote filesystem facade / 远程文件系统门面
//!
//! Holds the bucket context and a shared binding handle. `src` and
//! `create_write_through_stream` run the streaming pipelines; the remaining
//! operations hand straight through to the binding.

use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::AsyncWrite;

use crate::binding::{Binding, BindingRegistry, ReadOptions, WriteOptions};
use crate::config::FsConfig;
use crate::error::Result;
use crate::pipeline::{self, RecordStream, SrcOptions, WriteThrough};

/// Remote filesystem / 远程文件系统
///
/// Cheap to clone; clones share the binding and run pipelines independently.
#[derive(Clone)]
pub struct RemoteFs {
    context: Arc<str>,
    binding: Arc<dyn Binding>,
}

impl std::fmt::Debug for RemoteFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFs")
            .field("context", &self.context)
            .field("binding", &self.binding.name())
            .finish()
    }
}

impl RemoteFs {
    pub fn new(context: impl Into<String>, binding: Arc<dyn Binding>) -> Self {
        let context: String = context.into();
        tracing::info!("RemoteFs ready: context={}, binding={}", context, binding.name());
        Self {
            context: Arc::from(context),
            binding,
        }
    }

    /// Build from config with the default binding registry
    pub fn from_config(config: &FsConfig) -> Result<Self> {
        Self::from_config_with(config, &BindingRegistry::default())
    }

    /// Build from config, resolving the binding through `registry` / 根据配置创建
    pub fn from_config_with(config: &FsConfig, registry: &BindingRegistry) -> Result<Self> {
        config.validate()?;
        let binding = match &config.binding {
            Some(section) => registry.create(
                &section.binding_type,
                &config.context,
                Value::Object(section.options.clone()),
            )?,
            None => registry.create("s3", &config.context, Value::Object(Default::default()))?,
        };
        Ok(Self::new(config.context.clone(), binding))
    }

    /// Bucket / root this filesystem is bound to / 获取根上下文
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn binding(&self) -> &Arc<dyn Binding> {
        &self.binding
    }

    /// Stream the objects matching `patterns` as file records / 按通配符读取
    pub fn src<S: AsRef<str>>(&self, patterns: &[S], options: SrcOptions) -> Result<RecordStream> {
        pipeline::src(self.binding.clone(), patterns, options)
    }

    /// Sink uploading records below `base` / 创建写入流
    pub fn create_write_through_stream(
        &self,
        base: impl Into<String>,
        options: WriteOptions,
    ) -> WriteThrough {
        WriteThrough::new(self.binding.clone(), base, options)
    }

    pub async fn read_file(&self, path: &str, options: &ReadOptions) -> Result<Bytes> {
        self.binding.read_file(path, options).await
    }

    pub async fn write_file(&self, path: &str, data: Bytes, options: &WriteOptions) -> Result<()> {
        self.binding.write_file(path, data, options).await
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.binding.mkdir(path).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.binding.exists(path).await
    }

    pub async fn readdirp(&self, path: &str) -> Result<Vec<String>> {
        self.binding.readdirp(path).await
    }

    pub async fn copy_dir(&self, from: &str, to: &str) -> Result<()> {
        self.binding.copy_dir(from, to).await
    }

    pub async fn create_read_stream(
        &self,
        path: &str,
        options: &ReadOptions,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        self.binding.create_read_stream(path, options).await
    }

    pub async fn create_write_stream(
        &self,
        path: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        self.binding.create_write_stream(path, options).await
    }
}
