//! Local directory binding / 本地目录绑定
//!
//! Treats a directory on disk as a bucket: keys map to files below `root`,
//! directories are implicit. Conditional reads are evaluated against the
//! file's modification time and a synthetic etag.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tokio_util::io::ReaderStream;

use super::{Binding, ListPage, ReadOptions, WriteOptions};
use crate::error::{Error, Result, STATUS_NOT_MODIFIED, STATUS_PRECONDITION_FAILED};
use crate::record::ObjectDescriptor;

pub struct LocalBinding {
    root: PathBuf,
}

impl LocalBinding {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get root directory / 获取根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path below root, rejecting traversal / 规范化路径
    fn normalize_path(&self, key: &str) -> Result<PathBuf> {
        let key = key.replace('\\', "/");
        let mut full = self.root.clone();
        for component in Path::new(key.trim_start_matches('/')).components() {
            match component {
                Component::Normal(name) => full.push(name),
                Component::CurDir => {}
                _ => return Err(Error::InvalidPath(key.clone())),
            }
        }
        Ok(full)
    }

    fn key_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Collect every file key below root, sorted / 收集所有文件键
    async fn walk(&self) -> Result<Vec<(String, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    files.push((self.key_of(&entry.path()), metadata));
                }
            }
        }

        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    /// Open `key` after evaluating conditions, honoring the range / 打开文件读取器
    async fn open_reader(
        &self,
        key: &str,
        options: &ReadOptions,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let path = self.normalize_path(key)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| not_found(key, e))?;
        if metadata.is_dir() {
            return Err(Error::NotFound(key.to_string()));
        }
        self.check_conditions(key, &metadata, options)?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| not_found(key, e))?;
        match &options.range {
            Some(range) => {
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                Ok(Box::new(file.take(range.end.saturating_sub(range.start))))
            }
            None => Ok(Box::new(file)),
        }
    }

    fn check_conditions(
        &self,
        key: &str,
        metadata: &std::fs::Metadata,
        options: &ReadOptions,
    ) -> Result<()> {
        if !options.is_conditional() {
            return Ok(());
        }
        let etag = etag_of(metadata);
        let modified = modified_of(metadata);
        let unmodified_since = options.if_unmodified_since.as_deref().and_then(parse_http_date);
        let modified_since = options.if_modified_since.as_deref().and_then(parse_http_date);

        if let Some(expected) = &options.if_match {
            if expected != &etag && expected != "*" {
                let message = format!("{}: etag mismatch", key);
                return Err(Error::status(STATUS_PRECONDITION_FAILED, message));
            }
        }
        if let (Some(since), Some(modified)) = (unmodified_since, modified) {
            if modified > since {
                let message = format!("{}: modified since {}", key, since);
                return Err(Error::status(STATUS_PRECONDITION_FAILED, message));
            }
        }
        if let Some(current) = &options.if_none_match {
            if current == &etag || current == "*" {
                return Err(Error::status(STATUS_NOT_MODIFIED, format!("{}: etag unchanged", key)));
            }
        }
        if let (Some(since), Some(modified)) = (modified_since, modified) {
            if modified <= since {
                let message = format!("{}: not modified since {}", key, since);
                return Err(Error::status(STATUS_NOT_MODIFIED, message));
            }
        }
        Ok(())
    }
}

fn modified_of(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
}

/// Synthetic etag from mtime and size
pub(crate) fn etag_of(metadata: &std::fs::Metadata) -> String {
    let secs = modified_of(metadata).map(|t| t.timestamp()).unwrap_or(0);
    format!("\"{:x}-{:x}\"", secs, metadata.len())
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn not_found(key: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(key.to_string())
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl Binding for LocalBinding {
    fn name(&self) -> &str {
        "local"
    }

    /// The whole tree fits in one page; `continuation` is ignored.
    async fn list_page(&self, prefix: &str, _continuation: Option<String>) -> Result<ListPage> {
        let objects = self
            .walk()
            .await?
            .into_iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, metadata)| ObjectDescriptor {
                size: metadata.len(),
                last_modified: modified_of(&metadata).map(|t| t.to_rfc3339()),
                etag: Some(etag_of(&metadata)),
                content_type: None,
                key,
            })
            .collect();
        Ok(ListPage { objects, next: None })
    }

    async fn read_file(&self, key: &str, options: &ReadOptions) -> Result<Bytes> {
        let mut reader = self.open_reader(key, options).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(Bytes::from(data))
    }

    /// Chunked read straight from disk / 分块读取
    async fn create_read_stream(
        &self,
        key: &str,
        options: &ReadOptions,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let reader = self.open_reader(key, options).await?;
        Ok(ReaderStream::new(reader).map_err(Error::from).boxed())
    }

    async fn write_file(&self, key: &str, data: Bytes, options: &WriteOptions) -> Result<()> {
        let path = self.normalize_path(key)?;
        // Ensure parent directory exists / 确保父目录存在
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        tracing::debug!(
            "local write: key={}, size={}, content_type={}",
            key,
            data.len(),
            options.content_type_or_default()
        );
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.normalize_path(path)?;
        Ok(tokio::fs::try_exists(full).await?)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full = self.normalize_path(path)?;
        tokio::fs::create_dir_all(full).await?;
        Ok(())
    }

    async fn create_write_stream(
        &self,
        key: &str,
        _options: &WriteOptions,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        let path = self.normalize_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(Box::new(file))
    }
}
