use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use tokio::io::AsyncWrite;

use crate::error::Result;
use crate::record::{
    guess_content_type, join_key, normalize_base, relative_path, ObjectDescriptor,
};

/// Conditional read parameters forwarded to the store / 条件读取参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Return 304 when the object's etag equals this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_none_match: Option<String>,
    /// Return 412 unless the object's etag equals this value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
    /// RFC 2822 / RFC 3339 timestamp; 304 when the object is not newer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_modified_since: Option<String>,
    /// RFC 2822 / RFC 3339 timestamp; 412 when the object is newer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_unmodified_since: Option<String>,
    /// Byte range (end exclusive) / 范围读取
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range<u64>>,
}

impl ReadOptions {
    pub fn is_conditional(&self) -> bool {
        self.if_none_match.is_some()
            || self.if_match.is_some()
            || self.if_modified_since.is_some()
            || self.if_unmodified_since.is_some()
    }
}

/// Object write parameters / 写入参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// Canned ACL, e.g. `public-read`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
    /// User metadata (`x-amz-meta-*` on S3)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl WriteOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// One page of a prefix listing / 列表分页结果
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectDescriptor>,
    /// Continuation token for the next page, `None` when exhausted
    pub next: Option<String>,
}

/// Storage binding interface / 存储绑定接口
///
/// Keys are `/`-separated and relative to the bucket the binding was built
/// for. Failures that correspond to a store status must be reported as
/// [`crate::Error::Status`] so the read pipeline can classify them.
#[async_trait]
pub trait Binding: Send + Sync {
    /// Binding name / 绑定名称
    fn name(&self) -> &str;

    /// List objects whose key starts with `prefix`, one page at a time / 分页列出对象
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage>;

    /// Read a whole object (or the requested range) / 读取对象内容
    async fn read_file(&self, key: &str, options: &ReadOptions) -> Result<Bytes>;

    /// Create or overwrite an object / 写入对象
    async fn write_file(&self, key: &str, data: Bytes, options: &WriteOptions) -> Result<()>;

    /// Create a directory marker / 创建目录
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Open a writer; the object is committed on `shutdown` / 打开写入器
    async fn create_write_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>>;

    /// Whether `path` names an object or a non-empty directory / 判断是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        let key = path.trim_matches('/');
        if key.is_empty() {
            return Ok(!self.list_page("", None).await?.objects.is_empty());
        }
        // An exact key sorts first among the keys it prefixes
        let page = self.list_page(key, None).await?;
        if page.objects.iter().any(|o| o.key == key) {
            return Ok(true);
        }
        let dir = format!("{}/", key);
        Ok(!self.list_page(&dir, None).await?.objects.is_empty())
    }

    /// Recursively list keys under `path`, relative to it / 递归列出目录
    async fn readdirp(&self, path: &str) -> Result<Vec<String>> {
        let prefix = normalize_base(path);
        let mut keys = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.list_page(&prefix, continuation).await?;
            for object in page.objects {
                if object.key.ends_with('/') {
                    continue;
                }
                keys.push(relative_path(&object.key, &prefix));
            }
            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Copy every object under `from` to the same relative key under `to` / 复制目录
    async fn copy_dir(&self, from: &str, to: &str) -> Result<()> {
        for relative in self.readdirp(from).await? {
            let src = join_key(from, &relative);
            let dst = join_key(to, &relative);
            let data = self.read_file(&src, &ReadOptions::default()).await?;
            let options = WriteOptions::default().with_content_type(guess_content_type(&relative));
            self.write_file(&dst, data, &options).await?;
        }
        Ok(())
    }

    /// Open an object as a byte stream / 以字节流读取对象
    async fn create_read_stream(
        &self,
        key: &str,
        options: &ReadOptions,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        let data = self.read_file(key, options).await?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }
}

pub mod factory;
pub mod local;
pub mod s3;
#[cfg(test)]
pub(crate) mod memory;

pub use factory::{BindingFactory, BindingRegistry};
pub use local::LocalBinding;
pub use s3::S3Binding;

#[cfg(test)]
mod tests {
    use super::memory::MemoryBinding;
    use super::*;

    #[tokio::test]
    async fn test_exists_sees_directory_behind_sibling_keys() {
        let binding = MemoryBinding::new()
            .with_page_size(2)
            .with_object("a-1.txt", "")
            .with_object("a-2.txt", "")
            .with_object("a-3.txt", "")
            .with_object("a/x.txt", "x");

        assert!(binding.exists("a").await.unwrap());
        assert!(binding.exists("a/").await.unwrap());
        assert!(binding.exists("a-3.txt").await.unwrap());
        assert!(binding.exists("").await.unwrap());
        assert!(!binding.exists("a-").await.unwrap());
        assert!(!binding.exists("b").await.unwrap());
    }
}
