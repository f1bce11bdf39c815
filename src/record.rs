//! Object descriptors and canonical file records / 对象描述与文件记录
//!
//! A descriptor names a remote object before its body is fetched; a merged
//! record is a descriptor plus the fetched body; a [`FileRecord`] is the
//! base-relative, file-like unit handed to callers and accepted by the
//! write-through stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Remote object metadata produced by the key matcher / 远程对象描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl ObjectDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: None,
            etag: None,
            content_type: None,
        }
    }
}

/// Descriptor plus the body of a successful read / 描述 + 对象内容
#[derive(Debug, Clone)]
pub struct MergedRecord {
    pub descriptor: ObjectDescriptor,
    pub body: Bytes,
}

/// Store metadata carried along with a file record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// Canonical file record / 规范文件记录
///
/// `path` is relative to `base` and never contains the bucket scope or the
/// base prefix. [`FileRecord::key`] rebuilds the store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub base: String,
    pub path: String,
    pub contents: Bytes,
    pub content_type: String,
    pub stat: FileStat,
}

impl FileRecord {
    /// Build a record from caller data, guessing the content type from `path`.
    pub fn new(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        let path = path.into().trim_start_matches('/').to_string();
        let contents = contents.into();
        let content_type = guess_content_type(&path);
        Self {
            base: String::new(),
            stat: FileStat {
                size: contents.len() as u64,
                ..Default::default()
            },
            path,
            contents,
            content_type,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Normalize a merged record against `base` / 规范化合并记录
    pub fn from_merged(merged: MergedRecord, base: &str) -> Self {
        let MergedRecord { descriptor, body } = merged;
        let base = normalize_base(base);
        let path = relative_path(&descriptor.key, &base);
        let content_type = descriptor
            .content_type
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| guess_content_type(&descriptor.key));

        Self {
            base,
            path,
            content_type,
            stat: FileStat {
                size: body.len() as u64,
                last_modified: descriptor.last_modified,
                etag: descriptor.etag,
            },
            contents: body,
        }
    }

    /// Store key this record was read from / 记录对应的对象键
    pub fn key(&self) -> String {
        join_key(&self.base, &self.path)
    }
}

/// Normalize a base to `""` or a `dir/` prefix / 规范化基础路径
pub fn normalize_base(base: &str) -> String {
    let trimmed = base.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Strip `base` (already normalized) from `key`. Separators inside the
/// remainder are kept, so `a//b.txt` under `a/` is `/b.txt`.
pub fn relative_path(key: &str, base: &str) -> String {
    key.strip_prefix(base).unwrap_or(key).to_string()
}

/// Join a destination base and a virtual path into a store key / 拼接对象键
///
/// Inverse of [`relative_path`]: `join_key(base, relative_path(key, base))`
/// gives back `key`.
pub fn join_key(base: &str, path: &str) -> String {
    let base = base.trim_matches('/');

    if base.is_empty() {
        path.trim_start_matches('/').to_string()
    } else if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

pub fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(key: &str, body: &'static str) -> MergedRecord {
        MergedRecord {
            descriptor: ObjectDescriptor::new(key),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base(""), "");
        assert_eq!(normalize_base("/"), "");
        assert_eq!(normalize_base("a"), "a/");
        assert_eq!(normalize_base("a/"), "a/");
        assert_eq!(normalize_base("/a/b/"), "a/b/");
    }

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("a/", "1.txt"), "a/1.txt");
        assert_eq!(join_key("a", "/1.txt"), "a//1.txt");
        assert_eq!(join_key("", "/1.txt"), "1.txt");
        assert_eq!(join_key("", "x/1.txt"), "x/1.txt");
        assert_eq!(join_key("/a/b/", "c/d.txt"), "a/b/c/d.txt");
        assert_eq!(join_key("a", ""), "a");
    }

    #[test]
    fn test_from_merged_strips_base() {
        let record = FileRecord::from_merged(merged("a/1.txt", "x"), "a/");
        assert_eq!(record.path, "1.txt");
        assert_eq!(record.base, "a/");
        assert_eq!(record.contents, Bytes::from_static(b"x"));
        assert_eq!(record.content_type, "text/plain");
        assert_eq!(record.stat.size, 1);
        assert_eq!(record.key(), "a/1.txt");
    }

    #[test]
    fn test_empty_segment_survives_round_trip() {
        let record = FileRecord::from_merged(merged("a//b.txt", "x"), "a/");
        assert_eq!(record.path, "/b.txt");
        assert_eq!(join_key("a/", &record.path), "a//b.txt");
        assert_eq!(record.key(), "a//b.txt");

        assert_eq!(relative_path("a/1.txt", "a/"), "1.txt");
        assert_eq!(relative_path("b/1.txt", "a/"), "b/1.txt");
    }

    #[test]
    fn test_from_merged_prefers_store_content_type() {
        let mut m = merged("img/logo", "png-bytes");
        m.descriptor.content_type = Some("image/png".to_string());
        m.descriptor.etag = Some("\"abc\"".to_string());
        let record = FileRecord::from_merged(m, "img");
        assert_eq!(record.path, "logo");
        assert_eq!(record.content_type, "image/png");
        assert_eq!(record.stat.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn test_unknown_extension_falls_back_to_octet_stream() {
        let record = FileRecord::new("blob.unknownext", Bytes::new());
        assert_eq!(record.content_type, DEFAULT_CONTENT_TYPE);
        let record = FileRecord::new("/index.html", "<p>").with_content_type("text/x-custom");
        assert_eq!(record.path, "index.html");
        assert_eq!(record.content_type, "text/x-custom");
    }
}
