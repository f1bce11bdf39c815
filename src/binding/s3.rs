//! S3 binding / S3绑定
//!
//! - Keys are resolved below `root_path` inside the configured bucket
//! - Non-2xx responses become `Error::Status` so 304/412 can be classified
//! - Write streams use multipart upload, at most 2 chunks buffered in memory

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::Future;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::Part;
use s3::Region;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};

use super::{Binding, ListPage, ReadOptions, WriteOptions};
use crate::error::{Error, Result};
use crate::record::ObjectDescriptor;

const CHUNK_SIZE: usize = 8 * 1024 * 1024; // 8MB per chunk (S3最小5MB)
const MAX_BUFFER_CHUNKS: usize = 2; // channel容量2
const CONCURRENT_UPLOADS: usize = 2;
const LIST_PAGE_SIZE: usize = 1000;

/// S3配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// 存储桶名称
    pub bucket: String,
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Empty means credentials come from the environment / 为空时从环境变量读取
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: String,
    /// 根目录路径
    #[serde(default = "default_root")]
    pub root_path: String,
    /// 强制使用路径风格（MinIO等需要设置为true）
    #[serde(default)]
    pub force_path_style: bool,
    /// 目录占位文件名
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_root() -> String {
    "/".to_string()
}

fn default_placeholder() -> String {
    ".keep".to_string()
}

impl S3Config {
    /// Config for `bucket` with every other field defaulted
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: String::new(),
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| default_region()),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            root_path: default_root(),
            force_path_style: false,
            placeholder: default_placeholder(),
        }
    }
}

pub struct S3Binding {
    config: S3Config,
    bucket: Box<Bucket>,
}

impl S3Binding {
    pub fn new(config: S3Config) -> Result<Self> {
        let bucket = Self::create_bucket(&config)?;
        tracing::info!("S3 binding ready: bucket={}, root={}", config.bucket, config.root_path);
        Ok(Self { config, bucket })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config) -> Result<Box<Bucket>> {
        let credentials = if config.access_key_id.is_empty() {
            Credentials::default()
        } else {
            Credentials::new(
                Some(&config.access_key_id),
                Some(&config.secret_access_key),
                if config.session_token.is_empty() { None } else { Some(&config.session_token) },
                None,
                None,
            )
        }
        .map_err(|e| Error::Config(format!("S3 credentials: {}", e)))?;

        let endpoint = if config.endpoint.is_empty() {
            format!("https://s3.{}.amazonaws.com", config.region)
        } else {
            config.endpoint.clone()
        };
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint,
        };

        let bucket = Bucket::new(&config.bucket, region, credentials).map_err(backend)?;
        Ok(if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }

    /// Full object key below root / 获取完整的对象键
    fn get_object_key(&self, key: &str) -> String {
        let root = self.config.root_path.trim_matches('/');
        let key = key.trim_start_matches('/');

        if root.is_empty() {
            key.to_string()
        } else if key.is_empty() {
            format!("{}/", root)
        } else {
            format!("{}/{}", root, key)
        }
    }

    /// Inverse of `get_object_key`
    fn strip_root<'a>(&self, key: &'a str) -> &'a str {
        let root = self.config.root_path.trim_matches('/');
        if root.is_empty() {
            return key;
        }
        key.strip_prefix(root)
            .map(|k| k.trim_start_matches('/'))
            .unwrap_or(key)
    }

    fn placeholder_name(&self) -> &str {
        if self.config.placeholder.is_empty() {
            ".keep"
        } else {
            &self.config.placeholder
        }
    }

    /// Bucket handle carrying conditional read headers
    fn bucket_for_read(&self, options: &ReadOptions) -> Bucket {
        let mut bucket = (*self.bucket).clone();
        if let Some(v) = &options.if_none_match {
            bucket.add_header("If-None-Match", v);
        }
        if let Some(v) = &options.if_match {
            bucket.add_header("If-Match", v);
        }
        if let Some(v) = &options.if_modified_since {
            bucket.add_header("If-Modified-Since", v);
        }
        if let Some(v) = &options.if_unmodified_since {
            bucket.add_header("If-Unmodified-Since", v);
        }
        bucket
    }

    fn bucket_for_write(&self, options: &WriteOptions) -> Bucket {
        let mut bucket = (*self.bucket).clone();
        if let Some(v) = &options.cache_control {
            bucket.add_header("Cache-Control", v);
        }
        if let Some(v) = &options.content_encoding {
            bucket.add_header("Content-Encoding", v);
        }
        if let Some(v) = &options.acl {
            bucket.add_header("x-amz-acl", v);
        }
        for (name, value) in &options.metadata {
            bucket.add_header(&format!("x-amz-meta-{}", name), value);
        }
        bucket
    }

    /// S3 CopyObject, verified with a HEAD on the destination
    async fn s3_copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(src_key);
        tracing::debug!("S3 CopyObject: src_key={}, dst_key={}", src_key, dst_key);

        let code = self
            .bucket
            .copy_object_internal(&encoded_src, dst_key)
            .await
            .map_err(map_s3_error)?;
        check_status(code, dst_key, "")?;

        let (_, code) = self.bucket.head_object(dst_key).await.map_err(map_s3_error)?;
        check_status(code, dst_key, "copied object missing")
    }
}

fn backend(e: S3Error) -> Error {
    Error::Backend(anyhow!(e))
}

/// Keep store status codes visible to the classifier / 保留状态码
fn map_s3_error(e: S3Error) -> Error {
    match e {
        S3Error::HttpFailWithBody(code, body) => Error::status(code, body),
        other => backend(other),
    }
}

fn check_status(code: u16, key: &str, body: &str) -> Result<()> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(Error::status(code, format!("{}: {}", key, body)))
    }
}

#[async_trait]
impl Binding for S3Binding {
    fn name(&self) -> &str {
        "s3"
    }

    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        let full_prefix = self.get_object_key(prefix);
        let (result, code) = self
            .bucket
            .list_page(full_prefix, None, continuation, None, Some(LIST_PAGE_SIZE))
            .await
            .map_err(map_s3_error)?;
        check_status(code, prefix, "list failed")?;

        let placeholder = self.placeholder_name();
        let objects = result
            .contents
            .into_iter()
            .filter(|obj| !obj.key.rsplit('/').next().map_or(false, |name| name == placeholder))
            .map(|obj| ObjectDescriptor {
                key: self.strip_root(&obj.key).to_string(),
                size: obj.size,
                last_modified: Some(obj.last_modified),
                etag: obj.e_tag,
                content_type: None,
            })
            .collect();

        let next = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };
        Ok(ListPage { objects, next })
    }

    async fn read_file(&self, key: &str, options: &ReadOptions) -> Result<Bytes> {
        let object_key = self.get_object_key(key);
        let bucket = self.bucket_for_read(options);

        let response = match &options.range {
            Some(r) => bucket
                .get_object_range(&object_key, r.start, Some(r.end.saturating_sub(1)))
                .await,
            None => bucket.get_object(&object_key).await,
        }
        .map_err(map_s3_error)?;

        let code = response.status_code();
        if !(200..300).contains(&code) {
            let body = String::from_utf8_lossy(response.bytes()).into_owned();
            return Err(Error::status(code, format!("{}: {}", key, body)));
        }
        Ok(response.bytes().clone())
    }

    async fn write_file(&self, key: &str, data: Bytes, options: &WriteOptions) -> Result<()> {
        let object_key = self.get_object_key(key);
        let bucket = self.bucket_for_write(options);
        let response = bucket
            .put_object_with_content_type(&object_key, &data, options.content_type_or_default())
            .await
            .map_err(map_s3_error)?;
        check_status(response.status_code(), key, &String::from_utf8_lossy(response.bytes()))?;
        tracing::debug!("S3 put: key={}, size={}", object_key, data.len());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let object_key = self.get_object_key(path);
        match self.bucket.head_object(&object_key).await.map_err(map_s3_error) {
            Ok((_, 200)) => return Ok(true),
            Ok(_) => {}
            Err(e) if e.status_code() == Some(crate::error::STATUS_NOT_FOUND) => {}
            Err(e) => return Err(e),
        }
        let dir = format!("{}/", path.trim_matches('/'));
        let page = self.list_page(&dir, None).await?;
        Ok(!page.objects.is_empty())
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let key = format!(
            "{}/{}",
            self.get_object_key(path).trim_end_matches('/'),
            self.placeholder_name()
        );
        let response = self.bucket.put_object(&key, &[]).await.map_err(map_s3_error)?;
        check_status(response.status_code(), path, "mkdir failed")
    }

    /// Server-side CopyObject for every key below `from` / 服务端复制
    async fn copy_dir(&self, from: &str, to: &str) -> Result<()> {
        for relative in self.readdirp(from).await? {
            let src = self.get_object_key(&crate::record::join_key(from, &relative));
            let dst = self.get_object_key(&crate::record::join_key(to, &relative));
            self.s3_copy_object(&src, &dst).await?;
        }
        Ok(())
    }

    async fn create_write_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        let key = self.get_object_key(key);
        let bucket = Box::new(self.bucket_for_write(options));
        let content_type = options.content_type_or_default().to_string();

        // 使用有限容量的channel实现背压，内存只保留2片
        let (tx, rx) = mpsc::channel::<ChunkData>(MAX_BUFFER_CHUNKS);
        let (result_tx, result_rx) = oneshot::channel::<std::result::Result<(), String>>();

        tokio::spawn(async move {
            let result = multipart_upload(bucket, key, content_type, rx).await;
            let _ = result_tx.send(result.map_err(|e| e.to_string()));
        });

        Ok(Box::new(S3Writer {
            tx: Some(tx),
            result_rx: Some(result_rx),
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            part_number: 1,
            pending_chunk: None,
            shutdown_state: ShutdownState::NotStarted,
        }))
    }
}

/// 分片数据
enum ChunkData {
    Part { part_number: u32, data: Bytes },
    Complete,
}

/// Multipart upload task, at most `CONCURRENT_UPLOADS` parts in flight / 分片上传后台任务
async fn multipart_upload(
    bucket: Box<Bucket>,
    key: String,
    content_type: String,
    mut rx: mpsc::Receiver<ChunkData>,
) -> Result<()> {
    let init = bucket
        .initiate_multipart_upload(&key, &content_type)
        .await
        .map_err(map_s3_error)?;
    let upload_id = init.upload_id;
    let bucket = Arc::new(bucket);
    tracing::debug!("S3 multipart start: key={}, upload_id={}", key, upload_id);

    let mut completed: Vec<Part> = Vec::new();
    let mut pending = FuturesUnordered::new();

    let outcome: Result<()> = async {
        loop {
            if pending.len() >= CONCURRENT_UPLOADS {
                if let Some(joined) = pending.next().await {
                    completed.push(joined_part(joined)?);
                }
                continue;
            }
            match rx.recv().await {
                Some(ChunkData::Part { part_number, data }) => {
                    let bucket = bucket.clone();
                    let key = key.clone();
                    let upload_id = upload_id.clone();
                    let content_type = content_type.clone();
                    pending.push(tokio::spawn(async move {
                        tracing::debug!(
                            "S3 upload part: key={}, part={}, size={}",
                            key,
                            part_number,
                            data.len()
                        );
                        bucket
                            .put_multipart_chunk(
                                data.to_vec(),
                                &key,
                                part_number,
                                &upload_id,
                                &content_type,
                            )
                            .await
                            .map_err(map_s3_error)
                    }));
                }
                Some(ChunkData::Complete) | None => break,
            }
        }
        while let Some(joined) = pending.next().await {
            completed.push(joined_part(joined)?);
        }
        Ok::<(), Error>(())
    }
    .await;

    if let Err(e) = outcome {
        let _ = bucket.abort_upload(&key, &upload_id).await;
        return Err(e);
    }

    if completed.is_empty() {
        // Nothing was written: abort the upload and store an empty object
        let _ = bucket.abort_upload(&key, &upload_id).await;
        bucket
            .put_object_with_content_type(&key, &[], &content_type)
            .await
            .map_err(map_s3_error)?;
    } else {
        completed.sort_by_key(|p| p.part_number);
        bucket
            .complete_multipart_upload(&key, &upload_id, completed)
            .await
            .map_err(map_s3_error)?;
    }
    tracing::debug!("S3 multipart done: key={}", key);
    Ok(())
}

fn joined_part(joined: std::result::Result<Result<Part>, tokio::task::JoinError>) -> Result<Part> {
    joined.map_err(|e| Error::Backend(anyhow!("upload task failed: {}", e)))?
}

/// Writer feeding the multipart task / 分片上传写入器
struct S3Writer {
    tx: Option<mpsc::Sender<ChunkData>>,
    result_rx: Option<oneshot::Receiver<std::result::Result<(), String>>>,
    buffer: BytesMut,
    part_number: u32,
    pending_chunk: Option<(u32, Bytes)>,
    shutdown_state: ShutdownState,
}

#[derive(Clone, Copy, PartialEq)]
enum ShutdownState {
    NotStarted,
    SendingRemainder,
    SendingComplete,
    Done,
}

fn channel_closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "S3 upload channel closed")
}

impl S3Writer {
    /// Try to hand the pending chunk to the upload task
    fn flush_pending(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if let Some((part_number, data)) = self.pending_chunk.take() {
            let Some(tx) = self.tx.as_ref() else {
                return Poll::Ready(Err(channel_closed()));
            };
            match tx.try_send(ChunkData::Part { part_number, data: data.clone() }) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.pending_chunk = Some((part_number, data));
                    cx.waker().wake_by_ref();
                    return Poll::Pending;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Poll::Ready(Err(channel_closed()));
                }
            }
        }
        Poll::Ready(Ok(()))
    }

    fn cut_chunk(&mut self, len: usize) {
        let data = self.buffer.split_to(len).freeze();
        self.pending_chunk = Some((self.part_number, data));
        self.part_number += 1;
    }
}

impl AsyncWrite for S3Writer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        // 如果有待发送的分片，必须先发送完，不接受新数据
        futures::ready!(this.flush_pending(cx))?;

        let space = CHUNK_SIZE.saturating_sub(this.buffer.len());
        let accepted = buf.len().min(space.max(1));
        this.buffer.extend_from_slice(&buf[..accepted]);

        if this.buffer.len() >= CHUNK_SIZE {
            this.cut_chunk(CHUNK_SIZE);
            // A full channel leaves the chunk pending for the next call
            if let Poll::Ready(Err(e)) = this.flush_pending(cx) {
                return Poll::Ready(Err(e));
            }
        }

        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            futures::ready!(this.flush_pending(cx))?;

            match this.shutdown_state {
                ShutdownState::NotStarted => {
                    this.shutdown_state = ShutdownState::SendingRemainder;
                }
                ShutdownState::SendingRemainder => {
                    if !this.buffer.is_empty() {
                        let len = this.buffer.len();
                        this.cut_chunk(len);
                        continue;
                    }
                    this.shutdown_state = ShutdownState::SendingComplete;
                }
                ShutdownState::SendingComplete => {
                    if let Some(tx) = this.tx.take() {
                        match tx.try_send(ChunkData::Complete) {
                            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                this.tx = Some(tx);
                                cx.waker().wake_by_ref();
                                return Poll::Pending;
                            }
                        }
                    }
                    this.shutdown_state = ShutdownState::Done;
                }
                ShutdownState::Done => {
                    // 等待后台任务完成
                    let Some(result_rx) = this.result_rx.as_mut() else {
                        return Poll::Ready(Ok(()));
                    };
                    let result = futures::ready!(Pin::new(result_rx).poll(cx));
                    this.result_rx = None;
                    return Poll::Ready(match result {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("S3 upload failed: {}", e),
                        )),
                        Err(_) => Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "S3 upload task terminated",
                        )),
                    });
                }
            }
        }
    }
}
