//! Scripted in-memory binding for tests / 测试用内存绑定

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use super::{Binding, ListPage, ReadOptions, WriteOptions};
use crate::error::{Error, Result};
use crate::record::ObjectDescriptor;

#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub data: Bytes,
    pub options: WriteOptions,
}

#[derive(Default)]
pub(crate) struct MemoryBinding {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    read_failures: Mutex<HashMap<String, Error>>,
    write_failures: Mutex<HashMap<String, u16>>,
    page_size: Option<usize>,
    calls: Mutex<Vec<String>>,
    in_flight_writes: AtomicUsize,
    max_in_flight_writes: AtomicUsize,
}

impl MemoryBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_object(self, key: &str, data: &str) -> Self {
        self.insert(key, data);
        self
    }

    pub fn insert(&self, key: &str, data: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: Bytes::copy_from_slice(data.as_bytes()),
                options: WriteOptions::default(),
            },
        );
    }

    /// Make every read of `key` fail with `error`
    pub fn fail_read(self, key: &str, error: Error) -> Self {
        self.read_failures.lock().unwrap().insert(key.to_string(), error);
        self
    }

    pub fn fail_write(self, key: &str, code: u16) -> Self {
        self.write_failures.lock().unwrap().insert(key.to_string(), code);
        self
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{}:", kind);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn max_in_flight_writes(&self) -> usize {
        self.max_in_flight_writes.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn rebuild(error: &Error) -> Error {
    match error {
        Error::Status { code, message } => Error::status(*code, message.clone()),
        Error::NotFound(key) => Error::NotFound(key.clone()),
        other => Error::Backend(anyhow::anyhow!(other.to_string())),
    }
}

#[async_trait]
impl Binding for MemoryBinding {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ListPage> {
        self.record(format!("list:{}", prefix));
        let objects = self.objects.lock().unwrap();
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.as_ref().map_or(true, |after| *key > after));

        let mut page = ListPage::default();
        let limit = self.page_size.unwrap_or(usize::MAX);
        for (key, object) in matching.by_ref().take(limit) {
            let mut descriptor = ObjectDescriptor::new(key.clone());
            descriptor.size = object.data.len() as u64;
            descriptor.content_type = object.options.content_type.clone();
            page.objects.push(descriptor);
        }
        if matching.next().is_some() {
            page.next = page.objects.last().map(|o| o.key.clone());
        }
        Ok(page)
    }

    async fn read_file(&self, key: &str, _options: &ReadOptions) -> Result<Bytes> {
        self.record(format!("read:{}", key));
        tokio::task::yield_now().await;
        if let Some(error) = self.read_failures.lock().unwrap().get(key) {
            return Err(rebuild(error));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn write_file(&self, key: &str, data: Bytes, options: &WriteOptions) -> Result<()> {
        self.record(format!("write:{}", key));
        let now = self.in_flight_writes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_writes.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let failure = self.write_failures.lock().unwrap().get(key).copied();
        let result = match failure {
            Some(code) => Err(Error::status(code, "write rejected")),
            None => {
                self.objects.lock().unwrap().insert(
                    key.to_string(),
                    StoredObject {
                        data,
                        options: options.clone(),
                    },
                );
                Ok(())
            }
        };
        self.in_flight_writes.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.record(format!("mkdir:{}", path));
        self.insert(&format!("{}/", path.trim_matches('/')), "");
        Ok(())
    }

    async fn create_write_stream(
        &self,
        key: &str,
        options: &WriteOptions,
    ) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
        self.record(format!("create_write_stream:{}", key));
        Ok(Box::new(MemoryWriter {
            key: key.to_string(),
            options: options.clone(),
            buffer: BytesMut::new(),
            objects: self.objects.clone(),
        }))
    }
}

struct MemoryWriter {
    key: String,
    options: WriteOptions,
    buffer: BytesMut,
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let data = this.buffer.split().freeze();
        this.objects.lock().unwrap().insert(
            this.key.clone(),
            StoredObject {
                data,
                options: this.options.clone(),
            },
        );
        Poll::Ready(Ok(()))
    }
}
