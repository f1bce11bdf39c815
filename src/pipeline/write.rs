//! Write-through pipeline / 写入管道
//!
//! Uploads file records as they arrive, one write in flight at a time. Each
//! record lands at `join_key(base, record.path)` with the record's content
//! type. The first failed write halts the stream.

use futures::future::{BoxFuture, FutureExt};
use futures::sink::Sink;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::binding::{Binding, WriteOptions};
use crate::error::{Error, Result};
use crate::record::{join_key, FileRecord};

/// Totals of a finished [`WriteThrough::pump`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: u64,
    pub bytes: u64,
}

/// Sink of file records backed by `Binding::write_file` / 写入流
pub struct WriteThrough {
    binding: Arc<dyn Binding>,
    base: String,
    options: WriteOptions,
    halted: bool,
    summary: WriteSummary,
}

impl WriteThrough {
    pub fn new(binding: Arc<dyn Binding>, base: impl Into<String>, options: WriteOptions) -> Self {
        Self {
            binding,
            base: base.into(),
            options,
            halted: false,
            summary: WriteSummary::default(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn summary(&self) -> WriteSummary {
        self.summary
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Upload one record and wait for the store to confirm it / 写入单条记录
    pub async fn write(&mut self, record: FileRecord) -> Result<()> {
        if self.halted {
            return Err(Error::Halted);
        }

        let key = join_key(&self.base, &record.path);
        let options = self.options.clone().with_content_type(record.content_type);
        let size = record.contents.len() as u64;

        match self.binding.write_file(&key, record.contents, &options).await {
            Ok(()) => {
                self.summary.written += 1;
                self.summary.bytes += size;
                tracing::debug!("write-through: key={}, size={}", key, size);
                Ok(())
            }
            Err(e) => {
                self.halted = true;
                tracing::warn!("write-through halted: key={}, error={}", key, e);
                Err(e)
            }
        }
    }

    /// Adapt into a [`Sink`]; `poll_ready` resolves only after the previous
    /// record's write completed.
    pub fn into_sink(self) -> WriteThroughSink {
        WriteThroughSink {
            writer: Some(self),
            in_flight: None,
        }
    }

    /// Drain `records` into the store; the first error from either side ends
    /// the pump / 将记录流全部写入
    pub async fn pump<S>(mut self, records: S) -> Result<WriteSummary>
    where
        S: Stream<Item = Result<FileRecord>> + Send,
    {
        futures::pin_mut!(records);
        while let Some(record) = records.next().await {
            self.write(record?).await?;
        }
        tracing::info!(
            "write-through done: base={}, written={}, bytes={}",
            self.base,
            self.summary.written,
            self.summary.bytes
        );
        Ok(self.summary)
    }
}

type PendingWrite = BoxFuture<'static, (WriteThrough, Result<()>)>;

/// [`Sink`] form of [`WriteThrough`] / 写入流 Sink
///
/// The writer is handed back after every write, failed or not, so a send
/// after a failure returns [`Error::Halted`] like [`WriteThrough::write`].
pub struct WriteThroughSink {
    writer: Option<WriteThrough>,
    in_flight: Option<PendingWrite>,
}

impl WriteThroughSink {
    /// Totals so far; `None` while a write is in flight
    pub fn summary(&self) -> Option<WriteSummary> {
        self.writer.as_ref().map(WriteThrough::summary)
    }

    fn poll_in_flight(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let Some(pending) = self.in_flight.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let (writer, result) = futures::ready!(pending.poll_unpin(cx));
        self.in_flight = None;
        self.writer = Some(writer);
        Poll::Ready(result)
    }
}

impl Sink<FileRecord> for WriteThroughSink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().poll_in_flight(cx)
    }

    fn start_send(self: Pin<&mut Self>, record: FileRecord) -> Result<()> {
        let this = self.get_mut();
        let Some(mut writer) = this.writer.take() else {
            return Err(Error::Halted);
        };
        this.in_flight = Some(
            async move {
                let result = writer.write(record).await;
                (writer, result)
            }
            .boxed(),
        );
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().poll_in_flight(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.get_mut().poll_in_flight(cx)
    }
}
