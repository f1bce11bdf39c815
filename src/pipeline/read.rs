//! Glob-to-record read pipeline / 读取管道
//!
//! `patterns -> KeyMatcher -> Binding::read_file -> FileRecord`. Objects whose
//! read ends in an expected status (304 / 412) are skipped; any other failure
//! is yielded once and ends the stream.

use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;

use super::stop_after_error;
use crate::binding::{Binding, ReadOptions};
use crate::error::{is_expected_error, Result};
use crate::matcher::KeyMatcher;
use crate::record::{FileRecord, MergedRecord, ObjectDescriptor};

pub type RecordStream = BoxStream<'static, Result<FileRecord>>;

/// Options for [`src`] / 读取选项
#[derive(Debug, Clone)]
pub struct SrcOptions {
    /// Scopes matching and is stripped from every record path
    pub base: String,
    /// Conditional read parameters applied to every object
    pub read: ReadOptions,
    /// Maximum reads in flight; output order is kept regardless
    pub concurrency: usize,
}

impl Default for SrcOptions {
    fn default() -> Self {
        Self {
            base: String::new(),
            read: ReadOptions::default(),
            concurrency: 1,
        }
    }
}

impl SrcOptions {
    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            ..Default::default()
        }
    }
}

/// Stream the objects matching `patterns` as file records.
///
/// Pattern errors are returned before any I/O. Nothing is listed or read
/// until the returned stream is polled; with the default concurrency of 1
/// the next object is read only after the previous record was taken.
pub fn src<S: AsRef<str>>(
    binding: Arc<dyn Binding>,
    patterns: &[S],
    options: SrcOptions,
) -> Result<RecordStream> {
    let matcher = KeyMatcher::new(patterns, &options.base)?;
    let base = matcher.base().to_string();
    let read = Arc::new(options.read);
    let concurrency = options.concurrency.max(1);

    let descriptors = stop_after_error(matcher.into_stream(binding.clone()));
    let records = descriptors
        .map(move |item| {
            let binding = binding.clone();
            let read = read.clone();
            async move { fetch(binding.as_ref(), item?, &read).await }
        })
        .buffered(concurrency)
        .try_filter_map(|merged| future::ready(Ok(merged)))
        .map_ok(move |merged| FileRecord::from_merged(merged, &base));

    Ok(stop_after_error(records))
}

/// Read one object; `Ok(None)` when the store answered with an expected status.
async fn fetch(
    binding: &dyn Binding,
    descriptor: ObjectDescriptor,
    read: &ReadOptions,
) -> Result<Option<MergedRecord>> {
    match binding.read_file(&descriptor.key, read).await {
        Ok(body) => {
            tracing::debug!("src read: key={}, size={}", descriptor.key, body.len());
            Ok(Some(MergedRecord { descriptor, body }))
        }
        Err(e) if is_expected_error(&e) => {
            tracing::debug!("src skip: key={}, reason={}", descriptor.key, e);
            Ok(None)
        }
        Err(e) => {
            tracing::warn!("src failed: key={}, error={}", descriptor.key, e);
            Err(e)
        }
    }
}
