//! Streaming pipelines / 流式管道
//!
//! `read` turns glob matches into [`FileRecord`](crate::record::FileRecord)
//! streams, `write` uploads such records back to the store.

use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::Result;

pub mod read;
pub mod write;

pub use read::{src, RecordStream, SrcOptions};
pub use write::{WriteSummary, WriteThrough, WriteThroughSink};

/// End a stream right after its first error.
///
/// The inner stream is not polled again once an error has been yielded, so no
/// further upstream work is started.
pub(crate) fn stop_after_error<T, S>(inner: S) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    S: Stream<Item = Result<T>> + Send + 'static,
{
    stream::unfold((inner.boxed(), false), |(mut inner, failed)| async move {
        if failed {
            return None;
        }
        let item = inner.next().await?;
        let failed = item.is_err();
        Some((item, (inner, failed)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stop_after_error_does_not_poll_further() {
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        let inner = stream::iter(vec![
            Ok(1),
            Err(Error::status(500, "boom")),
            Ok(3),
        ])
        .inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let items: Vec<_> = stop_after_error(inner).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(1)));
        assert_eq!(items[1].as_ref().unwrap_err().status_code(), Some(500));
        assert_eq!(polled.load(Ordering::SeqCst), 2);
    }
}
