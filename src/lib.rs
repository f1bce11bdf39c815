//! Streaming, path-addressed filesystem facade over object storage.
//!
//! ```no_run
//! use remote_fs::{FsConfig, RemoteFs, SrcOptions, WriteOptions};
//!
//! # async fn run() -> remote_fs::Result<()> {
//! let fs = RemoteFs::from_config(&FsConfig::new("my-bucket"))?;
//! let records = fs.src(&["site/**/*.html"], SrcOptions::with_base("site/"))?;
//! fs.create_write_through_stream("backup/site", WriteOptions::default())
//!     .pump(records)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod config;
pub mod error;
pub mod facade;
pub mod matcher;
pub mod pipeline;
pub mod record;

pub use binding::{
    Binding, BindingFactory, BindingRegistry, ListPage, LocalBinding, ReadOptions, S3Binding,
    WriteOptions,
};
pub use config::{BindingConfig, FsConfig};
pub use error::{is_expected_error, Error, Result};
pub use facade::RemoteFs;
pub use matcher::KeyMatcher;
pub use pipeline::{RecordStream, SrcOptions, WriteSummary, WriteThrough, WriteThroughSink};
pub use record::{FileRecord, FileStat, MergedRecord, ObjectDescriptor};
