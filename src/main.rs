use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remote_fs::config::{default_config_path, load_config};
use remote_fs::{KeyMatcher, ReadOptions, RemoteFs, SrcOptions, WriteOptions};

/// Path-addressed access to a bucket / 远程文件系统命令行
#[derive(Debug, Parser)]
#[command(
    name = "rfs",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIME"), ")")
)]
struct Cli {
    /// Config file; created with defaults when missing
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List keys matching glob patterns (`!pattern` excludes)
    Ls {
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(long, default_value = "")]
        base: String,
    },
    /// Print an object to stdout
    Cat {
        path: String,
        #[arg(long)]
        if_none_match: Option<String>,
        #[arg(long)]
        if_modified_since: Option<String>,
    },
    /// Copy matching objects below another base, one write at a time
    Cp {
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(long, default_value = "")]
        base: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
        #[arg(long)]
        cache_control: Option<String>,
    },
    /// Upload a local file
    Put {
        file: PathBuf,
        key: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Create a directory marker
    Mkdir { path: String },
    /// Check whether a key or prefix exists
    Exists { path: String },
    /// List every key below a directory, relative to it
    Tree { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `cat` output stays clean
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remote_fs=info,rfs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("loading configuration from {:?}", config_path))?;
    let fs = RemoteFs::from_config(&config)?;

    let mut stdout = tokio::io::stdout();
    match cli.command {
        Command::Ls { patterns, base } => {
            let matcher = KeyMatcher::new(&patterns, &base)?;
            let mut keys = matcher.into_stream(fs.binding().clone());
            while let Some(object) = keys.try_next().await? {
                let line = format!("{}\t{}\n", object.size, object.key);
                stdout.write_all(line.as_bytes()).await?;
            }
        }
        Command::Cat {
            path,
            if_none_match,
            if_modified_since,
        } => {
            let options = ReadOptions {
                if_none_match,
                if_modified_since,
                ..Default::default()
            };
            let mut chunks = match fs.create_read_stream(&path, &options).await {
                Ok(chunks) => chunks,
                Err(e) if remote_fs::is_expected_error(&e) => {
                    tracing::info!("{}: precondition not met, skipped", path);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            while let Some(chunk) = chunks.try_next().await? {
                stdout.write_all(&chunk).await?;
            }
        }
        Command::Cp {
            patterns,
            base,
            to,
            concurrency,
            cache_control,
        } => {
            let options = SrcOptions {
                concurrency: concurrency.max(1),
                ..SrcOptions::with_base(base)
            };
            let records = fs.src(&patterns, options)?;
            let write_options = WriteOptions {
                cache_control,
                ..Default::default()
            };
            let summary = fs
                .create_write_through_stream(to, write_options)
                .pump(records)
                .await?;
            let line = format!("{} files, {} bytes\n", summary.written, summary.bytes);
            stdout.write_all(line.as_bytes()).await?;
        }
        Command::Put {
            file,
            key,
            content_type,
        } => {
            let mut reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {:?}", file))?;
            let content_type =
                content_type.unwrap_or_else(|| remote_fs::record::guess_content_type(&key));
            let options = WriteOptions::default().with_content_type(content_type);
            let mut writer = fs.create_write_stream(&key, &options).await?;
            let size = tokio::io::copy(&mut reader, &mut writer).await?;
            writer.shutdown().await?;
            tracing::info!("uploaded {:?} to {} ({} bytes)", file, key, size);
        }
        Command::Mkdir { path } => {
            fs.mkdir(&path).await?;
        }
        Command::Exists { path } => {
            let found = fs.exists(&path).await?;
            stdout.write_all(format!("{}\n", found).as_bytes()).await?;
            if !found {
                stdout.flush().await?;
                std::process::exit(1);
            }
        }
        Command::Tree { path } => {
            for key in fs.readdirp(&path).await? {
                stdout.write_all(format!("{}\n", key).as_bytes()).await?;
            }
        }
    }
    stdout.flush().await?;
    Ok(())
}
