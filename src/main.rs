use std::path::PathBuf;

use ::tracing::{info, info_span};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use file_store::{OpenMode, UploadOptions};
use service::Service;

mod config;
mod integration_test;
mod service;
mod tracing;
mod upload;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file to a logical path in the configured storage.
    Upload {
        src: PathBuf,
        dest: String,
        /// Append to the existing object instead of replacing it.
        #[arg(long)]
        append: bool,
        /// Write to `<dest>.dpart` for a resumable upload.
        #[arg(long)]
        partial: bool,
        /// Expected final size of a partial upload, in bytes.
        #[arg(long, value_name = "bytes", requires = "partial")]
        target_size: Option<u64>,
    },
    /// Download a logical path to a file, or to stdout.
    Download {
        src: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => config::GatewayConfig::from_path(&path)?,
        None => config::GatewayConfig::default(),
    };
    setup_tracing(&config);

    let root_span = info_span!("transfer-gateway", env = config.env);
    let _guard = root_span.enter();

    let service = Service::new(config).await?;
    let result = run(&service, cli.command).await;
    service.shutdown().await;
    result
}

async fn run(service: &Service, command: Command) -> Result<()> {
    match command {
        Command::Upload {
            src,
            dest,
            append,
            partial,
            target_size,
        } => {
            let options = UploadOptions {
                partial_upload: partial,
                partial_target_bytesize: target_size,
            };
            let identity = service.identity(&dest, options)?;
            let source = tokio::fs::File::open(&src)
                .await
                .with_context(|| format!("opening {}", src.display()))?;
            let mode = if append {
                OpenMode::AppendWrite
            } else {
                OpenMode::CreateWrite
            };
            let summary = service.upload(&identity, source, mode).await?;
            info!(
                file = %summary.identity,
                bytes = summary.bytes,
                chunks = summary.chunks,
                "uploaded"
            );
        }
        Command::Download { src, output } => {
            let identity = service.identity(&src, UploadOptions::default())?;
            let bytes = match output {
                Some(path) => {
                    let mut dst = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("creating {}", path.display()))?;
                    let bytes = service.download(&identity, &mut dst).await?;
                    dst.sync_all().await?;
                    bytes
                }
                None => service.download(&identity, &mut tokio::io::stdout()).await?,
            };
            info!(file = %identity, bytes, "downloaded");
        }
    }
    Ok(())
}
