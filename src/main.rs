//! simple-cdn server binary.
//!
//! Serves a content directory read-only at `/` and accepts keyed multipart
//! uploads into the same directory at `/upload`, over TCP or a unix domain
//! socket.

mod config;
mod error;
mod frontend;
mod http;
mod logging;
mod server;
mod storage;
#[cfg(test)]
mod test_utils;
mod upload;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::config::Args;
use crate::storage::Storage;
use crate::upload::UploadConfig;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let target = args.listen_target()?;
    let storage = Arc::new(Storage::new(PathBuf::from(&args.content_dir)));
    storage.ensure_root().await?;
    let upload_config = Arc::new(UploadConfig {
        upload_key: args.upload_key.clone(),
        max_size: args.upload_max_size,
        buffer_limit: args.upload_buffer_limit,
    });
    info!(
        content_dir = %storage.root_path().display(),
        upload = ?upload_config,
        "content root ready"
    );

    let app = server::build_router(storage, upload_config, args.cors_origins.as_deref());
    server::serve(app, target).await
}
