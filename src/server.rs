//! Router assembly and listener bootstrap over TCP or a unix domain socket.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::get;
use axum_server::Handle;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
#[cfg(unix)]
use tokio::sync::Notify;
use tower_http::services::ServeDir;
use tracing::info;
#[cfg(unix)]
use tracing::warn;

use crate::config::{ListenTarget, SHUTDOWN_GRACE_SECS};
use crate::frontend;
use crate::http::{build_cors_layer, build_trace_layer};
use crate::storage::Storage;
use crate::upload::{self, UploadConfig};

/// Builds the full request pipeline: upload routes, static fallback, CORS
/// and request logging.
pub fn build_router(
    storage: Arc<Storage>,
    upload: Arc<UploadConfig>,
    cors_origins: Option<&str>,
) -> Router {
    let body_limit = match upload.max_size {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(usize::try_from(max).unwrap_or(usize::MAX)),
    };

    Router::new()
        .route(
            "/upload",
            get(frontend::upload_page)
                .post(upload::upload_file)
                .layer(body_limit),
        )
        .fallback_service(ServeDir::new(storage.root_path()))
        .layer(Extension(storage))
        .layer(Extension(upload))
        .layer(build_cors_layer(cors_origins))
        .layer(build_trace_layer())
}

/// Serves `app` on the configured target until a termination signal.
pub async fn serve(app: Router, target: ListenTarget) -> io::Result<()> {
    match target {
        ListenTarget::Tcp(address) => serve_tcp(app, &address).await,
        ListenTarget::Unix(path) => serve_unix(app, path).await,
    }
}

async fn serve_tcp(app: Router, address: &str) -> io::Result<()> {
    let addr = tokio::net::lookup_host(address).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bind address `{address}` did not resolve"),
        )
    })?;
    let handle = Handle::new();

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
    });

    info!("WebServer listening on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

#[cfg(unix)]
async fn serve_unix(app: Router, path: std::path::PathBuf) -> io::Result<()> {
    serve_unix_until(
        app,
        path,
        shutdown_signal(),
        Duration::from_secs(SHUTDOWN_GRACE_SECS),
    )
    .await
}

/// Serves on a socket file until `shutdown` resolves, then drains open
/// connections for at most `grace` before the socket file is removed.
#[cfg(unix)]
async fn serve_unix_until<F>(
    app: Router,
    path: std::path::PathBuf,
    shutdown: F,
    grace: Duration,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (socket, listener) = unix::SocketFile::bind(path)?;
    info!("WebServer listening on {}", socket.path().display());

    let draining = Arc::new(Notify::new());
    let trigger = draining.clone();
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown.await;
            trigger.notify_one();
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = draining.notified() => match tokio::time::timeout(grace, &mut server).await {
            Ok(result) => result?,
            Err(_) => warn!(?grace, "graceful shutdown timed out, dropping open connections"),
        },
    }

    drop(socket);
    Ok(())
}

#[cfg(not(unix))]
async fn serve_unix(_app: Router, path: std::path::PathBuf) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!(
            "unix domain sockets are not supported on this platform: {}",
            path.display()
        ),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}

#[cfg(unix)]
pub mod unix {
    use std::io;
    use std::path::{Path, PathBuf};
    use tokio::net::UnixListener;
    use tracing::{info, warn};

    /// Socket file bound for the lifetime of the server; removed on drop.
    #[derive(Debug)]
    pub struct SocketFile {
        path: PathBuf,
    }

    impl SocketFile {
        /// Removes a stale file at `path`, then binds a listener there.
        pub fn bind(path: PathBuf) -> io::Result<(Self, UnixListener)> {
            if std::fs::symlink_metadata(&path).is_ok() {
                info!("Removing existing socket file {}", path.display());
                std::fs::remove_file(&path)?;
            }
            let listener = UnixListener::bind(&path)?;
            Ok((Self { path }, listener))
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for SocketFile {
        fn drop(&mut self) {
            match std::fs::remove_file(&self.path) {
                Ok(()) => info!(path = %self.path.display(), "removed socket file"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "failed to remove socket file")
                }
            }
        }
    }
}
