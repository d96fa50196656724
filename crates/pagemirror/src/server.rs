//! Loopback static file server used to re-test a mirror over HTTP.

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

use crate::types::{MirrorError, MirrorResult};

/// A running server rooted at a mirror directory.
///
/// Stops when [`MirrorServer::shutdown`] is called or the value is dropped.
pub struct MirrorServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MirrorServer {
    /// Serve `root` on an ephemeral port of 127.0.0.1.
    pub async fn start(root: &Path) -> MirrorResult<Self> {
        let app = Router::new().fallback_service(ServeDir::new(root));
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| MirrorError::Server(format!("bind failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| MirrorError::Server(e.to_string()))?;

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::warn!("mirror server stopped: {e}");
            }
        });

        tracing::info!("serving {} on http://{addr}", root.display());
        Ok(Self {
            addr,
            shutdown: Some(tx),
            task: Some(task),
        })
    }

    /// `http://127.0.0.1:<port>/`
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// URL of `path` (relative to the mirror root) on this server.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path.trim_start_matches('/'))
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MirrorServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_files_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<p>hi</p>").unwrap();
        std::fs::create_dir_all(dir.path().join("assets/css")).unwrap();
        std::fs::write(dir.path().join("assets/css/a.css"), "body{}").unwrap();

        let server = MirrorServer::start(dir.path()).await.unwrap();
        assert!(server.base_url().starts_with("http://127.0.0.1:"));

        let body = reqwest::get(server.url_for("/assets/css/a.css"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "body{}");

        let index = reqwest::get(server.base_url()).await.unwrap();
        assert_eq!(index.status(), 200);
        assert_eq!(index.text().await.unwrap(), "<p>hi</p>");

        let missing = reqwest::get(server.url_for("nope.js")).await.unwrap();
        assert_eq!(missing.status(), 404);

        server.shutdown().await;
    }
}
