use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::AppState;

pub struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<anyhow::Result<()>>>,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(join) = self.join.take() {
            join.await.context("server task panicked")??;
        }
        Ok(())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

/// Initialize storage, bind `bind_addr` and serve in the background.
pub async fn start(state: AppState, bind_addr: SocketAddr) -> anyhow::Result<RunningServer> {
    state
        .flash()
        .init()
        .await
        .with_context(|| format!("create storage dir {}", state.flash().root().display()))?;

    let app = crate::app(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("bind {bind_addr}"))?;
    let addr = listener.local_addr().context("read bound address")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("serve")?;
        Ok(())
    });

    Ok(RunningServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
    })
}
