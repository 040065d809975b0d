//! Serving loop with graceful shutdown.
//!
//! Shutdown starts on ctrl-c/SIGTERM or on a watchdog request. Either way the
//! listener closes first and in-flight responses get `grace` to finish.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;

use crate::watchdog::{TerminationHandle, TerminationReason};

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// Operator signal or the server stopping on its own.
    Signal,
    /// The watchdog asked for a restart.
    Watchdog(TerminationReason),
}

/// Serve `app` until `signal` fires or the watchdog requests termination.
///
/// Connections still open after `grace` are abandoned; they are torn down
/// with the runtime, which also kills any engine child they own.
pub async fn serve<S>(
    listener: TcpListener,
    app: Router,
    mut termination: TerminationHandle,
    signal: S,
    grace: Duration,
) -> anyhow::Result<Shutdown>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (reason_tx, reason_rx) = oneshot::channel();
    let shutdown = async move {
        let requested = tokio::select! {
            _ = signal => None,
            reason = termination.requested() => Some(reason),
        };
        match requested {
            Some(reason) => {
                tracing::error!(?reason, "watchdog requested termination, draining in-flight requests");
                let _ = reason_tx.send(reason);
            }
            None => drop(reason_tx),
        }
    };

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    // Errs once the shutdown future finishes without a watchdog reason.
    let reason = reason_rx.await.ok();

    match tokio::time::timeout(grace, &mut server).await {
        Ok(joined) => joined.context("server task panicked")?.context("server failed")?,
        Err(_) => {
            tracing::warn!(?grace, "in-flight requests did not drain in time, abandoning them");
            server.abort();
        }
    }

    Ok(match reason {
        Some(reason) => Shutdown::Watchdog(reason),
        None => Shutdown::Signal,
    })
}

/// Resolves on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
