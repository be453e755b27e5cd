use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ServerError;
use crate::router::build_router;
use crate::state::AppState;
use crate::tls::{TlsListener, self_signed_config};

/// How hard to try when the port is still held by a previous process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Bind `addr`, retrying only while the address is in use. Any other error
/// aborts immediately.
pub async fn bind_with_retry(addr: SocketAddr, policy: RetryPolicy) -> Result<TcpListener, ServerError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && attempt < attempts => {
                tracing::warn!(
                    %addr,
                    attempt,
                    attempts,
                    "Port in use, retrying in {:?}",
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            },
            Err(source) => {
                tracing::error!(%addr, attempt, error = %source, "Failed to bind voice chat server");
                return Err(ServerError::Bind {
                    addr,
                    attempts: attempt,
                    source,
                });
            },
        }
    }
}

/// Outcome of the startup bind, observable while the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Pending,
    Bound(SocketAddr),
    Failed,
}

/// Owns the accept loop: binds with retry on a background task, serves the
/// router over plain TCP or TLS, and shuts down when `stop` is called.
pub struct ListeningServer {
    state: AppState,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<Result<(), ServerError>>>>,
    bind_tx: watch::Sender<BindState>,
}

impl ListeningServer {
    pub fn new(state: AppState) -> Self {
        let (bind_tx, _) = watch::channel(BindState::Pending);
        Self {
            state,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            bind_tx,
        }
    }

    /// Spawn the server task. Returns immediately; a second call, or a call
    /// after `stop`, does nothing.
    pub fn start(&self) {
        if self.state.shutdown.is_cancelled() {
            tracing::debug!("Voice chat server already stopped, ignoring start");
            self.abandon_bind();
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = tokio::spawn(run(self.state.clone(), self.bind_tx.clone()));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Stop accepting and close every open session. Idempotent.
    pub fn stop(&self) {
        if !self.state.shutdown.is_cancelled() {
            tracing::info!("Stopping voice chat server");
        }
        self.state.shutdown.cancel();
        // A started task reports its own outcome.
        if !self.running.load(Ordering::SeqCst) {
            self.abandon_bind();
        }
    }

    /// Settle a still-pending bind as failed so `ready` waiters return.
    fn abandon_bind(&self) {
        self.bind_tx.send_if_modified(|state| {
            if *state == BindState::Pending {
                *state = BindState::Failed;
                true
            } else {
                false
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.state.shutdown.is_cancelled()
    }

    /// The bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.bind_tx.borrow() {
            BindState::Bound(addr) => Some(addr),
            _ => None,
        }
    }

    /// Wait until startup either bound the port or gave up.
    pub async fn ready(&self) -> Option<SocketAddr> {
        let mut rx = self.bind_tx.subscribe();
        let state = rx
            .wait_for(|s| *s != BindState::Pending)
            .await
            .map(|s| *s)
            .unwrap_or(BindState::Failed);
        match state {
            BindState::Bound(addr) => Some(addr),
            _ => None,
        }
    }

    /// Await the server task. Returns `Ok(())` if it was never started.
    pub async fn wait(&self) -> Result<(), ServerError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => task.await.map_err(|e| ServerError::Task(e.to_string()))?,
            None => Ok(()),
        }
    }
}

async fn run(state: AppState, bind_tx: watch::Sender<BindState>) -> Result<(), ServerError> {
    let config = Arc::clone(&state.config);
    let addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "Invalid listen address");
            bind_tx.send_replace(BindState::Failed);
            return Err(ServerError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)));
        },
    };
    let policy = RetryPolicy {
        attempts: config.limits.bind_attempts,
        delay: config.bind_retry_delay(),
    };

    let shutdown = state.shutdown.clone();
    let bound = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            bind_tx.send_replace(BindState::Failed);
            return Ok(());
        },
        res = bind_with_retry(addr, policy) => res,
    };
    let listener = match bound {
        Ok(listener) => listener,
        Err(e) => {
            bind_tx.send_replace(BindState::Failed);
            return Err(e);
        },
    };
    let local_addr = listener.local_addr()?;

    let tls = if config.tls.enabled {
        match self_signed_config(&config.tls.hostname) {
            Ok(tls) => Some(tls),
            Err(e) => {
                tracing::error!(error = %e, "Failed to set up TLS, serving plain HTTP");
                None
            },
        }
    } else {
        None
    };

    let app = build_router(state);
    bind_tx.send_replace(BindState::Bound(local_addr));
    tracing::info!(addr = %local_addr, port = local_addr.port(), tls = tls.is_some(), "Voice chat server listening");

    let signal = shutdown.clone().cancelled_owned();
    match tls {
        Some(tls) => {
            axum::serve(TlsListener::new(listener, tls)?, app)
                .with_graceful_shutdown(signal)
                .await?;
        },
        None => {
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await?;
        },
    }

    tracing::info!("Voice chat server stopped");
    Ok(())
}
