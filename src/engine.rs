// Copyright 2026 the fastcgi-runtime contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The top-level engine: accepts connections from a
//! [`ConnectionSupplier`](crate::transport::ConnectionSupplier), drives each
//! one with [`crate::connection::run`], and coordinates graceful shutdown
//! (§4.4, §5).
//!
//! Shutdown has three phases: stop accepting new connections, let every
//! live connection finish its in-flight sessions, then return once the last
//! one has. The engine never forcibly cuts off a session mid-response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

use crate::config::EngineConfig;
use crate::connection::Handlers;
use crate::dispatcher::SessionBudget;
use crate::role::RoleHandler;
use crate::transport::{Connection, ConnectionSupplier};

/// The FastCGI application runtime: wires a connection supplier, a
/// per-role handler registry and an [`EngineConfig`] together.
pub struct Engine {
    config: Arc<EngineConfig>,
    handlers: Handlers,
    budget: SessionBudget,
    next_connection_id: AtomicU64,
    live_connections: Arc<AtomicU64>,
    /// Gates the accept loop so it stalls (rather than accepting) once
    /// `live_connections == max_conn` (§5). Held for the lifetime of each
    /// connection's spawned task.
    conn_budget: Arc<Semaphore>,
    shutdown: Arc<Notify>,
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
}

/// Builds an [`Engine`] by installing handlers for the roles the
/// application supports; a role with no handler answers `UNKNOWN_ROLE`.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    handlers: Handlers,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder {
            config,
            handlers: Handlers::default(),
        }
    }

    pub fn responder(mut self, handler: impl RoleHandler + 'static) -> Self {
        self.handlers.responder = Some(Arc::new(handler));
        self
    }

    pub fn authorizer(mut self, handler: impl RoleHandler + 'static) -> Self {
        self.handlers.authorizer = Some(Arc::new(handler));
        self
    }

    pub fn filter(mut self, handler: impl RoleHandler + 'static) -> Self {
        self.handlers.filter = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Engine {
        let budget = SessionBudget::new(self.config.max_sess);
        let conn_budget = Arc::new(Semaphore::new(self.config.max_conn as usize));
        Engine {
            config: Arc::new(self.config),
            handlers: self.handlers,
            budget,
            next_connection_id: AtomicU64::new(1),
            live_connections: Arc::new(AtomicU64::new(0)),
            conn_budget,
            shutdown: Arc::new(Notify::new()),
            shutting_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

impl Engine {
    /// A `Notify` handle another task can use to trigger graceful shutdown,
    /// e.g. from a `tokio::signal::ctrl_c()` listener.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutting_down: self.shutting_down.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Runs the accept loop until shutdown is triggered and every
    /// in-flight connection has finished.
    pub async fn serve<S>(&self, mut supplier: S) -> std::io::Result<()>
    where
        S: ConnectionSupplier,
        S::Conn: Connection,
    {
        tracing::info!(software = %crate::diagnostics::server_software(), "engine accept loop starting");
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            // Acquiring a connection permit first (rather than accepting,
            // then checking the cap) is what makes accepting *stall* while
            // `live_connections == max_conn` instead of accepting and
            // immediately refusing (§5).
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    self.shutting_down.store(true, Ordering::SeqCst);
                    break;
                }
                permit = self.conn_budget.clone().acquire_owned() => {
                    permit.expect("connection semaphore is never closed")
                }
            };

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    self.shutting_down.store(true, Ordering::SeqCst);
                    break;
                }
                conn = supplier.accept() => conn,
            };

            let conn = match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::debug!(%err, "failed to accept connection");
                    drop(permit);
                    continue;
                }
            };

            let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
            let peer = conn.peer_description();
            let config = self.config.clone();
            let handlers = self.handlers.clone();
            let budget = self.budget.clone();
            let live = self.live_connections.clone();

            live.fetch_add(1, Ordering::SeqCst);
            let (reader, writer) = tokio::io::split(conn);
            tokio::spawn(async move {
                if let Err(err) = crate::connection::run(
                    reader,
                    writer,
                    config,
                    handlers,
                    budget,
                    connection_id,
                    peer.clone(),
                )
                .await
                {
                    tracing::debug!(connection_id, %peer, %err, "connection ended with a protocol error");
                }
                live.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }

        while self.live_connections.load(Ordering::SeqCst) > 0 {
            tokio::task::yield_now().await;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// A cloneable handle used to request graceful shutdown from outside the
/// accept loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutting_down: Arc<std::sync::atomic::AtomicBool>,
    shutdown: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Waits for Ctrl-C, then triggers shutdown. A convenience for binaries
    /// that don't need a custom shutdown signal.
    pub async fn trigger_on_ctrl_c(self) {
        let _ = tokio::signal::ctrl_c().await;
        self.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_installs_only_requested_roles() {
        let engine = EngineBuilder::new(EngineConfig::default())
            .responder(crate::role::handler_fn(|session| async move {
                session.exit(0).await.unwrap();
                crate::session::HandlerOutcome::Ok
            }))
            .build();
        assert!(engine.handlers.responder.is_some());
        assert!(engine.handlers.authorizer.is_none());
        assert!(engine.handlers.filter.is_none());
    }
}
