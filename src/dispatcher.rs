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

//! Spawns one worker task per session, enforces the engine-wide session
//! cap, and drives a session to its final `END_REQUEST` once its handler
//! settles (§4.5, §5).
//!
//! Per-connection multiplexing limits (`max_sess_per_conn`) are enforced by
//! [`crate::connection`] at `BEGIN_REQUEST` time, before a session (and
//! therefore a dispatcher task) even exists; this module only concerns
//! itself with the global `max_sess` budget.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::record::ProtocolStatus;
use crate::role::RoleHandler;
use crate::session::{HandlerOutcome, Session, HANDLER_FAILURE_STATUS};

/// Issues permits against the engine's global `max_sess` budget.
#[derive(Clone)]
pub struct SessionBudget {
    semaphore: Arc<Semaphore>,
}

impl SessionBudget {
    pub fn new(max_sess: u32) -> Self {
        SessionBudget {
            semaphore: Arc::new(Semaphore::new(max_sess as usize)),
        }
    }

    /// Takes a permit without waiting; `None` means the engine is at
    /// capacity and the caller should reply `OVERLOADED`.
    pub fn try_acquire(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }
}

/// Spawns the worker task for one session: runs the handler (racing it
/// against cancellation so an `ABORT_REQUEST` interrupts a handler that is
/// suspended awaiting I/O), finalizes the response, and reports completion
/// back to the connection so its session table and keep-alive bookkeeping
/// can be updated.
pub fn spawn_session(
    session: Arc<Session>,
    handler: Arc<dyn RoleHandler>,
    permit: tokio::sync::OwnedSemaphorePermit,
    completions: mpsc::Sender<u16>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let session_id = session.id;
        let outcome = tokio::select! {
            outcome = handler.handle(session.clone()) => outcome,
            _ = session.cancelled() => HandlerOutcome::Interrupted,
        };

        let app_status = match &outcome {
            HandlerOutcome::Ok => session.exit_code().await,
            HandlerOutcome::SessionFailure(reason) => {
                tracing::debug!(session = %session.diagnostics(), %reason, "session failed");
                commit_failure_status(&session).await;
                1
            }
            // §4.4's ABORT_REQUEST row: appStatus 0 when the handler honours
            // cancellation, distinguishing a clean cancel from a real failure.
            HandlerOutcome::Interrupted => 0,
            HandlerOutcome::Unexpected(err) => {
                tracing::error!(session = %session.diagnostics(), error = %err, "handler returned an unexpected error");
                commit_failure_status(&session).await;
                1
            }
        };

        if let Err(err) = session.finish_output().await {
            tracing::debug!(session = %session.diagnostics(), %err, "failed to flush response before END_REQUEST");
        }
        if let Err(err) = session
            .end_request(app_status, ProtocolStatus::RequestComplete)
            .await
        {
            tracing::debug!(session = %session.diagnostics(), %err, "failed to write END_REQUEST");
        }

        drop(permit);
        let _ = completions.send(session_id).await;
    })
}

async fn commit_failure_status(session: &Session) {
    if !session.is_committed() {
        let _ = session.set_status(HANDLER_FAILURE_STATUS).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostics;
    use crate::params::Params;
    use crate::record::Role;
    use crate::role::handler_fn;
    use crate::spill::{Pipe, PipeConfig};
    use crate::stream::test_support::RecordingSink;

    #[tokio::test]
    async fn successful_handler_flushes_and_reports_completion() {
        let (writer, sink) = RecordingSink::spawn();
        let session = Session::new(
            9,
            Role::Responder,
            false,
            Params::default(),
            Arc::new(Pipe::new(PipeConfig::default())),
            None,
            writer,
            8192,
            Diagnostics::new(1, "test".into()),
        );
        let budget = SessionBudget::new(1);
        let permit = budget.try_acquire().unwrap();
        let (tx, mut rx) = mpsc::channel(1);

        let handler: Arc<dyn RoleHandler> = Arc::new(handler_fn(|session: Arc<Session>| async move {
            session.write_stdout(b"hi").await.unwrap();
            HandlerOutcome::Ok
        }));

        spawn_session(session, handler, permit, tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(9));
        assert!(sink.stdout_ended(9).await);
        assert!(budget.try_acquire().is_some());
    }
}
