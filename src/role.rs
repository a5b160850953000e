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

//! The handler seam: one [`RoleHandler`] per FastCGI role, invoked by the
//! dispatcher once a session's `PARAMS` stream is terminated (§4.4, §4.5).
//!
//! Handlers are ordinary async functions wrapped in [`handler_fn`]; the
//! engine never cares how a handler is implemented, only that it resolves
//! to a [`HandlerOutcome`].

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::session::{HandlerOutcome, Session};

/// A role handler: given a session (already carrying its parsed `Params`
/// and readable STDIN/DATA streams), drives it to completion by writing
/// `Session::write_stdout`/`write_stderr` and returning an outcome.
pub trait RoleHandler: Send + Sync {
    fn handle(&self, session: Arc<Session>) -> BoxFuture<'static, HandlerOutcome>;
}

/// Wraps a plain `async fn(Arc<Session>) -> HandlerOutcome` (or closure
/// returning such a future) as a [`RoleHandler`], the way most handlers are
/// expected to be written.
pub fn handler_fn<F, Fut>(f: F) -> impl RoleHandler
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    FnHandler(f)
}

struct FnHandler<F>(F);

impl<F, Fut> RoleHandler for FnHandler<F>
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    fn handle(&self, session: Arc<Session>) -> BoxFuture<'static, HandlerOutcome> {
        Box::pin((self.0)(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::spill::{Pipe, PipeConfig};
    use crate::stream::test_support::RecordingSink;
    use crate::diagnostics::Diagnostics;
    use crate::record::Role;

    #[tokio::test]
    async fn handler_fn_runs_and_returns_outcome() {
        let (writer, _sink) = RecordingSink::spawn();
        let session = Session::new(
            1,
            Role::Responder,
            false,
            Params::default(),
            Arc::new(Pipe::new(PipeConfig::default())),
            None,
            writer,
            8192,
            Diagnostics::new(1, "test".into()),
        );

        let handler = handler_fn(|session: Arc<Session>| async move {
            session.write_stdout(b"ok").await.unwrap();
            HandlerOutcome::Ok
        });

        let outcome = handler.handle(session).await;
        assert!(matches!(outcome, HandlerOutcome::Ok));
    }
}
