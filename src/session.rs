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

//! Per-session state: parameters, role, the deferred-header response state,
//! and the typed, role-specific contexts handed to role handlers.
//!
//! A session's header table and status are mutable only before the first
//! byte of STDOUT content is committed to the wire (§4.3). Committing
//! formats the header block as CGI-style lines, synthesizes `Status: <code>
//! <reason>` (the table itself can never hold a `Status` field -- see
//! [`crate::header`]), and prepends it to the STDOUT byte stream.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::diagnostics::Diagnostics;
use crate::error::{AbortCause, StreamAborted, UsageError};
use crate::header::HeaderTable;
use crate::http::status::reason_phrase;
use crate::params::Params;
use crate::record::Role;
use crate::spill::Pipe;
use crate::stream::{InboundStream, WriterHandle};

/// Default response status before any `set_status`/promotion.
pub const DEFAULT_STATUS: u16 = 200;
/// Status an Authorizer session is promoted to once it has something to say.
pub const AUTHORIZER_PROMOTED_STATUS: u16 = 401;
/// Status used when a handler fails unexpectedly with headers uncommitted.
pub const HANDLER_FAILURE_STATUS: u16 = 500;

/// Lower bound enforced on `set_buffer_size`.
pub const MIN_BUFFER_SIZE: usize = 256;
/// Upper bound enforced on `set_buffer_size`.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusState {
    value: u16,
    explicit: bool,
}

/// Shared, lock-protected response state: headers, status and the
/// Open->Committed transition.
struct ResponseState {
    headers: AsyncMutex<HeaderTable>,
    status: AsyncMutex<StatusState>,
    committed: AtomicBool,
    is_authorizer: bool,
}

impl ResponseState {
    fn new(is_authorizer: bool) -> Self {
        ResponseState {
            headers: AsyncMutex::new(HeaderTable::new()),
            status: AsyncMutex::new(StatusState {
                value: DEFAULT_STATUS,
                explicit: false,
            }),
            committed: AtomicBool::new(false),
            is_authorizer,
        }
    }

    fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    async fn maybe_promote_authorizer(&self) {
        if !self.is_authorizer {
            return;
        }
        let mut status = self.status.lock().await;
        if status.value == DEFAULT_STATUS {
            status.value = AUTHORIZER_PROMOTED_STATUS;
        }
    }

    async fn set_field(&self, name: &str, value: &str, add: bool) -> Result<(), UsageError> {
        if self.is_committed() {
            return Err(UsageError::TooLate);
        }
        {
            let mut headers = self.headers.lock().await;
            if add {
                headers.add_field(name, value, self.is_authorizer)?;
            } else {
                headers.set_field(name, value, self.is_authorizer)?;
            }
        }
        self.maybe_promote_authorizer().await;
        Ok(())
    }

    async fn clear_field(&self, name: &str) -> Result<(), UsageError> {
        if self.is_committed() {
            return Err(UsageError::TooLate);
        }
        self.headers.lock().await.clear_field(name);
        Ok(())
    }

    async fn set_variable(&self, name: &str, value: &str) -> Result<(), UsageError> {
        if self.is_committed() {
            return Err(UsageError::TooLate);
        }
        self.headers.lock().await.set_variable(name, value);
        self.maybe_promote_authorizer().await;
        Ok(())
    }

    async fn set_status(&self, code: u16) -> Result<(), UsageError> {
        if self.is_committed() {
            return Err(UsageError::TooLate);
        }
        let mut status = self.status.lock().await;
        status.value = code;
        status.explicit = true;
        Ok(())
    }

    /// Attempts the Open->Committed transition. Returns the formatted
    /// header block exactly once; subsequent calls (including a concurrent
    /// race between a STDOUT write and session completion) return `None`.
    async fn try_commit(&self) -> Option<String> {
        if self.committed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let status = *self.status.lock().await;
        let headers = self.headers.lock().await;

        let mut out = String::new();
        out.push_str("Status: ");
        out.push_str(&status.value.to_string());
        out.push(' ');
        out.push_str(reason_phrase(status.value));
        out.push_str("\r\n");
        headers.format_lines(&mut out);
        out.push_str("\r\n");
        Some(out)
    }
}

/// The full per-request session: parameters, inbound pipes, outbound
/// response state, and the bookkeeping the connection engine needs to
/// drive it to completion.
pub struct Session {
    pub id: u16,
    pub role: Role,
    pub keep_conn: bool,
    pub params: Params,
    pub diagnostics: Diagnostics,

    stdin_pipe: Arc<Pipe>,
    data_pipe: Option<Arc<Pipe>>,
    response: ResponseState,
    buffer_size: AtomicUsize,
    stdout_buf: AsyncMutex<Vec<u8>>,
    stderr_used: AtomicBool,
    exit_code: AsyncMutex<Option<u32>>,
    cancelled: AtomicBool,
    cancel_notify: tokio::sync::Notify,
    writer: WriterHandle,
}

impl Session {
    pub fn new(
        id: u16,
        role: Role,
        keep_conn: bool,
        params: Params,
        stdin_pipe: Arc<Pipe>,
        data_pipe: Option<Arc<Pipe>>,
        writer: WriterHandle,
        default_buffer_size: usize,
        diagnostics: Diagnostics,
    ) -> Arc<Session> {
        Arc::new(Session {
            id,
            role,
            keep_conn,
            params,
            diagnostics,
            stdin_pipe,
            data_pipe,
            response: ResponseState::new(role == Role::Authorizer),
            buffer_size: AtomicUsize::new(default_buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)),
            stdout_buf: AsyncMutex::new(Vec::new()),
            stderr_used: AtomicBool::new(false),
            exit_code: AsyncMutex::new(None),
            cancelled: AtomicBool::new(false),
            cancel_notify: tokio::sync::Notify::new(),
            writer,
        })
    }

    pub fn stdin_reader(&self) -> InboundStream {
        InboundStream::new(self.stdin_pipe.clone())
    }

    /// Only meaningful (and only exposed) for the Filter role.
    pub fn data_reader(&self) -> InboundStream {
        InboundStream::new(
            self.data_pipe
                .clone()
                .expect("data() is only valid for the Filter role"),
        )
    }

    pub fn is_committed(&self) -> bool {
        self.response.is_committed()
    }

    pub async fn set_field(&self, name: &str, value: &str) -> Result<(), UsageError> {
        self.response.set_field(name, value, false).await
    }

    pub async fn add_field(&self, name: &str, value: &str) -> Result<(), UsageError> {
        self.response.set_field(name, value, true).await
    }

    pub async fn clear_field(&self, name: &str) -> Result<(), UsageError> {
        self.response.clear_field(name).await
    }

    pub async fn set_variable(&self, name: &str, value: &str) -> Result<(), UsageError> {
        self.response.set_variable(name, value).await
    }

    pub async fn set_status(&self, code: u16) -> Result<(), UsageError> {
        self.response.set_status(code).await
    }

    /// Sets the preferred STDOUT buffer size. Returns `true` if the
    /// requested size was honoured exactly, `false` if it was clamped.
    /// Fails with [`UsageError::TooLate`] after commit.
    pub fn set_buffer_size(&self, requested: usize) -> Result<bool, UsageError> {
        if self.is_committed() {
            return Err(UsageError::TooLate);
        }
        let clamped = requested.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        self.buffer_size.store(clamped, Ordering::Relaxed);
        Ok(clamped == requested)
    }

    /// Defers the process-exit-style status code the handler wants
    /// reflected in `END_REQUEST`'s `appStatus`. Must be non-negative.
    pub async fn exit(&self, code: i64) -> Result<(), UsageError> {
        if code < 0 {
            return Err(UsageError::NegativeExitCode(code));
        }
        *self.exit_code.lock().await = Some(code as u32);
        Ok(())
    }

    pub async fn exit_code(&self) -> u32 {
        self.exit_code.lock().await.unwrap_or(0)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Appends bytes to the STDOUT buffer, committing headers on the first
    /// call that carries at least one body byte, and flushing whenever the
    /// buffer reaches its configured size.
    pub async fn write_stdout(&self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let header_block = self.response.try_commit().await;
        let mut buf = self.stdout_buf.lock().await;
        if let Some(block) = header_block {
            self.writer.send_stdout(self.id, block.into_bytes()).await?;
        }
        buf.extend_from_slice(bytes);
        let cap = self.buffer_size.load(Ordering::Relaxed);
        if buf.len() >= cap {
            let chunk = std::mem::take(&mut *buf);
            drop(buf);
            self.writer.send_stdout(self.id, chunk).await?;
        }
        Ok(())
    }

    /// STDERR is effectively unbuffered: each write is forwarded directly.
    /// It never participates in the header commit.
    pub async fn write_stderr(&self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.stderr_used.store(true, Ordering::Relaxed);
        self.writer.send_stderr(self.id, bytes.to_vec()).await
    }

    /// Flushes any buffered STDOUT bytes without closing the stream.
    pub async fn flush_stdout(&self) -> std::io::Result<()> {
        let mut buf = self.stdout_buf.lock().await;
        if buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut *buf);
        drop(buf);
        self.writer.send_stdout(self.id, chunk).await
    }

    /// Finalizes the session's output on any exit path: commits headers if
    /// the handler never wrote a byte, flushes the STDOUT buffer, then
    /// emits the empty STDOUT terminator and (only if STDERR was ever
    /// written) the empty STDERR terminator. Idempotent.
    pub async fn finish_output(&self) -> std::io::Result<()> {
        if let Some(block) = self.response.try_commit().await {
            self.writer.send_stdout(self.id, block.into_bytes()).await?;
        }
        self.flush_stdout().await?;
        self.writer.end_stdout(self.id).await?;
        if self.stderr_used.load(Ordering::Relaxed) {
            self.writer.end_stderr(self.id).await?;
        }
        Ok(())
    }

    /// Emits this session's `END_REQUEST` record. Callers must have already
    /// called [`Session::finish_output`] so STDOUT/STDERR are terminated
    /// first, per §4.1's ordering requirement.
    pub async fn end_request(
        &self,
        app_status: u32,
        protocol_status: crate::record::ProtocolStatus,
    ) -> std::io::Result<()> {
        self.writer.end_request(self.id, app_status, protocol_status).await
    }

    /// Marks the session cancelled (ABORT_REQUEST, peer close, or engine
    /// shutdown) and wakes anything waiting on [`Session::cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the session is cancelled; used at handler suspension
    /// points to deliver an interruption signal (§4.5).
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.cancel_notify.notified().await;
    }

    pub fn stdin_pipe(&self) -> &Arc<Pipe> {
        &self.stdin_pipe
    }

    pub fn data_pipe(&self) -> Option<&Arc<Pipe>> {
        self.data_pipe.as_ref()
    }
}

/// The outcome a role handler returns; drives §4.4's "handler failure"
/// branch (session-level failure, interruption, or unexpected error are
/// all confined to this session).
pub enum HandlerOutcome {
    /// Completed normally. `exit_code` becomes `END_REQUEST`'s `appStatus`
    /// if the handler called [`Session::exit`], else 0.
    Ok,
    /// A recoverable, session-scoped failure. Commits a 500 status if
    /// headers are uncommitted.
    SessionFailure(String),
    /// The handler observed cancellation and returned early.
    Interrupted,
    /// An unexpected error: logged with full detail, session still ends
    /// cleanly and other sessions on the connection are unaffected.
    Unexpected(String),
}

/// Maps a [`StreamAborted`]/I/O failure while reading STDIN/DATA to the
/// cancellation cause the engine should record for diagnostics.
pub fn abort_cause_from_stream(err: &StreamAborted) -> AbortCause {
    err.0.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::test_support::RecordingSink;
    use crate::spill::PipeConfig;

    fn new_session(role: Role, writer: crate::stream::WriterHandle) -> Arc<Session> {
        let stdin = Arc::new(Pipe::new(PipeConfig::default()));
        let data = if role == Role::Filter {
            Some(Arc::new(Pipe::new(PipeConfig::default())))
        } else {
            None
        };
        Session::new(
            1,
            role,
            true,
            Params::default(),
            stdin,
            data,
            writer,
            8192,
            Diagnostics::new(1, "test".into()),
        )
    }

    #[tokio::test]
    async fn deferred_header_then_write_commits_once() {
        let (writer, sink) = RecordingSink::spawn();
        let session = new_session(Role::Responder, writer);
        session.set_field("Content-Type", "text/plain").await.unwrap();
        session.write_stdout(b"hello").await.unwrap();
        session.finish_output().await.unwrap();

        let stdout = sink.stdout_text(1).await;
        assert_eq!(
            stdout,
            "Status: 200 OK\r\nContent-Type: text/plain\r\n\r\nhello"
        );
        assert!(sink.stdout_ended(1).await);
    }

    #[tokio::test]
    async fn header_mutation_after_commit_is_too_late() {
        let (writer, _sink) = RecordingSink::spawn();
        let session = new_session(Role::Responder, writer);
        session.write_stdout(b"x").await.unwrap();
        let err = session.set_field("X-Late", "1").await.unwrap_err();
        assert!(matches!(err, UsageError::TooLate));
    }

    #[tokio::test]
    async fn authorizer_promotes_status_on_variable() {
        let (writer, sink) = RecordingSink::spawn();
        let session = new_session(Role::Authorizer, writer);
        session.set_variable("USER", "alice").await.unwrap();
        session.finish_output().await.unwrap();
        let stdout = sink.stdout_text(1).await;
        assert_eq!(stdout, "Status: 401 Unauthorized\r\nVariable-USER: alice\r\n\r\n");
    }

    #[tokio::test]
    async fn variable_prefix_rejected_via_set_field() {
        let (writer, _sink) = RecordingSink::spawn();
        let session = new_session(Role::Authorizer, writer);
        let err = session.set_field("Variable-X", "y").await.unwrap_err();
        assert!(matches!(err, UsageError::Header(_)));
    }

    #[tokio::test]
    async fn buffer_size_clamped_returns_false() {
        let (writer, _sink) = RecordingSink::spawn();
        let session = new_session(Role::Responder, writer);
        let exact = session.set_buffer_size(16).unwrap();
        assert!(!exact);
    }
}
