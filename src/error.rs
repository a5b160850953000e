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

//! Error types and result aliases for the runtime.
//!
//! Each layer (codec, pipe, session, engine) defines its own error enum at
//! its boundary, following the teacher crate's `ClientError` shape: an
//! `#[error(transparent)]` I/O variant plus structured variants for
//! protocol-level conditions. [`RuntimeError`] is the type erased at the
//! crate's outermost fallible entry points.

use std::sync::Arc;

use crate::header::HeaderFieldError;
use crate::record::CodecError;

/// Result alias for fallible runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// The reason a pipe or stream was aborted, shared (via `Arc`) between
/// every pending and future read once set, per §4.2's pipe invariants.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AbortCause {
    #[error("the peer sent ABORT_REQUEST for this session")]
    RequestAborted,
    #[error("the connection closed before the stream finished")]
    ConnectionClosed,
    #[error("the connection failed: {0}")]
    ConnectionError(Arc<CodecError>),
    #[error("the engine is shutting down")]
    EngineShutdown,
    #[error("temporary spill file I/O failed: {0}")]
    SpillIo(Arc<std::io::Error>),
}

/// A read from a session's inbound stream failed because the stream was
/// aborted, as distinct from a clean end-of-stream (§4.3, §7).
#[derive(Debug, Clone, thiserror::Error)]
#[error("stream aborted: {0}")]
pub struct StreamAborted(pub AbortCause);

/// Errors a handler can get back from session-context operations (§6's
/// "usage error" row): confined to the call, never to other sessions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UsageError {
    #[error(transparent)]
    Header(#[from] HeaderFieldError),
    #[error("headers were already committed to the wire; further mutation is too late")]
    TooLate,
    #[error("exit code must be >= 0, got {0}")]
    NegativeExitCode(i64),
}

/// Top-level error type for fallible engine/connection-level operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("the engine has no handler installed for role {0:?}")]
    NoHandlerForRole(crate::record::Role),
}
