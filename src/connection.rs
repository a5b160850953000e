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

//! The connection engine: demultiplexes one FastCGI connection's records
//! into concurrent sessions (§4.4).
//!
//! Three tasks cooperate per connection: the reader loop (this module's
//! [`run`]), the writer serializer (the sole writer of the transport, fed
//! by every session's [`crate::stream::WriterHandle`]), and one dispatcher
//! task per in-flight session (`crate::dispatcher`). The reader loop owns
//! the session table and is the only place that inserts or removes entries,
//! so it never needs to lock it against itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::dispatcher::{self, SessionBudget};
use crate::error::AbortCause;
use crate::management::build_get_values_result;
use crate::params::Params;
use crate::record::{
    self, BeginRequestBody, CodecError, ProtocolStatus, RawRecordHead, RecordType, Role,
};
use crate::role::RoleHandler;
use crate::session::Session;
use crate::spill::Pipe;
use crate::stream::{WriterHandle, WriterMsg};

/// The handler registry: at most one [`RoleHandler`] per role. A role with
/// no handler installed answers `UNKNOWN_ROLE` for every request (§4.4).
#[derive(Clone, Default)]
pub struct Handlers {
    pub responder: Option<Arc<dyn RoleHandler>>,
    pub authorizer: Option<Arc<dyn RoleHandler>>,
    pub filter: Option<Arc<dyn RoleHandler>>,
}

impl Handlers {
    fn get(&self, role: Role) -> Option<Arc<dyn RoleHandler>> {
        match role {
            Role::Responder => self.responder.clone(),
            Role::Authorizer => self.authorizer.clone(),
            Role::Filter => self.filter.clone(),
        }
    }
}

struct PendingSession {
    role: Role,
    keep_conn: bool,
    params_buf: Vec<u8>,
    stdin_pipe: Arc<Pipe>,
    data_pipe: Option<Arc<Pipe>>,
    session: Option<Arc<Session>>,
    permit: Option<tokio::sync::OwnedSemaphorePermit>,
    default_buffer_size: usize,
}

/// Runs one connection to completion: reads records until the peer closes,
/// a protocol error occurs, or (once every session is done) the last
/// `BEGIN_REQUEST` asked not to keep the connection open.
pub async fn run<R, W>(
    mut reader: R,
    writer: W,
    config: Arc<EngineConfig>,
    handlers: Handlers,
    budget: SessionBudget,
    connection_id: u64,
    peer: String,
) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer_tx, writer_rx) = mpsc::channel::<WriterMsg>(256);
    let writer_task = tokio::spawn(run_writer(writer, writer_rx));
    let writer_handle = WriterHandle::new(writer_tx);

    let (completions_tx, mut completions_rx) = mpsc::channel::<u16>(64);

    let mut sessions: HashMap<u16, PendingSession> = HashMap::new();
    let mut connection_keep_conn = true;
    let pipe_config = config.pipe_config();

    let result = loop {
        tokio::select! {
            biased;

            completed = completions_rx.recv() => {
                if let Some(session_id) = completed {
                    sessions.remove(&session_id);
                }
            }

            head = record::Header::read_permissive(&mut reader) => {
                match head {
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err),
                    Ok(Some(head)) => {
                        if let Err(err) = handle_record(
                            head,
                            &mut reader,
                            &mut sessions,
                            &config,
                            &pipe_config,
                            &handlers,
                            &budget,
                            &writer_handle,
                            &completions_tx,
                            connection_id,
                            &peer,
                            &mut connection_keep_conn,
                        ).await {
                            break Err(err);
                        }
                    }
                }
            }
        }

        if sessions.is_empty() && !connection_keep_conn {
            break Ok(());
        }
    };

    match &result {
        Ok(()) => {
            // A clean peer close (or the last non-keep-conn request
            // finishing) never completes a session still waiting on PARAMS:
            // nothing will ever send PARAMS now, so no dispatcher task
            // exists to report completion for it. Drop those directly
            // instead of waiting on them forever below.
            sessions.retain(|_, entry| entry.session.is_some());

            // Dispatched sessions are still running a handler. If its
            // STDIN/DATA stream was never terminated before the peer
            // closed, the handler is blocked in a pipe read that would
            // otherwise never return, so the drain loop below would hang
            // forever. Abort those pipes so pending and future reads fail
            // with a stream-aborted error (§4.3).
            for entry in sessions.values() {
                if let Some(session) = &entry.session {
                    session.cancel();
                    entry.stdin_pipe.abort(AbortCause::ConnectionClosed).await;
                    if let Some(data) = &entry.data_pipe {
                        data.abort(AbortCause::ConnectionClosed).await;
                    }
                }
            }
        }
        Err(err) => {
            // A protocol or transport error closes the connection; every
            // live session on it is aborted (§7). Sessions already running
            // a handler are cancelled and their pipes unblocked so they
            // settle promptly through the normal dispatcher completion path
            // (drained below); sessions still waiting on PARAMS never got a
            // dispatcher task, so answer END_REQUEST for them directly.
            let cause = AbortCause::ConnectionError(Arc::new(CodecError::Io(
                std::io::Error::other(err.to_string()),
            )));
            let mut finished = Vec::new();
            for (id, entry) in sessions.iter() {
                if let Some(session) = &entry.session {
                    session.cancel();
                    entry.stdin_pipe.abort(cause.clone()).await;
                    if let Some(data) = &entry.data_pipe {
                        data.abort(cause.clone()).await;
                    }
                } else {
                    let _ = writer_handle
                        .end_request(*id, 1, ProtocolStatus::RequestComplete)
                        .await;
                    finished.push(*id);
                }
            }
            for id in finished {
                sessions.remove(&id);
            }
        }
    }

    // Drain remaining completions so sessions can finish writing even after
    // the reader loop exits (peer closed its write half but still wants
    // responses, or a protocol error on read doesn't invalidate in-flight
    // handlers).
    while !sessions.is_empty() {
        match completions_rx.recv().await {
            Some(id) => {
                sessions.remove(&id);
            }
            None => break,
        }
    }

    drop(writer_handle);
    let _ = writer_task.await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn handle_record<R: AsyncRead + Unpin>(
    head: RawRecordHead,
    reader: &mut R,
    sessions: &mut HashMap<u16, PendingSession>,
    config: &Arc<EngineConfig>,
    pipe_config: &crate::spill::PipeConfig,
    handlers: &Handlers,
    budget: &SessionBudget,
    writer: &WriterHandle,
    completions: &mpsc::Sender<u16>,
    connection_id: u64,
    peer: &str,
    connection_keep_conn: &mut bool,
) -> Result<(), CodecError> {
    let request_id = head.request_id;

    if request_id == record::MANAGEMENT_REQUEST_ID {
        let content = head.read_content(reader).await?;
        return handle_management(head.known_type(), head.type_byte, content, config, writer).await;
    }

    let Some(record_type) = head.known_type() else {
        // Unrecognized type byte on a session request id: disallowed (§4.4).
        // (On the management id this instead gets an UNKNOWN_TYPE reply, see
        // `handle_management`.)
        let _ = head.read_content(reader).await?;
        return Err(CodecError::DisallowedForRequestId(None, request_id));
    };

    match record_type {
        RecordType::BeginRequest => {
            let content = head.read_content(reader).await?;
            handle_begin_request(
                request_id,
                &content,
                sessions,
                config,
                pipe_config,
                handlers,
                budget,
                writer,
                connection_keep_conn,
            )
            .await?;
        }
        RecordType::AbortRequest => {
            let _ = head.read_content(reader).await?;
            handle_abort(request_id, sessions, writer).await;
        }
        RecordType::Params => {
            let content = head.read_content(reader).await?;
            handle_params(
                request_id,
                content,
                sessions,
                handlers,
                writer,
                completions,
                connection_id,
                peer,
            )
            .await;
        }
        RecordType::Stdin => {
            let content = head.read_content(reader).await?;
            if let Some(entry) = sessions.get(&request_id) {
                route_stream_bytes(&entry.stdin_pipe, content).await;
            }
        }
        RecordType::Data => {
            let content = head.read_content(reader).await?;
            if let Some(entry) = sessions.get(&request_id) {
                if let Some(pipe) = &entry.data_pipe {
                    route_stream_bytes(pipe, content).await;
                }
            }
        }
        RecordType::GetValues
        | RecordType::GetValuesResult
        | RecordType::EndRequest
        | RecordType::Stdout
        | RecordType::Stderr
        | RecordType::UnknownType => {
            // Sent only by the engine; receiving one from the peer on a
            // non-management request id is a protocol violation (§4.4).
            let _ = head.read_content(reader).await?;
            return Err(CodecError::DisallowedForRequestId(
                Some(record_type),
                request_id,
            ));
        }
    }
    Ok(())
}

async fn route_stream_bytes(pipe: &Arc<Pipe>, content: Vec<u8>) {
    if content.is_empty() {
        pipe.close_write().await;
    } else if let Err(err) = pipe.write_all(&content).await {
        tracing::debug!(%err, "stream write failed after abort");
    }
}

async fn handle_management(
    record_type: Option<RecordType>,
    type_byte: u8,
    content: Vec<u8>,
    config: &EngineConfig,
    writer: &WriterHandle,
) -> Result<(), CodecError> {
    match record_type {
        Some(RecordType::GetValues) => {
            let result = build_get_values_result(&content, config);
            let _ = writer.tx_get_values_result(result).await;
            Ok(())
        }
        Some(other) => {
            // BEGIN_REQUEST/PARAMS/STDIN/DATA/ABORT_REQUEST (and anything
            // else session-only) addressed to the management id is
            // disallowed (§4.4).
            Err(CodecError::DisallowedForRequestId(
                Some(other),
                record::MANAGEMENT_REQUEST_ID,
            ))
        }
        None => {
            // Unrecognized type byte on the management id replies with
            // UNKNOWN_TYPE rather than closing the connection (§4.6).
            let _ = writer.tx_unknown_type(type_byte).await;
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_begin_request(
    request_id: u16,
    content: &[u8],
    sessions: &mut HashMap<u16, PendingSession>,
    config: &Arc<EngineConfig>,
    pipe_config: &crate::spill::PipeConfig,
    handlers: &Handlers,
    budget: &SessionBudget,
    writer: &WriterHandle,
    connection_keep_conn: &mut bool,
) -> Result<(), CodecError> {
    let Some(raw_role) = BeginRequestBody::raw_role(content) else {
        return Ok(());
    };
    let keep_conn = BeginRequestBody::keep_conn_flag(content);

    if sessions.len() >= config.max_sess_per_conn as usize {
        let _ = writer
            .end_request(request_id, 0, ProtocolStatus::Overloaded)
            .await;
        return Ok(());
    }

    let Some(role) = Role::from_u16(raw_role) else {
        let _ = writer
            .end_request(request_id, 0, ProtocolStatus::UnknownRole)
            .await;
        return Ok(());
    };

    if handlers.get(role).is_none() {
        let _ = writer
            .end_request(request_id, 0, ProtocolStatus::UnknownRole)
            .await;
        return Ok(());
    }

    let Some(permit) = budget.try_acquire() else {
        let _ = writer
            .end_request(request_id, 0, ProtocolStatus::Overloaded)
            .await;
        return Ok(());
    };

    *connection_keep_conn = *connection_keep_conn && keep_conn;

    let data_pipe = if role == Role::Filter {
        Some(Arc::new(Pipe::new(pipe_config.clone())))
    } else {
        None
    };

    sessions.insert(
        request_id,
        PendingSession {
            role,
            keep_conn,
            params_buf: Vec::new(),
            stdin_pipe: Arc::new(Pipe::new(pipe_config.clone())),
            data_pipe,
            session: None,
            permit: Some(permit),
            default_buffer_size: config.default_buffer_size,
        },
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_params(
    request_id: u16,
    content: Vec<u8>,
    sessions: &mut HashMap<u16, PendingSession>,
    handlers: &Handlers,
    writer: &WriterHandle,
    completions: &mpsc::Sender<u16>,
    connection_id: u64,
    peer: &str,
) {
    let Some(entry) = sessions.get_mut(&request_id) else {
        return;
    };
    if content.is_empty() {
        let params = Params::parse(&entry.params_buf);
        let Some(permit) = entry.permit.take() else {
            return;
        };
        let Some(handler) = handlers.get(entry.role) else {
            return;
        };
        let diagnostics = Diagnostics::for_session(connection_id, peer.to_string(), request_id);
        let session = Session::new(
            request_id,
            entry.role,
            entry.keep_conn,
            params,
            entry.stdin_pipe.clone(),
            entry.data_pipe.clone(),
            writer.clone(),
            entry.default_buffer_size,
            diagnostics,
        );
        entry.session = Some(session.clone());
        dispatcher::spawn_session(session, handler, permit, completions.clone());
    } else {
        entry.params_buf.extend_from_slice(&content);
    }
}

async fn handle_abort(request_id: u16, sessions: &mut HashMap<u16, PendingSession>, writer: &WriterHandle) {
    let Some(entry) = sessions.get(&request_id) else {
        return;
    };
    if let Some(session) = &entry.session {
        session.cancel();
        entry.stdin_pipe.abort(AbortCause::RequestAborted).await;
        if let Some(data) = &entry.data_pipe {
            data.abort(AbortCause::RequestAborted).await;
        }
    } else {
        // Aborted before PARAMS completed: no handler was ever dispatched,
        // so answer END_REQUEST directly and drop the pending entry.
        let _ = writer
            .end_request(request_id, 0, ProtocolStatus::RequestComplete)
            .await;
        sessions.remove(&request_id);
    }
}

/// The writer serializer: the sole task allowed to write to the transport,
/// turning [`WriterMsg`]s from every session into wire records (§5).
async fn run_writer<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<WriterMsg>) {
    while let Some(msg) = rx.recv().await {
        let result = match msg {
            WriterMsg::Stdout { session_id, bytes } => {
                record::write_stream_chunk(&mut writer, RecordType::Stdout, session_id, &bytes).await
            }
            WriterMsg::StdoutEnd { session_id } => {
                record::write_stream_end(&mut writer, RecordType::Stdout, session_id).await
            }
            WriterMsg::Stderr { session_id, bytes } => {
                record::write_stream_chunk(&mut writer, RecordType::Stderr, session_id, &bytes).await
            }
            WriterMsg::StderrEnd { session_id } => {
                record::write_stream_end(&mut writer, RecordType::Stderr, session_id).await
            }
            WriterMsg::EndRequest {
                session_id,
                app_status,
                protocol_status,
            } => record::write_end_request(&mut writer, session_id, app_status, protocol_status).await,
            WriterMsg::GetValuesResult(bytes) => {
                record::Header::write(&mut writer, RecordType::GetValuesResult, record::MANAGEMENT_REQUEST_ID, &bytes).await
            }
            WriterMsg::UnknownType(byte) => record::write_unknown_type(&mut writer, byte).await,
        };
        if let Err(err) = result {
            tracing::debug!(%err, "connection writer failed; stopping serializer");
            break;
        }
    }
    let _ = writer.shutdown().await;
}
