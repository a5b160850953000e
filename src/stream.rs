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

//! Session-facing I/O handles.
//!
//! [`InboundStream`] is a thin, purpose-built async reader over a
//! [`Pipe`](crate::spill::Pipe), used for a session's STDIN and (Filter-only)
//! DATA streams. [`WriterMsg`] is the message a session sends to the
//! connection's writer serializer task to place STDOUT/STDERR content (and
//! eventually `END_REQUEST`) on the wire, in session order but interleaved
//! across sessions by the serializer (§4.4, §5).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::StreamAborted;
use crate::record::ProtocolStatus;
use crate::spill::{Pipe, PipeError};

/// A session's STDIN or DATA stream: bytes collected by the connection
/// engine as PARAMS/STDIN/DATA records arrive, drained by the handler.
pub struct InboundStream {
    pipe: Arc<Pipe>,
}

impl InboundStream {
    pub(crate) fn new(pipe: Arc<Pipe>) -> Self {
        InboundStream { pipe }
    }

    /// Reads up to `buf.len()` bytes. Returns `Ok(0)` only once the stream
    /// has been cleanly closed and fully drained; any other termination
    /// surfaces as `Err`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamAborted> {
        self.pipe.read(buf).await.map_err(|e| match e {
            PipeError::Aborted(cause) => StreamAborted(cause),
            PipeError::TempFileIo(err) => {
                StreamAborted(crate::error::AbortCause::SpillIo(err))
            }
        })
    }

    /// Reads until clean end-of-stream, appending to `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<(), StreamAborted> {
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

/// A message a session hands to the connection's writer serializer task.
/// The serializer is the sole writer of the underlying transport, so every
/// outbound record funnels through this channel (§5).
#[derive(Debug)]
pub enum WriterMsg {
    Stdout { session_id: u16, bytes: Vec<u8> },
    StdoutEnd { session_id: u16 },
    Stderr { session_id: u16, bytes: Vec<u8> },
    StderrEnd { session_id: u16 },
    EndRequest {
        session_id: u16,
        app_status: u32,
        protocol_status: ProtocolStatus,
    },
    GetValuesResult(Vec<u8>),
    UnknownType(u8),
}

/// The channel handle a session writes its output through. A thin wrapper
/// over `mpsc::Sender<WriterMsg>` so [`crate::session::Session`] doesn't
/// need to know the serializer's channel depth or backpressure policy.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterMsg>,
}

impl WriterHandle {
    pub fn new(tx: mpsc::Sender<WriterMsg>) -> Self {
        WriterHandle { tx }
    }

    async fn send(&self, msg: WriterMsg) -> std::io::Result<()> {
        self.tx.send(msg).await.map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "connection writer task has shut down",
            )
        })
    }

    pub async fn send_stdout(&self, session_id: u16, bytes: Vec<u8>) -> std::io::Result<()> {
        self.send(WriterMsg::Stdout { session_id, bytes }).await
    }

    pub async fn send_stderr(&self, session_id: u16, bytes: Vec<u8>) -> std::io::Result<()> {
        self.send(WriterMsg::Stderr { session_id, bytes }).await
    }

    pub async fn end_stdout(&self, session_id: u16) -> std::io::Result<()> {
        self.send(WriterMsg::StdoutEnd { session_id }).await
    }

    pub async fn end_stderr(&self, session_id: u16) -> std::io::Result<()> {
        self.send(WriterMsg::StderrEnd { session_id }).await
    }

    pub async fn end_request(
        &self,
        session_id: u16,
        app_status: u32,
        protocol_status: ProtocolStatus,
    ) -> std::io::Result<()> {
        self.send(WriterMsg::EndRequest {
            session_id,
            app_status,
            protocol_status,
        })
        .await
    }

    pub(crate) async fn tx_get_values_result(&self, bytes: Vec<u8>) -> std::io::Result<()> {
        self.send(WriterMsg::GetValuesResult(bytes)).await
    }

    pub(crate) async fn tx_unknown_type(&self, byte: u8) -> std::io::Result<()> {
        self.send(WriterMsg::UnknownType(byte)).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        stdout: HashMap<u16, Vec<u8>>,
        stdout_ended: HashMap<u16, bool>,
        end_requests: Vec<(u16, u32, ProtocolStatus)>,
    }

    /// Spawns a background drain of a `WriterMsg` channel into an in-memory
    /// buffer, for asserting on the exact bytes a session would have put on
    /// the wire without standing up a real connection.
    pub struct RecordingSink {
        state: Arc<Mutex<Recorded>>,
    }

    impl RecordingSink {
        pub fn spawn() -> (WriterHandle, RecordingSink) {
            let (tx, mut rx) = mpsc::channel(64);
            let state = Arc::new(Mutex::new(Recorded::default()));
            let task_state = state.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    let mut state = task_state.lock().await;
                    match msg {
                        WriterMsg::Stdout { session_id, bytes } => {
                            state.stdout.entry(session_id).or_default().extend(bytes);
                        }
                        WriterMsg::StdoutEnd { session_id } => {
                            state.stdout_ended.insert(session_id, true);
                        }
                        WriterMsg::EndRequest {
                            session_id,
                            app_status,
                            protocol_status,
                        } => {
                            state
                                .end_requests
                                .push((session_id, app_status, protocol_status));
                        }
                        _ => {}
                    }
                }
            });
            (WriterHandle::new(tx), RecordingSink { state })
        }

        pub async fn stdout_text(&self, session_id: u16) -> String {
            let state = self.state.lock().await;
            String::from_utf8(state.stdout.get(&session_id).cloned().unwrap_or_default())
                .unwrap()
        }

        pub async fn stdout_ended(&self, session_id: u16) -> bool {
            let state = self.state.lock().await;
            *state.stdout_ended.get(&session_id).unwrap_or(&false)
        }
    }
}
