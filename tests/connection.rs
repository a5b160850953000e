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

//! End-to-end tests driving [`fastcgi_runtime::Engine`] over an in-memory
//! duplex stream, the way a real peer's connection would look to the
//! engine, without any real socket or process involved.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

use fastcgi_runtime::record::{self, ProtocolStatus, RecordType};
use fastcgi_runtime::transport::{Connection, ConnectionSupplier};
use fastcgi_runtime::{handler_fn, EngineBuilder, EngineConfig, HandlerOutcome, Session};

struct DuplexConnection(DuplexStream);

impl Connection for DuplexConnection {
    fn peer_description(&self) -> String {
        "test-peer".to_string()
    }
}

impl AsyncRead for DuplexConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl AsyncWrite for DuplexConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }
}

/// Hands out exactly one connection, then pends forever -- there's no
/// second peer in these tests, and the engine's accept loop needs
/// something to keep awaiting once the one connection is served.
struct OneShotSupplier {
    conn: Option<DuplexConnection>,
}

impl ConnectionSupplier for OneShotSupplier {
    type Conn = DuplexConnection;

    async fn accept(&mut self) -> std::io::Result<DuplexConnection> {
        match self.conn.take() {
            Some(conn) => Ok(conn),
            None => std::future::pending().await,
        }
    }
}

fn begin_request_content(role: u16, keep_conn: bool) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[0..2].copy_from_slice(&role.to_be_bytes());
    buf[2] = if keep_conn { 1 } else { 0 };
    buf
}

async fn write_record(
    client: &mut DuplexStream,
    r#type: RecordType,
    request_id: u16,
    content: &[u8],
) {
    record::Header::write(client, r#type, request_id, content)
        .await
        .unwrap();
}

async fn read_record(client: &mut DuplexStream) -> (RecordType, u16, Vec<u8>) {
    let fut = async {
        let header = record::Header::read(client)
            .await
            .expect("header read failed")
            .expect("connection closed unexpectedly");
        let content = header.read_content(client).await.expect("content read failed");
        (header.r#type, header.request_id, content)
    };
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out waiting for a record")
}

fn spawn_engine(handlers: EngineBuilder) -> (Arc<fastcgi_runtime::Engine>, DuplexStream) {
    let (server_half, client_half) = tokio::io::duplex(16 * 1024);
    let engine = Arc::new(handlers.build());
    let supplier = OneShotSupplier {
        conn: Some(DuplexConnection(server_half)),
    };
    let spawned = engine.clone();
    tokio::spawn(async move {
        let _ = spawned.serve(supplier).await;
    });
    (engine, client_half)
}

async fn echo_handler(session: Arc<Session>) -> HandlerOutcome {
    session.set_field("Content-Type", "text/plain").await.unwrap();
    session.write_stdout(b"hi").await.unwrap();
    session.exit(0).await.unwrap();
    HandlerOutcome::Ok
}

async fn authorizer_handler(session: Arc<Session>) -> HandlerOutcome {
    session.set_variable("USER", "alice").await.unwrap();
    HandlerOutcome::Ok
}

#[tokio::test]
async fn responder_round_trip_ends_connection_without_keep_conn() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(1, false)).await;

    let mut params = Vec::new();
    record::encode_nv_pair(b"REQUEST_METHOD", b"GET", &mut params);
    write_record(&mut client, RecordType::Params, 1, &params).await;
    write_record(&mut client, RecordType::Params, 1, &[]).await;
    write_record(&mut client, RecordType::Stdin, 1, &[]).await;

    let (ty, id, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::Stdout);
    assert_eq!(id, 1);
    let text = String::from_utf8(content).unwrap();
    assert_eq!(text, "Status: 200 OK\r\nContent-Type: text/plain\r\n\r\nhi");

    let (ty, _, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::Stdout);
    assert!(content.is_empty());

    let (ty, id, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::EndRequest);
    assert_eq!(id, 1);
    assert_eq!(u32::from_be_bytes([content[0], content[1], content[2], content[3]]), 0);
    assert_eq!(content[4], ProtocolStatus::RequestComplete as u8);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn authorizer_promotes_status_to_401_on_variable() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).authorizer(handler_fn(authorizer_handler)),
    );

    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(2, false)).await;
    write_record(&mut client, RecordType::Params, 1, &[]).await;
    write_record(&mut client, RecordType::Stdin, 1, &[]).await;

    let (ty, _, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::Stdout);
    let text = String::from_utf8(content).unwrap();
    assert_eq!(text, "Status: 401 Unauthorized\r\nVariable-USER: alice\r\n\r\n");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn abort_before_params_complete_answers_end_request_directly() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(1, true)).await;
    let mut partial = Vec::new();
    record::encode_nv_pair(b"REQUEST_METHOD", b"GET", &mut partial);
    write_record(&mut client, RecordType::Params, 1, &partial).await;
    write_record(&mut client, RecordType::AbortRequest, 1, &[]).await;

    let (ty, id, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::EndRequest);
    assert_eq!(id, 1);
    assert_eq!(content[4], ProtocolStatus::RequestComplete as u8);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_role_is_rejected_with_no_handler_installed() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    // Role 3 is Filter; no Filter handler was installed above.
    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(3, false)).await;

    let (ty, id, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::EndRequest);
    assert_eq!(id, 1);
    assert_eq!(content[4], ProtocolStatus::UnknownRole as u8);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn get_values_answers_known_names_and_omits_unknown() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    let mut query = Vec::new();
    record::encode_nv_pair(b"FCGI_MAX_CONNS", b"", &mut query);
    record::encode_nv_pair(b"FCGI_MPXS_CONNS", b"", &mut query);
    record::encode_nv_pair(b"SOME_UNKNOWN_NAME", b"", &mut query);
    write_record(&mut client, RecordType::GetValues, 0, &query).await;

    let (ty, id, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::GetValuesResult);
    assert_eq!(id, 0);
    let pairs = record::decode_nv_pairs(&content);
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0, b"FCGI_MAX_CONNS");
    assert_eq!(pairs[0].1, EngineConfig::default().max_conn.to_string().into_bytes());
    assert_eq!(pairs[1].1, b"0".to_vec());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_begin_request_over_the_multiplexing_cap_is_rejected() {
    let config = EngineConfig {
        max_sess_per_conn: 1,
        ..EngineConfig::default()
    };
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(config).responder(handler_fn(echo_handler)),
    );

    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(1, true)).await;
    let mut partial = Vec::new();
    record::encode_nv_pair(b"REQUEST_METHOD", b"GET", &mut partial);
    write_record(&mut client, RecordType::Params, 1, &partial).await;

    write_record(&mut client, RecordType::BeginRequest, 2, &begin_request_content(1, true)).await;

    let (ty, id, content) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::EndRequest);
    assert_eq!(id, 2);
    assert_eq!(content[4], ProtocolStatus::Overloaded as u8);
}

#[tokio::test]
async fn keep_conn_allows_a_second_request_after_the_first_completes() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(1, true)).await;
    write_record(&mut client, RecordType::Params, 1, &[]).await;
    write_record(&mut client, RecordType::Stdin, 1, &[]).await;

    // Drain request 1's STDOUT, empty STDOUT terminator and END_REQUEST.
    let (ty, ..) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::Stdout);
    let (ty, ..) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::Stdout);
    let (ty, id, _) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::EndRequest);
    assert_eq!(id, 1);

    // The connection must still be open: a second request on the same
    // connection is answered normally rather than the peer observing EOF.
    write_record(&mut client, RecordType::BeginRequest, 2, &begin_request_content(1, false)).await;
    write_record(&mut client, RecordType::Params, 2, &[]).await;
    write_record(&mut client, RecordType::Stdin, 2, &[]).await;

    let (ty, id, _) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::Stdout);
    assert_eq!(id, 2);
    let (_, _, _) = read_record(&mut client).await; // empty STDOUT
    let (ty, id, _) = read_record(&mut client).await;
    assert_eq!(ty, RecordType::EndRequest);
    assert_eq!(id, 2);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn get_values_on_a_session_request_id_closes_the_connection() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    // GET_VALUES is only legal on the management request id (0); sending it
    // on a session id is a protocol error that closes the connection.
    write_record(&mut client, RecordType::GetValues, 7, &[]).await;

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("timed out waiting for the connection to close")
        .expect("read failed");
    assert_eq!(n, 0, "connection should have closed after a disallowed record");
}

#[tokio::test]
async fn begin_request_on_the_management_id_closes_the_connection() {
    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(EngineConfig::default()).responder(handler_fn(echo_handler)),
    );

    // BEGIN_REQUEST is only legal on a session request id; sending it on
    // request id 0 is a protocol error that closes the connection.
    write_record(
        &mut client,
        RecordType::BeginRequest,
        0,
        &begin_request_content(1, false),
    )
    .await;

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("timed out waiting for the connection to close")
        .expect("read failed");
    assert_eq!(n, 0, "connection should have closed after a disallowed record");
}

#[tokio::test]
async fn two_multiplexed_sessions_interleave_without_corrupting_either_stream() {
    let config = EngineConfig {
        max_sess_per_conn: 2,
        ..EngineConfig::default()
    };

    async fn chunky_handler(session: Arc<Session>) -> HandlerOutcome {
        let marker = if session.id == 1 { b'a' } else { b'b' };
        session.write_stdout(&vec![marker; 50_000]).await.unwrap();
        HandlerOutcome::Ok
    }

    let (_engine, mut client) = spawn_engine(
        EngineBuilder::new(config).responder(handler_fn(chunky_handler)),
    );

    write_record(&mut client, RecordType::BeginRequest, 1, &begin_request_content(1, true)).await;
    write_record(&mut client, RecordType::Params, 1, &[]).await;
    write_record(&mut client, RecordType::BeginRequest, 3, &begin_request_content(1, true)).await;
    write_record(&mut client, RecordType::Params, 3, &[]).await;
    write_record(&mut client, RecordType::Stdin, 1, &[]).await;
    write_record(&mut client, RecordType::Stdin, 3, &[]).await;

    let mut by_id: std::collections::HashMap<u16, Vec<u8>> = std::collections::HashMap::new();
    let mut ended = std::collections::HashSet::new();
    while ended.len() < 2 {
        let (ty, id, content) = read_record(&mut client).await;
        match ty {
            RecordType::Stdout if content.is_empty() => {
                ended.insert(id);
            }
            RecordType::Stdout => {
                by_id.entry(id).or_default().extend(content);
            }
            RecordType::EndRequest => {}
            other => panic!("unexpected record {other:?}"),
        }
    }

    // Each session's STDOUT starts with its own synthesized header block
    // (no fields set, so just the default status line) before the marker
    // bytes the handler wrote; strip it before comparing bodies.
    let header = b"Status: 200 OK\r\n\r\n";
    assert!(by_id[&1].starts_with(header));
    assert_eq!(&by_id[&1][header.len()..], vec![b'a'; 50_000].as_slice());
    assert!(by_id[&3].starts_with(header));
    assert_eq!(&by_id[&3][header.len()..], vec![b'b'; 50_000].as_slice());

    client.shutdown().await.unwrap();
}
