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

//! A minimal Responder that echoes the request body back as
//! `text/plain`, demonstrating how a handler is wired up with
//! [`fastcgi_runtime::Engine`]. Listens on a Unix socket by default, or a
//! TCP address if `FASTCGI_ECHO_ADDR` is set (e.g. `127.0.0.1:9000`);
//! optionally loads tuning from a TOML file named by `FASTCGI_ECHO_CONFIG`.

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use fastcgi_runtime::{EngineBuilder, EngineConfig, HandlerOutcome, Session};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    setup_logging();

    let config = match std::env::var("FASTCGI_ECHO_CONFIG") {
        Ok(path) => EngineConfig::from_toml_file(std::path::Path::new(&path))
            .unwrap_or_else(|err| {
                tracing::error!(%err, "failed to load config, falling back to defaults");
                EngineConfig::default()
            }),
        Err(_) => EngineConfig::default(),
    };

    let engine = EngineBuilder::new(config)
        .responder(fastcgi_runtime::handler_fn(echo))
        .build();

    let shutdown = engine.shutdown_handle();
    tokio::spawn(shutdown.trigger_on_ctrl_c());

    if let Ok(addr) = std::env::var("FASTCGI_ECHO_ADDR") {
        tracing::info!(%addr, "listening for FastCGI connections over TCP");
        let supplier = fastcgi_runtime::transport::TcpSupplier::bind(&addr).await?;
        return engine.serve(supplier).await;
    }

    #[cfg(unix)]
    {
        let path = std::env::var("FASTCGI_ECHO_SOCKET")
            .unwrap_or_else(|_| "/tmp/fastcgi-echo.sock".to_string());
        let _ = std::fs::remove_file(&path);
        tracing::info!(%path, "listening for FastCGI connections over a Unix socket");
        let supplier = fastcgi_runtime::transport::unix::UnixSupplier::bind(&path)?;
        engine.serve(supplier).await
    }
    #[cfg(not(unix))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "set FASTCGI_ECHO_ADDR on non-Unix platforms",
        ))
    }
}

async fn echo(session: Arc<Session>) -> HandlerOutcome {
    session
        .set_field("Content-Type", "text/plain")
        .await
        .expect("headers not yet committed");

    if session.params.request_method() == Some("GET") {
        let body = format!(
            "ok\nSCRIPT_NAME={}\n",
            session.params.get("SCRIPT_NAME").unwrap_or_default()
        );
        if session.write_stdout(body.as_bytes()).await.is_err() {
            return HandlerOutcome::Interrupted;
        }
        return HandlerOutcome::Ok;
    }

    let mut stdin = session.stdin_reader();
    let mut body = Vec::new();
    if let Err(err) = stdin.read_to_end(&mut body).await {
        return HandlerOutcome::SessionFailure(err.to_string());
    }
    if session.write_stdout(&body).await.is_err() {
        return HandlerOutcome::Interrupted;
    }
    HandlerOutcome::Ok
}

fn setup_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
