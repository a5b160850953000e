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

//! Per-session/per-connection diagnostic identity.
//!
//! The engine tags every `tracing` span touching a session with a stable
//! identity string so operators can correlate PARAMS parsing, handler
//! dispatch and writer-serializer activity for the same request across log
//! lines, without the runtime itself collecting metrics (explicitly out of
//! scope).

use std::fmt;

/// A human-readable identity for one session, carried into `tracing` spans
/// and exposed to handlers via `Session::diagnostics()`.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    connection_id: u64,
    session_id: u16,
    peer: String,
}

impl Diagnostics {
    pub fn new(connection_id: u64, peer: String) -> Self {
        Diagnostics {
            connection_id,
            session_id: 0,
            peer,
        }
    }

    pub(crate) fn for_session(connection_id: u64, peer: String, session_id: u16) -> Self {
        Diagnostics {
            connection_id,
            session_id,
            peer,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// A `SERVER_SOFTWARE`-style identity string for this build, e.g.
/// `fastcgi-runtime/0.1.0`. Used only in startup/diagnostic logging; the
/// runtime never injects it into a session's CGI variables.
pub fn server_software() -> String {
    format!("fastcgi-runtime/{}", env!("LIB_BUILD_VERSION"))
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn={} sess={} peer={}",
            self.connection_id, self.session_id, self.peer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_all_fields() {
        let d = Diagnostics::for_session(7, "127.0.0.1:9000".into(), 3);
        assert_eq!(d.to_string(), "conn=7 sess=3 peer=127.0.0.1:9000");
    }
}
