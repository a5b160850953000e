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

#![warn(rust_2018_idioms)]
#![warn(clippy::dbg_macro, clippy::print_stdout)]
#![doc = include_str!("../README.md")]

mod config;
pub mod connection;
mod diagnostics;
mod dispatcher;
mod engine;
mod error;
mod header;
pub mod http;
mod management;
pub mod params;
pub mod record;
pub mod role;
pub mod session;
mod spill;
pub mod stream;
pub mod transport;

pub use crate::config::EngineConfig;
pub use crate::diagnostics::{server_software, Diagnostics};
pub use crate::engine::{Engine, EngineBuilder, ShutdownHandle};
pub use crate::error::{AbortCause, RuntimeError, RuntimeResult, StreamAborted, UsageError};
pub use crate::params::Params;
pub use crate::record::{ProtocolStatus, Role};
pub use crate::role::{handler_fn, RoleHandler};
pub use crate::session::{HandlerOutcome, Session};
pub use crate::spill::PipeConfig;
