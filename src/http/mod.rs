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

//! CGI/HTTP conveniences layered on top of the core runtime: the status
//! reason-phrase table the session commit path needs, plus a couple of
//! pure-function helpers (`PathInfo` splitting, multipart boundary
//! splitting) useful to Responder handlers but not required by the wire
//! protocol itself.

pub mod multipart;
pub mod path;
pub mod status;
