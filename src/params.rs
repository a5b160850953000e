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

//! The CGI variable map built from a session's `PARAMS` stream.
//!
//! Per §3, the map is not visible to the handler until the stream is
//! terminated by the first empty `PARAMS` record; the engine builds it in
//! one pass once all bytes are collected.

use std::collections::HashMap;
use std::fmt;

use crate::record::decode_nv_pairs;

/// CGI variables parsed from a `PARAMS` stream.
///
/// Names are the raw bytes sent on the wire (conventionally US-ASCII, per
/// §4.1); values are passed through verbatim and only interpreted as UTF-8
/// on demand via [`Params::get`].
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: HashMap<Vec<u8>, Vec<u8>>,
}

impl Params {
    /// Parses a complete, concatenated `PARAMS` payload (the bytes of every
    /// non-empty `PARAMS` record on a session, in order).
    pub fn parse(payload: &[u8]) -> Self {
        let mut entries = HashMap::new();
        for (name, value) in decode_nv_pairs(payload) {
            entries.insert(name, value);
        }
        Params { entries }
    }

    /// Looks up a variable by name, returning its value as `&str` if it is
    /// present and valid UTF-8.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name.as_bytes())
            .and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Looks up a variable's raw bytes, without any UTF-8 interpretation.
    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name.as_bytes()).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// `REQUEST_METHOD`, the one variable nearly every handler needs.
    pub fn request_method(&self) -> Option<&str> {
        self.get("REQUEST_METHOD")
    }

    /// `CONTENT_LENGTH`, parsed as a byte count when present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        self.get("CONTENT_LENGTH").and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({} vars)", self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_nv_pair;

    #[test]
    fn parses_standard_cgi_vars() {
        let mut buf = Vec::new();
        encode_nv_pair(b"REQUEST_METHOD", b"GET", &mut buf);
        encode_nv_pair(b"SCRIPT_NAME", b"/index.php", &mut buf);

        let params = Params::parse(&buf);
        assert_eq!(params.request_method(), Some("GET"));
        assert_eq!(params.get("SCRIPT_NAME"), Some("/index.php"));
        assert_eq!(params.get("MISSING"), None);
    }

    #[test]
    fn empty_payload_is_empty_map() {
        let params = Params::parse(&[]);
        assert!(params.is_empty());
    }
}
