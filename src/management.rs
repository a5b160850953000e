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

//! Management record handling: `GET_VALUES` / `GET_VALUES_RESULT` and
//! `UNKNOWN_TYPE`, both addressed to request id 0 (§4.4).
//!
//! Per the protocol, a queried name the engine doesn't recognize is simply
//! omitted from the result rather than causing an error -- "truncate and
//! omit" (documented as an Open Question resolution in the project's
//! design notes).

use crate::config::EngineConfig;
use crate::record::{decode_nv_pairs, encode_nv_pair};

const FCGI_MAX_CONNS: &[u8] = b"FCGI_MAX_CONNS";
const FCGI_MAX_REQS: &[u8] = b"FCGI_MAX_REQS";
const FCGI_MPXS_CONNS: &[u8] = b"FCGI_MPXS_CONNS";

/// Builds the `GET_VALUES_RESULT` payload answering a `GET_VALUES` query.
/// Recognized names are `FCGI_MAX_CONNS`, `FCGI_MAX_REQS` and
/// `FCGI_MPXS_CONNS`; any other queried name is silently dropped from the
/// result, per the protocol's "unknown names are omitted" contract.
pub fn build_get_values_result(query: &[u8], config: &EngineConfig) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, _value) in decode_nv_pairs(query) {
        let answer: Option<Vec<u8>> = match name.as_slice() {
            n if n == FCGI_MAX_CONNS => Some(config.max_conn.to_string().into_bytes()),
            n if n == FCGI_MAX_REQS => Some(config.max_sess.to_string().into_bytes()),
            n if n == FCGI_MPXS_CONNS => {
                Some(if config.multiplexing_enabled() { b"1".to_vec() } else { b"0".to_vec() })
            }
            _ => None,
        };
        if let Some(value) = answer {
            encode_nv_pair(&name, &value, &mut out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_nv_pair as enc;

    fn query(names: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for name in names {
            enc(name, b"", &mut out);
        }
        out
    }

    #[test]
    fn answers_known_names() {
        let config = EngineConfig::default();
        let q = query(&[FCGI_MAX_CONNS, FCGI_MAX_REQS, FCGI_MPXS_CONNS]);
        let result = build_get_values_result(&q, &config);
        let pairs = decode_nv_pairs(&result);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].1, config.max_conn.to_string().into_bytes());
        assert_eq!(pairs[2].1, b"0".to_vec());
    }

    #[test]
    fn unknown_names_are_omitted() {
        let config = EngineConfig::default();
        let q = query(&[b"FCGI_MAX_CONNS", b"SOME_UNKNOWN_NAME"]);
        let result = build_get_values_result(&q, &config);
        let pairs = decode_nv_pairs(&result);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, FCGI_MAX_CONNS);
    }

    #[test]
    fn multiplexing_flag_reflects_config() {
        let mut config = EngineConfig::default();
        config.max_sess_per_conn = 8;
        let q = query(&[FCGI_MPXS_CONNS]);
        let result = build_get_values_result(&q, &config);
        let pairs = decode_nv_pairs(&result);
        assert_eq!(pairs[0].1, b"1".to_vec());
    }
}
