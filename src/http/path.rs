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

//! Splits the `SCRIPT_NAME`/`PATH_INFO`/`QUERY_STRING` trio out of a
//! session's [`Params`](crate::params::Params), the way a CGI-compliant
//! front-end sets them (RFC 3875 §4.1).
//!
//! This is a pure convenience for Responder/Filter handlers that want a
//! structured view of the request target; it does not perform the web
//! server's own front-end path resolution (no `proxy:` scheme rewriting,
//! no rewrite-rule evaluation -- those belong to the server, not the
//! application runtime).

use crate::params::Params;

/// The request-target fields a CGI front-end conventionally supplies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathInfo {
    pub script_name: String,
    pub path_info: String,
    pub query_string: String,
}

impl PathInfo {
    /// Reads `SCRIPT_NAME`, `PATH_INFO` and `QUERY_STRING` out of `params`,
    /// defaulting any that are absent or not valid UTF-8 to an empty string.
    pub fn from_params(params: &Params) -> Self {
        PathInfo {
            script_name: params.get("SCRIPT_NAME").unwrap_or_default().to_string(),
            path_info: params.get("PATH_INFO").unwrap_or_default().to_string(),
            query_string: params.get("QUERY_STRING").unwrap_or_default().to_string(),
        }
    }

    /// The full logical path the client requested: `SCRIPT_NAME` followed
    /// by `PATH_INFO`, with no normalization applied.
    pub fn full_path(&self) -> String {
        format!("{}{}", self.script_name, self.path_info)
    }

    /// Splits `QUERY_STRING` into `(key, value)` pairs on `&`, further
    /// splitting each pair on the first `=`. A key with no `=` yields an
    /// empty value. Percent-decoding is left to the caller.
    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.query_string
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::encode_nv_pair;

    #[test]
    fn splits_standard_fields() {
        let mut buf = Vec::new();
        encode_nv_pair(b"SCRIPT_NAME", b"/app.php", &mut buf);
        encode_nv_pair(b"PATH_INFO", b"/widgets/7", &mut buf);
        encode_nv_pair(b"QUERY_STRING", b"a=1&b=2", &mut buf);
        let params = Params::parse(&buf);

        let info = PathInfo::from_params(&params);
        assert_eq!(info.full_path(), "/app.php/widgets/7");
        let pairs: Vec<_> = info.query_pairs().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2")]);
    }

    #[test]
    fn missing_fields_default_empty() {
        let params = Params::parse(&[]);
        let info = PathInfo::from_params(&params);
        assert_eq!(info, PathInfo::default());
    }

    #[test]
    fn key_without_equals_has_empty_value() {
        let mut buf = Vec::new();
        encode_nv_pair(b"QUERY_STRING", b"flag", &mut buf);
        let params = Params::parse(&buf);
        let info = PathInfo::from_params(&params);
        assert_eq!(info.query_pairs().collect::<Vec<_>>(), vec![("flag", "")]);
    }
}
