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

//! HTTP status code -> reason phrase table, used to synthesize the
//! `Status: <code> <reason>` line at header commit time (§4.3).

/// Returns the standard reason phrase for `code`, or `"Unknown"` for any
/// code outside the table (a handler may still set arbitrary codes via
/// `set_status`; commit never fails because of an unrecognized one).
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Whether `code` is one of the 3xx codes for which [`redirect_location`]
/// makes sense.
pub fn is_redirect(code: u16) -> bool {
    (300..400).contains(&code)
}

/// Formats a `Location` header value for a redirect response. Pure
/// convenience: does not itself write anything, so callers decide whether
/// to pair it with `set_status`.
pub fn redirect_location(target: &str) -> String {
    target.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_phrases() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
    }

    #[test]
    fn unknown_code_falls_back() {
        assert_eq!(reason_phrase(599), "Unknown");
    }

    #[test]
    fn redirect_range_detected() {
        assert!(is_redirect(302));
        assert!(!is_redirect(200));
        assert!(!is_redirect(404));
    }
}
