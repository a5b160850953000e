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

//! A pure-function MIME multipart boundary splitter for request bodies a
//! Responder handler reads off STDIN (`multipart/form-data`, RFC 2046 §5.1).
//!
//! This module only splits on the boundary; it does not parse headers
//! within a part or decode content, leaving that to the handler.

/// One `--boundary`-delimited part: its raw header block and body, both as
/// byte slices into the original buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub headers: &'a [u8],
    pub body: &'a [u8],
}

/// Splits `body` on `--<boundary>` delimiters, returning each part's header
/// block and content. The boundary string should be the value taken from
/// the request's `Content-Type: multipart/form-data; boundary=...` header,
/// without the leading `--`. Returns an empty vector if the closing
/// delimiter (`--<boundary>--`) is never found.
pub fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<Part<'a>> {
    let delim = format!("--{boundary}").into_bytes();
    let mut parts = Vec::new();

    let mut segments: Vec<&[u8]> = Vec::new();
    let mut rest = body;
    while let Some(pos) = find(rest, &delim) {
        segments.push(&rest[..pos]);
        rest = &rest[pos + delim.len()..];
    }
    segments.push(rest);

    // segments[0] is the preamble before the first delimiter; the final
    // segment begins with the closing delimiter's trailing "--" and is
    // dropped along with it.
    if segments.len() < 2 {
        return parts;
    }
    let body_segments = &segments[1..segments.len() - 1];

    for seg in body_segments {
        let seg = trim_leading_crlf(seg);
        let trimmed = trim_trailing_crlf(seg);
        if let Some(split_at) = find(trimmed, b"\r\n\r\n") {
            parts.push(Part {
                headers: &trimmed[..split_at],
                body: &trimmed[split_at + 4..],
            });
        } else {
            parts.push(Part {
                headers: &trimmed[..0],
                body: trimmed,
            });
        }
    }
    parts
}

fn trim_leading_crlf(buf: &[u8]) -> &[u8] {
    buf.strip_prefix(b"\r\n").unwrap_or(buf)
}

fn trim_trailing_crlf(buf: &[u8]) -> &[u8] {
    buf.strip_suffix(b"\r\n").unwrap_or(buf)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_two_parts() {
        let body = b"--B\r\n\
Content-Disposition: form-data; name=\"a\"\r\n\
\r\n\
hello\r\n\
--B\r\n\
Content-Disposition: form-data; name=\"b\"\r\n\
\r\n\
world\r\n\
--B--\r\n";
        let parts = split_parts(body, "B");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body, b"hello");
        assert_eq!(parts[1].body, b"world");
        assert!(parts[0]
            .headers
            .starts_with(b"Content-Disposition: form-data; name=\"a\""));
    }

    #[test]
    fn missing_closing_delimiter_yields_nothing() {
        let body = b"--B\r\nheaders\r\n\r\nbody";
        assert!(split_parts(body, "B").is_empty());
    }
}
