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

//! The response header table: an insertion-ordered, multi-valued map of
//! CGI-style response headers, plus the status line.
//!
//! Per §4.3, `Status` may never be set directly through the header table --
//! it is synthesized from [`HeaderTable::status`] at commit time -- and
//! under the Authorizer role, names starting case-insensitively with
//! `Variable-` are reserved for [`HeaderTable::set_variable`].

/// The field name reserved for the synthesized status line.
pub const STATUS_FIELD: &str = "Status";

/// Prefix reserved for Authorizer response variables.
pub const VARIABLE_PREFIX: &str = "Variable-";

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Insertion-ordered, multi-valued header table.
#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    fields: Vec<(String, String)>,
}

/// A field mutation was rejected because its name is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderFieldError {
    #[error("the `Status` field is set via set_status, not set_field/add_field")]
    ReservedStatus,
    #[error("fields named `Variable-*` are set via set_variable in the Authorizer role")]
    ReservedVariablePrefix,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(name: &str, forbid_variable_prefix: bool) -> Result<(), HeaderFieldError> {
        if eq_ignore_case(name, STATUS_FIELD) {
            return Err(HeaderFieldError::ReservedStatus);
        }
        if forbid_variable_prefix
            && name.len() >= VARIABLE_PREFIX.len()
            && name[..VARIABLE_PREFIX.len()].eq_ignore_ascii_case(VARIABLE_PREFIX)
        {
            return Err(HeaderFieldError::ReservedVariablePrefix);
        }
        Ok(())
    }

    /// Replaces all existing values of `name` with a single new value.
    pub fn set_field(
        &mut self,
        name: &str,
        value: &str,
        forbid_variable_prefix: bool,
    ) -> Result<(), HeaderFieldError> {
        Self::check_name(name, forbid_variable_prefix)?;
        self.fields.retain(|(k, _)| !eq_ignore_case(k, name));
        self.fields.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Appends an additional value for `name`, preserving any existing ones.
    pub fn add_field(
        &mut self,
        name: &str,
        value: &str,
        forbid_variable_prefix: bool,
    ) -> Result<(), HeaderFieldError> {
        Self::check_name(name, forbid_variable_prefix)?;
        self.fields.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Removes every value of `name`.
    pub fn clear_field(&mut self, name: &str) {
        self.fields.retain(|(k, _)| !eq_ignore_case(k, name));
    }

    /// Sets a response variable under the Authorizer role: stored as a
    /// header literally named `Variable-<name>`.
    pub fn set_variable(&mut self, name: &str, value: &str) {
        let field = format!("{VARIABLE_PREFIX}{name}");
        self.fields.retain(|(k, _)| !eq_ignore_case(k, &field));
        self.fields.push((field, value.to_string()));
    }

    pub fn has_any(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Formats the header block as CGI-style lines (`Name: value\r\n`,
    /// repeated per value of a multi-valued field), in insertion order.
    pub fn format_lines(&self, out: &mut String) {
        for (name, value) in &self.fields {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_field_replaces_add_field_appends() {
        let mut headers = HeaderTable::new();
        headers.add_field("X-A", "1", false).unwrap();
        headers.add_field("X-A", "2", false).unwrap();
        headers.set_field("X-B", "x", false).unwrap();
        headers.set_field("X-B", "y", false).unwrap();

        let lines: Vec<_> = headers.iter().collect();
        assert_eq!(lines, vec![("X-A", "1"), ("X-A", "2"), ("X-B", "y")]);
    }

    #[test]
    fn status_field_is_reserved() {
        let mut headers = HeaderTable::new();
        assert_eq!(
            headers.set_field("Status", "200 OK", false).unwrap_err(),
            HeaderFieldError::ReservedStatus
        );
        assert_eq!(
            headers.set_field("status", "200 OK", false).unwrap_err(),
            HeaderFieldError::ReservedStatus
        );
    }

    #[test]
    fn variable_prefix_is_reserved_only_when_forbidden() {
        let mut headers = HeaderTable::new();
        assert!(headers.set_field("Variable-User", "x", true).is_err());
        assert!(headers.set_field("Variable-User", "x", false).is_ok());
    }

    #[test]
    fn set_variable_emits_prefixed_header() {
        let mut headers = HeaderTable::new();
        headers.set_variable("USER", "alice");
        let lines: Vec<_> = headers.iter().collect();
        assert_eq!(lines, vec![("Variable-USER", "alice")]);
    }

    #[test]
    fn format_lines_repeats_multi_valued_fields() {
        let mut headers = HeaderTable::new();
        headers.add_field("Set-Cookie", "a=1", false).unwrap();
        headers.add_field("Set-Cookie", "b=2", false).unwrap();
        let mut out = String::new();
        headers.format_lines(&mut out);
        assert_eq!(out, "Set-Cookie: a=1\r\nSet-Cookie: b=2\r\n");
    }
}
