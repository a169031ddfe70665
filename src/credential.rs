//! Credential codec for the `sk-proj.{project_id}.{key_id}.{secret}` wire form.
//!
//! Parsing splits on `.` at most three times, so dots inside the secret are
//! preserved. `format_key(parse(s)) == s` for every accepted `s`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Literal first segment of every KeyMaster credential.
pub const KEY_PREFIX: &str = "sk-proj";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid API key format")]
pub struct KeyFormatError;

/// The three caller-visible components of a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedApiKey {
    pub project_id: String,
    pub key_id: String,
    pub secret: String,
}

impl ParsedApiKey {
    /// Parse the wire form. The prefix must be the literal `sk-proj` and
    /// exactly four dot-separated segments must result.
    pub fn parse(api_key: &str) -> Result<Self, KeyFormatError> {
        let mut parts = api_key.splitn(4, '.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(KEY_PREFIX), Some(project_id), Some(key_id), Some(secret)) => Ok(Self {
                project_id: project_id.to_string(),
                key_id: key_id.to_string(),
                secret: secret.to_string(),
            }),
            _ => Err(KeyFormatError),
        }
    }

    /// Re-assemble the wire form.
    pub fn format_key(&self) -> String {
        format!(
            "{KEY_PREFIX}.{}.{}.{}",
            self.project_id, self.key_id, self.secret
        )
    }
}

/// Format a credential without building a [`ParsedApiKey`] first.
pub fn format_key(project_id: &str, key_id: &str, secret: &str) -> String {
    format!("{KEY_PREFIX}.{project_id}.{key_id}.{secret}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_key() {
        let parsed = ParsedApiKey::parse("sk-proj.proj1.k_Ab3dEf9.s3cr3t").unwrap();
        assert_eq!(parsed.project_id, "proj1");
        assert_eq!(parsed.key_id, "k_Ab3dEf9");
        assert_eq!(parsed.secret, "s3cr3t");
    }

    #[test]
    fn secret_keeps_embedded_dots() {
        let parsed = ParsedApiKey::parse("sk-proj.p.k.with.dots.inside").unwrap();
        assert_eq!(parsed.secret, "with.dots.inside");
    }

    #[test]
    fn round_trip() {
        let raw = "sk-proj.p1.k_1234567.aaaa.bbbb";
        let parsed = ParsedApiKey::parse(raw).unwrap();
        assert_eq!(parsed.format_key(), raw);
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(ParsedApiKey::parse("sk-live.p.k.s"), Err(KeyFormatError));
        assert_eq!(ParsedApiKey::parse("skproj.p.k.s"), Err(KeyFormatError));
        assert_eq!(ParsedApiKey::parse(""), Err(KeyFormatError));
    }

    #[test]
    fn rejects_missing_segments() {
        assert_eq!(ParsedApiKey::parse("sk-proj.p.k"), Err(KeyFormatError));
        assert_eq!(ParsedApiKey::parse("sk-proj"), Err(KeyFormatError));
    }

    #[test]
    fn format_helper_matches_struct() {
        let parsed = ParsedApiKey {
            project_id: "p1".into(),
            key_id: "k_abcdefg".into(),
            secret: "zzz".into(),
        };
        assert_eq!(
            format_key("p1", "k_abcdefg", "zzz"),
            parsed.format_key()
        );
    }
}
