//! Opaque, tagged record type for task input/output, bus payloads, and
//! element data attributes (spec §9 "Dynamic/duck-typed shapes").
//!
//! The source relies on open records; in a systems-language port we avoid
//! reflection by carrying a fixed set of schemas plus a true opaque escape
//! hatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tagged-union payload carried across task boundaries and the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Deduplicated `http(s)://` links discovered on a page.
    LinkList(Vec<String>),
    /// Page/form metadata, never including field values.
    FormMetadata(Value),
    /// Free-form telemetry/metrics.
    Telemetry(Value),
    /// Anything else, carried as an opaque byte buffer plus a MIME-like tag.
    Opaque { mime: String, bytes: Vec<u8> },
}

impl Payload {
    pub fn opaque(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Opaque { mime: mime.into(), bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_list_roundtrips_through_json() {
        let p = Payload::LinkList(vec!["https://a.com/x".to_string()]);
        let json = serde_json::to_string(&p).unwrap();
        let back: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
