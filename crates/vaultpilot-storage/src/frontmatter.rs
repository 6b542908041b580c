//! Markdown documents with a YAML frontmatter header.
//!
//! ```text
//! ---
//! revision: 3
//! task_id: weekly-review
//! status: running
//! ---
//!
//! # weekly-review
//! ...
//! ```

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};

const FENCE: &str = "---";

/// Key under which the store version is kept inside the header.
pub const REVISION_KEY: &str = "revision";

/// A parsed document: header fields (without the revision) and the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub revision: u64,
    pub fields: Value,
    pub body: String,
}

/// Render fields and body into a markdown document.
pub fn render(revision: u64, fields: &Value, body: &str) -> Result<String> {
    let Value::Object(map) = fields else {
        bail!("record fields must be a map, got {}", type_name(fields));
    };
    if map.contains_key(REVISION_KEY) {
        bail!("record fields must not use the reserved key '{REVISION_KEY}'");
    }

    let yaml = if map.is_empty() {
        String::new()
    } else {
        serde_yaml::to_string(fields).context("Failed to encode frontmatter")?
    };

    let mut doc = String::with_capacity(yaml.len() + body.len() + 32);
    doc.push_str(FENCE);
    doc.push('\n');
    doc.push_str(&format!("{REVISION_KEY}: {revision}\n"));
    doc.push_str(&yaml);
    if !yaml.is_empty() && !yaml.ends_with('\n') {
        doc.push('\n');
    }
    doc.push_str(FENCE);
    doc.push_str("\n\n");
    doc.push_str(body);
    Ok(doc)
}

/// Parse a markdown document produced by [`render`] (or written by hand).
pub fn parse(text: &str) -> Result<Document> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
        .ok_or_else(|| anyhow!("document does not start with a frontmatter fence"))?;

    let (yaml, body) = split_header(rest)?;

    let header: Value = if yaml.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_yaml::from_str(yaml).context("Failed to decode frontmatter")?
    };
    let Value::Object(mut map) = header else {
        bail!("frontmatter must be a map");
    };

    let revision = match map.remove(REVISION_KEY) {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| anyhow!("frontmatter '{REVISION_KEY}' must be a positive integer"))?,
        None => 0,
    };

    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);

    Ok(Document {
        revision,
        fields: Value::Object(map),
        body: body.to_string(),
    })
}

/// Split after the opening fence into (yaml, remainder after the closing fence line).
fn split_header(rest: &str) -> Result<(&str, &str)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == FENCE {
            return Ok((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    bail!("frontmatter is not closed")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_then_parse_preserves_fields_and_body() {
        let fields = json!({
            "task_id": "weekly-review",
            "iteration": 2,
            "output_summary": "line one\nline two",
            "looks_numeric": "42",
            "looks_bool": "true",
            "missing": null,
        });
        let body = "# weekly-review\n\nStatus: running\n";

        let text = render(5, &fields, body).unwrap();
        assert!(text.starts_with("---\nrevision: 5\n"));

        let doc = parse(&text).unwrap();
        assert_eq!(doc.revision, 5);
        assert_eq!(doc.fields, fields);
        assert_eq!(doc.body, body);
    }

    #[test]
    fn parse_accepts_hand_written_documents() {
        let text = "---\nrevision: 1\nname: Morning briefing\nenabled: true\n---\nfree text\n";
        let doc = parse(text).unwrap();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.fields["name"], "Morning briefing");
        assert_eq!(doc.fields["enabled"], true);
        assert_eq!(doc.body, "free text\n");
    }

    #[test]
    fn parse_rejects_missing_fences() {
        assert!(parse("no header here").is_err());
        assert!(parse("---\nname: x\n").is_err());
    }

    #[test]
    fn render_rejects_reserved_key_and_non_maps() {
        assert!(render(1, &json!({"revision": 3}), "").is_err());
        assert!(render(1, &json!([1, 2]), "").is_err());
    }
}
