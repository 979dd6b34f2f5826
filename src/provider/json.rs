//! Response decoding for upstream clients.
//!
//! Media servers are loose with their schemas (nulls where arrays are
//! documented, numbers as strings). Decode failures are reported with the
//! failing JSON path and a short excerpt of the offending line.

use anyhow::Result;
use serde::de::DeserializeOwned;

const SNIPPET_WIDTH: usize = 24;

/// Deserialize `body`, producing a path-annotated error on failure.
pub fn parse_json_with_context<T: DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let msg = inner.to_string();
        let loc = format!(" at line {line} column {column}");
        let msg = msg.strip_suffix(&loc).unwrap_or(&msg);

        let mut out = String::new();
        if !path.is_empty() && path != "." {
            out.push_str(&format!("at path '{path}': "));
        }
        out.push_str(&format!(
            "{} (line {line} col {column})\n{}",
            describe_mismatch(msg),
            excerpt(body, line, column)
        ));
        anyhow::anyhow!(out)
    })
}

/// Rewrite "invalid type: X, expected Y" as "expected Y, got X".
fn describe_mismatch(msg: &str) -> String {
    if let Some(rest) = msg.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {}", expected.trim(), actual);
    }
    msg.to_string()
}

/// A window of the offending line with a caret under the error column.
///
/// Bounds are snapped to char boundaries since titles are routinely non-ASCII.
fn excerpt(body: &str, line: usize, column: usize) -> String {
    let text = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if text.is_empty() {
        return "(empty line)".to_string();
    }

    let at = floor_boundary(text, column.saturating_sub(1).min(text.len()));
    let start = floor_boundary(text, at.saturating_sub(SNIPPET_WIDTH / 2));
    let end = ceil_boundary(text, (at + SNIPPET_WIDTH / 2).min(text.len()));

    let caret = " ".repeat(text[start..at].chars().count()) + "^";
    format!("...{}...\n   {caret}", &text[start..end])
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
