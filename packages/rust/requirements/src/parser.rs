//! Deterministic format parsers and loose-record projection.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use bidforge_shared::{BidforgeError, RequirementItem, Result};

/// A Markdown table separator row (`| --- | :--- |` and friends).
static SEPARATOR_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s|:\-]+$").expect("static regex"));

// ---------------------------------------------------------------------------
// Loose-record projection
// ---------------------------------------------------------------------------

/// Project a loosely-typed record into a [`RequirementItem`].
///
/// Defaulting rules: `id` falls back to the record's 1-based position,
/// `keywords` accepts a list or a comma-delimited string, `weight` falls back
/// to 1.0, string fields fall back to empty.
pub(crate) fn item_from_loose(value: &Value, index: usize) -> RequirementItem {
    let id = match loose_string(value.get("id")) {
        s if s.is_empty() => (index + 1).to_string(),
        s => s,
    };

    let keywords = match value.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| loose_string(Some(v)))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        _ => Vec::new(),
    };

    let weight = match value.get("weight") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(1.0),
        _ => 1.0,
    };

    RequirementItem {
        id,
        title: loose_string(value.get("title")),
        keywords,
        source: loose_string(value.get("source")),
        notes: loose_string(value.get("notes")),
        weight,
    }
}

/// Stringify a loosely-typed scalar; anything else becomes empty.
fn loose_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Format-specific parsers
// ---------------------------------------------------------------------------

/// Parse a JSON source: must be a top-level array of objects.
pub(crate) fn parse_json(text: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| BidforgeError::parse(format!("invalid JSON requirement source: {e}")))?;
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(BidforgeError::parse(
            "JSON requirement source must be an array of objects",
        )),
    }
}

/// Parse a CSV source: first non-empty line is the header row.
pub(crate) fn parse_csv(text: &str) -> Vec<Value> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_line.split(',').map(|h| h.trim().to_string()).collect();

    lines.map(|line| row_to_object(&headers, line, ',')).collect()
}

/// Parse a Markdown pipe table (or row-delimited text treated as one).
/// A separator row after the header is skipped if present.
pub(crate) fn parse_pipe_table(text: &str) -> Vec<Value> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let Some(header_line) = lines.first() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_line
        .split('|')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    let mut rows = &lines[1..];
    if rows
        .first()
        .is_some_and(|line| SEPARATOR_ROW.is_match(line))
    {
        rows = &rows[1..];
    }

    rows.iter()
        .map(|line| {
            let cells: Vec<String> = line
                .split('|')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            object_from_pairs(&headers, &cells)
        })
        .collect()
}

fn row_to_object(headers: &[String], line: &str, delimiter: char) -> Value {
    let cells: Vec<String> = line
        .split(delimiter)
        .map(|c| c.trim().to_string())
        .collect();
    object_from_pairs(headers, &cells)
}

fn object_from_pairs(headers: &[String], cells: &[String]) -> Value {
    let mut object = serde_json::Map::new();
    for (header, cell) in headers.iter().zip(cells.iter()) {
        object.insert(header.clone(), Value::String(cell.clone()));
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_projection_applies_defaults() {
        let value = serde_json::json!({"title": "资质证明"});
        let item = item_from_loose(&value, 2);
        assert_eq!(item.id, "3");
        assert_eq!(item.title, "资质证明");
        assert!(item.keywords.is_empty());
        assert_eq!(item.weight, 1.0);
        assert_eq!(item.source, "");
        assert_eq!(item.notes, "");
    }

    #[test]
    fn loose_projection_splits_keyword_strings() {
        let value = serde_json::json!({
            "id": 7,
            "title": "报价单",
            "keywords": "质量, 安全 , ,价格",
            "weight": "2.5"
        });
        let item = item_from_loose(&value, 0);
        assert_eq!(item.id, "7");
        assert_eq!(item.keywords, vec!["质量", "安全", "价格"]);
        assert_eq!(item.weight, 2.5);
    }

    #[test]
    fn loose_projection_keeps_keyword_lists() {
        let value = serde_json::json!({"keywords": ["a", "b"]});
        let item = item_from_loose(&value, 0);
        assert_eq!(item.keywords, vec!["a", "b"]);
    }

    #[test]
    fn csv_rows_become_objects() {
        let text = "id,title,keywords\n1,资质证明,资质\n2,报价单,报价\n";
        let rows = parse_csv(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["title"], "资质证明");
        assert_eq!(rows[1]["keywords"], "报价");
    }

    #[test]
    fn pipe_table_skips_separator_row() {
        let text = "\
| id | title |
| -- | ----- |
| 1  | 资质证明 |
| 2  | 报价单 |
";
        let rows = parse_pipe_table(text);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "1");
        assert_eq!(rows[1]["title"], "报价单");
    }

    #[test]
    fn pipe_table_without_separator_keeps_all_rows() {
        let text = "id | title\n1 | 资质证明\n";
        let rows = parse_pipe_table(text);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "资质证明");
    }

    #[test]
    fn json_source_must_be_an_array() {
        assert!(parse_json(r#"[{"id": "1"}]"#).is_ok());
        assert!(parse_json(r#"{"id": "1"}"#).is_err());
        assert!(parse_json("not json").is_err());
    }
}
