//! Requirement-source canonicalization.
//!
//! Turns heterogeneous requirement lists (JSON, CSV, Markdown tables, PDF,
//! free text) into an ordered collection of [`RequirementItem`]s. With
//! semantic parsing enabled the raw text goes through the model; without it,
//! structured formats are parsed deterministically and opaque formats are
//! rejected.

mod parser;

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, instrument};

use bidforge_ingest::SourceFormat;
use bidforge_llm::{ModelClient, PromptCache, Transport, llm_json};
use bidforge_shared::{BidforgeError, RequirementItem, Result};

/// Instruction for the semantic parsing call.
const PARSE_SYSTEM: &str = "You convert requirement lists provided in JSON/CSV/Markdown/PDF \
     into a JSON array of objects with fields id,title,keywords,source,notes,weight. \
     keywords is a list of strings.";

/// Parse the requirement source at `path` into [`RequirementItem`]s.
///
/// Output order matches the order in which records were encountered; ids are
/// checked for uniqueness. Re-parsing the same source yields a field-for-field
/// identical collection.
#[instrument(skip(client, cache), fields(path = %path.display(), use_llm))]
pub async fn parse_requirements<T: Transport>(
    path: &Path,
    client: &mut ModelClient<T>,
    cache: &PromptCache,
    use_llm: bool,
) -> Result<Vec<RequirementItem>> {
    let format = SourceFormat::from_path(path);

    if format == SourceFormat::Pdf && !use_llm {
        return Err(BidforgeError::SemanticParsingRequired {
            format: format.as_str().into(),
        });
    }

    let text = bidforge_ingest::load_text(path)?;

    let records = if use_llm {
        let user = format!("Input content:\n{text}\nReturn JSON array only.");
        let data = llm_json(client, cache, PARSE_SYSTEM, &user).await?;
        semantic_records(data)?
    } else {
        match format {
            SourceFormat::Json => parser::parse_json(&text)?,
            SourceFormat::Csv => parser::parse_csv(&text),
            SourceFormat::Markdown | SourceFormat::Text => parser::parse_pipe_table(&text),
            SourceFormat::Pdf => unreachable!("rejected above"),
        }
    };

    let items: Vec<RequirementItem> = records
        .iter()
        .enumerate()
        .map(|(i, record)| parser::item_from_loose(record, i))
        .collect();

    check_unique_ids(&items)?;

    info!(count = items.len(), "requirements parsed");
    Ok(items)
}

/// Accept the model's answer either as a bare array or wrapped in an
/// `items` object — upstream responses are not schema-enforced.
fn semantic_records(data: serde_json::Value) -> Result<Vec<serde_json::Value>> {
    match data {
        serde_json::Value::Array(items) => Ok(items),
        serde_json::Value::Object(mut map) => match map.remove("items") {
            Some(serde_json::Value::Array(items)) => Ok(items),
            _ => Err(BidforgeError::parse(
                "model returned neither a JSON array nor an object with an `items` array",
            )),
        },
        _ => Err(BidforgeError::parse(
            "model returned neither a JSON array nor an object with an `items` array",
        )),
    }
}

fn check_unique_ids(items: &[RequirementItem]) -> Result<()> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(BidforgeError::parse(format!(
                "duplicate requirement id `{}`",
                item.id
            )));
        }
    }
    Ok(())
}
