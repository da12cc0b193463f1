//! Per-requirement response files.
//!
//! For each requirement with selected evidence, one model call produces a
//! targeted response document written to `要求_<id>.md`. A failure on one
//! requirement is logged and skipped — the remaining responses still get
//! written.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use bidforge_llm::{ChatOptions, ModelClient, Transport};
use bidforge_shared::{BidforgeError, MergedSection, Message, RequirementItem, Result};

const RESPONSE_SYSTEM: &str = "你是一名投标响应编写专家。根据给定的单条要求、可用证据文本，\
     生成针对性的响应说明。使用 Markdown 并包含脚注引用。\
     输出字段：title, content, source_refs, missing_items。";

/// Write one response file per requirement into `out_dir`.
///
/// Evidence is re-read from each section's selected sources; requirements
/// whose model call or parse fails are skipped with a warning. Returns the
/// paths written.
pub async fn write_responses<T: Transport>(
    requirements: &[RequirementItem],
    sections: &[MergedSection],
    client: &mut ModelClient<T>,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir).map_err(|e| BidforgeError::io(out_dir, e))?;

    let mut written = Vec::new();
    for (req, section) in requirements.iter().zip(sections.iter()) {
        let mut evidence = serde_json::Map::new();
        for source in &section.selected_sources {
            match std::fs::read_to_string(source) {
                Ok(text) => {
                    evidence.insert(source.clone(), serde_json::Value::String(text));
                }
                Err(e) => {
                    warn!(path = %source, error = %e, "evidence no longer readable");
                }
            }
        }

        let payload = serde_json::json!({
            "requirement": req,
            "evidence": evidence,
        });
        let messages = [
            Message::system(RESPONSE_SYSTEM),
            Message::user(payload.to_string()),
        ];

        let result = match client.chat_json(&messages, ChatOptions::default()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(requirement = %req.id, error = %e, "response generation failed");
                continue;
            }
        };

        let content = result
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let path = out_dir.join(format!("要求_{}.md", req.id));
        std::fs::write(&path, content).map_err(|e| BidforgeError::io(&path, e))?;
        written.push(path);
    }

    info!(written = written.len(), "response files generated");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidforge_llm::ClientConfig;
    use bidforge_llm::testing::ScriptedTransport;

    fn requirement(id: &str, title: &str) -> RequirementItem {
        RequirementItem {
            id: id.into(),
            title: title.into(),
            keywords: Vec::new(),
            source: String::new(),
            notes: String::new(),
            weight: 1.0,
        }
    }

    #[tokio::test]
    async fn writes_content_field_per_requirement() {
        let dir = std::env::temp_dir().join(format!("bidforge-resp-test-{}", uuid::Uuid::now_v7()));
        let requirements = vec![requirement("1", "资质证明")];
        let sections = vec![MergedSection {
            requirement_id: "1".into(),
            body: "正文".into(),
            selected_sources: vec![],
        }];

        let transport = ScriptedTransport::new([Ok(
            r##"{"title": "资质证明", "content": "# 响应\n满足要求。", "source_refs": [], "missing_items": []}"##
                .to_string(),
        )]);
        let mut client = ModelClient::new(transport, ClientConfig::default()).unwrap();

        let written = write_responses(&requirements, &sections, &mut client, &dir)
            .await
            .unwrap();

        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("要求_1.md"));
        let content = std::fs::read_to_string(&written[0]).unwrap();
        assert!(content.contains("满足要求"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn a_failing_requirement_is_skipped_not_fatal() {
        let dir = std::env::temp_dir().join(format!("bidforge-resp-test-{}", uuid::Uuid::now_v7()));
        let requirements = vec![requirement("1", "a"), requirement("2", "b")];
        let sections = vec![
            MergedSection {
                requirement_id: "1".into(),
                body: String::new(),
                selected_sources: vec![],
            },
            MergedSection {
                requirement_id: "2".into(),
                body: String::new(),
                selected_sources: vec![],
            },
        ];

        // First call returns prose (chat_json fails), second is valid.
        let transport = ScriptedTransport::new([
            Ok("not json".to_string()),
            Ok(r#"{"content": "ok"}"#.to_string()),
        ]);
        let mut client = ModelClient::new(transport, ClientConfig::default()).unwrap();

        let written = write_responses(&requirements, &sections, &mut client, &dir)
            .await
            .unwrap();

        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("要求_2.md"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
