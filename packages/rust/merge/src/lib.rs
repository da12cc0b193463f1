//! Evidence merging: one Markdown section per requirement.
//!
//! Every requirement yields exactly one section, in requirement order, even
//! when no evidence was found — output completeness is total. A side-channel
//! [`BuildMeta`] records, per requirement, every candidate considered and the
//! subset actually merged.

pub mod responses;

use std::collections::HashMap;

use tracing::{debug, instrument};

use bidforge_llm::{ModelClient, PromptCache, Transport, llm_rewrite};
use bidforge_shared::{
    BuildMeta, CandidateMeta, EvidenceCandidate, MergedSection, RequirementItem, Result,
    SectionMeta,
};

/// Instruction for the semantic merge call.
const MERGE_SYSTEM: &str = "Combine the following content pieces into a coherent Markdown \
     section. Remove duplicates but keep footnotes referencing original file paths.";

/// Merge each requirement's ranked candidates into a section.
///
/// Zero-score candidates and candidate files that fail to read are dropped
/// silently; a requirement with no readable evidence gets the fixed
/// placeholder body and no selected sources.
#[instrument(skip_all, fields(requirements = requirements.len(), use_llm))]
pub async fn merge_contents<T: Transport>(
    requirements: &[RequirementItem],
    ranked: &HashMap<String, Vec<EvidenceCandidate>>,
    client: &mut ModelClient<T>,
    cache: &PromptCache,
    use_llm: bool,
) -> Result<(Vec<MergedSection>, BuildMeta)> {
    let mut sections = Vec::with_capacity(requirements.len());
    let mut meta = Vec::with_capacity(requirements.len());

    for req in requirements {
        let candidates = ranked.get(&req.id).map(Vec::as_slice).unwrap_or(&[]);

        // Read every relevant candidate's full text; pair each snippet with
        // its originating path so a failed read never misattributes content.
        // Zero-score candidates carry no relevance signal — they stay in the
        // metadata but contribute no evidence.
        let mut evidence: Vec<(String, String)> = Vec::new();
        for candidate in candidates.iter().filter(|c| c.score > 0.0) {
            match std::fs::read_to_string(&candidate.path) {
                Ok(text) => {
                    evidence.push((candidate.path.display().to_string(), text));
                }
                Err(e) => {
                    debug!(path = %candidate.path.display(), error = %e, "candidate dropped");
                }
            }
        }

        let (body, selected) = if evidence.is_empty() {
            (placeholder_body(&req.title), None)
        } else {
            let body = if use_llm {
                let user_parts: Vec<String> = evidence
                    .iter()
                    .map(|(path, text)| format!("Source: {path}\n{text}"))
                    .collect();
                let user = format!("Requirement: {}\n\n{}", req.title, user_parts.join("\n\n"));
                llm_rewrite(client, cache, MERGE_SYSTEM, &user).await?
            } else {
                evidence
                    .iter()
                    .map(|(_, text)| text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            };
            let selected: Vec<String> = evidence.into_iter().map(|(path, _)| path).collect();
            (body, Some(selected))
        };

        meta.push(SectionMeta {
            id: req.id.clone(),
            title: req.title.clone(),
            candidates: candidates
                .iter()
                .map(|c| CandidateMeta {
                    path: c.path.display().to_string(),
                    score: c.score,
                })
                .collect(),
            selected: selected.clone(),
        });

        sections.push(MergedSection {
            requirement_id: req.id.clone(),
            body,
            selected_sources: selected.unwrap_or_default(),
        });
    }

    Ok((sections, BuildMeta::new(meta)))
}

/// Fixed placeholder sentence for a requirement with no readable evidence.
pub fn placeholder_body(title: &str) -> String {
    format!("未找到与需求 {title} 相关的内容。")
}

/// Assemble the final document: sections in requirement order, each headed by
/// the requirement's title.
pub fn render_markdown(requirements: &[RequirementItem], sections: &[MergedSection]) -> String {
    requirements
        .iter()
        .zip(sections.iter())
        .map(|(req, section)| format!("### {}\n\n{}\n", req.title, section.body))
        .collect::<Vec<_>>()
        .join("\n")
}
