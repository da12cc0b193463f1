//! Knowledge-base scanning and per-requirement candidate ranking.
//!
//! The knowledge base is a flat, recursively-enumerated set of files under a
//! root directory — no metadata beyond path and readability. Ranking is
//! either semantic (one scoring call per file through the cache) or a coarse
//! keyword-count fallback.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use bidforge_llm::{ModelClient, PromptCache, Transport, llm_json};
use bidforge_shared::{EvidenceCandidate, RequirementItem, Result};

/// Bounded prefix of file text used for scoring.
const SNIPPET_CHARS: usize = 800;

/// Instruction for the semantic scoring call.
const RANK_SYSTEM: &str = "Given a requirement and a file snippet, score the relevance \
     between 0 and 1 and return JSON {\"score\": float}.";

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Enumerate all files under `root`, sorted by path for stable ordering.
/// Unreadable directory entries are skipped with a warning.
pub fn scan_kb(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(entry.into_path()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "skipping unreadable knowledge-base entry");
                None
            }
        })
        .collect();
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Score and rank `files` for one requirement, returning at most `topk`
/// candidates sorted descending by score (stable — ties keep enumeration
/// order). Files that cannot be read are excluded entirely.
#[instrument(skip_all, fields(requirement = %requirement.id, files = files.len(), topk))]
pub async fn rank_files<T: Transport>(
    requirement: &RequirementItem,
    files: &[PathBuf],
    topk: usize,
    client: &mut ModelClient<T>,
    cache: &PromptCache,
    use_llm: bool,
) -> Result<Vec<EvidenceCandidate>> {
    let mut candidates: Vec<EvidenceCandidate> = Vec::new();

    for path in files {
        let Ok(text) = std::fs::read_to_string(path) else {
            debug!(path = %path.display(), "unreadable file excluded from ranking");
            continue;
        };
        let snippet = char_prefix(&text, SNIPPET_CHARS);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let score = if use_llm {
            semantic_score(requirement, file_name, snippet, client, cache).await?
        } else {
            keyword_score(requirement, file_name, snippet)
        };

        candidates.push(EvidenceCandidate {
            path: path.clone(),
            score,
        });
    }

    // Stable sort: equal scores keep enumeration order.
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates.truncate(topk);
    Ok(candidates)
}

/// Ask the model for a relevance score in [0, 1].
async fn semantic_score<T: Transport>(
    requirement: &RequirementItem,
    file_name: &str,
    snippet: &str,
    client: &mut ModelClient<T>,
    cache: &PromptCache,
) -> Result<f64> {
    let user = format!(
        "Requirement: {}\nKeywords: {}\nFile: {}\nSnippet:\n{}",
        requirement.title,
        requirement.keywords.join(", "),
        file_name,
        snippet
    );
    let data = llm_json(client, cache, RANK_SYSTEM, &user).await?;
    let score = data
        .get("score")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    Ok(score)
}

/// Count requirement keywords (case-insensitive) occurring as substrings in
/// file name + snippet. A coarse non-semantic proxy.
fn keyword_score(requirement: &RequirementItem, file_name: &str, snippet: &str) -> f64 {
    let haystack = format!("{file_name}{snippet}").to_lowercase();
    requirement
        .keywords
        .iter()
        .filter(|kw| haystack.contains(&kw.to_lowercase()))
        .count() as f64
}

/// First `max_chars` characters of `text`, never splitting a code point.
fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidforge_llm::ClientConfig;
    use bidforge_llm::testing::ScriptedTransport;

    fn temp_kb(files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bidforge-kb-test-{}", uuid::Uuid::now_v7()));
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
        }
        dir
    }

    fn requirement(keywords: &[&str]) -> RequirementItem {
        RequirementItem {
            id: "1".into(),
            title: "测试需求".into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            source: String::new(),
            notes: String::new(),
            weight: 1.0,
        }
    }

    fn offline_client() -> ModelClient<ScriptedTransport> {
        ModelClient::new(ScriptedTransport::empty(), ClientConfig::default()).unwrap()
    }

    fn cache_in(dir: &Path) -> PromptCache {
        PromptCache::open(dir.join("cache")).unwrap()
    }

    #[test]
    fn scan_is_recursive_and_sorted() {
        let dir = temp_kb(&[
            ("b.txt", "b"),
            ("sub/a.txt", "a"),
            ("sub/deep/c.txt", "c"),
        ]);
        let files = scan_kb(&dir);
        assert_eq!(files.len(), 3);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(&dir).unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["b.txt", "sub/a.txt", "sub/deep/c.txt"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let files = scan_kb(Path::new("/nonexistent/bidforge/kb"));
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn keyword_fallback_orders_by_hit_count() {
        let dir = temp_kb(&[
            ("one_hit.txt", "这份文件只提到价格。"),
            ("three_hits.txt", "质量、安全、价格都有说明。"),
        ]);
        let files = scan_kb(&dir);
        let cache = cache_in(&dir);
        let req = requirement(&["质量", "安全", "价格"]);

        let mut client = offline_client();
        let ranked = rank_files(&req, &files, 5, &mut client, &cache, false)
            .await
            .unwrap();

        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].path.ends_with("three_hits.txt"));
        assert_eq!(ranked[0].score, 3.0);
        assert!(ranked[1].path.ends_with("one_hit.txt"));
        assert_eq!(ranked[1].score, 1.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn truncates_to_topk_and_keeps_tie_order() {
        let dir = temp_kb(&[
            ("a.txt", "安全"),
            ("b.txt", "安全"),
            ("c.txt", "安全"),
        ]);
        let files = scan_kb(&dir);
        let cache = cache_in(&dir);
        let req = requirement(&["安全"]);

        let mut client = offline_client();
        let ranked = rank_files(&req, &files, 2, &mut client, &cache, false)
            .await
            .unwrap();

        // min(K, |files|) entries; equal scores keep enumeration order.
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].path.ends_with("a.txt"));
        assert!(ranked[1].path.ends_with("b.txt"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn empty_file_set_yields_empty_result() {
        let dir = temp_kb(&[]);
        std::fs::create_dir_all(&dir).unwrap();
        let cache = cache_in(&dir);
        let req = requirement(&["安全"]);

        let mut client = offline_client();
        let ranked = rank_files(&req, &[], 5, &mut client, &cache, false)
            .await
            .unwrap();
        assert!(ranked.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unreadable_files_are_excluded_not_zero_scored() {
        let dir = temp_kb(&[("readable.txt", "安全")]);
        let mut files = scan_kb(&dir);
        files.push(dir.join("missing.txt"));
        let cache = cache_in(&dir);
        let req = requirement(&["安全"]);

        let mut client = offline_client();
        let ranked = rank_files(&req, &files, 5, &mut client, &cache, false)
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].path.ends_with("readable.txt"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn semantic_scores_come_from_the_model() {
        let dir = temp_kb(&[("low.txt", "无关内容"), ("high.txt", "资质证书扫描件")]);
        let files = scan_kb(&dir);
        let cache = cache_in(&dir);
        let req = requirement(&["资质"]);

        // Files are visited in sorted order: high.txt first, then low.txt.
        let transport = ScriptedTransport::new([
            Ok(r#"{"score": 0.9}"#.to_string()),
            Ok(r#"{"score": 0.1}"#.to_string()),
        ]);
        let mut client = ModelClient::new(transport, ClientConfig::default()).unwrap();

        let ranked = rank_files(&req, &files, 1, &mut client, &cache, true)
            .await
            .unwrap();

        assert_eq!(ranked.len(), 1);
        assert!(ranked[0].path.ends_with("high.txt"));
        assert_eq!(ranked[0].score, 0.9);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn out_of_range_model_scores_are_clamped() {
        let dir = temp_kb(&[("a.txt", "内容")]);
        let files = scan_kb(&dir);
        let cache = cache_in(&dir);
        let req = requirement(&["内容"]);

        let transport = ScriptedTransport::new([Ok(r#"{"score": 3.5}"#.to_string())]);
        let mut client = ModelClient::new(transport, ClientConfig::default()).unwrap();

        let ranked = rank_files(&req, &files, 5, &mut client, &cache, true)
            .await
            .unwrap();
        assert_eq!(ranked[0].score, 1.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn char_prefix_respects_multibyte_boundaries() {
        let text = "质量安全价格";
        assert_eq!(char_prefix(text, 2), "质量");
        assert_eq!(char_prefix(text, 100), text);
    }
}
