//! Tender-document analysis: extract every document the tender requires
//! bidders to submit.
//!
//! The tender is ingested page by page; each page goes through one JSON model
//! call. Hits are deduplicated, categorized, and written out as a Markdown
//! checklist plus a JSON dump. A failed page is logged and skipped — partial
//! coverage beats an aborted run.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use bidforge_llm::{ModelClient, PromptCache, Transport, llm_json};
use bidforge_shared::{BidforgeError, Result};

use crate::pipeline::ProgressReporter;

const EXTRACT_SYSTEM: &str =
    "你是一个专业的招标文件分析专家，擅长识别和提取招标文件中要求投标人提交的各种文档和材料。";

/// Category labels, in output order.
const CATEGORIES: [&str; 4] = ["资格文件", "技术文件", "商务文件", "其他"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the `extract` pipeline.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Tender document path (PDF or text).
    pub tender: PathBuf,
    /// Directory for the Markdown checklist and JSON dump.
    pub out_dir: PathBuf,
    /// Working directory holding the call cache.
    pub workdir: PathBuf,
}

/// One document the tender requires bidders to submit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredDocument {
    /// What must be submitted.
    pub name: String,
    /// The requirement sentence as it appears in the tender.
    pub original_text: String,
    /// Normalized category (one of [`CATEGORIES`]).
    pub category: String,
    /// 1-based page the requirement was found on.
    pub page: usize,
}

/// Result of the `extract` pipeline.
#[derive(Debug)]
pub struct ExtractResult {
    /// Requirements found before deduplication.
    pub total: usize,
    /// Requirements kept after deduplication.
    pub unique: usize,
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Analyze the tender page by page and write the submission checklist.
#[instrument(skip_all, fields(tender = %config.tender.display()))]
pub async fn extract_required_documents<T: Transport>(
    config: &ExtractConfig,
    client: &mut ModelClient<T>,
    progress: &dyn ProgressReporter,
) -> Result<ExtractResult> {
    std::fs::create_dir_all(&config.workdir)
        .map_err(|e| BidforgeError::io(&config.workdir, e))?;
    std::fs::create_dir_all(&config.out_dir)
        .map_err(|e| BidforgeError::io(&config.out_dir, e))?;
    let cache = PromptCache::open(config.workdir.join("cache"))?;

    progress.phase("Extracting tender text");
    let pages = bidforge_ingest::load_pages(&config.tender)?;
    info!(pages = pages.len(), "tender segmented");

    progress.phase("Analyzing pages");
    let mut documents: Vec<RequiredDocument> = Vec::new();
    let total_pages = pages.len();
    for (i, page) in pages.iter().enumerate() {
        progress.item(i + 1, total_pages, &format!("Analyzing page {}", page.page));

        let user = page_prompt(&page.text);
        let data = match llm_json(client, &cache, EXTRACT_SYSTEM, &user).await {
            Ok(data) => data,
            Err(e) => {
                warn!(page = page.page, error = %e, "page analysis failed, skipping");
                continue;
            }
        };

        let Some(items) = data.get("documents").and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            let name = item
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                continue;
            }
            documents.push(RequiredDocument {
                name,
                original_text: item
                    .get("original_text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                category: item
                    .get("category")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                page: page.page,
            });
        }
    }

    progress.phase("Deduplicating and categorizing");
    let total = documents.len();
    let mut unique = deduplicate(documents);
    for doc in &mut unique {
        doc.category = normalize_category(&doc.category).to_string();
    }

    progress.phase("Writing checklist");
    let markdown = render_checklist(&unique);
    let markdown_path = config.out_dir.join("required_documents.md");
    std::fs::write(&markdown_path, &markdown)
        .map_err(|e| BidforgeError::io(&markdown_path, e))?;

    let json_path = config.out_dir.join("extracted_documents.json");
    let dump = serde_json::json!({
        "extraction_time": chrono::Utc::now().to_rfc3339(),
        "total_documents": unique.len(),
        "documents": unique,
    });
    let json = serde_json::to_string_pretty(&dump)
        .map_err(|e| BidforgeError::parse(format!("dump serialization failed: {e}")))?;
    std::fs::write(&json_path, json).map_err(|e| BidforgeError::io(&json_path, e))?;

    info!(total, unique = unique.len(), "extraction complete");
    Ok(ExtractResult {
        total,
        unique: unique.len(),
        markdown_path,
        json_path,
    })
}

fn page_prompt(page_text: &str) -> String {
    format!(
        "请仔细分析以下招标文件页面内容，识别出所有要求投标人提交或附带的文档、材料、证明等。\n\
         \n\
         页面内容：\n{page_text}\n\
         \n\
         请按照以下JSON格式返回结果，如果识别到要求提交的文档，请提取：\n\
         1. 文档名称（具体要提交什么文件）\n\
         2. 原始要求语句（完整的句子）\n\
         3. 文档类型分类（资格文件/技术文件/商务文件/其他）\n\
         \n\
         如果页面中没有相关要求，请返回空列表。\n\
         \n\
         返回格式：\n\
         {{\"documents\": [{{\"name\": \"文档名称\", \"original_text\": \"原始要求语句\", \
         \"category\": \"文档类型分类\"}}]}}\n\
         \n\
         请确保返回的是有效的JSON格式。"
    )
}

/// Drop repeats, keyed on the lowercased name plus the leading characters of
/// the original sentence. First occurrence wins.
fn deduplicate(documents: Vec<RequiredDocument>) -> Vec<RequiredDocument> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|doc| {
            let sentence_prefix: String = doc.original_text.trim().chars().take(100).collect();
            seen.insert((doc.name.trim().to_lowercase(), sentence_prefix))
        })
        .collect()
}

/// Map free-form category labels onto the four canonical buckets.
fn normalize_category(category: &str) -> &'static str {
    if category.contains("资格") || category.contains("资质") {
        "资格文件"
    } else if category.contains("技术") {
        "技术文件"
    } else if category.contains("商务") || category.contains("价格") || category.contains("报价") {
        "商务文件"
    } else {
        "其他"
    }
}

/// Render the Markdown checklist: grouped by category, then the full list.
fn render_checklist(documents: &[RequiredDocument]) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

    let mut out = format!(
        "# 招标文件要求提交文档清单\n\n\
         > 生成时间：{timestamp}  \n\
         > 文档总数：{} 项\n\n\
         本清单包含招标文件中明确要求投标人提交或附带的所有文档、材料、证明等。\n\n\
         ---\n\n\
         ## 按类别分类\n",
        documents.len()
    );

    for category in CATEGORIES {
        let docs: Vec<&RequiredDocument> = documents
            .iter()
            .filter(|d| d.category == category)
            .collect();
        if docs.is_empty() {
            continue;
        }
        out.push_str(&format!("\n### {category} ({} 项)\n\n", docs.len()));
        for (i, doc) in docs.iter().enumerate() {
            out.push_str(&format!(
                "**{}. {}**\n- 页码：第 {} 页\n- 原始要求：{}\n\n",
                i + 1,
                doc.name,
                doc.page,
                doc.original_text
            ));
        }
    }

    out.push_str("\n---\n\n## 完整文档列表\n\n");
    for (i, doc) in documents.iter().enumerate() {
        out.push_str(&format!(
            "**{}. {}**\n- 页码：第 {} 页\n- 类别：{}\n- 原始要求：{}\n\n",
            i + 1,
            doc.name,
            doc.page,
            doc.category,
            doc.original_text
        ));
    }

    out
}
