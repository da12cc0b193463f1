//! End-to-end `build` pipeline: requirements → ranking → merge → render → PDF.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, instrument, warn};

use bidforge_llm::{ModelClient, PromptCache, Transport};
use bidforge_shared::{BidforgeError, EvidenceCandidate, Result};

/// Configuration for the `build` pipeline.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Requirement-source path (JSON/CSV/Markdown/PDF/text).
    pub requirements: PathBuf,
    /// Knowledge-base root directory.
    pub kb: PathBuf,
    /// Target path for the compiled PDF.
    pub out: PathBuf,
    /// LaTeX template with a `%%CONTENT%%` marker; built-in default if absent.
    pub template: Option<PathBuf>,
    /// Working directory for intermediate artifacts and the call cache.
    pub workdir: PathBuf,
    /// Ranked candidates retained per requirement.
    pub topk: usize,
    /// Toggle for all model-backed behavior; deterministic fallbacks when off.
    pub use_llm: bool,
    /// Also emit one response file per requirement.
    pub write_responses: bool,
}

/// Result of the `build` pipeline.
#[derive(Debug)]
pub struct BuildResult {
    /// Number of requirements parsed (and sections emitted — always equal).
    pub requirement_count: usize,
    /// Path to the compiled PDF, absent when compilation degraded to a
    /// logged error.
    pub pdf: Option<PathBuf>,
    /// Path to the merged Markdown document.
    pub merged_md: PathBuf,
    /// Path to the ranking/selection metadata.
    pub meta: PathBuf,
    /// Response files written (empty unless requested).
    pub responses: Vec<PathBuf>,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Item-level progress within the current phase.
    fn item(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item(&self, _current: usize, _total: usize, _detail: &str) {}
}

/// Run the full `build` pipeline.
///
/// 1. Parse requirements
/// 2. Scan the knowledge base and rank candidates per requirement
/// 3. Merge evidence into sections, write `merged.md` + `meta.json`
/// 4. Render LaTeX, write `main.tex`
/// 5. Compile the PDF (degradable)
/// 6. Optionally write per-requirement response files
#[instrument(skip_all, fields(requirements = %config.requirements.display(), use_llm = config.use_llm))]
pub async fn build_document<T: Transport>(
    config: &BuildConfig,
    client: &mut ModelClient<T>,
    progress: &dyn ProgressReporter,
) -> Result<BuildResult> {
    let start = Instant::now();

    std::fs::create_dir_all(&config.workdir)
        .map_err(|e| BidforgeError::io(&config.workdir, e))?;
    let cache = PromptCache::open(config.workdir.join("cache"))?;

    // --- Phase 1: Parse requirements ---
    progress.phase("Parsing requirements");
    let requirements = bidforge_requirements::parse_requirements(
        &config.requirements,
        client,
        &cache,
        config.use_llm,
    )
    .await?;
    info!(count = requirements.len(), "requirements parsed");

    // --- Phase 2: Rank knowledge-base candidates ---
    progress.phase("Ranking knowledge base");
    let files = bidforge_kb::scan_kb(&config.kb);
    info!(files = files.len(), kb = %config.kb.display(), "knowledge base scanned");

    let mut ranked: HashMap<String, Vec<EvidenceCandidate>> = HashMap::new();
    let total = requirements.len();
    for (i, req) in requirements.iter().enumerate() {
        progress.item(i + 1, total, &format!("Ranking: {}", req.title));
        let candidates = bidforge_kb::rank_files(
            req,
            &files,
            config.topk,
            client,
            &cache,
            config.use_llm,
        )
        .await?;
        ranked.insert(req.id.clone(), candidates);
    }

    // --- Phase 3: Merge evidence ---
    progress.phase("Merging content");
    let (sections, meta) =
        bidforge_merge::merge_contents(&requirements, &ranked, client, &cache, config.use_llm)
            .await?;
    let markdown = bidforge_merge::render_markdown(&requirements, &sections);

    let merged_md_path = config.workdir.join("merged.md");
    std::fs::write(&merged_md_path, &markdown)
        .map_err(|e| BidforgeError::io(&merged_md_path, e))?;

    let meta_path = config.workdir.join("meta.json");
    let meta_json = serde_json::to_string_pretty(&meta)
        .map_err(|e| BidforgeError::parse(format!("meta serialization failed: {e}")))?;
    std::fs::write(&meta_path, meta_json).map_err(|e| BidforgeError::io(&meta_path, e))?;

    // --- Phase 4: Render LaTeX ---
    progress.phase("Rendering LaTeX");
    let latex_body =
        bidforge_render::markdown_to_latex(&markdown, client, &cache, config.use_llm).await?;
    let template = match &config.template {
        Some(path) => bidforge_render::load_template(path)?,
        None => bidforge_render::DEFAULT_TEMPLATE.to_string(),
    };
    let tex_path = config.workdir.join("main.tex");
    bidforge_render::render_main_tex(&latex_body, &template, &tex_path)?;

    // --- Phase 5: Compile PDF (degradable) ---
    progress.phase("Compiling PDF");
    let pdf = bidforge_render::compile_pdf(&tex_path, &config.out)?;
    if pdf.is_none() {
        warn!("PDF compilation unavailable or failed; merged document and LaTeX are still written");
    }

    // --- Phase 6: Response files (optional) ---
    let responses = if config.write_responses {
        progress.phase("Writing response files");
        bidforge_merge::responses::write_responses(
            &requirements,
            &sections,
            client,
            &config.workdir.join("responses"),
        )
        .await?
    } else {
        Vec::new()
    };

    let result = BuildResult {
        requirement_count: requirements.len(),
        pdf,
        merged_md: merged_md_path,
        meta: meta_path,
        responses,
        elapsed: start.elapsed(),
    };

    info!(
        requirements = result.requirement_count,
        pdf = result.pdf.is_some(),
        elapsed_ms = result.elapsed.as_millis(),
        "build pipeline complete"
    );

    Ok(result)
}
