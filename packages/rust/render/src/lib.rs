//! Typesetting boundary: Markdown → LaTeX body → template → PDF.
//!
//! Compilation is an external, environment-dependent step — a missing
//! compiler or a failed run is logged with the compiler's output attached and
//! never aborts the pipeline. Every other failure here propagates normally.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info};

use bidforge_llm::{ModelClient, PromptCache, Transport, llm_rewrite};
use bidforge_shared::{BidforgeError, Result};

/// Built-in LaTeX template used when no `--template` is given.
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/main.tex");

/// Marker token replaced by the rendered body.
const CONTENT_MARKER: &str = "%%CONTENT%%";

/// Instruction for the semantic conversion call.
const LATEX_SYSTEM: &str = "Convert the following Markdown into LaTeX code only.";

/// Convert merged Markdown into a LaTeX body.
///
/// With semantic conversion disabled the body is a verbatim wrapper — ugly
/// but always compilable.
pub async fn markdown_to_latex<T: Transport>(
    markdown: &str,
    client: &mut ModelClient<T>,
    cache: &PromptCache,
    use_llm: bool,
) -> Result<String> {
    if use_llm {
        llm_rewrite(client, cache, LATEX_SYSTEM, markdown).await
    } else {
        Ok(format!("\\begin{{verbatim}}\n{markdown}\n\\end{{verbatim}}\n"))
    }
}

/// Substitute `body` into the template at the content marker and write the
/// filled `.tex` file. Returns the filled text.
pub fn render_main_tex(body: &str, template: &str, output_path: &Path) -> Result<String> {
    if !template.contains(CONTENT_MARKER) {
        return Err(BidforgeError::Render(format!(
            "template has no {CONTENT_MARKER} marker"
        )));
    }
    let tex = template.replace(CONTENT_MARKER, body);
    std::fs::write(output_path, &tex).map_err(|e| BidforgeError::io(output_path, e))?;
    Ok(tex)
}

/// Read a template file from disk.
pub fn load_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| BidforgeError::io(path, e))
}

/// Compile `tex_path` with latexmk (two passes for stable references) and
/// move the built PDF to `out_pdf`.
///
/// Returns `Ok(Some(path))` on success. A missing compiler or a non-zero
/// exit is logged and yields `Ok(None)` — compilation failure must not raise
/// past the pipeline boundary.
pub fn compile_pdf(tex_path: &Path, out_pdf: &Path) -> Result<Option<PathBuf>> {
    let workdir = tex_path.parent().unwrap_or(Path::new("."));
    let tex_name = tex_path
        .file_name()
        .ok_or_else(|| BidforgeError::Render(format!("not a file: {}", tex_path.display())))?;

    for pass in 1..=2 {
        let output = Command::new("latexmk")
            .arg("-xelatex")
            .arg("-interaction=nonstopmode")
            .arg(tex_name)
            .current_dir(workdir)
            .output();

        match output {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!("latexmk not found; install a TeX distribution to produce PDFs");
                return Ok(None);
            }
            Err(e) => return Err(BidforgeError::io(tex_path, e)),
            Ok(out) if !out.status.success() => {
                let log = String::from_utf8_lossy(&out.stdout);
                error!(
                    pass,
                    status = %out.status,
                    output = %tail(&log, 2000),
                    "LaTeX compilation failed"
                );
                return Ok(None);
            }
            Ok(_) => {}
        }
    }

    let built = workdir.join(Path::new(tex_name).with_extension("pdf"));
    if let Some(parent) = out_pdf.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BidforgeError::io(parent, e))?;
    }
    std::fs::rename(&built, out_pdf).map_err(|e| BidforgeError::io(&built, e))?;

    info!(pdf = %out_pdf.display(), "PDF compiled");
    Ok(Some(out_pdf.to_path_buf()))
}

/// Last `max` bytes of a log, on a char boundary.
fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidforge_llm::ClientConfig;
    use bidforge_llm::testing::ScriptedTransport;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bidforge-render-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn verbatim_fallback_wraps_markdown() {
        let dir = temp_dir();
        let cache = PromptCache::open(dir.join("cache")).unwrap();
        let mut client =
            ModelClient::new(ScriptedTransport::empty(), ClientConfig::default()).unwrap();

        let latex = markdown_to_latex("### 标题\n\n内容", &mut client, &cache, false)
            .await
            .unwrap();
        assert!(latex.starts_with("\\begin{verbatim}"));
        assert!(latex.contains("### 标题"));
        assert!(latex.trim_end().ends_with("\\end{verbatim}"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn semantic_conversion_goes_through_the_model() {
        let dir = temp_dir();
        let cache = PromptCache::open(dir.join("cache")).unwrap();
        let transport =
            ScriptedTransport::new([Ok("\\subsection{标题}\n内容".to_string())]);
        let mut client = ModelClient::new(transport, ClientConfig::default()).unwrap();

        let latex = markdown_to_latex("### 标题\n\n内容", &mut client, &cache, true)
            .await
            .unwrap();
        assert!(latex.starts_with("\\subsection"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn template_substitution_writes_filled_tex() {
        let dir = temp_dir();
        let out = dir.join("main.tex");

        let tex = render_main_tex("正文内容", DEFAULT_TEMPLATE, &out).unwrap();
        assert!(tex.contains("正文内容"));
        assert!(!tex.contains(CONTENT_MARKER));

        let on_disk = std::fs::read_to_string(&out).unwrap();
        assert_eq!(on_disk, tex);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn template_without_marker_is_an_error() {
        let dir = temp_dir();
        let out = dir.join("main.tex");
        let err = render_main_tex("body", "\\documentclass{article}", &out).unwrap_err();
        assert!(matches!(err, BidforgeError::Render(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn default_template_carries_the_marker() {
        assert!(DEFAULT_TEMPLATE.contains(CONTENT_MARKER));
    }

    #[test]
    fn log_tail_is_bounded() {
        let log = "a".repeat(5000);
        assert_eq!(tail(&log, 2000).len(), 2000);
        assert_eq!(tail("short", 2000), "short");
    }
}
