//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use bidforge_core::extractor::{ExtractConfig, extract_required_documents};
use bidforge_core::pipeline::{BuildConfig, ProgressReporter, build_document};
use bidforge_llm::{ClientConfig, HttpTransport, ModelClient};
use bidforge_shared::{AppConfig, init_config, load_config, resolve_api_key};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bidforge — turn requirements and evidence into a typeset bid response.
#[derive(Parser)]
#[command(
    name = "bidforge",
    version,
    about = "Assemble a bid-response document by matching requirements against a knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build the bid-response document (requirements → ranking → merge → PDF).
    Build {
        /// Requirement-source path (JSON/CSV/Markdown/PDF/text).
        #[arg(long)]
        requirements: PathBuf,

        /// Knowledge-base root directory.
        #[arg(long)]
        kb: PathBuf,

        /// Target path for the compiled PDF.
        #[arg(long)]
        out: PathBuf,

        /// LaTeX template with a %%CONTENT%% marker (built-in default if omitted).
        #[arg(long)]
        template: Option<PathBuf>,

        /// Working directory for intermediate artifacts and the call cache.
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Ranked candidates retained per requirement.
        #[arg(long)]
        topk: Option<usize>,

        /// Disable all model-backed behavior in favor of deterministic fallbacks.
        #[arg(long)]
        no_llm: bool,

        /// Also write one response file per requirement.
        #[arg(long)]
        responses: bool,
    },

    /// Extract the submission checklist from a tender document.
    Extract {
        /// Tender document path (PDF or text).
        #[arg(long)]
        tender: PathBuf,

        /// Output directory for the checklist and JSON dump.
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,

        /// Working directory holding the call cache.
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bidforge=info",
        1 => "bidforge=debug",
        _ => "bidforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build {
            requirements,
            kb,
            out,
            template,
            workdir,
            topk,
            no_llm,
            responses,
        } => {
            cmd_build(
                requirements,
                kb,
                out,
                template,
                workdir,
                topk,
                no_llm,
                responses,
            )
            .await
        }
        Command::Extract {
            tender,
            out_dir,
            workdir,
        } => cmd_extract(tender, out_dir, workdir).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Resolve credentials and build the model client. With model-backed behavior
/// disabled no request is ever issued, so a missing key is fine.
fn build_client(config: &AppConfig, use_llm: bool) -> Result<ModelClient<HttpTransport>> {
    let api_key = if use_llm {
        resolve_api_key(config)?
    } else {
        std::env::var(&config.dashscope.api_key_env).unwrap_or_default()
    };

    let transport = HttpTransport::new(&config.dashscope.base_url, api_key)?;
    Ok(ModelClient::new(
        transport,
        ClientConfig::from(&config.dashscope),
    )?)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_build(
    requirements: PathBuf,
    kb: PathBuf,
    out: PathBuf,
    template: Option<PathBuf>,
    workdir: Option<PathBuf>,
    topk: Option<usize>,
    no_llm: bool,
    responses: bool,
) -> Result<()> {
    let config = load_config()?;
    let use_llm = !no_llm;
    let mut client = build_client(&config, use_llm)?;

    let build_config = BuildConfig {
        requirements,
        kb,
        out,
        template,
        workdir: workdir.unwrap_or_else(|| PathBuf::from(&config.defaults.workdir)),
        topk: topk.unwrap_or(config.defaults.topk),
        use_llm,
        write_responses: responses,
    };

    info!(
        requirements = %build_config.requirements.display(),
        kb = %build_config.kb.display(),
        topk = build_config.topk,
        use_llm,
        "building bid response"
    );

    let reporter = CliProgress::new();
    let result = build_document(&build_config, &mut client, &reporter).await?;
    reporter.finish();

    println!();
    println!("  Bid response built!");
    println!("  Requirements: {}", result.requirement_count);
    println!("  Merged:       {}", result.merged_md.display());
    println!("  Metadata:     {}", result.meta.display());
    match &result.pdf {
        Some(pdf) => println!("  PDF:          {}", pdf.display()),
        None => println!("  PDF:          not produced (see log)"),
    }
    if !result.responses.is_empty() {
        println!("  Responses:    {} files", result.responses.len());
    }
    println!("  Time:         {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_extract(
    tender: PathBuf,
    out_dir: PathBuf,
    workdir: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    // Extraction is model-backed by nature; the key is always required.
    let mut client = build_client(&config, true)?;

    let extract_config = ExtractConfig {
        tender,
        out_dir,
        workdir: workdir.unwrap_or_else(|| PathBuf::from(&config.defaults.workdir)),
    };

    info!(tender = %extract_config.tender.display(), "extracting submission checklist");

    let reporter = CliProgress::new();
    let result = extract_required_documents(&extract_config, &mut client, &reporter).await?;
    reporter.finish();

    println!();
    println!("  Submission checklist extracted!");
    println!("  Found:     {} requirements", result.total);
    println!("  Unique:    {}", result.unique);
    println!("  Checklist: {}", result.markdown_path.display());
    println!("  JSON:      {}", result.json_path.display());
    println!();

    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item(&self, current: usize, total: usize, detail: &str) {
        self.spinner.set_message(format!("[{current}/{total}] {detail}"));
    }
}
