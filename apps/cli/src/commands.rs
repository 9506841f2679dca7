//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use imageset_core::{BuildSummary, DatasetBuilder, ProgressReporter, load_dataset};
use imageset_shared::{
    AppConfig, BuildConfig, BuildOverrides, DomainSpec, init_config, load_config, metadata_path,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::views::{self, View};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// imageset: turn a prompt into a captioned image dataset.
#[derive(Parser)]
#[command(
    name = "imageset",
    version,
    about = "Build captioned image datasets from a text prompt.",
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
    /// Build a dataset for a prompt.
    Build {
        /// What the dataset should show, e.g. "solar panel types".
        prompt: String,

        /// Output directory (defaults to `defaults.output_dir` from config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Maximum images per search query (1-50).
        #[arg(long)]
        max_images: Option<usize>,

        /// Concurrent per-image workers (1-10).
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// SerpApi key.
        #[arg(long, env = "SERP_API_KEY", hide_env_values = true)]
        serp_api_key: Option<String>,

        /// OpenAI API key.
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        openai_api_key: Option<String>,
    },

    /// Show a previously built dataset.
    Inspect {
        /// Dataset directory (defaults to `defaults.output_dir` from config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// How to render the dataset.
        #[arg(long, value_enum, default_value = "gallery")]
        view: View,
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
        0 => "imageset=info",
        1 => "imageset=debug",
        _ => "imageset=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
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
            prompt,
            out,
            max_images,
            concurrency,
            serp_api_key,
            openai_api_key,
        } => {
            let overrides = BuildOverrides {
                output_dir: out,
                max_images_per_query: max_images,
                max_concurrent_downloads: concurrency,
                serp_api_key,
                openai_api_key,
            };
            cmd_build(&prompt, &overrides).await
        }
        Command::Inspect { out, view } => cmd_inspect(out, view).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_build(prompt: &str, overrides: &BuildOverrides) -> Result<()> {
    let app = load_config()?;
    let config = BuildConfig::resolve(&app, overrides)?;

    info!(
        prompt,
        out = %config.output_root.display(),
        "building dataset"
    );

    let builder = DatasetBuilder::from_config(config)?;
    let reporter = CliProgress::new();

    let dataset = match builder.build(prompt, &reporter).await {
        Ok(dataset) => dataset,
        Err(e) => {
            reporter.spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    let summary = reporter.summary();

    println!();
    println!(
        "  Dataset created successfully with {} images!",
        dataset.metadata().total_images
    );
    println!("  Domains:  {}", dataset.metadata().domains.join(", "));
    if let Some(summary) = summary {
        println!(
            "  Queries:  {} ({} failed)",
            summary.queries, summary.failed_queries
        );
        println!("  Hits:     {}", summary.hits);
        println!("  Metadata: {}", summary.metadata_path.display());
        println!("  Time:     {:.1}s", summary.elapsed.as_secs_f64());
    }
    println!();

    Ok(())
}

async fn cmd_inspect(out: Option<PathBuf>, view: View) -> Result<()> {
    let app = load_config()?;
    let root = app.output_root(out.as_deref());
    if !metadata_path(&root).exists() {
        return Err(eyre!(
            "no dataset found at '{}'. Run `imageset build` first.",
            root.display()
        ));
    }

    let dataset = load_dataset(&root)?;

    print!("{}", views::render(&dataset, view)?);
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
    summary: std::sync::Mutex<Option<BuildSummary>>,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            summary: std::sync::Mutex::new(None),
        }
    }

    fn summary(&self) -> Option<BuildSummary> {
        self.summary.lock().ok().and_then(|s| s.clone())
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn domains_expanded(&self, domains: &[DomainSpec]) {
        let queries: usize = domains.iter().map(|d| d.queries.len()).sum();
        self.spinner.println(format!(
            "  Found {} domains, {queries} queries",
            domains.len()
        ));
    }

    fn query_searched(&self, domain: &str, query: &str, hits: usize) {
        self.spinner
            .set_message(format!("[{domain}] \"{query}\": processing {hits} images"));
    }

    fn query_failed(&self, query: &str, error: &str) {
        self.spinner
            .println(format!("  Search failed for \"{query}\": {error}"));
    }

    fn images_processed(&self, query: &str, kept: usize, hits: usize) {
        self.spinner
            .println(format!("  \"{query}\": kept {kept}/{hits} images"));
    }

    fn done(&self, summary: &BuildSummary) {
        if let Ok(mut slot) = self.summary.lock() {
            *slot = Some(summary.clone());
        }
        self.spinner.finish_and_clear();
    }
}
