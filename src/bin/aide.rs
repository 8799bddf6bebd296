//! CLI binary for aide-extract.
//!
//! A thin shim over the library crate: each subcommand opens the file-backed
//! session, performs one step of the extraction workflow, and saves.

use aide_extract::form::export::{to_text_table, write_to_path};
use aide_extract::session::{load_api_config, save_api_config};
use aide_extract::{
    default_file_name, resolve_input, AnalysisProgressCallback, AnalysisStage, ApiConfig,
    ExportFormat, ExtractionSession, FileSessionStore, HttpChatBackend, PdfiumBackend,
    ProcessingMode, ProgressCallback, PromptState, ViewerConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner for analysis stages that turns into a page bar while rendering.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: AnalysisStage) {
        self.bar.set_prefix("Analysing");
        self.bar.set_message(stage.to_string());
    }

    fn on_render_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total_pages as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Rendering");
    }

    fn on_page_rendered(&self, _page_num: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_render_complete(&self, total_pages: usize) {
        self.bar.println(format!(
            "{} Rendered {} pages",
            green("✓"),
            bold(&total_pages.to_string())
        ));
    }

    fn on_render_failed(&self, error: &str) {
        self.bar.println(format!("{} {}", red("✗"), red(error)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Save API settings and fetch model capabilities
  aide setup --api-key sk-or-... --model openai/gpt-4.1-mini

  # Import the coding form (header row = prompts)
  aide import coding_form.xlsx

  # Analyse a PDF and review the suggestions interactively
  aide analyze trial_01.pdf

  # Move on to the next document (appends a blank row)
  aide next

  # Export the final coding form
  aide export --format xlsx

REVIEW COMMANDS (inside `aide analyze`):
  l            list prompts with suggestions and state
  s N          show the source excerpt for prompt N
  e N TEXT     replace the suggestion for prompt N
  r N          record prompt N into the coding form
  u N          reopen prompt N for editing
  a            record every unrecorded prompt that has a value
  n            finish this document and advance to the next row
  q            quit (recorded values are already saved)

ENVIRONMENT VARIABLES:
  AIDE_API_ENDPOINT   Chat-completions URL
  AIDE_API_KEY        API key (bearer token)
  AIDE_MODEL          Model ID
  AIDE_MAX_TOKENS     Output-length cap forwarded as max_tokens
  AIDE_SESSION        Session file (default: aide_session.json)
  PDFIUM_LIB_PATH     Path to libpdfium or the directory holding it
"#;

/// LLM-assisted, human-validated data extraction from PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "aide",
    version,
    about = "LLM-assisted, human-validated data extraction from PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Session file holding settings and the coding form.
    #[arg(long, global = true, env = "AIDE_SESSION", default_value = "aide_session.json")]
    session: PathBuf,

    /// Path to libpdfium or its directory.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "AIDE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "AIDE_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save API settings and fetch the model listing.
    Setup {
        /// Chat-completions endpoint.
        #[arg(
            long,
            env = "AIDE_API_ENDPOINT",
            default_value = "https://openrouter.ai/api/v1/chat/completions"
        )]
        endpoint: String,

        /// API key.
        #[arg(long, env = "AIDE_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Model ID.
        #[arg(long, env = "AIDE_MODEL")]
        model: String,

        /// Output-length cap forwarded as max_tokens.
        #[arg(long, env = "AIDE_MAX_TOKENS")]
        max_tokens: Option<u32>,
    },

    /// Send a minimal request to check the saved settings.
    TestConnection,

    /// List available models with prices and PDF support.
    Models,

    /// Import a coding form (csv, tsv, xlsx, xls, ods).
    Import { path: PathBuf },

    /// Analyse a PDF and review the suggestions.
    Analyze {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Processing mode.
        #[arg(long, value_enum, default_value = "auto")]
        mode: ModeArg,

        /// Print the suggestions and exit without the review prompt.
        #[arg(long)]
        no_review: bool,

        /// HTTP download timeout in seconds.
        #[arg(long, default_value_t = 120)]
        download_timeout: u64,

        /// Timeout for the analysis call in seconds. Default: none.
        #[arg(long)]
        api_timeout: Option<u64>,
    },

    /// Finish the current document and append a blank row.
    Next,

    /// Print the coding form.
    Show {
        /// Maximum column width.
        #[arg(long, default_value_t = 24)]
        width: usize,
    },

    /// Export the coding form.
    Export {
        #[arg(long, value_enum, default_value = "csv")]
        format: FormatArg,

        /// Output path. Default: aide_final_coding_form_<date>.<ext>
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a PDF and write page PNGs at a zoom level.
    Preview {
        input: String,

        /// Output directory.
        #[arg(short, long, default_value = "aide_preview")]
        output: PathBuf,

        /// Zoom steps: positive zooms in, negative zooms out.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        zoom: i32,

        /// Highlight this 1-based page in the summary.
        #[arg(long)]
        page: Option<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// Pick from the model's capabilities.
    Auto,
    /// Send the PDF file.
    Pdf,
    /// Send extracted text only.
    Text,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Csv,
    Xlsx,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Xlsx => ExportFormat::Xlsx,
        }
    }
}

type Session = ExtractionSession<FileSessionStore>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Setup {
            endpoint,
            api_key,
            model,
            max_tokens,
        } => {
            let api = ApiConfig::builder()
                .endpoint(endpoint.as_str())
                .api_key(api_key.as_str())
                .model(model.as_str())
                .max_tokens_opt(*max_tokens)
                .build()
                .context("Invalid API settings")?;
            let mut session = open_session(&cli)?;
            save_api_config(session.store_mut(), &api).context("Failed to save settings")?;
            eprintln!("{} Saved API settings for {}", green("✔"), bold(&api.model));
            refresh_models(&mut session, &api, cli.quiet).await?;
        }

        Command::TestConnection => {
            let mut session = open_session(&cli)?;
            let api = require_api(&mut session)?;
            let spinner = spinner(cli.quiet, "Testing connection…");
            let ok = HttpChatBackend::new(api.clone())?.test_connection().await;
            spinner.finish_and_clear();
            if ok {
                println!("{} Connection successful ({})", green("✔"), api.model);
            } else {
                println!("{} Connection failed. Check endpoint, key and model.", red("✘"));
                std::process::exit(1);
            }
        }

        Command::Models => {
            let mut session = open_session(&cli)?;
            let api = require_api(&mut session)?;
            refresh_models(&mut session, &api, cli.quiet).await?;
        }

        Command::Import { path } => {
            let mut session = open_session(&cli)?;
            let form = session
                .import_path(path)
                .with_context(|| format!("Failed to import {}", path.display()))?;
            println!(
                "{} Imported {} prompts, {} rows",
                green("✔"),
                bold(&form.headers().len().to_string()),
                form.row_count()
            );
            for (i, p) in form.prompts().iter().enumerate() {
                println!("  {:>3}. {}", i + 1, p);
            }
        }

        Command::Analyze {
            input,
            mode,
            no_review,
            download_timeout,
            api_timeout,
        } => {
            let progress = CliProgressCallback::new();
            let mut session = open_session(&cli)?
                .with_progress(Arc::clone(&progress) as ProgressCallback);
            let mut api = require_api(&mut session)?;
            api.request_timeout_secs = *api_timeout;
            if session.form().is_none() {
                anyhow::bail!("No coding form loaded. Run `aide import <file>` first.");
            }

            let source = resolve_input(input, *download_timeout)
                .await
                .with_context(|| format!("Failed to open {input}"))?;
            let status = session.load_document(source).await;
            if let Some(e) = &status.text_error {
                progress.bar.println(format!("{} {}", cyan("⚠"), e));
            }

            session.resolve_mode(&api.model);
            match mode {
                ModeArg::Auto => {}
                ModeArg::Pdf => session.set_mode(ProcessingMode::RichContent),
                ModeArg::Text => session.set_mode(ProcessingMode::TextOnly),
            }
            progress
                .bar
                .println(format!("{} Mode: {}", cyan("◆"), session.mode()));

            let backend = HttpChatBackend::new(api.clone())?;
            let result = session.analyze(&backend, &api).await;
            progress.finish();
            if let Some(w) = result.context("Analysis failed")? {
                eprintln!("{} {}", cyan("⚠"), w);
            }

            print_entries(&session);
            if !*no_review {
                tokio::task::block_in_place(|| review_loop(&mut session))?;
            }
        }

        Command::Next => {
            let mut session = open_session(&cli)?;
            session.next_document().context("Failed to advance")?;
            let rows = session.form().map_or(0, |f| f.row_count());
            println!("{} Ready for document {}", green("✔"), rows);
        }

        Command::Show { width } => {
            let session = open_session(&cli)?;
            let form = session
                .form()
                .context("No coding form loaded. Run `aide import <file>` first.")?;
            if let Some(name) = form.file_name() {
                println!("{}", dim(name));
            }
            print!("{}", to_text_table(form, *width));
        }

        Command::Export { format, output } => {
            let session = open_session(&cli)?;
            let form = session
                .form()
                .context("No coding form loaded. Run `aide import <file>` first.")?;
            let format: ExportFormat = (*format).into();
            let path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(default_file_name(format)));
            write_to_path(form, format, &path)
                .with_context(|| format!("Failed to export to {}", path.display()))?;
            println!(
                "{} Exported {} rows → {}",
                green("✔"),
                form.row_count(),
                bold(&path.display().to_string())
            );
        }

        Command::Preview {
            input,
            output,
            zoom,
            page,
        } => {
            let progress = CliProgressCallback::new();
            let mut session = open_session(&cli)?
                .with_progress(Arc::clone(&progress) as ProgressCallback);
            let source = resolve_input(input, 120)
                .await
                .with_context(|| format!("Failed to open {input}"))?;
            let status = session.load_document(source).await;
            progress.finish();
            if let Some(e) = status.render_error {
                anyhow::bail!(e);
            }

            let viewer = session.viewer_mut();
            for _ in 0..zoom.unsigned_abs() {
                if *zoom > 0 {
                    viewer.zoom_in();
                } else {
                    viewer.zoom_out();
                }
            }
            if let Some(p) = page {
                if !viewer.highlight_page(*p) {
                    eprintln!("{} Page {} is out of range", cyan("⚠"), p);
                }
            }
            let files = viewer
                .export_preview(output)
                .context("Failed to write preview")?;
            println!(
                "{} {} pages at {}% → {}",
                green("✔"),
                files.len(),
                viewer.zoom().percent(),
                bold(&output.display().to_string())
            );
            if let Some(p) = viewer.highlighted_page() {
                if let Some(f) = files.get(p - 1) {
                    println!("  {} {}", cyan("▶"), f.display());
                }
            }
        }
    }

    Ok(())
}

fn open_session(cli: &Cli) -> Result<Session> {
    let store = FileSessionStore::open(&cli.session)
        .with_context(|| format!("Failed to open session {}", cli.session.display()))?;
    let pdf = match &cli.pdfium_lib {
        Some(p) => PdfiumBackend::new(Some(p.clone())),
        None => PdfiumBackend::from_env(),
    };
    Ok(ExtractionSession::open(
        store,
        Arc::new(pdf),
        ViewerConfig::default(),
    )?)
}

fn require_api(session: &mut Session) -> Result<ApiConfig> {
    load_api_config(session.store_mut())?
        .context("API settings are missing. Run `aide setup` first.")
}

fn spinner(quiet: bool, msg: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Fetch the model listing, store the capability map and print the models.
async fn refresh_models(session: &mut Session, api: &ApiConfig, quiet: bool) -> Result<()> {
    let spinner = spinner(quiet, "Fetching models…");
    let listing = HttpChatBackend::new(api.clone())?.list_models().await;
    spinner.finish_and_clear();
    let listing = match listing {
        Ok(l) => l,
        Err(e) => {
            eprintln!("{} Could not fetch models: {}", red("✗"), e);
            return Ok(());
        }
    };

    session
        .set_capabilities(listing.capabilities.clone())
        .context("Failed to save model capabilities")?;

    println!("{} {} models found", green("✓"), listing.models.len());
    if !quiet {
        for m in &listing.models {
            let pdf = if m.input_modalities.iter().any(|x| x == "file") {
                green("PDF")
            } else {
                dim("text")
            };
            let free = if m.is_free { cyan(" free") } else { String::new() };
            println!(
                "  {:<48} {:>12} / {:<12} {}{}",
                m.id,
                m.prompt_price_label(),
                m.completion_price_label(),
                pdf,
                free
            );
        }
    }
    if !listing.contains(&api.model) {
        eprintln!(
            "{} Model '{}' is not in the listing",
            cyan("⚠"),
            api.model
        );
    }
    Ok(())
}

fn print_entries(session: &Session) {
    let Some(form) = session.form() else { return };
    let lifecycle = session.lifecycle();
    println!();
    for (i, (prompt, entry)) in form.prompts().iter().zip(lifecycle.entries()).enumerate() {
        let mark = match lifecycle.state(i) {
            Ok(PromptState::Recorded) => green("●"),
            _ => dim("○"),
        };
        let page = if entry.page.is_empty() {
            String::new()
        } else {
            dim(&format!("  (p. {})", entry.page))
        };
        println!("{} {:>3}. {}", mark, i + 1, bold(prompt));
        println!("       {}{}", entry.response, page);
    }
    println!();
}

/// Parse a 1-based prompt number into an index.
fn prompt_index(arg: Option<&str>) -> Result<usize> {
    let n: usize = arg
        .context("Missing prompt number")?
        .trim()
        .parse()
        .context("Invalid prompt number")?;
    if n < 1 {
        anyhow::bail!("Prompts are numbered from 1");
    }
    Ok(n - 1)
}

fn review_loop(session: &mut Session) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("{} ", cyan("review>"));
        io::stderr().flush().ok();
        let Some(line) = lines.next() else {
            return Ok(());
        };
        let line = line.context("Failed to read input")?;
        let mut parts = line.trim().splitn(3, ' ');
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next();

        let outcome: Result<()> = match cmd {
            "" => Ok(()),
            "l" => {
                print_entries(session);
                Ok(())
            }
            "s" => prompt_index(arg).and_then(|i| {
                let entry = session.entry(i)?.clone();
                let page = session.viewer_mut().highlight_entry(&entry);
                if entry.has_source() {
                    println!("  \u{201c}{}\u{201d}", entry.source);
                } else {
                    println!("  {}", dim("(no source excerpt)"));
                }
                match page {
                    Some(p) => println!("  {} page {}", cyan("▶"), p),
                    None => println!("  {}", dim(&format!("page: {}", entry.page))),
                }
                Ok(())
            }),
            "e" => prompt_index(arg).and_then(|i| {
                let text = parts.next().unwrap_or("").to_string();
                session.edit_response(i, text)?;
                Ok(())
            }),
            "r" => prompt_index(arg).and_then(|i| {
                session.record(i)?;
                println!("  {} recorded prompt {}", green("✓"), i + 1);
                Ok(())
            }),
            "u" => prompt_index(arg).and_then(|i| {
                session.re_record(i)?;
                println!("  reopened prompt {}", i + 1);
                Ok(())
            }),
            "a" => session.record_all().map_err(Into::into).map(|n| {
                println!("  {} recorded {} prompts", green("✓"), n);
            }),
            "n" => {
                session.next_document()?;
                println!(
                    "{} Ready for the next document. Run `aide analyze <pdf>`.",
                    green("✔")
                );
                return Ok(());
            }
            "q" => return Ok(()),
            other => Err(anyhow::anyhow!("Unknown command '{other}'. See `aide --help`.")),
        };
        if let Err(e) = outcome {
            eprintln!("  {} {:#}", red("✗"), e);
        }
    }
}
