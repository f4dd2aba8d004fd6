use crate::app::App;
use crate::catalogue::{ExamplesStore, FileSource, StaticSource};
use crate::config::{Config, load_config};
use crate::export::{DirectorySink, ExportFormat};
use crate::prefs::FileStore;
use crate::render::RenderOutcome;
use crate::theme::ThemeRegistry;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mmds", version, about = "Mermaid diagram editor with sanitized SVG/PNG export")]
pub struct Args {
    /// Config JSON file
    #[arg(short = 'c', long = "configFile", global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a diagram once and export it
    Render(RenderArgs),
    /// List the example catalogue
    Examples,
    /// Show the active theme, or switch to KEY
    Theme { key: Option<String> },
    /// Interactive line editor
    Edit,
}

#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Input file (.mmd or .md) or '-' for stdin
    #[arg(short = 'i', long = "input", conflicts_with = "example")]
    pub input: Option<PathBuf>,

    /// Render catalogue example N instead of an input file
    #[arg(long = "example")]
    pub example: Option<usize>,

    /// Output file. Defaults to diagram.svg / diagram.png in the output directory.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'e', long = "outputFormat", value_enum, default_value = "svg")]
    pub output_format: OutputFormat,

    /// Switch (and persist) the theme before rendering
    #[arg(long = "theme")]
    pub theme: Option<String>,

    /// Also write an HTML preview page
    #[arg(long = "html")]
    pub html: Option<PathBuf>,

    /// Append a timestamp to default output names
    #[arg(long = "timestamp")]
    pub timestamp: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Svg,
    Png,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Svg => ExportFormat::Svg,
            OutputFormat::Png => ExportFormat::Png,
        }
    }
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config = load_config(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(async move {
        match args.command {
            Command::Render(render) => run_render(&config, render).await,
            Command::Examples => run_examples(&config).await,
            Command::Theme { key } => run_theme(&config, key.as_deref()),
            Command::Edit => crate::repl::run(build_app(&config, None, false)?).await,
        }
    })
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

/// Assembles the app from config. `output_dir` overrides the configured
/// export directory.
pub fn build_app(config: &Config, output_dir: Option<&Path>, timestamp: bool) -> Result<App> {
    let renderer = &config.renderer;
    let backend = crate::backend::CommandBackend::new(
        renderer.program.clone(),
        renderer.args.clone(),
        renderer.scratch_dir.clone(),
    );
    let sink = DirectorySink::new(output_dir.unwrap_or(&config.export.output_dir));
    let mut builder = App::builder()
        .backend(backend)
        .download_sink(sink)
        .preferences(FileStore::open(config.preferences_path()))
        .retry(config.catalogue.retry_policy())
        .max_bytes(config.export.max_bytes)
        .raster_options(config.export.raster_options())
        .timestamp_names(timestamp || config.export.timestamp_names);
    builder = match &config.catalogue.path {
        Some(path) => builder.catalogue(FileSource::new(path)),
        None => builder.catalogue(StaticSource::builtin()),
    };
    #[cfg(feature = "png")]
    {
        builder = builder.rasterizer(crate::raster::ResvgRasterizer::new());
    }
    Ok(builder.build()?)
}

async fn run_render(config: &Config, args: RenderArgs) -> Result<()> {
    let output_dir = args
        .output
        .as_deref()
        .and_then(Path::parent)
        .filter(|parent| !parent.as_os_str().is_empty());
    let file_name = args
        .output
        .as_deref()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str());
    let mut app = build_app(config, output_dir, args.timestamp)?;
    if let Some(key) = args.theme.as_deref() {
        anyhow::ensure!(app.themes().get(key).is_some(), "unknown theme `{key}`");
    }

    let source = match (args.example, args.input.as_deref()) {
        (Some(index), _) => {
            app.load_examples().await;
            print_notices(&mut app);
            anyhow::ensure!(app.load_example(index), "no example with index {index}");
            app.editor().text().to_string()
        }
        (None, input) => {
            let (input, is_markdown) = read_input(input)?;
            if is_markdown {
                extract_mermaid_blocks(&input)
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("No Mermaid diagrams found in input"))?
            } else {
                input
            }
        }
    };
    app.editor_mut().set_text(source);
    app.initialize_backend()?;

    match args.theme.as_deref() {
        Some(key) => {
            app.switch_theme(key).await;
        }
        None => {
            app.render_current().await;
        }
    }
    print_notices(&mut app);
    match app.last_outcome() {
        Some(RenderOutcome::Rendered { .. }) => {}
        Some(RenderOutcome::Failed { message }) => anyhow::bail!("render failed: {message}"),
        _ => anyhow::bail!("input is empty"),
    }

    if let Some(path) = &args.html {
        std::fs::write(path, app.preview_html())
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let ok = match ExportFormat::from(args.output_format) {
        ExportFormat::Svg => app.export_svg(file_name),
        ExportFormat::Png => app.export_png(file_name).await,
    };
    print_notices(&mut app);
    anyhow::ensure!(ok, "export failed");
    Ok(())
}

async fn run_examples(config: &Config) -> Result<()> {
    let store = match &config.catalogue.path {
        Some(path) => ExamplesStore::new(Box::new(FileSource::new(path)), config.catalogue.retry_policy()),
        None => ExamplesStore::new(Box::new(StaticSource::builtin()), config.catalogue.retry_policy()),
    };
    let snippets = store.load().await?;
    for (idx, snippet) in snippets.iter().enumerate() {
        println!("{idx:>3}  {}", snippet.title);
    }
    Ok(())
}

fn run_theme(config: &Config, key: Option<&str>) -> Result<()> {
    let mut themes = ThemeRegistry::load(Box::new(FileStore::open(config.preferences_path())));
    if let Some(key) = key {
        anyhow::ensure!(themes.set_active(key), "unknown theme `{key}`");
    }
    let active = themes.active().key.clone();
    for theme in themes.themes() {
        let marker = if theme.key == active { "*" } else { " " };
        println!("{marker} {:<8} {}", theme.key, theme.display_name);
    }
    Ok(())
}

pub(crate) fn print_notices(app: &mut App) {
    for notice in app.take_notices() {
        eprintln!("{notice}");
    }
}

/// Reads the diagram input. Returns the text and whether it came from a
/// markdown file, in which case mermaid blocks are extracted from it.
fn read_input(path: Option<&Path>) -> Result<(String, bool)> {
    let Some(path) = path.filter(|path| *path != Path::new("-")) else {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok((buf, false));
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let is_markdown = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("md" | "markdown")
    );
    Ok((content, is_markdown))
}

/// Bodies of the fenced mermaid blocks in `input`, in document order.
/// An unterminated block at the end is dropped.
fn extract_mermaid_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut open: Option<(String, Vec<&str>)> = None;
    for line in input.lines() {
        let trimmed = line.trim();
        match open.take() {
            None => open = detect_mermaid_fence(trimmed).map(|fence| (fence, Vec::new())),
            Some((fence, body)) if is_fence_end(trimmed, &fence) => blocks.push(body.join("\n")),
            Some((fence, mut body)) => {
                body.push(line);
                open = Some((fence, body));
            }
        }
    }
    blocks
}

fn detect_mermaid_fence(line: &str) -> Option<String> {
    for fence in ["```", "~~~", ":::"] {
        if let Some(rest) = line.strip_prefix(fence) {
            let marker = fence.chars().next().unwrap_or('`');
            if rest.trim_start_matches(marker).trim().starts_with("mermaid") {
                return Some(fence.to_string());
            }
        }
    }
    None
}

fn is_fence_end(line: &str, fence: &str) -> bool {
    match line.strip_prefix(fence) {
        Some(rest) => rest.trim().is_empty(),
        None => false,
    }
}
