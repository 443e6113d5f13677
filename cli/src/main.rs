use std::path::{Component, Path, PathBuf};
use std::sync::Once;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fabula_core::img::{self, IMAGE_MAGIC};
use fabula_core::{Val, Vm};


static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "fabula_core=info,fabula_stdlib=info,fabula_cli=info";

#[derive(Debug, Parser)]
#[command(
    name = "fabula",
    author,
    version,
    about = "Host for fabula story images",
    long_about = None
)]
struct CliArgs {
    /// Subcommands like `inspect FILE`
    #[command(subcommand)]
    command: Option<Commands>,

    /// If no subcommand, treat as an image file to execute
    #[arg(value_name = "IMAGE", value_parser = parse_sanitized_path)]
    file: Option<PathBuf>,

    /// Log engine activity to stderr (also: FABULA_TRACE env var)
    #[arg(long, global = true)]
    trace: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load an image and execute it from its entry point.
    Run {
        /// Image file to run
        #[arg(value_name = "IMAGE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
    /// Describe an image's blocks and pools without executing it.
    Inspect {
        /// Image file to describe
        #[arg(value_name = "IMAGE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Emit the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn maybe_init_tracing(force: bool) {
    let raw = std::env::var("FABULA_TRACE").unwrap_or_default();

    if !force && !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read file '{}'", path.display()))?;
    if bytes.len() < IMAGE_MAGIC.len() || bytes[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
        anyhow::bail!("'{}' is not a fabula image (bad magic)", path.display());
    }
    Ok(bytes)
}

fn run_image(path: &Path) -> anyhow::Result<()> {
    let bytes = read_image(path)?;

    let mut vm = Vm::new();
    fabula_stdlib::register(&mut vm);
    vm.load(&bytes)
        .with_context(|| format!("Failed to load image '{}'", path.display()))?;

    match vm.run() {
        Ok(result) => {
            if let Some(text) = display_result(&mut vm, result) {
                println!("{}", text);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Text form of the entry function's result, or nothing for nil.
fn display_result(vm: &mut Vm, result: Val) -> Option<String> {
    match result {
        Val::Nil => None,
        Val::True => Some("true".to_string()),
        other => vm.val_to_text(other).ok(),
    }
}

fn inspect_image(path: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = read_image(path)?;
    let summary = img::summarize(&bytes).with_context(|| format!("Failed to parse image '{}'", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("version:        {}", summary.version);
    println!("code pages:     {}", summary.code_pages);
    println!("data pages:     {}", summary.data_pages);
    println!("static objects: {}", summary.static_objects);
    println!("symbols:        {}", summary.symbols);
    println!("blocks:");
    for block in &summary.blocks {
        println!(
            "  {:<4} {:>8} bytes{}",
            block.tag,
            block.len,
            if block.mandatory { "  mandatory" } else { "" }
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let CliArgs { command, file, trace } = CliArgs::parse();
    maybe_init_tracing(trace);

    match command {
        Some(Commands::Run { file }) => run_image(&file),
        Some(Commands::Inspect { file, json }) => inspect_image(&file, json),
        None => match file {
            Some(file) => run_image(&file),
            None => anyhow::bail!("an image file is required; see `fabula --help`"),
        },
    }
}
