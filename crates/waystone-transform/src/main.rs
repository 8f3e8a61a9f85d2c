use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use waystone_transform::{Mode, TransformConfig, transform};

/// Rewrite "use step" / "use workflow" functions for one build target.
#[derive(Parser, Debug)]
#[command(name = "waystone-transform", version, about)]
struct Args {
    /// JavaScript module to transform
    input: PathBuf,

    /// Build target: step, workflow or client
    #[arg(long, default_value_t = Mode::Step)]
    mode: Mode,

    /// Module path embedded in identifiers (defaults to the input path)
    #[arg(long)]
    source_path: Option<String>,

    /// Module the registration helpers are imported from
    #[arg(long, env = "WAYSTONE_RUNTIME_MODULE", default_value = "waystone/runtime")]
    runtime_module: String,

    /// Write the transformed code here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,

    /// Also write the manifest as JSON
    #[arg(long)]
    manifest: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let Args {
        input,
        mode,
        source_path,
        runtime_module,
        out,
        manifest,
    } = Args::parse();

    let source = fs::read_to_string(&input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let config = TransformConfig {
        mode,
        source_path: source_path.unwrap_or_else(|| input.display().to_string()),
        runtime_module,
    };
    let output = transform(&source, &config)?;

    match out {
        Some(path) => fs::write(&path, &output.code)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => io::stdout().write_all(output.code.as_bytes())?,
    }
    if let Some(path) = manifest {
        let json = serde_json::to_string_pretty(&output.manifest)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    }
    tracing::info!(
        input = %input.display(),
        workflows = output.manifest.workflows.len(),
        steps = output.manifest.steps.len(),
        "transform complete"
    );
    Ok(())
}
