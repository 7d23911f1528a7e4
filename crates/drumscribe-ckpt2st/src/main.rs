//! Legacy checkpoint to SafeTensors converter
//!
//! Reads a TensorFlow v1 drum transcription checkpoint, migrates every
//! parameter it can into the target architecture and writes the result as a
//! safetensors file. Slots that cannot be migrated keep their default
//! initialization; the run reports them instead of failing.
//!
//! # Usage
//!
//! ```bash
//! # Convert into the built-in e-gmd-drums architecture
//! ckpt2st --checkpoint train/model.ckpt-569400 --output drums.safetensors
//!
//! # A checkpoint directory works too (uses its `checkpoint` state file)
//! ckpt2st --checkpoint train/ --output drums.safetensors
//!
//! # Custom architecture and matching rules
//! ckpt2st --checkpoint train/ --output out.safetensors \
//!         --schema arch.toml --config migrate.toml
//!
//! # Show which variables each slot would take, without converting
//! ckpt2st --checkpoint train/ --list
//! ```
//!
//! # Outputs
//!
//! - `<output>`: one tensor per slot, keyed `<layer>/<kernel|bias>`
//! - `<output>.meta.json`: full migration report and smoke-pass outcome
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result, ensure};
use clap::Parser;
use drumscribe_checkpoint::{CheckpointReader, resolve_prefix};
use drumscribe_common::{ConfigLoader, MigrationConfig, parse_shape};
use drumscribe_migrate::{
    Migrator, NameMatcher, SlotCandidates, TargetSchema, describe_candidates, run_smoke_check,
    write_model, write_sidecar,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Legacy checkpoint to SafeTensors converter
#[derive(Parser, Debug)]
#[command(name = "ckpt2st")]
#[command(about = "Migrate legacy drum transcription checkpoints into safetensors")]
#[command(version)]
struct Args {
    /// Checkpoint prefix, `.index` file or checkpoint directory
    #[arg(short = 'i', long)]
    checkpoint: PathBuf,

    /// Output safetensors path
    #[arg(short, long, required_unless_present = "list")]
    output: Option<PathBuf>,

    /// Target architecture file (TOML or JSON)
    ///
    /// Defaults to the built-in e-gmd-drums architecture
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Migration config file (TOML or JSON)
    #[arg(short, long, env = "DRUMSCRIBE_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for the default initialization of unmigrated slots
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the diagnostic forward pass
    #[arg(long)]
    no_smoke: bool,

    /// Smoke-pass input shape (NHWC), e.g. 1x100x229x1
    #[arg(long)]
    smoke_input: Option<String>,

    /// List candidate variables per slot and exit
    #[arg(long)]
    list: bool,

    /// Print the listing as JSON (with --list)
    #[arg(long, requires = "list")]
    json: bool,

    /// Fail unless every slot is assigned
    ///
    /// The output is still written so it can be inspected
    #[arg(long)]
    strict: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let schema = load_schema(args.schema.as_deref())?;

    if args.list {
        let listing = list_candidates(&args.checkpoint, &schema, &config)?;
        if args.json {
            let json = serde_json::to_string_pretty(&listing).context("Failed to encode listing")?;
            println!("{json}");
        } else {
            for line in listing_lines(&listing) {
                println!("{line}");
            }
        }
        return Ok(());
    }

    let output = args.output.as_deref().context("--output is required")?;
    let summary = convert(&args.checkpoint, output, schema, &config)?;

    if args.strict {
        ensure!(summary.complete, "strict mode: {}", summary.line);
    }
    Ok(())
}

/// Configuration file and environment, then command-line flags
fn load_config(args: &Args) -> Result<MigrationConfig> {
    let mut config =
        ConfigLoader::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(seed) = args.seed {
        config.init.seed = seed;
    }
    if args.no_smoke {
        config.smoke.enabled = false;
    }
    if let Some(shape) = &args.smoke_input {
        config.smoke.input_shape = Some(parse_shape(shape).context("Invalid --smoke-input")?);
    }

    config.validate()?;
    Ok(config)
}

fn load_schema(path: Option<&Path>) -> Result<TargetSchema> {
    match path {
        Some(path) => TargetSchema::from_file(path)
            .with_context(|| format!("Failed to load schema: {}", path.display())),
        None => TargetSchema::drum_default().context("Built-in schema is invalid"),
    }
}

/// Candidate lists from the checkpoint index alone; payloads are not read
fn list_candidates(
    checkpoint: &Path,
    schema: &TargetSchema,
    config: &MigrationConfig,
) -> Result<Vec<SlotCandidates>> {
    let prefix = resolve_prefix(checkpoint)?;
    let variables = CheckpointReader::new(&prefix)
        .list_variables()
        .with_context(|| format!("Failed to read checkpoint index: {}", prefix.display()))?;
    let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();

    let matcher = NameMatcher::for_schema(&config.matching, schema);
    Ok(describe_candidates(&matcher, schema, &names))
}

fn listing_lines(listing: &[SlotCandidates]) -> Vec<String> {
    let mut lines = Vec::new();
    for slot in listing {
        lines.push(format!("{} {:?}", slot.slot, slot.expected_shape));
        if slot.candidates.is_empty() {
            lines.push("  (no candidates)".to_string());
        }
        for c in &slot.candidates {
            lines.push(format!("  {} [{}, {:?}]", c.variable, c.tier, c.transform));
        }
    }
    lines
}

struct ConversionSummary {
    line: String,
    complete: bool,
    smoke_passed: Option<bool>,
}

/// Migrate, write the model, run the smoke pass and write the sidecar
fn convert(
    checkpoint: &Path,
    output: &Path,
    schema: TargetSchema,
    config: &MigrationConfig,
) -> Result<ConversionSummary> {
    tracing::info!("Checkpoint: {}", checkpoint.display());
    tracing::info!("Output: {}", output.display());
    tracing::info!("Schema: {}", schema.label());

    let migrator = Migrator::new(Arc::new(schema), config);
    let migration = migrator
        .submit(checkpoint)
        .with_context(|| format!("Failed to read checkpoint: {}", checkpoint.display()))?;
    migration.report.log();

    write_model(&migration.model, output)
        .with_context(|| format!("Failed to write model: {}", output.display()))?;

    let smoke = config.smoke.enabled.then(|| {
        run_smoke_check(&migration.model, config.smoke.input_shape.as_deref(), config.init.seed)
    });

    if config.output.write_sidecar {
        let meta_path = write_sidecar(output, &migration.report, smoke.as_ref())
            .context("Failed to write sidecar metadata")?;
        tracing::info!("  Metadata: {}", meta_path.display());
    }

    let report = &migration.report;
    tracing::info!("Conversion complete: {}", report.summary());
    Ok(ConversionSummary {
        line: report.summary(),
        complete: report.is_complete(),
        smoke_passed: smoke.map(|s| s.passed()),
    })
}
