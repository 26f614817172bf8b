//! Data Migration CLI
//!
//! Runs a declarative migration plan over JSON records on disk.
//!
//! Usage:
//!   datafix migrate --plan plan.json saves/ --out migrated/
//!   datafix migrate --plan plan.json level.json --diff
//!   datafix check --plan plan.json
//!   datafix describe --plan plan.json --version 1510 --type entity
//!   datafix config --init datafixers.toml

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use datafixers::schema::analyze_references;
use datafixers::{ChoiceKind, DataVersion, FixerConfig, FixerError, MigrationPlan, Schema};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_json::Value;
use similar::TextDiff;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "datafix")]
#[command(about = "Migrate versioned JSON records with a declarative plan")]
struct Cli {
    /// Configuration file, layered over datafixers.toml and the user config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate record files (or every .json file under a directory)
    Migrate {
        /// Migration plan (JSON or TOML)
        #[arg(short, long)]
        plan: PathBuf,

        /// Record files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Write migrated records under this directory
        #[arg(short, long, conflicts_with = "in_place")]
        out: Option<PathBuf>,

        /// Overwrite the input files
        #[arg(long)]
        in_place: bool,

        /// Print a unified diff of every record
        #[arg(long)]
        diff: bool,
    },

    /// Report reference diagnostics and cycles of every schema version
    Check {
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Show the types or discriminators of one schema version
    Describe {
        #[arg(short, long)]
        plan: PathBuf,

        /// Schema version key
        #[arg(short, long)]
        version: DataVersion,

        /// Print one logical type's template
        #[arg(short = 't', long = "type", conflicts_with = "choices")]
        type_name: Option<String>,

        /// List a discriminator map (entities, block_entities)
        #[arg(long)]
        choices: Option<ChoiceKind>,
    },

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to this file
        #[arg(long)]
        init: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match FixerConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command, config) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(command: Commands, config: FixerConfig) -> anyhow::Result<i32> {
    match command {
        Commands::Migrate {
            plan,
            inputs,
            out,
            in_place,
            diff,
        } => migrate(&plan, &inputs, out.as_deref(), in_place, diff, config),
        Commands::Check { plan } => check(&plan, config),
        Commands::Describe {
            plan,
            version,
            type_name,
            choices,
        } => describe(&plan, version, type_name.as_deref(), choices),
        Commands::Config { init } => {
            let rendered = toml::to_string_pretty(&config)?;
            match init {
                Some(path) => {
                    if path.exists() {
                        bail!("{} already exists", path.display());
                    }
                    config
                        .save(&path)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("✅ Wrote {}", path.display());
                }
                None => {
                    if let Some(user) = FixerConfig::user_config_path() {
                        println!("# user config: {}", user.display());
                    }
                    print!("{}", rendered);
                }
            }
            Ok(0)
        }
    }
}

fn load_plan(path: &Path) -> anyhow::Result<MigrationPlan> {
    MigrationPlan::load(path).with_context(|| format!("failed to load plan {}", path.display()))
}

// =============================================================================
// migrate
// =============================================================================

/// An input file and the path it is written to under `--out`
struct InputFile {
    path: PathBuf,
    relative: PathBuf,
}

fn collect_inputs(inputs: &[PathBuf]) -> anyhow::Result<Vec<InputFile>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry = entry?;
                let path = entry.path();
                if !entry.file_type().is_file()
                    || path.extension().and_then(|e| e.to_str()) != Some("json")
                {
                    continue;
                }
                let relative = path.strip_prefix(input).unwrap_or(path).to_path_buf();
                files.push(InputFile {
                    path: path.to_path_buf(),
                    relative,
                });
            }
        } else if input.is_file() {
            let relative = input
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("invalid input path {}", input.display()))?;
            files.push(InputFile {
                path: input.clone(),
                relative,
            });
        } else {
            bail!("input {} does not exist", input.display());
        }
    }
    Ok(files)
}

fn migrate(
    plan_path: &Path,
    inputs: &[PathBuf],
    out: Option<&Path>,
    in_place: bool,
    diff: bool,
    config: FixerConfig,
) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let format = config.output.format;
    let in_place = (in_place || config.output.in_place) && out.is_none();
    let registry = plan.build_registry(config)?;
    registry.lock();

    let files = collect_inputs(inputs)?;
    let mut migrated = 0usize;
    let mut failed = 0usize;

    for file in &files {
        let record = match read_record(&file.path) {
            Ok(record) => record,
            Err(e) => {
                eprintln!("❌ {}: {:#}", file.path.display(), e);
                failed += 1;
                continue;
            }
        };

        let result = match registry.migrate(&record) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("❌ {}: {}", file.path.display(), e);
                if let FixerError::MigrationAborted { snapshot, .. } = &e {
                    eprintln!(
                        "   snapshot {} captured {}",
                        snapshot.checksum.as_str(),
                        snapshot.captured_at
                    );
                }
                failed += 1;
                continue;
            }
        };

        if diff {
            print_diff(&file.path, &record, &result)?;
        }

        let rendered = format.render(&result)? + "\n";
        if in_place {
            fs::write(&file.path, rendered)
                .with_context(|| format!("failed to write {}", file.path.display()))?;
        } else if let Some(dir) = out {
            let dest = dir.join(&file.relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, rendered)
                .with_context(|| format!("failed to write {}", dest.display()))?;
        } else if !diff {
            print!("{}", rendered);
        }
        migrated += 1;
    }

    eprintln!(
        "{} {} migrated, {} failed",
        if failed == 0 { "✅" } else { "⚠️ " },
        migrated,
        failed
    );
    Ok(if failed == 0 { 0 } else { 1 })
}

fn read_record(path: &Path) -> anyhow::Result<Value> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).context("invalid JSON")
}

fn print_diff(path: &Path, before: &Value, after: &Value) -> anyhow::Result<()> {
    let old = serde_json::to_string_pretty(before)? + "\n";
    let new = serde_json::to_string_pretty(after)? + "\n";
    let name = path.display().to_string();
    let diff = TextDiff::from_lines(&old, &new);
    print!(
        "{}",
        diff.unified_diff()
            .context_radius(3)
            .header(&format!("a/{}", name), &format!("b/{}", name))
    );
    Ok(())
}

// =============================================================================
// check
// =============================================================================

fn check(plan_path: &Path, config: FixerConfig) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let chain = plan.build_chain()?;
    println!("🔍 Checking {} schema versions\n", chain.len());

    let mut errors = 0usize;
    for schema in chain.iter() {
        let analysis = analyze_references(schema)?;
        for cycle in &analysis.cycles {
            println!("  ↻ v{} cycle: {}", analysis.version, cycle.members.join(" -> "));
        }
        for item in &analysis.diagnostics.items {
            println!("  {}", item);
        }
        errors += analysis.diagnostics.errors().count();
    }

    if errors > 0 {
        println!("\n❌ {} error(s)", errors);
        return Ok(1);
    }

    let registry = plan.build_registry(config)?;
    let fixers: usize = registry.entries().iter().map(|e| e.chain().len()).sum();
    println!(
        "\n✅ {} namespace(s), {} fixer(s), no reference errors",
        registry.len(),
        fixers
    );
    Ok(0)
}

// =============================================================================
// describe
// =============================================================================

fn describe(
    plan_path: &Path,
    version: DataVersion,
    type_name: Option<&str>,
    choices: Option<ChoiceKind>,
) -> anyhow::Result<i32> {
    let plan = load_plan(plan_path)?;
    let chain = plan.build_chain()?;
    let schema = chain.by_version(version).ok_or_else(|| {
        let known: Vec<String> = chain.iter().map(|s| s.version_key().to_string()).collect();
        anyhow!("no schema v{} (known: {})", version, known.join(", "))
    })?;

    if let Some(kind) = choices {
        let map = schema.build_discriminator_map(kind);
        println!("{} at v{} ({} entries)", kind, version, map.len());
        for key in map.keys() {
            println!("  {}", key);
        }
        return Ok(0);
    }

    match type_name {
        Some(name) => describe_type(schema, name),
        None => {
            println!("Types visible from v{}:", version);
            for name in schema.type_names() {
                let defined_in = schema
                    .defining_schema(name)
                    .map(|s| s.version_key())
                    .unwrap_or(version);
                let marker = if schema.is_recursive(name) { " (recursive)" } else { "" };
                println!("  {:<28} v{}{}", name, defined_in, marker);
            }
            Ok(0)
        }
    }
}

fn describe_type(schema: Schema<'_>, name: &str) -> anyhow::Result<i32> {
    match schema.resolve_type(name) {
        Ok(template) => {
            let defined_in = schema
                .defining_schema(name)
                .map(|s| s.version_key())
                .unwrap_or_else(|| schema.version_key());
            println!("{} at v{} (defined in v{})", name, schema.version_key(), defined_in);
            println!("  {}", template);
            println!("{}", serde_json::to_string_pretty(&*template)?);
            Ok(0)
        }
        Err(FixerError::UnknownLogicalType { .. }) => {
            let suggestions = suggest(name, schema.type_names());
            if suggestions.is_empty() {
                eprintln!("❌ Unknown type '{}' at v{}", name, schema.version_key());
            } else {
                eprintln!(
                    "❌ Unknown type '{}' at v{}. Did you mean: {}?",
                    name,
                    schema.version_key(),
                    suggestions.join(", ")
                );
            }
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

/// Closest names by fuzzy score, best first
fn suggest<'a>(query: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let matcher = SkimMatcherV2::default();
    let mut results: Vec<(i64, &str)> = candidates
        .into_iter()
        .filter_map(|c| matcher.fuzzy_match(c, query).map(|score| (score, c)))
        .collect();
    results.sort_by(|a, b| b.0.cmp(&a.0));
    results.into_iter().take(3).map(|(_, c)| c).collect()
}
