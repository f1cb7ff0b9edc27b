mod commands;
mod config;
mod files;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use config::TdmConfig;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("core error: {0}")]
    Core(#[from] tdm_core::Error),
    #[error("subset error: {0}")]
    Subset(#[from] tdm_subset::SubsetError),
    #[error("row source error: {0}")]
    Source(#[from] tdm_subset::SourceError),
    #[error("generation error: {0}")]
    Generate(#[from] tdm_generate::GenerationError),
    #[error("masking error: {0}")]
    Mask(#[from] tdm_mask::MaskingError),
    #[error("fusion error: {0}")]
    Fusion(#[from] tdm_fusion::FusionError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("logging error: {0}")]
    Logging(String),
}

#[derive(Parser, Debug)]
#[command(name = "tdm", version, about = "Test data management: subset, generate, mask, fuse")]
struct Cli {
    /// Config file; `tdm.toml` in the working directory is read when present.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log filter, e.g. `debug` or `tdm_subset=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the dependency plan of a schema snapshot.
    Graph(GraphArgs),
    /// Extract a referentially consistent subset from CSV files.
    Subset(SubsetArgs),
    /// Generate synthetic batches for a unified schema.
    Generate(GenerateArgs),
    /// Mask CSV batches with a rule set.
    Mask(MaskArgs),
    /// Fuse schema fragments into a unified schema.
    Fuse(FuseArgs),
}

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Schema snapshot (`schema.json`).
    #[arg(long)]
    pub schema: PathBuf,
    /// Order only what is reachable from this table.
    #[arg(long)]
    pub root: Option<String>,
}

#[derive(Args, Debug)]
pub struct SubsetArgs {
    #[arg(long)]
    pub schema: PathBuf,
    /// Directory holding one `<table>.csv` per table.
    #[arg(long)]
    pub source_dir: PathBuf,
    #[arg(long)]
    pub root: String,
    /// Row cap, `TABLE=N`; `*=N` applies to every other table.
    #[arg(long = "cap", value_name = "TABLE=N", value_parser = parse_assignment::<usize>)]
    pub caps: Vec<(String, usize)>,
    /// Equality filter, `TABLE.COLUMN=VALUE`.
    #[arg(long = "filter", value_name = "TABLE.COLUMN=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, String, String)>,
    /// Cap for tables without one.
    #[arg(long)]
    pub max_rows: Option<usize>,
    #[arg(long)]
    pub include_unrelated: bool,
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Unified schema (`unified.json`).
    #[arg(long)]
    pub unified: PathBuf,
    /// Rows per entity, `ENTITY=N`; `*=N` applies to every other entity.
    #[arg(long = "rows", value_name = "ENTITY=N", value_parser = parse_assignment::<u64>)]
    pub rows: Vec<(String, u64)>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub default_rows: Option<u64>,
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct MaskArgs {
    #[arg(long)]
    pub schema: PathBuf,
    /// Directory of `<table>.csv` batches to mask.
    #[arg(long)]
    pub input: PathBuf,
    /// Rule set (`rules.json`); suggested from semantic types when omitted.
    #[arg(long)]
    pub rules: Option<PathBuf>,
    #[arg(long)]
    pub salt: Option<String>,
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Args, Debug)]
pub struct FuseArgs {
    /// Fragment document; repeat for several sources.
    #[arg(long = "fragment", value_name = "PATH")]
    pub fragments: Vec<PathBuf>,
    /// Add a domain pack as a low-confidence source.
    #[arg(long)]
    pub domain_pack: Option<String>,
    /// Extra domain packs (`*.json`) on top of the built-ins.
    #[arg(long)]
    pub pack_dir: Option<PathBuf>,
    #[arg(long)]
    pub out: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = TdmConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_json {
        config.logging.json = true;
    }
    logging::init_logging(&config.logging)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let _span = tracing::info_span!("run", run_id = %run_id).entered();
    tracing::info!(event = "run_started", command = command_name(&cli.command));

    match cli.command {
        Command::Graph(args) => commands::graph(args),
        Command::Subset(args) => commands::subset(args, &config),
        Command::Generate(args) => commands::generate(args, &config),
        Command::Mask(args) => commands::mask(args, &config),
        Command::Fuse(args) => commands::fuse(args, &config),
    }?;

    tracing::info!(event = "run_finished");
    Ok(())
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Graph(_) => "graph",
        Command::Subset(_) => "subset",
        Command::Generate(_) => "generate",
        Command::Mask(_) => "mask",
        Command::Fuse(_) => "fuse",
    }
}

fn parse_assignment<T>(raw: &str) -> Result<(String, T), String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{raw}'"));
    }
    let value = value
        .trim()
        .parse::<T>()
        .map_err(|err| format!("invalid value in '{raw}': {err}"))?;
    Ok((name.to_string(), value))
}

fn parse_filter(raw: &str) -> Result<(String, String, String), String> {
    let (target, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TABLE.COLUMN=VALUE, got '{raw}'"))?;
    let (table, column) = target
        .trim()
        .rsplit_once('.')
        .ok_or_else(|| format!("expected TABLE.COLUMN before '=', got '{target}'"))?;
    if table.is_empty() || column.is_empty() {
        return Err(format!("expected TABLE.COLUMN before '=', got '{target}'"));
    }
    Ok((table.to_string(), column.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_parse_names_and_counts() {
        assert_eq!(
            parse_assignment::<usize>("orders=5"),
            Ok(("orders".to_string(), 5))
        );
        assert_eq!(parse_assignment::<u64>("*=10"), Ok(("*".to_string(), 10)));
        assert!(parse_assignment::<usize>("orders").is_err());
        assert!(parse_assignment::<usize>("orders=many").is_err());
        assert!(parse_assignment::<usize>("=3").is_err());
    }

    #[test]
    fn filters_split_on_the_last_dot() {
        assert_eq!(
            parse_filter("public.orders.status=open"),
            Ok((
                "public.orders".to_string(),
                "status".to_string(),
                "open".to_string()
            ))
        );
        assert!(parse_filter("status=open").is_err());
    }

    #[test]
    fn subcommands_parse() {
        let cli = Cli::try_parse_from([
            "tdm",
            "subset",
            "--schema",
            "schema.json",
            "--source-dir",
            "csv",
            "--root",
            "customers",
            "--cap",
            "orders=5",
            "--filter",
            "customers.id=1",
            "--out",
            "out",
        ])
        .expect("parse");
        let Command::Subset(args) = cli.command else {
            panic!("expected subset");
        };
        assert_eq!(args.caps, vec![("orders".to_string(), 5)]);
        assert_eq!(args.filters.len(), 1);
    }
}
