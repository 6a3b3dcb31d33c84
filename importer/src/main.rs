//! Platform Import CLI - load legacy CSV exports into PostgreSQL
//!
//! # Main Commands
//!
//! ```bash
//! platform-import import users                  # Import new_users.csv
//! platform-import import purchases data.csv     # Import a specific file
//! platform-import import-all --dir exports/     # Every entity, upstream first
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! platform-import plan                 # Show the dependency order
//! platform-import entities             # List built-in entities
//! platform-import mapping purchases    # Print a mapping table as JSON
//! ```

use clap::{Args, Parser, Subcommand};
use platform_import::logs::log_warning;
use platform_import::{
    builtin, find_builtin, import_all, BulkStore, DependencyGraph, DryRunStore, EntityMapping,
    ImportOptions, ImportSummary, Importer, MemoryStore, PgStore,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "platform-import")]
#[command(about = "Import legacy platform CSV exports into PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one entity from a CSV file
    Import {
        /// Entity name (see `entities`)
        entity: String,

        /// Input CSV file (default: new_<entity>.csv)
        file: Option<PathBuf>,

        /// Mapping JSON file to use instead of the built-in one
        #[arg(short, long)]
        mapping: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Import every entity whose new_<entity>.csv exists, in dependency order
    ImportAll {
        /// Directory holding the CSV files
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show the import order derived from entity references
    Plan,

    /// List built-in entities
    Entities,

    /// Print an entity's mapping table as JSON
    Mapping {
        /// Entity name
        entity: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum pool connections
    #[arg(long, default_value = "4")]
    max_connections: u32,

    /// Records per bulk insert
    #[arg(short, long, default_value = "1000")]
    chunk: usize,

    /// CSV delimiter
    #[arg(short, long, default_value = ",")]
    delimiter: char,

    /// Transform and validate without writing
    #[arg(long)]
    dry_run: bool,

    /// Refuse to import when an upstream table is empty
    #[arg(long)]
    strict_references: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn options(&self) -> ImportOptions {
        ImportOptions {
            chunk_size: self.chunk,
            delimiter: self.delimiter,
            dry_run: self.dry_run,
            strict_references: self.strict_references,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import { entity, file, mapping, run } => {
            cmd_import(&entity, file.as_deref(), mapping.as_deref(), &run).await
        }

        Commands::ImportAll { dir, run } => cmd_import_all(&dir, &run).await,

        Commands::Plan => cmd_plan(),

        Commands::Entities => cmd_entities(),

        Commands::Mapping { entity } => cmd_mapping(&entity),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn open_store(run: &RunArgs) -> Result<Box<dyn BulkStore>, Box<dyn std::error::Error>> {
    let store: Box<dyn BulkStore> = match (&run.database_url, run.dry_run) {
        (Some(url), false) => Box::new(PgStore::connect(url, run.max_connections).await?),
        (Some(url), true) => Box::new(DryRunStore::new(PgStore::connect(url, run.max_connections).await?)),
        (None, true) => {
            log_warning("No DATABASE_URL: references resolve against empty tables");
            Box::new(DryRunStore::new(MemoryStore::new()))
        }
        (None, false) => {
            return Err("DATABASE_URL is not set (use --database-url or a .env file)".into());
        }
    };
    eprintln!("🔌 Store: {}", store.name());
    Ok(store)
}

async fn cmd_import(
    entity: &str,
    file: Option<&Path>,
    mapping_path: Option<&Path>,
    run: &RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mapping = match mapping_path {
        Some(path) => {
            eprintln!("🧩 Using mapping: {}", path.display());
            EntityMapping::from_json(&fs::read_to_string(path)?)?
        }
        None => find_builtin(entity)?,
    };
    let file = file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(mapping.default_file()));

    let store = open_store(run).await?;
    let summary = Importer::new(store.as_ref(), mapping)
        .with_options(run.options())
        .import_file(&file)
        .await?;

    report(std::slice::from_ref(&summary), run.json)
}

async fn cmd_import_all(dir: &Path, run: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📂 Importing from: {}", dir.display());
    let store = open_store(run).await?;
    let summaries = import_all(store.as_ref(), dir, &builtin(), &run.options()).await?;
    if summaries.is_empty() {
        eprintln!("   No new_<entity>.csv files found.");
        return Ok(());
    }
    report(&summaries, run.json)
}

fn report(summaries: &[ImportSummary], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let out = match summaries {
            [single] => serde_json::to_string_pretty(single)?,
            many => serde_json::to_string_pretty(many)?,
        };
        println!("{}", out);
    } else {
        for summary in summaries {
            summary.print();
        }
    }
    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_plan() -> Result<(), Box<dyn std::error::Error>> {
    let mappings = builtin();
    let graph = DependencyGraph::build(&mappings);
    let order = graph.order()?;

    println!("🗺️  Import order:\n");
    for (i, name) in order.iter().enumerate() {
        let deps = graph.dependencies(name);
        if deps.is_empty() {
            println!("  {:>2}. {}", i + 1, name);
        } else {
            println!("  {:>2}. {} (after {})", i + 1, name, deps.join(", "));
        }
    }
    Ok(())
}

fn cmd_entities() -> Result<(), Box<dyn std::error::Error>> {
    let mappings = builtin();
    println!("📋 Built-in entities ({}):\n", mappings.len());
    for m in &mappings {
        println!("  📄 {} -> {}", m.name, m.table);
        if !m.description.is_empty() {
            println!("     {}", m.description);
        }
        println!("     File: {}  Columns: {}", m.default_file(), m.fields.len());
    }
    Ok(())
}

fn cmd_mapping(entity: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mapping = find_builtin(entity)?;
    println!("{}", mapping.to_json()?);
    Ok(())
}
