//! hedstore: command-line tool for HED tag stores.
//!
//! Creates and drops stores, dumps a store as XML, merges XML hierarchies into
//! a store or into each other, validates documents against the XSD schema and
//! applies usage-count updates from tagging batches.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hedstore_db::{
    merge_xml, validate_with_default_schema, validate_with_schema, BatchFormat, Credentials,
    StoreManager,
};

#[derive(Parser)]
#[command(name = "hedstore")]
#[command(author, version, about = "HED tag hierarchy store")]
#[command(propagate_version = true)]
struct Cli {
    /// Credentials file naming the store
    #[arg(long, global = true, env = "HEDSTORE_CREDENTIALS")]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a credentials file
    Credentials {
        /// File to write
        file: PathBuf,

        #[arg(long)]
        dbname: String,

        #[arg(long, default_value = "localhost")]
        hostname: String,

        #[arg(long, default_value_t = 5432)]
        port: u16,

        #[arg(long)]
        username: String,

        #[arg(long, default_value = "")]
        password: String,
    },

    /// Create the store and run the schema script in it
    Create {
        /// Schema script with statements separated by `-- execute` lines
        #[arg(long)]
        script: PathBuf,
    },

    /// Drop the store (refused while other sessions are connected)
    Delete,

    /// Write the whole store as an XML document
    Dump {
        /// Include usage counts
        #[arg(long)]
        counts: bool,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge an XML hierarchy into the store
    Merge {
        /// XML hierarchy to merge
        xml: PathBuf,

        /// Include usage counts in the merged document
        #[arg(long)]
        counts: bool,

        /// Validate the document before merging
        #[arg(long)]
        validate: bool,

        /// XSD schema for --validate (default: the published HED schema)
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output file for the merged document (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a newer XML hierarchy into an older one without a store
    MergeXml {
        /// Document whose content wins
        old: PathBuf,

        /// Document that fills the gaps
        new: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate an XML hierarchy against the XSD schema
    Validate {
        /// XML hierarchy to validate
        xml: PathBuf,

        /// XSD schema (default: the published HED schema)
        #[arg(long)]
        schema: Option<PathBuf>,
    },

    /// Increment counts for tag usages the new batch adds over the old one
    UpdateCounts {
        /// Previous tagging batch
        old: PathBuf,

        /// Current tagging batch
        new: PathBuf,

        /// Batch format: json or delimited (default: detected from the new batch)
        #[arg(long)]
        format: Option<BatchFormat>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _file_guard = init_tracing();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

// Environment variables:
//   LOG_FORMAT  - "json" or "text" (default: "text")
//   LOG_FILE    - path to log file (optional, enables file logging)
//   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
//   RUST_LOG    - standard env filter (default: "warn")
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warn".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("hedstore.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Documents go to stdout, so console logging uses stderr
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let credentials_path = cli.credentials;

    match cli.command {
        Commands::Credentials {
            file,
            dbname,
            hostname,
            port,
            username,
            password,
        } => {
            Credentials::new(dbname, hostname, port, username, password).write_to_file(&file)?;
            println!("Wrote {}", file.display());
        }
        Commands::Create { script } => {
            let credentials = load_credentials(credentials_path.as_deref())?;
            StoreManager::create_store(&credentials, &script).await?;
            println!("Created store {}", credentials.dbname);
        }
        Commands::Delete => {
            let credentials = load_credentials(credentials_path.as_deref())?;
            StoreManager::delete_store(&credentials).await?;
            println!("Dropped store {}", credentials.dbname);
        }
        Commands::Dump { counts, output } => {
            let manager = connect(credentials_path.as_deref()).await?;
            let result = manager.dump_xml(counts).await;
            manager.close().await;
            write_output(output.as_deref(), &result?)?;
        }
        Commands::Merge {
            xml,
            counts,
            validate,
            schema,
            output,
        } => {
            let document = read_file(&xml)?;
            if validate {
                validate_document(&document, schema.as_deref()).await?;
            }
            let manager = connect(credentials_path.as_deref()).await?;
            let result = manager.merge_xml(&document, counts).await;
            manager.close().await;
            write_output(output.as_deref(), &result?)?;
        }
        Commands::MergeXml { old, new, output } => {
            let merged = merge_xml(&read_file(&old)?, &read_file(&new)?)?;
            write_output(output.as_deref(), &merged)?;
        }
        Commands::Validate { xml, schema } => {
            validate_document(&read_file(&xml)?, schema.as_deref()).await?;
            println!("{}: valid", xml.display());
        }
        Commands::UpdateCounts { old, new, format } => {
            let old_batch = read_file(&old)?;
            let new_batch = read_file(&new)?;
            let format = format.unwrap_or_else(|| BatchFormat::detect(&new_batch));

            let manager = connect(credentials_path.as_deref()).await?;
            let result = manager
                .update_tag_counts(&old_batch, &new_batch, format)
                .await;
            manager.close().await;
            let update = result?;

            println!(
                "events: {}, new usages: {}, increments: {}, rows updated: {}",
                update.events, update.paths, update.increments, update.rows_updated
            );
        }
    }

    Ok(())
}

fn load_credentials(path: Option<&Path>) -> anyhow::Result<Credentials> {
    let path = path.ok_or_else(|| {
        anyhow!("No credentials file: pass --credentials or set HEDSTORE_CREDENTIALS")
    })?;
    Ok(Credentials::from_file(path)?)
}

async fn connect(path: Option<&Path>) -> anyhow::Result<StoreManager> {
    let credentials = load_credentials(path)?;
    Ok(StoreManager::connect(&credentials).await?)
}

async fn validate_document(document: &str, schema: Option<&Path>) -> anyhow::Result<()> {
    match schema {
        Some(path) => validate_with_schema(document, &read_file(path)?)?,
        None => validate_with_default_schema(document).await?,
    }
    info!(subsystem = "schema", op = "validate", "Document is valid");
    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))
}

fn write_output(path: Option<&Path>, contents: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => std::fs::write(path, contents)
            .with_context(|| format!("Cannot write {}", path.display())),
        None => {
            println!("{}", contents);
            Ok(())
        }
    }
}
