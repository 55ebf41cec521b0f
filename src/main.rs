use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use artifact_fs::{connect, list, FileInfo, Filesystem, ListOptions, StorageLocation};
use artifacts::{
    tracing::setup_tracing,
    AppConfig,
    ArtifactContent,
    IngestRequest,
    Ingestor,
    JsonLinesArtifactStore,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info_span, warn, Instrument};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List files matching a path or glob pattern.
    Ls {
        /// Connection name from the config file, or a location URL.
        location: String,

        #[arg(default_value = "")]
        pattern: String,

        /// Stop after this many entries.
        #[arg(long)]
        max_items: Option<usize>,

        /// Print one JSON object per entry.
        #[arg(long)]
        json: bool,
    },

    /// Show metadata for a single path.
    Stat { location: String, path: String },

    /// Write a file to stdout.
    Cat { location: String, path: String },

    /// Ingest a local file (or stdin, with `-`) as an artifact.
    Put {
        location: String,

        /// Destination path.
        path: String,

        /// Source file, `-` for stdin.
        source: String,

        #[arg(long)]
        content_type: Option<String>,
    },
}

impl Command {
    fn location(&self) -> &str {
        match self {
            Command::Ls { location, .. }
            | Command::Stat { location, .. }
            | Command::Cat { location, .. }
            | Command::Put { location, .. } => location,
        }
    }
}

fn resolve_location(config: &AppConfig, location: &str) -> Result<(Option<String>, StorageLocation)> {
    if let Some(found) = config.connection(location) {
        return Ok((Some(location.to_string()), found.clone()));
    }
    let parsed = StorageLocation::from_url(location)
        .with_context(|| format!("'{}' is neither a configured connection nor a URL", location))?;
    Ok((None, parsed))
}

fn print_entry(entry: &FileInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(entry)?);
    } else {
        let suffix = if entry.is_dir { "/" } else { "" };
        println!(
            "{:>12}  {}  {}{}",
            entry.size,
            entry.mod_time.format("%Y-%m-%d %H:%M:%S"),
            entry.full_path,
            suffix
        );
    }
    Ok(())
}

async fn run(config: AppConfig, command: Command, cancel: CancellationToken) -> Result<()> {
    let (connection, location) = resolve_location(&config, command.location())?;
    let fs = connect(&location).await?;

    let result = match command {
        Command::Ls {
            pattern,
            max_items,
            json,
            ..
        } => {
            let options = ListOptions {
                max_items: max_items.or(fs.max_list_items()),
                cancel: Some(cancel),
            };
            let listing = list(fs.as_ref(), &pattern, &options).await?;
            for entry in &listing.entries {
                print_entry(entry, json)?;
            }
            if listing.truncated {
                warn!(
                    entries = listing.entries.len(),
                    "listing truncated at the list items cap"
                );
            }
            Ok(())
        }
        Command::Stat { path, .. } => {
            let info = fs.stat(&path).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Cat { path, .. } => {
            tokio::select! {
                _ = cancel.cancelled() => Err(anyhow!("cancelled")),
                result = copy_to_stdout(fs.as_ref(), &path) => result,
            }
        }
        Command::Put {
            path,
            source,
            content_type,
            ..
        } => {
            let content = if source == "-" {
                ArtifactContent::from_reader(tokio::io::stdin())
            } else {
                let file = tokio::fs::File::open(&source)
                    .await
                    .with_context(|| format!("opening {}", source))?;
                ArtifactContent::from(file)
            };
            let mut request = IngestRequest::new(path, content);
            if let Some(content_type) = content_type {
                request = request.with_content_type(content_type);
            }
            if let Some(connection) = connection {
                request = request.with_connection(connection);
            }

            let store = JsonLinesArtifactStore::new(&config.ingest.metadata_path);
            let ingestor = Ingestor::new(Arc::new(store))
                .with_metrics(&opentelemetry::global::meter("artifacts"));
            let artifact = ingestor.ingest(fs.as_ref(), request, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&artifact)?);
            Ok(())
        }
    };

    fs.close().await?;
    result
}

async fn copy_to_stdout(fs: &dyn Filesystem, path: &str) -> Result<()> {
    let mut stream = fs.read(path).await?;
    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = stream.next().await {
        stdout.write_all(&chunk?).await?;
    }
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => AppConfig::from_path(&path),
        None => AppConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            setup_tracing(false);
            error!("Error loading config: {:?}", err);
            std::process::exit(2);
        }
    };
    setup_tracing(config.structured_logging);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let root_span = info_span!("artifacts", location = cli.command.location());
    if let Err(err) = run(config, cli.command, cancel)
        .instrument(root_span)
        .await
    {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
