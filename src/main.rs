//! # ragchat CLI
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and apply the schema |
//! | `ragchat ingest <paths..>` | Extract, chunk, embed, and store local files |
//! | `ragchat ask "<question>"` | Answer one question from the stored documents |
//! | `ragchat documents` | List stored documents |
//! | `ragchat delete <id>` | Delete a document and its chunks |
//! | `ragchat serve` | Start the HTTP API |
//!
//! Failures print `error[<kind>]: <message>` to stderr and exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use ragchat::assistant::{Assistant, ChatInput};
use ragchat::config::{self, Config, StoreBackend};
use ragchat::{migrate, server};
use ragchat_core::error::RagError;

/// Retrieval-augmented chat over your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragchat.example.toml` for every setting.
#[derive(Parser)]
#[command(name = "ragchat", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest one or more files (.txt .md .csv .json .pdf .docx).
    ///
    /// Each file is reported separately; a failing file does not roll back
    /// the others. Re-ingesting a path replaces its previous version.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a single question.
    Ask {
        question: String,
        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
        /// Restrict retrieval to one source path.
        #[arg(long)]
        source: Option<String>,
    },

    /// List stored documents, newest first.
    Documents,

    /// Delete a document by id.
    Delete { id: String },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", render_error(&err));
            ExitCode::FAILURE
        }
    }
}

/// `error[<kind>]: message` for pipeline errors, `error: ...` otherwise.
fn render_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<RagError>() {
        Some(rag) => format!("error[{}]: {:#}", rag.kind(), err),
        None => format!("error: {:#}", err),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            if cfg.db.backend == StoreBackend::Memory {
                println!("In-memory backend configured; nothing to initialize.");
            } else {
                migrate::run_migrations(&cfg.db).await?;
                println!("Database initialized at {}.", cfg.db.path.display());
            }
        }
        Commands::Ingest { paths } => run_ingest(cfg, &paths).await?,
        Commands::Ask {
            question,
            top_k,
            source,
        } => {
            let assistant = Assistant::from_config(cfg).await?;
            let filter = source.map(|s| ragchat_core::store::MetadataFilter {
                source_uri: Some(s),
                ..Default::default()
            });
            let output = assistant
                .chat(ChatInput {
                    message: question,
                    top_k,
                    filter,
                    ..Default::default()
                })
                .await?;

            println!("{}", output.reply);
            if output.retrieval_degraded {
                println!("\n(answered without document context: retrieval timed out)");
            }
            if !output.sources.is_empty() {
                println!("\nSources:");
                for s in &output.sources {
                    println!("  - {}", s);
                }
            }
            if let Some(intent) = &output.intent {
                println!("\nSuggested action: {:?}", intent);
            }
        }
        Commands::Documents => {
            let assistant = Assistant::from_config(cfg).await?;
            let docs = assistant.list_documents().await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for d in docs {
                println!(
                    "{}  {}  {:>4} chunks  {}",
                    d.id,
                    d.upload_timestamp.format("%Y-%m-%d %H:%M"),
                    d.chunk_count,
                    d.source_uri
                );
            }
        }
        Commands::Delete { id } => {
            let assistant = Assistant::from_config(cfg).await?;
            let removed = assistant.delete_document(&id).await?;
            println!("Deleted {} ({} chunks).", id, removed);
        }
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_ingest(cfg: Config, paths: &[PathBuf]) -> anyhow::Result<()> {
    let assistant = Assistant::from_config(cfg).await?;

    let mut failed = 0usize;
    for path in paths {
        match assistant.ingest_file(path).await {
            Ok(report) => {
                print!(
                    "ok    {} → {} ({} chunks)",
                    path.display(),
                    report.document_id,
                    report.chunk_count
                );
                if !report.superseded.is_empty() {
                    print!(", replaced {}", report.superseded.join(", "));
                }
                println!();
            }
            Err(e) => {
                failed += 1;
                println!("fail  {}: error[{}]: {}", path.display(), e.kind(), e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed to ingest", failed, paths.len());
    }
    Ok(())
}
