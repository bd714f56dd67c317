use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use pgvs::{
    Document, IndexOptions, MetadataFilter, PartialIndexOptions, PgVectorStore, PgvsConfig,
    ScoredDocument, VectorStoreError,
    observability::{self, metrics},
    vector_store::FilterError,
};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// CLI arguments for pgvs
#[derive(Parser, Debug)]
#[command(version, about = "Document store on PostgreSQL + pgvector", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "pgvs.toml")]
    config: PathBuf,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Create the vector extension, table and metadata index if missing
    Init,
    /// Build the HNSW index for the configured metric
    CreateIndex {
        /// Drop an existing index of the same name first
        #[arg(long)]
        recreate: bool,
    },
    /// Build an HNSW index over rows matching a filter
    CreatePartialIndex {
        /// Name distinguishing this index from other partial indexes
        #[arg(long)]
        name: String,
        /// JSON object of metadata pairs, or a raw SQL predicate
        #[arg(long)]
        filter: String,
        /// Drop an existing index of the same name first
        #[arg(long)]
        recreate: bool,
    },
    /// Drop the full index, or the named partial index
    DropIndex {
        #[arg(long)]
        name: Option<String>,
    },
    /// Show whether an index is absent, building or present
    IndexStatus {
        #[arg(long)]
        name: Option<String>,
    },
    /// Embed a query and print the nearest documents
    Search {
        #[arg(short, long)]
        query: String,
        #[arg(short, default_value = "4")]
        k: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print documents by id
    Get {
        #[arg(long = "id", required = true, num_args = 1..)]
        ids: Vec<Uuid>,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Delete documents by id
    Delete {
        #[arg(long = "id", required = true, num_args = 1..)]
        ids: Vec<Uuid>,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Delete every document matching a filter
    DeleteWhere {
        #[arg(long)]
        filter: String,
    },
    /// Embed and insert documents from a JSON lines file
    ///
    /// Each line is `{"content": "...", "metadata": {...}}`, optionally with an `id`.
    Ingest {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Store(#[from] VectorStoreError),

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid document on line {line}: {source}")]
    Document {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Search hit as printed by the CLI (without the embedding).
#[derive(Serialize)]
struct Hit<'a> {
    id: Uuid,
    distance: f64,
    similarity: f64,
    content: &'a str,
    metadata: &'a Map<String, Value>,
}

impl<'a> From<&'a ScoredDocument> for Hit<'a> {
    fn from(scored: &'a ScoredDocument) -> Self {
        Self {
            id: scored.document.id,
            distance: scored.distance,
            similarity: scored.similarity(),
            content: &scored.document.content,
            metadata: &scored.document.metadata,
        }
    }
}

/// A JSON object becomes a containment filter, a JSON string or anything
/// that isn't JSON becomes a raw predicate.
fn parse_filter(text: &str) -> Result<MetadataFilter, FilterError> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => MetadataFilter::try_from(value),
        Err(_) => Ok(MetadataFilter::raw(text)),
    }
}

fn parse_optional_filter(text: Option<&str>) -> Result<Option<MetadataFilter>, FilterError> {
    text.map(parse_filter).transpose()
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(command: Command, config: &PgvsConfig) -> Result<(), CliError> {
    let store = PgVectorStore::from_config(config)?;

    match command {
        Command::Init => {
            store.ensure_schema().await?;
            println!("Schema ready: {}", store.table_name());
        }
        Command::CreateIndex { recreate } => {
            store.create_index(IndexOptions { recreate }).await?;
            println!("Index ready: {}", store.index_name());
        }
        Command::CreatePartialIndex {
            name,
            filter,
            recreate,
        } => {
            let options = PartialIndexOptions {
                filter: Some(parse_filter(&filter)?),
                recreate,
            };
            store.create_partial_index(&name, options).await?;
            println!("Index ready: {}", store.partial_index_name(&name));
        }
        Command::DropIndex { name } => match name {
            Some(name) => {
                store.drop_partial_index(&name).await?;
                println!("Dropped {}", store.partial_index_name(&name));
            }
            None => {
                store.drop_index().await?;
                println!("Dropped {}", store.index_name());
            }
        },
        Command::IndexStatus { name } => {
            let state = store.index_state(name.as_deref()).await?;
            print_json(&state)?;
        }
        Command::Search {
            query,
            k,
            offset,
            filter,
        } => {
            let filter = parse_optional_filter(filter.as_deref())?;
            let embedding = store.embed_query(&query).await?;
            let hits = store
                .similarity_search_by_vector(&embedding, k, filter.as_ref(), offset)
                .await?;
            let hits: Vec<Hit<'_>> = hits.iter().map(Hit::from).collect();
            print_json(&hits)?;
        }
        Command::Get { ids, filter } => {
            let filter = parse_optional_filter(filter.as_deref())?;
            let documents = store.get_by_ids(&ids, filter.as_ref()).await?;
            print_json(&documents)?;
        }
        Command::Delete { ids, filter } => {
            let filter = parse_optional_filter(filter.as_deref())?;
            let deleted = store.delete_by_ids(&ids, filter.as_ref()).await?;
            println!("Deleted {deleted} documents");
        }
        Command::DeleteWhere { filter } => {
            let deleted = store.delete_by_filter(&parse_filter(&filter)?).await?;
            println!("Deleted {deleted} documents");
        }
        Command::Ingest { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|source| CliError::Read {
                    path: file.clone(),
                    source,
                })?;
            let documents = text
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, line)| {
                    serde_json::from_str::<Document>(line)
                        .map_err(|source| CliError::Document { line: i + 1, source })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let ids = store.add_documents(documents).await?;
            print_json(&ids)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match PgvsConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                args.config.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    let result = run(args.command, &config).await;

    if args.print_metrics
        && let Some(rendered) = metrics::render_metrics()
    {
        eprintln!("{rendered}");
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_object() {
        let filter = parse_filter(r#"{"tenant": "acme"}"#).unwrap();
        assert_eq!(filter, MetadataFilter::equals("tenant", "acme"));
    }

    #[test]
    fn test_parse_filter_raw_predicate() {
        let filter = parse_filter("metadata->>'lang' = 'en'").unwrap();
        assert_eq!(filter, MetadataFilter::raw("metadata->>'lang' = 'en'"));
    }

    #[test]
    fn test_parse_filter_rejects_other_json() {
        assert!(matches!(
            parse_filter("[1, 2]"),
            Err(FilterError::UnsupportedShape(_))
        ));
    }

    #[test]
    fn test_cli_parses_repeated_ids() {
        let id = Uuid::new_v4();
        let id_arg = id.to_string();
        let args =
            Args::try_parse_from(["pgvs", "get", "--id", id_arg.as_str(), "--id", id_arg.as_str()])
                .unwrap();
        match args.command {
            Command::Get { ids, filter } => {
                assert_eq!(ids, vec![id, id]);
                assert!(filter.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
