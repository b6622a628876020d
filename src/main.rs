mod aml;
mod config;
mod matcher;
mod pipeline;
mod record;
mod source;
mod store;
mod text;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::record::Record;
use crate::store::DocumentStore;

/// Similarity floor for the ad hoc matcher command, mirroring the pipeline
/// default.
const TEST_MATCH_THRESHOLD: u8 = 90;

#[derive(Parser)]
#[command(name = "content_loader", about = "Content loader and reconciliation pipeline")]
struct Cli {
    /// Path to the content database
    #[arg(long, default_value = "data/content.sqlite")]
    db: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch documents, run the reconciliation pipeline, store the results
    Load {
        /// Reload a single document by id, preserving existing content.
        /// Specify multiple times for multiple documents.
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Perform the load from the locally cached documents
        #[arg(long)]
        local: bool,
        /// Save a local cache of source documents and quit
        #[arg(long)]
        save_local: bool,
        /// Local cache file path
        #[arg(long, default_value = "local_cache.json")]
        cache: PathBuf,
        /// Base URL of the document source (or CONTENT_SOURCE_URL)
        #[arg(long)]
        source_url: Option<String>,
        /// Title of the configuration document
        #[arg(long, default_value = "CONFIG")]
        config_title: String,
    },
    /// Fuzzy match a string against stored content slugs
    TestMatch { query: String },
    /// Per-type document counts
    Stats,
    /// Delete the content database
    DeleteDb {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Load { ids, local, save_local, cache, source_url, config_title } => {
            run_load(&cli.db, ids, local, save_local, &cache, source_url, &config_title).await
        }
        Commands::TestMatch { query } => {
            let store = DocumentStore::open(&cli.db)?;
            let slugs: Vec<String> = store
                .all_content()?
                .into_iter()
                .filter_map(|(_, _, body)| {
                    body.get("slug").and_then(Value::as_str).map(str::to_string)
                })
                .collect();
            match matcher::best_match(
                &query,
                slugs.iter().map(String::as_str),
                TEST_MATCH_THRESHOLD,
            ) {
                Some((i, score)) => {
                    println!("Found match \"{}\" ({}) for string \"{}\"", slugs[i], score, query)
                }
                None => println!("No match for string \"{}\"", query),
            }
            Ok(())
        }
        Commands::Stats => {
            let store = DocumentStore::open(&cli.db)?;
            let counts = store.counts_by_type()?;
            if counts.is_empty() {
                println!("No documents stored.");
            }
            for (kind, count) in counts {
                println!("{:<12} {}", kind, count);
            }
            Ok(())
        }
        Commands::DeleteDb { yes } => {
            if yes || confirm(&format!("Delete the database {:?} [y/N]? ", cli.db))? {
                store::destroy(&cli.db)?;
                println!("Deleted.");
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    result
}

async fn run_load(
    db: &Path,
    ids: Vec<String>,
    local: bool,
    save_local: bool,
    cache: &Path,
    source_url: Option<String>,
    config_title: &str,
) -> Result<()> {
    let documents = if local {
        source::load_cache(cache)?
    } else {
        let url = source_url
            .or_else(|| std::env::var("CONTENT_SOURCE_URL").ok())
            .context("--source-url or CONTENT_SOURCE_URL must be set unless --local is used")?;
        source::fetch_documents(&url).await?
    };

    if save_local {
        source::save_cache(cache, &documents)?;
        println!("Saved {} documents to {}", documents.len(), cache.display());
        return Ok(());
    }

    // The pipeline cannot run without a type and relationship schema
    let config_doc = documents
        .iter()
        .find(|d| d.title == config_title)
        .with_context(|| format!("can't find a config document titled {config_title:?}"))?;
    let config = Config::resolve(&config_doc.text)?;
    info!("load: configuration options from source document {:?}", config_title);

    let store = DocumentStore::open(db)?;

    // A full reload is triggered when no ids are specified
    let full_reload = ids.is_empty();
    let existing: Vec<Record> = if full_reload {
        info!("db: not preserving existing content");
        store.clear()?;
        Vec::new()
    } else {
        info!("db: preserving existing content");
        store
            .all_content()?
            .into_iter()
            .filter_map(|(_, rev, body)| Record::from_doc(&body, Some(rev)))
            .collect()
    };

    let published: Vec<_> = source::select_published(&documents, &config, &ids)
        .into_iter()
        .filter(|d| d.id != config_doc.id)
        .collect();
    if published.is_empty() {
        warn!("skip: no documents to load");
        return Ok(());
    }
    println!("Loading {} documents...", published.len());

    let (records, counts) = pipeline::run(published, existing, &config);

    let config_rev = store.get("config:api")?.map(|d| d.rev);
    let mut docs: Vec<(String, Option<String>, Value)> =
        vec![("config:api".to_string(), config_rev, config.to_doc())];
    for record in &records {
        docs.push((record.id(), record.rev.clone(), record.to_doc()));
    }
    let stats = store.save_all(docs)?;

    counts.print();
    println!(
        "Saved {} docs ({} conflict retries, {} unresolved).",
        stats.saved, stats.recovered, stats.conflicts
    );
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
