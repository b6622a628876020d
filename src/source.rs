//! Document source boundary: a folder hierarchy of hand-authored documents,
//! reachable either over HTTP or from a local JSON cache. The loader only
//! ever sees raw text blobs plus metadata.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;

const CONCURRENCY: usize = 8;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub folder: String,
    pub text: String,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Deserialize)]
struct DocumentMeta {
    id: String,
    title: String,
    #[serde(default)]
    folder: String,
    modified: DateTime<Utc>,
    #[serde(default)]
    link: String,
}

// ── Local cache ──

pub fn load_cache(path: &Path) -> Result<Vec<SourceDocument>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("local: can't find local cache {}", path.display()))?;
    let documents: Vec<SourceDocument> =
        serde_json::from_str(&text).context("local: cache file is not valid JSON")?;
    info!("local: loaded {} documents from cache", documents.len());
    Ok(documents)
}

pub fn save_cache(path: &Path, documents: &[SourceDocument]) -> Result<()> {
    let text = serde_json::to_string_pretty(documents)?;
    std::fs::write(path, text)
        .with_context(|| format!("local: can't write cache {}", path.display()))?;
    info!("local: saved cache of {} documents", documents.len());
    Ok(())
}

// ── Remote fetch ──

/// Fetch the document listing, then every document body, with bounded
/// concurrency. Documents whose bodies cannot be fetched are skipped with a
/// warning; a single unreadable document must not abort the run.
pub async fn fetch_documents(base_url: &str) -> Result<Vec<SourceDocument>> {
    let base = base_url.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    let listing: Vec<DocumentMeta> = client
        .get(format!("{base}/documents"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("source: bad document listing")?;
    info!("find: {} documents in source listing", listing.len());

    let total = listing.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Option<SourceDocument>>(CONCURRENCY * 2);

    for meta in listing {
        let client = client.clone();
        let base = base.clone();
        let sem = std::sync::Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            match fetch_text_with_retry(&client, &base, &meta.id).await {
                Ok(text) => {
                    let _ = tx
                        .send(Some(SourceDocument {
                            id: meta.id,
                            title: meta.title,
                            folder: meta.folder,
                            text,
                            modified: meta.modified,
                            link: meta.link,
                        }))
                        .await;
                }
                Err(e) => {
                    warn!("skip: can't fetch document {}: {}", meta.id, e);
                    let _ = tx.send(None).await;
                }
            }
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut documents = Vec::with_capacity(total);
    while let Some(result) = rx.recv().await {
        if let Some(document) = result {
            documents.push(document);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    info!("fetch: {} of {} documents retrieved", documents.len(), total);

    Ok(documents)
}

async fn fetch_text_with_retry(
    client: &reqwest::Client,
    base: &str,
    id: &str,
) -> Result<String> {
    let url = format!("{base}/documents/{id}/text");
    for attempt in 0..=MAX_RETRIES {
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                return Ok(response.text().await?);
            }
            Ok(response) => {
                let status = response.status();
                let retryable = status.as_u16() == 429 || status.is_server_error();
                if !retryable || attempt == MAX_RETRIES {
                    bail!("{} returned {}", url, status);
                }
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "fetch: {} on {} (attempt {}/{}), backing off {:.1}s",
                    status,
                    id,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                if attempt == MAX_RETRIES {
                    return Err(e.into());
                }
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "fetch: error on {} (attempt {}/{}): {}",
                    id,
                    attempt + 1,
                    MAX_RETRIES,
                    e
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
    bail!("{} still failing after {} retries", url, MAX_RETRIES)
}

// ── Published selection ──

/// Keep the documents editors marked as published, skipping ignored folders.
/// Explicitly requested ids bypass the filename convention.
pub fn select_published(
    documents: &[SourceDocument],
    config: &Config,
    requested: &[String],
) -> Vec<SourceDocument> {
    documents
        .iter()
        .filter(|d| {
            if !d.folder.is_empty() && config.ignore_folder.is_match(&d.folder) {
                info!("omit: by ignore-folder-regex {:?}", d.folder);
                return false;
            }
            config.published_filename.is_match(&d.title) || requested.contains(&d.id)
        })
        .cloned()
        .collect()
}

// ── Tests ──
