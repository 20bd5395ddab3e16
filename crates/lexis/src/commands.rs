//! Subcommand handlers. Results are written to `out` as JSON; progress and
//! diagnostics go to the log.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use lexis_core::{BatchProgress, Engine, LexisError};
use lexis_remote::{Entry, normalize_key};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

fn print_json<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).into_diagnostic()?;
    writeln!(out, "{}", text).into_diagnostic()
}

fn log_progress(progress: BatchProgress) {
    info!(
        batch = progress.batch_index + 1,
        batches = progress.batches,
        applied = progress.applied,
        total = progress.total,
        "{:.1}% committed",
        progress.fraction() * 100.0
    );
}

/// Cancel flag flipped by Ctrl-C. The run stops before its next batch.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current batch");
            let _ = tx.send(true);
        }
    });
    rx
}

pub async fn sync(
    engine: &Arc<Engine>,
    collection: Option<&str>,
    max_age_minutes: Option<u64>,
    out: &mut impl Write,
) -> Result<()> {
    let results = match collection {
        Some(collection) => vec![(
            collection.to_string(),
            engine.sync(collection, max_age_minutes).await,
        )],
        None => engine.sync_all().await,
    };

    let mut report = serde_json::Map::new();
    let mut failures = 0;
    for (collection, result) in results {
        let value = match result {
            Ok(refreshed) => json!({ "refreshed": refreshed }),
            Err(e) => {
                failures += 1;
                json!({ "error": e.to_string() })
            }
        };
        report.insert(collection, value);
    }
    print_json(out, &report)?;

    if failures > 0 {
        return Err(miette::miette!("{} collection(s) failed to sync", failures));
    }
    Ok(())
}

pub async fn search(
    engine: &Arc<Engine>,
    collection: &str,
    query: &str,
    limit: usize,
    out: &mut impl Write,
) -> Result<()> {
    let results = engine
        .search(collection, query, limit)
        .await
        .map_err(|e| miette::miette!("search failed: {}", e))?;
    print_json(out, &results)
}

pub fn dupes(engine: &Arc<Engine>, collection: &str, out: &mut impl Write) -> Result<()> {
    let groups = engine
        .detect_duplicates(collection)
        .map_err(|e| miette::miette!("duplicate scan failed: {}", e))?;
    print_json(out, &groups)
}

pub async fn merge(
    engine: &Arc<Engine>,
    collection: &str,
    key: &str,
    keep: Option<&str>,
    out: &mut impl Write,
) -> Result<()> {
    let key = normalize_key(key);
    let groups = engine
        .detect_duplicates(collection)
        .map_err(|e| miette::miette!("duplicate scan failed: {}", e))?;
    let group = groups
        .iter()
        .find(|g| g.key == key)
        .ok_or_else(|| miette::miette!("no duplicates of '{}' in {}", key, collection))?;

    let result = engine
        .merge_group(collection, group, keep)
        .await
        .map_err(|e| miette::miette!("merge failed: {}", e))?;
    match result {
        Some(result) => print_json(out, &result),
        None => print_json(out, &json!({ "merged": false })),
    }
}

pub async fn auto_merge(engine: &Arc<Engine>, collection: &str, out: &mut impl Write) -> Result<()> {
    let groups = engine
        .detect_duplicates(collection)
        .map_err(|e| miette::miette!("duplicate scan failed: {}", e))?;
    let cancel = cancel_on_ctrl_c();

    match engine
        .auto_merge_all(collection, &groups, log_progress, Some(&cancel))
        .await
    {
        Ok(results) => print_json(out, &results),
        Err(LexisError::Cancelled { applied }) => {
            print_json(out, &json!({ "cancelled": true, "applied": applied }))
        }
        Err(e) => Err(miette::miette!("auto-merge failed: {}", e)),
    }
}

pub async fn import(
    engine: &Arc<Engine>,
    collection: &str,
    file: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| miette::miette!("failed to read {}: {}", file.display(), e))?;
    let entries: Vec<Entry> = serde_json::from_str(&raw)
        .map_err(|e| miette::miette!("{} is not a JSON array of entries: {}", file.display(), e))?;
    let cancel = cancel_on_ctrl_c();

    let report = engine
        .import(collection, entries, log_progress, Some(&cancel))
        .await
        .map_err(|e| miette::miette!("import failed: {}", e))?;
    print_json(out, &report)
}

pub fn stats(engine: &Arc<Engine>, out: &mut impl Write) -> Result<()> {
    let stats = engine
        .stats()
        .map_err(|e| miette::miette!("failed to read cache stats: {}", e))?;
    print_json(out, &stats)
}
