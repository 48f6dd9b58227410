//! Subcommand implementations.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use fieldcache_core::cache::CacheError;
use fieldcache_core::grid::{load_manifest, render_all, ValueRange};
use fieldcache_core::models::file::parse_user_ids;
use fieldcache_core::utils::{format_size, truncate};
use fieldcache_core::{
    fetch_cached, Config, Connectivity, DeleteOutcome, FileIndex, FileKind, FileManager, LocalStore,
    Namespace, RemoteError, SyncEngine, TextEntry, TileEntry, UploadOutcome, WfsClient,
};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of concurrent tile requests.
const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Width of the URL column in `status`.
const URL_COLUMN_WIDTH: usize = 60;

pub struct Session {
    pub config: Config,
    pub store: LocalStore,
    pub client: WfsClient,
    pub mode: Connectivity,
    pub username: Option<String>,
}

impl Session {
    fn files(&self) -> FileManager<'_, WfsClient> {
        let manager = FileManager::new(&self.store, &self.client, self.mode);
        match self.username {
            Some(ref username) => manager.with_username(username.clone()),
            None => manager,
        }
    }

    /// One sync pass before anything lists files. No-op offline.
    pub async fn sync_before_read(&self) -> Result<()> {
        let report = SyncEngine::new(&self.store, &self.client)
            .run(self.mode)
            .await
            .context("Sync aborted")?;
        for error in &report.errors {
            warn!(error = %error, "Sync error");
        }
        Ok(())
    }
}

pub fn status(session: &Session) -> Result<()> {
    let store = &session.store;
    println!("Mode:     {}", session.mode);
    println!("Cache:    {}", store.root().display());
    println!();

    for ns in Namespace::ALL {
        println!("{:<8}  {:>6} records", ns.to_string(), store.count(ns)?);
    }

    let uploads = store.query_by_index(&FileIndex::UploadPending(true))?.len();
    let removals = store.query_by_index(&FileIndex::RemovalPending(true))?.len();
    println!();
    println!("Pending uploads:   {}", uploads);
    println!("Pending deletions: {}", removals);

    let tiles: Vec<TileEntry> = store.all()?;
    if let Some(ages) = tile_ages(&tiles) {
        println!();
        println!("Tiles:             {}", ages);
    }

    let mut texts: Vec<TextEntry> = store.all()?;
    if !texts.is_empty() {
        texts.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
        println!();
        println!("Cached responses:");
        for entry in texts {
            println!(
                "  {:<width$}  {}",
                truncate(&entry.url, URL_COLUMN_WIDTH),
                entry.age_display(),
                width = URL_COLUMN_WIDTH
            );
        }
    }
    Ok(())
}

/// Age of the newest and oldest cached tile.
fn tile_ages(tiles: &[TileEntry]) -> Option<String> {
    let newest = tiles.iter().max_by_key(|t| t.fetched_at)?;
    let oldest = tiles.iter().min_by_key(|t| t.fetched_at)?;
    Some(format!(
        "newest {}, oldest {}",
        newest.age_display(),
        oldest.age_display()
    ))
}

pub async fn sync(session: &Session) -> Result<()> {
    let report = SyncEngine::new(&session.store, &session.client)
        .run(session.mode)
        .await
        .context("Sync aborted")?;

    println!("Sync: {}", report.summary());
    for error in &report.errors {
        println!("  {}", error);
    }
    Ok(())
}

pub async fn files(session: &Session, feature_id: &str) -> Result<()> {
    let listing = session.files().list_for_feature(feature_id).await?;
    if listing.is_empty() {
        println!("No files for parcel {}", feature_id);
        return Ok(());
    }

    for row in listing {
        let meta = &row.meta;
        let access = if meta.is_manageable() { "owner" } else { "read-only" };
        println!(
            "{:<40}  {:<10}  {:>10}  {:<9}  {}",
            truncate(&meta.filename, 40),
            meta.kind().display_name(),
            format_size(meta.size_bytes),
            access,
            row.state.display_name()
        );
    }
    Ok(())
}

pub async fn upload(session: &Session, feature_id: &str, path: &Path, share: &str) -> Result<()> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))?;
    let blob = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    match session
        .files()
        .upload(feature_id, filename, blob, parse_user_ids(share))
        .await?
    {
        UploadOutcome::Uploaded => println!("Uploaded {}", filename),
        UploadOutcome::Queued => println!("Saved {}, will upload on next sync", filename),
    }
    Ok(())
}

pub async fn delete(session: &Session, filename: &str) -> Result<()> {
    match session.files().delete(filename).await? {
        DeleteOutcome::Deleted => println!("Deleted {}", filename),
        DeleteOutcome::Queued => {
            println!("Removed {}, will delete remotely on next sync", filename)
        }
    }
    Ok(())
}

pub async fn download(session: &Session, filename: &str, out: Option<&Path>) -> Result<()> {
    let blob = session.files().download(filename).await?;
    let out = out.unwrap_or_else(|| Path::new(filename));
    std::fs::write(out, &blob).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Saved {} ({})", out.display(), format_size(blob.len() as u64));
    Ok(())
}

pub async fn tracks(session: &Session) -> Result<()> {
    let rows: Vec<(String, u64, String)> = if session.mode.is_online() {
        let client = &session.client;
        let url = client.files_by_kind_url(FileKind::GpsTrack)?;
        let entry: TextEntry = fetch_cached(&session.store, session.mode, &url, |url| async move {
            let text = client.get_text(&url).await?;
            Ok::<_, RemoteError>(TextEntry::new(url, text))
        })
        .await?;

        client
            .parse_files(&entry.data)?
            .into_iter()
            .map(|f| (f.meta.filename, f.meta.size_bytes, f.meta.owner_feature_id))
            .collect()
    } else {
        session
            .files()
            .list_by_kind(FileKind::GpsTrack)?
            .into_iter()
            .map(|r| (r.filename, r.size_bytes, r.owner_feature_id))
            .collect()
    };

    if rows.is_empty() {
        println!("No GPS tracks");
    }
    for (filename, size, owner) in rows {
        println!("{:<40}  {:>10}  parcel {}", truncate(&filename, 40), format_size(size), owner);
    }
    Ok(())
}

fn tile_url(template: &str, z: u32, x: u32, y: u32) -> String {
    template
        .replace("{z}", &z.to_string())
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
}

pub async fn tiles(
    session: &Session,
    zoom: u32,
    xs: RangeInclusive<u32>,
    ys: RangeInclusive<u32>,
) -> Result<()> {
    let template = session.config.tile_url_template();
    let urls: Vec<String> = xs
        .flat_map(|x| ys.clone().map(move |y| (x, y)))
        .map(|(x, y)| tile_url(template, zoom, x, y))
        .collect();

    let client = &session.client;
    let store = &session.store;
    let mode = session.mode;

    let results: Vec<(String, Result<TileEntry, CacheError>)> = stream::iter(urls)
        .map(|url| async move {
            let result = fetch_cached(store, mode, &url, |key| async move {
                let data = client.get_bytes(&key).await?;
                Ok::<_, RemoteError>(TileEntry::new(key, data))
            })
            .await;
            (url, result)
        })
        .buffer_unordered(MAX_CONCURRENT_REQUESTS)
        .collect()
        .await;

    let (mut ok, mut missing, mut failed) = (0usize, 0usize, 0usize);
    for (url, result) in &results {
        match result {
            Ok(tile) => {
                debug!(url = %url, bytes = tile.data.len(), "Tile ready");
                ok += 1;
            }
            Err(CacheError::Miss(_)) => missing += 1,
            Err(CacheError::Store(e)) => return Err(anyhow::anyhow!("Tile cache failed: {}", e)),
            Err(e) => {
                warn!(url = %url, error = %e, "Tile fetch failed");
                failed += 1;
            }
        }
    }

    println!(
        "{} tiles ({}): {} available, {} not cached, {} failed",
        results.len(),
        mode,
        ok,
        missing,
        failed
    );
    Ok(())
}

#[derive(Serialize)]
struct ExtentSidecar<'a> {
    grid: &'a str,
    extent: [f64; 4],
    range: ValueRange,
    width: u32,
    height: u32,
}

/// File stem for a grid's output files. Grid names come from the manifest,
/// so anything that could leave the output directory is replaced.
fn output_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "grid".to_string()
    } else {
        stem
    }
}

pub fn render_grid(manifest: &Path, out_dir: &Path) -> Result<()> {
    let loaded = load_manifest(manifest)?;
    let outcome = render_all(&loaded.grids);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut used = HashSet::new();
    for (name, rendered) in &outcome.rendered {
        let base = output_stem(name);
        let mut stem = base.clone();
        let mut n = 1;
        while !used.insert(stem.clone()) {
            n += 1;
            stem = format!("{}_{}", base, n);
        }

        let image_path = out_dir.join(format!("{}.pam", stem));
        std::fs::write(&image_path, rendered.image.to_pam())
            .with_context(|| format!("Failed to write {}", image_path.display()))?;

        let sidecar = ExtentSidecar {
            grid: name,
            extent: rendered.extent.as_array(),
            range: rendered.range,
            width: rendered.image.width,
            height: rendered.image.height,
        };
        let sidecar_path = out_dir.join(format!("{}.extent.json", stem));
        std::fs::write(&sidecar_path, serde_json::to_string_pretty(&sidecar)?)
            .with_context(|| format!("Failed to write {}", sidecar_path.display()))?;

        println!("Rendered {} -> {}", name, image_path.display());
    }
    for (name, error) in &loaded.unreadable {
        println!("Skipped {}: {}", name, error);
    }
    for (name, error) in &outcome.failed {
        println!("Skipped {}: {}", name, error);
    }
    Ok(())
}
