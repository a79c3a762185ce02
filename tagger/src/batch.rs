use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::cache::ResultCache;
use crate::client::{TaggingClient, parse_completion};
use crate::config::Settings;
use crate::error::ItemError;
use crate::media::{self, MediaKind};
use crate::metadata;
use crate::report::VideoReport;
use crate::video;

#[derive(Debug, Clone)]
struct MediaItem {
    path: PathBuf,
    file_name: String,
    logical_id: String,
}

#[derive(Debug)]
enum Outcome {
    Image { cache_hit: bool },
    Video { cache_hit: bool },
    Duplicate,
}

#[derive(Debug, Default)]
pub(crate) struct BatchSummary {
    pub processed: u64,
    pub images: u64,
    pub videos: u64,
    pub cache_hits: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Drives the whole pipeline: discovery, per-item normalization, tagging,
/// embedding and cleanup, strictly one item at a time.
pub(crate) struct BatchRunner {
    settings: Settings,
    client: TaggingClient,
    cache: ResultCache,
    report: VideoReport,
}

impl BatchRunner {
    pub fn new(settings: Settings, client: TaggingClient, cache: ResultCache) -> Self {
        let report = VideoReport::open(settings.folders.output.join(&settings.folders.report_name));
        Self {
            settings,
            client,
            cache,
            report,
        }
    }

    pub async fn run(&mut self) -> Result<BatchSummary> {
        fs::create_dir_all(&self.settings.folders.output).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.settings.folders.output.display()
            )
        })?;

        let files = discover_files(&self.settings.folders.input)?;
        tracing::info!(
            count = files.len(),
            input = %self.settings.folders.input.display(),
            "starting batch"
        );

        let mut summary = BatchSummary::default();
        let mut seen = HashSet::new();
        for path in files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.process_file(&path, &mut seen).await {
                Ok(Outcome::Image { cache_hit }) => {
                    summary.processed += 1;
                    summary.images += 1;
                    summary.cache_hits += u64::from(cache_hit);
                }
                Ok(Outcome::Video { cache_hit }) => {
                    summary.processed += 1;
                    summary.videos += 1;
                    summary.cache_hits += u64::from(cache_hit);
                }
                Ok(Outcome::Duplicate) => {
                    summary.skipped += 1;
                    tracing::debug!(
                        file = %file_name,
                        "logical identifier already handled this run"
                    );
                }
                Err(err) => record_failure(&mut summary, &file_name, err)?,
            }
        }

        tracing::info!(
            processed = summary.processed,
            images = summary.images,
            videos = summary.videos,
            cache_hits = summary.cache_hits,
            skipped = summary.skipped,
            errors = summary.errors,
            "batch complete"
        );
        Ok(summary)
    }

    async fn process_file(&mut self, path: &Path, seen: &mut HashSet<String>) -> Result<Outcome> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .context("file name is not valid utf-8")?
            .to_string();
        let kind = media::classify(path)
            .ok_or_else(|| ItemError::UnsupportedMedia(file_name.clone()))?;
        let logical_id = media::logical_identifier(&file_name, kind);

        // at most one processing attempt per logical filename per run
        if !seen.insert(logical_id.clone()) {
            return Ok(Outcome::Duplicate);
        }

        let item = MediaItem {
            path: path.to_path_buf(),
            file_name,
            logical_id,
        };
        match kind {
            MediaKind::Image => self.process_image(&item).await,
            MediaKind::Video => self.process_video(&item).await,
        }
    }

    async fn process_image(&mut self, item: &MediaItem) -> Result<Outcome> {
        // scratch space for converted/resized copies; removed on every exit
        // path, so nothing transient is left in the shared directories
        let scratch = TempDir::new().context("failed to create scratch directory")?;

        let artifact = if media::is_jpeg_ext(&item.file_name) {
            item.path.clone()
        } else {
            let converted = scratch.path().join(&item.logical_id);
            media::convert_to_jpeg(&item.path, &converted, self.settings.media.jpeg_quality)?;
            converted
        };

        let cached = self.cache.get(&item.logical_id).cloned();
        let cache_hit = cached.is_some();
        let raw = match cached {
            // a hit skips normalization and tagging entirely; the cached raw
            // text is the sole source of truth on replay
            Some(entry) => entry.raw,
            None => {
                let payload =
                    media::encode_payload(&artifact, scratch.path(), &self.settings.media)?;
                let context_keywords = self.cache.prior_keywords(&item.logical_id).to_vec();
                let raw = self
                    .client
                    .tag(&payload, MediaKind::Image, &context_keywords)
                    .await?;
                // banked before embedding is attempted, so a failed embed
                // never costs a second service call
                self.cache.put(&item.logical_id, raw.clone(), &context_keywords)?;
                raw
            }
        };
        let result = parse_completion(&raw);

        let output_path = self.settings.folders.output.join(&item.logical_id);
        move_file(&artifact, &output_path)?;
        metadata::embed(&output_path, &result.title, &result.keywords)?;
        self.cache.mark_embedded(&item.logical_id)?;
        Ok(Outcome::Image { cache_hit })
    }

    async fn process_video(&mut self, item: &MediaItem) -> Result<Outcome> {
        let cached = self.cache.get(&item.logical_id).cloned();
        let cache_hit = cached.is_some();
        let raw = match cached {
            Some(entry) => entry.raw,
            None => {
                let composite = video::composite_preview(
                    &item.path,
                    self.settings.media.max_width,
                    self.settings.media.max_height,
                )?;
                let jpeg =
                    media::encode_jpeg_bytes(&composite, self.settings.media.jpeg_quality)
                        .map_err(|err| ItemError::CorruptMedia(err.to_string()))?;
                let payload = general_purpose::STANDARD.encode(&jpeg);
                let raw = self.client.tag(&payload, MediaKind::Video, &[]).await?;
                self.cache.put(&item.logical_id, raw.clone(), &[])?;
                raw
            }
        };
        let result = parse_completion(&raw);

        // video containers are not mutated; the artifact is the report row
        self.report
            .append(&item.file_name, &result.title, &result.keywords)
            .map_err(|err| ItemError::MetadataWrite(err.to_string()))?;
        self.cache.mark_embedded(&item.logical_id)?;
        Ok(Outcome::Video { cache_hit })
    }
}

/// Lists the input directory non-recursively in lexicographic order; the
/// processing order is an explicit choice, not whatever the platform's
/// directory listing happens to return.
fn discover_files(input: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(input)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry
            .with_context(|| format!("failed to list input directory {}", input.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Every per-item failure becomes "skip and continue"; anything that is not
/// an item failure aborts the batch.
fn record_failure(summary: &mut BatchSummary, file_name: &str, err: anyhow::Error) -> Result<()> {
    match err.downcast_ref::<ItemError>() {
        Some(ItemError::UnsupportedMedia(_)) => {
            summary.skipped += 1;
            tracing::debug!(file = %file_name, "unsupported media type, skipping");
        }
        Some(ItemError::MetadataWrite(detail)) => {
            summary.errors += 1;
            tracing::warn!(
                file = %file_name,
                error = %detail,
                "tagged but not embedded; cached result kept for retry"
            );
        }
        Some(item_err) => {
            summary.errors += 1;
            tracing::warn!(file = %file_name, error = %item_err, "item failed, continuing");
        }
        None => return Err(err.context("batch aborted")),
    }
    Ok(())
}

/// Rename with a copy+remove fallback for cross-device paths. An existing
/// destination is overwritten.
fn move_file(src: &Path, dst: &Path) -> Result<(), ItemError> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    fs::copy(src, dst).map_err(|err| {
        ItemError::MetadataWrite(format!("failed to move {} to {}: {err}", src.display(), dst.display()))
    })?;
    fs::remove_file(src).map_err(|err| {
        ItemError::MetadataWrite(format!("failed to remove {} after copy: {err}", src.display()))
    })?;
    Ok(())
}
