use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

use crate::config::ApplicationConfig;
use crate::error::TransferFault;
use crate::formats::{Manifest, ManifestSection};

const CHUNK_SIZE: usize = 8 * 1024;
const FALLBACK_FILENAME: &str = "download.bin";

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub concurrency: usize,
    /// Longest wait for the connection, the response head or the next body chunk.
    pub stall_timeout: Duration,
}

impl DownloadSettings {
    pub fn from_config(application: &ApplicationConfig) -> Self {
        Self {
            output_dir: application.output_dir.clone(),
            concurrency: application.download_concurrency.max(1),
            stall_timeout: Duration::from_secs(application.download_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded(PathBuf),
    /// The destination already held a complete file and was left untouched.
    Skipped(PathBuf),
}

#[derive(Debug, Clone)]
struct DownloadJob {
    title: String,
    url: String,
    folder: PathBuf,
}

pub struct Downloader {
    client: reqwest::Client,
    settings: DownloadSettings,
}

impl Downloader {
    pub fn new(settings: DownloadSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.stall_timeout)
            .build()
            .context("build download http client")?;
        Ok(Self { client, settings })
    }

    /// Materializes every manifest chapter under
    /// `<output_dir>/<course>/<section>/<chapter>/<filename>`.
    ///
    /// Sections run one after another; chapters of a section share a worker
    /// pool bounded by the configured concurrency. Per-chapter failures are
    /// logged and counted, never propagated.
    pub async fn download_all(
        &self,
        manifest: &Manifest,
        course_title: &str,
    ) -> anyhow::Result<DownloadReport> {
        let course_dir = self.settings.output_dir.join(sanitize_component(course_title));
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut report = DownloadReport::default();

        let section_dirs = section_folders(&course_dir, manifest);
        for (section, section_dir) in manifest.iter().zip(section_dirs) {
            tracing::info!(
                section = %section.title,
                chapters = section.chapters.len(),
                dir = %section_dir.display(),
                "downloading section"
            );

            let mut tasks = JoinSet::new();
            for job in plan_section(&section_dir, section) {
                let client = self.client.clone();
                let semaphore = Arc::clone(&semaphore);
                let stall_timeout = self.settings.stall_timeout;
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("download semaphore is closed");
                    let result = download_one(&client, &job.url, &job.folder, stall_timeout).await;
                    (job, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (job, result) = joined.context("join download task")?;
                match result {
                    Ok(DownloadStatus::Downloaded(path)) => {
                        report.downloaded += 1;
                        tracing::info!(title = %job.title, path = %path.display(), "saved");
                    }
                    Ok(DownloadStatus::Skipped(path)) => {
                        report.skipped += 1;
                        tracing::info!(title = %job.title, path = %path.display(), "already complete; skipping");
                    }
                    Err(fault) => {
                        report.failed += 1;
                        tracing::warn!(title = %job.title, url = %job.url, %fault, "download failed");
                    }
                }
            }
        }

        tracing::info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed,
            "downloads finished"
        );
        Ok(report)
    }
}

/// One folder per section, unique within the course directory.
fn section_folders(course_dir: &Path, manifest: &Manifest) -> Vec<PathBuf> {
    let mut issued = HashSet::new();
    manifest
        .iter()
        .map(|section| {
            let name = claim_name(&mut issued, sanitize_component(&section.title));
            course_dir.join(name)
        })
        .collect()
}

/// One job per chapter; chapters sharing a sanitized title get ` (n)` suffixes
/// so no two jobs write the same destination.
fn plan_section(section_dir: &Path, section: &ManifestSection) -> Vec<DownloadJob> {
    let mut issued = HashSet::new();
    section
        .chapters
        .iter()
        .map(|chapter| {
            let folder_name = claim_name(&mut issued, sanitize_component(&chapter.title));
            DownloadJob {
                title: chapter.title.clone(),
                url: chapter.url.clone(),
                folder: section_dir.join(folder_name),
            }
        })
        .collect()
}

/// Returns `base`, or the first free `base (n)` for n >= 2, and marks it issued.
fn claim_name(issued: &mut HashSet<String>, base: String) -> String {
    if issued.insert(base.clone()) {
        return base;
    }
    let mut n = 2_usize;
    loop {
        let candidate = format!("{base} ({n})");
        if issued.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

pub async fn download_one(
    client: &reqwest::Client,
    url: &str,
    folder: &Path,
    stall_timeout: Duration,
) -> Result<DownloadStatus, TransferFault> {
    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|source| io_fault(folder, source))?;

    let filename = filename_from_url(url);
    let path = folder.join(&filename);

    let stalled = |_: tokio::time::error::Elapsed| TransferFault::Stalled(stall_timeout);
    let mut response = tokio::time::timeout(stall_timeout, client.get(url).send())
        .await
        .map_err(stalled)??;
    let status = response.status();
    if !status.is_success() {
        let body = tokio::time::timeout(stall_timeout, response.text())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        return Err(TransferFault::Status {
            status: status.as_u16(),
            body,
        });
    }

    let expected_len = response.content_length();
    if is_complete(&path, expected_len).await {
        return Ok(DownloadStatus::Skipped(path));
    }

    tracing::debug!(path = %path.display(), "saving");
    let part_path = folder.join(format!("{filename}.part"));
    let mut file = tokio::fs::File::create(&part_path)
        .await
        .map_err(|source| io_fault(&part_path, source))?;

    let mut written = 0_u64;
    while let Some(bytes) = tokio::time::timeout(stall_timeout, response.chunk())
        .await
        .map_err(stalled)??
    {
        for piece in bytes.chunks(CHUNK_SIZE) {
            file.write_all(piece)
                .await
                .map_err(|source| io_fault(&part_path, source))?;
            file.flush()
                .await
                .map_err(|source| io_fault(&part_path, source))?;
            file.sync_data()
                .await
                .map_err(|source| io_fault(&part_path, source))?;
            written += piece.len() as u64;
        }
    }
    drop(file);

    if let Some(expected) = expected_len
        && expected != written
    {
        return Err(io_fault(
            &part_path,
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("received {written} of {expected} bytes"),
            ),
        ));
    }

    tokio::fs::rename(&part_path, &path)
        .await
        .map_err(|source| io_fault(&path, source))?;
    Ok(DownloadStatus::Downloaded(path))
}

/// A finished file only appears through the final rename, so an existing file
/// is complete when its size matches the advertised length, or when the
/// length is unknown and the file is non-empty.
async fn is_complete(path: &Path, expected_len: Option<u64>) -> bool {
    let Ok(metadata) = tokio::fs::metadata(path).await else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    match expected_len {
        Some(expected) => metadata.len() == expected,
        None => metadata.len() > 0,
    }
}

fn io_fault(path: &Path, source: std::io::Error) -> TransferFault {
    TransferFault::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Trailing path segment of the asset url, with spaces replaced.
pub fn filename_from_url(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_owned),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').find(|s| !s.is_empty()))
            .map(str::to_owned),
    };

    let name = segment
        .unwrap_or_default()
        .replace("%20", "_")
        .replace(' ', "_");
    let name = sanitize_component(&name);
    if name == "_" {
        FALLBACK_FILENAME.to_owned()
    } else {
        name
    }
}

/// Turns a display title into a single safe path component.
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim().trim_end_matches('.').trim_end();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "_".to_owned()
    } else {
        trimmed.to_owned()
    }
}
