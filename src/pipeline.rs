use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context as _;

use crate::cli::{DownloadArgs, IndexArgs, ResolveArgs, RunArgs};
use crate::config::Config;
use crate::download::{DownloadReport, DownloadSettings, Downloader, sanitize_component};
use crate::formats::{Course, CourseIndex};
use crate::index::{IndexSettings, build_index};
use crate::orchestrate::{Orchestrator, Resolution, read_manifest, write_resolution};
use crate::render::{RenderSession, SessionLauncher};
use crate::resolve::ResolveSettings;
use crate::timing;

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub courses: usize,
    pub aborted: Vec<String>,
    pub resolved: usize,
    pub failed: usize,
    pub downloads: DownloadReport,
}

/// Launches a session and reads the course index with it.
///
/// On success the session stays open for the resolution phase. On failure it
/// is terminated before the error is returned.
pub async fn index_course(
    launcher: &dyn SessionLauncher,
    config: &Config,
    course: &Course,
) -> anyhow::Result<(CourseIndex, Box<dyn RenderSession>)> {
    let settings = IndexSettings::from_config(&config.render)?;
    let mut session = launcher.launch().await.context("launch render session")?;

    let started = Instant::now();
    tracing::info!(url = %course.url, "getting chapters");
    match build_index(session.as_mut(), course, &settings).await {
        Ok(index) => {
            tracing::info!(
                sections = index.sections.len(),
                chapters = index.chapter_count,
                elapsed = %timing::pretty_duration(started.elapsed()),
                "got chapters"
            );
            Ok((index, session))
        }
        Err(err) => {
            if let Err(term_err) = session.terminate().await {
                tracing::debug!(%term_err, "terminate render session");
            }
            Err(err).with_context(|| format!("build index for {}", course.url))
        }
    }
}

pub async fn resolve_course(
    launcher: &dyn SessionLauncher,
    config: &Config,
    course: &Course,
) -> anyhow::Result<Resolution> {
    let (index, session) = index_course(launcher, config, course).await?;
    let orchestrator = Orchestrator::new(launcher, ResolveSettings::from_config(config));
    Ok(orchestrator.run(index, session).await)
}

/// Manifest and failure-list paths for one course. With several courses the
/// course slug is inserted before the extension so runs do not overwrite
/// each other.
pub fn artifact_paths(config: &Config, course: &Course, per_course: bool) -> (PathBuf, PathBuf) {
    let manifest = &config.application.download_list_path;
    let failed = &config.application.failed_list_path;
    if !per_course {
        return (manifest.clone(), failed.clone());
    }
    let slug = course_slug(course);
    (with_slug(manifest, &slug), with_slug(failed, &slug))
}

fn course_slug(course: &Course) -> String {
    sanitize_component(&course.display_title())
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

fn with_slug(path: &Path, slug: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{slug}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{slug}"),
    };
    path.with_file_name(name)
}

pub async fn run(
    config: &Config,
    launcher: &dyn SessionLauncher,
    args: RunArgs,
) -> anyhow::Result<RunSummary> {
    let courses: Vec<&Course> = match args.course {
        Some(position) => vec![config.course(position)?],
        None => config.courses.iter().collect(),
    };
    let per_course = courses.len() > 1;
    let download = config.application.download_enabled && !args.skip_download;
    let downloader = if download {
        Some(Downloader::new(DownloadSettings::from_config(&config.application))?)
    } else {
        None
    };

    let mut summary = RunSummary {
        courses: courses.len(),
        ..RunSummary::default()
    };

    for course in courses {
        let title = course.display_title();
        tracing::info!(course = %title, url = %course.url, "processing course");

        let resolution = match resolve_course(launcher, config, course).await {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::error!(course = %title, url = %course.url, "course aborted: {err:#}");
                summary.aborted.push(course.url.clone());
                continue;
            }
        };

        let (manifest_path, failed_path) = artifact_paths(config, course, per_course);
        if let Err(err) = write_resolution(&resolution, &manifest_path, &failed_path) {
            tracing::error!(course = %title, "course aborted: {err:#}");
            summary.aborted.push(course.url.clone());
            continue;
        }
        summary.resolved += resolution.resolved_count();
        summary.failed += resolution.failures.len();

        if let Some(downloader) = downloader.as_ref() {
            let report = downloader
                .download_all(&resolution.manifest, &title)
                .await
                .with_context(|| format!("download {title}"))?;
            summary.downloads.downloaded += report.downloaded;
            summary.downloads.skipped += report.skipped;
            summary.downloads.failed += report.failed;
        }
    }

    tracing::info!(
        courses = summary.courses,
        aborted = summary.aborted.len(),
        resolved = summary.resolved,
        failed = summary.failed,
        downloaded = summary.downloads.downloaded,
        skipped = summary.downloads.skipped,
        download_failed = summary.downloads.failed,
        "run finished"
    );
    Ok(summary)
}

pub async fn index(
    config: &Config,
    launcher: &dyn SessionLauncher,
    args: IndexArgs,
) -> anyhow::Result<()> {
    let course = config.course(args.course)?;
    let (index, mut session) = index_course(launcher, config, course).await?;
    if let Err(err) = session.terminate().await {
        tracing::debug!(%err, "terminate render session");
    }

    let json = serde_json::to_string_pretty(&index).context("serialize index")?;
    match args.out {
        Some(out) => std::fs::write(&out, json).with_context(|| format!("write index: {out}"))?,
        None => println!("{json}"),
    }
    Ok(())
}

pub async fn resolve(
    config: &Config,
    launcher: &dyn SessionLauncher,
    args: ResolveArgs,
) -> anyhow::Result<Resolution> {
    let course = config.course(args.course)?;
    let resolution = resolve_course(launcher, config, course).await?;

    let manifest_path = args
        .manifest
        .map(PathBuf::from)
        .unwrap_or_else(|| config.application.download_list_path.clone());
    let failed_path = args
        .failed
        .map(PathBuf::from)
        .unwrap_or_else(|| config.application.failed_list_path.clone());
    write_resolution(&resolution, &manifest_path, &failed_path)?;
    Ok(resolution)
}

pub async fn download(config: &Config, args: DownloadArgs) -> anyhow::Result<DownloadReport> {
    let manifest = read_manifest(Path::new(&args.manifest))?;

    let mut settings = DownloadSettings::from_config(&config.application);
    if let Some(out) = args.out {
        settings.output_dir = PathBuf::from(out);
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency.max(1);
    }

    Downloader::new(settings)?
        .download_all(&manifest, &args.course_title)
        .await
}
