use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context as _;

use crate::formats::{
    Chapter, CourseIndex, FailureSet, Manifest, ManifestSection, ResolutionResult,
};
use crate::render::{RenderSession, SessionLauncher};
use crate::resolve::{ResolutionOutcome, ResolveSettings, resolve_link};
use crate::timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Live,
    Dead,
}

/// Exclusive owner of the current render session.
struct SessionSlot {
    session: Option<Box<dyn RenderSession>>,
}

impl SessionSlot {
    fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Live
        } else {
            SessionState::Dead
        }
    }

    async fn terminate(&mut self) {
        if let Some(mut session) = self.session.take()
            && let Err(err) = session.terminate().await
        {
            tracing::debug!(%err, "terminate render session");
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub manifest: Manifest,
    pub failures: FailureSet,
    pub elapsed: Duration,
    pub estimate: Duration,
}

impl Resolution {
    pub fn resolved_count(&self) -> usize {
        self.manifest.iter().map(|section| section.chapters.len()).sum()
    }
}

/// Walks a course index chapter by chapter through one render session,
/// rebooting the session at most once per chapter.
pub struct Orchestrator<'a> {
    launcher: &'a dyn SessionLauncher,
    settings: ResolveSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(launcher: &'a dyn SessionLauncher, settings: ResolveSettings) -> Self {
        Self { launcher, settings }
    }

    pub async fn run(&self, index: CourseIndex, session: Box<dyn RenderSession>) -> Resolution {
        let started = Instant::now();
        let estimate = timing::estimate(index.chapter_count, self.settings.settle);
        tracing::info!(
            chapters = index.chapter_count,
            estimate = %timing::pretty_duration(estimate),
            "getting download links"
        );

        let mut slot = SessionSlot {
            session: Some(session),
        };
        let mut manifest = Vec::with_capacity(index.sections.len());
        let mut failures = Vec::new();
        let mut attempted = 0_usize;

        for section in index.sections {
            let (section_title, chapters) = section.into_parts();
            tracing::info!(section = %section_title, chapters = chapters.len(), "resolving section");

            let mut resolved = Vec::with_capacity(chapters.len());
            for mut chapter in chapters {
                attempted += 1;
                match self.resolve_chapter(&mut slot, &chapter).await {
                    ResolutionResult::Resolved(link) => {
                        tracing::info!(
                            progress = %format!("{attempted}/{}", index.chapter_count),
                            title = %link.title,
                            url = %link.url,
                            "got link"
                        );
                        chapter.mark_resolved(&link);
                        resolved.extend(chapter.manifest_entry());
                    }
                    ResolutionResult::Failed { chapter, reason } => {
                        tracing::warn!(
                            progress = %format!("{attempted}/{}", index.chapter_count),
                            title = %chapter.title,
                            href = chapter.href(),
                            %reason,
                            "giving up on chapter"
                        );
                        failures.push(chapter);
                    }
                }

                tokio::time::sleep(timing::pacing(self.settings.settle)).await;
            }

            manifest.push(ManifestSection {
                title: section_title,
                chapters: resolved,
            });
        }

        slot.terminate().await;

        let elapsed = started.elapsed();
        let resolution = Resolution {
            manifest,
            failures,
            elapsed,
            estimate,
        };
        tracing::info!(
            resolved = resolution.resolved_count(),
            failed = resolution.failures.len(),
            elapsed = %timing::pretty_duration(elapsed),
            "got download links; {}",
            timing::schedule_report(elapsed, estimate)
        );
        resolution
    }

    async fn resolve_chapter(&self, slot: &mut SessionSlot, chapter: &Chapter) -> ResolutionResult {
        let href = chapter.href();

        if slot.state() == SessionState::Dead
            && let Err(reason) = self.launch_into(slot).await
        {
            return failed(chapter, reason);
        }
        let Some(session) = slot.session.as_deref_mut() else {
            return failed(chapter, "no render session".to_owned());
        };

        let first_fault = match resolve_link(session, href, false, &self.settings).await {
            ResolutionOutcome::Resolved(link) => return ResolutionResult::Resolved(link),
            ResolutionOutcome::TerminalFault(reason) => return failed(chapter, reason),
            ResolutionOutcome::RecoverableFault(reason) => reason,
        };

        let backoff = timing::backoff(self.settings.settle);
        tracing::warn!(
            title = %chapter.title,
            reason = %first_fault,
            backoff = %timing::pretty_duration(backoff),
            "failed to get download link; retrying with a new session"
        );
        if let Err(reason) = self.reboot(slot).await {
            return failed(chapter, format!("{first_fault}; {reason}"));
        }
        let Some(session) = slot.session.as_deref_mut() else {
            return failed(chapter, "no render session".to_owned());
        };

        let preloaded = self.settings.preload_on_fail;
        let second = if preloaded {
            tracing::info!(title = %chapter.title, "preloading failed page");
            match session.navigate(href).await {
                Ok(()) => {
                    tokio::time::sleep(backoff).await;
                    resolve_link(session, href, true, &self.settings).await
                }
                Err(err) => ResolutionOutcome::RecoverableFault(format!("preload {href}: {err}")),
            }
        } else {
            resolve_link(session, href, false, &self.settings).await
        };

        match second {
            ResolutionOutcome::Resolved(link) => ResolutionResult::Resolved(link),
            ResolutionOutcome::RecoverableFault(reason) | ResolutionOutcome::TerminalFault(reason) => {
                // Leave a fresh session behind for the next chapter.
                if let Err(err) = self.reboot(slot).await {
                    tracing::warn!(%err, "session reboot after failed retry");
                } else {
                    tracing::info!("session rebooted");
                }
                failed(chapter, reason)
            }
        }
    }

    /// Terminates the current session, waits the backoff and launches a new one.
    async fn reboot(&self, slot: &mut SessionSlot) -> Result<(), String> {
        slot.terminate().await;
        tokio::time::sleep(timing::backoff(self.settings.settle)).await;
        self.launch_into(slot).await
    }

    async fn launch_into(&self, slot: &mut SessionSlot) -> Result<(), String> {
        match self.launcher.launch().await {
            Ok(session) => {
                slot.session = Some(session);
                Ok(())
            }
            Err(err) => {
                slot.session = None;
                Err(format!("launch render session: {err:#}"))
            }
        }
    }
}

fn failed(chapter: &Chapter, reason: String) -> ResolutionResult {
    ResolutionResult::Failed {
        chapter: chapter.clone(),
        reason,
    }
}

/// Persists the manifest, and the failure list when it is non-empty.
pub fn write_resolution(
    resolution: &Resolution,
    manifest_path: &Path,
    failed_path: &Path,
) -> anyhow::Result<()> {
    write_json_atomic(manifest_path, &resolution.manifest).context("write manifest")?;
    tracing::info!(path = %manifest_path.display(), "wrote manifest");

    if resolution.failures.is_empty() {
        match std::fs::remove_file(failed_path) {
            Ok(()) => tracing::debug!(path = %failed_path.display(), "removed stale failure list"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("remove stale failure list: {}", failed_path.display())
                });
            }
        }
        return Ok(());
    }

    write_json_atomic(failed_path, &resolution.failures).context("write failure list")?;
    tracing::warn!(
        count = resolution.failures.len(),
        path = %failed_path.display(),
        "failed to get download links for some chapters"
    );
    Ok(())
}

pub fn read_manifest(path: &Path) -> anyhow::Result<Manifest> {
    read_json(path).with_context(|| format!("read manifest: {}", path.display()))
}

pub fn read_failures(path: &Path) -> anyhow::Result<FailureSet> {
    read_json(path).with_context(|| format!("read failure list: {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).context("parse json")
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(&tmp_path, &data)
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::ManifestChapter;

    fn resolution(failures: FailureSet) -> Resolution {
        Resolution {
            manifest: vec![ManifestSection {
                title: "Intro".to_owned(),
                chapters: vec![ManifestChapter {
                    url: "https://cdn.example.com/v1.mp4".to_owned(),
                    title: "Welcome".to_owned(),
                    href: "https://example.com/c/welcome".to_owned(),
                }],
            }],
            failures,
            elapsed: Duration::ZERO,
            estimate: Duration::ZERO,
        }
    }

    #[test]
    fn writes_manifest_and_skips_empty_failures() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let manifest_path = temp.path().join("out").join("chapters.json");
        let failed_path = temp.path().join("failed.json");
        std::fs::write(&failed_path, "[]")?;

        write_resolution(&resolution(Vec::new()), &manifest_path, &failed_path)?;

        let manifest = read_manifest(&manifest_path)?;
        assert_eq!(manifest[0].chapters[0].title, "Welcome");
        assert!(!failed_path.exists(), "stale failure list should be removed");

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
        assert_eq!(
            raw[0]["chapters"][0]["href"],
            "https://example.com/c/welcome"
        );
        Ok(())
    }

    #[test]
    fn writes_failures_when_present() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let manifest_path = temp.path().join("chapters.json");
        let failed_path = temp.path().join("failed.json");
        let failures = vec![Chapter::new("https://example.com/c/broken", "Broken")];

        write_resolution(&resolution(failures.clone()), &manifest_path, &failed_path)?;

        assert_eq!(read_failures(&failed_path)?, failures);
        Ok(())
    }
}
