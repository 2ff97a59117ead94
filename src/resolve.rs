use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::config::Config;
use crate::formats::ResolvedLink;
use crate::render::RenderSession;

#[derive(Debug, Clone)]
pub struct ResolveSettings {
    pub media_container_selector: String,
    pub media_element_selector: String,
    pub settle: Duration,
    pub preload_on_fail: bool,
}

impl ResolveSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_container_selector: config.render.media_container_selector.clone(),
            media_element_selector: config.render.media_element_selector.clone(),
            settle: config.render.settle_interval(),
            preload_on_fail: config.application.preload_on_fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Resolved(ResolvedLink),
    /// The page did not yield a link; a fresh session may succeed.
    RecoverableFault(String),
    /// Retrying cannot help (the chapter link itself is unusable).
    TerminalFault(String),
}

/// Reads the media source url and page title for one chapter.
///
/// With `preloaded` the page is assumed to be loaded already and no navigation
/// happens. The session is never replaced here: a `RecoverableFault` tells the
/// caller that the session should be rebooted before retrying.
pub async fn resolve_link(
    session: &mut dyn RenderSession,
    href: &str,
    preloaded: bool,
    settings: &ResolveSettings,
) -> ResolutionOutcome {
    if let Err(err) = Url::parse(href) {
        return ResolutionOutcome::TerminalFault(format!("invalid chapter link {href:?}: {err}"));
    }

    match extract_link(session, href, preloaded, settings).await {
        Ok(link) => ResolutionOutcome::Resolved(link),
        Err(err) => ResolutionOutcome::RecoverableFault(format!("{err:#}")),
    }
}

async fn extract_link(
    session: &mut dyn RenderSession,
    href: &str,
    preloaded: bool,
    settings: &ResolveSettings,
) -> anyhow::Result<ResolvedLink> {
    if !preloaded {
        session
            .navigate(href)
            .await
            .with_context(|| format!("open {href}"))?;
    }

    tokio::time::sleep(settings.settle).await;

    let container = session
        .find(None, &settings.media_container_selector)
        .await
        .context("find media container")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "media container `{}` not found on {href}",
                settings.media_container_selector
            )
        })?;

    let media = session
        .find(Some(&container), &settings.media_element_selector)
        .await
        .context("find media element")?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "media element `{}` not found on {href}",
                settings.media_element_selector
            )
        })?;

    let url = session
        .attribute(&media, "src")
        .await
        .context("read media source")?
        .map(|src| src.trim().to_owned())
        .filter(|src| !src.is_empty())
        .ok_or_else(|| anyhow::anyhow!("media source not found on {href}"))?;

    let title = session.title().await.context("read page title")?;
    let title = title.trim();
    if title.is_empty() {
        anyhow::bail!("page title is empty on {href}");
    }

    Ok(ResolvedLink {
        url,
        title: title.to_owned(),
    })
}
