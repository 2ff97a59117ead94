use std::time::Duration;

use anyhow::Context as _;
use regex::{Regex, RegexBuilder};

use crate::config::RenderConfig;
use crate::error::IndexError;
use crate::formats::{Chapter, Course, CourseIndex, Section};
use crate::render::{ElementRef, RenderSession};

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub sidebar_selector: String,
    pub section_selector: String,
    pub section_title_selector: String,
    pub chapter_link_selector: String,
    pub chapter_title_selector: String,
    pub exclude_title: Regex,
    pub settle: Duration,
}

impl IndexSettings {
    pub fn from_config(render: &RenderConfig) -> anyhow::Result<Self> {
        let exclude_title = RegexBuilder::new(&render.exclude_title_pattern)
            .case_insensitive(true)
            .build()
            .context("compile exclude_title_pattern")?;

        Ok(Self {
            sidebar_selector: render.sidebar_selector.clone(),
            section_selector: render.section_selector.clone(),
            section_title_selector: render.section_title_selector.clone(),
            chapter_link_selector: render.chapter_link_selector.clone(),
            chapter_title_selector: render.chapter_title_selector.clone(),
            exclude_title,
            settle: render.index_settle(),
        })
    }

    pub fn is_excluded(&self, title: &str) -> bool {
        self.exclude_title.is_match(title)
    }
}

/// Reads the course table of contents into ordered sections.
pub async fn build_index(
    session: &mut dyn RenderSession,
    course: &Course,
    settings: &IndexSettings,
) -> Result<CourseIndex, IndexError> {
    session.navigate(&course.url).await?;
    tokio::time::sleep(settings.settle).await;

    let sidebar = session
        .find(None, &settings.sidebar_selector)
        .await?
        .ok_or_else(|| {
            IndexError::StructureNotFound(format!(
                "content sidebar `{}` on {}",
                settings.sidebar_selector, course.url
            ))
        })?;

    let section_elements = session
        .find_all(Some(&sidebar), &settings.section_selector)
        .await?;
    if section_elements.is_empty() {
        return Err(IndexError::StructureNotFound(format!(
            "no sections `{}` on {}",
            settings.section_selector, course.url
        )));
    }

    let mut sections = Vec::with_capacity(section_elements.len());
    for (position, element) in section_elements.iter().enumerate() {
        let section = read_section(session, element, position, settings).await?;
        tracing::debug!(
            title = section.title(),
            chapters = section.chapter_count(),
            "indexed section"
        );
        sections.push(section);
    }

    Ok(CourseIndex::new(sections))
}

async fn read_section(
    session: &mut dyn RenderSession,
    element: &ElementRef,
    position: usize,
    settings: &IndexSettings,
) -> Result<Section, IndexError> {
    let title_element = session
        .find(Some(element), &settings.section_title_selector)
        .await?
        .ok_or_else(|| {
            IndexError::StructureNotFound(format!(
                "title `{}` of section #{}",
                settings.section_title_selector,
                position + 1
            ))
        })?;
    let title = session.text(&title_element).await?.trim().to_owned();

    let links = session
        .find_all(Some(element), &settings.chapter_link_selector)
        .await?;
    if links.is_empty() {
        return Err(IndexError::StructureNotFound(format!(
            "chapter links `{}` in section {title:?}",
            settings.chapter_link_selector
        )));
    }

    let mut chapters = Vec::with_capacity(links.len());
    for link in &links {
        let chapter_title = match session
            .find(Some(link), &settings.chapter_title_selector)
            .await?
        {
            Some(title_element) => session.text(&title_element).await?,
            None => session.text(link).await?,
        };
        let chapter_title = chapter_title.trim().to_owned();

        if settings.is_excluded(&chapter_title) {
            tracing::info!(title = %chapter_title, "skipping suspected quiz");
            continue;
        }

        let href = session
            .attribute(link, "href")
            .await?
            .map(|href| href.trim().to_owned())
            .filter(|href| !href.is_empty())
            .ok_or_else(|| {
                IndexError::MissingLinkAttribute(format!(
                    "{chapter_title:?} in section {title:?}"
                ))
            })?;

        chapters.push(Chapter::new(href, chapter_title));
    }

    Ok(Section::new(title, chapters))
}
