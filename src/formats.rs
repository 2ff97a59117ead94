use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Course {
    /// Configured title, or the last non-empty path segment of the course url.
    pub fn display_title(&self) -> String {
        if let Some(title) = self.title.as_deref().map(str::trim)
            && !title.is_empty()
        {
            return title.to_owned();
        }

        Url::parse(&self.url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| self.url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    href: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
}

impl Chapter {
    pub fn new(href: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            title: title.into(),
            resolved_url: None,
        }
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    /// Records the resolved asset url and the title read from the live page.
    pub fn mark_resolved(&mut self, link: &ResolvedLink) {
        self.resolved_url = Some(link.url.clone());
        self.title = link.title.clone();
    }

    /// Manifest row for a resolved chapter; `None` until `mark_resolved`.
    pub fn manifest_entry(&self) -> Option<ManifestChapter> {
        self.resolved_url.as_ref().map(|url| ManifestChapter {
            url: url.clone(),
            title: self.title.clone(),
            href: self.href.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SectionRecord")]
pub struct Section {
    title: String,
    chapters: Vec<Chapter>,
    chapter_count: usize,
}

impl Section {
    pub fn new(title: impl Into<String>, chapters: Vec<Chapter>) -> Self {
        let chapter_count = chapters.len();
        Self {
            title: title.into(),
            chapters,
            chapter_count,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn chapter_count(&self) -> usize {
        self.chapter_count
    }

    pub fn into_parts(self) -> (String, Vec<Chapter>) {
        (self.title, self.chapters)
    }
}

#[derive(Deserialize)]
struct SectionRecord {
    title: String,
    chapters: Vec<Chapter>,
}

impl From<SectionRecord> for Section {
    fn from(record: SectionRecord) -> Self {
        Section::new(record.title, record.chapters)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseIndex {
    pub sections: Vec<Section>,
    pub chapter_count: usize,
}

impl CourseIndex {
    pub fn new(sections: Vec<Section>) -> Self {
        let chapter_count = sections.iter().map(Section::chapter_count).sum();
        Self {
            sections,
            chapter_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLink {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Resolved(ResolvedLink),
    Failed { chapter: Chapter, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub url: String,
    pub title: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSection {
    pub title: String,
    pub chapters: Vec<ManifestChapter>,
}

pub type Manifest = Vec<ManifestSection>;

pub type FailureSet = Vec<Chapter>;
