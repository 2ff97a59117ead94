use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::formats::Course;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default = "default_cookie_host")]
    pub cookie_host: String,
    #[serde(default)]
    pub application: ApplicationConfig,
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub webdriver_url: String,
    pub browser_binary: Option<String>,
    pub headless: bool,
    pub sidebar_selector: String,
    pub section_selector: String,
    pub section_title_selector: String,
    pub chapter_link_selector: String,
    pub chapter_title_selector: String,
    pub media_container_selector: String,
    pub media_element_selector: String,
    pub exclude_title_pattern: String,
    pub settle_interval_ms: u64,
    pub index_settle_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".to_owned(),
            browser_binary: None,
            headless: false,
            sidebar_selector: ".classroom-layout__sidebar".to_owned(),
            section_selector: "section.classroom-toc-section".to_owned(),
            section_title_selector: ".classroom-toc-section__toggle-title".to_owned(),
            chapter_link_selector: "a.classroom-toc-item__link".to_owned(),
            chapter_title_selector: ".classroom-toc-item__title".to_owned(),
            media_container_selector: ".classroom-layout__media".to_owned(),
            media_element_selector: "video.vjs-tech".to_owned(),
            exclude_title_pattern: "chapter quiz".to_owned(),
            settle_interval_ms: 5000,
            index_settle_ms: 1000,
        }
    }
}

impl RenderConfig {
    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn index_settle(&self) -> Duration {
        Duration::from_millis(self.index_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub download_enabled: bool,
    pub preload_on_fail: bool,
    pub output_dir: PathBuf,
    pub download_list_path: PathBuf,
    pub failed_list_path: PathBuf,
    pub logfile: Option<PathBuf>,
    pub download_concurrency: usize,
    pub download_timeout_secs: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            download_enabled: true,
            preload_on_fail: false,
            output_dir: PathBuf::from("downloads"),
            download_list_path: PathBuf::from("chapters.json"),
            failed_list_path: PathBuf::from("failed.json"),
            logfile: None,
            download_concurrency: 6,
            download_timeout_secs: 300,
        }
    }
}

fn default_cookie_host() -> String {
    ".www.linkedin.com".to_owned()
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let render = &self.render;
        for (name, value) in [
            ("render.sidebar_selector", &render.sidebar_selector),
            ("render.section_selector", &render.section_selector),
            ("render.section_title_selector", &render.section_title_selector),
            ("render.chapter_link_selector", &render.chapter_link_selector),
            ("render.chapter_title_selector", &render.chapter_title_selector),
            ("render.media_container_selector", &render.media_container_selector),
            ("render.media_element_selector", &render.media_element_selector),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{name} must not be empty");
            }
        }

        regex::RegexBuilder::new(&render.exclude_title_pattern)
            .case_insensitive(true)
            .build()
            .context("compile render.exclude_title_pattern")?;

        if self.application.download_concurrency == 0 {
            anyhow::bail!("application.download_concurrency must be at least 1");
        }

        for course in &self.courses {
            url::Url::parse(&course.url)
                .with_context(|| format!("invalid course url: {}", course.url))?;
        }

        Ok(())
    }

    pub fn course(&self, index: usize) -> anyhow::Result<&Course> {
        self.courses.get(index).ok_or_else(|| {
            anyhow::anyhow!(
                "course index {index} out of range ({} configured)",
                self.courses.len()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() -> anyhow::Result<()> {
        let config: Config =
            serde_json::from_str(r#"{"courses":[{"url":"https://example.com/learning/x"}]}"#)?;
        config.validate()?;

        assert_eq!(config.render.settle_interval(), Duration::from_secs(5));
        assert_eq!(config.render.exclude_title_pattern, "chapter quiz");
        assert_eq!(config.application.download_concurrency, 6);
        assert!(!config.application.preload_on_fail);
        assert_eq!(config.courses[0].title, None);
        Ok(())
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() -> anyhow::Result<()> {
        let config: Config = serde_json::from_str(
            r#"{
                "render": {"settle_interval_ms": 10},
                "cookies": {"li_at": "abc"},
                "application": {"preload_on_fail": true, "output_dir": "/tmp/out"},
                "courses": []
            }"#,
        )?;

        assert_eq!(config.render.settle_interval(), Duration::from_millis(10));
        assert_eq!(config.render.media_element_selector, "video.vjs-tech");
        assert_eq!(config.cookies.get("li_at").map(String::as_str), Some("abc"));
        assert!(config.application.preload_on_fail);
        assert!(config.application.download_enabled);
        assert_eq!(config.application.output_dir, PathBuf::from("/tmp/out"));
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_pattern_and_zero_concurrency() -> anyhow::Result<()> {
        let mut config: Config = serde_json::from_str(r#"{"courses":[]}"#)?;
        config.render.exclude_title_pattern = "(".to_owned();
        assert!(config.validate().is_err());

        config.render.exclude_title_pattern = "quiz".to_owned();
        config.application.download_concurrency = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("download_concurrency"));
        Ok(())
    }

    #[test]
    fn course_lookup_reports_range() -> anyhow::Result<()> {
        let config: Config = serde_json::from_str(r#"{"courses":[]}"#)?;
        let err = config.course(2).unwrap_err().to_string();
        assert!(err.contains("out of range"));
        Ok(())
    }
}
