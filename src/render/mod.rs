//! Rendered-browser capability used by the index builder and the link resolver.
//!
//! The pipeline only depends on [`RenderSession`] and [`SessionLauncher`]; the
//! WebDriver backend in [`webdriver`] is one implementation of them.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RenderError;

pub mod webdriver;

/// Opaque handle to an element inside the page currently loaded by a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// One exclusive browser tab. Any call may fail once the browser crashes or
/// hangs; callers treat such a session as dead and launch a new one.
#[async_trait]
pub trait RenderSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError>;

    /// Finds the first match for `selector`, searching inside `scope` when given.
    async fn find(
        &mut self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Option<ElementRef>, RenderError>;

    async fn find_all(
        &mut self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementRef>, RenderError>;

    async fn text(&mut self, element: &ElementRef) -> Result<String, RenderError>;

    async fn attribute(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError>;

    async fn title(&mut self) -> Result<String, RenderError>;

    async fn inject_cookie(&mut self, cookie: &Cookie) -> Result<(), RenderError>;

    async fn terminate(&mut self) -> Result<(), RenderError>;
}

/// Acquires fresh sessions, already carrying the stored session cookies.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn RenderSession>>;
}

/// Builds the cookie list injected into every new session.
pub fn session_cookies<'a>(
    cookies: impl IntoIterator<Item = (&'a String, &'a String)>,
    domain: &str,
) -> Vec<Cookie> {
    cookies
        .into_iter()
        .map(|(name, value)| Cookie {
            name: name.clone(),
            value: value.clone(),
            domain: domain.to_owned(),
            path: "/".to_owned(),
        })
        .collect()
}
