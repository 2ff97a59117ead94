use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coursegrab::error::RenderError;
use coursegrab::render::{Cookie, ElementRef, RenderSession, SessionLauncher};

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub selector: String,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_owned(),
            ..Self::default()
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_owned();
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub title: String,
    pub nodes: Vec<Node>,
}

#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Launch(usize),
    Navigate(usize, String),
    Cookie(usize, String),
    Terminate(usize),
}

#[derive(Default)]
struct Shared {
    pages: HashMap<String, Page>,
    faults: HashMap<String, usize>,
    failing_launches: usize,
    events: Vec<Event>,
    sessions: usize,
}

/// In-memory browser: pages are node trees matched by exact selector string.
/// A scheduled fault makes the next navigation to a url render an empty page.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    shared: Arc<Mutex<Shared>>,
}

#[allow(dead_code)]
impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, url: &str, page: Page) {
        self.shared
            .lock()
            .expect("lock fake browser")
            .pages
            .insert(url.to_owned(), page);
    }

    pub fn fault(&self, url: &str, times: usize) {
        self.shared
            .lock()
            .expect("lock fake browser")
            .faults
            .insert(url.to_owned(), times);
    }

    pub fn fail_launches(&self, times: usize) {
        self.shared.lock().expect("lock fake browser").failing_launches = times;
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.lock().expect("lock fake browser").events.clone()
    }

    pub fn launches(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Launch(_)))
            .count()
    }

    pub fn terminations(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Terminate(_)))
            .count()
    }

    pub fn navigations_to(&self, url: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Navigate(_, u) if u == url))
            .count()
    }

    /// Opens a session directly, bypassing the launcher bookkeeping checks.
    pub async fn session(&self) -> Box<dyn RenderSession> {
        self.launch().await.expect("launch fake session")
    }
}

#[async_trait]
impl SessionLauncher for FakeBrowser {
    async fn launch(&self) -> anyhow::Result<Box<dyn RenderSession>> {
        let mut shared = self.shared.lock().expect("lock fake browser");
        if shared.failing_launches > 0 {
            shared.failing_launches -= 1;
            anyhow::bail!("browser failed to start");
        }
        shared.sessions += 1;
        let id = shared.sessions;
        shared.events.push(Event::Launch(id));
        Ok(Box::new(FakeSession {
            id,
            shared: Arc::clone(&self.shared),
            current: None,
            terminated: false,
        }))
    }
}

struct FakeSession {
    id: usize,
    shared: Arc<Mutex<Shared>>,
    current: Option<Page>,
    terminated: bool,
}

impl FakeSession {
    fn live(&self) -> Result<&Page, RenderError> {
        if self.terminated {
            return Err(RenderError::Session("invalid session id".to_owned()));
        }
        self.current
            .as_ref()
            .ok_or_else(|| RenderError::Session("no page loaded".to_owned()))
    }

    fn node(&self, element: &ElementRef) -> Result<Node, RenderError> {
        let page = self.live()?;
        let path = decode(element)?;
        node_at(&page.nodes, &path)
            .cloned()
            .ok_or_else(|| RenderError::NoSuchElement(format!("stale element {}", element.0)))
    }

    fn search(&self, scope: Option<&ElementRef>, selector: &str) -> Result<Vec<ElementRef>, RenderError> {
        let page = self.live()?;
        let (nodes, prefix) = match scope {
            Some(element) => {
                let path = decode(element)?;
                let node = node_at(&page.nodes, &path).ok_or_else(|| {
                    RenderError::NoSuchElement(format!("stale element {}", element.0))
                })?;
                (&node.children, path)
            }
            None => (&page.nodes, Vec::new()),
        };

        let mut found = Vec::new();
        collect(nodes, &prefix, selector, &mut found);
        Ok(found.into_iter().map(|path| encode(&path)).collect())
    }
}

fn encode(path: &[usize]) -> ElementRef {
    let parts: Vec<String> = path.iter().map(usize::to_string).collect();
    ElementRef(format!("e-{}", parts.join("-")))
}

fn decode(element: &ElementRef) -> Result<Vec<usize>, RenderError> {
    element
        .0
        .trim_start_matches("e-")
        .split('-')
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| RenderError::Session(format!("bad element id {}", element.0)))
        })
        .collect()
}

fn node_at<'a>(nodes: &'a [Node], path: &[usize]) -> Option<&'a Node> {
    let (first, rest) = path.split_first()?;
    let mut node = nodes.get(*first)?;
    for index in rest {
        node = node.children.get(*index)?;
    }
    Some(node)
}

fn collect(nodes: &[Node], prefix: &[usize], selector: &str, out: &mut Vec<Vec<usize>>) {
    for (index, node) in nodes.iter().enumerate() {
        let mut path = prefix.to_vec();
        path.push(index);
        if node.selector == selector {
            out.push(path.clone());
        }
        collect(&node.children, &path, selector, out);
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        if self.terminated {
            return Err(RenderError::Session("invalid session id".to_owned()));
        }
        let mut shared = self.shared.lock().expect("lock fake browser");
        shared.events.push(Event::Navigate(self.id, url.to_owned()));

        let faulted = match shared.faults.get_mut(url) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        self.current = if faulted {
            Some(Page::default())
        } else {
            Some(shared.pages.get(url).cloned().unwrap_or_default())
        };
        Ok(())
    }

    async fn find(
        &mut self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Option<ElementRef>, RenderError> {
        Ok(self.search(scope, selector)?.into_iter().next())
    }

    async fn find_all(
        &mut self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementRef>, RenderError> {
        self.search(scope, selector)
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, RenderError> {
        Ok(self.node(element)?.text)
    }

    async fn attribute(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        Ok(self.node(element)?.attrs.get(name).cloned())
    }

    async fn title(&mut self) -> Result<String, RenderError> {
        Ok(self.live()?.title.clone())
    }

    async fn inject_cookie(&mut self, cookie: &Cookie) -> Result<(), RenderError> {
        self.shared
            .lock()
            .expect("lock fake browser")
            .events
            .push(Event::Cookie(self.id, cookie.name.clone()));
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), RenderError> {
        if !self.terminated {
            self.terminated = true;
            self.shared
                .lock()
                .expect("lock fake browser")
                .events
                .push(Event::Terminate(self.id));
        }
        Ok(())
    }
}

/// Course table of contents laid out with the default selectors.
/// Each chapter is `(title, href)`; an empty href omits the attribute.
#[allow(dead_code)]
pub fn course_page(sections: &[(&str, &[(&str, &str)])]) -> Page {
    let mut sidebar = Node::new(".classroom-layout__sidebar");
    for (title, chapters) in sections {
        let mut section = Node::new("section.classroom-toc-section")
            .child(Node::new(".classroom-toc-section__toggle-title").text(title));
        for (chapter_title, href) in chapters.iter() {
            let mut link = Node::new("a.classroom-toc-item__link")
                .child(Node::new(".classroom-toc-item__title").text(chapter_title));
            if !href.is_empty() {
                link = link.attr("href", href);
            }
            section = section.child(link);
        }
        sidebar = sidebar.child(section);
    }
    Page {
        title: "Course".to_owned(),
        nodes: vec![sidebar],
    }
}

/// Chapter page holding a video element with the given source.
#[allow(dead_code)]
pub fn chapter_page(title: &str, src: &str) -> Page {
    Page {
        title: title.to_owned(),
        nodes: vec![
            Node::new(".classroom-layout__media")
                .child(Node::new("video.vjs-tech").attr("src", src)),
        ],
    }
}
