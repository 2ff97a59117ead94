use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};

use crate::config::Config;
use crate::error::RenderError;
use crate::render::{Cookie, ElementRef, RenderSession, SessionLauncher, session_cookies};

/// W3C element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Starts sessions on a chromedriver-compatible WebDriver endpoint.
#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    client: reqwest::Client,
    base_url: String,
    capabilities: Value,
    cookie_origin: String,
    cookies: Vec<Cookie>,
}

impl WebDriverLauncher {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("build webdriver http client")?;

        let render = &config.render;
        let mut args = vec!["--start-maximized".to_owned()];
        if render.headless {
            args.push("--headless=new".to_owned());
        }
        let mut chrome_options = json!({ "args": args });
        if let Some(binary) = render.browser_binary.as_deref()
            && let Some(obj) = chrome_options.as_object_mut()
        {
            obj.insert("binary".to_owned(), json!(binary));
        }

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": chrome_options,
                }
            }
        });

        let host = config.cookie_host.trim_start_matches('.');
        Ok(Self {
            client,
            base_url: render.webdriver_url.trim_end_matches('/').to_owned(),
            capabilities,
            cookie_origin: format!("https://{host}/"),
            cookies: session_cookies(&config.cookies, &config.cookie_host),
        })
    }

    /// Overrides the page opened before cookies are injected.
    pub fn with_cookie_origin(mut self, origin: impl Into<String>) -> Self {
        self.cookie_origin = origin.into();
        self
    }
}

#[async_trait]
impl SessionLauncher for WebDriverLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn RenderSession>> {
        let started = std::time::Instant::now();
        tracing::info!(endpoint = %self.base_url, "booting browser session");

        let endpoint = format!("{}/session", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&self.capabilities)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        let status = response.status();
        let raw = response.text().await.context("read new session response")?;
        if !status.is_success() {
            anyhow::bail!("webdriver refused new session ({status}): {raw}");
        }
        let value: Value = serde_json::from_str(&raw).context("parse new session response")?;
        let session_id = value
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("missing sessionId in new session response"))?;

        let mut session = WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{session_id}", self.base_url),
            terminated: false,
        };

        if !self.cookies.is_empty() {
            let injected = async {
                session
                    .navigate(&self.cookie_origin)
                    .await
                    .context("open cookie origin")?;
                for cookie in &self.cookies {
                    session
                        .inject_cookie(cookie)
                        .await
                        .with_context(|| format!("inject cookie {}", cookie.name))?;
                }
                anyhow::Ok(())
            }
            .await;

            if let Err(err) = injected {
                if let Err(term_err) = session.terminate().await {
                    tracing::debug!(%term_err, "terminate half-booted session");
                }
                return Err(err);
            }
        }

        tracing::info!(
            session_id,
            elapsed = %crate::timing::pretty_duration(started.elapsed()),
            "browser session booted"
        );
        Ok(Box::new(session))
    }
}

#[derive(Debug)]
pub struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    terminated: bool,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RenderError> {
        if self.terminated {
            return Err(RenderError::Session("session already terminated".to_owned()));
        }

        let url = format!("{}{path}", self.session_url);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| RenderError::Transport(format!("{method} {url}: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| RenderError::Transport(format!("read {url}: {err}")))?;
        let value: Value = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw)
                .map_err(|err| RenderError::Transport(format!("parse {url}: {err}")))?
        };

        if !status.is_success() {
            return Err(classify_error(status.as_u16(), &value));
        }
        Ok(value.get("value").cloned().unwrap_or(Value::Null))
    }

    fn element_path(scope: Option<&ElementRef>, command: &str) -> String {
        match scope {
            Some(element) => format!("/element/{}/{command}", element.0),
            None => format!("/{command}"),
        }
    }
}

fn classify_error(status: u16, value: &Value) -> RenderError {
    let error = value
        .pointer("/value/error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .pointer("/value/message")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match error {
        "no such element" | "stale element reference" => {
            RenderError::NoSuchElement(format!("{error}: {message}"))
        }
        _ => RenderError::Session(format!("HTTP {status} {error}: {message}")),
    }
}

fn element_from_value(value: &Value) -> Result<ElementRef, RenderError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_owned()))
        .ok_or_else(|| RenderError::Session(format!("malformed element reference: {value}")))
}

#[async_trait]
impl RenderSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), RenderError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find(
        &mut self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Option<ElementRef>, RenderError> {
        let body = json!({ "using": "css selector", "value": selector });
        match self
            .command(Method::POST, &Self::element_path(scope, "element"), Some(body))
            .await
        {
            Ok(value) => element_from_value(&value).map(Some),
            Err(err) if err.is_no_such_element() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn find_all(
        &mut self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementRef>, RenderError> {
        let body = json!({ "using": "css selector", "value": selector });
        let value = self
            .command(Method::POST, &Self::element_path(scope, "elements"), Some(body))
            .await?;
        let Some(items) = value.as_array() else {
            return Err(RenderError::Session(format!(
                "expected element array, got: {value}"
            )));
        };
        items.iter().map(element_from_value).collect()
    }

    async fn text(&mut self, element: &ElementRef) -> Result<String, RenderError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.0), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_owned())
    }

    async fn attribute(
        &mut self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        // Properties carry the resolved value (absolute `src`, `href`); fall back
        // to the raw attribute when the property is unset.
        for kind in ["property", "attribute"] {
            let value = self
                .command(
                    Method::GET,
                    &format!("/element/{}/{kind}/{name}", element.0),
                    None,
                )
                .await?;
            if let Some(text) = value.as_str() {
                return Ok(Some(text.to_owned()));
            }
        }
        Ok(None)
    }

    async fn title(&mut self) -> Result<String, RenderError> {
        let value = self.command(Method::GET, "/title", None).await?;
        Ok(value.as_str().unwrap_or_default().to_owned())
    }

    async fn inject_cookie(&mut self, cookie: &Cookie) -> Result<(), RenderError> {
        self.command(Method::POST, "/cookie", Some(json!({ "cookie": cookie })))
            .await?;
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), RenderError> {
        if self.terminated {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await;
        self.terminated = true;
        result.map(|_| ())
    }
}
