use thiserror::Error;

/// Failure reported by a render session primitive.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The session is gone or refused the command (crashed browser, stale handle).
    #[error("session error: {0}")]
    Session(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl RenderError {
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, Self::NoSuchElement(_))
    }
}

/// Index construction failures. All of them abort the course being indexed.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("course structure not found: {0}")]
    StructureNotFound(String),

    #[error("chapter link is missing its href: {0}")]
    MissingLinkAttribute(String),

    #[error(transparent)]
    Session(#[from] RenderError),
}

/// Per-chapter download failure. Never stops the download manager.
#[derive(Debug, Error)]
pub enum TransferFault {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No connection, response head or body bytes within the stall timeout.
    #[error("transfer stalled: nothing received for {0:?}")]
    Stalled(std::time::Duration),

    #[error("write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
