use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortalError {
    /// Login rejected or the portal could not issue a session.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// Unexpected status or payload from a read endpoint.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The portal has not published the requested reading yet.
    #[error("no data available: {0}")]
    NoData(String),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PortalError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
