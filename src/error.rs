/// Errors from configuration loading and outbound service calls.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} error: {detail}")]
    Upstream {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[error("Invalid credits pack: {0}")]
    InvalidPack(u32),
}

const DETAIL_LIMIT: usize = 512;

/// Cap upstream error bodies before they reach logs or responses.
pub(crate) fn truncate_detail(text: &str) -> String {
    if text.chars().count() <= DETAIL_LIMIT {
        return text.to_string();
    }
    let truncated: String = text.chars().take(DETAIL_LIMIT).collect();
    format!("{truncated}…")
}
