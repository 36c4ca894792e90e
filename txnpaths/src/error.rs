/// Errors a `TransactionSource` can return.
///
/// The tracer recovers from all of these locally; they only reach callers that
/// talk to a source directly.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("explorer API error: {0}")]
    Api(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("frame error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_become_malformed() {
        let err: SourceError = serde_json::from_str::<u64>("nope").unwrap_err().into();
        assert!(matches!(err, SourceError::Malformed(_)));
        assert!(err.to_string().starts_with("malformed response"));
    }

    #[test]
    fn display_names_the_network() {
        let err = SourceError::UnsupportedNetwork("solana".into());
        assert_eq!(err.to_string(), "unsupported network: solana");
    }
}
