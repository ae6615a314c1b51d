use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error")]
    Configuration(#[from] ConfigError),

    #[error("failed to connect to the Kubernetes API server")]
    Connectivity(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("failed to list pods in {scope}")]
    Collection {
        scope: String,
        #[source]
        source: ListFailure,
    },

    #[error("image collection did not finish within {0:?}")]
    CollectionTimeout(Duration),

    #[error("failed to write targets file {}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Read(#[source] std::io::Error),

    #[error("unsupported config file format, must be JSON or YAML")]
    UnsupportedFormat,

    #[error("missing environment variable {0}")]
    MissingEnvVar(String),

    #[error("failed to parse YAML config")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("failed to parse JSON config")]
    Json(#[from] serde_json::Error),

    #[error("snyk_org_mapping.map_on is 'label' but no label name is set")]
    MissingLabel,

    #[error("invalid image exclusion pattern {pattern:?}")]
    InvalidExcludePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Failure of a single pod list request.
#[derive(Debug, Error)]
pub enum ListFailure {
    /// Retrying will not help, e.g. a 403 status or an undecodable response.
    #[error("request failed: {0}")]
    Rejected(String),

    /// Transport failure, or a 429 or 5xx status from the API server.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ListFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, ListFailure::Transient(_))
    }
}

impl From<kube::Error> for ListFailure {
    fn from(err: kube::Error) -> Self {
        let transient = match &err {
            kube::Error::Api(response) => response.code == 429 || response.code >= 500,
            kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::HttpError(_) => {
                true
            }
            _ => false,
        };
        if transient {
            ListFailure::Transient(err.to_string())
        } else {
            ListFailure::Rejected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(ListFailure::Transient("connection reset".into()).is_transient());
        assert!(!ListFailure::Rejected("forbidden".into()).is_transient());
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from API server", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_server_side_statuses_are_transient() {
        assert!(ListFailure::from(api_error(503, "ServiceUnavailable")).is_transient());
        assert!(ListFailure::from(api_error(500, "InternalError")).is_transient());
        assert!(ListFailure::from(api_error(429, "TooManyRequests")).is_transient());
    }

    #[test]
    fn test_client_side_statuses_are_not_transient() {
        let failure = ListFailure::from(api_error(403, "Forbidden"));
        assert!(!failure.is_transient());
        assert!(failure.to_string().contains("Forbidden"));
        assert!(!ListFailure::from(api_error(404, "NotFound")).is_transient());
    }

    #[test]
    fn test_decode_errors_are_not_transient() {
        let serde_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!ListFailure::from(kube::Error::SerdeError(serde_error)).is_transient());
    }

    #[test]
    fn test_collection_error_names_scope() {
        let err = Error::Collection {
            scope: "namespace payments".to_string(),
            source: ListFailure::Rejected("forbidden".to_string()),
        };
        assert_eq!(err.to_string(), "failed to list pods in namespace payments");
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert!(chain.contains("forbidden"));
    }
}
