use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    #[error(transparent)]
    #[diagnostic(code(terra_client::url_parse_error))]
    UrlParseError(#[from] url::ParseError),

    /// The registry responded 404 for this package name.
    #[error("Package `{0}` was not found in the registry.")]
    #[diagnostic(
        code(terra_client::package_not_found),
        help("Double-check the package name. If it's a private package, this registry may not know about it.")
    )]
    PackageNotFound(String),

    /// The registry responded with a non-2xx status other than 404.
    #[error("Registry request to {url} failed with status {status}.")]
    #[diagnostic(
        code(terra_client::registry_error),
        help("The registry may be having issues. Retrying the operation may help.")
    )]
    BadResponse {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The registry returned something that wasn't valid packument JSON.
    #[error("Failed to deserialize registry response for `{name}`.")]
    #[diagnostic(code(terra_client::bad_json))]
    BadJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Request failed.")]
    #[diagnostic(code(terra_client::request_error))]
    RequestError(#[from] reqwest::Error),

    #[error("Request failed.")]
    #[diagnostic(code(terra_client::request_middleware_error))]
    RequestMiddlewareError(#[from] reqwest_middleware::Error),

    /// Every packument in a batch failed to fetch.
    #[error("All {0} requested packuments failed to fetch.")]
    #[diagnostic(
        code(terra_client::all_packuments_failed),
        help("Check your network connection and registry configuration.")
    )]
    AllPackumentsFailed(usize),
}
