use http::{Method, StatusCode};
use std::fmt::Debug;

use crate::{ResponseBody, RouteKey};

/// What a hook is told about the request it observes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Request method
    pub method: Method,
    /// Path relative to the versioned API base
    pub path: String,
    /// Bucket the request was queued under
    pub route: RouteKey,
    /// Zero for the first transmission, incremented on each 429 retry
    pub attempt: u32,
}

/// Observability callbacks invoked by the [`crate::Dispatcher`].
///
/// Hooks see every transmission, including retries. They cannot influence
/// dispatch. All methods default to doing nothing.
pub trait DispatchHooks: Debug + Send + Sync {
    /// A request is about to be transmitted
    fn on_request(&self, _request: &RequestInfo) {}

    /// A response was received
    fn on_response(&self, _request: &RequestInfo, _status: StatusCode, _body: &ResponseBody) {}

    /// No response was received
    fn on_transport_error(&self, _request: &RequestInfo, _error: &reqwest::Error) {}
}
