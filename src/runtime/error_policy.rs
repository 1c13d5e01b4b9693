//! # Error Policy
//!
//! Classification of watch stream errors and the restart delay each class
//! gets. Every dispatcher applies the same policy regardless of kind.

use crate::runtime::backoff::FibonacciBackoff;
use std::time::Duration;
use tracing::{error, warn};

/// Watch stream error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old, a relist fixes it
    Expired,
    /// 429 or storage reinitializing
    Throttled,
    /// 404: the kind is not served (missing API group)
    NotFound,
    /// Anything else (connection reset, decode failure, ...)
    Other,
}

impl WatchErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchErrorKind::Unauthorized => "unauthorized",
            WatchErrorKind::Expired => "expired",
            WatchErrorKind::Throttled => "throttled",
            WatchErrorKind::NotFound => "not-found",
            WatchErrorKind::Other => "other",
        }
    }
}

/// Classify a watch stream error from its debug rendering
///
/// 404 is checked before 401 since a plain-text 404 body surfaces as a decode
/// error whose chain also mentions the failed watch.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    let is_401 =
        (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found;
    let is_410 = error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone");
    let is_429 = error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests");

    if is_401 {
        WatchErrorKind::Unauthorized
    } else if is_410 {
        WatchErrorKind::Expired
    } else if is_429 {
        WatchErrorKind::Throttled
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Decide how long a dispatcher waits before relisting after `error_string`
///
/// Throttling and unknown errors advance `backoff`; an expired resource
/// version relists immediately.
pub fn watch_restart_delay(
    kind: &str,
    error_string: &str,
    backoff: &mut FibonacciBackoff,
    restart_delay: Duration,
) -> Duration {
    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!(
                resource.kind = kind,
                "Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!("Verify the kubed ClusterRole still grants list/watch on {}", kind);
            restart_delay
        }
        WatchErrorKind::Expired => {
            warn!(
                resource.kind = kind,
                error_type = "410",
                "Watch resource version expired, relisting"
            );
            Duration::ZERO
        }
        WatchErrorKind::Throttled => {
            let delay = backoff.next_backoff();
            warn!(
                resource.kind = kind,
                "API server throttling (429), backing off for {}ms before relisting",
                delay.as_millis()
            );
            delay
        }
        WatchErrorKind::NotFound => {
            warn!(
                resource.kind = kind,
                "{} is not served by the API server (404): {}", kind, error_string
            );
            restart_delay.max(backoff.next_backoff())
        }
        WatchErrorKind::Other => {
            error!(resource.kind = kind, "Watch stream error: {}", error_string);
            restart_delay.max(backoff.next_backoff())
        }
    }
}
