//! URL-based confirmation

use std::time::Duration;

use glob::Pattern;
use tracing::{info, warn};

use crate::domain::confirm::UrlCheck;
use crate::domain::Environment;
use crate::error::{DeployError, Result};
use crate::remote::{Clock, HttpProbe, Poller};

pub const URL_STEP: Duration = Duration::from_secs(15);

/// Polls `endpoint/check_url` until its body matches the rendered expectation
///
/// Surrounding whitespace is trimmed from the body before matching, so an
/// exact expectation accepts a version printed with a trailing newline.
/// Connection problems are logged and retried until the timeout.
pub fn confirm(
    http: &dyn HttpProbe,
    clock: &dyn Clock,
    check: &UrlCheck,
    endpoint: &str,
    environment: &Environment,
) -> Result<()> {
    let expected = environment.render(&check.expect)?;
    let pattern = Pattern::new(&expected).map_err(|e| DeployError::BadPattern {
        pattern: expected.clone(),
        message: e.to_string(),
    })?;
    let url = UrlCheck::url_for(endpoint, &check.check_url);

    for attempt in Poller::new(clock, check.timeout, URL_STEP) {
        info!(url = %url, attempt, "Asking server for its version");
        match http.get(&url) {
            Ok(body) => {
                let body = body.trim();
                if pattern.matches(body) {
                    info!(url = %url, version = %body, "Server gave back the expected version");
                    return Ok(());
                }
                info!(got = %body, expected = %expected, "Still waiting for the new version");
            }
            Err(e) => warn!(url = %url, error = %e, "Failed to reach the server"),
        }
    }

    Err(DeployError::Timeout {
        what: format!("{} to give back {}", url, expected),
        timeout: check.timeout,
    })
}
