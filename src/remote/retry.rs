//! Throttle retry
//!
//! Only [`RemoteError::Throttled`] is retried. Everything else, success or
//! failure, goes straight back to the caller.

use std::time::Duration;

use tracing::info;

use super::clock::Clock;
use super::RemoteError;

/// Pause after a throttled describe call
pub const DESCRIBE_BACKOFF: Duration = Duration::from_millis(500);

/// Pause after a throttled event listing
pub const EVENTS_BACKOFF: Duration = Duration::from_secs(1);

/// Runs `call` until it stops being throttled
///
/// There is no attempt limit; callers sit inside loops that are bounded by
/// their own timeout.
pub fn throttled<T>(
    clock: &dyn Clock,
    backoff: Duration,
    what: &str,
    mut call: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    loop {
        match call() {
            Err(RemoteError::Throttled) => {
                info!(call = what, "Was throttled, waiting a bit");
                clock.sleep(backoff);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::clock::ManualClock;
    use std::cell::Cell;

    #[test]
    fn retries_until_not_throttled() {
        let clock = ManualClock::default();
        let calls = Cell::new(0);

        let result = throttled(&clock, DESCRIBE_BACKOFF, "describe", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(RemoteError::Throttled)
            } else {
                Ok("done")
            }
        });

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
        assert_eq!(clock.sleeps(), vec![DESCRIBE_BACKOFF, DESCRIBE_BACKOFF]);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let clock = ManualClock::default();
        let calls = Cell::new(0);

        let result: Result<(), _> = throttled(&clock, EVENTS_BACKOFF, "events", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::NotFound("app".into()))
        });

        assert_eq!(result, Err(RemoteError::NotFound("app".into())));
        assert_eq!(calls.get(), 1);
        assert!(clock.sleeps().is_empty());
    }
}
