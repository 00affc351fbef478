//! Queue-based confirmation
//!
//! Instances post `result:instance_id:output` reports to a queue once their
//! deployment finishes. The check drains the queue on every attempt and
//! matches each report's output against the expected version.

use std::collections::BTreeSet;
use std::time::Duration;

use glob::Pattern;
use tracing::{debug, error, info, warn};

use crate::domain::confirm::{DeploymentMessage, QueueCheck};
use crate::domain::Environment;
use crate::error::{DeployError, Result};
use crate::remote::clock::to_chrono;
use crate::remote::retry::{throttled, DESCRIBE_BACKOFF};
use crate::remote::{Clock, MessageQueue, Poller};

/// Pause between drain attempts
pub const QUEUE_STEP: Duration = Duration::from_secs(5);

/// Longest time spent emptying the queue in one attempt
pub const DRAIN_LIMIT: Duration = Duration::from_secs(60);

/// Pause after each received message
pub const DRAIN_PAUSE: Duration = Duration::from_secs(2);

/// Receives and deletes waiting messages one at a time
fn drain(queues: &dyn MessageQueue, clock: &dyn Clock, queue: &str) -> Result<Vec<String>> {
    let started = clock.now();
    let mut bodies = Vec::new();

    while clock.now() - started < to_chrono(DRAIN_LIMIT) {
        let depth = throttled(clock, DESCRIBE_BACKOFF, "queue_depth", || queues.depth(queue))?;
        if depth == 0 {
            break;
        }

        let received = throttled(clock, DESCRIBE_BACKOFF, "receive_message", || {
            queues.receive(queue, 1)
        })?;
        for message in received {
            throttled(clock, DESCRIBE_BACKOFF, "delete_message", || {
                queues.delete_message(queue, &message.receipt)
            })?;
            bodies.push(message.body);
        }
        clock.sleep(DRAIN_PAUSE);
    }
    Ok(bodies)
}

/// Waits for every instance to report the expected version
pub fn confirm(
    queues: &dyn MessageQueue,
    clock: &dyn Clock,
    check: &QueueCheck,
    instances: &[String],
    environment: &Environment,
) -> Result<()> {
    let expected = environment.render(&check.version_message)?;
    let pattern = Pattern::new(&expected).map_err(|e| DeployError::BadPattern {
        pattern: expected.clone(),
        message: e.to_string(),
    })?;
    let wanted: BTreeSet<&str> = instances.iter().map(String::as_str).collect();

    info!(queue = %check.queue, expected = %expected, instances = %instances.join(","), "Checking queue for deployment reports");

    let mut success = BTreeSet::new();
    let mut failed = BTreeSet::new();
    for attempt in Poller::new(clock, check.timeout, QUEUE_STEP) {
        for body in drain(queues, clock, &check.queue)? {
            let Some(message) = DeploymentMessage::decode(&body) else {
                warn!(body = %body, "Ignoring malformed deployment message");
                continue;
            };
            info!(instance = %message.instance_id, output = %message.output, "Message received");

            if !wanted.contains(message.instance_id.as_str()) {
                debug!(instance = %message.instance_id, "Instance is not part of this deployment");
                continue;
            }

            if pattern.matches(&message.output) {
                info!(instance = %message.instance_id, "Deployed instance");
                success.insert(message.instance_id);
            } else {
                error!(instance = %message.instance_id, output = %message.output, "Failed to deploy instance");
                failed.insert(message.instance_id);
            }
        }

        let reported = success.len() + failed.iter().filter(|i| !success.contains(*i)).count();
        if reported >= wanted.len() {
            break;
        }
        info!(attempt, "Completed attempt at checking for a valid deployment state");
    }

    if !failed.is_empty() {
        return Err(DeployError::FailedInstances {
            failed: failed.into_iter().collect(),
        });
    }
    if success.is_empty() {
        return Err(DeployError::NoMessages {
            queue: check.queue.clone(),
        });
    }

    let missing: Vec<&str> = wanted
        .iter()
        .filter(|instance| !success.contains(**instance))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(DeployError::Timeout {
            what: format!("deployment reports from {}", missing.join(", ")),
            timeout: check.timeout,
        });
    }

    info!(expected = %expected, "All instances have been confirmed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryCloud;
    use crate::remote::ManualClock;
    use std::rc::Rc;

    fn setup() -> (Rc<ManualClock>, MemoryCloud) {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock.clone());
        (clock, cloud)
    }

    fn check() -> QueueCheck {
        QueueCheck {
            queue: "deploys".into(),
            version_message: "{VERSION}".into(),
            timeout: Duration::from_secs(60),
        }
    }

    fn instances() -> Vec<String> {
        vec!["i-1".into(), "i-2".into()]
    }

    fn environment() -> Environment {
        [("VERSION", "v9")].into_iter().collect()
    }

    #[test]
    fn all_instances_report_success() {
        let (clock, cloud) = setup();
        cloud.send("deploys", "success:i-1:v9");
        cloud.send("deploys", r#"{"Message": "success:i-2:v9"}"#);

        confirm(&cloud, &*clock, &check(), &instances(), &environment()).unwrap();
        assert_eq!(cloud.count("delete_message"), 2);
        assert_eq!(clock.sleeps(), vec![DRAIN_PAUSE, DRAIN_PAUSE]);
    }

    #[test]
    fn mismatched_versions_are_failures() {
        let (clock, cloud) = setup();
        cloud.send("deploys", "success:i-1:v9");
        cloud.send("deploys", "fail:i-2:v8");

        let err = confirm(&cloud, &*clock, &check(), &instances(), &environment()).unwrap_err();
        match err {
            DeployError::FailedInstances { failed } => assert_eq!(failed, vec!["i-2"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn silence_is_its_own_failure() {
        let (clock, cloud) = setup();
        cloud.send("deploys", "success:i-other:v9");

        let err = confirm(&cloud, &*clock, &check(), &instances(), &environment()).unwrap_err();
        assert!(matches!(err, DeployError::NoMessages { ref queue } if queue == "deploys"));
    }

    #[test]
    fn late_reports_are_picked_up() {
        let (clock, cloud) = setup();
        cloud.send("deploys", "success:i-1:v9");
        cloud.send_at(
            "deploys",
            "success:i-2:v9",
            clock.now() + chrono::Duration::seconds(20),
        );

        confirm(&cloud, &*clock, &check(), &instances(), &environment()).unwrap();
    }

    #[test]
    fn malformed_messages_are_skipped() {
        let (clock, cloud) = setup();
        cloud.send("deploys", "garbage");
        cloud.send("deploys", "success:i-1:v9");
        cloud.send("deploys", "success:i-2:v9");

        confirm(&cloud, &*clock, &check(), &instances(), &environment()).unwrap();
    }

    #[test]
    fn partial_reports_time_out() {
        let (clock, cloud) = setup();
        cloud.send("deploys", "success:i-1:v9");

        let err = confirm(&cloud, &*clock, &check(), &instances(), &environment()).unwrap_err();
        assert!(matches!(err, DeployError::Timeout { ref what, .. } if what.contains("i-2")));
    }
}
