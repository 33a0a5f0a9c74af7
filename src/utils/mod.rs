//! Small shared helpers.

use uuid::Uuid;

/// Fresh unique id for one run, used to correlate events and logs.
#[must_use]
pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4())
}
