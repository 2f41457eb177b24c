//! Derivation of a workshop's status from its attendees.
//!
//! The derived status never claims more progress than the least-advanced
//! attendee. Precedence, highest first:
//!
//! 1. `deploying` if any attendee is deploying
//! 2. `failed` if any attendee failed
//! 3. `deleting` / `completed` when every attendee agrees
//! 4. `active` for everything else that is provisioned
//! 5. `planning` when there are no attendees

use super::Status;

/// Compute the workshop status implied by a multiset of attendee statuses.
pub fn derive_workshop_status<I>(attendee_statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut seen = 0usize;
    let mut deleting = 0usize;
    let mut completed = 0usize;
    let mut any_failed = false;

    for status in attendee_statuses {
        match status {
            Status::Deploying => return Status::Deploying,
            Status::Failed => any_failed = true,
            Status::Deleting => deleting += 1,
            Status::Completed => completed += 1,
            Status::Active => {}
            // Not a valid attendee status; it carries no progress.
            Status::Planning => continue,
        }
        seen += 1;
    }

    if any_failed {
        Status::Failed
    } else if seen == 0 {
        Status::Planning
    } else if deleting == seen {
        Status::Deleting
    } else if completed == seen {
        Status::Completed
    } else {
        Status::Active
    }
}
