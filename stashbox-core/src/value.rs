//! Expiry arithmetic shared by backends.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Converts a TTL into an absolute deadline. `None` means no expiry.
pub fn deadline_from_ttl(ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| {
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        Utc::now().checked_add_signed(ttl)
    })
}

/// Returns `true` once a deadline has passed.
pub fn is_past(deadline: Option<DateTime<Utc>>) -> bool {
    matches!(deadline, Some(deadline) if deadline <= Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_ttl_means_no_deadline() {
        assert_eq!(deadline_from_ttl(None), None);
        assert!(!is_past(None));
    }

    #[test]
    fn future_deadline_is_not_past() {
        let deadline = deadline_from_ttl(Some(Duration::from_secs(60)));
        assert!(deadline.is_some());
        assert!(!is_past(deadline));
        assert!(is_past(Some(Utc::now() - chrono::Duration::seconds(1))));
    }
}
