//! Subscription expiry arithmetic.
//!
//! Expiries are persisted as `YYYY-MM-DD HH:MM:SS` strings in UTC, which keeps
//! them lexicographically comparable in the store.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

pub const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Days added for the admin identity's effectively permanent entitlement.
/// Also the longest duration a voucher may carry.
pub const PERMANENT_DAYS: i64 = 36500;

/// Latest storable expiry. Later instants would need a five-digit year and
/// break the lexicographic ordering of stored expiries.
pub fn max_expiry() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn extend(anchor: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    let ceiling = max_expiry();

    Duration::try_days(days)
        .and_then(|duration| anchor.checked_add_signed(duration))
        .map_or(ceiling, |expiry| expiry.min(ceiling))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Grant {
    /// Recomputed from `now` on every call.
    Permanent,
    /// `Days(0)` behaves like `Revoke`.
    Days(u32),
    Revoke,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub expires_at: DateTime<Utc>,
    pub subscribed: bool,
}

impl Subscription {
    pub fn expiry_string(&self) -> String {
        format_expiry(self.expires_at)
    }
}

pub fn format_expiry(at: DateTime<Utc>) -> String {
    at.format(EXPIRY_FORMAT).to_string()
}

pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), EXPIRY_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Computes the subscription that results from applying `grant` to the stored
/// expiry at `now`. A malformed stored expiry is treated as absent.
pub fn apply(current: Option<&str>, grant: Grant, now: DateTime<Utc>) -> Subscription {
    match grant {
        Grant::Permanent => Subscription {
            expires_at: extend(now, PERMANENT_DAYS),
            subscribed: true,
        },
        Grant::Days(days) if days > 0 => {
            let anchor = current
                .and_then(parse_expiry)
                .map_or(now, |expiry| expiry.max(now));

            Subscription {
                expires_at: extend(anchor, i64::from(days)),
                subscribed: true,
            }
        }
        Grant::Days(_) | Grant::Revoke => Subscription {
            expires_at: now,
            subscribed: false,
        },
    }
}

/// Whether a stored expiry has lapsed. Unparseable values count as lapsed.
pub fn is_lapsed(stored: Option<&str>, now: DateTime<Utc>) -> bool {
    match stored.and_then(parse_expiry) {
        Some(expiry) => expiry < now,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn grant_stacks_on_future_expiry() {
        let current = format_expiry(now() + Duration::days(5));
        let sub = apply(Some(&current), Grant::Days(10), now());

        assert!(sub.subscribed);
        assert_eq!(sub.expires_at, now() + Duration::days(15));
    }

    #[test]
    fn grant_starts_fresh_after_expiry() {
        let current = format_expiry(now() - Duration::days(3));
        let sub = apply(Some(&current), Grant::Days(10), now());

        assert_eq!(sub.expires_at, now() + Duration::days(10));
    }

    #[test]
    fn grant_starts_fresh_when_never_subscribed() {
        let sub = apply(None, Grant::Days(30), now());

        assert!(sub.subscribed);
        assert_eq!(sub.expires_at, now() + Duration::days(30));
    }

    #[test]
    fn malformed_expiry_anchors_at_now() {
        let sub = apply(Some("next tuesday"), Grant::Days(7), now());

        assert_eq!(sub.expires_at, now() + Duration::days(7));
    }

    #[test]
    fn zero_days_revokes() {
        let current = format_expiry(now() + Duration::days(5));

        for grant in [Grant::Days(0), Grant::Revoke] {
            let sub = apply(Some(&current), grant, now());
            assert!(!sub.subscribed);
            assert_eq!(sub.expires_at, now());
        }
    }

    #[test]
    fn permanent_grant_ignores_stored_expiry() {
        let current = format_expiry(now() + Duration::days(900_000));
        let sub = apply(Some(&current), Grant::Permanent, now());

        assert!(sub.subscribed);
        assert_eq!(sub.expires_at, now() + Duration::days(PERMANENT_DAYS));
    }

    #[test]
    fn expiry_format_round_trips_and_sorts() {
        let earlier = format_expiry(now());
        let later = format_expiry(now() + Duration::hours(1));

        assert_eq!(earlier, "2025-03-01 12:00:00");
        assert_eq!(parse_expiry(&earlier), Some(now()));
        assert!(earlier < later);
    }

    #[test]
    fn oversized_grants_clamp_to_the_latest_storable_expiry() {
        let current = format_expiry(now() + Duration::days(30));

        for days in [3_000_000, 200_000_000, u32::MAX] {
            let sub = apply(Some(&current), Grant::Days(days), now());

            assert!(sub.subscribed);
            assert_eq!(sub.expires_at, max_expiry());
            let stored = sub.expiry_string();
            assert_eq!(stored, "9999-12-31 23:59:59");
            assert!(stored > format_expiry(now()));
        }
    }

    #[test]
    fn grant_on_clamped_expiry_stays_clamped() {
        let current = format_expiry(max_expiry());
        let sub = apply(Some(&current), Grant::Days(10), now());

        assert_eq!(sub.expires_at, max_expiry());
    }

    #[test]
    fn lapsed_detection() {
        let past = format_expiry(now() - Duration::hours(1));
        let future = format_expiry(now() + Duration::hours(1));

        assert!(is_lapsed(Some(&past), now()));
        assert!(!is_lapsed(Some(&future), now()));
        assert!(is_lapsed(Some("garbage"), now()));
        assert!(is_lapsed(None, now()));
    }
}
