//! Time rules: the daily room cutoff and the image visibility window.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};

/// Rooms close at 03:00 Japan Standard Time (UTC+9), which is 18:00 UTC on
/// the previous calendar day.
const ROOM_CUTOFF_UTC_HOUR: i64 = 18;

/// Images stop rendering once their message is older than this many hours.
pub const IMAGE_VISIBILITY_HOURS: i64 = 24;

/// First room cutoff strictly after `created_at`, as an absolute UTC instant.
/// Computed once at creation and stored with the room; never re-evaluated
/// while the room lives.
pub fn room_expiry_after(created_at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = created_at.date_naive().and_time(NaiveTime::MIN).and_utc();
    let cutoff = midnight + TimeDelta::hours(ROOM_CUTOFF_UTC_HOUR);
    if created_at < cutoff {
        cutoff
    } else {
        cutoff + TimeDelta::days(1)
    }
}

/// Presentation-only visibility rule for image attachments, re-derived on
/// every render pass. The boundary is exclusive: a message exactly 24 hours
/// old still renders its image. Says nothing about whether the stored object
/// still exists.
pub fn image_expired(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(created_at) > TimeDelta::hours(IMAGE_VISIBILITY_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn at(rfc3339: &str) -> DateTime<Utc> {
        rfc3339.parse().expect("timestamp")
    }

    #[test]
    fn image_is_live_just_before_twenty_four_hours() {
        let created = at("2025-01-10T12:00:00Z");
        let now = created + TimeDelta::hours(24) - TimeDelta::milliseconds(1);
        assert!(!image_expired(created, now));
    }

    #[test]
    fn image_is_still_live_at_exactly_twenty_four_hours() {
        let created = at("2025-01-10T12:00:00Z");
        assert!(!image_expired(created, created + TimeDelta::hours(24)));
    }

    #[test]
    fn image_expires_just_after_twenty_four_hours() {
        let created = at("2025-01-10T12:00:00Z");
        let now = created + TimeDelta::hours(24) + TimeDelta::milliseconds(1);
        assert!(image_expired(created, now));
    }

    #[test]
    fn morning_utc_room_expires_the_same_utc_day() {
        assert_eq!(
            room_expiry_after(at("2025-01-10T10:00:00Z")),
            at("2025-01-10T18:00:00Z")
        );
    }

    #[test]
    fn evening_utc_room_expires_the_next_utc_day() {
        assert_eq!(
            room_expiry_after(at("2025-01-10T19:30:00Z")),
            at("2025-01-11T18:00:00Z")
        );
    }

    #[test]
    fn room_created_exactly_at_the_cutoff_gets_the_next_one() {
        assert_eq!(
            room_expiry_after(at("2025-01-10T18:00:00Z")),
            at("2025-01-11T18:00:00Z")
        );
    }

    #[test]
    fn cutoff_lands_on_three_in_the_morning_japan_time() {
        let jst = FixedOffset::east_opt(9 * 3600).expect("offset");
        let created = jst
            .with_ymd_and_hms(2025, 3, 1, 2, 59, 0)
            .single()
            .expect("local time")
            .with_timezone(&Utc);
        let expiry = room_expiry_after(created).with_timezone(&jst);
        assert_eq!(expiry.time(), NaiveTime::from_hms_opt(3, 0, 0).expect("time"));
        assert_eq!(expiry.date_naive().to_string(), "2025-03-01");
    }
}
