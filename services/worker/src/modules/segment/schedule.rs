use chrono::{DateTime, Duration, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;

/// Computes the next local midnight of a IANA timezone strictly after the
/// given instant, this is when relative date segments are recomputed
///
/// DST edges are handled: an ambiguous local midnight resolves to its
/// earliest occurrence and a skipped one slides forward an hour
pub fn next_local_midnight(timezone: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz: Tz = timezone.parse().ok()?;

    let local_date = after.with_timezone(&tz).date_naive();
    let next_midnight = local_date.succ_opt()?.and_hms_opt(0, 0, 0)?;

    let resolved = match tz.from_local_datetime(&next_midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(next_midnight + Duration::hours(1)))
            .earliest()?,
    };

    Some(resolved.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn new_york_midnight_during_standard_time() {
        // 2024-01-15 12:00Z is 07:00 EST, next local midnight is
        // 2024-01-16 00:00 EST = 05:00Z
        let next = next_local_midnight("America/New_York", utc(2024, 1, 15, 12, 0)).unwrap();
        assert_eq!(next, utc(2024, 1, 16, 5, 0));
    }

    #[test]
    fn new_york_midnight_during_daylight_saving() {
        // 2024-07-01 12:00Z is 08:00 EDT, next local midnight is
        // 2024-07-02 00:00 EDT = 04:00Z
        let next = next_local_midnight("America/New_York", utc(2024, 7, 1, 12, 0)).unwrap();
        assert_eq!(next, utc(2024, 7, 2, 4, 0));
    }

    #[test]
    fn result_is_strictly_in_the_future() {
        // exactly at local midnight, the next recompute is a day later
        let at_midnight = utc(2024, 1, 16, 5, 0);
        let next = next_local_midnight("America/New_York", at_midnight).unwrap();
        assert_eq!(next, utc(2024, 1, 17, 5, 0));
    }

    #[test]
    fn utc_workspaces_use_plain_utc_midnights() {
        let next = next_local_midnight("UTC", utc(2024, 6, 1, 12, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 2, 0, 0));
    }

    #[test]
    fn unknown_timezones_yield_none() {
        assert!(next_local_midnight("Mars/Olympus_Mons", Utc::now()).is_none());
    }
}
