use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use log::warn;

pub const ANCHOR_TIMEZONE: &str = "Asia/Ho_Chi_Minh";
pub const ANCHOR_STANDARD_OFFSET_HOURS: i32 = 7;
pub const ANCHOR_PERIOD_DAYS: i64 = 7;
const BUCKET_HOUR: i64 = 9;

/// Timezone every window instant is computed in. Falls back to a fixed
/// offset when the named zone can't be resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl WindowZone {
    pub fn resolve(name: &str, fallback_offset_hours: i32) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => WindowZone::Named(tz),
            Err(err) => {
                let offset = FixedOffset::east_opt(fallback_offset_hours * 3600)
                    .unwrap_or_else(|| Utc.fix());
                warn!("Timezone {name} unavailable ({err}); using fixed offset {offset}");
                WindowZone::Fixed(offset)
            }
        }
    }

    pub fn anchor() -> Self {
        Self::resolve(ANCHOR_TIMEZONE, ANCHOR_STANDARD_OFFSET_HOURS)
    }

    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            WindowZone::Named(tz) => instant.with_timezone(tz).naive_local(),
            WindowZone::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }

    pub fn instant(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let resolved = match self {
            WindowZone::Named(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            WindowZone::Fixed(offset) => offset
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        };
        // Only a DST gap lands here; treat the wall-clock time as UTC.
        resolved.unwrap_or_else(|| Utc.from_utc_datetime(&local))
    }

    fn midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        self.instant(date.and_time(NaiveTime::default()))
    }
}

/// Ingestion window: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Last instant that still belongs to the window.
    pub fn last_instant(&self) -> DateTime<Utc> {
        self.end - Duration::milliseconds(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPolicy {
    pub anchor: Weekday,
    pub min_elapsed: Duration,
    pub zone: WindowZone,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            anchor: Weekday::Tue,
            min_elapsed: Duration::days(5),
            zone: WindowZone::anchor(),
        }
    }
}

fn days_since(weekday: Weekday, anchor: Weekday) -> i64 {
    let current = weekday.num_days_from_monday() as i64;
    let anchor = anchor.num_days_from_monday() as i64;
    (current - anchor).rem_euclid(7)
}

/// Window anchored at the most recent `anchor` weekday 00:00 local. When less
/// than `min_elapsed` has passed since that anchor the window moves one
/// period back. The end is the anchor plus one period, capped at `reference`.
pub fn current_window(reference: DateTime<Utc>, policy: &WindowPolicy) -> TimeWindow {
    let zone = &policy.zone;
    let today = zone.local(reference).date();
    let mut anchor_date = today - Duration::days(days_since(today.weekday(), policy.anchor));

    if reference - zone.midnight(anchor_date) < policy.min_elapsed {
        anchor_date -= Duration::days(ANCHOR_PERIOD_DAYS);
    }

    let start = zone.midnight(anchor_date);
    let end = zone
        .midnight(anchor_date + Duration::days(ANCHOR_PERIOD_DAYS))
        .min(reference);
    TimeWindow { start, end }
}

/// Monday 09:00 local of the week containing `reference`. Every task created
/// in one run is stamped with this instant instead of its own completion time.
pub fn representative_bucket(reference: DateTime<Utc>, zone: &WindowZone) -> DateTime<Utc> {
    let today = zone.local(reference).date();
    let monday = today - Duration::days(days_since(today.weekday(), Weekday::Mon));
    zone.instant(monday.and_time(NaiveTime::default() + Duration::hours(BUCKET_HOUR)))
}

/// Monday 00:00 local through the last millisecond of the following Sunday,
/// for the week holding `bucket`. Both ends are inclusive.
pub fn bucket_week(bucket: DateTime<Utc>, zone: &WindowZone) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = zone.local(bucket).date();
    let monday = today - Duration::days(days_since(today.weekday(), Weekday::Mon));
    let next = monday + Duration::days(ANCHOR_PERIOD_DAYS);
    (
        zone.midnight(monday),
        zone.midnight(next) - Duration::milliseconds(1),
    )
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vn(date: &str, time: &str) -> DateTime<Utc> {
        let local = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M")
            .expect("valid local time");
        WindowZone::anchor().instant(local)
    }

    #[test]
    fn monday_night_run_covers_the_week_since_last_tuesday() {
        // 2025-10-13 is a Monday.
        let reference = vn("2025-10-13", "23:59");
        let window = current_window(reference, &WindowPolicy::default());
        assert_eq!(window.start, vn("2025-10-07", "00:00"));
        assert_eq!(window.end, reference);
    }

    #[test]
    fn run_shortly_after_anchor_carries_back_one_period() {
        let reference = vn("2025-10-14", "10:00");
        let window = current_window(reference, &WindowPolicy::default());
        assert_eq!(window.start, vn("2025-10-07", "00:00"));
        assert_eq!(window.end, vn("2025-10-14", "00:00"));
    }

    #[test]
    fn carry_back_applies_until_min_elapsed_is_reached() {
        let policy = WindowPolicy::default();
        let before = current_window(vn("2025-10-18", "23:59"), &policy);
        assert_eq!(before.start, vn("2025-10-07", "00:00"));

        let after = current_window(vn("2025-10-19", "00:00"), &policy);
        assert_eq!(after.start, vn("2025-10-14", "00:00"));
    }

    #[test]
    fn window_is_half_open() {
        let window = current_window(vn("2025-10-14", "10:00"), &WindowPolicy::default());
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
        assert!(window.contains(window.last_instant()));
    }

    #[test]
    fn bucket_is_monday_nine_local() {
        let zone = WindowZone::anchor();
        assert_eq!(
            representative_bucket(vn("2025-10-16", "15:30"), &zone),
            vn("2025-10-13", "09:00")
        );
        assert_eq!(
            representative_bucket(vn("2025-10-13", "01:00"), &zone),
            vn("2025-10-13", "09:00")
        );
        assert_eq!(
            representative_bucket(vn("2025-10-19", "23:59"), &zone),
            vn("2025-10-13", "09:00")
        );
    }

    #[test]
    fn bucket_week_spans_monday_to_sunday() {
        let zone = WindowZone::anchor();
        let (start, end) = bucket_week(vn("2025-10-13", "09:00"), &zone);
        assert_eq!(start, vn("2025-10-13", "00:00"));
        assert_eq!(end, vn("2025-10-20", "00:00") - Duration::milliseconds(1));
    }

    #[test]
    fn unknown_zone_falls_back_to_fixed_offset() {
        let zone = WindowZone::resolve("Mars/Olympus_Mons", 7);
        assert!(matches!(zone, WindowZone::Fixed(_)));

        let reference = vn("2025-10-13", "23:59");
        let named = current_window(reference, &WindowPolicy::default());
        let fixed = current_window(
            reference,
            &WindowPolicy {
                zone,
                ..WindowPolicy::default()
            },
        );
        assert_eq!(named, fixed);
    }
}
