//! The daily/weekly window a FIX session is allowed to run in.
//!
//! Two independent things are decided here: whether the engine should currently be logged on at
//! all ([`SessionSchedule::is_session_time`]), and whether enough wall-clock time has passed since
//! the store was last written to that sequence numbers should reset for a new trading day
//! ([`SessionSchedule::is_new_session`]). `NonStopSession` short-circuits both to "always in
//! session, never a new day".

use chrono::naive::{NaiveDateTime, NaiveTime};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::SessionSettings;

const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = SECONDS_PER_DAY * 7;

pub(super) struct SessionSchedule {
    start_time: NaiveTime,
    end_time: Option<NaiveTime>,
    start_day: Option<Weekday>,
    end_day: Option<Weekday>,
    time_zone: Tz,
    non_stop_session: bool,
}

impl SessionSchedule {
    pub(super) fn from_settings(settings: &SessionSettings) -> Self {
        SessionSchedule {
            start_time: settings.start_time,
            end_time: settings.end_time,
            start_day: settings.start_day,
            end_day: settings.end_day,
            time_zone: settings.time_zone,
            non_stop_session: settings.non_stop_session,
        }
    }

    /// Whether the engine should be logged on at `now`.
    pub(super) fn is_session_time(&self, now: DateTime<Utc>) -> bool {
        if self.non_stop_session {
            return true;
        }
        let Some(end_time) = self.end_time else {
            return true;
        };
        let local = now.with_timezone(&self.time_zone);

        match (self.start_day, self.end_day) {
            (Some(start_day), Some(end_day)) => {
                let now_secs = weekly_seconds(local.naive_local());
                let start_secs = start_day.num_days_from_monday() as i64 * SECONDS_PER_DAY
                    + seconds_from_midnight(self.start_time);
                let end_secs = end_day.num_days_from_monday() as i64 * SECONDS_PER_DAY
                    + seconds_from_midnight(end_time);
                in_weekly_window(now_secs, start_secs, end_secs)
            }
            _ => in_daily_window(local.time(), self.start_time, end_time),
        }
    }

    /// Whether a session that last persisted state at `creation_time` should be treated as a new
    /// session at `now` -- i.e. whether a scheduled session boundary has elapsed in between.
    pub(super) fn is_new_session(&self, creation_time: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.non_stop_session {
            return false;
        }
        let last_boundary = self.last_boundary_before(now);
        creation_time < last_boundary
    }

    fn last_boundary_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.time_zone);

        let naive_boundary = match self.start_day {
            Some(start_day) => {
                let now_secs = weekly_seconds(local.naive_local());
                let start_secs = start_day.num_days_from_monday() as i64 * SECONDS_PER_DAY
                    + seconds_from_midnight(self.start_time);
                let mut delta = now_secs - start_secs;
                if delta < 0 {
                    delta += SECONDS_PER_WEEK;
                }
                local.naive_local() - Duration::seconds(delta)
            }
            None => {
                let today_boundary =
                    NaiveDateTime::new(local.date_naive(), self.start_time);
                if local.naive_local() < today_boundary {
                    today_boundary - Duration::days(1)
                } else {
                    today_boundary
                }
            }
        };

        self.time_zone
            .from_local_datetime(&naive_boundary)
            .single()
            .unwrap_or(local)
            .with_timezone(&Utc)
    }
}

fn seconds_from_midnight(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64
}

fn weekly_seconds(dt: NaiveDateTime) -> i64 {
    dt.weekday().num_days_from_monday() as i64 * SECONDS_PER_DAY
        + seconds_from_midnight(dt.time())
}

fn in_daily_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        // window wraps midnight, e.g. 22:00 -> 06:00
        now >= start || now < end
    }
}

fn in_weekly_window(now_secs: i64, start_secs: i64, end_secs: i64) -> bool {
    if start_secs <= end_secs {
        now_secs >= start_secs && now_secs < end_secs
    } else {
        now_secs >= start_secs || now_secs < end_secs
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn settings_with(
        start: NaiveTime,
        end: Option<NaiveTime>,
        start_day: Option<Weekday>,
        end_day: Option<Weekday>,
        non_stop: bool,
    ) -> SessionSettings {
        let mut builder = crate::SessionSettings::builder()
            .with_sender_comp_id("a")
            .with_target_comp_id("b")
            .with_store_path("./store".into())
            .with_log_dir("./log".into())
            .with_socket_addr("127.0.0.1:0".parse().unwrap())
            .with_start_time(start)
            .with_non_stop_session(non_stop);
        if let Some(end) = end {
            builder = builder.with_end_time(end);
        }
        if let Some(d) = start_day {
            builder = builder.with_start_day(d);
        }
        if let Some(d) = end_day {
            builder = builder.with_end_day(d);
        }
        builder.build().unwrap()
    }

    #[test]
    fn daily_window_without_wrap() {
        let settings = settings_with(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Some(NaiveTime::from_hms_opt(17, 0, 0).unwrap()),
            None,
            None,
            false,
        );
        let schedule = SessionSchedule::from_settings(&settings);
        let during = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        assert!(schedule.is_session_time(during));
        assert!(!schedule.is_session_time(before));
    }

    #[test]
    fn daily_window_wraps_midnight() {
        let settings = settings_with(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            Some(NaiveTime::from_hms_opt(6, 0, 0).unwrap()),
            None,
            None,
            false,
        );
        let schedule = SessionSchedule::from_settings(&settings);
        let late_night = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();
        let early_morning = Utc.with_ymd_and_hms(2024, 1, 3, 5, 0, 0).unwrap();
        let midday = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        assert!(schedule.is_session_time(late_night));
        assert!(schedule.is_session_time(early_morning));
        assert!(!schedule.is_session_time(midday));
    }

    #[test]
    fn non_stop_session_is_always_in_session_and_never_new() {
        let settings = settings_with(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Some(NaiveTime::from_hms_opt(17, 0, 0).unwrap()),
            None,
            None,
            true,
        );
        let schedule = SessionSchedule::from_settings(&settings);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap();
        assert!(schedule.is_session_time(now));
        assert!(!schedule.is_new_session(now - Duration::days(10), now));
    }

    #[test]
    fn new_session_detected_after_daily_boundary_elapses() {
        let settings = settings_with(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            Some(NaiveTime::from_hms_opt(17, 0, 0).unwrap()),
            None,
            None,
            false,
        );
        let schedule = SessionSchedule::from_settings(&settings);
        let creation_time = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let still_same_day = Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        assert!(!schedule.is_new_session(creation_time, still_same_day));
        assert!(schedule.is_new_session(creation_time, next_day));
    }

    #[test]
    fn weekly_window_respects_start_and_end_day() {
        let settings = settings_with(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            Some(NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
            Some(Weekday::Mon),
            Some(Weekday::Fri),
            false,
        );
        let schedule = SessionSchedule::from_settings(&settings);
        let wednesday = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        assert!(schedule.is_session_time(wednesday));
        assert!(!schedule.is_session_time(saturday));
    }
}
