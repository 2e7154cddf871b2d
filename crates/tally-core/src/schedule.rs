//! Periodic reset rules for the mission checklists.
//!
//! Both rules are pure functions of `now` and the last reset instant. The
//! caller runs them once when a checklist is opened and clears the
//! completion map before anything is shown.

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Days,
  Duration,
  NaiveTime,
  Utc
};

use crate::datetime::ViewerZone;

pub const DAILY_UTC_OFFSET_HOURS: i32 =
  8;
pub const DAILY_RESET_HOUR: u32 = 15;

/// Reset at a fixed hour of a fixed UTC offset, independent of where the
/// viewer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyReset {
  utc_offset_hours: i32,
  reset_hour:       u32
}

impl Default for DailyReset {
  fn default() -> Self {
    Self {
      utc_offset_hours:
        DAILY_UTC_OFFSET_HOURS,
      reset_hour: DAILY_RESET_HOUR
    }
  }
}

impl DailyReset {
  pub fn new(
    utc_offset_hours: i32,
    reset_hour: u32
  ) -> anyhow::Result<Self> {
    if !(-12..=14)
      .contains(&utc_offset_hours)
    {
      return Err(anyhow!(
        "daily reset offset must be \
         between -12 and 14 hours, got \
         {utc_offset_hours}"
      ));
    }
    if reset_hour > 23 {
      return Err(anyhow!(
        "daily reset hour must be \
         between 0 and 23, got \
         {reset_hour}"
      ));
    }
    Ok(Self {
      utc_offset_hours,
      reset_hour
    })
  }

  /// Today's reset instant, where "today" is the calendar day of `now`
  /// seen from the fixed offset. Before the reset hour this lies in the
  /// future.
  #[must_use]
  pub fn boundary(
    &self,
    now: DateTime<Utc>
  ) -> DateTime<Utc> {
    let offset = i64::from(
      self.utc_offset_hours
    );
    let shifted =
      now + Duration::hours(offset);
    let day_start = shifted
      .date_naive()
      .and_time(NaiveTime::MIN)
      .and_utc();
    day_start
      + Duration::hours(
        i64::from(self.reset_hour)
          - offset
      )
  }

  /// Fires when there is no record, or when `now` is past today's
  /// boundary and the last reset happened before it. Missed days collapse
  /// into a single reset.
  #[must_use]
  pub fn should_reset(
    &self,
    now: DateTime<Utc>,
    last_reset: Option<DateTime<Utc>>
  ) -> bool {
    let Some(last_reset) = last_reset
    else {
      return true;
    };
    let boundary = self.boundary(now);
    now > boundary
      && last_reset < boundary
  }
}

/// Reset at Monday 00:00 in the viewer's zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeeklyReset {
  zone: ViewerZone
}

impl WeeklyReset {
  #[must_use]
  pub fn new(zone: ViewerZone) -> Self {
    Self {
      zone
    }
  }

  /// Most recent Monday midnight at or before `now`.
  #[must_use]
  pub fn boundary(
    &self,
    now: DateTime<Utc>
  ) -> DateTime<Utc> {
    let today =
      self.zone.local_date(now);
    let back = u64::from(
      today
        .weekday()
        .num_days_from_monday()
    );
    let monday = today
      .checked_sub_days(Days::new(back))
      .unwrap_or(today);
    self.zone.start_of_day(monday)
  }

  #[must_use]
  pub fn should_reset(
    &self,
    now: DateTime<Utc>,
    last_reset: Option<DateTime<Utc>>
  ) -> bool {
    match last_reset {
      | None => true,
      | Some(last) => {
        last < self.boundary(now)
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResetRule {
  Daily(DailyReset),
  Weekly(WeeklyReset)
}

impl ResetRule {
  #[must_use]
  pub fn boundary(
    &self,
    now: DateTime<Utc>
  ) -> DateTime<Utc> {
    match self {
      | Self::Daily(rule) => {
        rule.boundary(now)
      }
      | Self::Weekly(rule) => {
        rule.boundary(now)
      }
    }
  }

  #[tracing::instrument(skip(self))]
  #[must_use]
  pub fn should_reset(
    &self,
    now: DateTime<Utc>,
    last_reset: Option<DateTime<Utc>>
  ) -> bool {
    let fire = match self {
      | Self::Daily(rule) => {
        rule.should_reset(now, last_reset)
      }
      | Self::Weekly(rule) => {
        rule.should_reset(now, last_reset)
      }
    };
    tracing::debug!(
      fire,
      boundary = %self.boundary(now),
      "evaluated reset rule"
    );
    fire
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Duration,
    TimeZone,
    Utc
  };

  use super::{
    DailyReset,
    ResetRule,
    WeeklyReset
  };
  use crate::datetime::ViewerZone;

  fn at(
    y: i32,
    mo: u32,
    d: u32,
    h: u32,
    mi: u32
  ) -> DateTime<Utc> {
    Utc
      .with_ymd_and_hms(y, mo, d, h, mi, 0)
      .single()
      .expect("valid instant")
  }

  #[test]
  fn daily_boundary_is_three_pm_in_plus_eight()
  {
    let rule = DailyReset::default();
    // 2026-02-16 10:00 UTC is 18:00 at +8.
    assert_eq!(
      rule.boundary(at(2026, 2, 16, 10, 0)),
      at(2026, 2, 16, 7, 0)
    );
    // 2026-02-16 20:00 UTC is already the 17th at +8.
    assert_eq!(
      rule.boundary(at(2026, 2, 16, 20, 0)),
      at(2026, 2, 17, 7, 0)
    );
  }

  #[test]
  fn daily_fires_once_after_boundary() {
    let rule = DailyReset::default();
    let last = at(2026, 2, 15, 9, 0);
    let now = at(2026, 2, 16, 7, 30);

    assert!(rule.should_reset(now, Some(last)));
    // After the reset stamps `now`, later loads the same day stay quiet.
    assert!(!rule.should_reset(now, Some(now)));
    assert!(!rule.should_reset(
      at(2026, 2, 16, 15, 59),
      Some(now)
    ));
    // The next day's boundary fires again.
    assert!(rule.should_reset(
      at(2026, 2, 17, 7, 1),
      Some(now)
    ));
  }

  #[test]
  fn daily_waits_until_boundary_is_crossed() {
    let rule = DailyReset::default();
    let last = at(2026, 2, 15, 9, 0);
    // 06:59 UTC is 14:59 at +8: today's boundary is still ahead.
    assert!(!rule.should_reset(
      at(2026, 2, 16, 6, 59),
      Some(last)
    ));
    assert!(!rule.should_reset(
      at(2026, 2, 16, 7, 0),
      Some(last)
    ));
  }

  #[test]
  fn daily_without_record_always_fires() {
    let rule = DailyReset::default();
    assert!(
      rule.should_reset(at(2026, 2, 16, 1, 0), None)
    );
  }

  #[test]
  fn daily_collapses_missed_days_into_one_reset()
  {
    let rule = DailyReset::default();
    let last = at(2026, 2, 1, 8, 0);
    let now = at(2026, 2, 9, 8, 0);
    assert!(rule.should_reset(now, Some(last)));
    assert!(!rule.should_reset(
      now + Duration::hours(1),
      Some(now)
    ));
  }

  #[test]
  fn daily_rejects_out_of_range_parameters() {
    assert!(DailyReset::new(15, 15).is_err());
    assert!(DailyReset::new(8, 24).is_err());
    assert!(DailyReset::new(-5, 4).is_ok());
  }

  #[test]
  fn weekly_boundary_is_monday_midnight() {
    let rule = WeeklyReset::new(
      ViewerZone::Named(chrono_tz::UTC)
    );
    // 2026-02-18 is a Wednesday.
    assert_eq!(
      rule.boundary(at(2026, 2, 18, 13, 0)),
      at(2026, 2, 16, 0, 0)
    );
    // Sunday goes back six days.
    assert_eq!(
      rule.boundary(at(2026, 2, 22, 23, 0)),
      at(2026, 2, 16, 0, 0)
    );
    // Monday itself.
    assert_eq!(
      rule.boundary(at(2026, 2, 16, 0, 0)),
      at(2026, 2, 16, 0, 0)
    );
  }

  #[test]
  fn weekly_uses_viewer_zone() {
    let rule = WeeklyReset::new(
      ViewerZone::Named(
        chrono_tz::America::New_York
      )
    );
    // Monday 02:00 UTC is still Sunday evening in New York.
    assert_eq!(
      rule.boundary(at(2026, 2, 16, 2, 0)),
      at(2026, 2, 9, 5, 0)
    );
  }

  #[test]
  fn weekly_fires_iff_last_reset_precedes_monday()
  {
    let rule = ResetRule::Weekly(
      WeeklyReset::new(ViewerZone::Named(
        chrono_tz::UTC
      ))
    );
    let now = at(2026, 2, 18, 13, 0);

    assert!(rule.should_reset(now, None));
    assert!(rule.should_reset(
      now,
      Some(at(2026, 2, 15, 23, 59))
    ));
    assert!(!rule.should_reset(
      now,
      Some(at(2026, 2, 16, 0, 0))
    ));
    assert!(!rule.should_reset(
      now,
      Some(at(2026, 2, 17, 9, 0))
    ));
  }
}
