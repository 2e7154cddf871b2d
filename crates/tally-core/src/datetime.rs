use chrono::{
  DateTime,
  Duration,
  Local,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  SecondsFormat,
  TimeZone,
  Utc
};
use chrono_tz::Tz;

const TIMEZONE_ENV_VAR: &str =
  "TALLY_TIMEZONE";

/// The time zone the person looking at the widgets lives in. Weekly
/// boundaries and header dates are computed in this zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewerZone {
  Local,
  Named(Tz)
}

impl ViewerZone {
  #[must_use]
  pub fn local_date(
    &self,
    dt: DateTime<Utc>
  ) -> NaiveDate {
    match self {
      | Self::Local => {
        dt.with_timezone(&Local)
          .date_naive()
      }
      | Self::Named(tz) => {
        dt.with_timezone(tz).date_naive()
      }
    }
  }

  #[must_use]
  pub fn format(
    &self,
    dt: DateTime<Utc>,
    fmt: &str
  ) -> String {
    match self {
      | Self::Local => {
        dt.with_timezone(&Local)
          .format(fmt)
          .to_string()
      }
      | Self::Named(tz) => {
        dt.with_timezone(tz)
          .format(fmt)
          .to_string()
      }
    }
  }

  /// First instant of `date` in this zone. Midnight can be skipped by a
  /// DST transition, in which case the first existing hour is used.
  #[must_use]
  pub fn start_of_day(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    let midnight =
      date.and_time(NaiveTime::MIN);
    for hour in 0..4 {
      let candidate =
        midnight + Duration::hours(hour);
      let resolved = match self {
        | Self::Local => {
          resolve_local(&Local, candidate)
        }
        | Self::Named(tz) => {
          resolve_local(tz, candidate)
        }
      };
      if let Some(instant) = resolved {
        return instant;
      }
      tracing::debug!(
        %candidate,
        "local time skipped by zone transition"
      );
    }

    tracing::warn!(
      %date,
      "no valid local midnight; using UTC midnight"
    );
    midnight.and_utc()
  }
}

/// Picks the viewer zone: `$TALLY_TIMEZONE`, then the `timezone` config
/// value, then the system zone.
pub fn resolve_viewer_zone(
  configured: Option<&str>
) -> ViewerZone {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return ViewerZone::Named(tz);
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "config:timezone")
  {
    return ViewerZone::Named(tz);
  }

  ViewerZone::Local
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured viewer timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn resolve_local<Z: TimeZone>(
  zone: &Z,
  local_naive: NaiveDateTime
) -> Option<DateTime<Utc>> {
  match zone
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      let first = first.with_timezone(&Utc);
      let second =
        second.with_timezone(&Utc);
      tracing::warn!(
        %first,
        %second,
        "ambiguous local datetime; using earliest"
      );
      Some(first.min(second))
    }
    | LocalResult::None => None
  }
}

/// Timestamp text as browsers write it: `2026-02-16T07:00:00.000Z`.
#[must_use]
pub fn format_iso(
  dt: DateTime<Utc>
) -> String {
  dt.to_rfc3339_opts(
    SecondsFormat::Millis,
    true
  )
}

pub mod iso_serde {
  use chrono::{
    DateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer
      .serialize_str(&super::format_iso(*dt))
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw =
      String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(serde::de::Error::custom)
  }

  pub mod option {
    use chrono::{
      DateTime,
      Utc
    };
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      dt: &Option<DateTime<Utc>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match dt {
        | Some(value) => {
          super::serialize(
            value, serializer
          )
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<
      Option<DateTime<Utc>>,
      D::Error
    >
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt {
        | Some(raw) => {
          DateTime::parse_from_rfc3339(&raw)
            .map(|dt| {
              Some(dt.with_timezone(&Utc))
            })
            .map_err(
              serde::de::Error::custom
            )
        }
        | None => Ok(None)
      }
    }
  }
}
