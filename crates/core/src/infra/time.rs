use chrono::{
  DateTime,
  Utc
};
use chrono_tz::Tz;

pub fn format_epoch_ms(
  ms: i64,
  zone: &Tz
) -> String {
  let dt_utc =
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
  dt_utc
    .with_timezone(zone)
    .format("%Y-%m-%d %H:%M:%S%.3f %Z")
    .to_string()
}

pub fn epoch_ms_to_iso(
  ms: i64,
  zone: &Tz
) -> String {
  let dt_utc =
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
  dt_utc.with_timezone(zone).to_rfc3339()
}

pub fn epoch_ms_to_utc_iso(
  ms: i64
) -> String {
  DateTime::<Utc>::from_timestamp_millis(ms)
    .unwrap_or_default()
    .to_rfc3339()
}
