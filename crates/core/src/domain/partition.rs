//! Monthly (UTC) ledger partitions.
use std::fmt;

use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  Utc
};

pub const ATTEMPTS_TABLE: &str = "fetch_attempts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthPartition {
  pub year: i32,
  pub month: u32,
}

impl MonthPartition {
  pub fn new(
    year: i32,
    month: u32
  ) -> Option<Self> {
    (1..=12).contains(&month).then_some(Self { year, month })
  }

  pub fn containing(
    epoch_ms: i64
  ) -> Self {
    let dt =
      DateTime::<Utc>::from_timestamp_millis(epoch_ms).unwrap_or_default();
    Self {
      year: dt.year(),
      month: dt.month(),
    }
  }

  pub fn next(self) -> Self {
    self.add_months(1)
  }

  pub fn add_months(
    self,
    months: i32
  ) -> Self {
    let index =
      self.year * 12 + (self.month as i32 - 1) + months;
    Self {
      year: index.div_euclid(12),
      month: index.rem_euclid(12) as u32 + 1,
    }
  }

  /// Inclusive lower bound in epoch ms.
  pub fn start_ms(self) -> i64 {
    NaiveDate::from_ymd_opt(self.year, self.month, 1)
      .and_then(|d| d.and_hms_opt(0, 0, 0))
      .map(|dt| dt.and_utc().timestamp_millis())
      .unwrap_or(0)
  }

  /// Exclusive upper bound in epoch ms.
  pub fn end_ms(self) -> i64 {
    self.next().start_ms()
  }

  /// `2026-10`
  pub fn key(self) -> String {
    format!("{:04}-{:02}", self.year, self.month)
  }

  /// `fetch_attempts_p2026_10`
  pub fn table_name(self) -> String {
    format!("{ATTEMPTS_TABLE}_p{:04}_{:02}", self.year, self.month)
  }

  pub fn parse_key(
    key: &str
  ) -> Option<Self> {
    let (y, m) = key.split_once('-')?;
    Self::new(y.parse().ok()?, m.parse().ok()?)
  }

  pub fn from_table_name(
    name: &str
  ) -> Option<Self> {
    let rest =
      name.strip_prefix(ATTEMPTS_TABLE)?.strip_prefix("_p")?;
    let (y, m) = rest.split_once('_')?;
    Self::new(y.parse().ok()?, m.parse().ok()?)
  }
}

impl fmt::Display for MonthPartition {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(&self.key())
  }
}
