//! Row shapes shared by the SQLite and
//! Postgres ledgers.
use crate::domain::model::{
  AttemptSource,
  AttemptStatus,
  FetchAttempt,
  ResponseLocation,
  StoredResponse
};
use crate::error::StoreError;

/// Attempt columns joined with their
/// optional response metadata.
pub(crate) const ATTEMPT_SELECT: &str = r#"
SELECT
 a.id,
 a.url,
 a.lookup_key,
 a.status,
 a.source,
 a.created_at_ms,
 a.next_retry_at_ms,
 a.error_message,
 a.http_status,
 r.id AS response_id,
 r.status_code AS response_status_code,
 r.text_hash AS response_text_hash,
 r.is_from_known_cdn AS response_is_from_known_cdn,
 r.etag AS response_etag,
 r.last_modified AS response_last_modified,
 r.location_tier AS response_location_tier,
 r.location_key AS response_location_key,
 r.created_at_ms AS response_created_at_ms
FROM fetch_attempts a
LEFT JOIN fetch_responses r ON r.id = a.response_id
"#;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AttemptRecord {
  pub id: String,
  pub url: String,
  pub lookup_key: String,
  pub status: String,
  pub source: String,
  pub created_at_ms: i64,
  pub next_retry_at_ms: Option<i64>,
  pub error_message: Option<String>,
  pub http_status: Option<i32>,
  pub response_id: Option<String>,
  pub response_status_code: Option<i32>,
  pub response_text_hash: Option<String>,
  pub response_is_from_known_cdn: Option<bool>,
  pub response_etag: Option<String>,
  pub response_last_modified: Option<String>,
  pub response_location_tier: Option<String>,
  pub response_location_key: Option<String>,
  pub response_created_at_ms: Option<i64>,
}

impl TryFrom<AttemptRecord> for FetchAttempt {
  type Error = StoreError;

  fn try_from(
    row: AttemptRecord
  ) -> Result<Self, Self::Error> {
    let status = AttemptStatus::parse(&row.status)
      .ok_or_else(|| StoreError::Corrupt(format!("attempt {}: unknown status '{}'", row.id, row.status)))?;
    let source = AttemptSource::parse(&row.source)
      .ok_or_else(|| StoreError::Corrupt(format!("attempt {}: unknown source '{}'", row.id, row.source)))?;

    let response = match (row.response_id, row.response_location_tier, row.response_location_key) {
      | (Some(id), Some(tier), Some(key)) => {
        let location = ResponseLocation::from_parts(&tier, key)
          .ok_or_else(|| StoreError::Corrupt(format!("response {id}: unknown tier '{tier}'")))?;
        Some(StoredResponse {
          status_code: status_code(row.response_status_code),
          text_hash: row.response_text_hash.unwrap_or_default(),
          is_from_known_cdn: row.response_is_from_known_cdn.unwrap_or(false),
          etag: row.response_etag,
          last_modified: row.response_last_modified,
          location,
          created_at_ms: row.response_created_at_ms.unwrap_or(row.created_at_ms),
          id,
        })
      }
      // Pruned or never stored.
      | _ => None,
    };

    Ok(FetchAttempt {
      id: row.id,
      url: row.url,
      lookup_key: row.lookup_key,
      status,
      source,
      created_at_ms: row.created_at_ms,
      next_retry_at_ms: row.next_retry_at_ms,
      error_message: row.error_message,
      http_status: row.http_status.and_then(|c| u16::try_from(c).ok()),
      response,
    })
  }
}

fn status_code(
  raw: Option<i32>
) -> u16 {
  raw.and_then(|c| u16::try_from(c).ok()).unwrap_or(0)
}

pub(crate) fn into_attempts(
  rows: Vec<AttemptRecord>
) -> Result<Vec<FetchAttempt>, StoreError> {
  rows.into_iter().map(FetchAttempt::try_from).collect()
}

/// Rows per multi-row INSERT, well
/// under either backend's bind limit.
pub(crate) const INSERT_CHUNK: usize = 500;
