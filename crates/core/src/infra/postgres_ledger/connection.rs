//! Helpers to create/configure the
//! Postgres pool.
use chrono_tz::Tz;
use sqlx::PgPool;
use sqlx::postgres::{
  PgConnectOptions,
  PgPoolOptions
};
use tracing::{
  info,
  warn
};

use crate::domain::model::PostgresConfig;
use crate::error::StoreError;

pub async fn create_pool(
  cfg: &PostgresConfig,
  timezone: &Tz
) -> Result<PgPool, StoreError> {
  let opts =
    connect_options(cfg, Some(&cfg.database));

  match pool_options(cfg, timezone).connect_with(opts.clone()).await {
    | Ok(pool) => Ok(pool),
    | Err(e) => {
      warn!(database = %cfg.database, error = %e, "Postgres connect failed, creating database");
      ensure_database_exists(cfg).await?;
      Ok(pool_options(cfg, timezone).connect_with(opts).await?)
    }
  }
}

fn pool_options(
  cfg: &PostgresConfig,
  timezone: &Tz
) -> PgPoolOptions {
  PgPoolOptions::new()
    .max_connections(10)
    .after_connect(set_session_defaults(cfg.schema.clone(), timezone.name().to_string()))
}

/// Drops and recreates the configured
/// schema.
pub async fn wipe_database(
  cfg: &PostgresConfig,
  timezone: &Tz
) -> Result<(), StoreError> {
  let pool =
    create_pool(cfg, timezone).await?;

  let schema = quote_ident(&cfg.schema);

  sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
    .execute(&pool)
    .await?;
  sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
    .execute(&pool)
    .await?;

  pool.close().await;
  info!(schema = %cfg.schema, "Postgres schema wiped");
  Ok(())
}

#[allow(clippy::type_complexity)]
fn set_session_defaults(
  schema: String,
  tz_name: String,
) -> impl Fn(
  &mut sqlx::PgConnection,
  sqlx::pool::PoolConnectionMetadata,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), sqlx::Error>> + Send + '_>> {
  move |conn, _meta| {
    let tz = tz_name.clone();
    let schema_name = schema.clone();

    Box::pin(async move {
      let schema_ident =
        quote_ident(&schema_name);

      sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema_ident}"))
        .execute(&mut *conn)
        .await?;

      sqlx::query(&format!("SET search_path TO {schema_ident}"))
        .execute(&mut *conn)
        .await?;

      // SET TIME ZONE takes no bind
      // params.
      let stmt =
        format!("SET TIME ZONE '{}'", tz.replace('\'', "''"));
      sqlx::query(&stmt).execute(&mut *conn).await?;

      Ok(())
    })
  }
}

pub(super) fn quote_ident(
  name: &str
) -> String {
  format!("\"{}\"", name.replace('"', "\"\""))
}

fn connect_options(
  cfg: &PostgresConfig,
  database: Option<&str>
) -> PgConnectOptions {
  let mut opts = PgConnectOptions::new()
    .host(&cfg.host)
    .port(cfg.port)
    .username(&cfg.user)
    .password(&cfg.password);

  if let Some(db) = database {
    opts = opts.database(db);
  }

  opts
}

async fn ensure_database_exists(
  cfg: &PostgresConfig
) -> Result<(), StoreError> {
  validate_db_name(&cfg.database)?;

  let admin_pool = PgPoolOptions::new()
    .max_connections(2)
    .connect_with(connect_options(cfg, Some("postgres")))
    .await?;

  let res = sqlx::query(&format!("CREATE DATABASE \"{}\"", cfg.database))
    .execute(&admin_pool)
    .await;

  match res {
    | Ok(_) => {
      info!(database = %cfg.database, "Postgres database created");
      Ok(())
    }
    | Err(e) if is_duplicate_db_error(&e) => Ok(()),
    | Err(e) => Err(e.into()),
  }
}

fn validate_db_name(
  name: &str
) -> Result<(), StoreError> {
  if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
    Ok(())
  } else {
    Err(StoreError::backend(
      "postgres database name",
      format!("'{name}': only alphanumeric, '_' and '-' allowed"),
    ))
  }
}

fn is_duplicate_db_error(
  e: &sqlx::Error
) -> bool {
  matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("42P04"))
}

/// Duplicate table, raised when two
/// instances race to create a
/// partition.
pub(super) fn is_duplicate_table_error(
  e: &sqlx::Error
) -> bool {
  matches!(e, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("42P07"))
}
