//! Database wiring: creates the ledger
//! implementation for the configured
//! dialect.
use std::sync::Arc;

use tracing::warn;

use crate::domain::model::{
  AppConfig,
  SqlDialect
};
use crate::error::StoreError;
use crate::infra::{
  postgres_ledger,
  postgres_ledger::PostgresLedger,
  sqlite_ledger,
  sqlite_ledger::SqliteLedger
};
use crate::ports::ledger::Ledger;

pub async fn create_ledger(
  cfg: &AppConfig
) -> Result<Arc<dyn Ledger>, StoreError> {
  match cfg.db_dialect {
    | SqlDialect::Sqlite => Ok(Arc::new(SqliteLedger::new(&cfg.sqlite_path, cfg.timezone).await?)),
    | SqlDialect::Postgres => Ok(Arc::new(PostgresLedger::new(&cfg.postgres, cfg.timezone).await?)),
  }
}

/// Dev mode starts from an empty
/// ledger.
pub async fn wipe(
  cfg: &AppConfig
) -> Result<(), StoreError> {
  match cfg.db_dialect {
    | SqlDialect::Sqlite => {
      warn!(db_path = %cfg.sqlite_path.display(), "Dev mode enabled, deleting database");
      sqlite_ledger::wipe_database_file(&cfg.sqlite_path)
    }
    | SqlDialect::Postgres => {
      warn!(
        db = %cfg.postgres.database,
        host = %cfg.postgres.host,
        port = cfg.postgres.port,
        schema = %cfg.postgres.schema,
        "Dev mode enabled, wiping database"
      );
      postgres_ledger::wipe_database(&cfg.postgres, &cfg.timezone).await
    }
  }
}

/// Human-readable target for startup
/// logs; never includes the password.
pub fn describe(
  cfg: &AppConfig
) -> String {
  match cfg.db_dialect {
    | SqlDialect::Sqlite => format!("sqlite:{}", cfg.sqlite_path.display()),
    | SqlDialect::Postgres => format!(
      "postgres://{}@{}:{}/{}",
      cfg.postgres.user, cfg.postgres.host, cfg.postgres.port, cfg.postgres.database
    ),
  }
}
