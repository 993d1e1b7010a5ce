//! Row-count diagnostic across two PostgreSQL instances.
//!
//! Connects to the primary database (`JEEVES_DATABASE_URL`, else
//! `DATABASE_URL`) and to `SECONDARY_DATABASE_URL`, counts the rows of every
//! pipeline table in both, and logs them side by side. Useful after a
//! migration or when two deployments disagree about what they hold.
use std::{env, fmt};

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use sqlx::{postgres::PgPoolOptions, PgPool};

use jeeves_telemetry::{
    config::{self, mask_db_url},
    logging,
    schema::TABLES,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    logging::init_tracing();

    let cfg = config::load_from_env()?;
    let secondary_url = env::var("SECONDARY_DATABASE_URL")
        .map_err(|_| anyhow!("SECONDARY_DATABASE_URL must be set in .env or environment"))?;

    let primary = connect(&cfg.db_url).await?;
    let secondary = connect(&secondary_url).await?;

    tracing::info!("primary   : {}", mask_db_url(&cfg.db_url));
    tracing::info!("secondary : {}", mask_db_url(&secondary_url));
    tracing::info!("{:<24} {:>12} {:>12}", "table", "primary", "secondary");

    let mut mismatches = 0;
    let mut failures = 0;
    for table in TABLES {
        let left = count_rows(&primary, "primary", table).await;
        let right = count_rows(&secondary, "secondary", table).await;
        if left.is_failed() || right.is_failed() {
            failures += 1;
        } else if left != right {
            mismatches += 1;
        }
        tracing::info!("{:<24} {:>12} {:>12}", table, left, right);
    }

    if failures > 0 {
        return Err(anyhow!(
            "{} of {} tables could not be counted; see errors above",
            failures,
            TABLES.len()
        ));
    }
    if mismatches == 0 {
        tracing::info!("All {} tables agree", TABLES.len());
    } else {
        tracing::warn!("{} of {} tables differ", mismatches, TABLES.len());
    }
    Ok(())
}

async fn connect(url: &str) -> Result<PgPool> {
    // ---
    PgPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await
        .with_context(|| format!("Failed to connect to database '{}'", mask_db_url(url)))
}

/// SQLSTATE `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// Outcome of counting one table on one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TableCount {
    Rows(i64),
    /// The table does not exist on that instance.
    Missing,
    /// Anything else went wrong: connection, permissions, timeout.
    Failed,
}

impl TableCount {
    fn is_failed(&self) -> bool {
        matches!(self, TableCount::Failed)
    }
}

impl fmt::Display for TableCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let text = match self {
            TableCount::Rows(n) => n.to_string(),
            TableCount::Missing => "missing".to_string(),
            TableCount::Failed => "error".to_string(),
        };
        // Pad through the formatter so column widths apply
        f.pad(&text)
    }
}

async fn count_rows(pool: &PgPool, instance: &str, table: &str) -> TableCount {
    // ---
    // `table` only ever comes from the fixed TABLES list
    let sql = format!("SELECT COUNT(*) FROM {table}");
    let result = sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await;
    let count = classify(result);
    if let Err(e) = &count {
        tracing::error!("Count of {} on {} failed: {}", table, instance, e);
    }
    count.unwrap_or(TableCount::Failed)
}

/// Only an undefined table counts as missing; every other error surfaces.
fn classify(result: Result<i64, sqlx::Error>) -> Result<TableCount, sqlx::Error> {
    // ---
    match result {
        Ok(count) => Ok(TableCount::Rows(count)),
        Err(e) => {
            let undefined = e
                .as_database_error()
                .and_then(|d| d.code())
                .is_some_and(|code| code == UNDEFINED_TABLE);
            if undefined {
                Ok(TableCount::Missing)
            } else {
                Err(e)
            }
        }
    }
}
