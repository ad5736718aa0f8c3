//! Data access layer. Every SQL statement the application issues lives in this
//! module tree; handlers and tasks only see typed records.

mod albums;
mod files;
mod users;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::types::{Dimensions, FileSummary};

/// Upper bound for an explicit `limit` on listings. SQLite treats `LIMIT -1` as none.
pub(crate) const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap connectivity check used by the readiness probe.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.map(|_| ())
    }
}

fn dimensions(width: Option<i64>, height: Option<i64>) -> Option<Dimensions> {
    match (width, height) {
        (Some(w), Some(h)) if w >= 0 && h >= 0 => Some(Dimensions { width: w as u32, height: h as u32 }),
        _ => None,
    }
}

/// Reads a file summary joined under a column prefix (`c_`, `fb_`); `None` when the
/// left join found nothing.
fn summary_from_row(row: &SqliteRow, prefix: &str) -> Option<FileSummary> {
    let col = |name: &str| format!("{}{}", prefix, name);
    let id: Option<String> = row.get(col("id").as_str());
    id.map(|id| FileSummary {
        id,
        name: row.get(col("name").as_str()),
        extname: row.get(col("extname").as_str()),
        format: row.get(col("format").as_str()),
        size: row.get(col("size").as_str()),
        metadata: dimensions(row.get(col("width").as_str()), row.get(col("height").as_str())),
    })
}

fn clamp_paging(skip: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let skip = skip.unwrap_or(0).max(0);
    let limit = limit.filter(|l| *l > 0).map(|l| l.min(MAX_LIST_LIMIT)).unwrap_or(-1);
    (skip, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_to_unbounded() {
        assert_eq!(clamp_paging(None, None), (0, -1));
        assert_eq!(clamp_paging(Some(-3), Some(0)), (0, -1));
        assert_eq!(clamp_paging(Some(10), Some(5)), (10, 5));
        assert_eq!(clamp_paging(None, Some(50_000)), (0, MAX_LIST_LIMIT));
    }

    #[test]
    fn partial_dimensions_are_dropped() {
        assert_eq!(dimensions(Some(10), None), None);
        assert_eq!(dimensions(Some(10), Some(20)), Some(Dimensions { width: 10, height: 20 }));
    }
}
