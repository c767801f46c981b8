//! Query builder for stored records.
//!
//! # Example
//!
//! ```
//! use airq_store::{RecordQuery, SqliteStore};
//! use time::{Duration, OffsetDateTime};
//!
//! let store = SqliteStore::open_in_memory()?;
//! let query = RecordQuery::new()
//!     .device("esp32-kitchen")
//!     .since(OffsetDateTime::now_utc() - Duration::hours(1))
//!     .limit(50);
//!
//! let records = store.query_records(&query)?;
//! assert!(records.is_empty());
//! # Ok::<(), airq_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for [`SqliteStore::query_records`](crate::SqliteStore::query_records).
///
/// By default, queries return results ordered by timestamp descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct RecordQuery {
    /// Filter by device ID.
    pub device_id: Option<String>,
    /// Filter records at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter records at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Order by timestamp descending (newest first).
    pub newest_first: bool,
}

impl RecordQuery {
    /// Create a new query: all devices, no time range, no limit, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include records from the specified device.
    pub fn device(mut self, device_id: &str) -> Self {
        self.device_id = Some(device_id.to_string());
        self
    }

    /// Filter to records at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to records at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Order results oldest first.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device_id) = self.device_id {
            conditions.push("device_id = ?");
            params.push(Box::new(device_id.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(crate::store::to_micros(since)));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(crate::store::to_micros(until)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT {} FROM records {} ORDER BY timestamp {order}, id {order}",
            crate::store::COLUMNS,
            where_clause,
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let query = RecordQuery::new();
        assert!(query.device_id.is_none());
        assert!(query.limit.is_none());
        assert!(query.newest_first);
        // Default derives false
        assert!(!RecordQuery::default().newest_first);
    }

    #[test]
    fn test_build_where_empty() {
        let (clause, params) = RecordQuery::new().build_where();
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_where_all_filters() {
        let now = OffsetDateTime::now_utc();
        let (clause, params) = RecordQuery::new()
            .device("a")
            .since(now)
            .until(now)
            .build_where();
        assert_eq!(clause, "WHERE device_id = ? AND timestamp >= ? AND timestamp <= ?");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_build_sql_ordering_and_limit() {
        let sql = RecordQuery::new().limit(5).build_sql();
        assert!(sql.contains("ORDER BY timestamp DESC, id DESC"));
        assert!(sql.ends_with("LIMIT 5"));

        let sql = RecordQuery::new().oldest_first().build_sql();
        assert!(sql.contains("ORDER BY timestamp ASC, id ASC"));
        assert!(!sql.contains("LIMIT"));
    }
}
