use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::core::alert::AlertRecord;
use crate::core::error::KestrelError;
use crate::core::output::csv_field;

/// Local alert cache, one row per display id.
///
/// A connection is opened and closed around each operation so that reads
/// issued from the shell while a watch session is running always see the
/// last completed write.
pub struct AlertStore {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RecentAlert {
    pub short_id: String,
    pub name: Option<String>,
    pub severity: String,
    pub status: Option<String>,
    pub hostname: Option<String>,
    pub created_timestamp: Option<String>,
    pub full_id: String,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub date: Option<String>,
    pub total: u64,
    pub by_severity: Vec<(String, u64)>,
    pub by_product: Vec<(String, u64)>,
}

impl AlertStore {
    pub fn default_path() -> PathBuf {
        crate::config::config_dir().join("alerts.db")
    }

    pub fn new(path: &Path) -> Result<Self, KestrelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| KestrelError::Storage(e.to_string()))?;
        }
        let store = Self {
            path: path.to_path_buf(),
        };
        store.open()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS alerts (
              id TEXT PRIMARY KEY,
              short_id TEXT NOT NULL,
              full_id TEXT NOT NULL,
              name TEXT,
              description TEXT,
              severity INTEGER,
              status TEXT,
              product TEXT,
              hostname TEXT,
              created_timestamp TEXT,
              updated_timestamp TEXT,
              raw_data TEXT NOT NULL,
              first_seen TEXT DEFAULT CURRENT_TIMESTAMP,
              UNIQUE(full_id)
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_short_id ON alerts(short_id);
            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_timestamp);
            CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
            ",
        )?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, KestrelError> {
        Ok(Connection::open(&self.path)?)
    }

    /// Insert or replace one alert. Returns whether this display id was new
    /// to the cache. Repeating the call with identical arguments is a no-op
    /// apart from the returned flag.
    pub fn upsert(
        &self,
        alert: &AlertRecord,
        display_id: &str,
        full_id: &str,
    ) -> Result<bool, KestrelError> {
        let conn = self.open()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM alerts WHERE full_id = ?1",
                params![full_id],
                |row| row.get(0),
            )
            .optional()?;

        let raw_data = serde_json::to_string(alert)?;
        conn.execute(
            "INSERT OR REPLACE INTO alerts
             (id, short_id, full_id, name, description, severity, status, product,
              hostname, created_timestamp, updated_timestamp, raw_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                display_id,
                display_id,
                full_id,
                alert.name(),
                alert.description(),
                severity_sql(alert),
                alert.status(),
                alert.product(),
                alert.hostname(),
                alert.created_timestamp(),
                alert.updated_timestamp(),
                raw_data,
            ],
        )?;

        Ok(existing.is_none())
    }

    /// Exact lookup by display id; also returns the untransformed full
    /// vendor identifier for follow-up API calls.
    pub fn get_by_display_id(
        &self,
        display_id: &str,
    ) -> Result<Option<(AlertRecord, String)>, KestrelError> {
        let conn = self.open()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT raw_data, full_id FROM alerts WHERE short_id = ?1 OR id = ?1",
                params![display_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((raw, full_id)) => {
                let alert: AlertRecord = serde_json::from_str(&raw)?;
                Ok(Some((alert, full_id)))
            }
            None => Ok(None),
        }
    }

    pub fn list_recent(&self, limit: u32) -> Result<Vec<RecentAlert>, KestrelError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT short_id, name, severity, status, hostname, created_timestamp, full_id
             FROM alerts
             ORDER BY created_timestamp DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(RecentAlert {
                short_id: row.get(0)?,
                name: row.get(1)?,
                severity: column_text(row.get_ref(2)?),
                status: row.get(3)?,
                hostname: row.get(4)?,
                created_timestamp: row.get(5)?,
                full_id: row.get(6)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats, KestrelError> {
        let conn = self.open()?;
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;

        let by_severity = grouped_counts(
            &conn,
            "SELECT severity, COUNT(*) FROM alerts
             GROUP BY severity ORDER BY severity DESC",
            &[],
        )?;
        let by_product = grouped_counts(
            &conn,
            "SELECT product, COUNT(*) FROM alerts
             GROUP BY product ORDER BY COUNT(*) DESC",
            &[],
        )?;

        Ok(StoreStats {
            date: None,
            total,
            by_severity,
            by_product,
        })
    }

    /// Statistics restricted to one calendar day of `created_timestamp`.
    /// Stored timestamps are UTC, so the date prefix is the UTC day.
    pub fn daily_stats(&self, date: &str) -> Result<StoreStats, KestrelError> {
        let conn = self.open()?;
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE DATE(created_timestamp) = ?1",
            params![date],
            |row| row.get(0),
        )?;

        let by_severity = grouped_counts(
            &conn,
            "SELECT severity, COUNT(*) FROM alerts
             WHERE DATE(created_timestamp) = ?1
             GROUP BY severity ORDER BY severity DESC",
            &[date],
        )?;
        let by_product = grouped_counts(
            &conn,
            "SELECT product, COUNT(*) FROM alerts
             WHERE DATE(created_timestamp) = ?1
             GROUP BY product ORDER BY COUNT(*) DESC",
            &[date],
        )?;

        Ok(StoreStats {
            date: Some(date.to_string()),
            total,
            by_severity,
            by_product,
        })
    }

    /// Delete every cached alert, returning the prior row count.
    pub fn purge(&self) -> Result<u64, KestrelError> {
        let conn = self.open()?;
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        conn.execute("DELETE FROM alerts", [])?;
        Ok(count)
    }

    pub fn export_csv(&self, output: &Path) -> Result<u64, KestrelError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT short_id, name, severity, status, product, hostname,
                    created_timestamp, updated_timestamp, description
             FROM alerts
             ORDER BY created_timestamp DESC",
        )?;

        let mut body = String::from(
            "ID,Name,Severity,Status,Product,Hostname,Created,Updated,Description\n",
        );
        let mut count = 0u64;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let mut fields = Vec::with_capacity(9);
            for idx in 0..9 {
                fields.push(csv_field(&column_text(row.get_ref(idx)?)));
            }
            body.push_str(&fields.join(","));
            body.push('\n');
            count += 1;
        }

        fs::write(output, body).map_err(|e| KestrelError::Storage(e.to_string()))?;
        Ok(count)
    }

    pub fn export_json(&self, output: &Path) -> Result<u64, KestrelError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT raw_data FROM alerts ORDER BY created_timestamp DESC",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut alerts: Vec<Value> = Vec::new();
        for row in rows {
            alerts.push(serde_json::from_str(&row?)?);
        }

        let json = serde_json::to_string_pretty(&alerts)?;
        fs::write(output, json).map_err(|e| KestrelError::Storage(e.to_string()))?;
        Ok(alerts.len() as u64)
    }
}

/// Bind severity the way SQLite's INTEGER affinity would store it: numeric
/// values (including numeric strings) as integers, everything else as text.
fn severity_sql(alert: &AlertRecord) -> SqlValue {
    match alert.get("severity") {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n
                .as_f64()
                .map(SqlValue::Real)
                .unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Text(s.clone()),
        },
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

fn grouped_counts(
    conn: &Connection,
    sql: &str,
    args: &[&str],
) -> Result<Vec<(String, u64)>, KestrelError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
        let key = match row.get_ref(0)? {
            ValueRef::Null => "unknown".to_string(),
            other => column_text(other),
        };
        Ok((key, row.get::<_, u64>(1)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn column_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, AlertStore) {
        let dir = TempDir::new().unwrap();
        let store = AlertStore::new(&dir.path().join("alerts.db")).unwrap();
        (dir, store)
    }

    fn record(value: serde_json::Value) -> AlertRecord {
        serde_json::from_value(value).unwrap()
    }

    fn sample(id: &str, created: &str, severity: i64) -> AlertRecord {
        record(json!({
            "id": format!("cid:ind:{id}"),
            "name": format!("alert {id}"),
            "description": "something happened",
            "severity": severity,
            "status": "new",
            "product": "EDR",
            "device": {"hostname": "web01"},
            "created_timestamp": created,
            "updated_timestamp": created,
            "vendor_extra": {"keep": ["me"]},
        }))
    }

    #[test]
    fn upsert_is_idempotent_and_reports_first_insert() {
        let (_dir, store) = store();
        let alert = sample("a", "2025-06-01T00:00:01Z", 70);

        assert!(store.upsert(&alert, "ind:a", "cid:ind:a").unwrap());
        assert!(!store.upsert(&alert, "ind:a", "cid:ind:a").unwrap());
        assert_eq!(store.list_recent(10).unwrap().len(), 1);
    }

    #[test]
    fn lookup_returns_untransformed_full_id() {
        let (_dir, store) = store();
        let alert = sample("a", "2025-06-01T00:00:01Z", 70);
        store.upsert(&alert, "ind:a", "cid:ind:a").unwrap();

        let (found, full_id) = store.get_by_display_id("ind:a").unwrap().unwrap();
        assert_eq!(full_id, "cid:ind:a");
        assert_eq!(found, alert);

        assert!(store.get_by_display_id("ind:missing").unwrap().is_none());
    }

    #[test]
    fn list_recent_orders_by_creation_desc() {
        let (_dir, store) = store();
        for (id, created) in [
            ("a", "2025-06-01T00:00:01Z"),
            ("c", "2025-06-01T00:00:03Z"),
            ("b", "2025-06-01T00:00:02Z"),
        ] {
            let alert = sample(id, created, 50);
            store
                .upsert(&alert, &format!("ind:{id}"), &format!("cid:ind:{id}"))
                .unwrap();
        }

        let recent = store.list_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].short_id, "ind:c");
        assert_eq!(recent[1].short_id, "ind:b");
    }

    #[test]
    fn stats_group_by_severity_and_product() {
        let (_dir, store) = store();
        store
            .upsert(&sample("a", "2025-06-01T00:00:01Z", 70), "ind:a", "cid:ind:a")
            .unwrap();
        store
            .upsert(&sample("b", "2025-06-01T00:00:02Z", 70), "ind:b", "cid:ind:b")
            .unwrap();
        store
            .upsert(&sample("c", "2025-06-02T00:00:01Z", 30), "ind:c", "cid:ind:c")
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_severity, vec![("70".into(), 2), ("30".into(), 1)]);
        assert_eq!(stats.by_product, vec![("EDR".into(), 3)]);

        let daily = store.daily_stats("2025-06-01").unwrap();
        assert_eq!(daily.total, 2);
        assert_eq!(daily.by_severity, vec![("70".into(), 2)]);

        let empty = store.daily_stats("2024-01-01").unwrap();
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn purge_reports_deleted_count() {
        let (_dir, store) = store();
        store
            .upsert(&sample("a", "2025-06-01T00:00:01Z", 70), "ind:a", "cid:ind:a")
            .unwrap();
        store
            .upsert(&sample("b", "2025-06-01T00:00:02Z", 70), "ind:b", "cid:ind:b")
            .unwrap();

        assert_eq!(store.purge().unwrap(), 2);
        assert_eq!(store.purge().unwrap(), 0);
        assert!(store.list_recent(10).unwrap().is_empty());
    }

    #[test]
    fn json_export_round_trips_complete_records() {
        let (dir, store) = store();
        let alerts = [
            sample("a", "2025-06-01T00:00:01Z", 70),
            sample("b", "2025-06-01T00:00:02Z", 30),
            sample("c", "2025-06-01T00:00:03Z", 90),
        ];
        for alert in &alerts {
            let full = alert.full_id().unwrap().to_string();
            store
                .upsert(alert, crate::core::alert::derive_display_id(&full), &full)
                .unwrap();
        }

        let out = dir.path().join("db.json");
        assert_eq!(store.export_json(&out).unwrap(), 3);

        let parsed: Vec<AlertRecord> =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed.len(), 3);
        // Export is creation-descending.
        assert_eq!(parsed[0], alerts[2]);
        assert_eq!(parsed[1], alerts[1]);
        assert_eq!(parsed[2], alerts[0]);
    }

    #[test]
    fn csv_export_writes_header_and_escapes_fields() {
        let (dir, store) = store();
        let alert = record(json!({
            "id": "cid:ind:a",
            "name": "comma, in name",
            "description": "quote \" inside",
            "severity": 70,
            "status": "new",
            "product": "EDR",
            "device": {"hostname": "web01"},
            "created_timestamp": "2025-06-01T00:00:01Z",
            "updated_timestamp": "2025-06-01T00:00:02Z",
        }));
        store.upsert(&alert, "ind:a", "cid:ind:a").unwrap();

        let out = dir.path().join("db.csv");
        assert_eq!(store.export_csv(&out).unwrap(), 1);

        let content = fs::read_to_string(&out).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ID,Name,Severity,Status,Product,Hostname,Created,Updated,Description"
        );
        assert_eq!(
            lines.next().unwrap(),
            "ind:a,\"comma, in name\",70,new,EDR,web01,2025-06-01T00:00:01Z,2025-06-01T00:00:02Z,\"quote \"\" inside\""
        );
    }

    #[test]
    fn severity_binding_follows_integer_affinity() {
        let (_dir, store) = store();
        let numeric_string = record(json!({
            "id": "cid:ind:s",
            "severity": "70",
            "created_timestamp": "2025-06-01T00:00:01Z",
        }));
        store.upsert(&numeric_string, "ind:s", "cid:ind:s").unwrap();

        let text = record(json!({
            "id": "cid:ind:t",
            "severity": "high",
            "created_timestamp": "2025-06-01T00:00:02Z",
        }));
        store.upsert(&text, "ind:t", "cid:ind:t").unwrap();

        let stats = store.stats().unwrap();
        let keys: Vec<&str> = stats.by_severity.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"70"));
        assert!(keys.contains(&"high"));
    }
}
