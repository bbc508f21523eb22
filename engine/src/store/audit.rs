/// Audit trail
///
/// Append-only. Each terminal step is written once, with its result text
/// cut to the configured byte cap before it reaches the database.
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fields supplied by the caller; id and timestamp are assigned on insert
#[derive(Debug, Clone, Default)]
pub struct NewAuditRecord {
    pub plan_id: Option<String>,
    pub step_id: Option<String>,
    pub handler: String,
    pub tool: Option<String>,
    pub task: String,
    pub result: String,
    pub status: String,
    pub risk_tier: Option<String>,
    pub error_code: Option<String>,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: i64,
    pub plan_id: Option<String>,
    pub step_id: Option<String>,
    pub handler: String,
    pub tool: Option<String>,
    pub task: String,
    pub result: String,
    pub status: String,
    pub risk_tier: Option<String>,
    pub error_code: Option<String>,
    pub tokens_used: i64,
}

/// Per-handler totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandlerStats {
    pub handler: String,
    pub count: i64,
    pub successes: i64,
    pub tokens_used: i64,
}

/// Longest prefix of `text` that fits in `cap` bytes on a char boundary
pub fn truncate_to_cap(text: &str, cap: usize) -> &str {
    if text.len() <= cap {
        return text;
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub struct AuditRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    result_cap: usize,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>, result_cap: usize) -> Self {
        Self {
            pool,
            write_lock,
            result_cap,
        }
    }

    pub fn result_cap(&self) -> usize {
        self.result_cap
    }

    /// Append one record
    pub async fn record(&self, entry: NewAuditRecord) -> Result<AuditRecord> {
        let timestamp = chrono::Utc::now().timestamp();
        let result = truncate_to_cap(&entry.result, self.result_cap).to_string();

        let id = {
            let _guard = self.write_lock.lock().await;
            sqlx::query(
                "INSERT INTO audit_logs \
                 (timestamp, plan_id, step_id, handler, tool, task, result, status, risk_tier, error_code, tokens_used) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(timestamp)
            .bind(&entry.plan_id)
            .bind(&entry.step_id)
            .bind(&entry.handler)
            .bind(&entry.tool)
            .bind(&entry.task)
            .bind(&result)
            .bind(&entry.status)
            .bind(&entry.risk_tier)
            .bind(&entry.error_code)
            .bind(i64::from(entry.tokens_used))
            .execute(&self.pool)
            .await
            .context("Failed to write audit record")?
            .last_insert_rowid()
        };

        tracing::debug!("Audit #{}: {} {} [{}]", id, entry.handler, entry.status, entry.task);

        Ok(AuditRecord {
            id,
            timestamp,
            plan_id: entry.plan_id,
            step_id: entry.step_id,
            handler: entry.handler,
            tool: entry.tool,
            task: entry.task,
            result,
            status: entry.status,
            risk_tier: entry.risk_tier,
            error_code: entry.error_code,
            tokens_used: i64::from(entry.tokens_used),
        })
    }

    /// Newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query("SELECT * FROM audit_logs ORDER BY id DESC LIMIT ?")
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .context("Failed to read audit records")?;
        rows.iter().map(row_to_record).collect()
    }

    /// Records of one plan, in write order
    pub async fn for_plan(&self, plan_id: &str) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query("SELECT * FROM audit_logs WHERE plan_id = ? ORDER BY id ASC")
            .bind(plan_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read plan audit records")?;
        rows.iter().map(row_to_record).collect()
    }

    /// The `n`-th most recent record that resolved to a tool (1 = latest)
    ///
    /// These are the steps a user can rate after the fact.
    pub async fn nth_rateable(&self, n: i64) -> Result<Option<AuditRecord>> {
        let row = sqlx::query(
            "SELECT * FROM audit_logs WHERE tool IS NOT NULL ORDER BY id DESC LIMIT 1 OFFSET ?",
        )
        .bind((n - 1).max(0))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read rateable audit record")?;
        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count audit records")
    }

    /// Count, successes and cumulative tokens per handler, by handler name
    pub async fn aggregate_by_handler(&self) -> Result<Vec<HandlerStats>> {
        let rows = sqlx::query(
            "SELECT handler, COUNT(*) AS count, \
             COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS successes, \
             COALESCE(SUM(tokens_used), 0) AS tokens_used \
             FROM audit_logs GROUP BY handler ORDER BY handler",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate audit records")?;

        rows.iter()
            .map(|row| {
                Ok(HandlerStats {
                    handler: row.try_get("handler")?,
                    count: row.try_get("count")?,
                    successes: row.try_get("successes")?,
                    tokens_used: row.try_get("tokens_used")?,
                })
            })
            .collect()
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRecord> {
    Ok(AuditRecord {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        plan_id: row.try_get("plan_id")?,
        step_id: row.try_get("step_id")?,
        handler: row.try_get("handler")?,
        tool: row.try_get("tool")?,
        task: row.try_get("task")?,
        result: row.try_get("result")?,
        status: row.try_get("status")?,
        risk_tier: row.try_get("risk_tier")?,
        error_code: row.try_get("error_code")?,
        tokens_used: row.try_get("tokens_used")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use tempfile::TempDir;

    async fn repo(cap: usize) -> (TempDir, AuditRepository) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("audit.db")).await.unwrap();
        (temp, db.audit(cap))
    }

    fn entry(handler: &str, status: &str, tokens: u32) -> NewAuditRecord {
        NewAuditRecord {
            handler: handler.to_string(),
            task: "task".to_string(),
            result: "ok".to_string(),
            status: status.to_string(),
            tokens_used: tokens,
            ..Default::default()
        }
    }

    #[test]
    fn test_truncate_to_cap() {
        assert_eq!(truncate_to_cap("hello", 10), "hello");
        assert_eq!(truncate_to_cap("hello", 3), "hel");
        // 'é' is two bytes; a cut inside it backs off
        assert_eq!(truncate_to_cap("aé", 2), "a");
        assert_eq!(truncate_to_cap("", 0), "");
    }

    #[tokio::test]
    async fn test_record_truncates_result() {
        let (_temp, repo) = repo(16).await;
        let mut e = entry("SysAgent", "success", 0);
        e.result = "x".repeat(100);
        let rec = repo.record(e).await.unwrap();
        assert_eq!(rec.result.len(), 16);

        let stored = repo.recent(1).await.unwrap();
        assert_eq!(stored[0].result.len(), 16);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let (_temp, repo) = repo(2000).await;
        for handler in ["A", "B", "C"] {
            repo.record(entry(handler, "success", 0)).await.unwrap();
        }
        let recent = repo.recent(2).await.unwrap();
        let names: Vec<&str> = recent.iter().map(|r| r.handler.as_str()).collect();
        assert_eq!(names, vec!["C", "B"]);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_aggregate_by_handler() {
        let (_temp, repo) = repo(2000).await;
        repo.record(entry("SysAgent", "success", 0)).await.unwrap();
        repo.record(entry("SysAgent", "failed", 120)).await.unwrap();
        repo.record(entry("GitAgent", "success", 40)).await.unwrap();

        let stats = repo.aggregate_by_handler().await.unwrap();
        assert_eq!(
            stats,
            vec![
                HandlerStats {
                    handler: "GitAgent".to_string(),
                    count: 1,
                    successes: 1,
                    tokens_used: 40
                },
                HandlerStats {
                    handler: "SysAgent".to_string(),
                    count: 2,
                    successes: 1,
                    tokens_used: 120
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let (_temp, repo) = repo(2000).await;
        let repo = Arc::new(repo);
        let mut handles = Vec::new();
        for i in 0..20 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.record(entry(&format!("H{}", i % 3), "success", 1)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(repo.count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_nth_rateable_skips_unresolved_steps() {
        let (_temp, repo) = repo(2000).await;
        let mut ram = entry("SysAgent", "success", 0);
        ram.tool = Some("check_ram".to_string());
        ram.task = "check ram usage".to_string();
        let mut log = entry("GitAgent", "failed", 0);
        log.tool = Some("git_log".to_string());
        repo.record(ram).await.unwrap();
        repo.record(log).await.unwrap();
        // Unknown handler: never reached a tool
        repo.record(entry("GhostAgent", "failed", 0)).await.unwrap();

        let latest = repo.nth_rateable(1).await.unwrap().unwrap();
        assert_eq!(latest.tool.as_deref(), Some("git_log"));

        let second = repo.nth_rateable(2).await.unwrap().unwrap();
        assert_eq!(second.handler, "SysAgent");
        assert_eq!(second.task, "check ram usage");

        assert!(repo.nth_rateable(3).await.unwrap().is_none());
        // Zero and negative counts mean the latest
        assert_eq!(repo.nth_rateable(0).await.unwrap().unwrap().id, latest.id);
    }

    #[tokio::test]
    async fn test_for_plan() {
        let (_temp, repo) = repo(2000).await;
        let mut a = entry("SysAgent", "success", 0);
        a.plan_id = Some("p1".to_string());
        let mut b = entry("GitAgent", "failed", 0);
        b.plan_id = Some("p2".to_string());
        repo.record(a).await.unwrap();
        repo.record(b).await.unwrap();

        let p1 = repo.for_plan("p1").await.unwrap();
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].handler, "SysAgent");
    }
}
