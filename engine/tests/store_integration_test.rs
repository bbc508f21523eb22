//! Persistence across database reopen
//!
//! Audit rows written during a run and feedback ratings must both survive
//! closing and reopening the database file.

mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::{plan_reply, HarnessBuilder};
use steward_engine::conductor::CancelToken;
use steward_engine::llm::embedding::HashingEmbedder;
use steward_engine::store::Database;

#[tokio::test]
async fn test_audit_trail_survives_reopen() {
    let reply = plan_reply(&[
        ("SysAgent", "check ram usage"),
        ("GhostAgent", "haunt"),
    ]);
    let h = HarnessBuilder::new(&[&reply]).build().await;
    let plan = h
        .orchestrator
        .run("ram and a ghost", &CancelToken::new())
        .await;
    assert_eq!(plan.steps.len(), 2);

    let db = Database::new(&h.temp.path().join("steward.db")).await.unwrap();
    let audit = db.audit(2000);

    let records = audit.for_plan(&plan.id).await.unwrap();
    let statuses: Vec<&str> = records.iter().map(|r| r.status.as_str()).collect();
    assert_eq!(statuses, vec!["success", "failed"]);
    assert_eq!(records[1].error_code.as_deref(), Some("AGENT_NOT_FOUND"));

    let stats = audit.aggregate_by_handler().await.unwrap();
    let sys = stats.iter().find(|s| s.handler == "SysAgent").unwrap();
    assert_eq!(sys.count, 1);
    assert_eq!(sys.successes, 1);
    let ghost = stats.iter().find(|s| s.handler == "GhostAgent").unwrap();
    assert_eq!(ghost.successes, 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_feedback_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("steward.db");

    {
        let db = Database::new(&path).await.unwrap();
        let feedback = db.feedback(Arc::new(HashingEmbedder::default()));
        feedback
            .record_feedback("check ram usage", "SysAgent", "check_ram", 5)
            .await
            .unwrap();
        feedback
            .record_feedback("show git log", "GitAgent", "git_log", 2)
            .await
            .unwrap();
        db.close().await.unwrap();
    }

    let db = Database::new(&path).await.unwrap();
    let feedback = db.feedback(Arc::new(HashingEmbedder::default()));

    let hits = feedback.find_similar("how much ram is used", 3, 3).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.tool, "check_ram");
    assert!(hits[0].similarity > 0.0);

    // Below the rating floor
    assert!(feedback.find_similar("show git log", 3, 3).await.unwrap().is_empty());
    db.close().await.unwrap();
}
