//! End-to-end scenarios against a fully built control plane.

use mnemon::{Config, ControlPlane};
use mnemon_lifecycle::LifecyclePolicy;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// A config rooted entirely inside a temp dir, with fast loops.
fn test_config(root: &Path) -> Config {
    Config {
        database_path: root.join("mnemon.sqlite3"),
        schema_dir: root.join("schemas"),
        watch_folders: vec![root.join("watched")],
        scan_interval_seconds: 1,
        approval_interval_seconds: 1,
        alert_interval_seconds: 1,
        gateway_timeout_seconds: 5,
        medium_confidence_floor: 0.75,
        stale_pending_hours: 24,
        lifecycle: LifecyclePolicy {
            monitor_interval_seconds: 1,
            ..Default::default()
        },
    }
}

fn write_file(dir: &Path, name: &str, contents: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
}

#[tokio::test]
async fn boot_seeds_schemas_and_materializes() {
    let root = tempfile::tempdir().unwrap();
    let plane = ControlPlane::build(test_config(root.path())).await.unwrap();

    let tables = plane.tables();
    assert!(tables.iter().any(|t| t.name == "memory_documents"));
    assert!(tables.iter().any(|t| t.name == "memory_playbooks"));

    // The schema dir now holds one YAML file per table.
    let yaml_count = std::fs::read_dir(root.path().join("schemas"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .ok()
                .map(|e| e.path().extension().map(|x| x == "yaml").unwrap_or(false))
                .unwrap_or(false)
        })
        .count();
    assert_eq!(yaml_count, tables.len());
}

#[tokio::test]
async fn happy_path_document_ingestion() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let watched = config.watch_folders[0].clone();
    let plane = ControlPlane::build(config).await.unwrap();

    write_file(&watched, "doc.txt", "Alpha\n\nHello.");
    plane.start_ingestion(None);

    // One staging interval plus one approval interval, with slack.
    let mut rows = Vec::new();
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        rows = plane.rows("memory_documents", None, None, None).await.unwrap();
        if !rows.is_empty() {
            break;
        }
    }
    plane.stop_ingestion().await;

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.get_str("title"), Some("Alpha"));
    assert_eq!(row.get_i64("token_count"), Some(2));
    assert!(row.get_str("source_type").is_some());
    let trust = row.trust_score();
    assert!(trust > 0.5 && trust <= 1.0, "trust was {trust}");

    // No active alerts reference this row.
    let alerts = plane.active_alerts(None).unwrap();
    let row_id = row.id().unwrap();
    assert!(alerts.iter().all(|a| !a.metadata.to_string().contains(&row_id)));
}

#[tokio::test]
async fn queued_ingestion_jobs_all_complete() {
    let root = tempfile::tempdir().unwrap();
    let plane = ControlPlane::build(test_config(root.path())).await.unwrap();

    for i in 0..10 {
        plane
            .submit_job(
                "ingestion",
                serde_json::json!({
                    "table_name": "memory_documents",
                    "row_data": {
                        "title": format!("Doc {i}"),
                        "file_path": format!("/bulk/doc{i}.txt"),
                        "created_by": "auto_ingestion",
                    },
                }),
            )
            .unwrap();
    }
    assert_eq!(plane.lifecycle_metrics().pending_jobs, 10);

    let metrics = plane.process_queue(Some(3)).await;
    assert_eq!(metrics.pending_jobs, 0);
    assert_eq!(metrics.total_jobs_executed, 10);

    let rows = plane
        .rows("memory_documents", Some(100), None, None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 10);
    for row in rows {
        let trust = row.trust_score();
        assert!((0.0..=1.0).contains(&trust));
    }
}

#[tokio::test]
async fn agent_lifecycle_surface() {
    let root = tempfile::tempdir().unwrap();
    let plane = ControlPlane::build(test_config(root.path())).await.unwrap();

    assert!(matches!(
        plane.spawn_agent("orchestrator", None).await,
        Err(mnemon::ApiError::UnknownAgentKind(_))
    ));

    let snapshot = plane.spawn_agent("ingestion", None).await.unwrap();
    let id = snapshot.agent_id.to_string();
    assert_eq!(plane.lifecycle_metrics().active_count, 1);
    assert!(plane.agent(&id).is_ok());

    // Terminate: status is gone, metrics archive keeps the id.
    assert!(plane.terminate_agent(&id).await.unwrap());
    assert!(plane.agent(&id).is_err());
    assert!(plane.lifecycle_metrics().archive.contains_key(&id));

    // Revocation tombstones the id even after termination.
    plane.revoke_agent(&id, "test").await.unwrap();
    assert_eq!(plane.lifecycle_metrics().revoked_count, 1);
}

#[tokio::test]
async fn idle_agents_evicted_by_monitor() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.lifecycle.max_idle_minutes = 0;
    let plane = ControlPlane::build(config).await.unwrap();

    let snapshot = plane.spawn_agent("ingestion", None).await.unwrap();
    let id = snapshot.agent_id.to_string();

    plane.start_lifecycle_monitoring();
    let mut evicted = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if plane.agent(&id).is_err() {
            evicted = true;
            break;
        }
    }
    plane.stop_lifecycle_monitoring().await;

    assert!(evicted, "idle agent should have been evicted");
    assert_eq!(plane.lifecycle_metrics().active_count, 0);
    assert!(plane.lifecycle_metrics().archive.contains_key(&id));
}

#[tokio::test]
async fn governed_insert_and_rescore() {
    let root = tempfile::tempdir().unwrap();
    let plane = ControlPlane::build(test_config(root.path())).await.unwrap();

    let result = plane
        .insert_row(
            "memory_documents",
            serde_json::json!({
                "title": "Test Document Alpha",
                "summary": "a summary of alpha things",
                "file_path": "/gov/a.txt",
            }),
        )
        .await
        .unwrap();
    assert!(!result.pending);
    let row = result.row.unwrap();
    assert!(row.get("governance_stamp").is_some());

    // A near-identical second document produces a contradiction ...
    plane
        .insert_row(
            "memory_documents",
            serde_json::json!({
                "title": "Test Document Alpha",
                "summary": "a summary of alpha things",
                "file_path": "/gov/b.txt",
            }),
        )
        .await
        .unwrap();

    let records = plane.contradictions("memory_documents").await.unwrap();
    assert!(records.iter().any(|r| r.rule_name == "duplicate_content"));

    // ... and rescoring against the fresh snapshot lowers trust below a
    // contradiction-free baseline.
    let updated = plane.rescore("memory_documents").await.unwrap();
    assert_eq!(updated, 2);
    let rows = plane
        .rows("memory_documents", None, None, None)
        .await
        .unwrap();
    for row in &rows {
        assert!((0.0..=1.0).contains(&row.trust_score()));
    }

    let report = plane.trust_report().await.unwrap();
    assert_eq!(report.tables["memory_documents"].total_rows, 2);
}

#[tokio::test]
async fn empty_store_trust_report() {
    let root = tempfile::tempdir().unwrap();
    let plane = ControlPlane::build(test_config(root.path())).await.unwrap();

    let report = plane.trust_report().await.unwrap();
    assert_eq!(report.overall.total_rows, 0);
    assert!(report.tables.is_empty());

    let rescored = plane.rescore("memory_documents").await.unwrap();
    assert_eq!(rescored, 0);
}

#[tokio::test]
async fn training_counters_survive_rebuild() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    {
        let plane = ControlPlane::build(config.clone()).await.unwrap();
        for i in 0..3 {
            plane
                .insert_row(
                    "memory_documents",
                    serde_json::json!({
                        "title": format!("Doc {i}"),
                        "file_path": format!("/persist/doc{i}.txt"),
                    }),
                )
                .await
                .unwrap();
        }
        let status = plane.training_status().await.unwrap();
        assert_eq!(status["memory_documents"].new_rows, 3);
    }

    // A fresh process over the same database sees the same counter.
    let plane = ControlPlane::build(config).await.unwrap();
    let status = plane.training_status().await.unwrap();
    assert_eq!(status["memory_documents"].new_rows, 3);
}

#[tokio::test]
async fn alert_check_flags_empty_critical_tables() {
    let root = tempfile::tempdir().unwrap();
    let plane = ControlPlane::build(test_config(root.path())).await.unwrap();

    plane.subsystems().alerts.check().await;
    let alerts = plane.active_alerts(Some("info")).unwrap();
    assert!(alerts
        .iter()
        .any(|a| a.id == "empty_table_memory_documents"));

    // Same condition on a second pass: one alert, first_seen preserved.
    let first_seen = alerts[0].first_seen_at;
    plane.subsystems().alerts.check().await;
    let again = plane.active_alerts(Some("info")).unwrap();
    let same = again
        .iter()
        .find(|a| a.id == alerts[0].id)
        .expect("alert still active");
    assert_eq!(same.first_seen_at, first_seen);
}
