mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use escalation::{AuditRecord, DocumentStatus, Pipeline};
use eval::ModeConfig;
use extract::ModelTier;

#[tokio::test]
async fn test_results_come_back_in_input_order() {
    let primary = scenario_a();
    let mut invoker = ScriptedInvoker::new();
    let mut documents = Vec::new();
    for i in 0..6 {
        let id = format!("doc-{i}");
        documents.push(document(&id, &[&primary], 2000));
        invoker = invoker.script(&id, ModelTier::Primary, vec![Reply::Candidate(primary.clone())]);
    }
    let (engine, _sink) = engine(Arc::new(invoker), ModeConfig::production());
    let pipeline = Pipeline::new(Arc::new(engine), 2);

    let results = pipeline.run(documents).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(ids, vec!["doc-0", "doc-1", "doc-2", "doc-3", "doc-4", "doc-5"]);
    assert!(results.iter().all(|r| r.status == DocumentStatus::Accepted));

    let summary = pipeline.summarize(&results);
    assert_eq!(summary.documents, 6);
    assert_eq!(summary.accepted_primary, 6);
    assert_eq!(summary.escalation_rate, 0.0);
    assert_eq!(summary.usage.calls, 6);
    assert_eq!(summary.usage.total_tokens, 3000);
}

#[tokio::test]
async fn test_mixed_batch_summary() {
    let a = scenario_a();
    let b = scenario_b();
    let c = scenario_c(ModelTier::Understudy);
    let invoker = ScriptedInvoker::new()
        .script("good", ModelTier::Primary, vec![Reply::Candidate(a.clone())])
        .script("weak", ModelTier::Primary, vec![Reply::Candidate(b.clone())])
        .script("weak", ModelTier::Understudy, vec![Reply::Candidate(c.clone())])
        .script("broken", ModelTier::Primary, vec![Reply::Raw("{".to_string())])
        .script("broken", ModelTier::Understudy, vec![Reply::Raw("{".to_string())]);
    let documents = vec![
        document("good", &[&a], 2000),
        document("weak", &[&b, &c], 3000),
        document("broken", &[], 3000),
    ];
    let (engine, _sink) = engine(Arc::new(invoker), ModeConfig::production());
    let pipeline = Pipeline::new(Arc::new(engine), 4);

    let results = pipeline.run(documents).await.unwrap();
    let summary = pipeline.summarize(&results);

    assert_eq!(summary.mode, "escalation");
    assert_eq!(summary.accepted_primary, 1);
    assert_eq!(summary.accepted_understudy, 1);
    assert_eq!(summary.escalation_failed, 1);
    assert_eq!(summary.escalated, 2);
    assert!((summary.escalation_rate - 2.0 / 3.0).abs() < 1e-12);

    let metrics = pipeline.engine().metrics().snapshot();
    assert_eq!(metrics.primary_calls, 3);
    assert_eq!(metrics.understudy_calls, 2);
    assert_eq!(metrics.escalations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_skips_unfinished_documents() {
    let a = scenario_a();
    let invoker = ScriptedInvoker::new()
        .script("fast-1", ModelTier::Primary, vec![Reply::Candidate(a.clone())])
        .script(
            "slow",
            ModelTier::Primary,
            vec![Reply::Slow(Duration::from_secs(600), a.clone())],
        )
        .script("fast-2", ModelTier::Primary, vec![Reply::Candidate(a.clone())]);
    let documents = vec![
        document("fast-1", &[&a], 2000),
        document("slow", &[&a], 2000),
        document("fast-2", &[&a], 2000),
    ];
    let (engine, sink) = engine(Arc::new(invoker), ModeConfig::production());
    let pipeline = Pipeline::new(Arc::new(engine), 3).with_run_timeout(Some(Duration::from_secs(30)));

    let results = pipeline.run(documents).await.unwrap();

    let statuses: Vec<DocumentStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            DocumentStatus::Accepted,
            DocumentStatus::Skipped,
            DocumentStatus::Accepted
        ]
    );
    assert!(results[1].winner.is_none());

    let records = sink.records_for("slow");
    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0],
        AuditRecord::Document {
            status: DocumentStatus::Skipped,
            ..
        }
    ));

    assert_eq!(pipeline.summarize(&results).skipped, 1);
    assert_eq!(pipeline.engine().metrics().snapshot().skipped, 1);
}

#[tokio::test]
async fn test_each_batch_summary_reports_its_own_usage() {
    let a = scenario_a();
    let invoker = ScriptedInvoker::new()
        .script("first", ModelTier::Primary, vec![Reply::Candidate(a.clone())])
        .script("second", ModelTier::Primary, vec![Reply::Candidate(a.clone())]);
    let (engine, _sink) = engine(Arc::new(invoker), ModeConfig::production());
    let pipeline = Pipeline::new(Arc::new(engine), 2);

    let first = pipeline.run(vec![document("first", &[&a], 2000)]).await.unwrap();
    let first = pipeline.summarize(&first);
    assert_eq!(first.usage.documents, 1);
    assert_eq!(first.usage.calls, 1);
    assert_eq!(first.usage.total_tokens, 500);

    let second = pipeline.run(vec![document("second", &[&a], 2000)]).await.unwrap();
    let second = pipeline.summarize(&second);
    assert_eq!(second.documents, 1);
    assert_eq!(second.usage.documents, 1);
    assert_eq!(second.usage.calls, 1);
    assert_eq!(second.usage.total_tokens, 500);

    // The engine-wide counters still see both batches.
    let totals = pipeline.engine().tracker().totals();
    assert_eq!(totals.calls, 2);
    assert_eq!(totals.total_tokens, 1000);
}
