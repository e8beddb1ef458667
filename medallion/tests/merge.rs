#![cfg(feature = "test-utils")]

use medallion::error::ErrorKind;
use medallion::store::checkpoint::{CheckpointStore, Stage};
use medallion::store::table::TableStore;
use medallion::test_utils::history::{assert_single_open_version, assert_valid_history};
use medallion::test_utils::pipeline::create_pipeline;
use medallion::test_utils::schema::{business_key, customers_source, source_record};
use medallion::types::{BusinessKey, CleanRecord, Offset, RecordHash, Value};
use medallion_telemetry::tracing::init_test_tracing;
use serde_json::json;
use std::collections::BTreeMap;

fn clean_snapshot(key: &str, offset: u64, batch_id: uuid::Uuid) -> CleanRecord {
    let attributes = BTreeMap::from([
        ("customer_id".to_string(), Value::Text(key.to_string())),
        ("name".to_string(), Value::Text("Acme".to_string())),
        ("tier".to_string(), Value::Integer(offset as i64)),
    ]);

    CleanRecord {
        source_id: "customers".to_string(),
        source_offset: Offset(offset),
        batch_id,
        ingested_at: chrono::Utc::now(),
        business_key: BusinessKey::new(vec![key.to_string()]),
        record_hash: RecordHash::compute(&attributes),
        attributes,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn first_observation_opens_version_one() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;

    let summary = test.pipeline.run().await.unwrap();
    assert_eq!(summary.sources[0].merge.new_entities, 1);

    let versions = test.tables.versions(&business_key("C1")).await.unwrap();
    assert_single_open_version(&versions);
    assert_eq!(versions[0].version_id, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn attribute_change_closes_and_opens_contiguously() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.pipeline.run().await.unwrap();

    test.source
        .push(
            "customers",
            source_record(2, json!({"customer_id": "C1", "name": "Acme", "tier": 2})),
        )
        .await;
    let summary = test.pipeline.run().await.unwrap();
    assert_eq!(summary.sources[0].merge.changed, 1);

    let versions = test.tables.versions(&business_key("C1")).await.unwrap();
    assert_valid_history(&versions);
    assert_eq!(versions.len(), 2);

    // The old version closes exactly where the new one opens.
    assert_eq!(versions[0].valid_to, Some(versions[1].valid_from));
    assert!(versions[1].is_current());
    assert_eq!(
        versions[1].attributes.get("tier"),
        Some(&Value::Integer(2))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_record_does_not_touch_history() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.pipeline.run().await.unwrap();

    let before = test.tables.versions(&business_key("C1")).await.unwrap();

    // The same attribute values arrive again at a later offset.
    test.source
        .push(
            "customers",
            source_record(2, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    let summary = test.pipeline.run().await.unwrap();

    assert_eq!(summary.sources[0].merge.unchanged, 1);
    assert_eq!(summary.sources[0].merge.changed, 0);

    let after = test.tables.versions(&business_key("C1")).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread")]
async fn as_of_reads_recover_each_point_in_time() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.pipeline.run().await.unwrap();

    test.source
        .push(
            "customers",
            source_record(2, json!({"customer_id": "C1", "name": "Acme", "tier": 2})),
        )
        .await;
    test.pipeline.run().await.unwrap();

    let key = business_key("C1");
    let versions = test.tables.versions(&key).await.unwrap();
    assert_eq!(versions.len(), 2);

    let at_v1 = test
        .tables
        .version_as_of(&key, versions[0].valid_from)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_v1.version_id, 1);
    assert_eq!(at_v1.attributes.get("tier"), Some(&Value::Integer(1)));

    // At the transition timestamp the successor is already valid.
    let at_v2 = test
        .tables
        .version_as_of(&key, versions[1].valid_from)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_v2.version_id, 2);

    let before_history = test
        .tables
        .version_as_of(&key, versions[0].valid_from - chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert!(before_history.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn changes_in_one_run_share_a_single_timestamp() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.source
        .push(
            "customers",
            source_record(2, json!({"customer_id": "C2", "name": "Globex", "tier": 1})),
        )
        .await;
    test.pipeline.run().await.unwrap();

    test.source
        .push(
            "customers",
            source_record(3, json!({"customer_id": "C1", "name": "Acme", "tier": 2})),
        )
        .await;
    test.source
        .push(
            "customers",
            source_record(4, json!({"customer_id": "C2", "name": "Globex", "tier": 2})),
        )
        .await;
    test.pipeline.run().await.unwrap();

    let c1 = test.tables.versions(&business_key("C1")).await.unwrap();
    let c2 = test.tables.versions(&business_key("C2")).await.unwrap();

    assert_eq!(c1[1].valid_from, c2[1].valid_from);
    assert_eq!(c1[0].valid_to, c2[0].valid_to);
}

#[tokio::test(flavor = "multi_thread")]
async fn catch_up_over_multiple_clean_commits_converges() {
    init_test_tracing();

    let test = create_pipeline(customers_source());

    // Two clean commits accumulate two snapshots of the same key before any
    // merge runs.
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.pipeline.run_ingest("customers").await.unwrap();
    test.pipeline.run_clean("customers").await.unwrap();

    test.source
        .push(
            "customers",
            source_record(2, json!({"customer_id": "C1", "name": "Acme", "tier": 2})),
        )
        .await;
    test.pipeline.run_ingest("customers").await.unwrap();
    test.pipeline.run_clean("customers").await.unwrap();

    let report = test.pipeline.run_merge("customers").await.unwrap();

    // The earlier snapshot is superseded and the latest one opens version 1.
    assert_eq!(report.new_entities, 1);
    assert_eq!(report.superseded, 1);

    let versions = test.tables.versions(&business_key("C1")).await.unwrap();
    assert_single_open_version(&versions);
    assert_eq!(
        versions[0].attributes.get("tier"),
        Some(&Value::Integer(2))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_keys_in_one_clean_commit_reject_the_merge() {
    init_test_tracing();

    let test = create_pipeline(customers_source());

    // Simulate an upstream dedup failure: two rows with the same key and the
    // same batch id land in the clean table.
    let batch_id = uuid::Uuid::new_v4();
    test.tables
        .append_clean(vec![
            clean_snapshot("C1", 1, batch_id),
            clean_snapshot("C1", 2, batch_id),
        ])
        .await
        .unwrap();

    let err = test.pipeline.run_merge("customers").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKeyInBatch);

    // No partial history was written and the checkpoint did not move.
    assert!(test.tables.history_keys().await.is_empty());
    let checkpoint = test
        .checkpoints
        .get(Stage::Merge, "customers")
        .await
        .unwrap();
    assert_eq!(checkpoint, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_recovers_after_exhausted_retries() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.pipeline.run_ingest("customers").await.unwrap();
    test.pipeline.run_clean("customers").await.unwrap();

    // The merge write fails through the whole retry budget.
    test.tables.fail_next_writes(3).await;
    let err = test.pipeline.run_merge("customers").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreIoError);

    // A new snapshot for the same key is ingested and cleaned before the
    // merge is retried, widening the merge window to two clean commits.
    test.source
        .push(
            "customers",
            source_record(2, json!({"customer_id": "C1", "name": "Acme", "tier": 2})),
        )
        .await;
    test.pipeline.run_ingest("customers").await.unwrap();
    test.pipeline.run_clean("customers").await.unwrap();

    let report = test.pipeline.run_merge("customers").await.unwrap();
    assert_eq!(report.new_entities, 1);
    assert_eq!(report.superseded, 1);

    let versions = test.tables.versions(&business_key("C1")).await.unwrap();
    assert_single_open_version(&versions);
    assert_eq!(
        versions[0].attributes.get("tier"),
        Some(&Value::Integer(2))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_history_write_leaves_everything_untouched() {
    init_test_tracing();

    let test = create_pipeline(customers_source());
    test.source
        .push(
            "customers",
            source_record(1, json!({"customer_id": "C1", "name": "Acme", "tier": 1})),
        )
        .await;
    test.pipeline.run_ingest("customers").await.unwrap();
    test.pipeline.run_clean("customers").await.unwrap();

    test.tables.fail_next_writes(3).await;
    let err = test.pipeline.run_merge("customers").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreIoError);

    assert!(test.tables.history_keys().await.is_empty());
    let checkpoint = test
        .checkpoints
        .get(Stage::Merge, "customers")
        .await
        .unwrap();
    assert_eq!(checkpoint, None);

    // Re-running the merge applies the same batch exactly once.
    let report = test.pipeline.run_merge("customers").await.unwrap();
    assert_eq!(report.new_entities, 1);
    assert_single_open_version(&test.tables.versions(&business_key("C1")).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_changes_build_a_dense_version_chain() {
    init_test_tracing();

    let test = create_pipeline(customers_source());

    for (offset, tier) in [(1u64, 1), (2, 2), (3, 3)] {
        test.source
            .push(
                "customers",
                source_record(
                    offset,
                    json!({"customer_id": "C1", "name": "Acme", "tier": tier}),
                ),
            )
            .await;
        test.pipeline.run().await.unwrap();
    }

    let versions = test.tables.versions(&business_key("C1")).await.unwrap();
    assert_valid_history(&versions);
    assert_eq!(versions.len(), 3);
    assert_eq!(
        versions[2].attributes.get("tier"),
        Some(&Value::Integer(3))
    );
}
