//! End-to-end partial update tests.
//!
//! Field merges restricted to the allow-list, and escalation of items whose
//! indexed fragments no longer match into a full reindex.

use pretty_assertions::assert_eq;

use e2e_tests::{test_settings, widget, RecordingProgress, TestHarness};
use reindex_pipeline::{
    NoOpProgressCallback, PartialUpdatePipeline, PartialUpdateRequest, ReindexDriver, UpdateState,
};
use reindex_search::IndexCall;
use reindex_types::{FieldMap, FieldValue, ItemId, Settings, Slot};

fn seed(harness: &TestHarness, items: &[reindex_types::LogicalItem]) {
    let ctx = harness.context();
    for item in items {
        harness
            .index
            .insert("products_en", ctx.strategy().documents_for(item, "en").unwrap());
    }
}

/// A request for title and body only writes title; body is not allow-listed.
#[tokio::test]
async fn test_only_allow_listed_fields_are_written() {
    let item = widget(42, &["en"], "Original body");
    let harness = TestHarness::new(&[item.clone()]);
    seed(&harness, &[item.clone()]);
    let ctx = harness.context();

    let mut values = FieldMap::new();
    values.insert("title".into(), "Renamed widget".into());
    values.insert("body".into(), "Rewritten body".into());
    let request = PartialUpdateRequest::new(item.id.clone(), "en", values);

    let outcome = PartialUpdatePipeline::new(&ctx)
        .apply(vec![request], &NoOpProgressCallback)
        .await;

    assert_eq!(outcome.applied, vec![item.id.clone()]);
    assert_eq!(outcome.state_of(&item.id), Some(UpdateState::Partial));

    let stored = harness
        .index
        .get(
            "products_en",
            &ctx.codec().encode(&item.id, "en", Slot::Main).unwrap(),
        )
        .unwrap();
    assert_eq!(stored.fields["title"], FieldValue::from("Renamed widget"));
    assert_eq!(stored.fields["body"], FieldValue::from("Original body"));
    assert_eq!(stored.fields["summary"], FieldValue::from("Signal adapter"));

    let calls = harness.index.calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], IndexCall::PartialUpdate { .. }));
}

/// Items whose fragments changed shape go through a full reindex.
#[tokio::test]
async fn test_mismatched_items_escalate_to_full_reindex() {
    let settings = Settings {
        max_slice_bytes: 4,
        ..test_settings()
    };
    let stable = widget(1, &["en"], "tiny");
    let grown = widget(2, &["en"], "aaaa bbbb");
    let harness = TestHarness::with_settings(&[stable.clone(), grown.clone()], settings);
    let ctx = harness.context();

    seed(&harness, &[stable.clone()]);
    let grown_main = ctx.strategy().documents_for(&grown, "en").unwrap().remove(0);
    harness.index.insert("products_en", [grown_main]);
    assert_eq!(harness.index.len("products_en"), 2);

    let driver = ReindexDriver::new(&ctx);
    let requests = driver
        .partial_requests(&["widget".to_string()], &["title".to_string()])
        .await
        .unwrap();
    let progress = RecordingProgress::default();
    let report = driver.partial_update(requests, &progress).await.unwrap();

    assert_eq!(report.partial_applied, 1);
    assert_eq!(report.escalated, vec![grown.id.clone()]);
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.documents_saved, 2);
    assert_eq!(progress.reports().len(), 1);

    let grown_part = ctx.codec().encode(&grown.id, "en", Slot::Part(1)).unwrap();
    assert!(harness.index.get("products_en", &grown_part).is_some());
    assert_eq!(harness.index.len("products_en"), 3);

    let kinds: Vec<&str> = harness
        .index
        .calls()
        .iter()
        .map(|c| match c {
            IndexCall::PartialUpdate { .. } => "partial",
            IndexCall::Delete { .. } => "delete",
            IndexCall::Save { .. } => "save",
        })
        .collect();
    assert_eq!(kinds, vec!["partial", "delete", "save"]);
}

/// Building requests needs at least one field.
#[tokio::test]
async fn test_empty_field_list_is_rejected() {
    let harness = TestHarness::new(&[widget(1, &["en"], "x")]);
    let ctx = harness.context();
    let result = ReindexDriver::new(&ctx)
        .partial_requests(&["widget".to_string()], &[])
        .await;
    assert!(result.is_err());
    assert!(harness.index.calls().is_empty());
}

/// Requests for unknown items escalate and the follow-up reindex lists them
/// as missing.
#[tokio::test]
async fn test_unknown_item_is_escalated_and_reported_missing() {
    let harness = TestHarness::new(&[widget(1, &["en"], "x")]);
    let ctx = harness.context();
    let ghost = ItemId::parse("404").unwrap();

    let mut values = FieldMap::new();
    values.insert("title".into(), "Ghost".into());
    let report = ReindexDriver::new(&ctx)
        .partial_update(
            vec![PartialUpdateRequest::new(ghost.clone(), "en", values)],
            &NoOpProgressCallback,
        )
        .await
        .unwrap();

    assert_eq!(report.escalated, vec![ghost.clone()]);
    assert_eq!(report.missing, vec![ghost]);
    assert_eq!(report.partial_applied, 0);
}
