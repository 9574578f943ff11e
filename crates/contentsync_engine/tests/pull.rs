//! Pull intent integration tests.

use contentsync_testkit::prelude::*;
use serde_json::json;

fn incoming(uuid: &str, title: &str, changed: i64) -> PullOperation {
    PullOperation::new(article_ref(uuid), SyncAction::Create, changed)
        .with_property("title", json!(title))
        .with_property("status", json!(true))
}

fn pull(site: &TestSite, operation: &PullOperation, reason: PullReason) -> SyncResult<PullOutcome> {
    let request = site.engine.new_request();
    site.engine.pull(&request, operation, &main_channel(), reason)
}

#[test]
fn pull_creates_local_item_and_records_status() {
    let site = TestSite::new("site-b");
    let operation = incoming("n1", "Remote", START - 50);

    let outcome = pull(&site, &operation, PullReason::Automatic).unwrap();
    assert_eq!(
        outcome,
        PullOutcome::Pulled {
            action: SyncAction::Create
        }
    );

    let local = site.load(&article_ref("n1")).unwrap();
    assert_eq!(local.field(None, "title"), Some(&json!("Remote")));
    assert_eq!(local.changed, START - 50);
    assert!(local.id.is_some());

    let record = site.engine.status(&article_ref("n1"), &main_channel()).unwrap().unwrap();
    assert_eq!(record.last_pull(), Some(START));
    assert!(!record.is_source_entity());
    assert!(!record.has_push_history());
}

#[test]
fn second_pull_is_update() {
    let site = TestSite::new("site-b");
    pull(&site, &incoming("n1", "Remote", START - 50), PullReason::Automatic).unwrap();

    let outcome = pull(&site, &incoming("n1", "Remote v2", START - 10), PullReason::Automatic).unwrap();
    assert_eq!(
        outcome,
        PullOutcome::Pulled {
            action: SyncAction::Update
        }
    );
    let local = site.load(&article_ref("n1")).unwrap();
    assert_eq!(local.field(None, "title"), Some(&json!("Remote v2")));
    assert_eq!(site.content.len(), 1);
}

#[test]
fn pulled_delete_removes_local_item() {
    let site = TestSite::new("site-b");
    pull(&site, &incoming("n1", "Remote", START - 50), PullReason::Automatic).unwrap();

    let delete = PullOperation::new(article_ref("n1"), SyncAction::Delete, START - 5);
    let outcome = pull(&site, &delete, PullReason::Automatic).unwrap();
    assert_eq!(
        outcome,
        PullOutcome::Pulled {
            action: SyncAction::Delete
        }
    );
    assert!(site.load(&article_ref("n1")).is_none());
    let record = site.engine.status(&article_ref("n1"), &main_channel()).unwrap().unwrap();
    assert!(record.is_deleted());
    assert!(!record.has_pull_history());
}

#[test]
fn handler_can_decline_pull() {
    let site = TestSite::new("site-b");
    let draft = incoming("n1", "Draft", START - 50).with_property("status", json!(false));

    let outcome = pull(&site, &draft, PullReason::Automatic).unwrap();
    assert_eq!(outcome.skip_reason(), Some(SkipReason::HandlerDenied));
    assert!(site.load(&article_ref("n1")).is_none());
    let record = site.engine.status(&article_ref("n1"), &main_channel()).unwrap().unwrap();
    assert_eq!(record.last_pull(), None);
}

#[test]
fn ignored_pull_only_runs_when_forced() {
    let site = TestSite::new("site-b");
    site.handlers.node.set_ignoring(true);
    let operation = incoming("n1", "Remote", START - 50);

    let outcome = pull(&site, &operation, PullReason::Automatic).unwrap();
    assert_eq!(outcome.skip_reason(), Some(SkipReason::Ignored));
    assert_eq!(site.handlers.node.pull_calls(), 0);

    let forced = pull(&site, &operation, PullReason::Forced).unwrap();
    assert!(forced.is_pulled());
}

#[test]
fn local_override_keeps_edited_fields() {
    let site = TestSite::new("site-b");
    pull(&site, &incoming("n1", "Remote", START - 50), PullReason::Automatic).unwrap();

    let mut local = site.load(&article_ref("n1")).unwrap();
    local.set_field(None, "title", json!("Local title"));
    site.save(local);
    site.engine
        .mark_overridden_locally(&article_ref("n1"), &main_channel(), true)
        .unwrap();

    let update = incoming("n1", "Remote v2", START - 10).with_property("body", json!("Remote body"));
    pull(&site, &update, PullReason::Automatic).unwrap();

    let merged = site.load(&article_ref("n1")).unwrap();
    assert_eq!(merged.field(None, "title"), Some(&json!("Local title")));
    assert_eq!(merged.field(None, "body"), Some(&json!("Remote body")));
}

#[test]
fn without_override_remote_fields_win() {
    let site = TestSite::new("site-b");
    pull(&site, &incoming("n1", "Remote", START - 50), PullReason::Automatic).unwrap();

    let mut local = site.load(&article_ref("n1")).unwrap();
    local.set_field(None, "title", json!("Local title"));
    site.save(local);

    pull(&site, &incoming("n1", "Remote v2", START - 10), PullReason::Automatic).unwrap();
    let local = site.load(&article_ref("n1")).unwrap();
    assert_eq!(local.field(None, "title"), Some(&json!("Remote v2")));
}

#[test]
fn translations_are_applied() {
    let site = TestSite::new("site-b");
    let operation = incoming("n1", "Hello", START - 50)
        .with_translation("de", "title", json!("Hallo"));

    pull(&site, &operation, PullReason::Automatic).unwrap();
    let local = site.load(&article_ref("n1")).unwrap();
    assert_eq!(local.field(Some("de"), "title"), Some(&json!("Hallo")));
    assert_eq!(local.field(None, "title"), Some(&json!("Hello")));
}

#[test]
fn embedded_items_are_pulled_with_parent() {
    let site = TestSite::new("site-b");
    let section = EntityReference {
        kind: ReferenceKind::Embed,
        item: paragraph_ref("p1"),
        pool_id: Some("main".into()),
        hash: Some("abc".into()),
    };
    let operation = incoming("n1", "Hello", START - 50)
        .with_property("sections", json!([section.to_value()]))
        .with_embedded(
            PullOperation::new(paragraph_ref("p1"), SyncAction::Create, START - 50)
                .with_property("text", json!("First")),
        );

    pull(&site, &operation, PullReason::Automatic).unwrap();

    let paragraph = site.load(&paragraph_ref("p1")).unwrap();
    assert_eq!(paragraph.field(None, "text"), Some(&json!("First")));
    let node = site.load(&article_ref("n1")).unwrap();
    assert_eq!(node.field(None, "sections"), Some(&json!([link(&paragraph_ref("p1"))])));

    let record = site.engine.status(&paragraph_ref("p1"), &main_channel()).unwrap().unwrap();
    assert!(record.pulled_embedded());
    assert_eq!(record.parent(), Some(&article_ref("n1")));
}

#[test]
fn missing_embedded_operation_fails_pull() {
    let site = TestSite::new("site-b");
    let section = EntityReference {
        kind: ReferenceKind::Embed,
        item: paragraph_ref("p1"),
        pool_id: Some("main".into()),
        hash: None,
    };
    let operation =
        incoming("n1", "Hello", START - 50).with_property("sections", json!([section.to_value()]));

    let err = pull(&site, &operation, PullReason::Automatic).unwrap_err();
    assert!(matches!(err.root_cause(), SyncError::Data(_)));
    let record = site.engine.status(&article_ref("n1"), &main_channel()).unwrap().unwrap();
    assert_eq!(record.last_pull_failure().unwrap().kind, FailureKind::Hard);
}

#[test]
fn handler_error_is_recorded() {
    let site = TestSite::new("site-b");
    site.handlers.node.set_failing(true);

    let err = pull(&site, &incoming("n1", "Remote", START - 50), PullReason::Manual).unwrap_err();
    assert!(matches!(err, SyncError::Intent { .. }));
    let record = site.engine.status(&article_ref("n1"), &main_channel()).unwrap().unwrap();
    let failure = record.last_pull_failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Hard);
    assert_eq!(failure.at, START);
}

#[test]
fn pool_watermark_tracks_latest_change() {
    let site = TestSite::new("site-b");
    assert_eq!(site.engine.ledger().pool_watermark("main").unwrap(), None);

    pull(&site, &incoming("n1", "One", START - 20), PullReason::Automatic).unwrap();
    pull(&site, &incoming("n2", "Two", START - 80), PullReason::Automatic).unwrap();

    assert_eq!(site.engine.ledger().pool_watermark("main").unwrap(), Some(START - 20));
}

#[test]
fn pull_batch_reports_each_operation() {
    let site = TestSite::new("site-b");
    let operations = vec![
        incoming("n1", "One", START - 20),
        incoming("n2", "Draft", START - 20).with_property("status", json!(false)),
        PullOperation::new(ItemRef::new("comment", "comment", "c1"), SyncAction::Create, START),
    ];
    let request = site.engine.new_request();

    let report = site.engine.pull_batch(&request, &operations, PullReason::Automatic);
    assert_eq!(report.pulled, 1);
    assert_eq!(report.skipped_for(SkipReason::HandlerDenied), 1);
    assert_eq!(report.skipped_for(SkipReason::NoChannel), 1);
    assert!(report.is_clean());
    assert!(request.was_pulled(&article_ref("n1")));
}

#[test]
fn redelivered_operation_is_applied_once() {
    let site = TestSite::new("site-b");
    let operation = incoming("n1", "Remote", START - 10);

    assert!(pull(&site, &operation, PullReason::Automatic).unwrap().is_pulled());
    let again = pull(&site, &operation, PullReason::Automatic).unwrap();
    assert_eq!(again.skip_reason(), Some(SkipReason::Unchanged));
    assert_eq!(site.handlers.node.pull_calls(), 1);

    let record = site.engine.status(&article_ref("n1"), &main_channel()).unwrap().unwrap();
    assert_eq!(record.pulled_change(), Some(START - 10));

    let forced = pull(&site, &operation, PullReason::Forced).unwrap();
    assert_eq!(
        forced,
        PullOutcome::Pulled {
            action: SyncAction::Update
        }
    );
    assert_eq!(site.handlers.node.pull_calls(), 2);
}

#[test]
fn older_operation_does_not_overwrite_newer_content() {
    let site = TestSite::new("site-b");
    pull(&site, &incoming("n1", "new", START - 10), PullReason::Automatic).unwrap();

    let stale = pull(&site, &incoming("n1", "old", START - 50), PullReason::Automatic).unwrap();
    assert_eq!(stale.skip_reason(), Some(SkipReason::Outdated));

    let local = site.load(&article_ref("n1")).unwrap();
    assert_eq!(local.field(None, "title"), Some(&json!("new")));
    assert_eq!(site.handlers.node.pull_calls(), 1);
}

#[test]
fn delete_with_same_change_time_is_applied() {
    let site = TestSite::new("site-b");
    pull(&site, &incoming("n1", "Remote", START - 10), PullReason::Automatic).unwrap();

    let delete = PullOperation::new(article_ref("n1"), SyncAction::Delete, START - 10);
    assert!(pull(&site, &delete, PullReason::Automatic).unwrap().is_pulled());
    assert!(site.load(&article_ref("n1")).is_none());

    let again = pull(&site, &delete, PullReason::Automatic).unwrap();
    assert_eq!(again.skip_reason(), Some(SkipReason::Unchanged));
}

#[test]
fn declined_pull_files_no_missing_dependencies() {
    let site = TestSite::new("site-b");
    let tag = EntityReference {
        kind: ReferenceKind::Dependency,
        item: term_ref("t1"),
        pool_id: Some("main".into()),
        hash: None,
    };
    let draft = incoming("n1", "Draft", START - 50)
        .with_property("status", json!(false))
        .with_property("tags", json!([tag.to_value()]));

    let outcome = pull(&site, &draft, PullReason::Automatic).unwrap();
    assert_eq!(outcome.skip_reason(), Some(SkipReason::HandlerDenied));
    assert!(site.engine.pending_dependencies(&term_ref("t1")).unwrap().is_empty());

    let published = incoming("n1", "Published", START - 40).with_property("tags", json!([tag.to_value()]));
    pull(&site, &published, PullReason::Automatic).unwrap();
    assert_eq!(site.engine.pending_dependencies(&term_ref("t1")).unwrap().len(), 1);
}
