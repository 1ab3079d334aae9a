//! Integration tests for workflow persistence, scheduling and commit links

use chrono::{Duration, TimeZone, Utc};
use xstory_core::{CommitRecord, Disposition, Error, HoldReason, NewStory, Stage, StoryId};
use xstory_storage::{CommitLink, Database, LinkBatch, LinkStrength, LAST_ANALYZED_COMMIT, LAST_UPDATED};

async fn create_test_db() -> Database {
    let mut db = Database::open_in_memory()
        .await
        .expect("Failed to open database");
    db.init_schema().await.expect("Failed to init schema");
    db.create_root(NewStory::new("Product"))
        .await
        .expect("Failed to create root");
    db
}

/// Drive `id` forward one step at a time until it reaches `stage`.
async fn advance_to(db: &mut Database, id: &str, stage: Stage) {
    while db.get_node(id).await.unwrap().stage < stage {
        db.advance_stage(id).await.unwrap();
    }
}

fn is_invalid_transition(err: &xstory_storage::DbError) -> bool {
    matches!(err.core(), Some(Error::InvalidTransition { .. }))
}

fn link(story: &str, hash: &str, days_ago: i64, strength: LinkStrength) -> CommitLink {
    CommitLink {
        record: CommitRecord {
            story_id: StoryId::parse(story).unwrap(),
            commit_hash: hash.to_string(),
            commit_date: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() - Duration::days(days_ago),
            commit_message: format!("commit {}", hash),
        },
        strength,
        similarity: 0.75,
    }
}

#[tokio::test]
async fn test_full_stage_walk() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();

    let node = db.approve("1").await.unwrap();
    assert_eq!(node.stage, Stage::Planning);

    advance_to(&mut db, "1", Stage::Implemented).await;
    let node = db.get_node("1").await.unwrap();
    assert!(node.last_implemented.is_some());

    advance_to(&mut db, "1", Stage::Released).await;
    let err = db.advance_stage("1").await.unwrap_err();
    assert!(is_invalid_transition(&err));
    let err = db
        .set_disposition("1", Disposition::Archived)
        .await
        .unwrap_err();
    assert!(is_invalid_transition(&err));
}

#[tokio::test]
async fn test_approve_only_from_concept() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();
    db.approve("1").await.unwrap();

    let err = db.approve("1").await.unwrap_err();
    assert!(is_invalid_transition(&err));
}

#[tokio::test]
async fn test_set_stage_accepts_only_next() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();
    db.approve("1").await.unwrap();

    let err = db.set_stage("1", Stage::Reviewing).await.unwrap_err();
    assert!(is_invalid_transition(&err));
    let err = db.set_stage("1", Stage::Concept).await.unwrap_err();
    assert!(is_invalid_transition(&err));

    let node = db.set_stage("1", Stage::Executing).await.unwrap();
    assert_eq!(node.stage, Stage::Executing);
}

#[tokio::test]
async fn test_clear_hold_advances_one_stage() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();
    db.approve("1").await.unwrap();

    db.set_hold("1", HoldReason::Queued).await.unwrap();
    let err = db.advance_stage("1").await.unwrap_err();
    assert!(is_invalid_transition(&err));

    let node = db.clear_hold("1").await.unwrap();
    assert_eq!(node.stage, Stage::Executing);
    assert_eq!(node.hold_reason, None);

    let err = db.clear_hold("1").await.unwrap_err();
    assert!(is_invalid_transition(&err));
}

#[tokio::test]
async fn test_clear_hold_at_concept_keeps_stage() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();

    db.set_hold("1", HoldReason::Escalated).await.unwrap();
    let node = db.clear_hold("1").await.unwrap();
    assert_eq!(node.stage, Stage::Concept);
    assert_eq!(node.hold_reason, None);
}

#[tokio::test]
async fn test_disposed_node_is_terminal_and_unscheduled() {
    let mut db = create_test_db().await;
    db.approve("root").await.unwrap();
    db.insert("root", NewStory::new("Login")).await.unwrap();
    db.approve("1").await.unwrap();
    db.set_hold("1", HoldReason::Blocked).await.unwrap();
    db.set_disposition("1", Disposition::Rejected).await.unwrap();

    let err = db.clear_hold("1").await.unwrap_err();
    assert!(is_invalid_transition(&err));
    let err = db
        .set_disposition("1", Disposition::Archived)
        .await
        .unwrap_err();
    assert!(is_invalid_transition(&err));

    let node = db.get_node("1").await.unwrap();
    assert_eq!(node.disposition, Some(Disposition::Rejected));
    assert_eq!(node.hold_reason, Some(HoldReason::Blocked));

    let picked = db.select_next().await.unwrap().unwrap();
    assert_eq!(picked.id.as_str(), "root");
    let ranked = db.ranked_candidates().await.unwrap();
    assert!(ranked.iter().all(|c| c.id.as_str() != "1"));
}

#[tokio::test]
async fn test_capacity_grows_with_completed_children() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Epic")).await.unwrap();
    db.approve("1").await.unwrap();
    advance_to(&mut db, "1", Stage::Executing).await;
    for title in ["A", "B", "C"] {
        db.insert("1", NewStory::new(title)).await.unwrap();
    }

    assert_eq!(db.capacity_of("1").await.unwrap(), 3);
    assert_eq!(db.fill_rate_of("1").await.unwrap(), 1.0);

    let mut persisted = db.get_node("1").await.unwrap().capacity;
    for child in ["1.1", "1.2", "1.3"] {
        advance_to(&mut db, child, Stage::Ready).await;
        let now = db.get_node("1").await.unwrap().capacity;
        assert!(now >= persisted);
        persisted = now;
    }

    assert_eq!(db.capacity_of("1").await.unwrap(), 6);
    assert_eq!(db.fill_rate_of("1").await.unwrap(), 0.5);
    assert_eq!(persisted, 6);
}

#[tokio::test]
async fn test_select_next_prefers_shallow_nodes() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Epic")).await.unwrap();
    db.approve("1").await.unwrap();
    db.insert("1", NewStory::new("Story")).await.unwrap();
    db.insert("1", NewStory::new("Other")).await.unwrap();
    db.approve("1.1").await.unwrap();

    // Root stays in concept, so "1" (fill 2/3) beats "1.1" (fill 0)
    let picked = db.select_next().await.unwrap().unwrap();
    assert_eq!(picked.id.as_str(), "1");
    assert_eq!(picked.depth, 1);

    let ranked = db.ranked_candidates().await.unwrap();
    let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "1.1"]);
}

#[tokio::test]
async fn test_select_next_none_when_nothing_qualifies() {
    let db = create_test_db().await;
    assert!(db.select_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_prerequisites_met() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Storage")).await.unwrap();
    db.insert("root", NewStory::new("API")).await.unwrap();
    db.approve("1").await.unwrap();
    advance_to(&mut db, "1", Stage::Implemented).await;

    assert!(db.prerequisites_met(&["1"]).await.unwrap());
    assert!(!db.prerequisites_met(&["1", "2"]).await.unwrap());
    assert!(!db.prerequisites_met(&["9"]).await.unwrap());
}

#[tokio::test]
async fn test_link_batch_records_and_advances() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();
    db.insert("root", NewStory::new("Search")).await.unwrap();
    db.approve("1").await.unwrap();
    advance_to(&mut db, "1", Stage::Executing).await;

    let batch = LinkBatch {
        links: vec![
            link("1", "aaa111", 2, LinkStrength::Strong),
            link("2", "bbb222", 1, LinkStrength::Potential),
        ],
        checkpoint: Some("ccc333".to_string()),
    };
    let outcome = db.apply_link_batch(batch.clone()).await.unwrap();
    assert_eq!(outcome.strong, 1);
    assert_eq!(outcome.potential, 1);
    assert_eq!(outcome.advanced, vec![StoryId::parse("1").unwrap()]);

    let node = db.get_node("1").await.unwrap();
    assert_eq!(node.stage, Stage::Reviewing);
    assert_eq!(node.last_implemented, Some(batch.links[0].record.commit_date));
    assert_eq!(db.get_node("2").await.unwrap().stage, Stage::Concept);

    assert_eq!(db.commit_count().await.unwrap(), 2);
    assert_eq!(db.commits_for("1").await.unwrap()[0].commit_hash, "aaa111");
    assert!(db.has_commit("bbb222").await.unwrap());
    assert_eq!(
        db.get_metadata(LAST_ANALYZED_COMMIT).await.unwrap().as_deref(),
        Some("ccc333")
    );
    assert!(db.get_metadata(LAST_UPDATED).await.unwrap().is_some());

    // Replaying the same batch changes nothing
    let outcome = db.apply_link_batch(batch).await.unwrap();
    assert_eq!(outcome.recorded(), 0);
    assert_eq!(outcome.duplicates, 2);
    assert!(outcome.advanced.is_empty());
    assert_eq!(db.commit_count().await.unwrap(), 2);
    assert_eq!(db.get_node("1").await.unwrap().stage, Stage::Reviewing);
}

#[tokio::test]
async fn test_link_batch_respects_holds_and_dispositions() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Held")).await.unwrap();
    db.insert("root", NewStory::new("Rejected")).await.unwrap();
    db.approve("1").await.unwrap();
    advance_to(&mut db, "1", Stage::Executing).await;
    db.set_hold("1", HoldReason::Paused).await.unwrap();
    db.set_disposition("2", Disposition::Rejected).await.unwrap();

    let outcome = db
        .apply_link_batch(LinkBatch {
            links: vec![
                link("1", "aaa111", 3, LinkStrength::Strong),
                link("2", "bbb222", 2, LinkStrength::Strong),
                link("9", "ccc333", 1, LinkStrength::Strong),
            ],
            checkpoint: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.strong, 1);
    assert_eq!(outcome.skipped, 2);
    assert!(outcome.advanced.is_empty());

    let held = db.get_node("1").await.unwrap();
    assert_eq!(held.stage, Stage::Executing);
    assert!(held.last_implemented.is_some());
    assert_eq!(db.checkpoint().await.unwrap(), None);
}

#[tokio::test]
async fn test_last_implemented_keeps_newest_date() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Login")).await.unwrap();

    let newer = link("1", "new", 1, LinkStrength::Strong);
    let older = link("1", "old", 10, LinkStrength::Strong);
    let expected = newer.record.commit_date;
    db.apply_link_batch(LinkBatch {
        links: vec![newer, older],
        checkpoint: None,
    })
    .await
    .unwrap();

    let node = db.get_node("1").await.unwrap();
    assert_eq!(node.last_implemented, Some(expected));
    assert_eq!(node.stage, Stage::Concept);
}

#[tokio::test]
async fn test_consecutive_writes_on_one_handle() {
    let mut db = create_test_db().await;

    // Every write reads single rows inside its transaction before committing
    db.insert("root", NewStory::new("Login")).await.unwrap();
    db.insert("root", NewStory::new("Search")).await.unwrap();
    db.approve("1").await.unwrap();
    db.set_hold("1", HoldReason::Queued).await.unwrap();
    db.clear_hold("1").await.unwrap();
    db.insert("1", NewStory::new("OAuth")).await.unwrap();
    db.set_disposition("2", Disposition::Rejected).await.unwrap();
    db.apply_link_batch(LinkBatch {
        links: vec![link("1", "h1", 1, LinkStrength::Potential)],
        checkpoint: Some("h1".to_string()),
    })
    .await
    .unwrap();
    db.insert("1", NewStory::new("SAML")).await.unwrap();

    assert_eq!(db.get_node("1").await.unwrap().stage, Stage::Executing);
    assert_eq!(
        db.get_node("2").await.unwrap().disposition,
        Some(Disposition::Rejected)
    );
    assert_eq!(db.node_count().await.unwrap(), 5);
    assert_eq!(db.commit_count().await.unwrap(), 1);
    assert_eq!(db.checkpoint().await.unwrap().as_deref(), Some("h1"));
}

#[tokio::test]
async fn test_insert_at_completed_stage_applies_stage_effects() {
    let mut db = create_test_db().await;
    db.insert("root", NewStory::new("Epic")).await.unwrap();
    db.approve("1").await.unwrap();

    let id = db
        .insert("1", NewStory::new("Imported").at_stage(Stage::Implemented))
        .await
        .unwrap();
    let child = db.get_node(id.as_str()).await.unwrap();
    assert_eq!(child.stage, Stage::Implemented);
    assert!(child.last_implemented.is_some());

    assert_eq!(db.get_node("1").await.unwrap().capacity, 4);

    // Below implemented nothing is stamped and the parent is unchanged
    let id = db
        .insert("1", NewStory::new("Pending").at_stage(Stage::Executing))
        .await
        .unwrap();
    assert!(db.get_node(id.as_str()).await.unwrap().last_implemented.is_none());
    assert_eq!(db.get_node("1").await.unwrap().capacity, 4);
}
