mod helpers;

use chrono::{Duration, Utc};
use helpers::{insert_atom, test_db, test_embedding};
use memoria::error::MemoryError;
use memoria::memory::store::{
    append_connection, audit_log, get_atom, search_atoms, touch_usage, update_importance,
};
use memoria::memory::types::{ChainLink, NewAtom, SearchFilter, TimeRange};

#[test]
fn stored_atom_reads_back_intact() {
    let mut conn = test_db();
    let atom = NewAtom::new("다음주에 일본 여행 가요", "도쿄에 가시는군요", "s1")
        .with_tags(["여행", "일본"])
        .with_topic("여행")
        .with_resonance(72.5)
        .with_importance(6400.0)
        .with_embedding(test_embedding(3))
        .with_user("alice");
    let id = memoria::memory::store::store_atom(&mut conn, &atom).unwrap();

    let read = get_atom(&conn, &id).unwrap();
    assert_eq!(read.user_input, "다음주에 일본 여행 가요");
    assert_eq!(read.response, "도쿄에 가시는군요");
    assert_eq!(read.tags, vec!["여행", "일본"]);
    assert_eq!(read.topic, "여행");
    assert_eq!(read.chain_id, "s1-여행");
    assert_eq!(read.resonance_score, 72.5);
    assert_eq!(read.importance, 6400.0);
    assert_eq!(read.embedding, test_embedding(3));
    assert_eq!(read.user_id.as_deref(), Some("alice"));
    assert_eq!(read.used_count, 0);
    assert!(read.last_used.is_none());
    assert!(read.connections.is_empty());
}

#[test]
fn duplicate_and_blank_tags_are_dropped_in_order() {
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "q", "a", &["b", "a", " ", "b", "c"], 50.0, 5000.0);

    assert_eq!(get_atom(&conn, &id).unwrap().tags, vec!["b", "a", "c"]);
}

#[test]
fn invalid_atoms_are_rejected() {
    let mut conn = test_db();
    let store = memoria::memory::store::store_atom;

    let blank = NewAtom::new(" ", "", "s1");
    assert!(matches!(store(&mut conn, &blank), Err(MemoryError::Validation(_))));

    let loud = NewAtom::new("q", "a", "s1").with_resonance(120.0);
    assert!(matches!(store(&mut conn, &loud), Err(MemoryError::Validation(_))));

    let mut reused = NewAtom::new("q", "a", "s1");
    reused.id = Some("fixed-id".into());
    store(&mut conn, &reused).unwrap();
    assert!(matches!(store(&mut conn, &reused), Err(MemoryError::Validation(_))));
}

#[test]
fn unknown_ids_are_not_found() {
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "q", "a", &[], 50.0, 5000.0);

    assert!(matches!(get_atom(&conn, "missing"), Err(MemoryError::NotFound(_))));
    assert!(matches!(
        update_importance(&conn, "missing", 2000.0),
        Err(MemoryError::NotFound(_))
    ));
    assert!(matches!(
        touch_usage(&conn, "missing", Utc::now()),
        Err(MemoryError::NotFound(_))
    ));

    let dangling = ChainLink {
        target_id: "missing".into(),
        reason: "test".into(),
        strength: 0.5,
    };
    assert!(matches!(
        append_connection(&mut conn, &id, &dangling, 20),
        Err(MemoryError::NotFound(_))
    ));
}

#[test]
fn connections_append_in_order_until_capped() {
    let mut conn = test_db();
    let source = insert_atom(&mut conn, "q", "a", &[], 50.0, 5000.0);
    let first = insert_atom(&mut conn, "q1", "a1", &[], 50.0, 5000.0);
    let second = insert_atom(&mut conn, "q2", "a2", &[], 50.0, 5000.0);
    let link = |target: &str, strength: f64| ChainLink {
        target_id: target.into(),
        reason: "related".into(),
        strength,
    };

    assert!(append_connection(&mut conn, &source, &link(&first, 0.4), 1).unwrap());
    assert!(!append_connection(&mut conn, &source, &link(&second, 0.9), 1).unwrap());
    assert!(append_connection(&mut conn, &source, &link(&second, 1.7), 2).unwrap());

    let connections = get_atom(&conn, &source).unwrap().connections;
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[0].target_id, first);
    assert_eq!(connections[1].target_id, second);
    assert_eq!(connections[1].strength, 1.0);
}

#[test]
fn usage_touch_updates_count_and_time() {
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "q", "a", &[], 50.0, 5000.0);
    let now = Utc::now();

    touch_usage(&conn, &id, now).unwrap();
    touch_usage(&conn, &id, now).unwrap();

    let atom = get_atom(&conn, &id).unwrap();
    assert_eq!(atom.used_count, 2);
    assert!(atom.last_used.is_some());
}

#[test]
fn search_filters_by_tag_session_and_time() {
    let mut conn = test_db();
    let now = Utc::now();
    let recent = NewAtom::new("여행 얘기", "좋아요", "s1")
        .with_tags(["여행"])
        .with_timestamp(now - Duration::hours(1));
    let old = NewAtom::new("여행 얘기 예전", "좋았죠", "s2")
        .with_tags(["여행"])
        .with_timestamp(now - Duration::days(10));
    let other = NewAtom::new("주식 얘기", "글쎄요", "s1")
        .with_tags(["주식"])
        .with_timestamp(now);
    let store = memoria::memory::store::store_atom;
    let recent_id = store(&mut conn, &recent).unwrap();
    let old_id = store(&mut conn, &old).unwrap();
    store(&mut conn, &other).unwrap();

    let by_tag = SearchFilter {
        tags: vec!["여행".into()],
        ..SearchFilter::default()
    };
    let ids: Vec<String> = search_atoms(&conn, &by_tag, 10)
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec![recent_id.clone(), old_id]);

    let by_session = SearchFilter {
        tags: vec!["여행".into()],
        session_id: Some("s1".into()),
        ..SearchFilter::default()
    };
    assert_eq!(search_atoms(&conn, &by_session, 10).unwrap().len(), 1);

    let last_day = SearchFilter {
        time_range: Some(TimeRange {
            start: now - Duration::days(1),
            end: now - Duration::minutes(30),
        }),
        ..SearchFilter::default()
    };
    let found = search_atoms(&conn, &last_day, 10).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, recent_id);
}

#[test]
fn mention_search_matches_tags_inside_the_utterance() {
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "q", "a", &["일본", "x"], 50.0, 5000.0);
    insert_atom(&mut conn, "q", "a", &["미국"], 50.0, 5000.0);

    let filter = SearchFilter {
        mentioned_in: Some("일본 날씨 어때? x".into()),
        ..SearchFilter::default()
    };
    let found = search_atoms(&conn, &filter, 10).unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
}

#[test]
fn every_write_is_audited() {
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "q", "a", &[], 50.0, 5000.0);
    update_importance(&conn, &id, 7000.0).unwrap();

    let ops: Vec<String> = audit_log(&conn, &id)
        .unwrap()
        .into_iter()
        .map(|e| e.operation)
        .collect();
    assert_eq!(ops, vec!["create", "importance"]);
}
