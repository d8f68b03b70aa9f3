mod helpers;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use memoria::config::DecayPolicy;
use memoria::memory::store;
use memoria::memory::types::NewAtom;
use tokio_util::sync::CancellationToken;

use helpers::{
    engine_with_fakes, insert_atom, set_last_used, set_used_count, test_config, test_db,
    test_embedding, FakeOracle,
};

fn noon(days_from_epoch: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::days(days_from_epoch)
}

#[tokio::test]
async fn idle_low_resonance_atom_is_forgotten() {
    let now = noon(0);
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "오래된 얘기", "기억 안 나", &["잡담"], 30.0, 5000.0);
    set_last_used(&conn, &id, now - Duration::days(40));
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());

    let report = engine
        .run_decay_cycle_at(&DecayPolicy::default(), None, now)
        .await
        .unwrap();

    assert_eq!(report.forgotten, 1);
    let atom = engine.get_atom(&id).await.unwrap();
    assert!((atom.importance - 4250.0).abs() < 1e-6);
    assert_eq!(atom.resonance_score, 30.0);
}

#[tokio::test]
async fn forgetting_is_clipped_at_the_floor() {
    let now = noon(0);
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "오래된 얘기", "기억 안 나", &[], 10.0, 1100.0);
    set_last_used(&conn, &id, now - Duration::days(60));
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());

    engine
        .run_decay_cycle_at(&DecayPolicy::default(), None, now)
        .await
        .unwrap();

    assert_eq!(engine.get_atom(&id).await.unwrap().importance, 1000.0);
}

#[tokio::test]
async fn second_cycle_on_the_same_day_is_a_no_op() {
    let now = noon(0);
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "오래된 얘기", "기억 안 나", &[], 30.0, 5000.0);
    set_last_used(&conn, &id, now - Duration::days(40));
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());
    let policy = DecayPolicy::default();

    engine.run_decay_cycle_at(&policy, None, now).await.unwrap();
    let again = engine
        .run_decay_cycle_at(&policy, None, now + Duration::hours(3))
        .await
        .unwrap();

    assert_eq!(again.already_applied, 1);
    assert_eq!(again.forgotten, 0);
    let atom = engine.get_atom(&id).await.unwrap();
    assert!((atom.importance - 4250.0).abs() < 1e-6);

    let next_day = engine
        .run_decay_cycle_at(&policy, None, now + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(next_day.forgotten, 1);
    let atom = engine.get_atom(&id).await.unwrap();
    assert!((atom.importance - 4250.0 * 0.85).abs() < 1e-6);
}

#[tokio::test]
async fn frequently_used_atom_is_reinforced() {
    let now = noon(0);
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "좋아하는 음식", "라멘", &["음식"], 90.0, 5000.0);
    set_last_used(&conn, &id, now - Duration::days(1));
    set_used_count(&conn, &id, 3);
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());

    let report = engine
        .run_decay_cycle_at(&DecayPolicy::default(), None, now)
        .await
        .unwrap();

    assert_eq!(report.reinforced, 1);
    let atom = engine.get_atom(&id).await.unwrap();
    assert!((atom.importance - 5500.0).abs() < 1e-6);
    assert_eq!(atom.resonance_score, 91.0);
}

#[tokio::test]
async fn importance_stays_in_range_over_many_cycles() {
    let start = noon(0);
    let mut conn = test_db();
    let fading = insert_atom(&mut conn, "잊혀질 얘기", "음", &[], 20.0, 5000.0);
    let growing = insert_atom(&mut conn, "중요한 얘기", "응", &[], 95.0, 9500.0);
    set_last_used(&conn, &fading, start - Duration::days(31));
    set_last_used(&conn, &growing, start);
    set_used_count(&conn, &growing, 5);
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());
    let policy = DecayPolicy::default();

    for day in 0..100 {
        engine
            .run_decay_cycle_at(&policy, None, start + Duration::days(day))
            .await
            .unwrap();
        for id in [&fading, &growing] {
            let atom = engine.get_atom(id).await.unwrap();
            assert!(
                (1000.0..=10000.0).contains(&atom.importance),
                "day {day}: {}",
                atom.importance
            );
            assert!((0.0..=100.0).contains(&atom.resonance_score));
        }
    }

    assert_eq!(engine.get_atom(&fading).await.unwrap().importance, 1000.0);
    assert_eq!(engine.get_atom(&growing).await.unwrap().importance, 10000.0);
}

#[tokio::test]
async fn configured_decay_applies_each_owners_policy() {
    let now = noon(0);
    let mut conn = test_db();
    let alice = store::store_atom(
        &mut conn,
        &NewAtom::new("alice 얘기", "음", "s1").with_resonance(30.0).with_user("alice"),
    )
    .unwrap();
    let bob = store::store_atom(
        &mut conn,
        &NewAtom::new("bob 얘기", "음", "s2").with_resonance(30.0).with_user("bob"),
    )
    .unwrap();
    set_last_used(&conn, &alice, now - Duration::days(40));
    set_last_used(&conn, &bob, now - Duration::days(40));

    let mut config = test_config();
    config.policy_overrides.insert(
        "alice".into(),
        DecayPolicy {
            forget_factor: 0.5,
            ..DecayPolicy::default()
        },
    );
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), config);

    let report = engine.run_configured_decay(now).await.unwrap();

    assert_eq!(report.forgotten, 2);
    assert!((engine.get_atom(&alice).await.unwrap().importance - 2500.0).abs() < 1e-6);
    assert!((engine.get_atom(&bob).await.unwrap().importance - 4250.0).abs() < 1e-6);
}

#[tokio::test]
async fn user_scoped_cycle_leaves_others_alone() {
    let now = noon(0);
    let mut conn = test_db();
    let alice = store::store_atom(
        &mut conn,
        &NewAtom::new("alice 얘기", "음", "s1").with_resonance(30.0).with_user("alice"),
    )
    .unwrap();
    let bob = store::store_atom(
        &mut conn,
        &NewAtom::new("bob 얘기", "음", "s2").with_resonance(30.0).with_user("bob"),
    )
    .unwrap();
    set_last_used(&conn, &alice, now - Duration::days(40));
    set_last_used(&conn, &bob, now - Duration::days(40));
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());

    let report = engine
        .run_decay_cycle_at(&DecayPolicy::default(), Some("alice"), now)
        .await
        .unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(engine.get_atom(&bob).await.unwrap().importance, 5000.0);
}

#[tokio::test]
async fn decay_writes_an_audit_entry() {
    let now = noon(0);
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "오래된 얘기", "기억 안 나", &[], 30.0, 5000.0);
    set_last_used(&conn, &id, now - Duration::days(40));
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());

    engine
        .run_decay_cycle_at(&DecayPolicy::default(), None, now)
        .await
        .unwrap();

    let log = engine.audit_log(&id).await.unwrap();
    let decay = log.iter().find(|e| e.operation == "decay").unwrap();
    let details = decay.details.as_ref().unwrap();
    assert_eq!(details["action"], "forget");
    assert_eq!(details["from"], 5000.0);
}

#[tokio::test]
async fn decay_clears_cached_recalls() {
    let now = Utc::now();
    let mut conn = test_db();
    let id = insert_atom(&mut conn, "회의 일정", "월요일 10시", &["일정"], 30.0, 5000.0);
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());

    engine
        .recall(&engine.request("다음주 일정 알려줘", "alice"), &CancellationToken::new())
        .await;
    assert_eq!(engine.cached_results(), 1);

    // Recall touched the atom; push its last use into the past and reset the count.
    {
        let conn = engine.connection().lock().unwrap();
        set_last_used(&conn, &id, now - Duration::days(40));
        set_used_count(&conn, &id, 0);
    }
    let report = engine
        .run_decay_cycle_at(&DecayPolicy::default(), None, now)
        .await
        .unwrap();

    assert_eq!(report.forgotten, 1);
    assert_eq!(engine.cached_results(), 0);
}

#[tokio::test]
async fn rebuilt_index_matches_stored_embeddings() {
    let mut conn = test_db();
    for seed in 0..3 {
        let atom =
            NewAtom::new(format!("질문 {seed}"), "답", "s1").with_embedding(test_embedding(seed));
        store::store_atom(&mut conn, &atom).unwrap();
    }
    store::store_atom(&mut conn, &NewAtom::new("벡터 없음", "답", "s1")).unwrap();
    let (engine, _) = engine_with_fakes(conn, Arc::new(FakeOracle::new()), test_config());
    assert_eq!(engine.indexed_atoms(), 3);

    {
        let conn = engine.connection().lock().unwrap();
        conn.execute("DELETE FROM atoms WHERE user_input = '질문 0'", [])
            .unwrap();
    }
    assert_eq!(engine.rebuild_vector_index().await.unwrap(), 2);
    assert_eq!(engine.indexed_atoms(), 2);
}
