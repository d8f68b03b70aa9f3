mod helpers;

#[test]
fn full_schema_creates_all_tables_and_indexes() {
    let conn = helpers::test_db();

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    for table in ["atoms", "atom_tags", "atom_connections", "memory_log", "schema_meta"] {
        assert!(tables.contains(&table.to_string()), "{table} table missing");
    }

    let indexes: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert!(indexes.contains(&"idx_atoms_rank".to_string()));
    assert!(indexes.contains(&"idx_atoms_user".to_string()));
    assert!(indexes.contains(&"idx_atom_tags_tag".to_string()));
    assert!(indexes.contains(&"idx_connections_target".to_string()));
}

#[test]
fn check_constraints_reject_out_of_range_scores() {
    let conn = helpers::test_db();

    let insert = |resonance: f64| {
        conn.execute(
            "INSERT INTO atoms (id, user_input, response, emotion_label, emotion_code, emotion_score, \
             belief_vector, importance, resonance_score, timestamp, session_id, chain_id) \
             VALUES (?1, 'q', 'a', 'neutral', 'E000', 0.5, '[]', 5000, ?2, '2026-01-01T00:00:00Z', 's', 's-')",
            rusqlite::params![format!("atom-{resonance}"), resonance],
        )
    };

    assert!(insert(50.0).is_ok());
    assert!(insert(150.0).is_err(), "resonance above 100 should be rejected");
}

#[test]
fn deleting_an_atom_cascades_to_tags() {
    let mut conn = helpers::test_db();
    let id = helpers::insert_atom(&mut conn, "q", "a", &["하나", "둘"], 50.0, 5000.0);

    conn.execute("DELETE FROM atoms WHERE id = ?1", [&id]).unwrap();

    let tags: i64 = conn
        .query_row("SELECT COUNT(*) FROM atom_tags", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tags, 0);
}
