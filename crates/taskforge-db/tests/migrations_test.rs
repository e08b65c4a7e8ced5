use taskforge_test_utils::create_test_db;

#[tokio::test]
async fn migrations_create_expected_tables() {
    let db = create_test_db().await;
    let counts = taskforge_db::pool::table_counts(&db.pool)
        .await
        .expect("table_counts should succeed");

    let names: Vec<&str> = counts.iter().map(|(n, _)| n.as_str()).collect();
    for expected in ["tasks", "task_dependencies", "agents", "audit", "state"] {
        assert!(names.contains(&expected), "missing table {expected}");
    }
}
