use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use litesql::{
    named_params, params, Builder, Connection, DatabaseName, Error, FunctionFlags,
    PrepareOptions, Value,
};

async fn setup() -> Connection {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.execute(
        "CREATE TABLE test (
            integer INTEGER,
            text TEXT,
            double DOUBLE,
            blob BLOB,
            nullable INTEGER
        )",
        (),
    )
    .await
    .unwrap();
    conn
}

#[tokio::test]
async fn select_version_in_both_row_shapes() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();

    let row = conn
        .query_row("SELECT sqlite_version() AS version", ())
        .await
        .unwrap();

    let map = conn
        .query_row("SELECT sqlite_version() AS version", ())
        .await
        .unwrap()
        .into_map()
        .unwrap();
    let version = map.get("version").unwrap().as_text().unwrap().clone();
    assert!(!version.is_empty());

    let values = row.into_values().unwrap();
    assert_eq!(values, vec![Value::Text(version)]);
}

#[tokio::test]
async fn open_without_create_fails_with_code_14() {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("does-not-exist.db");

    let db = Builder::new_local(path.to_str().unwrap())
        .create(false)
        .build()
        .await
        .unwrap();

    let err = db.connect().unwrap_err();
    assert!(matches!(err, Error::DatabaseNotFound(..)));
    assert_eq!(err.extended_code().unwrap() & 0xff, 14);
}

#[tokio::test]
async fn insert_and_select_round_trip() {
    let conn = setup().await;

    let changes = conn
        .execute(
            "INSERT INTO test (integer, text, double, blob, nullable)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (0, "hello world", 3.14, vec![1u8, 2, 3], None::<i64>),
        )
        .await
        .unwrap();
    assert_eq!(changes, 1);
    assert_eq!(conn.last_insert_rowid().unwrap(), 1);

    let row = conn
        .query_row("SELECT integer, text, double, blob, nullable FROM test", ())
        .await
        .unwrap();
    assert_eq!(
        row.into_values().unwrap(),
        vec![
            Value::Integer(0),
            Value::Text("hello world".into()),
            Value::Real(3.14),
            Value::Blob(vec![1, 2, 3]),
            Value::Null,
        ]
    );
}

#[tokio::test]
async fn bind_value_types_round_trip_bit_identically() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();

    let row = conn
        .query_row(
            "SELECT ?1, ?2, ?3, ?4, ?5, ?6",
            (
                None::<i64>,
                true,
                i64::from(i32::MAX),
                2.5f64,
                "text with \u{00e9}",
                vec![0u8, 255, 7],
            ),
        )
        .await
        .unwrap();

    assert_eq!(
        row.into_values().unwrap(),
        vec![
            Value::Null,
            Value::Integer(1),
            Value::Integer(i32::MAX as i64),
            Value::Real(2.5),
            Value::Text("text with \u{00e9}".into()),
            Value::Blob(vec![0, 255, 7]),
        ]
    );
}

#[tokio::test]
async fn repeated_execute_accumulates_changes() {
    let conn = setup().await;
    let before = conn.total_changes().unwrap();

    let mut stmt = conn
        .prepare("INSERT INTO test (integer) VALUES (?1)")
        .await
        .unwrap();
    for i in 0..5i64 {
        assert_eq!(stmt.execute([i]).await.unwrap(), 1);
    }

    assert_eq!(conn.total_changes().unwrap() - before, 5);
}

#[tokio::test]
async fn transaction_commit_makes_rows_visible() {
    let conn = setup().await;

    let tx = conn.transaction().await.unwrap();
    for i in 0..10i64 {
        tx.execute(
            "INSERT INTO test (integer, text, double, blob, nullable)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (i, format!("hello {i}"), 3.14, vec![3u8, 2, 1], None::<i64>),
        )
        .await
        .unwrap();
    }
    assert!(conn.in_transaction());
    tx.commit().await.unwrap();
    assert!(!conn.in_transaction());

    let rows = conn
        .query_all(
            "SELECT * FROM test WHERE integer != 1 AND text != 'hello world'",
            (),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 9);
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let conn = setup().await;

    {
        let tx = conn.transaction().await.unwrap();
        tx.execute("INSERT INTO test (integer) VALUES (1)", ())
            .await
            .unwrap();
        // No commit.
    }

    let rows = conn.query_all("SELECT * FROM test", ()).await.unwrap();
    assert!(rows.is_empty());
    assert!(!conn.in_transaction());
}

#[tokio::test]
async fn transaction_savepoints_rewind_partially() {
    let conn = setup().await;

    let mut tx = conn.transaction().await.unwrap();
    tx.execute("INSERT INTO test (integer) VALUES (1)", ())
        .await
        .unwrap();
    tx.savepoint("sp1").await.unwrap();
    tx.execute("INSERT INTO test (integer) VALUES (2)", ())
        .await
        .unwrap();
    tx.rollback_to("sp1").await.unwrap();
    tx.release_savepoint("sp1").await.unwrap();
    tx.commit().await.unwrap();

    let rows = conn.query_all("SELECT * FROM test", ()).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn template_queries_bind_positionally() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();

    let mut rows = conn
        .query_template(
            &["SELECT ", " a, ", " b, ", " c"],
            (1, std::f64::consts::PI, vec![1u8, 2]),
        )
        .await
        .unwrap();
    let map = rows.next().unwrap().unwrap().into_map().unwrap();
    assert_eq!(map.get("a"), Some(&Value::Integer(1)));
    assert_eq!(map.get("b"), Some(&Value::Real(std::f64::consts::PI)));
    assert_eq!(map.get("c"), Some(&Value::Blob(vec![1, 2])));

    // Interpolation is a placeholder, never SQL text.
    let mut rows = conn
        .query_template(&["SELECT ", ""], ("1; DROP TABLE test",))
        .await
        .unwrap();
    let row = rows.next().unwrap().unwrap();
    assert_eq!(row.column_name(0), Some("?"));
    assert_eq!(
        row.get_value(0).unwrap(),
        Value::Text("1; DROP TABLE test".into())
    );
}

#[tokio::test]
async fn scalar_and_aggregate_functions() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();

    conn.create_scalar_function("add", Some(2), FunctionFlags::DETERMINISTIC, |args| {
        match (&args[0], &args[1]) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a + b)),
            _ => Err(Error::Misuse("add() expects two integers".into())),
        }
    })
    .unwrap();

    let row = conn.query_row("SELECT add(1, 2)", ()).await.unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Integer(3));

    struct Sum;
    impl litesql::Aggregate for Sum {
        fn init(&self) -> Value {
            Value::Integer(0)
        }

        fn step(&self, acc: Value, args: &[Value]) -> litesql::Result<Value> {
            let acc = acc.as_integer().copied().unwrap_or(0);
            let x = args[0].as_integer().copied().unwrap_or(0);
            Ok(Value::Integer(acc + x))
        }
    }

    conn.execute("CREATE TABLE nums (n INTEGER)", ()).await.unwrap();
    for n in [1i64, 2, 3, 4] {
        conn.execute("INSERT INTO nums VALUES (?1)", [n])
            .await
            .unwrap();
    }
    conn.create_aggregate_function("mysum", Some(1), FunctionFlags::empty(), Sum)
        .unwrap();

    let row = conn.query_row("SELECT mysum(n) FROM nums", ()).await.unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Integer(10));
}

#[tokio::test]
async fn streaming_rows_hold_the_statement() {
    let conn = setup().await;
    for i in 0..3i64 {
        conn.execute("INSERT INTO test (integer) VALUES (?1)", [i])
            .await
            .unwrap();
    }

    let mut stmt = conn
        .prepare("SELECT integer FROM test ORDER BY integer")
        .await
        .unwrap();
    let mut rows = stmt.query(()).await.unwrap();

    // A second traversal before the first drains is refused.
    assert!(matches!(
        stmt.query(()).await.unwrap_err(),
        Error::StatementBusy
    ));

    let mut seen = 0;
    while let Some(row) = rows.next().unwrap() {
        assert_eq!(row.get_value(0).unwrap(), Value::Integer(seen));
        seen += 1;
    }
    assert_eq!(seen, 3);

    // Draining released the cursor.
    let mut rows = stmt.query(()).await.unwrap();
    assert!(rows.next().unwrap().is_some());
    drop(rows);

    // Dropping an undrained stream also releases it.
    let _ = stmt.query(()).await.unwrap();
}

#[tokio::test]
async fn named_parameters_resolve_across_prefixes() {
    let conn = setup().await;

    conn.execute(
        "INSERT INTO test (integer, text) VALUES (:num, @msg)",
        named_params! { ":num": 7, "msg": "hi" },
    )
    .await
    .unwrap();

    let row = conn
        .query_row("SELECT integer, text FROM test", ())
        .await
        .unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Integer(7));
    assert_eq!(row.get_value(1).unwrap(), Value::Text("hi".into()));

    let err = conn
        .execute(
            "INSERT INTO test (integer) VALUES (:num)",
            [("missing", 1)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownParameter(_)));

    let err = conn
        .execute(
            "INSERT INTO test (integer) VALUES (:num)",
            [(":num", 1), ("num", 2)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateParameter(..)));
}

#[tokio::test]
async fn parameter_count_rules() {
    let conn = setup().await;

    // Trailing slots left unbound read as NULL.
    conn.execute(
        "INSERT INTO test (integer, text) VALUES (?1, ?2)",
        [5i64],
    )
    .await
    .unwrap();
    let row = conn
        .query_row("SELECT integer, text FROM test", ())
        .await
        .unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Integer(5));
    assert_eq!(row.get_value(1).unwrap(), Value::Null);

    // Extra values are rejected.
    let err = conn
        .execute("INSERT INTO test (integer) VALUES (?1)", (1, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TooManyParameters { expected: 1, given: 2 }));
}

#[tokio::test]
async fn safe_integer_policy() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.execute("CREATE TABLE big (n INTEGER)", ()).await.unwrap();

    let big = (1i64 << 60) + 1;

    // Binding past the safe range needs the int64 option.
    let err = conn
        .execute("INSERT INTO big VALUES (?1)", [big])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::IntegerOutOfRange(_)));

    let mut stmt = conn
        .prepare_with(
            "INSERT INTO big VALUES (?1)",
            PrepareOptions {
                int64: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    stmt.execute([big]).await.unwrap();

    // Default extraction demotes to a double, with known loss.
    let row = conn.query_row("SELECT n FROM big", ()).await.unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Real(big as f64));

    // int64 extraction preserves all 64 bits.
    let mut stmt = conn
        .prepare_with(
            "SELECT n FROM big",
            PrepareOptions {
                int64: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let row = stmt.query_row(()).await.unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Integer(big));
}

#[tokio::test]
async fn readonly_prepare_option_rejects_writes() {
    let conn = setup().await;

    let err = conn
        .prepare_with(
            "INSERT INTO test (integer) VALUES (1)",
            PrepareOptions {
                readonly: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Misuse(_)));

    conn.prepare_with(
        "SELECT * FROM test",
        PrepareOptions {
            readonly: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn duplicate_column_names_last_writer_wins() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();

    let map = conn
        .query_row("SELECT 1 AS a, 2 AS a, 3 AS b", ())
        .await
        .unwrap()
        .into_map()
        .unwrap();

    assert_eq!(map.len(), 2);
    let entries: Vec<_> = map.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    assert_eq!(
        entries,
        vec![("a", Value::Integer(2)), ("b", Value::Integer(3))]
    );
}

#[tokio::test]
async fn query_one_absent_and_query_row_error() {
    let conn = setup().await;

    assert!(conn
        .query_one("SELECT * FROM test", ())
        .await
        .unwrap()
        .is_none());
    assert!(matches!(
        conn.query_row("SELECT * FROM test", ()).await.unwrap_err(),
        Error::QueryReturnedNoRows
    ));
}

#[tokio::test]
async fn finalize_twice_errors() {
    let conn = setup().await;
    let mut stmt = conn.prepare("SELECT 1").await.unwrap();
    stmt.finalize().unwrap();
    assert!(matches!(stmt.finalize().unwrap_err(), Error::Misuse(_)));
    assert!(matches!(
        stmt.execute(()).await.unwrap_err(),
        Error::Misuse(_)
    ));
}

#[tokio::test]
async fn connection_events_fire_in_order() {
    let db = Builder::new_local(":memory:").build().await.unwrap();

    let connects = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    {
        let connects = connects.clone();
        db.on_connect(move |_| {
            connects.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let connects = connects.clone();
        let closes = closes.clone();
        db.on_close(move |_| {
            // Close never arrives before connect.
            assert!(connects.load(Ordering::SeqCst) > 0);
            closes.fetch_add(1, Ordering::SeqCst);
        });
    }

    let conn = db.connect().unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 0);

    conn.query_row("SELECT 1", ()).await.unwrap();
    conn.close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Closing twice stays a single event.
    conn.close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_connection_rejects_use() {
    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.close().unwrap();

    assert!(!conn.is_open());
    assert!(matches!(
        conn.execute("SELECT 1", ()).await.unwrap_err(),
        Error::ConnectionClosed
    ));
    assert!(matches!(
        conn.changes().unwrap_err(),
        Error::ConnectionClosed
    ));
}

#[tokio::test]
async fn busy_surfaces_as_typed_error() {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("contended.db");
    let path = path.to_str().unwrap();

    let db1 = Builder::new_local(path).build().await.unwrap();
    let conn1 = db1.connect().unwrap();
    conn1
        .execute("CREATE TABLE t (x INTEGER)", ())
        .await
        .unwrap();

    let db2 = Builder::new_local(path).build().await.unwrap();
    let conn2 = db2.connect().unwrap();

    let tx = conn1
        .transaction_with_behavior(litesql::TransactionBehavior::Exclusive)
        .await
        .unwrap();
    tx.execute("INSERT INTO t VALUES (1)", ()).await.unwrap();

    let err = conn2
        .execute("INSERT INTO t VALUES (2)", ())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Busy(..)));

    tx.commit().await.unwrap();
    conn2.execute("INSERT INTO t VALUES (2)", ()).await.unwrap();
}

#[tokio::test]
async fn blob_and_backup_through_the_facade() {
    let tempdir = tempfile::tempdir().unwrap();

    let db = Builder::new_local(":memory:").build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.execute("CREATE TABLE files (data BLOB)", ())
        .await
        .unwrap();
    conn.execute("INSERT INTO files VALUES (ZEROBLOB(4))", ())
        .await
        .unwrap();
    let rowid = conn.last_insert_rowid().unwrap();

    let mut blob = conn
        .blob_open(DatabaseName::Main, "files", "data", rowid, false)
        .unwrap();
    blob.write_at(b"abcd", 0).unwrap();
    let mut buf = [0u8; 4];
    blob.read_at(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"abcd");
    blob.close().unwrap();

    let dest = tempdir.path().join("copy.db");
    conn.backup(DatabaseName::Main, &dest).unwrap();

    let copy = Builder::new_local(dest.to_str().unwrap())
        .build()
        .await
        .unwrap();
    let copy_conn = copy.connect().unwrap();
    let row = copy_conn
        .query_row("SELECT data FROM files", ())
        .await
        .unwrap();
    assert_eq!(row.get_value(0).unwrap(), Value::Blob(b"abcd".to_vec()));
}

#[tokio::test]
async fn params_macro_and_iter_forms() {
    let conn = setup().await;

    conn.execute(
        "INSERT INTO test (integer, text) VALUES (?1, ?2)",
        params![1, "one"],
    )
    .await
    .unwrap();

    conn.execute(
        "INSERT INTO test (integer) VALUES (?1)",
        litesql::params_from_iter(vec![2i64]),
    )
    .await
    .unwrap();

    let rows = conn.query_all("SELECT * FROM test", ()).await.unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn file_url_paths_are_accepted() {
    let tempdir = tempfile::tempdir().unwrap();
    let path = tempdir.path().join("via-url.db");
    let url = format!("file://{}", path.display());

    let db = Builder::new_local(&url).build().await.unwrap();
    let conn = db.connect().unwrap();
    conn.execute("CREATE TABLE t (x INTEGER)", ()).await.unwrap();
    drop(conn);

    assert!(path.exists());
}

#[tokio::test]
async fn version_is_reported() {
    assert!(!litesql::version().is_empty());
    assert!(litesql::version_number() >= 3_000_000);
}
