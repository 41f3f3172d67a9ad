//! End-to-end build tests against the in-memory source.
//!
//! Each test drives the full pipeline: inspect, materialize, re-index,
//! assemble and post-process.

use relational_ingest::{
    BuildOptions, Config, ConnectionConfig, Dataset, DatasetBuilder, DatasetConfig,
    DiagnosticKind, IngestError, MemorySource, MemoryTable, NativeType, Step, Value,
};

const PK: &str = "__PK__";

fn config(keep_original_keys: bool) -> Config {
    let mut dataset = DatasetConfig::new(ConnectionConfig {
        dialect: "mysql".into(),
        host: "localhost".into(),
        user: "test".into(),
        database: "fixture".into(),
        ..Default::default()
    });
    dataset.keep_original_keys = keep_original_keys;
    Config::for_dataset(dataset)
}

async fn build(source: MemorySource, keep_original_keys: bool) -> relational_ingest::Result<Dataset> {
    DatasetBuilder::new(config(keep_original_keys))
        .build_with(source)
        .await
}

fn int(v: i32) -> Value {
    Value::I32(v)
}

fn pk(v: i64) -> Value {
    Value::I64(v)
}

fn values(dataset: &Dataset, table: &str, column: &str) -> Vec<Value> {
    dataset
        .table(table)
        .unwrap_or_else(|| panic!("missing table {}", table))
        .frame()
        .column(column)
        .unwrap_or_else(|| panic!("missing column {}.{}", table, column))
        .values
        .clone()
}

fn columns(dataset: &Dataset, table: &str) -> Vec<String> {
    dataset
        .table(table)
        .unwrap()
        .frame()
        .column_names()
        .map(str::to_string)
        .collect()
}

/// customers <- orders, orders.customer_id -> customers.id
fn shop() -> MemorySource {
    MemorySource::new()
        .with_table(
            MemoryTable::new("customers")
                .column("id", NativeType::Integer)
                .column("name", NativeType::String)
                .primary_key(["id"])
                .rows([
                    vec![int(10), "ada".into()],
                    vec![int(20), "bob".into()],
                    vec![int(30), "cy".into()],
                ]),
        )
        .with_table(
            MemoryTable::new("orders")
                .column("order_id", NativeType::BigInteger)
                .column("customer_id", NativeType::Integer)
                .column("amount", NativeType::Double)
                .primary_key(["order_id"])
                .foreign_key(["customer_id"], "customers", ["id"])
                .rows([
                    vec![Value::I64(7), int(30), Value::F64(1.5)],
                    vec![Value::I64(3), int(10), Value::F64(2.5)],
                    vec![Value::I64(9), int(20), Value::F64(3.5)],
                    vec![Value::I64(1), int(10), Value::F64(4.5)],
                ]),
        )
}

#[tokio::test]
async fn test_surrogate_keys_are_dense_in_read_order() {
    let source = MemorySource::new().with_table(
        MemoryTable::new("events")
            .column("id", NativeType::Integer)
            .primary_key(["id"])
            .rows([vec![int(500)], vec![Value::Null], vec![int(-3)], vec![int(500)]]),
    );
    let dataset = build(source, true).await.unwrap();

    let table = dataset.table("events").unwrap();
    assert_eq!(table.pkey_col(), PK);
    assert_eq!(table.frame().columns()[0].name, PK);
    assert_eq!(values(&dataset, "events", PK), vec![pk(0), pk(1), pk(2), pk(3)]);
    assert_eq!(
        values(&dataset, "events", "id"),
        vec![int(500), Value::Null, int(-3), int(500)]
    );
}

#[tokio::test]
async fn test_reindexed_column_matches_equi_join() {
    let dataset = build(shop(), true).await.unwrap();

    let orders = dataset.table("orders").unwrap();
    assert_eq!(
        orders.fkey_col_to_pkey_table().get("FK_customers_customer_id"),
        Some(&"customers".to_string())
    );

    // Recompute the join by hand and compare, row by row.
    let customer_ids = values(&dataset, "customers", "id");
    let customer_pks = values(&dataset, "customers", PK);
    let expected: Vec<Value> = values(&dataset, "orders", "customer_id")
        .iter()
        .map(|fk| {
            let row = customer_ids.iter().position(|id| id == fk).unwrap();
            customer_pks[row].clone()
        })
        .collect();

    assert_eq!(values(&dataset, "orders", "FK_customers_customer_id"), expected);
    assert_eq!(expected, vec![pk(2), pk(0), pk(1), pk(0)]);
    // source order of orders is untouched
    assert_eq!(
        values(&dataset, "orders", "order_id"),
        vec![Value::I64(7), Value::I64(3), Value::I64(9), Value::I64(1)]
    );
}

#[tokio::test]
async fn test_self_reference_survives_key_stripping() {
    let source = MemorySource::new().with_table(
        MemoryTable::new("employees")
            .column("emp_no", NativeType::Integer)
            .column("manager_no", NativeType::Integer)
            .column("name", NativeType::String)
            .primary_key(["emp_no"])
            .foreign_key(["manager_no"], "employees", ["emp_no"])
            .rows([
                vec![int(100), Value::Null, "boss".into()],
                vec![int(200), int(100), "lead".into()],
                vec![int(300), int(200), "dev".into()],
                vec![int(400), int(200), "dev".into()],
            ]),
    );
    let dataset = build(source, false).await.unwrap();

    assert_eq!(
        values(&dataset, "employees", "FK_employees_manager_no"),
        vec![Value::Null, pk(0), pk(1), pk(1)]
    );
    assert_eq!(
        columns(&dataset, "employees"),
        vec![PK, "name", "FK_employees_manager_no"]
    );
}

#[tokio::test]
async fn test_rebuild_is_identical() {
    let first = build(shop(), false).await.unwrap();
    let second = build(shop(), false).await.unwrap();

    assert_eq!(first.tables(), second.tables());
    assert_eq!(
        first.summary().to_json().unwrap(),
        second.summary().to_json().unwrap()
    );
}

#[tokio::test]
async fn test_orphaned_reference_becomes_null() {
    let source = MemorySource::new()
        .with_table(
            MemoryTable::new("s")
                .column("id", NativeType::Integer)
                .primary_key(["id"])
                .rows([vec![int(1)], vec![int(2)]]),
        )
        .with_table(
            MemoryTable::new("r")
                .column("id", NativeType::Integer)
                .column("s_id", NativeType::Integer)
                .primary_key(["id"])
                .foreign_key(["s_id"], "s", ["id"])
                .rows([vec![int(1), int(2)], vec![int(2), int(99)], vec![int(3), int(1)]]),
        );
    let dataset = build(source, true).await.unwrap();

    assert_eq!(dataset.table("r").unwrap().len(), 3);
    assert_eq!(
        values(&dataset, "r", "FK_s_s_id"),
        vec![pk(1), Value::Null, pk(0)]
    );
    let orphans: Vec<_> = dataset
        .diagnostics()
        .iter()
        .filter(|d| d.kind == DiagnosticKind::OrphanedReferences)
        .collect();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].table, "r");
}

#[tokio::test]
async fn test_composite_key_join_is_conjunctive() {
    let source = MemorySource::new()
        .with_table(
            MemoryTable::new("a")
                .column("x", NativeType::Integer)
                .column("y", NativeType::String)
                .primary_key(["x", "y"])
                .rows([
                    vec![int(1), "p".into()],
                    vec![int(1), "q".into()],
                    vec![int(2), "p".into()],
                ]),
        )
        .with_table(
            MemoryTable::new("b")
                .column("bx", NativeType::Integer)
                .column("by", NativeType::String)
                .foreign_key(["bx", "by"], "a", ["x", "y"])
                .rows([
                    vec![int(1), "q".into()],
                    vec![int(1), "p".into()],
                    vec![int(2), "q".into()],
                    vec![int(1), Value::Null],
                ]),
        );
    let dataset = build(source, false).await.unwrap();

    assert_eq!(
        values(&dataset, "b", "FK_a_bx_by"),
        vec![pk(1), pk(0), Value::Null, Value::Null]
    );
    // b has no primary key; its foreign key columns are still stripped
    assert_eq!(columns(&dataset, "b"), vec![PK, "FK_a_bx_by"]);
}

#[tokio::test]
async fn test_unsupported_type_is_reported_not_fatal() {
    let source = MemorySource::new().with_table(
        MemoryTable::new("places")
            .column("id", NativeType::Integer)
            .unsupported_column("shape", "geometry")
            .primary_key(["id"])
            .rows([vec![int(1), "POINT(1 2)".into()], vec![int(2), Value::Null]]),
    );
    let dataset = build(source, true).await.unwrap();

    assert_eq!(dataset.table("places").unwrap().len(), 2);
    let diagnostic = dataset
        .diagnostics()
        .iter()
        .find(|d| d.kind == DiagnosticKind::UnsupportedType)
        .expect("unsupported type diagnostic");
    assert_eq!(diagnostic.table, "places");
    assert_eq!(diagnostic.column, "shape");
}

#[tokio::test]
async fn test_drop_keys_removes_only_original_keys() {
    let stripped = build(shop(), false).await.unwrap();
    assert_eq!(columns(&stripped, "customers"), vec![PK, "name"]);
    assert_eq!(
        columns(&stripped, "orders"),
        vec![PK, "amount", "FK_customers_customer_id"]
    );

    let kept = build(shop(), true).await.unwrap();
    assert_eq!(
        columns(&kept, "orders"),
        vec![PK, "order_id", "customer_id", "amount", "FK_customers_customer_id"]
    );
}

#[tokio::test]
async fn test_reference_to_unknown_table_is_fatal() {
    let source = MemorySource::new().with_table(
        MemoryTable::new("r")
            .column("ghost_id", NativeType::Integer)
            .foreign_key(["ghost_id"], "ghost", ["id"])
            .row(vec![int(1)]),
    );
    let handle = source.clone();
    let err = build(source, false).await.unwrap_err();

    assert!(matches!(err, IngestError::SchemaInconsistency(_)));
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_reference_to_table_without_primary_key_is_fatal() {
    let source = MemorySource::new()
        .with_table(
            MemoryTable::new("s")
                .column("id", NativeType::Integer)
                .row(vec![int(1)]),
        )
        .with_table(
            MemoryTable::new("r")
                .column("s_id", NativeType::Integer)
                .foreign_key(["s_id"], "s", ["id"])
                .row(vec![int(1)]),
        );
    let err = build(source, false).await.unwrap_err();
    assert!(matches!(err, IngestError::SchemaInconsistency(_)));
}

#[tokio::test]
async fn test_colliding_reindexed_names_get_suffixes() {
    let source = MemorySource::new()
        .with_table(
            MemoryTable::new("t")
                .column("id", NativeType::Integer)
                .column("k1", NativeType::Integer)
                .column("k2", NativeType::Integer)
                .primary_key(["id"])
                .rows([vec![int(1), int(5), int(6)], vec![int(2), int(7), int(8)]]),
        )
        .with_table(
            MemoryTable::new("u")
                .column("a_b", NativeType::Integer)
                .column("a", NativeType::Integer)
                .column("b", NativeType::Integer)
                .foreign_key(["a_b"], "t", ["id"])
                .foreign_key(["a", "b"], "t", ["k1", "k2"])
                .row(vec![int(1), int(7), int(8)]),
        );
    let dataset = build(source, true).await.unwrap();

    let u = dataset.table("u").unwrap();
    assert_eq!(u.fkey_col_to_pkey_table().len(), 2);
    assert_eq!(values(&dataset, "u", "FK_t_a_b"), vec![pk(0)]);
    assert_eq!(values(&dataset, "u", "FK_t_a_b_2"), vec![pk(1)]);
    assert!(dataset
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::NameCollision && d.column == "FK_t_a_b_2"));
}

#[tokio::test]
async fn test_same_columns_referencing_two_tables_keep_both() {
    let source = || {
        MemorySource::new()
            .with_table(
                MemoryTable::new("a")
                    .column("id", NativeType::Integer)
                    .primary_key(["id"])
                    .rows([vec![int(1)], vec![int(2)]]),
            )
            .with_table(
                MemoryTable::new("b")
                    .column("id", NativeType::Integer)
                    .primary_key(["id"])
                    .rows([vec![int(2)], vec![int(3)]]),
            )
            .with_table(
                MemoryTable::new("c")
                    .column("id", NativeType::Integer)
                    .column("x", NativeType::Integer)
                    .primary_key(["id"])
                    .foreign_key(["x"], "a", ["id"])
                    .foreign_key(["x"], "b", ["id"])
                    .rows([vec![int(1), int(2)], vec![int(2), int(3)]]),
            )
    };

    let dataset = build(source(), true).await.unwrap();
    let fkeys = dataset.table("c").unwrap().fkey_col_to_pkey_table().clone();
    assert_eq!(fkeys.len(), 2);
    assert_eq!(fkeys["FK_a_x"], "a");
    assert_eq!(fkeys["FK_b_x"], "b");
    assert_eq!(values(&dataset, "c", "FK_a_x"), vec![pk(1), Value::Null]);
    assert_eq!(values(&dataset, "c", "FK_b_x"), vec![pk(0), pk(1)]);

    let stripped = build(source(), false).await.unwrap();
    assert_eq!(columns(&stripped, "c"), vec![PK, "FK_a_x", "FK_b_x"]);
}

#[tokio::test]
async fn test_surrogate_name_avoids_real_columns() {
    let source = MemorySource::new().with_table(
        MemoryTable::new("odd")
            .column("__PK__", NativeType::Integer)
            .primary_key(["__PK__"])
            .row(vec![int(42)]),
    );
    let dataset = build(source, true).await.unwrap();

    let odd = dataset.table("odd").unwrap();
    assert_eq!(odd.pkey_col(), "__PK___");
    assert_eq!(values(&dataset, "odd", "__PK__"), vec![int(42)]);
}

#[tokio::test]
async fn test_each_table_read_exactly_once() {
    let source = shop();
    let handle = source.clone();
    build(source, false).await.unwrap();
    assert_eq!(handle.read_count(), 2);
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_failed_read_aborts_and_closes() {
    let source = shop().failing_read("orders");
    let handle = source.clone();
    let err = build(source, false).await.unwrap_err();

    assert!(matches!(err, IngestError::Materialize { .. }));
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_sequential_reads_give_same_dataset() {
    let mut sequential = config(false);
    sequential.build = BuildOptions {
        parallel_reads: false,
        ..Default::default()
    };
    let a = DatasetBuilder::new(sequential).build_with(shop()).await.unwrap();
    let b = build(shop(), false).await.unwrap();
    assert_eq!(a.tables(), b.tables());
}

#[tokio::test]
async fn test_time_columns_and_post_processing() {
    let mut config = config(true);
    config
        .dataset
        .time_col_dict
        .insert("orders".into(), "placed".into());
    config.dataset.post_process = vec![
        Step::DropColumns {
            table: "orders".into(),
            columns: vec!["order_id".into()],
        },
        Step::ParseDatetime {
            table: "orders".into(),
            columns: vec!["placed".into()],
        },
        Step::DropTables {
            tables: vec!["audit".into()],
        },
    ];

    let source = MemorySource::new()
        .with_table(
            MemoryTable::new("orders")
                .column("order_id", NativeType::Integer)
                .column("placed", NativeType::String)
                .primary_key(["order_id"])
                .rows([vec![int(1), "2016-01-18".into()], vec![int(2), "bogus".into()]]),
        )
        .with_table(MemoryTable::new("audit").column("line", NativeType::Text));

    let dataset = DatasetBuilder::new(config).build_with(source).await.unwrap();

    assert_eq!(dataset.table_names().collect::<Vec<_>>(), vec!["orders"]);
    let orders = dataset.table("orders").unwrap();
    assert_eq!(orders.time_col(), Some("placed"));
    assert!(!orders.frame().contains("order_id"));
    let placed = values(&dataset, "orders", "placed");
    assert!(matches!(placed[0], Value::Timestamp(_)));
    assert_eq!(placed[1], Value::Null);
}

#[tokio::test]
async fn test_post_process_error_is_fatal() {
    let mut config = config(true);
    config.dataset.post_process = vec![Step::DropTables {
        tables: vec!["nowhere".into()],
    }];
    let err = DatasetBuilder::new(config)
        .build_with(shop())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::PostProcess { .. }));
    assert_eq!(err.exit_code(), 5);
}
