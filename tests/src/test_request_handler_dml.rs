use dbengine::expr::{BinaryOperator, Expression};
use dbengine::requests::{
    ColumnDefinition, CreateDatabaseRequest, CreateTableRequest, DbEngineRequest, DeleteRequest,
    InsertRequest, ResultExpression, SelectRequest, SourceTable, UpdateRequest,
};
use dbengine::variant::{Variant, VariantType};

use crate::test_env::TestEnv;

fn setup(env: &mut TestEnv) {
    env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: "D".to_string(),
        cipher_id: Some("none".to_string()),
        cipher_key_seed: None,
    }));
    env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec![
            ColumnDefinition::new("A", VariantType::Int32),
            ColumnDefinition::new("B", VariantType::String),
        ],
    }));
}

fn select_all(env: &mut TestEnv) -> Vec<Vec<Variant>> {
    let request = SelectRequest {
        database: "D".to_string(),
        tables: vec![SourceTable::new("T")],
        result_expressions: vec![
            ResultExpression::new(Expression::column("", "TRID")),
            ResultExpression::new(Expression::column("", "A")),
            ResultExpression::new(Expression::column("", "B")),
        ],
        ..Default::default()
    };
    env.execute(DbEngineRequest::Select(request)).rows
}

#[test]
fn test_insert_returns_generated_trids() {
    let mut env = TestEnv::new();
    setup(&mut env);

    let decoded = env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string(), "B".to_string()],
        rows: vec![
            vec![Variant::Int32(1), Variant::String("one".to_string())],
            vec![Variant::Int32(2), Variant::String("two".to_string())],
        ],
    }));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
    assert!(decoded.response.has_affected_row_count);
    assert_eq!(decoded.response.affected_row_count, 2);
    assert_eq!(
        decoded.rows,
        vec![vec![Variant::UInt64(1)], vec![Variant::UInt64(2)]]
    );
}

#[test]
fn test_insert_missing_not_null_column_fails() {
    let mut env = TestEnv::new();
    env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: "D".to_string(),
        cipher_id: None,
        cipher_key_seed: None,
    }));
    env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec![
            ColumnDefinition::new("A", VariantType::Int32).not_null(),
            ColumnDefinition::new("B", VariantType::Int32),
        ],
    }));

    let decoded = env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["B".to_string()],
        rows: vec![vec![Variant::Int32(9)]],
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.message_texts()[0].contains("cannot be NULL"));
}

#[test]
fn test_update_with_where() {
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string(), "B".to_string()],
        rows: vec![
            vec![Variant::Int32(1), Variant::String("one".to_string())],
            vec![Variant::Int32(2), Variant::String("two".to_string())],
        ],
    }));

    let decoded = env.execute(DbEngineRequest::Update(UpdateRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["B".to_string()],
        values: vec![Expression::constant("updated")],
        where_expr: Some(Expression::binary(
            BinaryOperator::Equal,
            Expression::column("", "A"),
            Expression::constant(2i32),
        )),
    }));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
    assert_eq!(decoded.response.affected_row_count, 1);

    let rows = select_all(&mut env);
    assert_eq!(rows[0][2], Variant::String("one".to_string()));
    assert_eq!(rows[1][2], Variant::String("updated".to_string()));
}

#[test]
fn test_update_set_expression_uses_current_row() {
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        rows: vec![vec![Variant::Int32(10)], vec![Variant::Int32(20)]],
    }));

    // SET A = A + 1
    let decoded = env.execute(DbEngineRequest::Update(UpdateRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        values: vec![Expression::binary(
            BinaryOperator::Add,
            Expression::column("", "A"),
            Expression::constant(1i32),
        )],
        where_expr: None,
    }));
    assert_eq!(decoded.response.affected_row_count, 2);

    let rows = select_all(&mut env);
    assert_eq!(rows[0][1], Variant::Int32(11));
    assert_eq!(rows[1][1], Variant::Int32(21));
}

#[test]
fn test_delete_with_where() {
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        rows: vec![
            vec![Variant::Int32(1)],
            vec![Variant::Int32(2)],
            vec![Variant::Int32(3)],
        ],
    }));

    let decoded = env.execute(DbEngineRequest::Delete(DeleteRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        where_expr: Some(Expression::binary(
            BinaryOperator::Less,
            Expression::column("", "A"),
            Expression::constant(3i32),
        )),
    }));
    assert_eq!(decoded.response.affected_row_count, 2);

    let rows = select_all(&mut env);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Variant::UInt64(3));
}

#[test]
fn test_dml_on_system_table_is_rejected() {
    let mut env = TestEnv::new();
    setup(&mut env);
    let decoded = env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "SYS".to_string(),
        table: "SYS_DATABASES".to_string(),
        columns: vec!["NAME".to_string()],
        rows: vec![vec![Variant::String("EVIL".to_string())]],
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.message_texts()[0].contains("cannot be modified"));
}

#[test]
fn test_transaction_control_is_stubbed() {
    let mut env = TestEnv::new();
    for request in [
        DbEngineRequest::BeginTransaction,
        DbEngineRequest::CommitTransaction,
        DbEngineRequest::RollbackTransaction,
        DbEngineRequest::Savepoint,
        DbEngineRequest::Release,
    ] {
        let decoded = env.execute(request);
        assert_eq!(decoded.response.messages.len(), 1);
        assert!(decoded.message_texts()[0].contains("not implemented"));
    }
}
