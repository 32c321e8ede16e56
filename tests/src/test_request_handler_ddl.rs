use dbengine::requests::{
    AddColumnRequest, ColumnDefinition, CreateDatabaseRequest, CreateIndexRequest,
    CreateTableRequest, DbEngineRequest, DropDatabaseRequest, DropTableRequest,
    RenameTableRequest, SelectRequest, SetTableAttributesRequest, SourceTable, UseDatabaseRequest,
};
use dbengine::variant::{Variant, VariantType};

use crate::test_env::TestEnv;

fn create_database(env: &mut TestEnv, name: &str) {
    let decoded = env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: name.to_string(),
        cipher_id: Some("none".to_string()),
        cipher_key_seed: None,
    }));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
}

fn create_table(env: &mut TestEnv, database: &str, table: &str, columns: Vec<ColumnDefinition>) {
    let decoded = env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: database.to_string(),
        table: table.to_string(),
        columns,
    }));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
}

#[test]
fn test_create_database_and_table() {
    let mut env = TestEnv::new();
    create_database(&mut env, "TEST1");
    create_table(
        &mut env,
        "TEST1",
        "T",
        vec![ColumnDefinition::new("C", VariantType::Int32)],
    );

    // 重复建库报错，连接保持可用
    let decoded = env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: "TEST1".to_string(),
        cipher_id: None,
        cipher_key_seed: None,
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.rows.is_empty());

    create_database(&mut env, "TEST2");
}

#[test]
fn test_drop_missing_database_keeps_connection_usable() {
    let mut env = TestEnv::new();
    let decoded = env.execute(DbEngineRequest::DropDatabase(DropDatabaseRequest {
        database: "NO_SUCH_DB".to_string(),
        if_exists: false,
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.rows.is_empty());
    assert!(decoded.message_texts()[0].contains("does not exist"));

    // 随后的请求正常执行
    create_database(&mut env, "STILL_ALIVE");
    let decoded = env.execute(DbEngineRequest::DropDatabase(DropDatabaseRequest {
        database: "NO_SUCH_DB".to_string(),
        if_exists: true,
    }));
    assert!(decoded.response.messages.is_empty());
}

#[test]
fn test_use_database() {
    let mut env = TestEnv::new();
    create_database(&mut env, "D1");
    let decoded = env.execute(DbEngineRequest::UseDatabase(UseDatabaseRequest {
        database: "D1".to_string(),
    }));
    assert!(decoded.response.messages.is_empty());
    assert_eq!(env.handler.current_database(), "D1");

    create_table(
        &mut env,
        "",
        "T",
        vec![ColumnDefinition::new("A", VariantType::Int32)],
    );
    // 当前库兜底生效
    let decoded = env.execute(DbEngineRequest::Select(SelectRequest {
        tables: vec![SourceTable::new("T")],
        result_expressions: vec![dbengine::requests::ResultExpression::new(
            dbengine::expr::Expression::column("", "A"),
        )],
        ..Default::default()
    }));
    assert!(decoded.response.messages.is_empty());
    assert!(decoded.rows.is_empty());
}

#[test]
fn test_add_column_with_default_backfills_old_rows() {
    use dbengine::requests::InsertRequest;

    let mut env = TestEnv::new();
    create_database(&mut env, "D");
    create_table(
        &mut env,
        "D",
        "T",
        vec![
            ColumnDefinition::new("A", VariantType::Int32),
            ColumnDefinition::new("B", VariantType::Int32),
        ],
    );
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string(), "B".to_string()],
        rows: vec![vec![Variant::Int32(1), Variant::Int32(2)]],
    }));

    let decoded = env.execute(DbEngineRequest::AddColumn(AddColumnRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        column: ColumnDefinition::new("C", VariantType::Int32).with_default(Variant::Int32(7)),
    }));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());

    // 加列前写入的行读出默认值
    let decoded = env.execute(DbEngineRequest::Select(SelectRequest {
        database: "D".to_string(),
        tables: vec![SourceTable::new("T")],
        result_expressions: vec![
            dbengine::requests::ResultExpression::new(dbengine::expr::Expression::column("", "A")),
            dbengine::requests::ResultExpression::new(dbengine::expr::Expression::column("", "B")),
            dbengine::requests::ResultExpression::new(dbengine::expr::Expression::column("", "C")),
        ],
        where_expr: Some(dbengine::expr::Expression::binary(
            dbengine::expr::BinaryOperator::Equal,
            dbengine::expr::Expression::column("", "TRID"),
            dbengine::expr::Expression::constant(1u64),
        )),
        ..Default::default()
    }));
    assert_eq!(
        decoded.rows,
        vec![vec![Variant::Int32(1), Variant::Int32(2), Variant::Int32(7)]]
    );
}

#[test]
fn test_rename_and_drop_table() {
    let mut env = TestEnv::new();
    create_database(&mut env, "D");
    create_table(
        &mut env,
        "D",
        "T1",
        vec![ColumnDefinition::new("A", VariantType::Int32)],
    );

    let decoded = env.execute(DbEngineRequest::RenameTable(RenameTableRequest {
        database: "D".to_string(),
        table: "T1".to_string(),
        new_name: "T2".to_string(),
    }));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::DropTable(DropTableRequest {
        database: "D".to_string(),
        table: "T1".to_string(),
        if_exists: false,
    }));
    assert_eq!(decoded.response.messages.len(), 1);

    let decoded = env.execute(DbEngineRequest::DropTable(DropTableRequest {
        database: "D".to_string(),
        table: "T2".to_string(),
        if_exists: false,
    }));
    assert!(decoded.response.messages.is_empty());
}

#[test]
fn test_set_next_trid() {
    use dbengine::requests::InsertRequest;

    let mut env = TestEnv::new();
    create_database(&mut env, "D");
    create_table(
        &mut env,
        "D",
        "T",
        vec![ColumnDefinition::new("A", VariantType::Int32)],
    );
    let decoded = env.execute(DbEngineRequest::SetTableAttributes(
        SetTableAttributesRequest {
            database: "D".to_string(),
            table: "T".to_string(),
            next_trid: Some(100),
        },
    ));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        rows: vec![vec![Variant::Int32(1)]],
    }));
    assert_eq!(decoded.rows, vec![vec![Variant::UInt64(100)]]);
}

#[test]
fn test_create_index_is_not_implemented() {
    let mut env = TestEnv::new();
    create_database(&mut env, "D");
    let decoded = env.execute(DbEngineRequest::CreateIndex(CreateIndexRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        index: "I".to_string(),
        columns: vec!["A".to_string()],
        unique: false,
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.message_texts()[0].contains("not implemented"));
}

#[test]
fn test_system_table_cannot_be_dropped() {
    let mut env = TestEnv::new();
    create_database(&mut env, "D");
    let decoded = env.execute(DbEngineRequest::DropTable(DropTableRequest {
        database: "D".to_string(),
        table: "SYS_TABLES".to_string(),
        if_exists: false,
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.message_texts()[0].contains("cannot be dropped"));
}
