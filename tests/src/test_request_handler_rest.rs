use dbengine::requests::{
    AddColumnRequest, ColumnDefinition, CreateDatabaseRequest, CreateTableRequest,
    DbEngineRequest, DeleteRowRestRequest, GetAllRowsRestRequest, GetSingleRowRestRequest,
    GetTablesRestRequest, InsertRequest, PatchRowRestRequest, PostRowsRestRequest,
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
            ColumnDefinition::new("B", VariantType::Int32),
        ],
    }));
}

#[test]
fn test_get_all_rows_after_insert_and_alter() {
    // INSERT (1,2)，加默认值7的列C，REST取全行
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string(), "B".to_string()],
        rows: vec![vec![Variant::Int32(1), Variant::Int32(2)]],
    }));
    env.execute(DbEngineRequest::AddColumn(AddColumnRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        column: ColumnDefinition::new("C", VariantType::Int32).with_default(Variant::Int32(7)),
    }));

    let decoded = env.execute(DbEngineRequest::RestGetAllRows(GetAllRowsRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
    }));
    assert_eq!(decoded.response.rest_status_code, 200);
    let payload = decoded.rest_payload();
    assert_eq!(
        payload,
        serde_json::json!({
            "status": 200,
            "rows": [{"TRID": 1, "A": 1, "B": 2, "C": 7}]
        })
    );
}

#[test]
fn test_get_databases_and_tables() {
    let mut env = TestEnv::new();
    setup(&mut env);

    let decoded = env.execute(DbEngineRequest::RestGetDatabases);
    let payload = decoded.rest_payload();
    assert_eq!(payload["status"], 200);
    let names: Vec<&str> = payload["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"D"));
    assert!(names.contains(&"SYS"));

    let decoded = env.execute(DbEngineRequest::RestGetTables(GetTablesRestRequest {
        database: "D".to_string(),
    }));
    let payload = decoded.rest_payload();
    assert_eq!(payload["rows"], serde_json::json!([{"name": "T"}]));
}

#[test]
fn test_get_single_row() {
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string(), "B".to_string()],
        rows: vec![vec![Variant::Int32(5), Variant::Int32(6)]],
    }));

    let decoded = env.execute(DbEngineRequest::RestGetSingleRow(GetSingleRowRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        trid: 1,
    }));
    let payload = decoded.rest_payload();
    assert_eq!(
        payload,
        serde_json::json!({"status": 200, "rows": [{"TRID": 1, "A": 5, "B": 6}]})
    );

    // 未知TRID -> 404 + 空行数组
    let decoded = env.execute(DbEngineRequest::RestGetSingleRow(GetSingleRowRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        trid: 99,
    }));
    assert_eq!(decoded.response.rest_status_code, 404);
    let payload = decoded.rest_payload();
    assert_eq!(payload, serde_json::json!({"status": 404, "rows": []}));
}

#[test]
fn test_post_rows() {
    let mut env = TestEnv::new();
    setup(&mut env);

    let decoded = env.execute(DbEngineRequest::RestPostRows(PostRowsRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        rows: vec![
            vec![
                ("A".to_string(), Variant::Int32(1)),
                ("B".to_string(), Variant::Int32(2)),
            ],
            vec![("A".to_string(), Variant::Int32(3))],
        ],
    }));
    assert_eq!(decoded.response.rest_status_code, 201);
    let payload = decoded.rest_payload();
    assert_eq!(
        payload,
        serde_json::json!({"status": 201, "affectedRowCount": 2, "trids": [1, 2]})
    );
}

#[test]
fn test_patch_row() {
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        rows: vec![vec![Variant::Int32(1)]],
    }));

    let decoded = env.execute(DbEngineRequest::RestPatchRow(PatchRowRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        trid: 1,
        columns: vec!["A".to_string()],
        values: vec![Variant::Int32(100)],
    }));
    assert_eq!(decoded.response.rest_status_code, 200);
    let payload = decoded.rest_payload();
    assert_eq!(
        payload,
        serde_json::json!({"status": 200, "affectedRowCount": 1, "trids": [1]})
    );

    let decoded = env.execute(DbEngineRequest::RestPatchRow(PatchRowRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        trid: 42,
        columns: vec!["A".to_string()],
        values: vec![Variant::Int32(0)],
    }));
    assert_eq!(decoded.response.rest_status_code, 404);
    let payload = decoded.rest_payload();
    assert_eq!(payload["affectedRowCount"], 0);
}

#[test]
fn test_delete_row() {
    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        rows: vec![vec![Variant::Int32(1)]],
    }));

    let decoded = env.execute(DbEngineRequest::RestDeleteRow(DeleteRowRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        trid: 1,
    }));
    assert_eq!(decoded.response.rest_status_code, 200);
    let payload = decoded.rest_payload();
    assert_eq!(
        payload,
        serde_json::json!({"status": 200, "affectedRowCount": 1, "trids": [1]})
    );

    let decoded = env.execute(DbEngineRequest::RestDeleteRow(DeleteRowRestRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        trid: 1,
    }));
    assert_eq!(decoded.response.rest_status_code, 404);
}

#[test]
fn test_rest_sql_query() {
    use dbengine::expr::Expression;
    use dbengine::requests::{ResultExpression, SelectRequest, SourceTable, SqlQueryRestRequest};

    let mut env = TestEnv::new();
    setup(&mut env);
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec!["A".to_string()],
        rows: vec![vec![Variant::Int32(5)]],
    }));

    let decoded = env.execute(DbEngineRequest::RestSqlQuery(SqlQueryRestRequest {
        query: SelectRequest {
            database: "D".to_string(),
            tables: vec![SourceTable::new("T")],
            result_expressions: vec![ResultExpression::new(Expression::column("", "A"))],
            ..Default::default()
        },
    }));
    let payload = decoded.rest_payload();
    assert_eq!(payload, serde_json::json!({"status": 200, "rows": [{"A": 5}]}));
}

#[test]
fn test_post_to_system_table_is_forbidden() {
    let mut env = TestEnv::new();
    setup(&mut env);
    let decoded = env.execute(DbEngineRequest::RestPostRows(PostRowsRestRequest {
        database: "SYS".to_string(),
        table: "SYS_DATABASES".to_string(),
        rows: vec![vec![("NAME".to_string(), Variant::String("EVIL".to_string()))]],
    }));
    assert_eq!(decoded.response.rest_status_code, 403);
    assert_eq!(decoded.response.messages.len(), 1);
}
