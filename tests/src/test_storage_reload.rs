use std::sync::Arc;

use tempfile::TempDir;

use common::config::options::InstanceOptions;
use common::io::SharedMemoryOutputStream;
use common::log::TracingFactory;
use dbengine::expr::Expression;
use dbengine::handlers::RequestHandler;
use dbengine::requests::{
    ColumnDefinition, CreateDatabaseRequest, CreateTableRequest, DbEngineRequest, InsertRequest,
    ResultExpression, SelectRequest, SourceTable,
};
use dbengine::storage::cipher::DEFAULT_CIPHER_REGISTRY;
use dbengine::storage::instance::SUPER_USER_ID;
use dbengine::storage::Instance;
use dbengine::variant::{Variant, VariantType};

/// 关停flush后重开实例，数据经持久化路径完整回读。
#[test]
fn test_rows_survive_instance_restart() {
    let data_dir = TempDir::new().unwrap();
    let options = InstanceOptions::new(data_dir.path().join("data"));

    {
        let instance = Instance::open(
            options.clone(),
            Arc::clone(&DEFAULT_CIPHER_REGISTRY),
            Arc::new(TracingFactory::disabled()),
        )
        .unwrap();
        let mut handler = RequestHandler::new(
            Arc::clone(&instance),
            SharedMemoryOutputStream::new(),
            SUPER_USER_ID,
        );
        handler
            .execute_request(
                DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
                    database: "KEEP".to_string(),
                    cipher_id: Some("none".to_string()),
                    cipher_key_seed: None,
                }),
                1,
                0,
                1,
            )
            .unwrap();
        handler
            .execute_request(
                DbEngineRequest::CreateTable(CreateTableRequest {
                    database: "KEEP".to_string(),
                    table: "T".to_string(),
                    columns: vec![
                        ColumnDefinition::new("A", VariantType::Int32),
                        ColumnDefinition::new("S", VariantType::String),
                    ],
                }),
                2,
                0,
                1,
            )
            .unwrap();
        handler
            .execute_request(
                DbEngineRequest::Insert(InsertRequest {
                    database: "KEEP".to_string(),
                    table: "T".to_string(),
                    columns: vec!["A".to_string(), "S".to_string()],
                    rows: (1..=50)
                        .map(|i| {
                            vec![Variant::Int32(i), Variant::String(format!("row #{}", i))]
                        })
                        .collect(),
                }),
                3,
                0,
                1,
            )
            .unwrap();
        instance.flush_all().unwrap();
        // Drop再次flush，允许重复
    }

    let instance = Instance::open(
        options,
        Arc::clone(&DEFAULT_CIPHER_REGISTRY),
        Arc::new(TracingFactory::disabled()),
    )
    .unwrap();
    assert!(instance.database_exists("KEEP"));
    let database = instance.find_database("KEEP").unwrap();
    let table = database.find_table("T").unwrap();
    assert_eq!(table.row_count(), 50);
    let row = table.read_row(17).unwrap().unwrap();
    assert_eq!(row[1], Variant::Int32(17));
    assert_eq!(row[2], Variant::String("row #17".to_string()));
    assert_eq!(table.next_trid_value(), 51);

    // 重启后的实例照常服务查询
    let connection = SharedMemoryOutputStream::new();
    let mut handler = RequestHandler::new(Arc::clone(&instance), connection.clone(), SUPER_USER_ID);
    handler
        .execute_request(
            DbEngineRequest::Select(SelectRequest {
                database: "KEEP".to_string(),
                tables: vec![SourceTable::new("T")],
                result_expressions: vec![ResultExpression::new(Expression::column("", "A"))],
                where_expr: Some(Expression::binary(
                    dbengine::expr::BinaryOperator::Equal,
                    Expression::column("", "TRID"),
                    Expression::constant(1u64),
                )),
                limit: None,
                offset: None,
            }),
            1,
            0,
            1,
        )
        .unwrap();
    assert!(!connection.take_data().is_empty());
}
