use dbengine::expr::{AllColumnsExpression, BinaryOperator, Expression};
use dbengine::requests::{
    ColumnDefinition, CreateDatabaseRequest, CreateTableRequest, DbEngineRequest,
    DescribeTableRequest, InsertRequest, ResultExpression, SelectRequest, SourceTable,
};
use dbengine::variant::{Variant, VariantType};

use crate::test_env::TestEnv;

fn setup_table(env: &mut TestEnv, database: &str, table: &str, rows: Vec<(i32, i32)>) {
    env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: database.to_string(),
        cipher_id: Some("none".to_string()),
        cipher_key_seed: None,
    }));
    env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: database.to_string(),
        table: table.to_string(),
        columns: vec![
            ColumnDefinition::new("A", VariantType::Int32),
            ColumnDefinition::new("B", VariantType::Int32),
        ],
    }));
    let rows = rows
        .into_iter()
        .map(|(a, b)| vec![Variant::Int32(a), Variant::Int32(b)])
        .collect();
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: database.to_string(),
        table: table.to_string(),
        columns: vec!["A".to_string(), "B".to_string()],
        rows,
    }));
}

fn column(name: &str) -> ResultExpression {
    ResultExpression::new(Expression::column("", name))
}

fn select(database: &str, table: &str) -> SelectRequest {
    SelectRequest {
        database: database.to_string(),
        tables: vec![SourceTable::new(table)],
        ..Default::default()
    }
}

#[test]
fn test_single_row_select() {
    // CREATE DATABASE TEST1; CREATE TABLE TEST1.T(C INT);
    // INSERT INTO TEST1.T(C) VALUES (42); SELECT C FROM TEST1.T
    let mut env = TestEnv::new();
    env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: "TEST1".to_string(),
        cipher_id: Some("none".to_string()),
        cipher_key_seed: None,
    }));
    env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: "TEST1".to_string(),
        table: "T".to_string(),
        columns: vec![ColumnDefinition::new("C", VariantType::Int32)],
    }));
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "TEST1".to_string(),
        table: "T".to_string(),
        columns: vec!["C".to_string()],
        rows: vec![vec![Variant::Int32(42)]],
    }));

    let mut request = select("TEST1", "T");
    request.result_expressions = vec![column("C")];
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
    assert_eq!(decoded.response.column_description.len(), 1);
    assert_eq!(decoded.response.column_description[0].name, "C");
    assert_eq!(decoded.rows, vec![vec![Variant::Int32(42)]]);
}

#[test]
fn test_select_from_sys_databases() {
    // SELECT * FROM SYS.SYS_DATABASES WHERE NAME='TEST1'
    let mut env = TestEnv::new();
    env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: "TEST1".to_string(),
        cipher_id: Some("none".to_string()),
        cipher_key_seed: None,
    }));

    let mut request = select("SYS", "SYS_DATABASES");
    request.result_expressions = vec![ResultExpression::new(Expression::AllColumns(
        AllColumnsExpression::new(""),
    ))];
    request.where_expr = Some(Expression::binary(
        BinaryOperator::Equal,
        Expression::column("", "NAME"),
        Expression::constant("TEST1"),
    ));
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
    assert_eq!(decoded.rows.len(), 1);
    let name_index = decoded
        .response
        .column_description
        .iter()
        .position(|c| c.name == "NAME")
        .unwrap();
    assert_eq!(
        decoded.rows[0][name_index],
        Variant::String("TEST1".to_string())
    );
}

#[test]
fn test_select_by_trid_after_add_column() {
    // ALTER后按TRID取行，补默认值
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![(1, 2)]);
    env.execute(DbEngineRequest::AddColumn(dbengine::requests::AddColumnRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        column: ColumnDefinition::new("C", VariantType::Int32).with_default(Variant::Int32(7)),
    }));

    let mut request = select("D", "T");
    request.result_expressions = vec![column("A"), column("B"), column("C")];
    request.where_expr = Some(Expression::binary(
        BinaryOperator::Equal,
        Expression::column("", "TRID"),
        Expression::constant(1u64),
    ));
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert_eq!(
        decoded.rows,
        vec![vec![Variant::Int32(1), Variant::Int32(2), Variant::Int32(7)]]
    );
}

#[test]
fn test_between_filter_includes_bounds() {
    // SELECT * FROM D.T WHERE A BETWEEN 1 AND 1 对 (1,2),(2,3)
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![(1, 2), (2, 3)]);

    let mut request = select("D", "T");
    request.result_expressions = vec![ResultExpression::new(Expression::AllColumns(
        AllColumnsExpression::new(""),
    ))];
    request.where_expr = Some(Expression::Between {
        value: Box::new(Expression::column("", "A")),
        lower: Box::new(Expression::constant(1i32)),
        upper: Box::new(Expression::constant(1i32)),
        not_between: false,
    });
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert_eq!(
        decoded.rows,
        vec![vec![Variant::UInt64(1), Variant::Int32(1), Variant::Int32(2)]]
    );
}

#[test]
fn test_limit_and_offset() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![(1, 0), (2, 0), (3, 0), (4, 0)]);

    let mut request = select("D", "T");
    request.result_expressions = vec![column("A")];
    request.limit = Some(Expression::constant(2i32));
    request.offset = Some(Expression::constant(1i32));
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert_eq!(
        decoded.rows,
        vec![vec![Variant::Int32(2)], vec![Variant::Int32(3)]]
    );

    // 负LIMIT报错
    let mut request = select("D", "T");
    request.result_expressions = vec![column("A")];
    request.limit = Some(Expression::unary(
        dbengine::expr::UnaryOperator::Minus,
        Expression::constant(1i32),
    ));
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert_eq!(decoded.response.messages.len(), 1);
    assert!(decoded.rows.is_empty());
}

#[test]
fn test_computed_result_expression() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![(10, 5)]);

    let mut request = select("D", "T");
    request.result_expressions = vec![ResultExpression::with_alias(
        Expression::binary(
            BinaryOperator::Add,
            Expression::column("", "A"),
            Expression::column("", "B"),
        ),
        "S",
    )];
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert_eq!(decoded.response.column_description[0].name, "S");
    assert_eq!(decoded.rows, vec![vec![Variant::Int32(15)]]);
}

#[test]
fn test_validation_reports_all_errors_at_once() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![(1, 2)]);

    let mut request = select("D", "T");
    // 两个坏列 + 重复别名：一次响应全部上报
    request.result_expressions = vec![
        column("NO_SUCH_1"),
        column("NO_SUCH_2"),
        ResultExpression::with_alias(Expression::column("", "A"), "X"),
        ResultExpression::with_alias(Expression::column("", "B"), "X"),
    ];
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert!(decoded.response.messages.len() >= 3, "{:?}", decoded.message_texts());
    assert!(decoded.rows.is_empty());
}

#[test]
fn test_null_where_filters_everything() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![(1, 2), (2, 3)]);

    let mut request = select("D", "T");
    request.result_expressions = vec![column("A")];
    request.where_expr = Some(Expression::Constant(Variant::Null));
    let decoded = env.execute(DbEngineRequest::Select(request));
    assert!(decoded.response.messages.is_empty());
    assert!(decoded.rows.is_empty());
}

#[test]
fn test_cross_join_two_tables() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T1", vec![(1, 0), (2, 0)]);
    env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: "D".to_string(),
        table: "T2".to_string(),
        columns: vec![ColumnDefinition::new("X", VariantType::Int32)],
    }));
    env.execute(DbEngineRequest::Insert(InsertRequest {
        database: "D".to_string(),
        table: "T2".to_string(),
        columns: vec!["X".to_string()],
        rows: vec![vec![Variant::Int32(10)], vec![Variant::Int32(20)]],
    }));

    let mut request = SelectRequest {
        database: "D".to_string(),
        tables: vec![SourceTable::new("T1"), SourceTable::new("T2")],
        ..Default::default()
    };
    request.result_expressions = vec![
        ResultExpression::new(Expression::column("T1", "A")),
        ResultExpression::new(Expression::column("T2", "X")),
    ];
    let decoded = env.execute(DbEngineRequest::Select(request));
    // 最左表最外层的嵌套循环次序
    assert_eq!(
        decoded.rows,
        vec![
            vec![Variant::Int32(1), Variant::Int32(10)],
            vec![Variant::Int32(1), Variant::Int32(20)],
            vec![Variant::Int32(2), Variant::Int32(10)],
            vec![Variant::Int32(2), Variant::Int32(20)],
        ]
    );
}

#[test]
fn test_show_databases_and_tables() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![]);

    let decoded = env.execute(DbEngineRequest::ShowDatabases);
    assert_eq!(decoded.response.column_description.len(), 2);
    let names: Vec<&Variant> = decoded.rows.iter().map(|row| &row[0]).collect();
    assert!(names.contains(&&Variant::String("D".to_string())));
    assert!(names.contains(&&Variant::String("SYS".to_string())));

    env.execute(DbEngineRequest::UseDatabase(
        dbengine::requests::UseDatabaseRequest {
            database: "D".to_string(),
        },
    ));
    let decoded = env.execute(DbEngineRequest::ShowTables);
    let names: Vec<&Variant> = decoded.rows.iter().map(|row| &row[0]).collect();
    assert!(names.contains(&&Variant::String("T".to_string())));
}

#[test]
fn test_describe_table() {
    let mut env = TestEnv::new();
    setup_table(&mut env, "D", "T", vec![]);

    let decoded = env.execute(DbEngineRequest::DescribeTable(DescribeTableRequest {
        database: "D".to_string(),
        table: "T".to_string(),
    }));
    assert_eq!(
        decoded.rows,
        vec![
            vec![
                Variant::String("TRID".to_string()),
                Variant::String("BIGUINT".to_string())
            ],
            vec![
                Variant::String("A".to_string()),
                Variant::String("INT".to_string())
            ],
            vec![
                Variant::String("B".to_string()),
                Variant::String("INT".to_string())
            ],
        ]
    );
}
