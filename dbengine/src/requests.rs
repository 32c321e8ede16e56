use crate::expr::Expression;
use crate::storage::user::PermissionMask;
use crate::variant::{Variant, VariantType};

/// 解析后的请求AST。由前端的SQL解析器/REST路由构造。
#[derive(Debug, Clone)]
pub enum DbEngineRequest {
    // DQL
    Select(SelectRequest),
    ShowDatabases,
    ShowTables,
    ShowPermissions(ShowPermissionsRequest),
    DescribeTable(DescribeTableRequest),

    // DML
    Insert(InsertRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),

    // DDL
    CreateDatabase(CreateDatabaseRequest),
    DropDatabase(DropDatabaseRequest),
    UseDatabase(UseDatabaseRequest),
    AttachDatabase(AttachDatabaseRequest),
    DetachDatabase(DetachDatabaseRequest),
    CreateTable(CreateTableRequest),
    DropTable(DropTableRequest),
    RenameTable(RenameTableRequest),
    SetTableAttributes(SetTableAttributesRequest),
    AddColumn(AddColumnRequest),
    DropColumn(DropColumnRequest),
    RenameColumn(RenameColumnRequest),
    RedefineColumn(RedefineColumnRequest),
    CreateIndex(CreateIndexRequest),
    DropIndex(DropIndexRequest),

    // TCL（桩：统一回复未实现）
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    Savepoint,
    Release,

    // UM
    CreateUser(CreateUserRequest),
    DropUser(DropUserRequest),
    SetUserAttributes(SetUserAttributesRequest),
    AddUserAccessKey(AddUserAccessKeyRequest),
    DropUserAccessKey(DropUserAccessKeyRequest),
    SetUserAccessKeyAttributes(SetUserAccessKeyAttributesRequest),
    RenameUserAccessKey(RenameUserAccessKeyRequest),
    AddUserToken(AddUserTokenRequest),
    DropUserToken(DropUserTokenRequest),
    SetUserTokenAttributes(SetUserTokenAttributesRequest),
    RenameUserToken(RenameUserTokenRequest),
    CheckUserToken(CheckUserTokenRequest),

    // AC
    GrantPermissionsForTable(GrantPermissionsForTableRequest),
    RevokePermissionsForTable(RevokePermissionsForTableRequest),

    // REST
    RestGetDatabases,
    RestGetTables(GetTablesRestRequest),
    RestGetAllRows(GetAllRowsRestRequest),
    RestGetSingleRow(GetSingleRowRestRequest),
    RestPostRows(PostRowsRestRequest),
    RestPatchRow(PatchRowRestRequest),
    RestDeleteRow(DeleteRowRestRequest),
    RestSqlQuery(SqlQueryRestRequest),
}

#[derive(Debug, Clone)]
pub struct SourceTable {
    pub name: String,
    pub alias: String,
}

impl SourceTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: String::new(),
        }
    }

    pub fn with_alias(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultExpression {
    pub expression: Expression,
    pub alias: String,
}

impl ResultExpression {
    pub fn new(expression: Expression) -> Self {
        Self {
            expression,
            alias: String::new(),
        }
    }

    pub fn with_alias(expression: Expression, alias: impl Into<String>) -> Self {
        Self {
            expression,
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    /// 空串表示使用当前数据库
    pub database: String,
    pub tables: Vec<SourceTable>,
    pub result_expressions: Vec<ResultExpression>,
    pub where_expr: Option<Expression>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct ShowPermissionsRequest {
    pub user: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DescribeTableRequest {
    pub database: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub database: String,
    pub table: String,
    /// 空表示按表列位置顺序
    pub columns: Vec<String>,
    /// 每行与columns对齐
    pub rows: Vec<Vec<Variant>>,
}

#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub database: String,
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expression>,
    pub where_expr: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub database: String,
    pub table: String,
    pub where_expr: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct CreateDatabaseRequest {
    pub database: String,
    pub cipher_id: Option<String>,
    pub cipher_key_seed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DropDatabaseRequest {
    pub database: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct UseDatabaseRequest {
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct AttachDatabaseRequest {
    pub database: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct DetachDatabaseRequest {
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct ColumnConstraintDefinition {
    pub name: Option<String>,
    pub spec: ColumnConstraintSpec,
}

#[derive(Debug, Clone)]
pub enum ColumnConstraintSpec {
    NotNull,
    DefaultValue(Variant),
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: VariantType,
    pub constraints: Vec<ColumnConstraintDefinition>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: VariantType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.constraints.push(ColumnConstraintDefinition {
            name: None,
            spec: ColumnConstraintSpec::NotNull,
        });
        self
    }

    pub fn with_default(mut self, value: Variant) -> Self {
        self.constraints.push(ColumnConstraintDefinition {
            name: None,
            spec: ColumnConstraintSpec::DefaultValue(value),
        });
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone)]
pub struct DropTableRequest {
    pub database: String,
    pub table: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct RenameTableRequest {
    pub database: String,
    pub table: String,
    pub new_name: String,
}

#[derive(Debug, Clone)]
pub struct SetTableAttributesRequest {
    pub database: String,
    pub table: String,
    pub next_trid: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AddColumnRequest {
    pub database: String,
    pub table: String,
    pub column: ColumnDefinition,
}

#[derive(Debug, Clone)]
pub struct DropColumnRequest {
    pub database: String,
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct RenameColumnRequest {
    pub database: String,
    pub table: String,
    pub column: String,
    pub new_name: String,
}

#[derive(Debug, Clone)]
pub struct RedefineColumnRequest {
    pub database: String,
    pub table: String,
    pub column: ColumnDefinition,
}

#[derive(Debug, Clone)]
pub struct CreateIndexRequest {
    pub database: String,
    pub table: String,
    pub index: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone)]
pub struct DropIndexRequest {
    pub database: String,
    pub index: String,
    pub if_exists: bool,
}

#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub name: String,
    pub real_name: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct DropUserRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SetUserAttributesRequest {
    pub name: String,
    pub real_name: Option<Option<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AddUserAccessKeyRequest {
    pub user: String,
    pub key_name: String,
    pub text: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct DropUserAccessKeyRequest {
    pub user: String,
    pub key_name: String,
}

#[derive(Debug, Clone)]
pub struct SetUserAccessKeyAttributesRequest {
    pub user: String,
    pub key_name: String,
    pub active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RenameUserAccessKeyRequest {
    pub user: String,
    pub key_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone)]
pub struct AddUserTokenRequest {
    pub user: String,
    pub token_name: String,
    /// None 表示由服务端生成
    pub value: Option<Vec<u8>>,
    pub expiration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DropUserTokenRequest {
    pub user: String,
    pub token_name: String,
}

#[derive(Debug, Clone)]
pub struct SetUserTokenAttributesRequest {
    pub user: String,
    pub token_name: String,
    pub expiration: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct RenameUserTokenRequest {
    pub user: String,
    pub token_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone)]
pub struct CheckUserTokenRequest {
    pub user: String,
    pub token_name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GrantPermissionsForTableRequest {
    pub database: String,
    pub table: String,
    pub user: String,
    pub permissions: PermissionMask,
    pub with_grant_option: bool,
}

#[derive(Debug, Clone)]
pub struct RevokePermissionsForTableRequest {
    pub database: String,
    pub table: String,
    pub user: String,
    pub permissions: PermissionMask,
}

#[derive(Debug, Clone)]
pub struct GetTablesRestRequest {
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct GetAllRowsRestRequest {
    pub database: String,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct GetSingleRowRestRequest {
    pub database: String,
    pub table: String,
    pub trid: u64,
}

#[derive(Debug, Clone)]
pub struct PostRowsRestRequest {
    pub database: String,
    pub table: String,
    /// 每行为（列名，值）对列表
    pub rows: Vec<Vec<(String, Variant)>>,
}

#[derive(Debug, Clone)]
pub struct PatchRowRestRequest {
    pub database: String,
    pub table: String,
    pub trid: u64,
    pub columns: Vec<String>,
    pub values: Vec<Variant>,
}

#[derive(Debug, Clone)]
pub struct DeleteRowRestRequest {
    pub database: String,
    pub table: String,
    pub trid: u64,
}

#[derive(Debug, Clone)]
pub struct SqlQueryRestRequest {
    pub query: SelectRequest,
}
