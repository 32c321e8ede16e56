use tracing::info;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::OutputStream;

use crate::handlers::RequestHandler;
use crate::protocol::DatabaseEngineResponse;
use crate::requests::{
    AddColumnRequest, AttachDatabaseRequest, ColumnConstraintSpec, ColumnDefinition,
    CreateDatabaseRequest, CreateIndexRequest, CreateTableRequest, DetachDatabaseRequest,
    DropColumnRequest, DropDatabaseRequest, DropIndexRequest, DropTableRequest,
    RedefineColumnRequest, RenameColumnRequest, RenameTableRequest, SetTableAttributesRequest,
    UseDatabaseRequest,
};
use crate::storage::column_set::{ColumnConstraintRecord, ColumnInfo};
use crate::storage::is_valid_database_object_name;
use crate::storage::table::MASTER_COLUMN_NAME;
use crate::storage::user::PermissionMask;
use crate::variant::ops::cast_variant;

impl<O: OutputStream> RequestHandler<O> {
    pub(crate) fn execute_create_database_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: CreateDatabaseRequest,
    ) -> CResult<()> {
        let database = self.instance.create_database(
            &request.database,
            request.cipher_id.as_deref(),
            self.current_user_id,
        )?;
        database.flush()?;
        self.write_response(response)
    }

    pub(crate) fn execute_drop_database_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DropDatabaseRequest,
    ) -> CResult<()> {
        if request.database == self.current_database {
            return Err(DbError::new(
                ErrorCode::CannotDropUsedDatabase,
                format!("database {} is the current database", request.database),
            ));
        }
        match self.instance.drop_database(&request.database, self.current_user_id) {
            Ok(()) => {}
            Err(e)
                if request.if_exists && e.code() == ErrorCode::DatabaseDoesNotExist => {}
            Err(e) => return Err(e),
        }
        self.write_response(response)
    }

    pub(crate) fn execute_use_database_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: UseDatabaseRequest,
    ) -> CResult<()> {
        // 校验存在性后切换当前库
        let database = self.instance.find_database(&request.database)?;
        self.current_database = database.name().to_string();
        self.write_response(response)
    }

    pub(crate) fn execute_attach_database_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: AttachDatabaseRequest,
    ) -> CResult<()> {
        self.instance
            .attach_database(&request.database, &request.path, self.current_user_id)?;
        self.write_response(response)
    }

    pub(crate) fn execute_detach_database_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DetachDatabaseRequest,
    ) -> CResult<()> {
        if request.database == self.current_database {
            return Err(DbError::new(
                ErrorCode::CannotDropUsedDatabase,
                format!("database {} is the current database", request.database),
            ));
        }
        self.instance
            .detach_database(&request.database, self.current_user_id)?;
        self.write_response(response)
    }

    pub(crate) fn execute_create_table_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: CreateTableRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        self.instance.check_database_permission(
            self.current_user_id,
            database.id(),
            PermissionMask::CREATE,
        )?;

        if !is_valid_database_object_name(&request.table) {
            return Err(DbError::new(
                ErrorCode::InvalidTableName,
                format!("invalid table name '{}'", request.table),
            ));
        }
        let mut user_columns = Vec::with_capacity(request.columns.len());
        for definition in request.columns {
            user_columns.push(column_info_from_definition(&request.table, definition)?);
        }

        let table =
            database.create_table(&request.table, user_columns, self.instance.options().max_tables_per_database)?;
        table.flush()?;
        info!("created table {}.{}", database_name, request.table);
        self.write_response(response)
    }

    pub(crate) fn execute_drop_table_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DropTableRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();

        if let Some(record) = database.find_table_record(&request.table) {
            self.instance.check_table_permission(
                self.current_user_id,
                database.id(),
                record.id,
                PermissionMask::DROP,
            )?;
        }
        match database.drop_table(&request.table, self.current_user_id) {
            Ok(()) => {}
            Err(e) if request.if_exists && e.code() == ErrorCode::TableDoesNotExist => {}
            Err(e) => return Err(e),
        }
        self.write_response(response)
    }

    pub(crate) fn execute_rename_table_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: RenameTableRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        if !is_valid_database_object_name(&request.new_name) {
            return Err(DbError::new(
                ErrorCode::InvalidTableName,
                format!("invalid table name '{}'", request.new_name),
            ));
        }
        self.check_alter_permission(database.id(), &request.table, database)?;
        database.rename_table(&request.table, &request.new_name, self.current_user_id)?;
        self.write_response(response)
    }

    /// ALTER TABLE SET NEXT_TRID（转储回放路径）。
    pub(crate) fn execute_set_table_attributes_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: SetTableAttributesRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::ALTER,
        )?;
        if let Some(next_trid) = request.next_trid {
            table.set_next_trid(next_trid)?;
        }
        self.write_response(response)
    }

    pub(crate) fn execute_add_column_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: AddColumnRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table_ddl(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::ALTER,
        )?;

        let info = column_info_from_definition(&request.table, request.column)?;
        table.add_column(info)?;
        database.register_column_set_metadata(&table)?;
        table.flush()?;
        self.write_response(response)
    }

    pub(crate) fn execute_drop_column_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DropColumnRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table_ddl(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::ALTER,
        )?;

        table.drop_column(&request.column)?;
        database.register_column_set_metadata(&table)?;
        table.flush()?;
        self.write_response(response)
    }

    pub(crate) fn execute_rename_column_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: RenameColumnRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table_ddl(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::ALTER,
        )?;
        if !is_valid_database_object_name(&request.new_name) {
            return Err(DbError::new(
                ErrorCode::InvalidColumnName,
                format!("invalid column name '{}'", request.new_name),
            ));
        }

        table.rename_column(&request.column, &request.new_name)?;
        database.register_column_set_metadata(&table)?;
        table.flush()?;
        self.write_response(response)
    }

    pub(crate) fn execute_redefine_column_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: RedefineColumnRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table_ddl(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::ALTER,
        )?;

        let info = column_info_from_definition(&request.table, request.column)?;
        table.redefine_column(info)?;
        database.register_column_set_metadata(&table)?;
        table.flush()?;
        self.write_response(response)
    }

    /// 二级索引不在核心范围内，主列主索引随表自动维护。
    pub(crate) fn execute_create_index_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        _request: CreateIndexRequest,
    ) -> CResult<()> {
        self.send_status_message(
            response,
            ErrorCode::NotImplemented,
            "CREATE INDEX is not implemented",
        )
    }

    pub(crate) fn execute_drop_index_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        _request: DropIndexRequest,
    ) -> CResult<()> {
        self.send_status_message(
            response,
            ErrorCode::NotImplemented,
            "DROP INDEX is not implemented",
        )
    }

    fn check_alter_permission(
        &self,
        database_id: u32,
        table_name: &str,
        database: &std::sync::Arc<crate::storage::Database>,
    ) -> CResult<()> {
        if let Some(record) = database.find_table_record(table_name) {
            self.instance.check_table_permission(
                self.current_user_id,
                database_id,
                record.id,
                PermissionMask::ALTER,
            )?;
        }
        Ok(())
    }
}

fn reject_system_table_ddl(table: &std::sync::Arc<crate::storage::Table>) -> CResult<()> {
    if table.is_system() {
        return Err(DbError::new(
            ErrorCode::CannotModifySystemTable,
            format!(
                "system table {}.{} cannot be altered",
                table.database_name(),
                table.name()
            ),
        ));
    }
    Ok(())
}

/// 请求里的列定义转列集描述；默认值折叠到列类型。
fn column_info_from_definition(
    table_name: &str,
    definition: ColumnDefinition,
) -> CResult<ColumnInfo> {
    if !is_valid_database_object_name(&definition.name) {
        return Err(DbError::new(
            ErrorCode::InvalidColumnName,
            format!("invalid column name '{}'", definition.name),
        ));
    }
    if definition.name == MASTER_COLUMN_NAME {
        return Err(DbError::new(
            ErrorCode::ColumnAlreadyExists,
            format!("{} is reserved for the master column", MASTER_COLUMN_NAME),
        ));
    }
    let mut info = ColumnInfo::new(0, &definition.name, definition.data_type);
    for (ordinal, constraint) in definition.constraints.into_iter().enumerate() {
        let default_name = |kind: &str| {
            format!("{}_{}_{}_{}", kind, table_name, definition.name, ordinal + 1)
        };
        match constraint.spec {
            ColumnConstraintSpec::NotNull => {
                info.constraints.push(ColumnConstraintRecord::not_null(
                    constraint.name.unwrap_or_else(|| default_name("NN")),
                ));
            }
            ColumnConstraintSpec::DefaultValue(value) => {
                let value = if value.is_null() || value.value_type() == definition.data_type {
                    value
                } else {
                    cast_variant(&value, definition.data_type)?
                };
                info.constraints.push(ColumnConstraintRecord::default_value(
                    constraint.name.unwrap_or_else(|| default_name("DEF")),
                    value,
                ));
            }
        }
    }
    Ok(info)
}
