use std::sync::Arc;

use tracing::{debug, error};

use common::err::db_error::{DbError, ErrorRecord};
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::OutputStream;

use crate::protocol::{write_message, DatabaseEngineResponse, ProtocolMessageType};
use crate::requests::DbEngineRequest;
use crate::storage::database::SYSTEM_DATABASE_NAME;
use crate::storage::{Instance, UseDatabaseGuard};

pub mod ac;
pub mod ddl;
pub mod dml;
pub mod dql;
pub mod json_output;
pub mod rest;
pub mod rowset_writer;
pub mod tc;
pub mod um;
pub mod variant_output;

/// 请求处理器。
///
/// 每个客户端连接一个处理器，运行在独立线程上；持有实例、输出流、
/// 当前用户id与可变的当前数据库名。
pub struct RequestHandler<O: OutputStream> {
    instance: Arc<Instance>,
    connection: O,
    current_user_id: u32,
    current_database: String,
}

impl<O: OutputStream> RequestHandler<O> {
    pub fn new(instance: Arc<Instance>, connection: O, current_user_id: u32) -> Self {
        Self {
            instance,
            connection,
            current_user_id,
            current_database: SYSTEM_DATABASE_NAME.to_string(),
        }
    }

    pub fn current_database(&self) -> &str {
        &self.current_database
    }

    pub fn connection_mut(&mut self) -> &mut O {
        &mut self.connection
    }

    pub fn into_connection(self) -> O {
        self.connection
    }

    /// 请求入口。`response_id`/`response_count` 标识单请求多响应流中的帧。
    pub fn execute_request(
        &mut self,
        request: DbEngineRequest,
        request_id: u64,
        response_id: u32,
        response_count: u32,
    ) -> CResult<()> {
        let mut response = DatabaseEngineResponse::new(request_id, response_id, response_count);
        debug!("executing request #{}", request_id);
        match self.dispatch(&mut response, request) {
            Ok(()) => Ok(()),
            Err(e) => self.write_error_response(response, e),
        }
    }

    fn dispatch(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DbEngineRequest,
    ) -> CResult<()> {
        match request {
            // DQL
            DbEngineRequest::Select(request) => {
                self.execute_select_request(response, request, false)
            }
            DbEngineRequest::ShowDatabases => self.execute_show_databases_request(response),
            DbEngineRequest::ShowTables => self.execute_show_tables_request(response),
            DbEngineRequest::ShowPermissions(request) => {
                self.execute_show_permissions_request(response, request)
            }
            DbEngineRequest::DescribeTable(request) => {
                self.execute_describe_table_request(response, request)
            }

            // DML
            DbEngineRequest::Insert(request) => self.execute_insert_request(response, request),
            DbEngineRequest::Update(request) => self.execute_update_request(response, request),
            DbEngineRequest::Delete(request) => self.execute_delete_request(response, request),

            // DDL
            DbEngineRequest::CreateDatabase(request) => {
                self.execute_create_database_request(response, request)
            }
            DbEngineRequest::DropDatabase(request) => {
                self.execute_drop_database_request(response, request)
            }
            DbEngineRequest::UseDatabase(request) => {
                self.execute_use_database_request(response, request)
            }
            DbEngineRequest::AttachDatabase(request) => {
                self.execute_attach_database_request(response, request)
            }
            DbEngineRequest::DetachDatabase(request) => {
                self.execute_detach_database_request(response, request)
            }
            DbEngineRequest::CreateTable(request) => {
                self.execute_create_table_request(response, request)
            }
            DbEngineRequest::DropTable(request) => {
                self.execute_drop_table_request(response, request)
            }
            DbEngineRequest::RenameTable(request) => {
                self.execute_rename_table_request(response, request)
            }
            DbEngineRequest::SetTableAttributes(request) => {
                self.execute_set_table_attributes_request(response, request)
            }
            DbEngineRequest::AddColumn(request) => {
                self.execute_add_column_request(response, request)
            }
            DbEngineRequest::DropColumn(request) => {
                self.execute_drop_column_request(response, request)
            }
            DbEngineRequest::RenameColumn(request) => {
                self.execute_rename_column_request(response, request)
            }
            DbEngineRequest::RedefineColumn(request) => {
                self.execute_redefine_column_request(response, request)
            }
            DbEngineRequest::CreateIndex(request) => {
                self.execute_create_index_request(response, request)
            }
            DbEngineRequest::DropIndex(request) => {
                self.execute_drop_index_request(response, request)
            }

            // TCL
            DbEngineRequest::BeginTransaction
            | DbEngineRequest::CommitTransaction
            | DbEngineRequest::RollbackTransaction
            | DbEngineRequest::Savepoint
            | DbEngineRequest::Release => self.execute_transaction_control_request(response),

            // UM
            DbEngineRequest::CreateUser(request) => {
                self.execute_create_user_request(response, request)
            }
            DbEngineRequest::DropUser(request) => self.execute_drop_user_request(response, request),
            DbEngineRequest::SetUserAttributes(request) => {
                self.execute_set_user_attributes_request(response, request)
            }
            DbEngineRequest::AddUserAccessKey(request) => {
                self.execute_add_user_access_key_request(response, request)
            }
            DbEngineRequest::DropUserAccessKey(request) => {
                self.execute_drop_user_access_key_request(response, request)
            }
            DbEngineRequest::SetUserAccessKeyAttributes(request) => {
                self.execute_set_user_access_key_attributes_request(response, request)
            }
            DbEngineRequest::RenameUserAccessKey(request) => {
                self.execute_rename_user_access_key_request(response, request)
            }
            DbEngineRequest::AddUserToken(request) => {
                self.execute_add_user_token_request(response, request)
            }
            DbEngineRequest::DropUserToken(request) => {
                self.execute_drop_user_token_request(response, request)
            }
            DbEngineRequest::SetUserTokenAttributes(request) => {
                self.execute_set_user_token_attributes_request(response, request)
            }
            DbEngineRequest::RenameUserToken(request) => {
                self.execute_rename_user_token_request(response, request)
            }
            DbEngineRequest::CheckUserToken(request) => {
                self.execute_check_user_token_request(response, request)
            }

            // AC
            DbEngineRequest::GrantPermissionsForTable(request) => {
                self.execute_grant_permissions_for_table_request(response, request)
            }
            DbEngineRequest::RevokePermissionsForTable(request) => {
                self.execute_revoke_permissions_for_table_request(response, request)
            }

            // REST
            DbEngineRequest::RestGetDatabases => self.execute_rest_get_databases_request(response),
            DbEngineRequest::RestGetTables(request) => {
                self.execute_rest_get_tables_request(response, request)
            }
            DbEngineRequest::RestGetAllRows(request) => {
                self.execute_rest_get_all_rows_request(response, request)
            }
            DbEngineRequest::RestGetSingleRow(request) => {
                self.execute_rest_get_single_row_request(response, request)
            }
            DbEngineRequest::RestPostRows(request) => {
                self.execute_rest_post_rows_request(response, request)
            }
            DbEngineRequest::RestPatchRow(request) => {
                self.execute_rest_patch_row_request(response, request)
            }
            DbEngineRequest::RestDeleteRow(request) => {
                self.execute_rest_delete_row_request(response, request)
            }
            DbEngineRequest::RestSqlQuery(request) => {
                self.execute_select_request(response, request.query, true)
            }
        }
    }

    /// 错误进响应头（行流尚未开始的路径）。连接保持可用。
    fn write_error_response(
        &mut self,
        mut response: DatabaseEngineResponse,
        error: DbError,
    ) -> CResult<()> {
        if error.is_internal_error() || error.is_io_error() {
            error!("request #{} failed: {}", response.request_id, error);
        } else {
            debug!("request #{} rejected: {}", response.request_id, error);
        }
        response.column_description.clear();
        response.has_affected_row_count = false;
        response.affected_row_count = 0;
        for record in error.records() {
            response.add_message(&record);
        }
        response.rest_status_code = rest_status_for(&error);
        write_message(
            ProtocolMessageType::DatabaseEngineResponse,
            &response,
            &mut self.connection,
        )
    }

    /// 无行集响应。
    pub(crate) fn write_response(&mut self, response: &DatabaseEngineResponse) -> CResult<()> {
        write_message(
            ProtocolMessageType::DatabaseEngineResponse,
            response,
            &mut self.connection,
        )
    }

    pub(crate) fn send_status_message(
        &mut self,
        response: &mut DatabaseEngineResponse,
        code: ErrorCode,
        text: impl Into<String>,
    ) -> CResult<()> {
        response.add_message(&ErrorRecord::new(code, text.into()));
        self.write_response(response)
    }

    /// 当前数据库兜底。
    pub(crate) fn resolve_database_name(&self, requested: &str) -> String {
        if requested.is_empty() {
            self.current_database.clone()
        } else {
            requested.to_string()
        }
    }

    pub(crate) fn use_database(&self, name: &str) -> CResult<UseDatabaseGuard> {
        let database = self.instance.find_database(name)?;
        Ok(UseDatabaseGuard::new(database))
    }
}

fn rest_status_for(error: &DbError) -> u32 {
    use crate::handlers::rowset_writer::http_status;
    match error.code() {
        ErrorCode::PermissionDenied | ErrorCode::CannotModifySystemTable => {
            http_status::FORBIDDEN
        }
        ErrorCode::DatabaseDoesNotExist
        | ErrorCode::TableDoesNotExist
        | ErrorCode::RowDoesNotExist
        | ErrorCode::UserDoesNotExist => http_status::NOT_FOUND,
        code if code.is_user_visible() => http_status::BAD_REQUEST,
        _ => http_status::INTERNAL_SERVER_ERROR,
    }
}
