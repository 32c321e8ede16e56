use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{BufferedChunkedOutputStream, IoBase, JsonWriter, OutputStream};

use crate::expr::{AllColumnsExpression, Expression};
use crate::handlers::json_output::{
    write_get_json_prolog, write_json_epilog, write_modification_json_prolog,
};
use crate::handlers::rowset_writer::http_status;
use crate::handlers::variant_output::write_variant_json;
use crate::handlers::RequestHandler;
use crate::protocol::{DatabaseEngineResponse, JSON_CHUNK_SIZE};
use crate::requests::{
    DeleteRowRestRequest, GetAllRowsRestRequest, GetSingleRowRestRequest, GetTablesRestRequest,
    PatchRowRestRequest, PostRowsRestRequest, ResultExpression, SelectRequest, SourceTable,
};
use crate::storage::user::PermissionMask;
use crate::variant::Variant;

impl<O: OutputStream> RequestHandler<O> {
    /// GET /databases -> `{"status":200,"rows":[{"name":...},...]}`
    pub(crate) fn execute_rest_get_databases_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
    ) -> CResult<()> {
        let records = self.instance.database_records_ordered_by_name();
        response.rest_status_code = http_status::OK;
        self.write_response(response)?;

        let mut chunked = BufferedChunkedOutputStream::new(JSON_CHUNK_SIZE, &mut self.connection);
        {
            let mut json = JsonWriter::new(&mut chunked);
            write_get_json_prolog(http_status::OK, &mut json)?;
            let mut need_comma = false;
            for record in &records {
                if need_comma {
                    json.write_comma()?;
                } else {
                    need_comma = true;
                }
                json.write_object_begin()?;
                json.write_field_name("name")?;
                json.write_string_value(&record.name)?;
                json.write_object_end()?;
            }
            write_json_epilog(&mut json)?;
        }
        chunked.close()
    }

    /// GET /databases/{db}/tables（不含系统表）
    pub(crate) fn execute_rest_get_tables_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: GetTablesRestRequest,
    ) -> CResult<()> {
        response.rest_status_code = http_status::BAD_REQUEST;
        let database_guard = self.use_database(&request.database)?;
        let mut names: Vec<String> = database_guard
            .table_records_ordered_by_name()
            .into_iter()
            .filter(|record| !record.is_system)
            .map(|record| record.name)
            .collect();
        names.sort();
        drop(database_guard);

        response.rest_status_code = http_status::OK;
        self.write_response(response)?;

        let mut chunked = BufferedChunkedOutputStream::new(JSON_CHUNK_SIZE, &mut self.connection);
        {
            let mut json = JsonWriter::new(&mut chunked);
            write_get_json_prolog(http_status::OK, &mut json)?;
            let mut need_comma = false;
            for name in &names {
                if need_comma {
                    json.write_comma()?;
                } else {
                    need_comma = true;
                }
                json.write_object_begin()?;
                json.write_field_name("name")?;
                json.write_string_value(name)?;
                json.write_object_end()?;
            }
            write_json_epilog(&mut json)?;
        }
        chunked.close()
    }

    /// GET /databases/{db}/tables/{t}/rows：退化为`SELECT *`走REST行集。
    pub(crate) fn execute_rest_get_all_rows_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: GetAllRowsRestRequest,
    ) -> CResult<()> {
        let select = SelectRequest {
            database: request.database,
            tables: vec![SourceTable::new(request.table)],
            result_expressions: vec![ResultExpression::new(Expression::AllColumns(
                AllColumnsExpression::new(""),
            ))],
            where_expr: None,
            limit: None,
            offset: None,
        };
        self.execute_select_request(response, select, true)
    }

    /// GET /databases/{db}/tables/{t}/rows/{trid}
    pub(crate) fn execute_rest_get_single_row_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: GetSingleRowRestRequest,
    ) -> CResult<()> {
        response.rest_status_code = http_status::BAD_REQUEST;
        let database_guard = self.use_database(&request.database)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::SELECT,
        )?;

        let row = table.read_row(request.trid)?;
        let field_names: Vec<String> = table
            .column_infos()
            .iter()
            .map(|info| info.name.clone())
            .collect();
        drop(database_guard);

        let status = if row.is_some() {
            http_status::OK
        } else {
            http_status::NOT_FOUND
        };
        response.rest_status_code = status;
        self.write_response(response)?;

        let mut chunked = BufferedChunkedOutputStream::new(JSON_CHUNK_SIZE, &mut self.connection);
        {
            let mut json = JsonWriter::new(&mut chunked);
            write_get_json_prolog(status, &mut json)?;
            if let Some(values) = row {
                json.write_object_begin()?;
                let mut need_comma = false;
                for (name, value) in field_names.iter().zip(&values) {
                    if need_comma {
                        json.write_comma()?;
                    } else {
                        need_comma = true;
                    }
                    json.write_field_name(name)?;
                    write_variant_json(value, &mut json)?;
                }
                json.write_object_end()?;
            }
            write_json_epilog(&mut json)?;
        }
        chunked.close()
    }

    /// POST /databases/{db}/tables/{t}/rows
    pub(crate) fn execute_rest_post_rows_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: PostRowsRestRequest,
    ) -> CResult<()> {
        response.rest_status_code = http_status::BAD_REQUEST;
        let database_guard = self.use_database(&request.database)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        if table.is_system() {
            response.rest_status_code = http_status::FORBIDDEN;
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                format!("system table {} cannot be modified", table.name()),
            ));
        }
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::INSERT,
        )?;

        let column_count = table.column_count();
        let tp = database.transaction_parameters(self.current_user_id);
        let mut trids = Vec::with_capacity(request.rows.len());
        for row in request.rows {
            let mut values: Vec<Option<Variant>> = vec![None; column_count];
            for (name, value) in row {
                let position = table.find_column_position(&name).ok_or_else(|| {
                    DbError::new(
                        ErrorCode::ColumnDoesNotExist,
                        format!("column {}.{} does not exist", table.name(), name),
                    )
                })?;
                if position == 0 {
                    return Err(DbError::new(
                        ErrorCode::CannotModifySystemTable,
                        "the master column cannot be set",
                    ));
                }
                values[position] = Some(value);
            }
            trids.push(table.insert_row(values, tp)?);
        }
        drop(database_guard);

        response.set_affected_row_count(trids.len() as u64);
        response.rest_status_code = http_status::CREATED;
        self.write_response(response)?;
        self.write_rest_modification_payload(http_status::CREATED, &trids)
    }

    /// PATCH /databases/{db}/tables/{t}/rows/{trid}
    pub(crate) fn execute_rest_patch_row_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: PatchRowRestRequest,
    ) -> CResult<()> {
        response.set_affected_row_count(0);
        response.rest_status_code = http_status::NOT_FOUND;

        let database_guard = self.use_database(&request.database)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        if table.is_system() {
            response.rest_status_code = http_status::FORBIDDEN;
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                format!("system table {} cannot be updated", table.name()),
            ));
        }
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::UPDATE,
        )?;
        if request.columns.len() != request.values.len() {
            response.rest_status_code = http_status::BAD_REQUEST;
            return Err(DbError::new(
                ErrorCode::InvalidValueCount,
                "column and value counts do not match",
            ));
        }

        let mut updates = Vec::with_capacity(request.columns.len());
        for (name, value) in request.columns.iter().zip(request.values) {
            let position = table.find_column_position(name).ok_or_else(|| {
                DbError::new(
                    ErrorCode::ColumnDoesNotExist,
                    format!("column {}.{} does not exist", table.name(), name),
                )
            })?;
            if position == 0 {
                response.rest_status_code = http_status::BAD_REQUEST;
                return Err(DbError::new(
                    ErrorCode::CannotModifySystemTable,
                    "the master column cannot be updated",
                ));
            }
            updates.push((position, value));
        }

        let tp = database.transaction_parameters(self.current_user_id);
        let updated = table.update_row(request.trid, updates, tp)?;
        drop(database_guard);

        let status = if updated {
            response.set_affected_row_count(1);
            http_status::OK
        } else {
            http_status::NOT_FOUND
        };
        response.rest_status_code = status;
        self.write_response(response)?;
        let trids: &[u64] = if updated { &[request.trid] } else { &[] };
        self.write_rest_modification_payload(status, trids)
    }

    /// DELETE /databases/{db}/tables/{t}/rows/{trid}
    pub(crate) fn execute_rest_delete_row_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DeleteRowRestRequest,
    ) -> CResult<()> {
        response.set_affected_row_count(0);
        response.rest_status_code = http_status::NOT_FOUND;

        let database_guard = self.use_database(&request.database)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        if table.is_system() {
            response.rest_status_code = http_status::FORBIDDEN;
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                format!("system table {} cannot be modified", table.name()),
            ));
        }
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::DELETE,
        )?;

        let tp = database.transaction_parameters(self.current_user_id);
        let deleted = table.delete_row(request.trid, tp)?;
        drop(database_guard);

        let status = if deleted {
            response.set_affected_row_count(1);
            http_status::OK
        } else {
            http_status::NOT_FOUND
        };
        response.rest_status_code = status;
        self.write_response(response)?;
        let trids: &[u64] = if deleted { &[request.trid] } else { &[] };
        self.write_rest_modification_payload(status, trids)
    }

    fn write_rest_modification_payload(&mut self, status: u32, trids: &[u64]) -> CResult<()> {
        let mut chunked = BufferedChunkedOutputStream::new(JSON_CHUNK_SIZE, &mut self.connection);
        {
            let mut json = JsonWriter::new(&mut chunked);
            write_modification_json_prolog(status, trids.len() as u64, &mut json)?;
            let mut need_comma = false;
            for trid in trids {
                if need_comma {
                    json.write_comma()?;
                } else {
                    need_comma = true;
                }
                json.write_u64_value(*trid)?;
            }
            write_json_epilog(&mut json)?;
        }
        chunked.close()
    }
}
