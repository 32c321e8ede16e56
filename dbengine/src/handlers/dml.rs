use tracing::debug;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::OutputStream;
use common::utils::BitMask;

use crate::handlers::rowset_writer::{BinaryRowsetWriter, RowsetWriter};
use crate::handlers::RequestHandler;
use crate::protocol::DatabaseEngineResponse;
use crate::requests::{DeleteRequest, InsertRequest, UpdateRequest};
use crate::storage::data_set::DataSet;
use crate::storage::user::PermissionMask;
use crate::storage::{DbExpressionEvaluationContext, Table, TableDataSet};
use crate::variant::{Variant, VariantType};

impl<O: OutputStream> RequestHandler<O> {
    /// INSERT：单事务id下逐行写入，回传生成的TRID行集。
    pub(crate) fn execute_insert_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: InsertRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::INSERT,
        )?;

        let column_positions = resolve_insert_positions(&table, &request.columns)?;
        let column_count = table.column_count();

        // 整个请求共享一个事务id；每行独立可见
        let tp = database.transaction_parameters(self.current_user_id);
        let mut trids = Vec::with_capacity(request.rows.len());
        for row in request.rows {
            if row.len() != column_positions.len() {
                return Err(DbError::new(
                    ErrorCode::InvalidValueCount,
                    format!(
                        "row carries {} values for {} columns",
                        row.len(),
                        column_positions.len()
                    ),
                ));
            }
            let mut values: Vec<Option<Variant>> = vec![None; column_count];
            for (value, position) in row.into_iter().zip(&column_positions) {
                values[*position] = Some(value);
            }
            trids.push(table.insert_row(values, tp)?);
        }
        debug!(
            "insert into {}.{}: {} rows",
            database_name,
            table.name(),
            trids.len()
        );

        response.set_affected_row_count(trids.len() as u64);
        response.add_column("TRID", VariantType::UInt64, false);
        let mut writer = BinaryRowsetWriter::new(&mut self.connection);
        writer.begin_rowset(response, !trids.is_empty())?;
        let null_mask = BitMask::new(0);
        for trid in trids {
            writer.write_row(&[Variant::UInt64(trid)], &null_mask)?;
        }
        writer.end_rowset()
    }

    /// UPDATE：WHERE命中的行仅重写受影响列。
    pub(crate) fn execute_update_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        mut request: UpdateRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::UPDATE,
        )?;

        if request.columns.is_empty() || request.columns.len() != request.values.len() {
            return Err(DbError::new(
                ErrorCode::InvalidValueCount,
                "SET column and value counts do not match",
            ));
        }
        let mut positions = Vec::with_capacity(request.columns.len());
        for name in &request.columns {
            let position = table.find_column_position(name).ok_or_else(|| {
                DbError::new(
                    ErrorCode::ColumnDoesNotExist,
                    format!("column {}.{} does not exist", table.name(), name),
                )
            })?;
            if position == 0 {
                return Err(DbError::new(
                    ErrorCode::CannotModifySystemTable,
                    "the master column cannot be updated",
                ));
            }
            positions.push(position);
        }

        let mut ctx =
            DbExpressionEvaluationContext::new(vec![TableDataSet::new(table, String::new())]);
        if let Some(where_expr) = request.where_expr.as_mut() {
            where_expr.validate(&mut ctx)?;
        }
        for value in request.values.iter_mut() {
            value.validate(&mut ctx)?;
        }
        ctx.data_sets_mut()[0].reset_cursor()?;

        let tp = database.transaction_parameters(self.current_user_id);
        let mut affected = 0u64;
        while ctx.data_sets()[0].has_current_row() {
            if row_matches(&mut ctx, request.where_expr.as_ref())? {
                let mut new_values = Vec::with_capacity(request.values.len());
                for value in &request.values {
                    new_values.push(value.evaluate(&mut ctx)?);
                }
                ctx.data_sets_mut()[0].update_current_row(new_values, &positions, tp)?;
                affected += 1;
            }
            ctx.data_sets_mut()[0].move_to_next_row()?;
        }

        response.set_affected_row_count(affected);
        self.write_response(response)
    }

    /// DELETE：WHERE命中的行打墓碑。
    pub(crate) fn execute_delete_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        mut request: DeleteRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();
        let table = database.find_table(&request.table)?;
        reject_system_table(&table)?;
        self.instance.check_table_permission(
            self.current_user_id,
            database.id(),
            table.id(),
            PermissionMask::DELETE,
        )?;

        let mut ctx =
            DbExpressionEvaluationContext::new(vec![TableDataSet::new(table, String::new())]);
        if let Some(where_expr) = request.where_expr.as_mut() {
            where_expr.validate(&mut ctx)?;
        }
        ctx.data_sets_mut()[0].reset_cursor()?;

        let tp = database.transaction_parameters(self.current_user_id);
        let mut affected = 0u64;
        while ctx.data_sets()[0].has_current_row() {
            if row_matches(&mut ctx, request.where_expr.as_ref())? {
                ctx.data_sets_mut()[0].delete_current_row(tp)?;
                affected += 1;
            }
            ctx.data_sets_mut()[0].move_to_next_row()?;
        }

        response.set_affected_row_count(affected);
        self.write_response(response)
    }
}

fn reject_system_table(table: &std::sync::Arc<Table>) -> CResult<()> {
    if table.is_system() {
        return Err(DbError::new(
            ErrorCode::CannotModifySystemTable,
            format!(
                "system table {}.{} cannot be modified",
                table.database_name(),
                table.name()
            ),
        ));
    }
    Ok(())
}

/// 列名列表映射为位置；空列表退化为位置序（跳过主列）。
fn resolve_insert_positions(
    table: &std::sync::Arc<Table>,
    columns: &[String],
) -> CResult<Vec<usize>> {
    if columns.is_empty() {
        return Ok((1..table.column_count()).collect());
    }
    let mut positions = Vec::with_capacity(columns.len());
    for name in columns {
        let position = table.find_column_position(name).ok_or_else(|| {
            DbError::new(
                ErrorCode::ColumnDoesNotExist,
                format!("column {}.{} does not exist", table.name(), name),
            )
        })?;
        if position == 0 {
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                "the master column cannot be inserted explicitly",
            ));
        }
        if positions.contains(&position) {
            return Err(DbError::new(
                ErrorCode::DuplicateColumnName,
                format!("column {} is listed twice", name),
            ));
        }
        positions.push(position);
    }
    Ok(positions)
}

fn row_matches(
    ctx: &mut DbExpressionEvaluationContext,
    where_expr: Option<&crate::expr::Expression>,
) -> CResult<bool> {
    let where_expr = match where_expr {
        None => return Ok(true),
        Some(expression) => expression,
    };
    match where_expr.evaluate(ctx)? {
        Variant::Bool(v) => Ok(v),
        Variant::Null => Ok(false),
        other => Err(DbError::new(
            ErrorCode::InvalidWhereCondition,
            format!("WHERE yields {:?}, boolean expected", other.value_type()),
        )),
    }
}
