use std::collections::HashSet;

use tracing::{debug, error};

use common::err::db_error::{DbError, ErrorRecord};
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::OutputStream;
use common::utils::BitMask;

use crate::expr::context::{EmptyExpressionEvaluationContext, ExpressionEvaluationContext};
use crate::expr::Expression;
use crate::handlers::rowset_writer::{BinaryRowsetWriter, RestJsonRowsetWriter, RowsetWriter};
use crate::handlers::RequestHandler;
use crate::protocol::DatabaseEngineResponse;
use crate::requests::{DescribeTableRequest, SelectRequest};
use crate::storage::{is_valid_database_object_name, DbExpressionEvaluationContext, TableDataSet};
use crate::variant::{Variant, VariantType};

/// SELECT结果列的物化计划。
enum PlannedResult {
    /// 展开后的`*`/`t.*`：按位置序绑定的列
    AllColumns {
        table_index: usize,
        bound_indexes: Vec<usize>,
    },
    /// 任意已校验表达式（含单列引用）
    Expression(Expression),
}

/// 嵌套循环游标推进：最右数据集最快，最左为最外层。
fn move_to_next_combined_row(data_sets: &mut [TableDataSet]) -> CResult<bool> {
    use crate::storage::data_set::DataSet;
    let n = data_sets.len();
    for i in (0..n).rev() {
        if data_sets[i].move_to_next_row()? {
            break;
        }
        if i != 0 {
            data_sets[i].reset_cursor()?;
        }
    }
    Ok(data_sets[0].has_current_row())
}

impl<O: OutputStream> RequestHandler<O> {
    /// SELECT执行：校验 -> 模式前导 -> 过滤/偏移/限量的嵌套循环 -> 行集收尾。
    pub(crate) fn execute_select_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        mut request: SelectRequest,
        rest: bool,
    ) -> CResult<()> {
        use crate::storage::data_set::DataSet;

        response.rest_status_code = crate::handlers::rowset_writer::http_status::BAD_REQUEST;

        let database_name = self.resolve_database_name(&request.database);
        if !is_valid_database_object_name(&database_name) {
            return Err(DbError::new(
                ErrorCode::InvalidDatabaseName,
                format!("invalid database name '{}'", database_name),
            ));
        }
        let database_guard = self.use_database(&database_name)?;
        let database = database_guard.database();

        let mut errors: Vec<ErrorRecord> = Vec::new();
        if request.tables.is_empty() {
            errors.push(ErrorRecord::new(
                ErrorCode::SelectWithoutTables,
                "SELECT requires at least one table",
            ));
        }
        for table in &request.tables {
            if !is_valid_database_object_name(&table.name) {
                errors.push(ErrorRecord::new(
                    ErrorCode::InvalidTableName,
                    format!("invalid table name '{}'", table.name),
                ));
            }
            if !table.alias.is_empty() && !is_valid_database_object_name(&table.alias) {
                errors.push(ErrorRecord::new(
                    ErrorCode::InvalidTableAlias,
                    format!("invalid table alias '{}'", table.alias),
                ));
            }
        }
        if !errors.is_empty() {
            return Err(DbError::compound(errors));
        }

        let mut data_sets = Vec::with_capacity(request.tables.len());
        for source in &request.tables {
            let table = database.find_table(&source.name)?;
            self.instance.check_table_permission(
                self.current_user_id,
                database.id(),
                table.id(),
                crate::storage::user::PermissionMask::SELECT,
            )?;
            data_sets.push(TableDataSet::new(table, source.alias.clone()));
        }
        let mut ctx = DbExpressionEvaluationContext::new(data_sets);
        debug!(
            "select: {} data sets to read from",
            ctx.data_set_count()
        );

        // 各数据集的列描述（位置序）
        let table_column_infos: Vec<_> = ctx
            .data_sets()
            .iter()
            .map(|ds| ds.table().column_infos())
            .collect();

        let mut known_aliases: HashSet<String> = HashSet::new();
        let mut plan: Vec<PlannedResult> = Vec::new();
        let mut column_to_send_count = 0usize;
        let mut has_nullable_columns = false;

        for result in std::mem::take(&mut request.result_expressions) {
            match result.expression {
                Expression::AllColumns(all) => {
                    if !result.alias.is_empty() {
                        errors.push(ErrorRecord::new(
                            ErrorCode::CannotUseAllColumnsAlias,
                            format!("alias {} cannot apply to '*'", result.alias),
                        ));
                        continue;
                    }
                    let table_index = if all.table_name.is_empty() {
                        0
                    } else {
                        match ctx.data_set_index(&all.table_name) {
                            Some(index) => index,
                            None => {
                                errors.push(ErrorRecord::new(
                                    ErrorCode::TableDoesNotExistInContext,
                                    format!(
                                        "table {}.{} is not in the request",
                                        database_name, all.table_name
                                    ),
                                ));
                                continue;
                            }
                        }
                    };
                    let mut bound_indexes = Vec::new();
                    for (position, info) in table_column_infos[table_index].iter().enumerate() {
                        response.add_column(
                            info.name.clone(),
                            info.data_type,
                            !info.is_not_null(),
                        );
                        has_nullable_columns |= !info.is_not_null();
                        let index = ctx.data_sets_mut()[table_index].emplace_column_info(
                            position,
                            &info.name,
                            "",
                        );
                        bound_indexes.push(index);
                        column_to_send_count += 1;
                    }
                    plan.push(PlannedResult::AllColumns {
                        table_index,
                        bound_indexes,
                    });
                }
                Expression::SingleColumn(mut column) => {
                    if !is_valid_database_object_name(&column.column_name) {
                        errors.push(ErrorRecord::new(
                            ErrorCode::InvalidColumnName,
                            format!("invalid column name '{}'", column.column_name),
                        ));
                        continue;
                    }
                    if column.table_name.is_empty()
                        && !known_aliases.insert(column.column_name.clone())
                    {
                        errors.push(ErrorRecord::new(
                            ErrorCode::DuplicateColumnName,
                            format!("duplicate column name '{}'", column.column_name),
                        ));
                    }
                    if !result.alias.is_empty() {
                        if !is_valid_database_object_name(&result.alias) {
                            errors.push(ErrorRecord::new(
                                ErrorCode::InvalidColumnAlias,
                                format!("invalid column alias '{}'", result.alias),
                            ));
                        }
                        if !known_aliases.insert(result.alias.clone()) {
                            errors.push(ErrorRecord::new(
                                ErrorCode::DuplicateColumnAlias,
                                format!("duplicate column alias '{}'", result.alias),
                            ));
                        }
                    }
                    let table_index = if column.table_name.is_empty() {
                        0
                    } else {
                        match ctx.data_set_index(&column.table_name) {
                            Some(index) => index,
                            None => {
                                errors.push(ErrorRecord::new(
                                    ErrorCode::TableDoesNotExistInContext,
                                    format!(
                                        "table {}.{} is not in the request",
                                        database_name, column.table_name
                                    ),
                                ));
                                continue;
                            }
                        }
                    };
                    let info = match table_column_infos[table_index]
                        .iter()
                        .find(|info| info.name == column.column_name)
                    {
                        Some(info) => info,
                        None => {
                            errors.push(ErrorRecord::new(
                                ErrorCode::ColumnDoesNotExist,
                                format!(
                                    "column {} does not exist in table {}",
                                    column.column_name,
                                    ctx.data_sets()[table_index].table().name()
                                ),
                            ));
                            continue;
                        }
                    };
                    let display_name = if result.alias.is_empty() {
                        info.name.clone()
                    } else {
                        result.alias.clone()
                    };
                    response.add_column(display_name, info.data_type, !info.is_not_null());
                    has_nullable_columns |= !info.is_not_null();

                    let (column_index, _) = ctx.bind_column(table_index, &column.column_name)?;
                    column.dataset_table_index = Some(table_index);
                    column.dataset_column_index = Some(column_index);
                    plan.push(PlannedResult::Expression(Expression::SingleColumn(column)));
                    column_to_send_count += 1;
                }
                mut expression => {
                    if let Err(e) = expression.validate(&mut ctx) {
                        errors.extend(e.records());
                        continue;
                    }
                    let data_type = expression
                        .result_value_type(&ctx)
                        .unwrap_or(VariantType::Null);
                    response.add_column(result.alias.clone(), data_type, true);
                    has_nullable_columns = true;
                    plan.push(PlannedResult::Expression(expression));
                    column_to_send_count += 1;
                }
            }
        }

        if let Some(where_expr) = request.where_expr.as_mut() {
            if let Err(e) = where_expr.validate(&mut ctx) {
                errors.extend(e.records());
            }
        }
        if !errors.is_empty() {
            return Err(DbError::compound(errors));
        }

        // LIMIT/OFFSET常量折叠
        let mut limit = match request.limit.as_mut() {
            None => None,
            Some(expression) => Some(evaluate_row_bound(
                expression,
                ErrorCode::LimitValueNotInteger,
                ErrorCode::LimitValueIsNegative,
            )?),
        };
        let mut offset = match request.offset.as_mut() {
            None => None,
            Some(expression) => Some(evaluate_row_bound(
                expression,
                ErrorCode::OffsetValueNotInteger,
                ErrorCode::OffsetValueIsNegative,
            )?),
        };

        for data_set in ctx.data_sets_mut() {
            data_set.reset_cursor()?;
        }

        let where_type_is_null = match request.where_expr.as_ref() {
            Some(where_expr) => where_expr.result_value_type(&ctx)? == VariantType::Null,
            None => false,
        };

        let mut writer: Box<dyn RowsetWriter + '_> = if rest {
            Box::new(RestJsonRowsetWriter::new(&mut self.connection))
        } else {
            Box::new(BinaryRowsetWriter::new(&mut self.connection))
        };
        response.rest_status_code = crate::handlers::rowset_writer::http_status::OK;
        writer.begin_rowset(response, true)?;

        let mut null_mask = BitMask::new(if has_nullable_columns {
            column_to_send_count
        } else {
            0
        });
        let mut values: Vec<Variant> = vec![Variant::Null; column_to_send_count];
        let mut input_row_count = 0u64;
        let mut output_row_count = 0u64;

        // 行流已经开始：此后任何错误都以终止行终结流，连接继续可用
        let stream_result: CResult<()> = (|| {
            let mut row_available = ctx
                .data_sets()
                .iter()
                .all(|data_set| data_set.has_current_row());

            while row_available && limit != Some(0) {
                input_row_count += 1;

                if let Some(where_expr) = request.where_expr.as_ref() {
                    if where_type_is_null {
                        row_available = move_to_next_combined_row(ctx.data_sets_mut())?;
                        continue;
                    }
                    let verdict = where_expr.evaluate(&mut ctx).map_err(|e| {
                        DbError::new(
                            ErrorCode::InvalidWhereCondition,
                            format!("invalid WHERE condition: {}", e),
                        )
                    })?;
                    match verdict {
                        Variant::Null => {
                            row_available = move_to_next_combined_row(ctx.data_sets_mut())?;
                            continue;
                        }
                        Variant::Bool(false) => {
                            row_available = move_to_next_combined_row(ctx.data_sets_mut())?;
                            continue;
                        }
                        Variant::Bool(true) => {}
                        other => {
                            return Err(DbError::new(
                                ErrorCode::InvalidWhereCondition,
                                format!(
                                    "WHERE yields {:?}, boolean expected",
                                    other.value_type()
                                ),
                            ));
                        }
                    }
                }

                if let Some(remaining) = offset.as_mut() {
                    if *remaining > 0 {
                        *remaining -= 1;
                        row_available = move_to_next_combined_row(ctx.data_sets_mut())?;
                        continue;
                    }
                }

                let mut value_index = 0usize;
                for planned in &plan {
                    match planned {
                        PlannedResult::AllColumns {
                            table_index,
                            bound_indexes,
                        } => {
                            let data_set = &mut ctx.data_sets_mut()[*table_index];
                            data_set.read_current_row()?;
                            for bound_index in bound_indexes {
                                values[value_index] = data_set.get_value(*bound_index)?;
                                value_index += 1;
                            }
                        }
                        PlannedResult::Expression(expression) => {
                            values[value_index] = expression.evaluate(&mut ctx)?;
                            value_index += 1;
                        }
                    }
                }
                if has_nullable_columns {
                    for (index, value) in values.iter().enumerate() {
                        null_mask.set(index, value.is_null());
                    }
                }

                writer.write_row(&values, &null_mask)?;
                output_row_count += 1;

                if let Some(remaining) = limit.as_mut() {
                    *remaining -= 1;
                }
                row_available = move_to_next_combined_row(ctx.data_sets_mut())?;
            }
            Ok(())
        })();

        if let Err(e) = stream_result {
            // 已在流中：记录并终止行流，不再发第二个响应
            error!("select row stream aborted: {}", e);
        }
        writer.end_rowset()?;

        debug!(
            "select: {} rows in, {} rows out",
            input_row_count, output_row_count
        );
        Ok(())
    }

    /// SHOW DATABASES：NAME + UUID，按名排序。
    pub(crate) fn execute_show_databases_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
    ) -> CResult<()> {
        response.add_column("NAME", VariantType::String, false);
        response.add_column("UUID", VariantType::String, false);

        let records = self.instance.database_records_ordered_by_name();
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let database = self.instance.find_database(&record.name)?;
            rows.push(vec![
                Variant::String(database.name().to_string()),
                Variant::String(database.uuid().to_string()),
            ]);
        }

        let mut writer = BinaryRowsetWriter::new(&mut self.connection);
        writer.begin_rowset(response, true)?;
        let null_mask = BitMask::new(0);
        for row in rows {
            writer.write_row(&row, &null_mask)?;
        }
        writer.end_rowset()
    }

    /// SHOW TABLES：当前库的NAME + DESCRIPTION，按名排序。
    pub(crate) fn execute_show_tables_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
    ) -> CResult<()> {
        response.add_column("NAME", VariantType::String, false);
        response.add_column("DESCRIPTION", VariantType::String, true);

        let database_name = self.current_database.clone();
        let database_guard = self.use_database(&database_name)?;
        let records = database_guard.table_records_ordered_by_name();
        drop(database_guard);

        let mut writer = BinaryRowsetWriter::new(&mut self.connection);
        writer.begin_rowset(response, true)?;
        let mut null_mask = BitMask::new(2);
        null_mask.set(1, true);
        for record in records {
            writer.write_row(
                &[Variant::String(record.name), Variant::Null],
                &null_mask,
            )?;
        }
        writer.end_rowset()
    }

    /// DESCRIBE TABLE：NAME + DATA_TYPE。
    pub(crate) fn execute_describe_table_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DescribeTableRequest,
    ) -> CResult<()> {
        let database_name = self.resolve_database_name(&request.database);
        let database_guard = self.use_database(&database_name)?;
        let table = database_guard.find_table(&request.table)?;
        drop(database_guard);

        response.add_column("NAME", VariantType::String, false);
        response.add_column("DATA_TYPE", VariantType::String, false);

        let mut writer = BinaryRowsetWriter::new(&mut self.connection);
        writer.begin_rowset(response, true)?;
        let null_mask = BitMask::new(0);
        for info in table.column_infos() {
            writer.write_row(
                &[
                    Variant::String(info.name.clone()),
                    Variant::String(info.data_type.type_name().to_string()),
                ],
                &null_mask,
            )?;
        }
        writer.end_rowset()
    }
}

/// LIMIT/OFFSET求值：空上下文常量折叠，非整数或负数报错。
fn evaluate_row_bound(
    expression: &mut Expression,
    not_integer: ErrorCode,
    negative: ErrorCode,
) -> CResult<u64> {
    let mut empty = EmptyExpressionEvaluationContext;
    expression.validate(&mut empty)?;
    let value = expression.evaluate(&mut empty)?;
    if !value.is_integer() {
        return Err(DbError::new(not_integer, "row bound must be an integer"));
    }
    if value.is_negative() {
        return Err(DbError::new(negative, "row bound cannot be negative"));
    }
    value
        .as_u64()
        .ok_or_else(|| DbError::new(not_integer, "row bound must be an integer"))
}
