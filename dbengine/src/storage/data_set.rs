use std::collections::HashMap;
use std::sync::Arc;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::expr::context::ExpressionEvaluationContext;
use crate::storage::master_column_record::MasterColumnRecord;
use crate::storage::table::Table;
use crate::storage::TransactionParameters;
use crate::variant::{Variant, VariantType};

/// 表行游标，绑定列子集到位置。表达式求值器按数据集向量寻址跨表列引用。
pub trait DataSet {
    /// 数据集名（别名优先）。
    fn name(&self) -> &str;

    fn data_source_id(&self) -> u64;

    /// 绑定列数量。
    fn column_count(&self) -> usize;

    fn bound_column_name(&self, index: usize) -> CResult<&str>;

    fn bound_column_type(&self, index: usize) -> CResult<VariantType>;

    /// 绑定数据源`position`处的列，返回绑定列索引。重复绑定返回既有索引。
    fn emplace_column_info(&mut self, position: usize, name: &str, alias: &str) -> usize;

    /// 查数据源列位置。
    fn data_source_column_position(&self, name: &str) -> Option<usize>;

    fn reset_cursor(&mut self) -> CResult<()>;

    fn has_current_row(&self) -> bool;

    fn move_to_next_row(&mut self) -> CResult<bool>;

    /// 解码当前行全部绑定列值。
    fn read_current_row(&mut self) -> CResult<()>;

    /// 当前行绑定列值。
    fn get_value(&mut self, index: usize) -> CResult<Variant>;

    fn current_trid(&self) -> CResult<u64>;

    fn delete_current_row(&mut self, tp: TransactionParameters) -> CResult<()>;

    fn update_current_row(
        &mut self,
        values: Vec<Variant>,
        column_positions: &[usize],
        tp: TransactionParameters,
    ) -> CResult<()>;
}

#[derive(Debug, Clone)]
struct BoundColumn {
    /// 数据源列位置
    position: usize,
    name: String,
    #[allow(dead_code)]
    alias: String,
}

/// 基于主索引快照的表数据集。
///
/// 游标建立在索引键快照上：追加式主列保证快照内每个TRID
/// 都能读到完整的行版本。
pub struct TableDataSet {
    table: Arc<Table>,
    alias: String,
    bound: Vec<BoundColumn>,
    trids: Vec<u64>,
    cursor: usize,
    cursor_valid: bool,
    current_record: Option<MasterColumnRecord>,
    current_values: Vec<Option<Variant>>,
}

impl TableDataSet {
    pub fn new(table: Arc<Table>, alias: impl Into<String>) -> Self {
        Self {
            table,
            alias: alias.into(),
            bound: Vec::new(),
            trids: Vec::new(),
            cursor: 0,
            cursor_valid: false,
            current_record: None,
            current_values: Vec::new(),
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn ensure_cursor(&self) -> CResult<()> {
        if !self.cursor_valid || self.cursor >= self.trids.len() {
            return Err(DbError::new(
                ErrorCode::InvalidDataSetState,
                "no current row",
            ));
        }
        Ok(())
    }

    fn ensure_record(&mut self) -> CResult<()> {
        self.ensure_cursor()?;
        if self.current_record.is_none() {
            let trid = self.trids[self.cursor];
            let address = self.table.find_row_address(trid).ok_or_else(|| {
                DbError::new(
                    ErrorCode::RowDoesNotExist,
                    format!("row {} vanished from table {}", trid, self.table.name()),
                )
            })?;
            self.current_record = Some(self.table.read_master_record(address)?);
        }
        Ok(())
    }
}

impl DataSet for TableDataSet {
    fn name(&self) -> &str {
        if self.alias.is_empty() {
            self.table.name()
        } else {
            &self.alias
        }
    }

    fn data_source_id(&self) -> u64 {
        self.table.id()
    }

    fn column_count(&self) -> usize {
        self.bound.len()
    }

    fn bound_column_name(&self, index: usize) -> CResult<&str> {
        self.bound
            .get(index)
            .map(|c| c.name.as_str())
            .ok_or_else(|| bad_bound_index(index))
    }

    fn bound_column_type(&self, index: usize) -> CResult<VariantType> {
        let column = self.bound.get(index).ok_or_else(|| bad_bound_index(index))?;
        let infos = self.table.column_infos();
        infos
            .get(column.position)
            .map(|info| info.data_type)
            .ok_or_else(|| bad_bound_index(index))
    }

    fn emplace_column_info(&mut self, position: usize, name: &str, alias: &str) -> usize {
        if let Some(index) = self.bound.iter().position(|c| c.position == position) {
            return index;
        }
        self.bound.push(BoundColumn {
            position,
            name: name.to_string(),
            alias: alias.to_string(),
        });
        self.current_values.push(None);
        self.bound.len() - 1
    }

    fn data_source_column_position(&self, name: &str) -> Option<usize> {
        self.table.find_column_position(name)
    }

    fn reset_cursor(&mut self) -> CResult<()> {
        self.trids = self.table.trid_snapshot();
        self.cursor = 0;
        self.cursor_valid = true;
        self.current_record = None;
        self.current_values.fill(None);
        Ok(())
    }

    fn has_current_row(&self) -> bool {
        self.cursor_valid && self.cursor < self.trids.len()
    }

    fn move_to_next_row(&mut self) -> CResult<bool> {
        if !self.cursor_valid {
            return Err(DbError::new(
                ErrorCode::InvalidDataSetState,
                "cursor was not reset",
            ));
        }
        if self.cursor < self.trids.len() {
            self.cursor += 1;
        }
        self.current_record = None;
        self.current_values.fill(None);
        Ok(self.has_current_row())
    }

    fn read_current_row(&mut self) -> CResult<()> {
        self.ensure_record()?;
        for index in 0..self.bound.len() {
            if self.current_values[index].is_none() {
                let record = self.current_record.as_ref().unwrap();
                let value = self
                    .table
                    .read_column_value(record, self.bound[index].position)?;
                self.current_values[index] = Some(value);
            }
        }
        Ok(())
    }

    fn get_value(&mut self, index: usize) -> CResult<Variant> {
        if index >= self.bound.len() {
            return Err(bad_bound_index(index));
        }
        self.ensure_record()?;
        if self.current_values[index].is_none() {
            let record = self.current_record.as_ref().unwrap();
            let value = self
                .table
                .read_column_value(record, self.bound[index].position)?;
            self.current_values[index] = Some(value);
        }
        Ok(self.current_values[index].clone().unwrap())
    }

    fn current_trid(&self) -> CResult<u64> {
        self.ensure_cursor()?;
        Ok(self.trids[self.cursor])
    }

    fn delete_current_row(&mut self, tp: TransactionParameters) -> CResult<()> {
        let trid = self.current_trid()?;
        if !self.table.delete_row(trid, tp)? {
            return Err(DbError::new(
                ErrorCode::RowDoesNotExist,
                format!("row {} is already deleted", trid),
            ));
        }
        self.current_record = None;
        Ok(())
    }

    fn update_current_row(
        &mut self,
        values: Vec<Variant>,
        column_positions: &[usize],
        tp: TransactionParameters,
    ) -> CResult<()> {
        if values.len() != column_positions.len() {
            return Err(DbError::new(
                ErrorCode::InvalidValueCount,
                "value count does not match column position count",
            ));
        }
        let trid = self.current_trid()?;
        let updates = column_positions
            .iter()
            .copied()
            .zip(values)
            .collect::<Vec<_>>();
        if !self.table.update_row(trid, updates, tp)? {
            return Err(DbError::new(
                ErrorCode::RowDoesNotExist,
                format!("row {} is already deleted", trid),
            ));
        }
        self.current_record = None;
        self.current_values.fill(None);
        Ok(())
    }
}

fn bad_bound_index(index: usize) -> DbError {
    DbError::new(
        ErrorCode::InvalidDataSetState,
        format!("bound column index {} is out of range", index),
    )
}

/// 携带数据集向量的求值上下文。表名与别名都可寻址数据集。
pub struct DbExpressionEvaluationContext {
    data_sets: Vec<TableDataSet>,
    name_map: HashMap<String, usize>,
}

impl DbExpressionEvaluationContext {
    pub fn new(data_sets: Vec<TableDataSet>) -> Self {
        let mut name_map = HashMap::new();
        for (index, data_set) in data_sets.iter().enumerate() {
            name_map.insert(data_set.table().name().to_string(), index);
            if !data_set.alias.is_empty() {
                name_map.insert(data_set.alias.clone(), index);
            }
        }
        Self {
            data_sets,
            name_map,
        }
    }

    pub fn data_sets(&self) -> &[TableDataSet] {
        &self.data_sets
    }

    pub fn data_sets_mut(&mut self) -> &mut [TableDataSet] {
        &mut self.data_sets
    }
}

impl ExpressionEvaluationContext for DbExpressionEvaluationContext {
    fn data_set_count(&self) -> usize {
        self.data_sets.len()
    }

    fn data_set_index(&self, table_name: &str) -> Option<usize> {
        self.name_map.get(table_name).copied()
    }

    fn bind_column(
        &mut self,
        table_index: usize,
        column_name: &str,
    ) -> CResult<(usize, VariantType)> {
        let data_set = self
            .data_sets
            .get_mut(table_index)
            .ok_or_else(|| bad_bound_index(table_index))?;
        if let Some(position) = data_set
            .bound
            .iter()
            .position(|c| c.name == column_name)
        {
            let data_type = data_set.bound_column_type(position)?;
            return Ok((position, data_type));
        }
        let source_position = data_set
            .data_source_column_position(column_name)
            .ok_or_else(|| {
                DbError::new(
                    ErrorCode::ColumnDoesNotExist,
                    format!(
                        "column {} does not exist in table {}",
                        column_name,
                        data_set.table().name()
                    ),
                )
            })?;
        let index = data_set.emplace_column_info(source_position, column_name, "");
        let data_type = data_set.bound_column_type(index)?;
        Ok((index, data_type))
    }

    fn column_type(&self, table_index: usize, column_index: usize) -> CResult<VariantType> {
        let data_set = self
            .data_sets
            .get(table_index)
            .ok_or_else(|| bad_bound_index(table_index))?;
        data_set.bound_column_type(column_index)
    }

    fn column_value(&mut self, table_index: usize, column_index: usize) -> CResult<Variant> {
        let data_set = self
            .data_sets
            .get_mut(table_index)
            .ok_or_else(|| bad_bound_index(table_index))?;
        data_set.get_value(column_index)
    }
}

#[cfg(test)]
mod test {
    use crate::storage::caches::new_block_cache;
    use crate::storage::cipher::NoneCipher;
    use crate::storage::column_set::ColumnInfo;

    use super::*;

    fn tp() -> TransactionParameters {
        TransactionParameters::new(1, 1)
    }

    fn make_table(dir: &std::path::Path) -> Arc<Table> {
        let table = Table::create(
            1,
            "DB1",
            1,
            "T1",
            false,
            vec![
                ColumnInfo::new(0, "A", VariantType::Int32),
                ColumnInfo::new(0, "B", VariantType::String),
            ],
            dir,
            64 * 1024,
            Arc::new(NoneCipher),
            new_block_cache(128),
        )
        .unwrap();
        for i in 1..=3i32 {
            table
                .insert_row(
                    vec![
                        None,
                        Some(Variant::Int32(i)),
                        Some(Variant::String(format!("row{}", i))),
                    ],
                    tp(),
                )
                .unwrap();
        }
        table
    }

    #[test]
    fn test_cursor_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let table = make_table(dir.path());
        let mut data_set = TableDataSet::new(table, "");
        let a = data_set.emplace_column_info(1, "A", "");
        data_set.reset_cursor().unwrap();

        let mut seen = Vec::new();
        while data_set.has_current_row() {
            data_set.read_current_row().unwrap();
            seen.push((data_set.current_trid().unwrap(), data_set.get_value(a).unwrap()));
            data_set.move_to_next_row().unwrap();
        }
        assert_eq!(
            seen,
            vec![
                (1, Variant::Int32(1)),
                (2, Variant::Int32(2)),
                (3, Variant::Int32(3))
            ]
        );
    }

    #[test]
    fn test_context_binds_columns() {
        let dir = tempfile::tempdir().unwrap();
        let table = make_table(dir.path());
        let mut ctx =
            DbExpressionEvaluationContext::new(vec![TableDataSet::new(table, "ALIAS1")]);
        assert_eq!(ctx.data_set_index("ALIAS1"), Some(0));
        assert_eq!(ctx.data_set_index("T1"), Some(0));
        assert_eq!(ctx.data_set_index("NOPE"), None);

        let (index, data_type) = ctx.bind_column(0, "B").unwrap();
        assert_eq!(data_type, VariantType::String);
        // 再次绑定返回同一索引
        assert_eq!(ctx.bind_column(0, "B").unwrap().0, index);
        assert!(ctx.bind_column(0, "MISSING").is_err());

        ctx.data_sets_mut()[0].reset_cursor().unwrap();
        assert_eq!(
            ctx.column_value(0, index).unwrap(),
            Variant::String("row1".to_string())
        );
    }

    #[test]
    fn test_update_and_delete_through_data_set() {
        let dir = tempfile::tempdir().unwrap();
        let table = make_table(dir.path());
        let mut data_set = TableDataSet::new(Arc::clone(&table), "");
        data_set.emplace_column_info(1, "A", "");
        data_set.reset_cursor().unwrap();

        data_set
            .update_current_row(vec![Variant::Int32(100)], &[1], tp())
            .unwrap();
        data_set.move_to_next_row().unwrap();
        data_set.delete_current_row(tp()).unwrap();

        assert_eq!(
            table.read_row(1).unwrap().unwrap()[1],
            Variant::Int32(100)
        );
        assert_eq!(table.read_row(2).unwrap(), None);
        assert!(table.read_row(3).unwrap().is_some());
    }
}
