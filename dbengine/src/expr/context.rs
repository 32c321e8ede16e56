use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::variant::{Variant, VariantType};

/// 表达式求值上下文。
///
/// 数据集向量由请求处理器装配；列引用在校验阶段解析并登记为绑定列。
pub trait ExpressionEvaluationContext {
    fn data_set_count(&self) -> usize;

    /// 按表名或别名找数据集索引。
    fn data_set_index(&self, table_name: &str) -> Option<usize>;

    /// 在数据集中登记绑定列（若未绑定），返回（绑定列索引，列类型）。
    fn bind_column(&mut self, table_index: usize, column_name: &str)
        -> CResult<(usize, VariantType)>;

    fn column_type(&self, table_index: usize, column_index: usize) -> CResult<VariantType>;

    /// 读当前行该列的值。
    fn column_value(&mut self, table_index: usize, column_index: usize) -> CResult<Variant>;
}

/// 空上下文：LIMIT/OFFSET等常量折叠用，任何列访问都报错。
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyExpressionEvaluationContext;

impl ExpressionEvaluationContext for EmptyExpressionEvaluationContext {
    fn data_set_count(&self) -> usize {
        0
    }

    fn data_set_index(&self, _table_name: &str) -> Option<usize> {
        None
    }

    fn bind_column(
        &mut self,
        _table_index: usize,
        column_name: &str,
    ) -> CResult<(usize, VariantType)> {
        Err(no_columns(column_name))
    }

    fn column_type(&self, _table_index: usize, _column_index: usize) -> CResult<VariantType> {
        Err(no_columns("?"))
    }

    fn column_value(&mut self, _table_index: usize, _column_index: usize) -> CResult<Variant> {
        Err(no_columns("?"))
    }
}

fn no_columns(column_name: &str) -> DbError {
    DbError::new(
        ErrorCode::InvalidExpression,
        format!("column {} is not allowed in a constant expression", column_name),
    )
}
