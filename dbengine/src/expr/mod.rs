use num_enum::{IntoPrimitive, TryFromPrimitive};

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::expr::context::ExpressionEvaluationContext;
use crate::variant::ops;
use crate::variant::{Variant, VariantType};

pub mod context;
pub mod eval;
pub mod like_matcher;
pub mod wire;

/// 线上表达式节点标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ExpressionType {
    Constant = 1,
    SingleColumn = 2,
    AllColumns = 3,
    UnaryPlus = 4,
    UnaryMinus = 5,
    Add = 6,
    Subtract = 7,
    Multiply = 8,
    Divide = 9,
    Modulo = 10,
    BitwiseComplement = 11,
    BitwiseAnd = 12,
    BitwiseOr = 13,
    BitwiseXor = 14,
    LeftShift = 15,
    RightShift = 16,
    Equal = 17,
    NotEqual = 18,
    Less = 19,
    LessOrEqual = 20,
    Greater = 21,
    GreaterOrEqual = 22,
    LogicalNot = 23,
    LogicalAnd = 24,
    LogicalOr = 25,
    Is = 26,
    Between = 27,
    In = 28,
    Like = 29,
    Concat = 30,
    Cast = 31,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Minus,
    BitwiseComplement,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    LogicalAnd,
    LogicalOr,
    Concat,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Less
                | BinaryOperator::LessOrEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterOrEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOperator::BitwiseAnd
                | BinaryOperator::BitwiseOr
                | BinaryOperator::BitwiseXor
                | BinaryOperator::LeftShift
                | BinaryOperator::RightShift
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Subtract
                | BinaryOperator::Multiply
                | BinaryOperator::Divide
                | BinaryOperator::Modulo
        )
    }
}

/// 单列引用。校验阶段解析出(数据集索引, 列索引)。
#[derive(Debug, Clone, PartialEq)]
pub struct SingleColumnExpression {
    pub table_name: String,
    pub column_name: String,
    pub dataset_table_index: Option<usize>,
    pub dataset_column_index: Option<usize>,
}

impl SingleColumnExpression {
    pub fn new(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
            dataset_table_index: None,
            dataset_column_index: None,
        }
    }
}

/// 全列引用（`*` / `t.*`）。计划阶段展开为单列引用。
#[derive(Debug, Clone, PartialEq)]
pub struct AllColumnsExpression {
    pub table_name: String,
    pub dataset_table_index: Option<usize>,
}

impl AllColumnsExpression {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            dataset_table_index: None,
        }
    }
}

/// 类型化表达式树。
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Variant),
    SingleColumn(SingleColumnExpression),
    AllColumns(AllColumnsExpression),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Is {
        left: Box<Expression>,
        right: Box<Expression>,
        is_not: bool,
    },
    Between {
        value: Box<Expression>,
        lower: Box<Expression>,
        upper: Box<Expression>,
        not_between: bool,
    },
    In {
        value: Box<Expression>,
        elements: Vec<Expression>,
        not_in: bool,
    },
    Like {
        value: Box<Expression>,
        pattern: Box<Expression>,
        not_like: bool,
    },
    Cast {
        value: Box<Expression>,
        target: VariantType,
    },
}

impl Expression {
    pub fn constant(value: impl Into<Variant>) -> Self {
        Expression::Constant(value.into())
    }

    pub fn column(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Expression::SingleColumn(SingleColumnExpression::new(table_name, column_name))
    }

    pub fn binary(op: BinaryOperator, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expression) -> Self {
        Expression::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    /// 校验：解析列引用并登记到上下文的数据集。
    pub fn validate(&mut self, ctx: &mut dyn ExpressionEvaluationContext) -> CResult<()> {
        match self {
            Expression::Constant(_) => Ok(()),
            Expression::SingleColumn(column) => {
                let table_index = if column.table_name.is_empty() {
                    if ctx.data_set_count() == 0 {
                        return Err(DbError::new(
                            ErrorCode::InvalidExpression,
                            format!("column {} cannot be resolved", column.column_name),
                        ));
                    }
                    0
                } else {
                    ctx.data_set_index(&column.table_name).ok_or_else(|| {
                        DbError::new(
                            ErrorCode::TableDoesNotExistInContext,
                            format!("table {} is not in the request context", column.table_name),
                        )
                    })?
                };
                let (column_index, _) = ctx.bind_column(table_index, &column.column_name)?;
                column.dataset_table_index = Some(table_index);
                column.dataset_column_index = Some(column_index);
                Ok(())
            }
            Expression::AllColumns(_) => Err(DbError::new(
                ErrorCode::InvalidExpression,
                "all-columns reference is not allowed here",
            )),
            Expression::Unary { operand, .. } => operand.validate(ctx),
            Expression::Binary { left, right, .. } => {
                left.validate(ctx)?;
                right.validate(ctx)
            }
            Expression::Is { left, right, .. } => {
                left.validate(ctx)?;
                right.validate(ctx)
            }
            Expression::Between {
                value,
                lower,
                upper,
                ..
            } => {
                value.validate(ctx)?;
                lower.validate(ctx)?;
                upper.validate(ctx)
            }
            Expression::In {
                value, elements, ..
            } => {
                value.validate(ctx)?;
                for element in elements {
                    element.validate(ctx)?;
                }
                Ok(())
            }
            Expression::Like { value, pattern, .. } => {
                value.validate(ctx)?;
                pattern.validate(ctx)
            }
            Expression::Cast { value, .. } => value.validate(ctx),
        }
    }

    /// 结果类型。纯函数，不读列值；NULL类型按SQL语义传播。
    pub fn result_value_type(
        &self,
        ctx: &dyn ExpressionEvaluationContext,
    ) -> CResult<VariantType> {
        match self {
            Expression::Constant(value) => Ok(value.value_type()),
            Expression::SingleColumn(column) => {
                let (ti, ci) = resolved_indexes(column)?;
                ctx.column_type(ti, ci)
            }
            Expression::AllColumns(_) => Err(DbError::new(
                ErrorCode::InvalidExpression,
                "all-columns reference has no single type",
            )),
            Expression::Unary { op, operand } => {
                let t = operand.result_value_type(ctx)?;
                if t == VariantType::Null {
                    return Ok(VariantType::Null);
                }
                match op {
                    UnaryOperator::Plus => Ok(t),
                    UnaryOperator::Minus => {
                        if !t.is_numeric() {
                            return Err(type_error(t));
                        }
                        if t.is_signed_integer() || t.is_float() {
                            Ok(t)
                        } else {
                            ops::promote_numeric_types(t, VariantType::Int8)
                        }
                    }
                    UnaryOperator::BitwiseComplement => {
                        if !t.is_integer() {
                            return Err(type_error(t));
                        }
                        Ok(t)
                    }
                    UnaryOperator::LogicalNot => {
                        if t != VariantType::Bool {
                            return Err(type_error(t));
                        }
                        Ok(VariantType::Bool)
                    }
                }
            }
            Expression::Binary { op, left, right } => {
                let lt = left.result_value_type(ctx)?;
                let rt = right.result_value_type(ctx)?;
                if lt == VariantType::Null || rt == VariantType::Null {
                    return Ok(VariantType::Null);
                }
                if op.is_arithmetic() {
                    ops::promote_numeric_types(lt, rt)
                } else if op.is_bitwise() {
                    if !lt.is_integer() || !rt.is_integer() {
                        return Err(type_error(if lt.is_integer() { rt } else { lt }));
                    }
                    Ok(if lt.integer_width() >= rt.integer_width() {
                        lt
                    } else {
                        rt
                    })
                } else if op.is_comparison() || op.is_logical() {
                    Ok(VariantType::Bool)
                } else {
                    // Concat
                    Ok(VariantType::String)
                }
            }
            Expression::Is { .. } => Ok(VariantType::Bool),
            Expression::Between {
                value,
                lower,
                upper,
                ..
            } => {
                for operand in [value, lower, upper] {
                    if operand.result_value_type(ctx)? == VariantType::Null {
                        return Ok(VariantType::Null);
                    }
                }
                Ok(VariantType::Bool)
            }
            Expression::In { value, .. } => {
                if value.result_value_type(ctx)? == VariantType::Null {
                    return Ok(VariantType::Null);
                }
                Ok(VariantType::Bool)
            }
            Expression::Like { value, pattern, .. } => {
                let vt = value.result_value_type(ctx)?;
                let pt = pattern.result_value_type(ctx)?;
                if vt == VariantType::Null || pt == VariantType::Null {
                    return Ok(VariantType::Null);
                }
                Ok(VariantType::Bool)
            }
            Expression::Cast { target, .. } => Ok(*target),
        }
    }
}

pub(crate) fn resolved_indexes(column: &SingleColumnExpression) -> CResult<(usize, usize)> {
    match (column.dataset_table_index, column.dataset_column_index) {
        (Some(ti), Some(ci)) => Ok((ti, ci)),
        _ => Err(DbError::new(
            ErrorCode::InvalidExpression,
            format!("column {} was not validated", column.column_name),
        )),
    }
}

fn type_error(t: VariantType) -> DbError {
    DbError::new(
        ErrorCode::ValueTypeMismatch,
        format!("unexpected operand type {:?}", t),
    )
}
