use std::cmp::Ordering;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::expr::context::ExpressionEvaluationContext;
use crate::expr::like_matcher::match_like;
use crate::expr::{resolved_indexes, BinaryOperator, Expression, UnaryOperator};
use crate::variant::ops;
use crate::variant::{Variant, VariantType};

impl Expression {
    /// 对当前行求值。
    pub fn evaluate(&self, ctx: &mut dyn ExpressionEvaluationContext) -> CResult<Variant> {
        match self {
            Expression::Constant(value) => Ok(value.clone()),
            Expression::SingleColumn(column) => {
                let (ti, ci) = resolved_indexes(column)?;
                ctx.column_value(ti, ci)
            }
            Expression::AllColumns(_) => Err(DbError::new(
                ErrorCode::InvalidExpression,
                "all-columns reference cannot be evaluated",
            )),
            Expression::Unary { op, operand } => {
                let value = operand.evaluate(ctx)?;
                match op {
                    UnaryOperator::Plus => ops::unary_plus(&value),
                    UnaryOperator::Minus => ops::negate(&value),
                    UnaryOperator::BitwiseComplement => ops::bitwise_complement(&value),
                    UnaryOperator::LogicalNot => match value {
                        Variant::Null => Ok(Variant::Null),
                        Variant::Bool(v) => Ok(Variant::Bool(!v)),
                        other => Err(bool_expected(&other)),
                    },
                }
            }
            Expression::Binary { op, left, right } => self.evaluate_binary(ctx, *op, left, right),
            Expression::Is {
                left,
                right,
                is_not,
            } => {
                let a = left.evaluate(ctx)?;
                let b = right.evaluate(ctx)?;
                // NULL安全相等，结果永不为NULL
                let equal = match (a.is_null(), b.is_null()) {
                    (true, true) => true,
                    (false, false) => {
                        matches!(ops::compare(&a, &b)?, Some(Ordering::Equal))
                    }
                    _ => false,
                };
                Ok(Variant::Bool(equal != *is_not))
            }
            Expression::Between {
                value,
                lower,
                upper,
                not_between,
            } => {
                let v = value.evaluate(ctx)?;
                let lo = lower.evaluate(ctx)?;
                let hi = upper.evaluate(ctx)?;
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return Ok(Variant::Null);
                }
                let ge_lower = !matches!(ops::compare(&v, &lo)?, Some(Ordering::Less));
                let le_upper = !matches!(ops::compare(&v, &hi)?, Some(Ordering::Greater));
                let within = ge_lower && le_upper;
                Ok(Variant::Bool(within != *not_between))
            }
            Expression::In {
                value,
                elements,
                not_in,
            } => {
                let needle = value.evaluate(ctx)?;
                if needle.is_null() {
                    return Ok(Variant::Null);
                }
                let mut saw_null = false;
                let mut found = false;
                for element in elements {
                    let candidate = element.evaluate(ctx)?;
                    if candidate.is_null() {
                        saw_null = true;
                        continue;
                    }
                    if matches!(ops::compare(&needle, &candidate)?, Some(Ordering::Equal)) {
                        found = true;
                        break;
                    }
                }
                if found {
                    Ok(Variant::Bool(!*not_in))
                } else if saw_null {
                    Ok(Variant::Null)
                } else {
                    Ok(Variant::Bool(*not_in))
                }
            }
            Expression::Like {
                value,
                pattern,
                not_like,
            } => {
                let v = value.evaluate(ctx)?;
                let p = pattern.evaluate(ctx)?;
                if v.is_null() || p.is_null() {
                    return Ok(Variant::Null);
                }
                let (text, pattern_text) = match (&v, &p) {
                    (Variant::String(a), Variant::String(b)) => (a, b),
                    _ => {
                        return Err(DbError::new(
                            ErrorCode::InvalidLikePattern,
                            "LIKE operands must be strings",
                        ))
                    }
                };
                let matched = match_like(text.as_bytes(), pattern_text.as_bytes());
                Ok(Variant::Bool(matched != *not_like))
            }
            Expression::Cast { value, target } => {
                let v = value.evaluate(ctx)?;
                ops::cast_variant(&v, *target)
            }
        }
    }

    fn evaluate_binary(
        &self,
        ctx: &mut dyn ExpressionEvaluationContext,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> CResult<Variant> {
        // 逻辑算子有三值短路语义，单独处理
        match op {
            BinaryOperator::LogicalAnd => {
                let a = to_tri_bool(left.evaluate(ctx)?)?;
                if a == Some(false) {
                    return Ok(Variant::Bool(false));
                }
                let b = to_tri_bool(right.evaluate(ctx)?)?;
                return Ok(match (a, b) {
                    (_, Some(false)) => Variant::Bool(false),
                    (Some(true), Some(true)) => Variant::Bool(true),
                    _ => Variant::Null,
                });
            }
            BinaryOperator::LogicalOr => {
                let a = to_tri_bool(left.evaluate(ctx)?)?;
                if a == Some(true) {
                    return Ok(Variant::Bool(true));
                }
                let b = to_tri_bool(right.evaluate(ctx)?)?;
                return Ok(match (a, b) {
                    (_, Some(true)) => Variant::Bool(true),
                    (Some(false), Some(false)) => Variant::Bool(false),
                    _ => Variant::Null,
                });
            }
            _ => {}
        }

        let a = left.evaluate(ctx)?;
        let b = right.evaluate(ctx)?;

        if op.is_comparison() {
            return Ok(match ops::compare(&a, &b)? {
                None => Variant::Null,
                Some(ordering) => Variant::Bool(comparison_holds(op, ordering)),
            });
        }

        match op {
            BinaryOperator::Add => ops::arithmetic(ops::ArithmeticOp::Add, &a, &b),
            BinaryOperator::Subtract => ops::arithmetic(ops::ArithmeticOp::Subtract, &a, &b),
            BinaryOperator::Multiply => ops::arithmetic(ops::ArithmeticOp::Multiply, &a, &b),
            BinaryOperator::Divide => ops::arithmetic(ops::ArithmeticOp::Divide, &a, &b),
            BinaryOperator::Modulo => ops::arithmetic(ops::ArithmeticOp::Modulo, &a, &b),
            BinaryOperator::BitwiseAnd => ops::bitwise(ops::BitwiseOp::And, &a, &b),
            BinaryOperator::BitwiseOr => ops::bitwise(ops::BitwiseOp::Or, &a, &b),
            BinaryOperator::BitwiseXor => ops::bitwise(ops::BitwiseOp::Xor, &a, &b),
            BinaryOperator::LeftShift => ops::bitwise(ops::BitwiseOp::LeftShift, &a, &b),
            BinaryOperator::RightShift => ops::bitwise(ops::BitwiseOp::RightShift, &a, &b),
            BinaryOperator::Concat => ops::concat(&a, &b),
            _ => unreachable!("logical and comparison operators handled above"),
        }
    }
}

fn to_tri_bool(value: Variant) -> CResult<Option<bool>> {
    match value {
        Variant::Null => Ok(None),
        Variant::Bool(v) => Ok(Some(v)),
        other => Err(bool_expected(&other)),
    }
}

fn bool_expected(value: &Variant) -> DbError {
    DbError::new(
        ErrorCode::ValueTypeMismatch,
        format!("boolean operand expected, got {:?}", value.value_type()),
    )
}

fn comparison_holds(op: BinaryOperator, ordering: Ordering) -> bool {
    match op {
        BinaryOperator::Equal => ordering == Ordering::Equal,
        BinaryOperator::NotEqual => ordering != Ordering::Equal,
        BinaryOperator::Less => ordering == Ordering::Less,
        BinaryOperator::LessOrEqual => ordering != Ordering::Greater,
        BinaryOperator::Greater => ordering == Ordering::Greater,
        BinaryOperator::GreaterOrEqual => ordering != Ordering::Less,
        _ => unreachable!("not a comparison operator"),
    }
}
