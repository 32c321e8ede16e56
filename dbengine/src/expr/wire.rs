use bytes::BytesMut;

use common::codec::{
    read_var_u32, read_var_u64, var_u32_size, var_u64_size, write_var_u32, write_var_u64,
    zigzag_decode64, zigzag_encode64,
};
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::expr::{
    AllColumnsExpression, BinaryOperator, Expression, ExpressionType, SingleColumnExpression,
    UnaryOperator,
};
use crate::variant::datetime::RawDateTime;
use crate::variant::{Variant, VariantType};

/// 表达式AST是线上协议的一部分，序列化必须逐字节往返。
///
/// 节点格式：1字节类型标签 + 按类型payload + 递归子节点；
/// IN带varint元素数，IS/BETWEEN/IN/LIKE末尾带1字节否定标志，CAST带1字节目标类型。
impl Expression {
    pub fn serialized_size(&self) -> CResult<usize> {
        Ok(match self {
            Expression::Constant(value) => 2 + constant_payload_size(value)?,
            Expression::SingleColumn(column) => {
                1 + varstr_size(&column.table_name) + varstr_size(&column.column_name)
            }
            Expression::AllColumns(all) => 1 + varstr_size(&all.table_name),
            Expression::Unary { operand, .. } => 1 + operand.serialized_size()?,
            Expression::Binary { left, right, .. } => {
                1 + left.serialized_size()? + right.serialized_size()?
            }
            Expression::Is { left, right, .. } => {
                2 + left.serialized_size()? + right.serialized_size()?
            }
            Expression::Between {
                value,
                lower,
                upper,
                ..
            } => {
                2 + value.serialized_size()?
                    + lower.serialized_size()?
                    + upper.serialized_size()?
            }
            Expression::In {
                value, elements, ..
            } => {
                let mut size = 2 + value.serialized_size()? + var_u64_size(elements.len() as u64);
                for element in elements {
                    size += element.serialized_size()?;
                }
                size
            }
            Expression::Like {
                value, pattern, ..
            } => 2 + value.serialized_size()? + pattern.serialized_size()?,
            Expression::Cast { value, .. } => 2 + value.serialized_size()?,
        })
    }

    pub fn serialize_into(&self, buf: &mut BytesMut) -> CResult<()> {
        match self {
            Expression::Constant(value) => {
                buf.extend_from_slice(&[ExpressionType::Constant.into()]);
                buf.extend_from_slice(&[u8::from(value.value_type())]);
                write_constant_payload(value, buf)?;
            }
            Expression::SingleColumn(column) => {
                buf.extend_from_slice(&[ExpressionType::SingleColumn.into()]);
                write_varstr(&column.table_name, buf);
                write_varstr(&column.column_name, buf);
            }
            Expression::AllColumns(all) => {
                buf.extend_from_slice(&[ExpressionType::AllColumns.into()]);
                write_varstr(&all.table_name, buf);
            }
            Expression::Unary { op, operand } => {
                buf.extend_from_slice(&[unary_tag(*op).into()]);
                operand.serialize_into(buf)?;
            }
            Expression::Binary { op, left, right } => {
                buf.extend_from_slice(&[binary_tag(*op).into()]);
                left.serialize_into(buf)?;
                right.serialize_into(buf)?;
            }
            Expression::Is {
                left,
                right,
                is_not,
            } => {
                buf.extend_from_slice(&[ExpressionType::Is.into()]);
                left.serialize_into(buf)?;
                right.serialize_into(buf)?;
                buf.extend_from_slice(&[*is_not as u8]);
            }
            Expression::Between {
                value,
                lower,
                upper,
                not_between,
            } => {
                buf.extend_from_slice(&[ExpressionType::Between.into()]);
                value.serialize_into(buf)?;
                lower.serialize_into(buf)?;
                upper.serialize_into(buf)?;
                buf.extend_from_slice(&[*not_between as u8]);
            }
            Expression::In {
                value,
                elements,
                not_in,
            } => {
                buf.extend_from_slice(&[ExpressionType::In.into()]);
                value.serialize_into(buf)?;
                write_var_u64(elements.len() as u64, buf);
                for element in elements {
                    element.serialize_into(buf)?;
                }
                buf.extend_from_slice(&[*not_in as u8]);
            }
            Expression::Like {
                value,
                pattern,
                not_like,
            } => {
                buf.extend_from_slice(&[ExpressionType::Like.into()]);
                value.serialize_into(buf)?;
                pattern.serialize_into(buf)?;
                buf.extend_from_slice(&[*not_like as u8]);
            }
            Expression::Cast { value, target } => {
                buf.extend_from_slice(&[ExpressionType::Cast.into()]);
                value.serialize_into(buf)?;
                buf.extend_from_slice(&[u8::from(*target)]);
            }
        }
        Ok(())
    }

    pub fn serialize_to_vec(&self) -> CResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf)?;
        Ok(buf.to_vec())
    }

    pub fn deserialize(input: &mut &[u8]) -> CResult<Expression> {
        let tag_byte = take_u8(input)?;
        let tag = ExpressionType::try_from(tag_byte).map_err(|_| {
            DbError::new(
                ErrorCode::UnknownExpressionTag,
                format!("unknown expression tag {}", tag_byte),
            )
        })?;
        Ok(match tag {
            ExpressionType::Constant => {
                let type_byte = take_u8(input)?;
                let value_type = VariantType::try_from(type_byte).map_err(|_| {
                    DbError::new(
                        ErrorCode::VariantDecodeError,
                        format!("unknown variant type {}", type_byte),
                    )
                })?;
                Expression::Constant(read_constant_payload(value_type, input)?)
            }
            ExpressionType::SingleColumn => {
                let table_name = read_varstr(input)?;
                let column_name = read_varstr(input)?;
                Expression::SingleColumn(SingleColumnExpression::new(table_name, column_name))
            }
            ExpressionType::AllColumns => {
                Expression::AllColumns(AllColumnsExpression::new(read_varstr(input)?))
            }
            ExpressionType::UnaryPlus
            | ExpressionType::UnaryMinus
            | ExpressionType::BitwiseComplement
            | ExpressionType::LogicalNot => Expression::Unary {
                op: unary_op(tag),
                operand: Box::new(Expression::deserialize(input)?),
            },
            ExpressionType::Is => {
                let left = Box::new(Expression::deserialize(input)?);
                let right = Box::new(Expression::deserialize(input)?);
                let is_not = take_u8(input)? != 0;
                Expression::Is { left, right, is_not }
            }
            ExpressionType::Between => {
                let value = Box::new(Expression::deserialize(input)?);
                let lower = Box::new(Expression::deserialize(input)?);
                let upper = Box::new(Expression::deserialize(input)?);
                let not_between = take_u8(input)? != 0;
                Expression::Between {
                    value,
                    lower,
                    upper,
                    not_between,
                }
            }
            ExpressionType::In => {
                let value = Box::new(Expression::deserialize(input)?);
                let count = read_var_u64(input)? as usize;
                let mut elements = Vec::with_capacity(count);
                for _ in 0..count {
                    elements.push(Expression::deserialize(input)?);
                }
                let not_in = take_u8(input)? != 0;
                Expression::In {
                    value,
                    elements,
                    not_in,
                }
            }
            ExpressionType::Like => {
                let value = Box::new(Expression::deserialize(input)?);
                let pattern = Box::new(Expression::deserialize(input)?);
                let not_like = take_u8(input)? != 0;
                Expression::Like {
                    value,
                    pattern,
                    not_like,
                }
            }
            ExpressionType::Cast => {
                let value = Box::new(Expression::deserialize(input)?);
                let type_byte = take_u8(input)?;
                let target = VariantType::try_from(type_byte).map_err(|_| {
                    DbError::new(
                        ErrorCode::VariantDecodeError,
                        format!("unknown variant type {}", type_byte),
                    )
                })?;
                Expression::Cast { value, target }
            }
            other => {
                let left = Box::new(Expression::deserialize(input)?);
                let right = Box::new(Expression::deserialize(input)?);
                Expression::Binary {
                    op: binary_op(other)?,
                    left,
                    right,
                }
            }
        })
    }
}

fn unary_tag(op: UnaryOperator) -> ExpressionType {
    match op {
        UnaryOperator::Plus => ExpressionType::UnaryPlus,
        UnaryOperator::Minus => ExpressionType::UnaryMinus,
        UnaryOperator::BitwiseComplement => ExpressionType::BitwiseComplement,
        UnaryOperator::LogicalNot => ExpressionType::LogicalNot,
    }
}

fn unary_op(tag: ExpressionType) -> UnaryOperator {
    match tag {
        ExpressionType::UnaryPlus => UnaryOperator::Plus,
        ExpressionType::UnaryMinus => UnaryOperator::Minus,
        ExpressionType::BitwiseComplement => UnaryOperator::BitwiseComplement,
        ExpressionType::LogicalNot => UnaryOperator::LogicalNot,
        _ => unreachable!("not a unary tag"),
    }
}

fn binary_tag(op: BinaryOperator) -> ExpressionType {
    match op {
        BinaryOperator::Add => ExpressionType::Add,
        BinaryOperator::Subtract => ExpressionType::Subtract,
        BinaryOperator::Multiply => ExpressionType::Multiply,
        BinaryOperator::Divide => ExpressionType::Divide,
        BinaryOperator::Modulo => ExpressionType::Modulo,
        BinaryOperator::BitwiseAnd => ExpressionType::BitwiseAnd,
        BinaryOperator::BitwiseOr => ExpressionType::BitwiseOr,
        BinaryOperator::BitwiseXor => ExpressionType::BitwiseXor,
        BinaryOperator::LeftShift => ExpressionType::LeftShift,
        BinaryOperator::RightShift => ExpressionType::RightShift,
        BinaryOperator::Equal => ExpressionType::Equal,
        BinaryOperator::NotEqual => ExpressionType::NotEqual,
        BinaryOperator::Less => ExpressionType::Less,
        BinaryOperator::LessOrEqual => ExpressionType::LessOrEqual,
        BinaryOperator::Greater => ExpressionType::Greater,
        BinaryOperator::GreaterOrEqual => ExpressionType::GreaterOrEqual,
        BinaryOperator::LogicalAnd => ExpressionType::LogicalAnd,
        BinaryOperator::LogicalOr => ExpressionType::LogicalOr,
        BinaryOperator::Concat => ExpressionType::Concat,
    }
}

fn binary_op(tag: ExpressionType) -> CResult<BinaryOperator> {
    Ok(match tag {
        ExpressionType::Add => BinaryOperator::Add,
        ExpressionType::Subtract => BinaryOperator::Subtract,
        ExpressionType::Multiply => BinaryOperator::Multiply,
        ExpressionType::Divide => BinaryOperator::Divide,
        ExpressionType::Modulo => BinaryOperator::Modulo,
        ExpressionType::BitwiseAnd => BinaryOperator::BitwiseAnd,
        ExpressionType::BitwiseOr => BinaryOperator::BitwiseOr,
        ExpressionType::BitwiseXor => BinaryOperator::BitwiseXor,
        ExpressionType::LeftShift => BinaryOperator::LeftShift,
        ExpressionType::RightShift => BinaryOperator::RightShift,
        ExpressionType::Equal => BinaryOperator::Equal,
        ExpressionType::NotEqual => BinaryOperator::NotEqual,
        ExpressionType::Less => BinaryOperator::Less,
        ExpressionType::LessOrEqual => BinaryOperator::LessOrEqual,
        ExpressionType::Greater => BinaryOperator::Greater,
        ExpressionType::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
        ExpressionType::LogicalAnd => BinaryOperator::LogicalAnd,
        ExpressionType::LogicalOr => BinaryOperator::LogicalOr,
        ExpressionType::Concat => BinaryOperator::Concat,
        other => {
            return Err(DbError::new(
                ErrorCode::UnknownExpressionTag,
                format!("tag {:?} is not a binary operator", other),
            ))
        }
    })
}

fn varstr_size(text: &str) -> usize {
    var_u32_size(text.len() as u32) + text.len()
}

fn write_varstr(text: &str, buf: &mut BytesMut) {
    write_var_u32(text.len() as u32, buf);
    buf.extend_from_slice(text.as_bytes());
}

fn read_varstr(input: &mut &[u8]) -> CResult<String> {
    let len = read_var_u32(input)? as usize;
    if input.len() < len {
        return Err(DbError::new(
            ErrorCode::UnexpectedEndOfFile,
            "truncated string",
        ));
    }
    let (head, tail) = input.split_at(len);
    let text = String::from_utf8(head.to_vec())?;
    *input = tail;
    Ok(text)
}

fn take_u8(input: &mut &[u8]) -> CResult<u8> {
    let (&byte, tail) = input
        .split_first()
        .ok_or_else(|| DbError::new(ErrorCode::UnexpectedEndOfFile, "truncated expression"))?;
    *input = tail;
    Ok(byte)
}

/// 常量payload：有符号整数zigzag varint，无符号整数plain varint，
/// 浮点定长小端，字符串/二进制带varint长度前缀。
fn constant_payload_size(value: &Variant) -> CResult<usize> {
    Ok(match value {
        Variant::Null => 0,
        Variant::Bool(_) | Variant::Int8(_) | Variant::UInt8(_) => 1,
        Variant::Int16(v) => var_u64_size(zigzag_encode64(*v as i64)),
        Variant::UInt16(v) => var_u64_size(*v as u64),
        Variant::Int32(v) => var_u64_size(zigzag_encode64(*v as i64)),
        Variant::UInt32(v) => var_u64_size(*v as u64),
        Variant::Int64(v) => var_u64_size(zigzag_encode64(*v)),
        Variant::UInt64(v) => var_u64_size(*v),
        Variant::Float(_) => 4,
        Variant::Double(_) => 8,
        Variant::DateTime(v) => v.serialized_size(),
        Variant::String(v) => varstr_size(v),
        Variant::Binary(v) => var_u32_size(v.len() as u32) + v.len(),
        Variant::Clob(_) | Variant::Blob(_) => {
            return Err(DbError::new(
                ErrorCode::InvalidValueType,
                "LOB constants are not serializable in expressions",
            ))
        }
    })
}

fn write_constant_payload(value: &Variant, buf: &mut BytesMut) -> CResult<()> {
    match value {
        Variant::Null => {}
        Variant::Bool(v) => buf.extend_from_slice(&[*v as u8]),
        Variant::Int8(v) => buf.extend_from_slice(&[*v as u8]),
        Variant::UInt8(v) => buf.extend_from_slice(&[*v]),
        Variant::Int16(v) => write_var_u64(zigzag_encode64(*v as i64), buf),
        Variant::UInt16(v) => write_var_u64(*v as u64, buf),
        Variant::Int32(v) => write_var_u64(zigzag_encode64(*v as i64), buf),
        Variant::UInt32(v) => write_var_u64(*v as u64, buf),
        Variant::Int64(v) => write_var_u64(zigzag_encode64(*v), buf),
        Variant::UInt64(v) => write_var_u64(*v, buf),
        Variant::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Variant::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Variant::DateTime(v) => {
            let mut bytes = Vec::with_capacity(v.serialized_size());
            v.serialize_into(&mut bytes);
            buf.extend_from_slice(&bytes);
        }
        Variant::String(v) => write_varstr(v, buf),
        Variant::Binary(v) => {
            write_var_u32(v.len() as u32, buf);
            buf.extend_from_slice(v);
        }
        Variant::Clob(_) | Variant::Blob(_) => {
            return Err(DbError::new(
                ErrorCode::InvalidValueType,
                "LOB constants are not serializable in expressions",
            ))
        }
    }
    Ok(())
}

fn read_constant_payload(value_type: VariantType, input: &mut &[u8]) -> CResult<Variant> {
    Ok(match value_type {
        VariantType::Null => Variant::Null,
        VariantType::Bool => Variant::Bool(take_u8(input)? != 0),
        VariantType::Int8 => Variant::Int8(take_u8(input)? as i8),
        VariantType::UInt8 => Variant::UInt8(take_u8(input)?),
        VariantType::Int16 => Variant::Int16(zigzag_decode64(read_var_u64(input)?) as i16),
        VariantType::UInt16 => Variant::UInt16(read_var_u64(input)? as u16),
        VariantType::Int32 => Variant::Int32(zigzag_decode64(read_var_u64(input)?) as i32),
        VariantType::UInt32 => Variant::UInt32(read_var_u32(input)?),
        VariantType::Int64 => Variant::Int64(zigzag_decode64(read_var_u64(input)?)),
        VariantType::UInt64 => Variant::UInt64(read_var_u64(input)?),
        VariantType::Float => {
            if input.len() < 4 {
                return Err(truncated());
            }
            let (head, tail) = input.split_at(4);
            let value = f32::from_le_bytes([head[0], head[1], head[2], head[3]]);
            *input = tail;
            Variant::Float(value)
        }
        VariantType::Double => {
            if input.len() < 8 {
                return Err(truncated());
            }
            let (head, tail) = input.split_at(8);
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(head);
            *input = tail;
            Variant::Double(f64::from_le_bytes(bytes))
        }
        VariantType::DateTime => Variant::DateTime(RawDateTime::deserialize(input)?),
        VariantType::String => Variant::String(read_varstr(input)?),
        VariantType::Binary => {
            let len = read_var_u32(input)? as usize;
            if input.len() < len {
                return Err(truncated());
            }
            let (head, tail) = input.split_at(len);
            let bytes = head.to_vec();
            *input = tail;
            Variant::Binary(bytes)
        }
        VariantType::Clob | VariantType::Blob => {
            return Err(DbError::new(
                ErrorCode::InvalidValueType,
                "LOB constants are not serializable in expressions",
            ))
        }
    })
}

fn truncated() -> DbError {
    DbError::new(ErrorCode::UnexpectedEndOfFile, "truncated expression")
}
