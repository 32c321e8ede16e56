use std::cmp::Ordering;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::variant::datetime::RawDateTime;
use crate::variant::{Variant, VariantType};

/// 数值类型提升。
///
/// - 同符号整数提升到较宽者
/// - 混合符号提升到下一档更宽的有符号类型（u8+u16 -> i32），封顶Int64
/// - 任一浮点操作数强制 Float/Double
pub fn promote_numeric_types(a: VariantType, b: VariantType) -> CResult<VariantType> {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(DbError::new(
            ErrorCode::ValueTypeMismatch,
            format!("cannot promote {:?} and {:?}", a, b),
        ));
    }

    if a == VariantType::Double || b == VariantType::Double {
        return Ok(VariantType::Double);
    }
    if a == VariantType::Float || b == VariantType::Float {
        let other = if a == VariantType::Float { b } else { a };
        // 64位整数与Float混合时用Double保精度
        if other.integer_width() == Some(64) {
            return Ok(VariantType::Double);
        }
        return Ok(VariantType::Float);
    }

    let wa = a.integer_width().unwrap();
    let wb = b.integer_width().unwrap();
    let width = wa.max(wb);
    let signed_a = a.is_signed_integer();
    let signed_b = b.is_signed_integer();

    if signed_a == signed_b {
        return Ok(integer_type(width, signed_a));
    }

    // 混合符号：下一档更宽的有符号类型
    let promoted_width = (width * 2).min(64);
    Ok(integer_type(promoted_width, true))
}

fn integer_type(width: u32, signed: bool) -> VariantType {
    match (width, signed) {
        (8, true) => VariantType::Int8,
        (8, false) => VariantType::UInt8,
        (16, true) => VariantType::Int16,
        (16, false) => VariantType::UInt16,
        (32, true) => VariantType::Int32,
        (32, false) => VariantType::UInt32,
        (64, true) => VariantType::Int64,
        _ => VariantType::UInt64,
    }
}

fn to_i128(value: &Variant) -> Option<i128> {
    match value {
        Variant::Int8(v) => Some(*v as i128),
        Variant::UInt8(v) => Some(*v as i128),
        Variant::Int16(v) => Some(*v as i128),
        Variant::UInt16(v) => Some(*v as i128),
        Variant::Int32(v) => Some(*v as i128),
        Variant::UInt32(v) => Some(*v as i128),
        Variant::Int64(v) => Some(*v as i128),
        Variant::UInt64(v) => Some(*v as i128),
        _ => None,
    }
}

/// 构造指定整数类型的值，越界报错。
pub fn make_integer_variant(target: VariantType, value: i128) -> CResult<Variant> {
    let out_of_range = || {
        DbError::new(
            ErrorCode::ValueOutOfRange,
            format!("value {} does not fit into {:?}", value, target),
        )
    };
    Ok(match target {
        VariantType::Int8 => Variant::Int8(i8::try_from(value).map_err(|_| out_of_range())?),
        VariantType::UInt8 => Variant::UInt8(u8::try_from(value).map_err(|_| out_of_range())?),
        VariantType::Int16 => Variant::Int16(i16::try_from(value).map_err(|_| out_of_range())?),
        VariantType::UInt16 => Variant::UInt16(u16::try_from(value).map_err(|_| out_of_range())?),
        VariantType::Int32 => Variant::Int32(i32::try_from(value).map_err(|_| out_of_range())?),
        VariantType::UInt32 => Variant::UInt32(u32::try_from(value).map_err(|_| out_of_range())?),
        VariantType::Int64 => Variant::Int64(i64::try_from(value).map_err(|_| out_of_range())?),
        VariantType::UInt64 => Variant::UInt64(u64::try_from(value).map_err(|_| out_of_range())?),
        _ => {
            return Err(DbError::new(
                ErrorCode::InvalidValueType,
                format!("{:?} is not an integer type", target),
            ))
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// 二元算术。NULL操作数传播NULL。
pub fn arithmetic(op: ArithmeticOp, a: &Variant, b: &Variant) -> CResult<Variant> {
    if a.is_null() || b.is_null() {
        return Ok(Variant::Null);
    }
    let result_type = promote_numeric_types(a.value_type(), b.value_type())?;

    if result_type.is_float() {
        let x = a.as_f64().ok_or_else(type_mismatch)?;
        let y = b.as_f64().ok_or_else(type_mismatch)?;
        if matches!(op, ArithmeticOp::Divide | ArithmeticOp::Modulo) && y == 0.0 {
            return Err(division_by_zero());
        }
        let value = match op {
            ArithmeticOp::Add => x + y,
            ArithmeticOp::Subtract => x - y,
            ArithmeticOp::Multiply => x * y,
            ArithmeticOp::Divide => x / y,
            ArithmeticOp::Modulo => x % y,
        };
        return Ok(if result_type == VariantType::Float {
            Variant::Float(value as f32)
        } else {
            Variant::Double(value)
        });
    }

    let x = to_i128(a).ok_or_else(type_mismatch)?;
    let y = to_i128(b).ok_or_else(type_mismatch)?;
    if matches!(op, ArithmeticOp::Divide | ArithmeticOp::Modulo) && y == 0 {
        return Err(division_by_zero());
    }
    let value = match op {
        ArithmeticOp::Add => x.checked_add(y),
        ArithmeticOp::Subtract => x.checked_sub(y),
        ArithmeticOp::Multiply => x.checked_mul(y),
        ArithmeticOp::Divide => x.checked_div(y),
        ArithmeticOp::Modulo => x.checked_rem(y),
    }
    .ok_or_else(|| DbError::new(ErrorCode::ValueOutOfRange, "arithmetic overflow"))?;
    make_integer_variant(result_type, value)
}

fn type_mismatch() -> DbError {
    DbError::new(ErrorCode::ValueTypeMismatch, "operand is not numeric")
}

fn division_by_zero() -> DbError {
    DbError::new(ErrorCode::InvalidExpression, "division by zero")
}

/// 一元负号。无符号值提升为下一档有符号类型。
pub fn negate(value: &Variant) -> CResult<Variant> {
    if value.is_null() {
        return Ok(Variant::Null);
    }
    match value {
        Variant::Float(v) => Ok(Variant::Float(-v)),
        Variant::Double(v) => Ok(Variant::Double(-v)),
        other => {
            let x = to_i128(other).ok_or_else(type_mismatch)?;
            let t = other.value_type();
            let target = if t.is_signed_integer() {
                t
            } else {
                integer_type((t.integer_width().unwrap() * 2).min(64), true)
            };
            make_integer_variant(target, -x)
        }
    }
}

pub fn unary_plus(value: &Variant) -> CResult<Variant> {
    if value.is_null() {
        return Ok(Variant::Null);
    }
    if !value.is_numeric() {
        return Err(type_mismatch());
    }
    Ok(value.clone())
}

/// 按位取反。仅整数。
pub fn bitwise_complement(value: &Variant) -> CResult<Variant> {
    if value.is_null() {
        return Ok(Variant::Null);
    }
    Ok(match value {
        Variant::Int8(v) => Variant::Int8(!v),
        Variant::UInt8(v) => Variant::UInt8(!v),
        Variant::Int16(v) => Variant::Int16(!v),
        Variant::UInt16(v) => Variant::UInt16(!v),
        Variant::Int32(v) => Variant::Int32(!v),
        Variant::UInt32(v) => Variant::UInt32(!v),
        Variant::Int64(v) => Variant::Int64(!v),
        Variant::UInt64(v) => Variant::UInt64(!v),
        _ => {
            return Err(DbError::new(
                ErrorCode::ValueTypeMismatch,
                "bitwise operand must be an integer",
            ))
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Or,
    Xor,
    LeftShift,
    RightShift,
}

/// 位运算。仅整数操作数；结果类型取较宽者。
pub fn bitwise(op: BitwiseOp, a: &Variant, b: &Variant) -> CResult<Variant> {
    if a.is_null() || b.is_null() {
        return Ok(Variant::Null);
    }
    let ta = a.value_type();
    let tb = b.value_type();
    if !ta.is_integer() || !tb.is_integer() {
        return Err(DbError::new(
            ErrorCode::ValueTypeMismatch,
            "bitwise operand must be an integer",
        ));
    }
    let result_type = if ta.integer_width() >= tb.integer_width() {
        ta
    } else {
        tb
    };
    let x = to_i128(a).unwrap();
    let y = to_i128(b).unwrap();
    let value = match op {
        BitwiseOp::And => x & y,
        BitwiseOp::Or => x | y,
        BitwiseOp::Xor => x ^ y,
        BitwiseOp::LeftShift => {
            let shift = u32::try_from(y)
                .ok()
                .filter(|s| *s < 64)
                .ok_or_else(|| DbError::new(ErrorCode::ValueOutOfRange, "invalid shift amount"))?;
            x << shift
        }
        BitwiseOp::RightShift => {
            let shift = u32::try_from(y)
                .ok()
                .filter(|s| *s < 64)
                .ok_or_else(|| DbError::new(ErrorCode::ValueOutOfRange, "invalid shift amount"))?;
            x >> shift
        }
    };
    // 位运算回绕到结果类型宽度
    let masked = mask_to_type(result_type, value);
    make_integer_variant(result_type, masked)
}

fn mask_to_type(target: VariantType, value: i128) -> i128 {
    match target {
        VariantType::Int8 => value as i8 as i128,
        VariantType::UInt8 => value as u8 as i128,
        VariantType::Int16 => value as i16 as i128,
        VariantType::UInt16 => value as u16 as i128,
        VariantType::Int32 => value as i32 as i128,
        VariantType::UInt32 => value as u32 as i128,
        VariantType::Int64 => value as i64 as i128,
        _ => value as u64 as i128,
    }
}

/// 比较。任一NULL返回None；数值跨类型先提升；字符串按原始字节；
/// 日期与字符串比较时解析字符串，格式非法报错。
pub fn compare(a: &Variant, b: &Variant) -> CResult<Option<Ordering>> {
    if a.is_null() || b.is_null() {
        return Ok(None);
    }
    match (a, b) {
        (Variant::Bool(x), Variant::Bool(y)) => Ok(Some(x.cmp(y))),
        (Variant::String(x), Variant::String(y)) => Ok(Some(x.as_bytes().cmp(y.as_bytes()))),
        (Variant::Binary(x), Variant::Binary(y)) => Ok(Some(x.cmp(y))),
        (Variant::DateTime(x), Variant::DateTime(y)) => Ok(x.partial_cmp(y)),
        (Variant::DateTime(x), Variant::String(y)) => {
            let parsed = RawDateTime::parse(y)?;
            Ok(x.partial_cmp(&parsed))
        }
        (Variant::String(x), Variant::DateTime(y)) => {
            let parsed = RawDateTime::parse(x)?;
            Ok(parsed.partial_cmp(y))
        }
        _ => {
            let result_type = promote_numeric_types(a.value_type(), b.value_type())?;
            if result_type.is_float() {
                let x = a.as_f64().ok_or_else(type_mismatch)?;
                let y = b.as_f64().ok_or_else(type_mismatch)?;
                x.partial_cmp(&y)
                    .map(Some)
                    .ok_or_else(|| DbError::new(ErrorCode::ValueTypeMismatch, "NaN comparison"))
            } else {
                let x = to_i128(a).ok_or_else(type_mismatch)?;
                let y = to_i128(b).ok_or_else(type_mismatch)?;
                Ok(Some(x.cmp(&y)))
            }
        }
    }
}

/// 拼接用的默认字符串表示：float取7位、double取16位小数，日期用标准格式。
pub fn coerce_to_string(value: &Variant) -> CResult<String> {
    Ok(match value {
        Variant::Null => {
            return Err(DbError::new(
                ErrorCode::InvalidValueType,
                "NULL has no string representation",
            ))
        }
        Variant::Bool(v) => if *v { "true" } else { "false" }.to_string(),
        Variant::Int8(v) => v.to_string(),
        Variant::UInt8(v) => v.to_string(),
        Variant::Int16(v) => v.to_string(),
        Variant::UInt16(v) => v.to_string(),
        Variant::Int32(v) => v.to_string(),
        Variant::UInt32(v) => v.to_string(),
        Variant::Int64(v) => v.to_string(),
        Variant::UInt64(v) => v.to_string(),
        Variant::Float(v) => format!("{:.7}", v),
        Variant::Double(v) => format!("{:.16}", v),
        Variant::DateTime(v) => v.to_string(),
        Variant::String(v) => v.clone(),
        Variant::Binary(v) => hex::encode(v),
        Variant::Clob(v) => v.clone().read_as_string()?,
        Variant::Blob(v) => hex::encode(v.clone().read_to_end()?),
    })
}

/// 拼接。NULL操作数传播NULL。
pub fn concat(a: &Variant, b: &Variant) -> CResult<Variant> {
    if a.is_null() || b.is_null() {
        return Ok(Variant::Null);
    }
    let mut text = coerce_to_string(a)?;
    text.push_str(&coerce_to_string(b)?);
    Ok(Variant::String(text))
}

/// 显式CAST。有损转换（浮点转整、宽转窄）仅在值可容纳时成功。
pub fn cast_variant(value: &Variant, target: VariantType) -> CResult<Variant> {
    if value.is_null() || target == VariantType::Null {
        return Ok(Variant::Null);
    }
    let source_type = value.value_type();
    if source_type == target {
        return Ok(value.clone());
    }

    let cast_err = |detail: &str| {
        DbError::new(
            ErrorCode::CannotCastValue,
            format!("cannot cast {:?} to {:?}: {}", source_type, target, detail),
        )
    };

    // 整数目标
    if target.is_integer() {
        if let Some(x) = to_i128(value) {
            return make_integer_variant(target, x);
        }
        return match value {
            Variant::Float(v) => make_integer_variant(target, v.trunc() as i128),
            Variant::Double(v) => make_integer_variant(target, v.trunc() as i128),
            Variant::Bool(v) => make_integer_variant(target, *v as i128),
            Variant::String(s) => {
                let parsed: i128 = s.trim().parse().map_err(|_| cast_err("not an integer"))?;
                make_integer_variant(target, parsed)
            }
            _ => Err(cast_err("unsupported source")),
        };
    }

    match target {
        VariantType::Float | VariantType::Double => {
            let x = match value {
                Variant::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| cast_err("not a number"))?,
                other => other.as_f64().ok_or_else(|| cast_err("not numeric"))?,
            };
            Ok(if target == VariantType::Float {
                Variant::Float(x as f32)
            } else {
                Variant::Double(x)
            })
        }
        VariantType::Bool => match value {
            Variant::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Variant::Bool(true)),
                "false" | "0" => Ok(Variant::Bool(false)),
                _ => Err(cast_err("not a boolean")),
            },
            other => match to_i128(other) {
                Some(0) => Ok(Variant::Bool(false)),
                Some(1) => Ok(Variant::Bool(true)),
                _ => Err(cast_err("not a boolean")),
            },
        },
        VariantType::String => Ok(Variant::String(coerce_to_string(value)?)),
        VariantType::DateTime => match value {
            Variant::String(s) => Ok(Variant::DateTime(RawDateTime::parse(s)?)),
            _ => Err(cast_err("unsupported source")),
        },
        VariantType::Binary => match value {
            Variant::String(s) => Ok(Variant::Binary(s.clone().into_bytes())),
            Variant::Blob(b) => Ok(Variant::Binary(b.clone().read_to_end()?)),
            _ => Err(cast_err("unsupported source")),
        },
        VariantType::Clob => match value {
            Variant::String(s) => Ok(Variant::Clob(crate::variant::lob::ClobStream::from_string(
                s.clone(),
            ))),
            _ => Err(cast_err("unsupported source")),
        },
        VariantType::Blob => match value {
            Variant::Binary(b) => Ok(Variant::Blob(crate::variant::lob::BlobStream::from_binary(
                b.clone(),
            ))),
            _ => Err(cast_err("unsupported source")),
        },
        _ => Err(cast_err("unsupported target")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_promotion_same_signedness() {
        assert_eq!(
            promote_numeric_types(VariantType::Int8, VariantType::Int32).unwrap(),
            VariantType::Int32
        );
        assert_eq!(
            promote_numeric_types(VariantType::UInt16, VariantType::UInt64).unwrap(),
            VariantType::UInt64
        );
    }

    #[test]
    fn test_promotion_mixed_signedness() {
        assert_eq!(
            promote_numeric_types(VariantType::UInt8, VariantType::UInt16).unwrap(),
            VariantType::UInt16
        );
        assert_eq!(
            promote_numeric_types(VariantType::UInt8, VariantType::Int16).unwrap(),
            VariantType::Int32
        );
        assert_eq!(
            promote_numeric_types(VariantType::UInt64, VariantType::Int8).unwrap(),
            VariantType::Int64
        );
    }

    #[test]
    fn test_promotion_floats() {
        assert_eq!(
            promote_numeric_types(VariantType::Float, VariantType::Int16).unwrap(),
            VariantType::Float
        );
        assert_eq!(
            promote_numeric_types(VariantType::Float, VariantType::UInt64).unwrap(),
            VariantType::Double
        );
        assert_eq!(
            promote_numeric_types(VariantType::Double, VariantType::Float).unwrap(),
            VariantType::Double
        );
    }

    #[test]
    fn test_arithmetic() {
        let v = arithmetic(ArithmeticOp::Add, &Variant::from(1i32), &Variant::from(2i32)).unwrap();
        assert_eq!(v, Variant::Int32(3));
        let v = arithmetic(ArithmeticOp::Add, &Variant::from(1u8), &Variant::from(2i16)).unwrap();
        assert_eq!(v, Variant::Int32(3));
        let v =
            arithmetic(ArithmeticOp::Multiply, &Variant::from(2.0f64), &Variant::from(3i32))
                .unwrap();
        assert_eq!(v, Variant::Double(6.0));
        assert!(arithmetic(ArithmeticOp::Divide, &Variant::from(1i32), &Variant::from(0i32))
            .is_err());
        assert_eq!(
            arithmetic(ArithmeticOp::Add, &Variant::Null, &Variant::from(1i32)).unwrap(),
            Variant::Null
        );
    }

    #[test]
    fn test_negate() {
        assert_eq!(negate(&Variant::from(5i32)).unwrap(), Variant::Int32(-5));
        assert_eq!(negate(&Variant::from(5u8)).unwrap(), Variant::Int16(-5));
    }

    #[test]
    fn test_bitwise() {
        let v = bitwise(BitwiseOp::And, &Variant::from(0b1100u8), &Variant::from(0b1010u8))
            .unwrap();
        assert_eq!(v, Variant::UInt8(0b1000));
        let v = bitwise(BitwiseOp::LeftShift, &Variant::from(1u32), &Variant::from(4u8)).unwrap();
        assert_eq!(v, Variant::UInt32(16));
        assert!(bitwise(BitwiseOp::Or, &Variant::from(1.5f32), &Variant::from(1u8)).is_err());
    }

    #[test]
    fn test_compare() {
        assert_eq!(
            compare(&Variant::from(1i32), &Variant::from(2u8)).unwrap(),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&Variant::from("abc"), &Variant::from("abd")).unwrap(),
            Some(Ordering::Less)
        );
        assert_eq!(compare(&Variant::Null, &Variant::from(1i32)).unwrap(), None);
        let d1 = Variant::DateTime(RawDateTime::date(2020, 1, 1));
        assert_eq!(
            compare(&d1, &Variant::from("2021-01-01")).unwrap(),
            Some(Ordering::Less)
        );
        assert!(compare(&d1, &Variant::from("garbage")).is_err());
    }

    #[test]
    fn test_concat() {
        let v = concat(&Variant::from("id="), &Variant::from(7i32)).unwrap();
        assert_eq!(v, Variant::String("id=7".to_string()));
        assert_eq!(
            concat(&Variant::from("x"), &Variant::Null).unwrap(),
            Variant::Null
        );
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            cast_variant(&Variant::from(300i32), VariantType::Int16).unwrap(),
            Variant::Int16(300)
        );
        assert!(cast_variant(&Variant::from(300i32), VariantType::Int8).is_err());
        assert_eq!(
            cast_variant(&Variant::from(2.9f64), VariantType::Int32).unwrap(),
            Variant::Int32(2)
        );
        assert_eq!(
            cast_variant(&Variant::from("42"), VariantType::Int64).unwrap(),
            Variant::Int64(42)
        );
        assert_eq!(
            cast_variant(&Variant::from(42i32), VariantType::String).unwrap(),
            Variant::String("42".to_string())
        );
    }
}
