use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::variant::datetime::RawDateTime;
use crate::variant::lob::{BlobStream, ClobStream};

pub mod codec;
pub mod datetime;
pub mod lob;
pub mod ops;

/// 内联字符串值上限，超过走CLOB流
pub const MAX_STRING_VALUE_LENGTH: usize = 16 * 1024 * 1024;

/// 内联二进制值上限，超过走BLOB流
pub const MAX_BINARY_VALUE_LENGTH: usize = 16 * 1024 * 1024;

/// LOB分片大小
pub const LOB_CHUNK_SIZE: usize = 4096;

/// 值类型标签。列数据类型与运行期值共用同一枚举。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum VariantType {
    Null = 0,
    Bool = 1,
    Int8 = 2,
    UInt8 = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    DateTime = 12,
    String = 13,
    Binary = 14,
    Clob = 15,
    Blob = 16,
}

impl VariantType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            VariantType::Int8
                | VariantType::UInt8
                | VariantType::Int16
                | VariantType::UInt16
                | VariantType::Int32
                | VariantType::UInt32
                | VariantType::Int64
                | VariantType::UInt64
        )
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            VariantType::Int8 | VariantType::Int16 | VariantType::Int32 | VariantType::Int64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, VariantType::Float | VariantType::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// 整数位宽（8/16/32/64）
    pub fn integer_width(self) -> Option<u32> {
        match self {
            VariantType::Int8 | VariantType::UInt8 => Some(8),
            VariantType::Int16 | VariantType::UInt16 => Some(16),
            VariantType::Int32 | VariantType::UInt32 => Some(32),
            VariantType::Int64 | VariantType::UInt64 => Some(64),
            _ => None,
        }
    }

    /// SQL文本名（DESCRIBE/SYS_COLUMNS输出）
    pub fn type_name(self) -> &'static str {
        match self {
            VariantType::Null => "NULL",
            VariantType::Bool => "BOOL",
            VariantType::Int8 => "TINYINT",
            VariantType::UInt8 => "TINYUINT",
            VariantType::Int16 => "SMALLINT",
            VariantType::UInt16 => "SMALLUINT",
            VariantType::Int32 => "INT",
            VariantType::UInt32 => "UINT",
            VariantType::Int64 => "BIGINT",
            VariantType::UInt64 => "BIGUINT",
            VariantType::Float => "REAL",
            VariantType::Double => "DOUBLE",
            VariantType::DateTime => "TIMESTAMP",
            VariantType::String => "TEXT",
            VariantType::Binary => "BINARY",
            VariantType::Clob => "CLOB",
            VariantType::Blob => "BLOB",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        let t = match name.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => VariantType::Bool,
            "TINYINT" => VariantType::Int8,
            "TINYUINT" => VariantType::UInt8,
            "SMALLINT" => VariantType::Int16,
            "SMALLUINT" => VariantType::UInt16,
            "INT" | "INTEGER" => VariantType::Int32,
            "UINT" => VariantType::UInt32,
            "BIGINT" => VariantType::Int64,
            "BIGUINT" => VariantType::UInt64,
            "REAL" | "FLOAT" => VariantType::Float,
            "DOUBLE" => VariantType::Double,
            "TIMESTAMP" | "DATETIME" => VariantType::DateTime,
            "TEXT" | "VARCHAR" | "CHAR" => VariantType::String,
            "BINARY" | "VARBINARY" => VariantType::Binary,
            "CLOB" => VariantType::Clob,
            "BLOB" => VariantType::Blob,
            _ => return None,
        };
        Some(t)
    }
}

/// 运行期值：所有受支持类型的判别联合。
#[derive(Debug)]
pub enum Variant {
    Null,
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    DateTime(RawDateTime),
    String(String),
    Binary(Vec<u8>),
    Clob(ClobStream),
    Blob(BlobStream),
}

impl Variant {
    pub fn value_type(&self) -> VariantType {
        match self {
            Variant::Null => VariantType::Null,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int8(_) => VariantType::Int8,
            Variant::UInt8(_) => VariantType::UInt8,
            Variant::Int16(_) => VariantType::Int16,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::DateTime(_) => VariantType::DateTime,
            Variant::String(_) => VariantType::String,
            Variant::Binary(_) => VariantType::Binary,
            Variant::Clob(_) => VariantType::Clob,
            Variant::Blob(_) => VariantType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn is_integer(&self) -> bool {
        self.value_type().is_integer()
    }

    pub fn is_numeric(&self) -> bool {
        self.value_type().is_numeric()
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Variant::Int8(v) => *v < 0,
            Variant::Int16(v) => *v < 0,
            Variant::Int32(v) => *v < 0,
            Variant::Int64(v) => *v < 0,
            Variant::Float(v) => *v < 0.0,
            Variant::Double(v) => *v < 0.0,
            _ => false,
        }
    }

    pub fn get_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// 无损转换为u64（非负整数）。
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Variant::Int8(v) if *v >= 0 => Some(*v as u64),
            Variant::UInt8(v) => Some(*v as u64),
            Variant::Int16(v) if *v >= 0 => Some(*v as u64),
            Variant::UInt16(v) => Some(*v as u64),
            Variant::Int32(v) if *v >= 0 => Some(*v as u64),
            Variant::UInt32(v) => Some(*v as u64),
            Variant::Int64(v) if *v >= 0 => Some(*v as u64),
            Variant::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Int8(v) => Some(*v as i64),
            Variant::UInt8(v) => Some(*v as i64),
            Variant::Int16(v) => Some(*v as i64),
            Variant::UInt16(v) => Some(*v as i64),
            Variant::Int32(v) => Some(*v as i64),
            Variant::UInt32(v) => Some(*v as i64),
            Variant::Int64(v) => Some(*v),
            Variant::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Float(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64).or_else(|| {
                match other {
                    Variant::UInt64(v) => Some(*v as f64),
                    _ => None,
                }
            }),
        }
    }
}

impl Clone for Variant {
    fn clone(&self) -> Self {
        match self {
            Variant::Null => Variant::Null,
            Variant::Bool(v) => Variant::Bool(*v),
            Variant::Int8(v) => Variant::Int8(*v),
            Variant::UInt8(v) => Variant::UInt8(*v),
            Variant::Int16(v) => Variant::Int16(*v),
            Variant::UInt16(v) => Variant::UInt16(*v),
            Variant::Int32(v) => Variant::Int32(*v),
            Variant::UInt32(v) => Variant::UInt32(*v),
            Variant::Int64(v) => Variant::Int64(*v),
            Variant::UInt64(v) => Variant::UInt64(*v),
            Variant::Float(v) => Variant::Float(*v),
            Variant::Double(v) => Variant::Double(*v),
            Variant::DateTime(v) => Variant::DateTime(*v),
            Variant::String(v) => Variant::String(v.clone()),
            Variant::Binary(v) => Variant::Binary(v.clone()),
            Variant::Clob(v) => Variant::Clob(v.clone()),
            Variant::Blob(v) => Variant::Blob(v.clone()),
        }
    }
}

/// LOB值按引用身份不参与相等比较。
impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Variant::Null, Variant::Null) => true,
            (Variant::Bool(a), Variant::Bool(b)) => a == b,
            (Variant::Int8(a), Variant::Int8(b)) => a == b,
            (Variant::UInt8(a), Variant::UInt8(b)) => a == b,
            (Variant::Int16(a), Variant::Int16(b)) => a == b,
            (Variant::UInt16(a), Variant::UInt16(b)) => a == b,
            (Variant::Int32(a), Variant::Int32(b)) => a == b,
            (Variant::UInt32(a), Variant::UInt32(b)) => a == b,
            (Variant::Int64(a), Variant::Int64(b)) => a == b,
            (Variant::UInt64(a), Variant::UInt64(b)) => a == b,
            (Variant::Float(a), Variant::Float(b)) => a == b,
            (Variant::Double(a), Variant::Double(b)) => a == b,
            (Variant::DateTime(a), Variant::DateTime(b)) => a == b,
            (Variant::String(a), Variant::String(b)) => a == b,
            (Variant::Binary(a), Variant::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

macro_rules! variant_from_prime {
    ($t:ty, $v:ident) => {
        impl From<$t> for Variant {
            fn from(value: $t) -> Self {
                Variant::$v(value)
            }
        }
    };
}

variant_from_prime!(i8, Int8);
variant_from_prime!(u8, UInt8);
variant_from_prime!(i16, Int16);
variant_from_prime!(u16, UInt16);
variant_from_prime!(i32, Int32);
variant_from_prime!(u32, UInt32);
variant_from_prime!(i64, Int64);
variant_from_prime!(u64, UInt64);
variant_from_prime!(f32, Float);
variant_from_prime!(f64, Double);
