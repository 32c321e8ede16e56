use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use common::codec::{read_var_u32, read_var_u64, write_var_u32, write_var_u64};
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::variant::{codec as variant_codec, Variant, VariantType};

/// 列约束类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConstraintType {
    NotNull = 1,
    DefaultValue = 2,
}

impl ConstraintType {
    pub fn type_name(self) -> &'static str {
        match self {
            ConstraintType::NotNull => "NOT_NULL",
            ConstraintType::DefaultValue => "DEFAULT_VALUE",
        }
    }
}

/// 单条列约束。默认值约束携带常量值。
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnConstraintRecord {
    pub name: String,
    pub constraint_type: ConstraintType,
    pub value: Option<Variant>,
}

impl ColumnConstraintRecord {
    pub fn not_null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint_type: ConstraintType::NotNull,
            value: None,
        }
    }

    pub fn default_value(name: impl Into<String>, value: Variant) -> Self {
        Self {
            name: name.into(),
            constraint_type: ConstraintType::DefaultValue,
            value: Some(value),
        }
    }
}

/// 列集内一列的描述。列类型不可变，约束可随列集演进。
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub column_id: u64,
    pub name: String,
    pub data_type: VariantType,
    pub constraints: Vec<ColumnConstraintRecord>,
}

impl ColumnInfo {
    pub fn new(column_id: u64, name: impl Into<String>, data_type: VariantType) -> Self {
        Self {
            column_id,
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn is_not_null(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.constraint_type == ConstraintType::NotNull)
    }

    pub fn default_value(&self) -> Option<&Variant> {
        self.constraints
            .iter()
            .find(|c| c.constraint_type == ConstraintType::DefaultValue)
            .and_then(|c| c.value.as_ref())
    }
}

/// 列集：新写入行使用的活动列序列。ADD/DROP/ALTER COLUMN产生新列集。
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSetRecord {
    pub id: u64,
    /// 位置0恒为主列
    pub columns: Vec<ColumnInfo>,
}

impl ColumnSetRecord {
    pub fn new(id: u64, columns: Vec<ColumnInfo>) -> Self {
        Self { id, columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn find_column(&self, name: &str) -> Option<(usize, &ColumnInfo)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }

    pub fn encode_into(&self, buf: &mut BytesMut) -> CResult<()> {
        write_var_u64(self.id, buf);
        write_var_u32(self.columns.len() as u32, buf);
        for column in &self.columns {
            write_var_u64(column.column_id, buf);
            write_varstr(&column.name, buf);
            buf.extend_from_slice(&[u8::from(column.data_type)]);
            write_var_u32(column.constraints.len() as u32, buf);
            for constraint in &column.constraints {
                write_varstr(&constraint.name, buf);
                buf.extend_from_slice(&[u8::from(constraint.constraint_type)]);
                match &constraint.value {
                    None => buf.extend_from_slice(&[0u8]),
                    Some(value) => {
                        buf.extend_from_slice(&[1u8, u8::from(value.value_type())]);
                        let encoded = variant_codec::encode_to_vec(value)?;
                        write_var_u32(encoded.len() as u32, buf);
                        buf.extend_from_slice(&encoded);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn decode(input: &mut &[u8]) -> CResult<Self> {
        let id = read_var_u64(input)?;
        let column_count = read_var_u32(input)? as usize;
        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let column_id = read_var_u64(input)?;
            let name = read_varstr(input)?;
            let data_type = take_type(input)?;
            let constraint_count = read_var_u32(input)? as usize;
            let mut constraints = Vec::with_capacity(constraint_count);
            for _ in 0..constraint_count {
                let constraint_name = read_varstr(input)?;
                let type_byte = take_u8(input)?;
                let constraint_type = ConstraintType::try_from(type_byte).map_err(|_| {
                    DbError::new(
                        ErrorCode::InvalidColumnSet,
                        format!("unknown constraint type {}", type_byte),
                    )
                })?;
                let value = if take_u8(input)? != 0 {
                    let value_type = take_type(input)?;
                    let len = read_var_u32(input)? as usize;
                    if input.len() < len {
                        return Err(truncated());
                    }
                    let (head, tail) = input.split_at(len);
                    let value = variant_codec::decode_from_slice(value_type, head)?;
                    *input = tail;
                    Some(value)
                } else {
                    None
                };
                constraints.push(ColumnConstraintRecord {
                    name: constraint_name,
                    constraint_type,
                    value,
                });
            }
            columns.push(ColumnInfo {
                column_id,
                name,
                data_type,
                constraints,
            });
        }
        Ok(Self { id, columns })
    }
}

fn write_varstr(text: &str, buf: &mut BytesMut) {
    write_var_u32(text.len() as u32, buf);
    buf.extend_from_slice(text.as_bytes());
}

fn read_varstr(input: &mut &[u8]) -> CResult<String> {
    let len = read_var_u32(input)? as usize;
    if input.len() < len {
        return Err(truncated());
    }
    let (head, tail) = input.split_at(len);
    let text = String::from_utf8(head.to_vec())?;
    *input = tail;
    Ok(text)
}

fn take_u8(input: &mut &[u8]) -> CResult<u8> {
    let (&byte, tail) = input.split_first().ok_or_else(truncated)?;
    *input = tail;
    Ok(byte)
}

fn take_type(input: &mut &[u8]) -> CResult<VariantType> {
    let byte = take_u8(input)?;
    VariantType::try_from(byte).map_err(|_| {
        DbError::new(
            ErrorCode::InvalidColumnSet,
            format!("unknown data type {}", byte),
        )
    })
}

fn truncated() -> DbError {
    DbError::new(ErrorCode::InvalidColumnSet, "truncated column set record")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_column_set_roundtrip() {
        let mut info = ColumnInfo::new(2, "C", VariantType::Int32);
        info.constraints.push(ColumnConstraintRecord::not_null("NN_C"));
        info.constraints
            .push(ColumnConstraintRecord::default_value("DEF_C", Variant::Int32(7)));
        let record = ColumnSetRecord::new(
            3,
            vec![ColumnInfo::new(1, "TRID", VariantType::UInt64), info],
        );

        let mut buf = BytesMut::new();
        record.encode_into(&mut buf).unwrap();
        let mut slice = &buf[..];
        let decoded = ColumnSetRecord::decode(&mut slice).unwrap();
        assert!(slice.is_empty());
        assert_eq!(decoded, record);
        assert!(decoded.columns[1].is_not_null());
        assert_eq!(decoded.columns[1].default_value(), Some(&Variant::Int32(7)));
    }
}
