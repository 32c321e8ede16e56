use common::err::CResult;
use common::io::JsonWriter;

use crate::variant::{Variant, LOB_CHUNK_SIZE};

/// 值的JSON形态：CLOB按4KiB分片转义输出，BLOB输出小写十六进制。
pub fn write_variant_json(value: &Variant, writer: &mut JsonWriter<'_>) -> CResult<()> {
    match value {
        Variant::Null => writer.write_null_value(),
        Variant::Bool(v) => writer.write_bool_value(*v),
        Variant::Int8(v) => writer.write_i64_value(*v as i64),
        Variant::UInt8(v) => writer.write_u64_value(*v as u64),
        Variant::Int16(v) => writer.write_i64_value(*v as i64),
        Variant::UInt16(v) => writer.write_u64_value(*v as u64),
        Variant::Int32(v) => writer.write_i64_value(*v as i64),
        Variant::UInt32(v) => writer.write_u64_value(*v as u64),
        Variant::Int64(v) => writer.write_i64_value(*v),
        Variant::UInt64(v) => writer.write_u64_value(*v),
        Variant::Float(v) => writer.write_f32_value(*v),
        Variant::Double(v) => writer.write_f64_value(*v),
        Variant::DateTime(v) => writer.write_string_value(&v.to_string()),
        Variant::String(v) => writer.write_string_value(v),
        Variant::Binary(v) => {
            writer.write_double_quote()?;
            writer.write_bytes(hex::encode(v).as_bytes())?;
            writer.write_double_quote()
        }
        Variant::Clob(v) => {
            let mut stream = v.clone();
            let mut chunk = [0u8; LOB_CHUNK_SIZE];
            writer.write_double_quote()?;
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                writer.write_raw_string(&chunk[..n])?;
            }
            writer.write_double_quote()
        }
        Variant::Blob(v) => {
            let mut stream = v.clone();
            let mut chunk = [0u8; LOB_CHUNK_SIZE];
            writer.write_double_quote()?;
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                writer.write_bytes(hex::encode(&chunk[..n]).as_bytes())?;
            }
            writer.write_double_quote()
        }
    }
}
