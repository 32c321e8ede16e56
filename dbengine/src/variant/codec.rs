use common::codec::{var_u32_size, var_u64_size, CodedInputStream, CodedOutputStream};
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::variant::datetime::RawDateTime;
use crate::variant::lob::{BlobStream, ClobStream};
use crate::variant::{
    Variant, VariantType, LOB_CHUNK_SIZE, MAX_BINARY_VALUE_LENGTH, MAX_STRING_VALUE_LENGTH,
};

/// 值的线上/盘上编码字节数。NULL不占值槽位（由行null掩码表达）。
pub fn serialized_size(value: &Variant) -> CResult<u64> {
    Ok(match value {
        Variant::Null => 0,
        Variant::Bool(_) | Variant::Int8(_) | Variant::UInt8(_) => 1,
        Variant::Int16(_) | Variant::UInt16(_) => 2,
        Variant::Int32(v) => var_u32_size(*v as u32) as u64,
        Variant::UInt32(v) => var_u32_size(*v) as u64,
        Variant::Int64(v) => var_u64_size(*v as u64) as u64,
        Variant::UInt64(v) => var_u64_size(*v) as u64,
        Variant::Float(_) => 4,
        Variant::Double(_) => 8,
        Variant::DateTime(v) => v.serialized_size() as u64,
        Variant::String(v) => var_u32_size(v.len() as u32) as u64 + v.len() as u64,
        Variant::Binary(v) => var_u32_size(v.len() as u32) as u64 + v.len() as u64,
        Variant::Clob(v) => {
            let size = v.remaining_size();
            check_lob_size(size, MAX_STRING_VALUE_LENGTH)?;
            var_u32_size(size as u32) as u64 + size
        }
        Variant::Blob(v) => {
            let size = v.remaining_size();
            check_lob_size(size, MAX_BINARY_VALUE_LENGTH)?;
            var_u32_size(size as u32) as u64 + size
        }
    })
}

fn check_lob_size(size: u64, limit: usize) -> CResult<()> {
    if size > limit as u64 {
        return Err(DbError::new(
            ErrorCode::ValueOutOfRange,
            format!("LOB size {} exceeds maximum {}", size, limit),
        ));
    }
    Ok(())
}

/// 写值。与 serialized_size 严格一致。
pub fn write_variant(value: &Variant, out: &mut CodedOutputStream<'_>) -> CResult<()> {
    match value {
        Variant::Null => Ok(()),
        Variant::Bool(v) => out.write_u8(*v as u8),
        Variant::Int8(v) => out.write_u8(*v as u8),
        Variant::UInt8(v) => out.write_u8(*v),
        Variant::Int16(v) => out.write_u16_le(*v as u16),
        Variant::UInt16(v) => out.write_u16_le(*v),
        Variant::Int32(v) => out.write_varint32(*v as u32),
        Variant::UInt32(v) => out.write_varint32(*v),
        Variant::Int64(v) => out.write_varint64(*v as u64),
        Variant::UInt64(v) => out.write_varint64(*v),
        Variant::Float(v) => out.write_f32_le(*v),
        Variant::Double(v) => out.write_f64_le(*v),
        Variant::DateTime(v) => {
            let mut buffer = Vec::with_capacity(v.serialized_size());
            v.serialize_into(&mut buffer);
            out.write_raw(&buffer)
        }
        Variant::String(v) => {
            out.write_varint32(v.len() as u32)?;
            out.write_raw(v.as_bytes())
        }
        Variant::Binary(v) => {
            out.write_varint32(v.len() as u32)?;
            out.write_raw(v)
        }
        Variant::Clob(v) => {
            let mut stream = v.clone();
            write_lob(stream.remaining_size(), MAX_STRING_VALUE_LENGTH, out, |buf| {
                stream.read(buf)
            })
        }
        Variant::Blob(v) => {
            let mut stream = v.clone();
            write_lob(stream.remaining_size(), MAX_BINARY_VALUE_LENGTH, out, |buf| {
                stream.read(buf)
            })
        }
    }
}

fn write_lob(
    size: u64,
    limit: usize,
    out: &mut CodedOutputStream<'_>,
    mut read: impl FnMut(&mut [u8]) -> CResult<usize>,
) -> CResult<()> {
    check_lob_size(size, limit)?;
    out.write_varint32(size as u32)?;
    let mut chunk = [0u8; LOB_CHUNK_SIZE];
    let mut remaining = size;
    while remaining > 0 {
        let to_read = std::cmp::min(remaining, LOB_CHUNK_SIZE as u64) as usize;
        let n = read(&mut chunk[..to_read])?;
        if n == 0 {
            return Err(DbError::new(
                ErrorCode::UnexpectedEndOfFile,
                "LOB stream ended prematurely",
            ));
        }
        out.write_raw(&chunk[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// 读值。截断输入报解码错误。
pub fn read_variant(data_type: VariantType, input: &mut CodedInputStream<'_>) -> CResult<Variant> {
    Ok(match data_type {
        VariantType::Null => Variant::Null,
        VariantType::Bool => Variant::Bool(input.read_u8()? != 0),
        VariantType::Int8 => Variant::Int8(input.read_u8()? as i8),
        VariantType::UInt8 => Variant::UInt8(input.read_u8()?),
        VariantType::Int16 => Variant::Int16(input.read_u16_le()? as i16),
        VariantType::UInt16 => Variant::UInt16(input.read_u16_le()?),
        VariantType::Int32 => Variant::Int32(input.read_varint32()? as i32),
        VariantType::UInt32 => Variant::UInt32(input.read_varint32()?),
        VariantType::Int64 => Variant::Int64(input.read_varint64()? as i64),
        VariantType::UInt64 => Variant::UInt64(input.read_varint64()?),
        VariantType::Float => Variant::Float(input.read_f32_le()?),
        VariantType::Double => Variant::Double(input.read_f64_le()?),
        VariantType::DateTime => {
            let mut head = [0u8; crate::variant::datetime::DATE_SERIALIZED_SIZE];
            input.read_raw(&mut head)?;
            let mut buffer = head.to_vec();
            if head[0] & 0x01 != 0 {
                let mut tail = [0u8; crate::variant::datetime::DATETIME_SERIALIZED_SIZE
                    - crate::variant::datetime::DATE_SERIALIZED_SIZE];
                input.read_raw(&mut tail)?;
                buffer.extend_from_slice(&tail);
            }
            let mut slice = &buffer[..];
            Variant::DateTime(RawDateTime::deserialize(&mut slice)?)
        }
        VariantType::String => {
            let len = input.read_varint32()? as usize;
            if len > MAX_STRING_VALUE_LENGTH {
                return Err(DbError::new(
                    ErrorCode::ValueOutOfRange,
                    "string value too long",
                ));
            }
            let mut buffer = vec![0u8; len];
            input.read_raw(&mut buffer)?;
            Variant::String(String::from_utf8(buffer)?)
        }
        VariantType::Binary => {
            let len = input.read_varint32()? as usize;
            if len > MAX_BINARY_VALUE_LENGTH {
                return Err(DbError::new(
                    ErrorCode::ValueOutOfRange,
                    "binary value too long",
                ));
            }
            let mut buffer = vec![0u8; len];
            input.read_raw(&mut buffer)?;
            Variant::Binary(buffer)
        }
        VariantType::Clob => {
            let len = input.read_varint32()? as usize;
            if len > MAX_STRING_VALUE_LENGTH {
                return Err(DbError::new(ErrorCode::ValueOutOfRange, "CLOB too long"));
            }
            let mut buffer = vec![0u8; len];
            input.read_raw(&mut buffer)?;
            Variant::Clob(ClobStream::from_string(String::from_utf8(buffer)?))
        }
        VariantType::Blob => {
            let len = input.read_varint32()? as usize;
            if len > MAX_BINARY_VALUE_LENGTH {
                return Err(DbError::new(ErrorCode::ValueOutOfRange, "BLOB too long"));
            }
            let mut buffer = vec![0u8; len];
            input.read_raw(&mut buffer)?;
            Variant::Blob(BlobStream::from_binary(buffer))
        }
    })
}

/// 值编码为独立缓冲。
pub fn encode_to_vec(value: &Variant) -> CResult<Vec<u8>> {
    let mut sink = common::io::DynamicMemoryOutputStream::default();
    {
        let mut coded = CodedOutputStream::new(&mut sink);
        write_variant(value, &mut coded)?;
    }
    Ok(sink.into_inner())
}

/// 从字节缓冲解码值。
pub fn decode_from_slice(data_type: VariantType, data: &[u8]) -> CResult<Variant> {
    let mut source = common::io::MemoryInputStream::new(data.to_vec());
    let mut coded = CodedInputStream::new(&mut source);
    read_variant(data_type, &mut coded)
}
