use bytes::BytesMut;

use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;

/// varuint64 编码最大字节数
pub const MAX_VAR_U64_SIZE: usize = 10;

/// varuint32 编码最大字节数
pub const MAX_VAR_U32_SIZE: usize = 5;

/// Base-128 varint 编码字节数
pub fn var_u64_size(value: u64) -> usize {
    let mut value = value;
    let mut size = 1;
    while value >= 0x80 {
        value >>= 7;
        size += 1;
    }
    size
}

pub fn var_u32_size(value: u32) -> usize {
    var_u64_size(value as u64)
}

pub fn write_var_u64(value: u64, buf: &mut BytesMut) {
    let mut value = value;
    while value >= 0x80 {
        buf.extend_from_slice(&[(value as u8 & 0x7F) | 0x80]);
        value >>= 7;
    }
    buf.extend_from_slice(&[value as u8]);
}

pub fn write_var_u32(value: u32, buf: &mut BytesMut) {
    write_var_u64(value as u64, buf)
}

/// 从切片头部解码varuint64并前移切片。
pub fn read_var_u64(input: &mut &[u8]) -> CResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VAR_U64_SIZE {
        let byte = *input
            .get(i)
            .ok_or_else(|| DbError::new(ErrorCode::UnexpectedEndOfFile, "truncated varint"))?;
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Ok(result);
        }
        shift += 7;
    }
    Err(DbError::new(
        ErrorCode::VariantDecodeError,
        "varint is too long",
    ))
}

pub fn read_var_u32(input: &mut &[u8]) -> CResult<u32> {
    let value = read_var_u64(input)?;
    u32::try_from(value)
        .map_err(|_| DbError::new(ErrorCode::VariantDecodeError, "varint exceeds 32 bits"))
}

/// zigzag编码：有符号小绝对值映射为短varint
pub fn zigzag_encode64(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode64(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn test_var_u64_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            write_var_u64(value, &mut buf);
            assert_eq!(buf.len(), var_u64_size(value));
            let mut slice = &buf[..];
            assert_eq!(read_var_u64(&mut slice).unwrap(), value);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_truncated_varint_fails() {
        let mut buf = BytesMut::new();
        write_var_u64(u64::MAX, &mut buf);
        let mut slice = &buf[..buf.len() - 1];
        assert!(read_var_u64(&mut slice).is_err());
    }

    #[test]
    fn test_zigzag() {
        for value in [0i64, -1, 1, -2, 2, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode64(zigzag_encode64(value)), value);
        }
        assert_eq!(zigzag_encode64(-1), 1);
        assert_eq!(zigzag_encode64(1), 2);
    }
}
