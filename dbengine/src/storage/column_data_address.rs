use byteorder::{BigEndian, ByteOrder};

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

/// 列值地址：（块id，块内偏移）。
///
/// 主索引的值就是该地址的8字节大端平面编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ColumnDataAddress {
    pub block_id: u32,
    pub offset: u32,
}

/// 平面编码字节数
pub const COLUMN_DATA_ADDRESS_SIZE: usize = 8;

impl ColumnDataAddress {
    pub fn new(block_id: u32, offset: u32) -> Self {
        Self { block_id, offset }
    }

    pub fn to_bytes(self) -> [u8; COLUMN_DATA_ADDRESS_SIZE] {
        let mut buffer = [0u8; COLUMN_DATA_ADDRESS_SIZE];
        BigEndian::write_u32(&mut buffer[..4], self.block_id);
        BigEndian::write_u32(&mut buffer[4..], self.offset);
        buffer
    }

    pub fn from_bytes(bytes: &[u8]) -> CResult<Self> {
        if bytes.len() < COLUMN_DATA_ADDRESS_SIZE {
            return Err(DbError::new(
                ErrorCode::VariantDecodeError,
                "truncated column data address",
            ));
        }
        Ok(Self {
            block_id: BigEndian::read_u32(&bytes[..4]),
            offset: BigEndian::read_u32(&bytes[4..8]),
        })
    }
}

impl std::fmt::Display for ColumnDataAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_id, self.offset)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_plain_encoding_roundtrip() {
        let address = ColumnDataAddress::new(17, 4096);
        let bytes = address.to_bytes();
        assert_eq!(ColumnDataAddress::from_bytes(&bytes).unwrap(), address);
        // 大端序：同一块内偏移增长时字节序一致递增
        let next = ColumnDataAddress::new(17, 4097);
        assert!(next.to_bytes() > bytes);
    }
}
