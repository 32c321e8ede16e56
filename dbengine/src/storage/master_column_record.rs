use bytes::BytesMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use common::codec::{read_var_u32, read_var_u64, write_var_u32, write_var_u64};
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

use crate::storage::column_data_address::{ColumnDataAddress, COLUMN_DATA_ADDRESS_SIZE};

/// 主列记录承载的行操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RowOperation {
    Insert = 0,
    Update = 1,
    /// 墓碑：逻辑删除，引用被删行的主列记录地址
    Delete = 2,
}

/// 主列记录（MCR）。
///
/// 每行一条，写入主列；payload为 (列id, 地址) 对列表，把行TRID绑定到
/// 各非主列值的物理位置。记录地址即行的物理标识。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterColumnRecord {
    pub trid: u64,
    pub transaction_id: u64,
    pub user_id: u32,
    pub operation: RowOperation,
    /// Update/Delete时指向被替换/被删版本的MCR地址
    pub previous_version: Option<ColumnDataAddress>,
    pub column_pairs: Vec<(u64, ColumnDataAddress)>,
}

impl MasterColumnRecord {
    pub fn new_insert(
        trid: u64,
        transaction_id: u64,
        user_id: u32,
        column_pairs: Vec<(u64, ColumnDataAddress)>,
    ) -> Self {
        Self {
            trid,
            transaction_id,
            user_id,
            operation: RowOperation::Insert,
            previous_version: None,
            column_pairs,
        }
    }

    pub fn new_update(
        trid: u64,
        transaction_id: u64,
        user_id: u32,
        previous_version: ColumnDataAddress,
        column_pairs: Vec<(u64, ColumnDataAddress)>,
    ) -> Self {
        Self {
            trid,
            transaction_id,
            user_id,
            operation: RowOperation::Update,
            previous_version: Some(previous_version),
            column_pairs,
        }
    }

    /// 墓碑记录。
    pub fn new_tombstone(
        trid: u64,
        transaction_id: u64,
        user_id: u32,
        previous_version: ColumnDataAddress,
    ) -> Self {
        Self {
            trid,
            transaction_id,
            user_id,
            operation: RowOperation::Delete,
            previous_version: Some(previous_version),
            column_pairs: Vec::new(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.operation == RowOperation::Delete
    }

    /// 格式:
    /// `[op u8][trid varint][txn varint][user varint][prev addr 8B, 仅Update/Delete]`
    /// `[pair_count varint][(column_id varint, block_id varint, offset varint)*]`
    pub fn serialize_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[u8::from(self.operation)]);
        write_var_u64(self.trid, &mut buf);
        write_var_u64(self.transaction_id, &mut buf);
        write_var_u32(self.user_id, &mut buf);
        if self.operation != RowOperation::Insert {
            let previous = self
                .previous_version
                .expect("update/delete record carries previous version");
            buf.extend_from_slice(&previous.to_bytes());
        }
        write_var_u32(self.column_pairs.len() as u32, &mut buf);
        for (column_id, address) in &self.column_pairs {
            write_var_u64(*column_id, &mut buf);
            write_var_u32(address.block_id, &mut buf);
            write_var_u32(address.offset, &mut buf);
        }
        buf.to_vec()
    }

    pub fn deserialize(input: &mut &[u8]) -> CResult<Self> {
        let corrupt = |detail: String| DbError::new(ErrorCode::CorruptMasterColumnRecord, detail);

        let (&op_byte, tail) = input
            .split_first()
            .ok_or_else(|| corrupt("empty master column record".to_string()))?;
        *input = tail;
        let operation = RowOperation::try_from(op_byte)
            .map_err(|_| corrupt(format!("unknown row operation {}", op_byte)))?;

        let trid = read_var_u64(input)
            .map_err(|e| corrupt(format!("bad TRID field: {}", e)))?;
        let transaction_id = read_var_u64(input)
            .map_err(|e| corrupt(format!("bad transaction id field: {}", e)))?;
        let user_id = read_var_u32(input)
            .map_err(|e| corrupt(format!("bad user id field: {}", e)))?;

        let previous_version = if operation != RowOperation::Insert {
            if input.len() < COLUMN_DATA_ADDRESS_SIZE {
                return Err(corrupt("truncated previous version address".to_string()));
            }
            let address = ColumnDataAddress::from_bytes(&input[..COLUMN_DATA_ADDRESS_SIZE])?;
            *input = &input[COLUMN_DATA_ADDRESS_SIZE..];
            Some(address)
        } else {
            None
        };

        let pair_count = read_var_u32(input)
            .map_err(|e| corrupt(format!("bad column pair count: {}", e)))?;
        let mut column_pairs = Vec::with_capacity(pair_count as usize);
        for _ in 0..pair_count {
            let column_id = read_var_u64(input)
                .map_err(|e| corrupt(format!("bad column id: {}", e)))?;
            let block_id = read_var_u32(input)
                .map_err(|e| corrupt(format!("bad block id: {}", e)))?;
            let offset = read_var_u32(input)
                .map_err(|e| corrupt(format!("bad offset: {}", e)))?;
            column_pairs.push((column_id, ColumnDataAddress::new(block_id, offset)));
        }

        Ok(Self {
            trid,
            transaction_id,
            user_id,
            operation,
            previous_version,
            column_pairs,
        })
    }

    pub fn find_column_address(&self, column_id: u64) -> Option<ColumnDataAddress> {
        self.column_pairs
            .iter()
            .find(|(id, _)| *id == column_id)
            .map(|(_, address)| *address)
    }
}
