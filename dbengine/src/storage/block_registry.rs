use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use getset::Getters;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{FileStream, InputStream, OutputStream};

use crate::storage::block::ColumnDataBlock;

/// 注册表文件名
pub const BLOCK_REGISTRY_FILE_NAME: &str = "blocks.reg";

/// 块注册表记录：块id -> 物理文件名 + 空闲偏移。
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
pub struct BlockRegistryRecord {
    #[getset(get = "pub")]
    block_id: u32,
    #[getset(get = "pub")]
    free_offset: u32,
    // 文件名: cblk-{version}-{id}.dat
    #[getset(get = "pub")]
    file_name: String,
}

/// 每列一个的追加式注册表文件。
///
/// 记录格式（小端）: `[block_id u32][free_offset u32][name_len u16][name][crc32 u32]`，
/// 同一块的后写记录覆盖先写记录。
#[derive(Debug)]
pub struct BlockRegistry {
    file_path: PathBuf,
    records: BTreeMap<u32, BlockRegistryRecord>,
}

impl BlockRegistry {
    /// 打开或创建注册表，重放全部记录。
    pub fn open(column_dir: &Path) -> CResult<Self> {
        let file_path = column_dir.join(BLOCK_REGISTRY_FILE_NAME);
        let mut records = BTreeMap::new();
        if file_path.exists() {
            let mut stream = FileStream::open(&file_path)?;
            let mut raw = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
            }
            let mut slice = &raw[..];
            while !slice.is_empty() {
                let record = Self::decode_record(&mut slice)?;
                records.insert(record.block_id, record);
            }
        }
        Ok(Self { file_path, records })
    }

    pub fn records(&self) -> &BTreeMap<u32, BlockRegistryRecord> {
        &self.records
    }

    pub fn find(&self, block_id: u32) -> Option<&BlockRegistryRecord> {
        self.records.get(&block_id)
    }

    pub fn highest_block_id(&self) -> Option<u32> {
        self.records.keys().next_back().copied()
    }

    /// 追加一条记录并fsync。
    pub fn put(&mut self, block_id: u32, free_offset: u32) -> CResult<()> {
        let record = BlockRegistryRecord {
            block_id,
            free_offset,
            file_name: ColumnDataBlock::block_file_name(block_id),
        };
        let encoded = Self::encode_record(&record);
        let mut stream = FileStream::append(&self.file_path)?;
        stream.write_all(&encoded)?;
        stream.sync()?;
        self.records.insert(block_id, record);
        Ok(())
    }

    fn encode_record(record: &BlockRegistryRecord) -> Vec<u8> {
        let name = record.file_name.as_bytes();
        let mut buffer = Vec::with_capacity(14 + name.len());
        let mut head = [0u8; 10];
        LittleEndian::write_u32(&mut head[..4], record.block_id);
        LittleEndian::write_u32(&mut head[4..8], record.free_offset);
        LittleEndian::write_u16(&mut head[8..10], name.len() as u16);
        buffer.extend_from_slice(&head);
        buffer.extend_from_slice(name);
        let crc = crc32fast::hash(&buffer);
        let mut tail = [0u8; 4];
        LittleEndian::write_u32(&mut tail, crc);
        buffer.extend_from_slice(&tail);
        buffer
    }

    fn decode_record(slice: &mut &[u8]) -> CResult<BlockRegistryRecord> {
        let corrupt = |detail: &str| {
            DbError::new(
                ErrorCode::CorruptBlockRegistry,
                format!("corrupt block registry: {}", detail),
            )
        };
        if slice.len() < 10 {
            return Err(corrupt("truncated record header"));
        }
        let block_id = LittleEndian::read_u32(&slice[..4]);
        let free_offset = LittleEndian::read_u32(&slice[4..8]);
        let name_len = LittleEndian::read_u16(&slice[8..10]) as usize;
        if slice.len() < 10 + name_len + 4 {
            return Err(corrupt("truncated record body"));
        }
        let payload = &slice[..10 + name_len];
        let stored_crc = LittleEndian::read_u32(&slice[10 + name_len..14 + name_len]);
        if crc32fast::hash(payload) != stored_crc {
            return Err(corrupt("record checksum mismatch"));
        }
        let file_name = String::from_utf8(slice[10..10 + name_len].to_vec())
            .map_err(|_| corrupt("record file name is not UTF-8"))?;
        *slice = &slice[14 + name_len..];
        Ok(BlockRegistryRecord {
            block_id,
            free_offset,
            file_name,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_put_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut registry = BlockRegistry::open(dir.path()).unwrap();
            registry.put(1, 0).unwrap();
            registry.put(1, 128).unwrap();
            registry.put(2, 0).unwrap();
        }
        let registry = BlockRegistry::open(dir.path()).unwrap();
        assert_eq!(registry.records().len(), 2);
        assert_eq!(registry.find(1).unwrap().free_offset, 128);
        assert_eq!(registry.highest_block_id(), Some(2));
        assert_eq!(
            registry.find(2).unwrap().file_name,
            ColumnDataBlock::block_file_name(2)
        );
    }

    #[test]
    fn test_corrupt_record_detected() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut registry = BlockRegistry::open(dir.path()).unwrap();
            registry.put(1, 64).unwrap();
        }
        let path = dir.path().join(BLOCK_REGISTRY_FILE_NAME);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(BlockRegistry::open(dir.path()).is_err());
    }
}
