use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{FileStream, InputStream, OutputStream};

use crate::storage::cipher::Cipher;

/// 块文件默认容量
pub const DEFAULT_BLOCK_CAPACITY: u32 = 256 * 1024;

/// 块文件名前缀: cblk-{version}-{id}.dat
pub const BLOCK_FILE_PRE: &str = "cblk";

/// 块文件格式版本
pub const BLOCK_FILE_VERSION: u32 = 1;

/// 列数据块：定容追加文件，内容为连续变长字节记录。
///
/// 追加只改内存镜像并置脏标志；flush整块过加密落盘。
/// 已发布空闲水位之下的字节不可变，读取无需加锁底层文件。
pub struct ColumnDataBlock {
    id: u32,
    file_path: PathBuf,
    capacity: u32,
    data: Vec<u8>,
    dirty: bool,
    cipher: Arc<dyn Cipher>,
}

impl ColumnDataBlock {
    pub fn block_file_name(id: u32) -> String {
        format!("{}-{}-{}.dat", BLOCK_FILE_PRE, BLOCK_FILE_VERSION, id)
    }

    /// 新建空块。文件在首次flush时出现。
    pub fn create(dir: &Path, id: u32, capacity: u32, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            id,
            file_path: dir.join(Self::block_file_name(id)),
            capacity,
            data: Vec::new(),
            dirty: false,
            cipher,
        }
    }

    /// 从盘加载，截断到注册表记录的空闲水位。
    pub fn load(
        dir: &Path,
        id: u32,
        capacity: u32,
        free_offset: u32,
        cipher: Arc<dyn Cipher>,
    ) -> CResult<Self> {
        let file_path = dir.join(Self::block_file_name(id));
        let mut data = if file_path.exists() {
            let mut stream = FileStream::open(&file_path)?;
            let mut raw = Vec::new();
            let mut chunk = [0u8; 16 * 1024];
            loop {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
            }
            cipher.decrypt(&raw)?
        } else {
            Vec::new()
        };
        if (data.len() as u32) < free_offset {
            return Err(DbError::new(
                ErrorCode::InvalidBlockOffset,
                format!(
                    "block {} holds {} bytes, registry records free offset {}",
                    id,
                    data.len(),
                    free_offset
                ),
            ));
        }
        data.truncate(free_offset as usize);
        Ok(Self {
            id,
            file_path,
            capacity,
            data,
            dirty: false,
            cipher,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 当前空闲水位。
    pub fn free_offset(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.free_offset()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 追加记录，返回记录起始偏移。
    pub fn append(&mut self, bytes: &[u8]) -> CResult<u32> {
        if bytes.len() as u32 > self.remaining() {
            return Err(DbError::new(
                ErrorCode::InvalidBlockOffset,
                format!(
                    "record of {} bytes does not fit into block {} ({} bytes free)",
                    bytes.len(),
                    self.id,
                    self.remaining()
                ),
            ));
        }
        let offset = self.free_offset();
        self.data.extend_from_slice(bytes);
        self.dirty = true;
        Ok(offset)
    }

    /// 自给定偏移读取到空闲水位。偏移越过水位视为损坏。
    pub fn read_from(&self, offset: u32) -> CResult<&[u8]> {
        if offset >= self.free_offset() {
            return Err(DbError::new(
                ErrorCode::InvalidBlockOffset,
                format!(
                    "offset {} is past the free mark {} of block {}",
                    offset,
                    self.free_offset(),
                    self.id
                ),
            ));
        }
        Ok(&self.data[offset as usize..])
    }

    /// 放弃未落盘内容（所属文件即将删除时）。
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// 整块过加密落盘并fsync。
    pub fn flush(&mut self) -> CResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let encrypted = self.cipher.encrypt(&self.data);
        let mut stream = FileStream::create(&self.file_path)?;
        stream.write_all(&encrypted)?;
        stream.sync()?;
        self.dirty = false;
        debug!(
            "flushed block {} ({} bytes) to {:?}",
            self.id,
            self.data.len(),
            self.file_path
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::storage::cipher::NoneCipher;

    use super::*;

    #[test]
    fn test_append_read_flush_load() {
        let dir = tempfile::tempdir().unwrap();
        let cipher: Arc<dyn Cipher> = Arc::new(NoneCipher);

        let mut block = ColumnDataBlock::create(dir.path(), 1, 1024, Arc::clone(&cipher));
        let off_a = block.append(b"alpha").unwrap();
        let off_b = block.append(b"beta").unwrap();
        assert_eq!(off_a, 0);
        assert_eq!(off_b, 5);
        assert_eq!(&block.read_from(off_b).unwrap()[..4], b"beta");
        block.flush().unwrap();
        assert!(!block.is_dirty());

        let loaded =
            ColumnDataBlock::load(dir.path(), 1, 1024, block.free_offset(), cipher).unwrap();
        assert_eq!(loaded.free_offset(), 9);
        assert_eq!(&loaded.read_from(0).unwrap()[..5], b"alpha");
    }

    #[test]
    fn test_capacity_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut block = ColumnDataBlock::create(dir.path(), 1, 4, Arc::new(NoneCipher));
        assert!(block.append(b"12345").is_err());
        assert!(block.append(b"1234").is_ok());
        assert_eq!(block.remaining(), 0);
    }

    #[test]
    fn test_read_past_free_mark_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let mut block = ColumnDataBlock::create(dir.path(), 1, 64, Arc::new(NoneCipher));
        block.append(b"x").unwrap();
        assert!(block.read_from(1).is_err());
    }
}
