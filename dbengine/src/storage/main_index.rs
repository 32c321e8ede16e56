use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{FileStream, InputStream, OutputStream};

use crate::storage::column_data_address::{ColumnDataAddress, COLUMN_DATA_ADDRESS_SIZE};

/// 主索引文件名
pub const MAIN_INDEX_FILE_NAME: &str = "main.idx";

const OP_PUT: u8 = 1;
const OP_REMOVE: u8 = 2;

/// 主列主索引：8字节大端TRID -> 行MCR地址的持久有序索引。
///
/// 盘上为追加日志 `[op u8][trid 8B BE][addr 8B]`，加载时重放；
/// 内存中为有序映射，支持点查与按序区间扫描。每键至多一个值。
#[derive(Debug)]
pub struct MainIndex {
    file_path: PathBuf,
    database_name: String,
    table_name: String,
    map: BTreeMap<u64, ColumnDataAddress>,
}

impl MainIndex {
    pub fn open(
        table_dir: &Path,
        database_name: impl Into<String>,
        table_name: impl Into<String>,
    ) -> CResult<Self> {
        let mut index = Self {
            file_path: table_dir.join(MAIN_INDEX_FILE_NAME),
            database_name: database_name.into(),
            table_name: table_name.into(),
            map: BTreeMap::new(),
        };
        index.replay()?;
        Ok(index)
    }

    fn replay(&mut self) -> CResult<()> {
        if !self.file_path.exists() {
            return Ok(());
        }
        let mut stream = FileStream::open(&self.file_path)?;
        let mut raw = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        let record_size = 1 + 8 + COLUMN_DATA_ADDRESS_SIZE;
        if raw.len() % record_size != 0 {
            return Err(self.corruption(format!(
                "index file size {} is not a multiple of record size",
                raw.len()
            )));
        }
        for record in raw.chunks_exact(record_size) {
            let trid = BigEndian::read_u64(&record[1..9]);
            match record[0] {
                OP_PUT => {
                    let address = ColumnDataAddress::from_bytes(&record[9..])?;
                    self.map.insert(trid, address);
                }
                OP_REMOVE => {
                    self.map.remove(&trid);
                }
                other => {
                    return Err(self.corruption(format!("unknown index record op {}", other)));
                }
            }
        }
        Ok(())
    }

    fn corruption(&self, detail: String) -> DbError {
        DbError::new(
            ErrorCode::CorruptIndexFile,
            format!(
                "main index of {}.{} is corrupt: {}",
                self.database_name, self.table_name, detail
            ),
        )
    }

    fn append_record(&self, op: u8, trid: u64, address: ColumnDataAddress) -> CResult<()> {
        let mut record = [0u8; 1 + 8 + COLUMN_DATA_ADDRESS_SIZE];
        record[0] = op;
        BigEndian::write_u64(&mut record[1..9], trid);
        record[9..].copy_from_slice(&address.to_bytes());
        let mut stream = FileStream::append(&self.file_path)?;
        stream.write_all(&record)?;
        Ok(())
    }

    /// 新行登记。键已存在视为索引不一致。
    pub fn insert(&mut self, trid: u64, address: ColumnDataAddress) -> CResult<()> {
        if self.map.contains_key(&trid) {
            return Err(DbError::new(
                ErrorCode::IndexDuplicateKey,
                format!(
                    "duplicate TRID {} in main index of {}.{}",
                    trid, self.database_name, self.table_name
                ),
            ));
        }
        self.append_record(OP_PUT, trid, address)?;
        self.map.insert(trid, address);
        Ok(())
    }

    /// 行更新后指向新MCR。
    pub fn update(&mut self, trid: u64, address: ColumnDataAddress) -> CResult<()> {
        if !self.map.contains_key(&trid) {
            return Err(self.corruption(format!("update of unknown TRID {}", trid)));
        }
        self.append_record(OP_PUT, trid, address)?;
        self.map.insert(trid, address);
        Ok(())
    }

    pub fn remove(&mut self, trid: u64) -> CResult<()> {
        if !self.map.contains_key(&trid) {
            return Err(self.corruption(format!("removal of unknown TRID {}", trid)));
        }
        self.append_record(OP_REMOVE, trid, ColumnDataAddress::default())?;
        self.map.remove(&trid);
        Ok(())
    }

    pub fn find(&self, trid: u64) -> Option<ColumnDataAddress> {
        self.map.get(&trid).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// 按键序的TRID快照。
    pub fn keys_snapshot(&self) -> Vec<u64> {
        self.map.keys().copied().collect()
    }

    /// 按键序区间扫描。
    pub fn range(
        &self,
        lower: Bound<u64>,
        upper: Bound<u64>,
    ) -> impl Iterator<Item = (u64, ColumnDataAddress)> + '_ {
        self.map.range((lower, upper)).map(|(k, v)| (*k, *v))
    }

    pub fn max_key(&self) -> Option<u64> {
        self.map.keys().next_back().copied()
    }

    /// 索引文件落盘。
    pub fn sync(&self) -> CResult<()> {
        if self.file_path.exists() {
            FileStream::append(&self.file_path)?.sync()?;
        }
        Ok(())
    }
}
