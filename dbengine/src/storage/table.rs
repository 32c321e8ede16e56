use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::BytesMut;
use tracing::debug;

use common::codec::{read_var_u32, read_var_u64, write_var_u32, write_var_u64};
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{FileStream, InputStream, OutputStream};

use crate::storage::caches::BlockCache;
use crate::storage::cipher::Cipher;
use crate::storage::column::Column;
use crate::storage::column_data_address::ColumnDataAddress;
use crate::storage::column_set::{ColumnConstraintRecord, ColumnInfo, ColumnSetRecord};
use crate::storage::main_index::MainIndex;
use crate::storage::master_column_record::MasterColumnRecord;
use crate::storage::TransactionParameters;
use crate::variant::ops::cast_variant;
use crate::variant::{Variant, VariantType};

/// 主列名。位置0恒为主列，值为行TRID。
pub const MASTER_COLUMN_NAME: &str = "TRID";

pub const TABLE_META_FILE_NAME: &str = "table.meta";

const TABLE_META_VERSION: u64 = 1;

struct TableMetaState {
    column_sets: Vec<ColumnSetRecord>,
    current_column_set_id: u64,
    next_column_id: u64,
    /// 当前列集的存储对象，位置序
    columns: Vec<Arc<Column>>,
}

/// 表：位置连续的列集合 + 主列主索引。
///
/// 行写经表级互斥串行；读不加行锁，主列追加写保证读者经主索引
/// 看到的行版本完整（值先于MCR落块，MCR最后入索引）。
pub struct Table {
    database_id: u32,
    database_name: String,
    id: u64,
    name: String,
    dir: PathBuf,
    is_system: bool,
    block_capacity: u32,
    cipher: Arc<dyn Cipher>,
    block_cache: Arc<BlockCache>,
    meta: RwLock<TableMetaState>,
    next_trid: AtomicU64,
    write_lock: Mutex<()>,
    main_index: RwLock<MainIndex>,
}

impl Table {
    /// 建新表。`user_columns` 不含主列。
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        database_id: u32,
        database_name: &str,
        id: u64,
        name: &str,
        is_system: bool,
        user_columns: Vec<ColumnInfo>,
        database_dir: &Path,
        block_capacity: u32,
        cipher: Arc<dyn Cipher>,
        block_cache: Arc<BlockCache>,
    ) -> CResult<Arc<Table>> {
        let dir = database_dir.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotCreateDirectory,
                format!("cannot create table directory {}", dir.display()),
                e,
            )
        })?;

        let mut columns_info = Vec::with_capacity(user_columns.len() + 1);
        let mut master = ColumnInfo::new(1, MASTER_COLUMN_NAME, VariantType::UInt64);
        master
            .constraints
            .push(ColumnConstraintRecord::not_null(format!("NN_{}_TRID", name)));
        columns_info.push(master);

        let mut next_column_id = 2u64;
        for mut info in user_columns {
            info.column_id = next_column_id;
            next_column_id += 1;
            columns_info.push(info);
        }

        let column_set = ColumnSetRecord::new(1, columns_info);
        let table = Arc::new(Table {
            database_id,
            database_name: database_name.to_string(),
            id,
            name: name.to_string(),
            dir: dir.clone(),
            is_system,
            block_capacity,
            cipher: Arc::clone(&cipher),
            block_cache: Arc::clone(&block_cache),
            meta: RwLock::new(TableMetaState {
                column_sets: vec![column_set],
                current_column_set_id: 1,
                next_column_id,
                columns: Vec::new(),
            }),
            next_trid: AtomicU64::new(1),
            write_lock: Mutex::new(()),
            main_index: RwLock::new(MainIndex::open(&dir, database_name, name)?),
        });
        table.open_current_columns()?;
        table.save_meta()?;
        Ok(table)
    }

    /// 从表目录加载。
    pub fn load(
        database_id: u32,
        database_name: &str,
        dir: PathBuf,
        block_capacity: u32,
        cipher: Arc<dyn Cipher>,
        block_cache: Arc<BlockCache>,
    ) -> CResult<Arc<Table>> {
        let meta_path = dir.join(TABLE_META_FILE_NAME);
        let mut stream = FileStream::open(&meta_path)?;
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
        let decoded = decode_table_meta(&mut slice)?;

        let main_index = MainIndex::open(&dir, database_name, &decoded.name)?;
        // 重启后以索引最大键恢复TRID计数
        let next_trid = decoded
            .next_trid
            .max(main_index.max_key().map_or(1, |k| k + 1));

        let table = Arc::new(Table {
            database_id,
            database_name: database_name.to_string(),
            id: decoded.table_id,
            name: decoded.name,
            dir,
            is_system: decoded.is_system,
            block_capacity,
            cipher: Arc::clone(&cipher),
            block_cache: Arc::clone(&block_cache),
            meta: RwLock::new(TableMetaState {
                column_sets: decoded.column_sets,
                current_column_set_id: decoded.current_column_set_id,
                next_column_id: decoded.next_column_id,
                columns: Vec::new(),
            }),
            next_trid: AtomicU64::new(next_trid),
            write_lock: Mutex::new(()),
            main_index: RwLock::new(main_index),
        });
        table.open_current_columns()?;
        Ok(table)
    }

    fn open_current_columns(&self) -> CResult<()> {
        let mut meta = self.meta.write().unwrap();
        let current = current_set(&meta)?.clone();
        let mut columns = Vec::with_capacity(current.columns.len());
        for info in &current.columns {
            columns.push(Arc::new(Column::open(
                self.database_id,
                self.id,
                info.column_id,
                &info.name,
                info.data_type,
                &self.dir,
                self.block_capacity,
                Arc::clone(&self.cipher),
                Arc::clone(&self.block_cache),
            )?));
        }
        meta.columns = columns;
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_column_set_id(&self) -> u64 {
        self.meta.read().unwrap().current_column_set_id
    }

    pub fn column_count(&self) -> usize {
        self.meta.read().unwrap().columns.len()
    }

    /// 当前列集描述（位置序快照）。
    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        let meta = self.meta.read().unwrap();
        current_set(&meta).map(|s| s.columns.clone()).unwrap_or_default()
    }

    /// 全部列集历史（SYS_COLUMNS重建用）。
    pub fn column_sets(&self) -> Vec<ColumnSetRecord> {
        self.meta.read().unwrap().column_sets.clone()
    }

    pub fn columns(&self) -> Vec<Arc<Column>> {
        self.meta.read().unwrap().columns.clone()
    }

    pub fn find_column_position(&self, name: &str) -> Option<usize> {
        let meta = self.meta.read().unwrap();
        current_set(&meta)
            .ok()
            .and_then(|s| s.find_column(name).map(|(pos, _)| pos))
    }

    pub fn next_trid_value(&self) -> u64 {
        self.next_trid.load(Ordering::SeqCst)
    }

    pub fn set_next_trid(&self, value: u64) -> CResult<()> {
        let min = self
            .main_index
            .read()
            .unwrap()
            .max_key()
            .map_or(1, |k| k + 1);
        if value < min {
            return Err(DbError::new(
                ErrorCode::InvalidAttribute,
                format!("next TRID {} is below the current maximum {}", value, min),
            ));
        }
        self.next_trid.store(value, Ordering::SeqCst);
        self.save_meta()
    }

    pub fn row_count(&self) -> usize {
        self.main_index.read().unwrap().len()
    }

    /// 主索引TRID快照（游标用）。
    pub fn trid_snapshot(&self) -> Vec<u64> {
        self.main_index.read().unwrap().keys_snapshot()
    }

    pub fn find_row_address(&self, trid: u64) -> Option<ColumnDataAddress> {
        self.main_index.read().unwrap().find(trid)
    }

    /// 行写入：先写各非主列值，再写MCR，最后入主索引。
    ///
    /// `values` 与当前列集位置对齐（位置0忽略），缺省列落默认值。
    pub fn insert_row(
        &self,
        values: Vec<Option<Variant>>,
        tp: TransactionParameters,
    ) -> CResult<u64> {
        let _write_guard = self.write_lock.lock().unwrap();
        let (columns, infos) = self.current_columns_and_infos()?;
        if values.len() != columns.len() {
            return Err(DbError::new(
                ErrorCode::InvalidValueCount,
                format!(
                    "{} values for {} columns of table {}",
                    values.len(),
                    columns.len(),
                    self.name
                ),
            ));
        }

        let trid = self.next_trid.fetch_add(1, Ordering::SeqCst);
        let mut pairs = Vec::with_capacity(columns.len() - 1);
        let mut provided = values;
        for position in 1..columns.len() {
            let value = self.coerce_column_value(
                &infos[position],
                provided[position].take(),
            )?;
            let address = columns[position].append_value(&value)?;
            pairs.push((infos[position].column_id, address));
        }

        let record = MasterColumnRecord::new_insert(trid, tp.transaction_id, tp.user_id, pairs);
        let mcr_address = columns[0].append_bytes(&record.serialize_to_vec())?;
        self.main_index.write().unwrap().insert(trid, mcr_address)?;
        debug!(
            "table {}.{}: inserted TRID {} at {}",
            self.database_name, self.name, trid, mcr_address
        );
        Ok(trid)
    }

    /// 校验/补齐单列值：缺省取默认值，NOT NULL列禁止NULL，类型不符尝试收敛。
    fn coerce_column_value(
        &self,
        info: &ColumnInfo,
        value: Option<Variant>,
    ) -> CResult<Variant> {
        let value = match value {
            Some(v) => v,
            None => match info.default_value() {
                Some(default) => default.clone(),
                None => Variant::Null,
            },
        };
        if value.is_null() {
            if info.is_not_null() {
                return Err(DbError::new(
                    ErrorCode::NotNullConstraintViolated,
                    format!("column {}.{} cannot be NULL", self.name, info.name),
                ));
            }
            return Ok(value);
        }
        if value.value_type() == info.data_type {
            return Ok(value);
        }
        cast_variant(&value, info.data_type)
    }

    /// 读MCR。
    pub fn read_master_record(&self, address: ColumnDataAddress) -> CResult<MasterColumnRecord> {
        let meta = self.meta.read().unwrap();
        let master = Arc::clone(&meta.columns[0]);
        drop(meta);
        master.with_bytes_at(address, |slice| {
            let mut input = slice;
            MasterColumnRecord::deserialize(&mut input)
        })
    }

    /// 经MCR读指定位置列值。写后新增的列按当前列集默认值合成。
    pub fn read_column_value(
        &self,
        record: &MasterColumnRecord,
        position: usize,
    ) -> CResult<Variant> {
        if position == 0 {
            return Ok(Variant::UInt64(record.trid));
        }
        let (columns, infos) = self.current_columns_and_infos()?;
        let info = infos.get(position).ok_or_else(|| {
            DbError::new(
                ErrorCode::ColumnDoesNotExist,
                format!("table {} has no column at position {}", self.name, position),
            )
        })?;
        match record.find_column_address(info.column_id) {
            Some(address) => columns[position].read_value(address),
            None => Ok(info
                .default_value()
                .cloned()
                .unwrap_or(Variant::Null)),
        }
    }

    /// 整行读取：返回当前列集全部列值（位置0为TRID）。
    pub fn read_row(&self, trid: u64) -> CResult<Option<Vec<Variant>>> {
        let address = match self.find_row_address(trid) {
            Some(address) => address,
            None => return Ok(None),
        };
        let record = self.read_master_record(address)?;
        let column_count = self.column_count();
        let mut values = Vec::with_capacity(column_count);
        for position in 0..column_count {
            values.push(self.read_column_value(&record, position)?);
        }
        Ok(Some(values))
    }

    /// 行更新：仅重写受影响列，追加新MCR，主索引改指新记录。
    pub fn update_row(
        &self,
        trid: u64,
        updates: Vec<(usize, Variant)>,
        tp: TransactionParameters,
    ) -> CResult<bool> {
        let _write_guard = self.write_lock.lock().unwrap();
        let old_address = match self.find_row_address(trid) {
            Some(address) => address,
            None => return Ok(false),
        };
        let old_record = self.read_master_record(old_address)?;
        let (columns, infos) = self.current_columns_and_infos()?;

        let mut pairs: Vec<(u64, ColumnDataAddress)> = Vec::with_capacity(columns.len() - 1);
        for position in 1..columns.len() {
            let info = &infos[position];
            if let Some((_, value)) = updates.iter().find(|(p, _)| *p == position) {
                let value = self.coerce_column_value(info, Some(value.clone()))?;
                let address = columns[position].append_value(&value)?;
                pairs.push((info.column_id, address));
            } else if let Some(address) = old_record.find_column_address(info.column_id) {
                pairs.push((info.column_id, address));
            }
            // 写后新增且本次未赋值的列继续缺席，读取时合成默认值
        }

        let record =
            MasterColumnRecord::new_update(trid, tp.transaction_id, tp.user_id, old_address, pairs);
        let mcr_address = columns[0].append_bytes(&record.serialize_to_vec())?;
        self.main_index.write().unwrap().update(trid, mcr_address)?;
        Ok(true)
    }

    /// 逻辑删除：写墓碑MCR并摘除索引项，空间回收延后。
    pub fn delete_row(&self, trid: u64, tp: TransactionParameters) -> CResult<bool> {
        let _write_guard = self.write_lock.lock().unwrap();
        let old_address = match self.find_row_address(trid) {
            Some(address) => address,
            None => return Ok(false),
        };
        let record =
            MasterColumnRecord::new_tombstone(trid, tp.transaction_id, tp.user_id, old_address);
        let meta = self.meta.read().unwrap();
        let master = Arc::clone(&meta.columns[0]);
        drop(meta);
        master.append_bytes(&record.serialize_to_vec())?;
        self.main_index.write().unwrap().remove(trid)?;
        Ok(true)
    }

    /// ADD COLUMN：生成新列集。非空表要求NOT NULL新列必须带默认值。
    pub fn add_column(&self, mut info: ColumnInfo) -> CResult<()> {
        let _write_guard = self.write_lock.lock().unwrap();
        let mut meta = self.meta.write().unwrap();
        let current = current_set(&meta)?.clone();
        if current.find_column(&info.name).is_some() {
            return Err(DbError::new(
                ErrorCode::ColumnAlreadyExists,
                format!("column {}.{} already exists", self.name, info.name),
            ));
        }
        let is_not_null = info.is_not_null();
        let has_default = info.default_value().is_some();
        if is_not_null && !has_default && !self.main_index.read().unwrap().is_empty() {
            return Err(DbError::new(
                ErrorCode::NotNullConstraintViolated,
                format!(
                    "cannot add NOT NULL column {} without a default to a non-empty table",
                    info.name
                ),
            ));
        }

        info.column_id = meta.next_column_id;
        meta.next_column_id += 1;

        let column = Arc::new(Column::open(
            self.database_id,
            self.id,
            info.column_id,
            &info.name,
            info.data_type,
            &self.dir,
            self.block_capacity,
            Arc::clone(&self.cipher),
            Arc::clone(&self.block_cache),
        )?);

        let mut columns_info = current.columns;
        columns_info.push(info);
        let new_set_id = meta.current_column_set_id + 1;
        meta.column_sets
            .push(ColumnSetRecord::new(new_set_id, columns_info));
        meta.current_column_set_id = new_set_id;
        meta.columns.push(column);
        drop(meta);
        self.save_meta()
    }

    /// DROP COLUMN：生成不含该列的新列集并删除列存储。
    pub fn drop_column(&self, column_name: &str) -> CResult<()> {
        if column_name == MASTER_COLUMN_NAME {
            return Err(DbError::new(
                ErrorCode::CannotDropMasterColumn,
                "the master column cannot be dropped",
            ));
        }
        let _write_guard = self.write_lock.lock().unwrap();
        let mut meta = self.meta.write().unwrap();
        let current = current_set(&meta)?.clone();
        let (position, _) = current.find_column(column_name).ok_or_else(|| {
            DbError::new(
                ErrorCode::ColumnDoesNotExist,
                format!("column {}.{} does not exist", self.name, column_name),
            )
        })?;

        let mut columns_info = current.columns;
        columns_info.remove(position);
        let new_set_id = meta.current_column_set_id + 1;
        meta.column_sets
            .push(ColumnSetRecord::new(new_set_id, columns_info));
        meta.current_column_set_id = new_set_id;
        let column = meta.columns.remove(position);
        column.discard_cached_blocks();
        let column_dir = column.dir().to_path_buf();
        drop(meta);
        std::fs::remove_dir_all(&column_dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotRemoveFile,
                format!("cannot remove column directory {}", column_dir.display()),
                e,
            )
        })?;
        self.save_meta()
    }

    /// RENAME COLUMN：同id改名的新列集，列目录同步更名。
    pub fn rename_column(&self, column_name: &str, new_name: &str) -> CResult<()> {
        if column_name == MASTER_COLUMN_NAME {
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                "the master column cannot be renamed",
            ));
        }
        let _write_guard = self.write_lock.lock().unwrap();
        let mut meta = self.meta.write().unwrap();
        let current = current_set(&meta)?.clone();
        let (position, _) = current.find_column(column_name).ok_or_else(|| {
            DbError::new(
                ErrorCode::ColumnDoesNotExist,
                format!("column {}.{} does not exist", self.name, column_name),
            )
        })?;
        if current.find_column(new_name).is_some() {
            return Err(DbError::new(
                ErrorCode::ColumnAlreadyExists,
                format!("column {}.{} already exists", self.name, new_name),
            ));
        }

        let old_column = meta.columns[position].clone();
        old_column.flush()?;
        old_column.discard_cached_blocks();
        let old_dir = old_column.dir().to_path_buf();
        let new_dir = self.dir.join(new_name);
        std::fs::rename(&old_dir, &new_dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotOpenFile,
                format!("cannot rename column directory {}", old_dir.display()),
                e,
            )
        })?;

        let mut columns_info = current.columns;
        columns_info[position].name = new_name.to_string();
        let renamed_info = columns_info[position].clone();
        let new_set_id = meta.current_column_set_id + 1;
        meta.column_sets
            .push(ColumnSetRecord::new(new_set_id, columns_info));
        meta.current_column_set_id = new_set_id;
        meta.columns[position] = Arc::new(Column::open(
            self.database_id,
            self.id,
            renamed_info.column_id,
            new_name,
            renamed_info.data_type,
            &self.dir,
            self.block_capacity,
            Arc::clone(&self.cipher),
            Arc::clone(&self.block_cache),
        )?);
        drop(meta);
        self.save_meta()
    }

    /// ALTER COLUMN：类型不可变，约束以新列集形式替换。
    pub fn redefine_column(&self, info: ColumnInfo) -> CResult<()> {
        let _write_guard = self.write_lock.lock().unwrap();
        let mut meta = self.meta.write().unwrap();
        let current = current_set(&meta)?.clone();
        let (position, existing) = current.find_column(&info.name).ok_or_else(|| {
            DbError::new(
                ErrorCode::ColumnDoesNotExist,
                format!("column {}.{} does not exist", self.name, info.name),
            )
        })?;
        if existing.data_type != info.data_type {
            return Err(DbError::new(
                ErrorCode::InvalidAttribute,
                format!(
                    "column {}.{} type is immutable ({:?})",
                    self.name, info.name, existing.data_type
                ),
            ));
        }

        let mut columns_info = current.columns;
        columns_info[position].constraints = info.constraints;
        let new_set_id = meta.current_column_set_id + 1;
        meta.column_sets
            .push(ColumnSetRecord::new(new_set_id, columns_info));
        meta.current_column_set_id = new_set_id;
        drop(meta);
        self.save_meta()
    }

    /// 表级落盘：列块、主索引、元数据。
    pub fn flush(&self) -> CResult<()> {
        for column in self.columns() {
            column.flush()?;
        }
        self.main_index.read().unwrap().sync()?;
        self.save_meta()
    }

    /// 丢弃本表全部缓存块（删表前）。
    pub fn discard_cached_blocks(&self) {
        let (database_id, table_id) = (self.database_id, self.id);
        crate::storage::caches::discard_blocks(&self.block_cache, |key| {
            key.0 == database_id && key.1 == table_id
        });
    }

    fn current_columns_and_infos(&self) -> CResult<(Vec<Arc<Column>>, Vec<ColumnInfo>)> {
        let meta = self.meta.read().unwrap();
        let infos = current_set(&meta)?.columns.clone();
        Ok((meta.columns.clone(), infos))
    }

    /// 元数据编码:
    /// `[version][table_id][name][is_system][next_trid][current_set][next_column_id]`
    /// `[set_count][column_set*]`
    pub fn save_meta(&self) -> CResult<()> {
        let meta = self.meta.read().unwrap();
        let mut buf = BytesMut::new();
        write_var_u64(TABLE_META_VERSION, &mut buf);
        write_var_u64(self.id, &mut buf);
        write_var_u32(self.name.len() as u32, &mut buf);
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&[self.is_system as u8]);
        write_var_u64(self.next_trid.load(Ordering::SeqCst), &mut buf);
        write_var_u64(meta.current_column_set_id, &mut buf);
        write_var_u64(meta.next_column_id, &mut buf);
        write_var_u32(meta.column_sets.len() as u32, &mut buf);
        for set in &meta.column_sets {
            set.encode_into(&mut buf)?;
        }
        drop(meta);

        let mut stream = FileStream::create(&self.dir.join(TABLE_META_FILE_NAME))?;
        stream.write_all(&buf)?;
        stream.sync()?;
        Ok(())
    }
}

/// 只读表元数据摘要（目录扫描建注册表用）。
pub fn peek_table_meta(table_dir: &Path) -> CResult<(u64, String, bool)> {
    let raw = read_meta_file(table_dir)?;
    let mut slice = &raw[..];
    let decoded = decode_table_meta(&mut slice)?;
    Ok((decoded.table_id, decoded.name, decoded.is_system))
}

/// 表目录更名后改写元数据里的表名。
pub fn rewrite_table_meta_name(table_dir: &Path, new_name: &str) -> CResult<()> {
    let raw = read_meta_file(table_dir)?;
    let mut slice = &raw[..];
    let mut decoded = decode_table_meta(&mut slice)?;
    decoded.name = new_name.to_string();

    let mut buf = BytesMut::new();
    write_var_u64(TABLE_META_VERSION, &mut buf);
    write_var_u64(decoded.table_id, &mut buf);
    write_var_u32(decoded.name.len() as u32, &mut buf);
    buf.extend_from_slice(decoded.name.as_bytes());
    buf.extend_from_slice(&[decoded.is_system as u8]);
    write_var_u64(decoded.next_trid, &mut buf);
    write_var_u64(decoded.current_column_set_id, &mut buf);
    write_var_u64(decoded.next_column_id, &mut buf);
    write_var_u32(decoded.column_sets.len() as u32, &mut buf);
    for set in &decoded.column_sets {
        set.encode_into(&mut buf)?;
    }
    let mut stream = FileStream::create(&table_dir.join(TABLE_META_FILE_NAME))?;
    stream.write_all(&buf)?;
    stream.sync()?;
    Ok(())
}

fn read_meta_file(table_dir: &Path) -> CResult<Vec<u8>> {
    let mut stream = FileStream::open(&table_dir.join(TABLE_META_FILE_NAME))?;
    let mut raw = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
    }
    Ok(raw)
}

fn current_set(meta: &TableMetaState) -> CResult<&ColumnSetRecord> {
    meta.column_sets
        .iter()
        .find(|s| s.id == meta.current_column_set_id)
        .ok_or_else(|| {
            DbError::new(
                ErrorCode::InvalidColumnSet,
                "current column set record is missing",
            )
        })
}

struct DecodedTableMeta {
    table_id: u64,
    name: String,
    is_system: bool,
    next_trid: u64,
    current_column_set_id: u64,
    next_column_id: u64,
    column_sets: Vec<ColumnSetRecord>,
}

fn decode_table_meta(input: &mut &[u8]) -> CResult<DecodedTableMeta> {
    let corrupt = |detail: &str| {
        DbError::new(
            ErrorCode::InvalidColumnSet,
            format!("corrupt table meta: {}", detail),
        )
    };
    let version = read_var_u64(input)?;
    if version != TABLE_META_VERSION {
        return Err(corrupt("unsupported version"));
    }
    let table_id = read_var_u64(input)?;
    let name_len = read_var_u32(input)? as usize;
    if input.len() < name_len + 1 {
        return Err(corrupt("truncated name"));
    }
    let (head, tail) = input.split_at(name_len);
    let name = String::from_utf8(head.to_vec()).map_err(|_| corrupt("name is not UTF-8"))?;
    *input = tail;
    let (&is_system, tail) = input.split_first().unwrap();
    *input = tail;
    let next_trid = read_var_u64(input)?;
    let current_column_set_id = read_var_u64(input)?;
    let next_column_id = read_var_u64(input)?;
    let set_count = read_var_u32(input)? as usize;
    let mut column_sets = Vec::with_capacity(set_count);
    for _ in 0..set_count {
        column_sets.push(ColumnSetRecord::decode(input)?);
    }
    Ok(DecodedTableMeta {
        table_id,
        name,
        is_system: is_system != 0,
        next_trid,
        current_column_set_id,
        next_column_id,
        column_sets,
    })
}

#[cfg(test)]
mod test {
    use crate::storage::caches::new_block_cache;
    use crate::storage::cipher::NoneCipher;

    use super::*;

    fn int_column(name: &str) -> ColumnInfo {
        ColumnInfo::new(0, name, VariantType::Int32)
    }

    fn tp() -> TransactionParameters {
        TransactionParameters::new(1, 100)
    }

    fn create_table(dir: &Path, columns: Vec<ColumnInfo>) -> Arc<Table> {
        Table::create(
            1,
            "DB1",
            1,
            "T1",
            false,
            columns,
            dir,
            64 * 1024,
            Arc::new(NoneCipher),
            new_block_cache(128),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_read_row() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A"), int_column("B")]);
        let trid = table
            .insert_row(
                vec![None, Some(Variant::Int32(1)), Some(Variant::Int32(2))],
                tp(),
            )
            .unwrap();
        assert_eq!(trid, 1);
        let row = table.read_row(1).unwrap().unwrap();
        assert_eq!(
            row,
            vec![Variant::UInt64(1), Variant::Int32(1), Variant::Int32(2)]
        );
        assert_eq!(table.read_row(2).unwrap(), None);
    }

    #[test]
    fn test_mcr_pair_count_matches_columns() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A"), int_column("B")]);
        table
            .insert_row(
                vec![None, Some(Variant::Int32(5)), Some(Variant::Int32(6))],
                tp(),
            )
            .unwrap();
        let address = table.find_row_address(1).unwrap();
        let record = table.read_master_record(address).unwrap();
        assert_eq!(record.column_pairs.len(), table.column_count() - 1);
    }

    #[test]
    fn test_default_substituted_for_added_column() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A"), int_column("B")]);
        table
            .insert_row(
                vec![None, Some(Variant::Int32(1)), Some(Variant::Int32(2))],
                tp(),
            )
            .unwrap();

        let mut new_column = int_column("C");
        new_column
            .constraints
            .push(ColumnConstraintRecord::default_value("DEF_C", Variant::Int32(7)));
        table.add_column(new_column).unwrap();
        assert_eq!(table.column_count(), 4);

        // 旧行MCR少一对，读取合成默认值
        let row = table.read_row(1).unwrap().unwrap();
        assert_eq!(
            row,
            vec![
                Variant::UInt64(1),
                Variant::Int32(1),
                Variant::Int32(2),
                Variant::Int32(7)
            ]
        );
        assert_eq!(row.len(), table.column_count());
    }

    #[test]
    fn test_not_null_without_default_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A")]);
        table
            .insert_row(vec![None, Some(Variant::Int32(1))], tp())
            .unwrap();
        let mut c = int_column("B");
        c.constraints.push(ColumnConstraintRecord::not_null("NN_B"));
        assert!(table.add_column(c).is_err());
    }

    #[test]
    fn test_update_row() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A"), int_column("B")]);
        table
            .insert_row(
                vec![None, Some(Variant::Int32(1)), Some(Variant::Int32(2))],
                tp(),
            )
            .unwrap();
        let updated = table
            .update_row(1, vec![(2, Variant::Int32(20))], tp())
            .unwrap();
        assert!(updated);
        let row = table.read_row(1).unwrap().unwrap();
        assert_eq!(
            row,
            vec![Variant::UInt64(1), Variant::Int32(1), Variant::Int32(20)]
        );
        assert!(!table.update_row(99, vec![(1, Variant::Int32(0))], tp()).unwrap());
    }

    #[test]
    fn test_delete_row_is_logical() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A")]);
        table
            .insert_row(vec![None, Some(Variant::Int32(1))], tp())
            .unwrap();
        assert!(table.delete_row(1, tp()).unwrap());
        assert_eq!(table.read_row(1).unwrap(), None);
        assert!(!table.delete_row(1, tp()).unwrap());
        // 删除不回收TRID
        let trid = table
            .insert_row(vec![None, Some(Variant::Int32(2))], tp())
            .unwrap();
        assert_eq!(trid, 2);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cache = new_block_cache(128);
        {
            let table = Table::create(
                1,
                "DB1",
                1,
                "T1",
                false,
                vec![int_column("A")],
                dir.path(),
                64 * 1024,
                Arc::new(NoneCipher),
                Arc::clone(&cache),
            )
            .unwrap();
            table
                .insert_row(vec![None, Some(Variant::Int32(41))], tp())
                .unwrap();
            table.flush().unwrap();
        }
        let table = Table::load(
            1,
            "DB1",
            dir.path().join("T1"),
            64 * 1024,
            Arc::new(NoneCipher),
            new_block_cache(128),
        )
        .unwrap();
        assert_eq!(table.name(), "T1");
        let row = table.read_row(1).unwrap().unwrap();
        assert_eq!(row[1], Variant::Int32(41));
        assert_eq!(table.next_trid_value(), 2);
    }

    #[test]
    fn test_drop_and_rename_column() {
        let dir = tempfile::tempdir().unwrap();
        let table = create_table(dir.path(), vec![int_column("A"), int_column("B")]);
        let set_id = table.current_column_set_id();
        table.rename_column("B", "B2").unwrap();
        assert_eq!(table.current_column_set_id(), set_id + 1);
        assert!(table.find_column_position("B2").is_some());
        assert!(table.find_column_position("B").is_none());

        table.drop_column("B2").unwrap();
        assert_eq!(table.current_column_set_id(), set_id + 2);
        assert_eq!(table.column_count(), 2);
        assert!(table.drop_column("TRID").is_err());
    }
}
