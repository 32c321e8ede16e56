use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{FileStream, InputStream, OutputStream};

use crate::storage::caches::{BlockCache, TableCache};
use crate::storage::cipher::Cipher;
use crate::storage::column_set::{ColumnConstraintRecord, ColumnInfo, ColumnSetRecord};
use crate::storage::table::{peek_table_meta, rewrite_table_meta_name, Table};
use crate::storage::TransactionParameters;
use crate::variant::{Variant, VariantType};

pub const DATABASE_META_FILE_NAME: &str = "database.meta";

/// 系统数据库名
pub const SYSTEM_DATABASE_NAME: &str = "SYS";

pub const SYS_TABLES_NAME: &str = "SYS_TABLES";
pub const SYS_COLUMNS_NAME: &str = "SYS_COLUMNS";
pub const SYS_COLUMN_CONSTRAINTS_NAME: &str = "SYS_COLUMN_CONSTRAINTS";
/// 仅系统数据库持有
pub const SYS_DATABASES_NAME: &str = "SYS_DATABASES";
pub const SYS_USERS_NAME: &str = "SYS_USERS";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseMeta {
    id: u32,
    name: String,
    uuid: String,
    cipher_id: String,
    next_table_id: u64,
    next_transaction_id: u64,
}

#[derive(Debug, Clone)]
pub struct TableRecord {
    pub id: u64,
    pub name: String,
    pub is_system: bool,
}

/// 数据库：表集合 + 单调递增事务id发生器 + 加密身份 + 系统表。
///
/// 每个用户表的元数据在本库系统表中有对应行；系统表不可删除。
/// 使用计数非零时不可删除整库。
pub struct Database {
    id: u32,
    name: String,
    uuid: Uuid,
    cipher_id: String,
    cipher: Arc<dyn Cipher>,
    dir: PathBuf,
    is_system: bool,
    block_capacity: u32,
    table_registry: RwLock<HashMap<String, TableRecord>>,
    next_table_id: AtomicU64,
    next_transaction_id: AtomicU64,
    use_count: AtomicUsize,
    table_cache: Arc<TableCache>,
    block_cache: Arc<BlockCache>,
}

impl Database {
    /// 建库：目录、元数据、系统表自举。
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        id: u32,
        name: &str,
        cipher_id: &str,
        cipher: Arc<dyn Cipher>,
        parent_dir: &Path,
        block_capacity: u32,
        table_cache: Arc<TableCache>,
        block_cache: Arc<BlockCache>,
    ) -> CResult<Arc<Database>> {
        let dir = parent_dir.join(name);
        if dir.exists() {
            return Err(DbError::new(
                ErrorCode::DatabaseAlreadyExists,
                format!("database {} already exists on disk", name),
            ));
        }
        std::fs::create_dir_all(&dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotCreateDirectory,
                format!("cannot create database directory {}", dir.display()),
                e,
            )
        })?;

        let database = Arc::new(Database {
            id,
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            cipher_id: cipher_id.to_string(),
            cipher,
            dir,
            is_system: name == SYSTEM_DATABASE_NAME,
            block_capacity,
            table_registry: RwLock::new(HashMap::new()),
            next_table_id: AtomicU64::new(1),
            next_transaction_id: AtomicU64::new(1),
            use_count: AtomicUsize::new(0),
            table_cache,
            block_cache,
        });
        database.bootstrap_system_tables()?;
        database.save_meta()?;
        info!("created database {} (id {})", name, id);
        Ok(database)
    }

    /// 从数据目录加载。表注册表由子目录扫描重建。
    pub fn load(
        dir: PathBuf,
        cipher: Arc<dyn Cipher>,
        block_capacity: u32,
        table_cache: Arc<TableCache>,
        block_cache: Arc<BlockCache>,
    ) -> CResult<Arc<Database>> {
        let meta_path = dir.join(DATABASE_META_FILE_NAME);
        let mut stream = FileStream::open(&meta_path)?;
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        let meta: DatabaseMeta = bincode::deserialize(&raw).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("corrupt database meta {}: {}", meta_path.display(), e),
            )
        })?;
        let uuid = Uuid::parse_str(&meta.uuid).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("corrupt database uuid: {}", e),
            )
        })?;

        let mut registry = HashMap::new();
        for entry in std::fs::read_dir(&dir).map_err(DbError::from)? {
            let entry = entry.map_err(DbError::from)?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join(crate::storage::table::TABLE_META_FILE_NAME).exists() {
                continue;
            }
            let (table_id, table_name, is_system) = peek_table_meta(&path)?;
            registry.insert(
                table_name.clone(),
                TableRecord {
                    id: table_id,
                    name: table_name,
                    is_system,
                },
            );
        }

        let is_system = meta.name == SYSTEM_DATABASE_NAME;
        Ok(Arc::new(Database {
            id: meta.id,
            name: meta.name,
            uuid,
            cipher_id: meta.cipher_id,
            cipher,
            dir,
            is_system,
            block_capacity,
            table_registry: RwLock::new(registry),
            next_table_id: AtomicU64::new(meta.next_table_id),
            next_transaction_id: AtomicU64::new(meta.next_transaction_id),
            use_count: AtomicUsize::new(0),
            table_cache,
            block_cache,
        }))
    }

    fn bootstrap_system_tables(self: &Arc<Self>) -> CResult<()> {
        self.create_table_internal(
            SYS_TABLES_NAME,
            vec![
                not_null_column("NAME", VariantType::String, SYS_TABLES_NAME),
                ColumnInfo::new(0, "DESCRIPTION", VariantType::String),
                not_null_column("TABLE_ID", VariantType::UInt64, SYS_TABLES_NAME),
            ],
            true,
        )?;
        self.create_table_internal(
            SYS_COLUMNS_NAME,
            vec![
                not_null_column("TABLE_ID", VariantType::UInt64, SYS_COLUMNS_NAME),
                not_null_column("COLUMN_SET_ID", VariantType::UInt64, SYS_COLUMNS_NAME),
                not_null_column("NAME", VariantType::String, SYS_COLUMNS_NAME),
                not_null_column("DATA_TYPE", VariantType::String, SYS_COLUMNS_NAME),
                not_null_column("POSITION", VariantType::UInt32, SYS_COLUMNS_NAME),
                not_null_column("NOT_NULL", VariantType::Bool, SYS_COLUMNS_NAME),
            ],
            true,
        )?;
        self.create_table_internal(
            SYS_COLUMN_CONSTRAINTS_NAME,
            vec![
                not_null_column("TABLE_ID", VariantType::UInt64, SYS_COLUMN_CONSTRAINTS_NAME),
                not_null_column(
                    "COLUMN_SET_ID",
                    VariantType::UInt64,
                    SYS_COLUMN_CONSTRAINTS_NAME,
                ),
                not_null_column(
                    "COLUMN_NAME",
                    VariantType::String,
                    SYS_COLUMN_CONSTRAINTS_NAME,
                ),
                not_null_column("NAME", VariantType::String, SYS_COLUMN_CONSTRAINTS_NAME),
                not_null_column("TYPE", VariantType::String, SYS_COLUMN_CONSTRAINTS_NAME),
                ColumnInfo::new(0, "EXPRESSION", VariantType::String),
            ],
            true,
        )?;
        if self.is_system {
            self.create_table_internal(
                SYS_DATABASES_NAME,
                vec![
                    not_null_column("NAME", VariantType::String, SYS_DATABASES_NAME),
                    not_null_column("UUID", VariantType::String, SYS_DATABASES_NAME),
                    not_null_column("CIPHER_ID", VariantType::String, SYS_DATABASES_NAME),
                ],
                true,
            )?;
            self.create_table_internal(
                SYS_USERS_NAME,
                vec![
                    not_null_column("NAME", VariantType::String, SYS_USERS_NAME),
                    ColumnInfo::new(0, "REAL_NAME", VariantType::String),
                    not_null_column("ACTIVE", VariantType::Bool, SYS_USERS_NAME),
                    not_null_column("SUPER_USER", VariantType::Bool, SYS_USERS_NAME),
                ],
                true,
            )?;
        }
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn cipher_id(&self) -> &str {
        &self.cipher_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    /// 行修改操作的事务id。
    pub fn generate_next_transaction_id(&self) -> u64 {
        self.next_transaction_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn transaction_parameters(&self, user_id: u32) -> TransactionParameters {
        TransactionParameters::new(user_id, self.generate_next_transaction_id())
    }

    pub fn use_count(&self) -> usize {
        self.use_count.load(Ordering::SeqCst)
    }

    pub fn increment_use_count(&self) {
        self.use_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_use_count(&self) {
        self.use_count.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn table_names(&self) -> Vec<String> {
        let registry = self.table_registry.read().unwrap();
        registry.keys().cloned().collect()
    }

    /// 按名排序的表记录。
    pub fn table_records_ordered_by_name(&self) -> Vec<TableRecord> {
        let registry = self.table_registry.read().unwrap();
        let mut records: Vec<TableRecord> = registry.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.table_registry.read().unwrap().contains_key(name)
    }

    pub fn find_table_record(&self, name: &str) -> Option<TableRecord> {
        self.table_registry.read().unwrap().get(name).cloned()
    }

    /// 取表对象：注册表定身份，表缓存定生命周期。
    pub fn find_table(&self, name: &str) -> CResult<Arc<Table>> {
        let record = self.find_table_record(name).ok_or_else(|| {
            DbError::new(
                ErrorCode::TableDoesNotExist,
                format!("table {}.{} does not exist", self.name, name),
            )
        })?;
        let key = (self.id, record.id);
        {
            let mut cache = self.table_cache.lock().unwrap();
            if let Some(table) = cache.get(&key) {
                return Ok(Arc::clone(table));
            }
        }
        let table = Table::load(
            self.id,
            &self.name,
            self.dir.join(&record.name),
            self.block_capacity,
            Arc::clone(&self.cipher),
            Arc::clone(&self.block_cache),
        )?;
        self.table_cache
            .lock()
            .unwrap()
            .emplace(key, Arc::clone(&table), false)?;
        Ok(table)
    }

    /// 建用户表并登记元数据行。
    pub fn create_table(
        self: &Arc<Self>,
        name: &str,
        user_columns: Vec<ColumnInfo>,
        max_tables: usize,
    ) -> CResult<Arc<Table>> {
        if self.table_registry.read().unwrap().len() >= max_tables {
            return Err(DbError::new(
                ErrorCode::TooManyTables,
                format!("database {} reached the table limit {}", self.name, max_tables),
            ));
        }
        self.create_table_internal(name, user_columns, false)
    }

    fn create_table_internal(
        self: &Arc<Self>,
        name: &str,
        user_columns: Vec<ColumnInfo>,
        is_system: bool,
    ) -> CResult<Arc<Table>> {
        if self.table_exists(name) {
            return Err(DbError::new(
                ErrorCode::TableAlreadyExists,
                format!("table {}.{} already exists", self.name, name),
            ));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        let table = Table::create(
            self.id,
            &self.name,
            table_id,
            name,
            is_system,
            user_columns,
            &self.dir,
            self.block_capacity,
            Arc::clone(&self.cipher),
            Arc::clone(&self.block_cache),
        )?;
        self.table_registry.write().unwrap().insert(
            name.to_string(),
            TableRecord {
                id: table_id,
                name: name.to_string(),
                is_system,
            },
        );
        self.table_cache
            .lock()
            .unwrap()
            .emplace((self.id, table_id), Arc::clone(&table), false)?;
        if !is_system {
            self.register_table_metadata(&table)?;
        }
        self.save_meta()?;
        debug!("created table {}.{} (id {})", self.name, name, table_id);
        Ok(table)
    }

    /// 删表：系统表拒绝，元数据行打墓碑，数据目录移除。
    pub fn drop_table(&self, name: &str, user_id: u32) -> CResult<()> {
        let record = self.find_table_record(name).ok_or_else(|| {
            DbError::new(
                ErrorCode::TableDoesNotExist,
                format!("table {}.{} does not exist", self.name, name),
            )
        })?;
        if record.is_system {
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                format!("system table {}.{} cannot be dropped", self.name, name),
            ));
        }

        self.unregister_table_metadata(record.id, user_id)?;

        let table = self.find_table(name)?;
        table.discard_cached_blocks();
        drop(table);
        {
            let mut cache = self.table_cache.lock().unwrap();
            let _ = cache.erase(&(self.id, record.id));
        }
        let table_dir = self.dir.join(name);
        std::fs::remove_dir_all(&table_dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotRemoveFile,
                format!("cannot remove table directory {}", table_dir.display()),
                e,
            )
        })?;
        self.table_registry.write().unwrap().remove(name);
        self.save_meta()
    }

    /// 表更名：目录、元数据、SYS_TABLES行一并更新。
    pub fn rename_table(&self, name: &str, new_name: &str, user_id: u32) -> CResult<()> {
        let record = self.find_table_record(name).ok_or_else(|| {
            DbError::new(
                ErrorCode::TableDoesNotExist,
                format!("table {}.{} does not exist", self.name, name),
            )
        })?;
        if record.is_system {
            return Err(DbError::new(
                ErrorCode::CannotModifySystemTable,
                format!("system table {}.{} cannot be renamed", self.name, name),
            ));
        }
        if self.table_exists(new_name) {
            return Err(DbError::new(
                ErrorCode::TableAlreadyExists,
                format!("table {}.{} already exists", self.name, new_name),
            ));
        }

        let table = self.find_table(name)?;
        table.flush()?;
        table.discard_cached_blocks();
        drop(table);
        {
            let mut cache = self.table_cache.lock().unwrap();
            let _ = cache.erase(&(self.id, record.id));
        }

        let old_dir = self.dir.join(name);
        let new_dir = self.dir.join(new_name);
        std::fs::rename(&old_dir, &new_dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotOpenFile,
                format!("cannot rename table directory {}", old_dir.display()),
                e,
            )
        })?;
        rewrite_table_meta_name(&new_dir, new_name)?;

        {
            let mut registry = self.table_registry.write().unwrap();
            registry.remove(name);
            registry.insert(
                new_name.to_string(),
                TableRecord {
                    id: record.id,
                    name: new_name.to_string(),
                    is_system: false,
                },
            );
        }

        // SYS_TABLES行同步改名
        let sys_tables = self.find_table(SYS_TABLES_NAME)?;
        let name_position = sys_tables.find_column_position("NAME").unwrap();
        let id_position = sys_tables.find_column_position("TABLE_ID").unwrap();
        let tp = self.transaction_parameters(user_id);
        for trid in sys_tables.trid_snapshot() {
            if let Some(row) = sys_tables.read_row(trid)? {
                if row[id_position] == Variant::UInt64(record.id) {
                    sys_tables.update_row(
                        trid,
                        vec![(name_position, Variant::String(new_name.to_string()))],
                        tp,
                    )?;
                    break;
                }
            }
        }
        self.save_meta()
    }

    /// 用户表元数据落系统表：SYS_TABLES一行 + 当前列集的SYS_COLUMNS/约束行。
    pub fn register_table_metadata(self: &Arc<Self>, table: &Arc<Table>) -> CResult<()> {
        let sys_tables = self.find_table(SYS_TABLES_NAME)?;
        let tp = self.transaction_parameters(0);
        sys_tables.insert_row(
            vec![
                None,
                Some(Variant::String(table.name().to_string())),
                Some(Variant::Null),
                Some(Variant::UInt64(table.id())),
            ],
            tp,
        )?;
        self.register_column_set_metadata(table)
    }

    /// 当前列集的列与约束行（建表与每次列集演进后调用）。
    pub fn register_column_set_metadata(self: &Arc<Self>, table: &Arc<Table>) -> CResult<()> {
        let sys_columns = self.find_table(SYS_COLUMNS_NAME)?;
        let sys_constraints = self.find_table(SYS_COLUMN_CONSTRAINTS_NAME)?;
        let set = ColumnSetRecord::new(table.current_column_set_id(), table.column_infos());
        let tp = self.transaction_parameters(0);
        for (position, info) in set.columns.iter().enumerate() {
            sys_columns.insert_row(
                vec![
                    None,
                    Some(Variant::UInt64(table.id())),
                    Some(Variant::UInt64(set.id)),
                    Some(Variant::String(info.name.clone())),
                    Some(Variant::String(info.data_type.type_name().to_string())),
                    Some(Variant::UInt32(position as u32)),
                    Some(Variant::Bool(info.is_not_null())),
                ],
                tp,
            )?;
            for constraint in &info.constraints {
                let expression = constraint
                    .value
                    .as_ref()
                    .map(|v| crate::variant::ops::coerce_to_string(v))
                    .transpose()?;
                sys_constraints.insert_row(
                    vec![
                        None,
                        Some(Variant::UInt64(table.id())),
                        Some(Variant::UInt64(set.id)),
                        Some(Variant::String(info.name.clone())),
                        Some(Variant::String(constraint.name.clone())),
                        Some(Variant::String(
                            constraint.constraint_type.type_name().to_string(),
                        )),
                        Some(match expression {
                            Some(text) => Variant::String(text),
                            None => Variant::Null,
                        }),
                    ],
                    tp,
                )?;
            }
        }
        Ok(())
    }

    fn unregister_table_metadata(&self, table_id: u64, user_id: u32) -> CResult<()> {
        let tp = self.transaction_parameters(user_id);

        let sys_tables = self.find_table(SYS_TABLES_NAME)?;
        let id_position = sys_tables.find_column_position("TABLE_ID").unwrap();
        for trid in sys_tables.trid_snapshot() {
            if let Some(row) = sys_tables.read_row(trid)? {
                if row[id_position] == Variant::UInt64(table_id) {
                    sys_tables.delete_row(trid, tp)?;
                }
            }
        }

        for sys_name in [SYS_COLUMNS_NAME, SYS_COLUMN_CONSTRAINTS_NAME] {
            let sys_table = self.find_table(sys_name)?;
            let id_position = sys_table.find_column_position("TABLE_ID").unwrap();
            for trid in sys_table.trid_snapshot() {
                if let Some(row) = sys_table.read_row(trid)? {
                    if row[id_position] == Variant::UInt64(table_id) {
                        sys_table.delete_row(trid, tp)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// 库级落盘：缓存内本库表全部flush，元数据fsync。
    pub fn flush(&self) -> CResult<()> {
        let tables: Vec<Arc<Table>> = {
            let cache = self.table_cache.lock().unwrap();
            cache
                .iter()
                .filter(|((db_id, _), _)| *db_id == self.id)
                .map(|(_, table)| Arc::clone(table))
                .collect()
        };
        for table in tables {
            table.flush()?;
        }
        self.save_meta()
    }

    fn save_meta(&self) -> CResult<()> {
        let meta = DatabaseMeta {
            id: self.id,
            name: self.name.clone(),
            uuid: self.uuid.to_string(),
            cipher_id: self.cipher_id.clone(),
            next_table_id: self.next_table_id.load(Ordering::SeqCst),
            next_transaction_id: self.next_transaction_id.load(Ordering::SeqCst),
        };
        let encoded = bincode::serialize(&meta).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("cannot serialize database meta: {}", e),
            )
        })?;
        let mut stream = FileStream::create(&self.dir.join(DATABASE_META_FILE_NAME))?;
        stream.write_all(&encoded)?;
        stream.sync()?;
        Ok(())
    }
}

fn not_null_column(name: &str, data_type: VariantType, table_name: &str) -> ColumnInfo {
    let mut info = ColumnInfo::new(0, name, data_type);
    info.constraints.push(ColumnConstraintRecord::not_null(format!(
        "NN_{}_{}",
        table_name, name
    )));
    info
}
