use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::codec::CodedInputStream;
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::SliceInputStream;

use crate::storage::block::ColumnDataBlock;
use crate::storage::block_registry::BlockRegistry;
use crate::storage::caches::{BlockCache, BlockKey, SharedBlock};
use crate::storage::cipher::Cipher;
use crate::storage::column_data_address::ColumnDataAddress;
use crate::variant::{codec as variant_codec, Variant, VariantType};

struct ColumnStorageState {
    registry: BlockRegistry,
    current_block_id: u32,
}

/// 列存储。类型不可变；值按追加写入一串定容块，块注册表定位块文件。
pub struct Column {
    database_id: u32,
    table_id: u64,
    id: u64,
    name: String,
    data_type: VariantType,
    dir: PathBuf,
    block_capacity: u32,
    cipher: Arc<dyn Cipher>,
    block_cache: Arc<BlockCache>,
    state: Mutex<ColumnStorageState>,
}

impl Column {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        database_id: u32,
        table_id: u64,
        id: u64,
        name: impl Into<String>,
        data_type: VariantType,
        table_dir: &Path,
        block_capacity: u32,
        cipher: Arc<dyn Cipher>,
        block_cache: Arc<BlockCache>,
    ) -> CResult<Self> {
        let name = name.into();
        let dir = table_dir.join(&name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotCreateDirectory,
                format!("cannot create column directory {}", dir.display()),
                e,
            )
        })?;
        let mut registry = BlockRegistry::open(&dir)?;
        let current_block_id = match registry.highest_block_id() {
            Some(id) => id,
            None => {
                registry.put(0, 0)?;
                0
            }
        };
        Ok(Self {
            database_id,
            table_id,
            id,
            name,
            data_type,
            dir,
            block_capacity,
            cipher,
            block_cache,
            state: Mutex::new(ColumnStorageState {
                registry,
                current_block_id,
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> VariantType {
        self.data_type
    }

    fn block_key(&self, block_id: u32) -> BlockKey {
        (self.database_id, self.table_id, self.id, block_id)
    }

    /// 从缓存取块，未命中则按注册表水位加载。
    fn block(&self, state: &ColumnStorageState, block_id: u32) -> CResult<SharedBlock> {
        let key = self.block_key(block_id);
        let mut cache = self.block_cache.lock().unwrap();
        if let Some(block) = cache.get(&key) {
            return Ok(Arc::clone(block));
        }
        let record = state.registry.find(block_id).ok_or_else(|| {
            DbError::new(
                ErrorCode::BlockNotFound,
                format!("block {} of column {} is not registered", block_id, self.name),
            )
        })?;
        let block = ColumnDataBlock::load(
            &self.dir,
            block_id,
            self.block_capacity,
            *record.free_offset(),
            Arc::clone(&self.cipher),
        )?;
        let shared = Arc::new(Mutex::new(block));
        cache.emplace(key, Arc::clone(&shared), false)?;
        Ok(shared)
    }

    /// 追加一条序列化记录，满块时轮换到新块。
    pub fn append_bytes(&self, bytes: &[u8]) -> CResult<ColumnDataAddress> {
        if bytes.len() as u32 > self.block_capacity {
            return Err(DbError::new(
                ErrorCode::ValueOutOfRange,
                format!(
                    "record of {} bytes exceeds block capacity {}",
                    bytes.len(),
                    self.block_capacity
                ),
            ));
        }
        let mut state = self.state.lock().unwrap();
        loop {
            let block = self.block(&state, state.current_block_id)?;
            let mut guard = block.lock().unwrap();
            if bytes.len() as u32 <= guard.remaining() {
                let offset = guard.append(bytes)?;
                return Ok(ColumnDataAddress::new(guard.id(), offset));
            }
            // 块轮换：满块落盘、登记最终水位、开新块
            guard.flush()?;
            state.registry.put(guard.id(), guard.free_offset())?;
            let next_id = guard.id() + 1;
            drop(guard);

            let new_block = ColumnDataBlock::create(
                &self.dir,
                next_id,
                self.block_capacity,
                Arc::clone(&self.cipher),
            );
            state.registry.put(next_id, 0)?;
            let shared = Arc::new(Mutex::new(new_block));
            self.block_cache
                .lock()
                .unwrap()
                .emplace(self.block_key(next_id), shared, false)?;
            state.current_block_id = next_id;
        }
    }

    /// 追加一个值。
    pub fn append_value(&self, value: &Variant) -> CResult<ColumnDataAddress> {
        let bytes = variant_codec::encode_to_vec(value)?;
        self.append_bytes(&bytes)
    }

    /// 在地址处的记录字节上运行闭包（块锁内，零拷贝）。
    pub fn with_bytes_at<R>(
        &self,
        address: ColumnDataAddress,
        f: impl FnOnce(&[u8]) -> CResult<R>,
    ) -> CResult<R> {
        let state = self.state.lock().unwrap();
        let block = self.block(&state, address.block_id)?;
        let guard = block.lock().unwrap();
        let slice = guard.read_from(address.offset)?;
        f(slice)
    }

    /// 读地址处的值。
    pub fn read_value(&self, address: ColumnDataAddress) -> CResult<Variant> {
        let data_type = self.data_type;
        self.with_bytes_at(address, |slice| {
            let mut source = SliceInputStream::new(slice);
            let mut coded = CodedInputStream::new(&mut source);
            variant_codec::read_variant(data_type, &mut coded)
        })
    }

    /// 本列缓存块全部落盘并登记当前水位。
    pub fn flush(&self) -> CResult<()> {
        let mut state = self.state.lock().unwrap();
        let (database_id, table_id, column_id) = (self.database_id, self.table_id, self.id);
        crate::storage::caches::flush_blocks(&self.block_cache, |key| {
            key.0 == database_id && key.1 == table_id && key.2 == column_id
        });
        let current_block_id = state.current_block_id;
        let current_offset = {
            let block = self.block(&state, current_block_id)?;
            let guard = block.lock().unwrap();
            guard.free_offset()
        };
        let recorded = state
            .registry
            .find(current_block_id)
            .map(|r| *r.free_offset())
            .unwrap_or(0);
        if recorded != current_offset {
            state.registry.put(current_block_id, current_offset)?;
        }
        Ok(())
    }

    /// 丢弃本列缓存块（列目录即将删除）。
    pub fn discard_cached_blocks(&self) {
        let (database_id, table_id, column_id) = (self.database_id, self.table_id, self.id);
        crate::storage::caches::discard_blocks(&self.block_cache, |key| {
            key.0 == database_id && key.1 == table_id && key.2 == column_id
        });
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .finish()
    }
}
