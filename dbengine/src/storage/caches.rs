use std::sync::{Arc, Mutex};

use tracing::{error, warn};

use common::cache::{EvictionPolicy, UnorderedLruCache};

use crate::storage::block::ColumnDataBlock;
use crate::storage::table::Table;

/// 块缓存键：（数据库id，表id，列id，块id）。
pub type BlockKey = (u32, u64, u64, u32);

pub type SharedBlock = Arc<Mutex<ColumnDataBlock>>;

/// 块缓存策略：写入进行中的块（仍被外部持有）不可淘汰；淘汰时落盘。
#[derive(Debug, Default)]
pub struct BlockEvictionPolicy;

impl EvictionPolicy<BlockKey, SharedBlock> for BlockEvictionPolicy {
    fn can_evict(&self, _key: &BlockKey, value: &SharedBlock) -> bool {
        // 外部引用存在说明有读写在途
        Arc::strong_count(value) == 1
    }

    fn on_evict(&self, key: &BlockKey, value: &mut SharedBlock, _clearing: bool) {
        match value.lock() {
            Ok(mut block) => {
                if let Err(e) = block.flush() {
                    error!("cannot flush evicted block {:?}: {}", key, e);
                }
            }
            Err(_) => warn!("evicted block {:?} mutex is poisoned", key),
        }
    }
}

pub type BlockCache = Mutex<UnorderedLruCache<BlockKey, SharedBlock, BlockEvictionPolicy>>;

pub fn new_block_cache(capacity: usize) -> Arc<BlockCache> {
    Arc::new(Mutex::new(UnorderedLruCache::new(
        capacity,
        BlockEvictionPolicy,
    )))
}

/// 谓词命中的缓存块落盘（列/表/库级flush共用）。
pub fn flush_blocks(cache: &BlockCache, predicate: impl Fn(&BlockKey) -> bool) {
    let guard = cache.lock().unwrap();
    for (key, block) in guard.iter() {
        if !predicate(key) {
            continue;
        }
        match block.lock() {
            Ok(mut block) => {
                if let Err(e) = block.flush() {
                    error!("cannot flush block {:?}: {}", key, e);
                }
            }
            Err(_) => warn!("block {:?} mutex is poisoned", key),
        }
    }
}

/// 谓词命中的缓存块丢弃（删表/删库后清理）。
pub fn discard_blocks(cache: &BlockCache, predicate: impl Fn(&BlockKey) -> bool) {
    let mut guard = cache.lock().unwrap();
    let keys: Vec<BlockKey> = guard
        .iter()
        .map(|(key, _)| *key)
        .filter(|key| predicate(key))
        .collect();
    for key in keys {
        // 数据文件即将删除，放弃未落盘内容
        if let Some(block) = guard.peek(&key) {
            if let Ok(mut block) = block.lock() {
                block.mark_clean();
            }
        }
        let _ = guard.erase(&key);
    }
}

/// 表缓存键：（数据库id，表id）。
pub type TableKey = (u32, u64);

/// 表缓存策略：被打开的数据集持有的表不可淘汰；淘汰时落盘。
#[derive(Debug, Default)]
pub struct TableEvictionPolicy;

impl EvictionPolicy<TableKey, Arc<Table>> for TableEvictionPolicy {
    fn can_evict(&self, _key: &TableKey, value: &Arc<Table>) -> bool {
        Arc::strong_count(value) == 1
    }

    fn on_evict(&self, key: &TableKey, value: &mut Arc<Table>, _clearing: bool) {
        if let Err(e) = value.flush() {
            error!("cannot flush evicted table {:?}: {}", key, e);
        }
    }
}

pub type TableCache = Mutex<UnorderedLruCache<TableKey, Arc<Table>, TableEvictionPolicy>>;

pub fn new_table_cache(capacity: usize) -> Arc<TableCache> {
    Arc::new(Mutex::new(UnorderedLruCache::new(
        capacity,
        TableEvictionPolicy,
    )))
}

#[cfg(test)]
mod test {
    use crate::storage::cipher::NoneCipher;

    use super::*;

    fn make_block(id: u32) -> SharedBlock {
        let dir = std::env::temp_dir();
        Arc::new(Mutex::new(ColumnDataBlock::create(
            &dir,
            id,
            1024,
            Arc::new(NoneCipher),
        )))
    }

    #[test]
    fn test_block_in_use_is_not_evicted() {
        let cache = new_block_cache(2);
        let pinned = make_block(1);
        {
            let mut guard = cache.lock().unwrap();
            guard.emplace((1, 1, 1, 1), Arc::clone(&pinned), false).unwrap();
            guard.emplace((1, 1, 1, 2), make_block(2), false).unwrap();
            guard.emplace((1, 1, 1, 3), make_block(3), false).unwrap();
            // 被持有的块未被淘汰
            assert!(guard.contains(&(1, 1, 1, 1)));
            assert!(!guard.contains(&(1, 1, 1, 2)));
        }
        drop(pinned);
    }
}
