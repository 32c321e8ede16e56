pub mod lru_cache;

pub use lru_cache::{
    CacheMap, DefaultEvictionPolicy, EvictionPolicy, HookedLruCache, OrderedLruCache,
    UnorderedLruCache,
};
