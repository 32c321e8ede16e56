use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::err::error_code::ErrorCode;
use crate::err::db_error::DbError;
use crate::err::CResult;

/// 实例级配置。由前端进程构造后传入，核心不读取环境变量。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceOptions {
    /// 数据文件根目录
    pub data_dir: PathBuf,

    /// 新建数据库的默认加密算法id
    #[serde(default = "default_cipher_id")]
    pub default_cipher_id: String,

    #[serde(default = "default_user_cache_capacity")]
    pub user_cache_capacity: usize,

    #[serde(default = "default_database_cache_capacity")]
    pub database_cache_capacity: usize,

    #[serde(default = "default_table_cache_capacity")]
    pub table_cache_capacity: usize,

    #[serde(default = "default_block_cache_capacity")]
    pub block_cache_capacity: usize,

    /// REST 响应payload上限（字节）
    #[serde(default = "default_max_json_payload_size")]
    pub max_json_payload_size: usize,

    #[serde(default = "default_max_databases")]
    pub max_databases: usize,

    #[serde(default = "default_max_tables_per_database")]
    pub max_tables_per_database: usize,

    #[serde(default = "default_max_users")]
    pub max_users: usize,
}

fn default_cipher_id() -> String {
    String::from("none")
}

fn default_user_cache_capacity() -> usize {
    100
}

fn default_database_cache_capacity() -> usize {
    100
}

fn default_table_cache_capacity() -> usize {
    256
}

fn default_block_cache_capacity() -> usize {
    1024
}

fn default_max_json_payload_size() -> usize {
    10 * 1024 * 1024
}

fn default_max_databases() -> usize {
    4096
}

fn default_max_tables_per_database() -> usize {
    4096
}

fn default_max_users() -> usize {
    8192
}

/// 各缓存允许的最小容量
pub const MIN_USER_CACHE_CAPACITY: usize = 2;
pub const MIN_DATABASE_CACHE_CAPACITY: usize = 2;
pub const MIN_TABLE_CACHE_CAPACITY: usize = 16;
pub const MIN_BLOCK_CACHE_CAPACITY: usize = 32;

impl InstanceOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        InstanceOptions {
            data_dir: data_dir.into(),
            default_cipher_id: default_cipher_id(),
            user_cache_capacity: default_user_cache_capacity(),
            database_cache_capacity: default_database_cache_capacity(),
            table_cache_capacity: default_table_cache_capacity(),
            block_cache_capacity: default_block_cache_capacity(),
            max_json_payload_size: default_max_json_payload_size(),
            max_databases: default_max_databases(),
            max_tables_per_database: default_max_tables_per_database(),
            max_users: default_max_users(),
        }
    }

    /// 从yaml配置文件加载
    pub fn from_yaml_file(path: &Path) -> CResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let options: InstanceOptions = serde_yaml::from_str(&text).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("cannot parse options file {}: {}", path.display(), e),
            )
        })?;
        options.validate()?;
        Ok(options)
    }

    /// 校验缓存容量下限。零容量一律拒绝。
    pub fn validate(&self) -> CResult<()> {
        if self.user_cache_capacity < MIN_USER_CACHE_CAPACITY {
            return Err(invalid_capacity("user", self.user_cache_capacity, MIN_USER_CACHE_CAPACITY));
        }
        if self.database_cache_capacity < MIN_DATABASE_CACHE_CAPACITY {
            return Err(invalid_capacity(
                "database",
                self.database_cache_capacity,
                MIN_DATABASE_CACHE_CAPACITY,
            ));
        }
        if self.table_cache_capacity < MIN_TABLE_CACHE_CAPACITY {
            return Err(invalid_capacity(
                "table",
                self.table_cache_capacity,
                MIN_TABLE_CACHE_CAPACITY,
            ));
        }
        if self.block_cache_capacity < MIN_BLOCK_CACHE_CAPACITY {
            return Err(invalid_capacity(
                "block",
                self.block_cache_capacity,
                MIN_BLOCK_CACHE_CAPACITY,
            ));
        }
        if self.max_json_payload_size == 0 {
            return Err(DbError::new(
                ErrorCode::InvalidAttribute,
                "max_json_payload_size must be positive",
            ));
        }
        Ok(())
    }
}

fn invalid_capacity(name: &str, value: usize, min: usize) -> DbError {
    DbError::new(
        ErrorCode::InvalidAttribute,
        format!("{} cache capacity {} is less than minimum {}", name, value, min),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = InstanceOptions::new("/tmp/dbengine-data");
        assert!(options.validate().is_ok());
        assert_eq!(options.default_cipher_id, "none");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut options = InstanceOptions::new("/tmp/dbengine-data");
        options.block_cache_capacity = 0;
        assert!(options.validate().is_err());
    }
}
