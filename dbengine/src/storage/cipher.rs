use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

/// 块加密算法。块在落盘前整体加密，加载后整体解密。
pub trait Cipher: Send + Sync {
    fn id(&self) -> &str;

    fn encrypt(&self, data: &[u8]) -> Vec<u8>;

    fn decrypt(&self, data: &[u8]) -> CResult<Vec<u8>>;
}

/// 空加密（测试与默认配置）。
#[derive(Debug, Default)]
pub struct NoneCipher;

pub const NONE_CIPHER_ID: &str = "none";

impl Cipher for NoneCipher {
    fn id(&self) -> &str {
        NONE_CIPHER_ID
    }

    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decrypt(&self, data: &[u8]) -> CResult<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// 进程内加密算法注册表。作为显式协作者传入Instance，测试可替换。
pub struct CipherRegistry {
    ciphers: HashMap<String, Arc<dyn Cipher>>,
}

impl CipherRegistry {
    pub fn new() -> Self {
        Self {
            ciphers: HashMap::new(),
        }
    }

    /// 内置算法集合。
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NoneCipher));
        registry
    }

    pub fn register(&mut self, cipher: Arc<dyn Cipher>) {
        self.ciphers.insert(cipher.id().to_string(), cipher);
    }

    pub fn find(&self, cipher_id: &str) -> CResult<Arc<dyn Cipher>> {
        self.ciphers.get(cipher_id).cloned().ok_or_else(|| {
            DbError::new(
                ErrorCode::UnknownCipher,
                format!("unknown cipher '{}'", cipher_id),
            )
        })
    }

    pub fn contains(&self, cipher_id: &str) -> bool {
        self.ciphers.contains_key(cipher_id)
    }
}

impl Default for CipherRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// 进程默认注册表。
pub static DEFAULT_CIPHER_REGISTRY: Lazy<Arc<CipherRegistry>> =
    Lazy::new(|| Arc::new(CipherRegistry::with_builtin()));
