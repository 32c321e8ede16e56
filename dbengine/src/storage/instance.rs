use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use lru::LruCache;
use tracing::{error, info, warn};
use uuid::Uuid;

use common::cache::{EvictionPolicy, OrderedLruCache};
use common::config::options::InstanceOptions;
use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{FileStream, InputStream, OutputStream};
use common::log::TracingFactory;

use crate::storage::block::DEFAULT_BLOCK_CAPACITY;
use crate::storage::caches::{new_block_cache, new_table_cache, BlockCache, TableCache};
use crate::storage::cipher::CipherRegistry;
use crate::storage::database::{
    Database, DATABASE_META_FILE_NAME, SYSTEM_DATABASE_NAME, SYS_DATABASES_NAME, SYS_USERS_NAME,
};
use crate::storage::user::{
    DatabaseObjectType, PermissionMask, User, UserPermissionKey,
};
use crate::storage::is_valid_database_object_name;
use crate::variant::Variant;

/// 超级用户
pub const SUPER_USER_NAME: &str = "ROOT";
pub const SUPER_USER_ID: u32 = 1;

const USERS_META_FILE_NAME: &str = "users.meta";

#[derive(Debug, Clone)]
pub struct DatabaseRecord {
    pub id: u32,
    pub name: String,
    pub dir: PathBuf,
}

/// 数据库缓存策略：使用计数非零的库不可淘汰；淘汰前落盘。
/// 全员不可淘汰时给一次重扫机会（使用计数可能已归零）。
#[derive(Debug, Default)]
pub struct DatabaseEvictionPolicy {
    sweep_attempts: AtomicU8,
}

impl EvictionPolicy<String, Arc<Database>> for DatabaseEvictionPolicy {
    fn can_evict(&self, _key: &String, value: &Arc<Database>) -> bool {
        value.use_count() == 0 && Arc::strong_count(value) == 1
    }

    fn on_evict(&self, key: &String, value: &mut Arc<Database>, _clearing: bool) {
        self.sweep_attempts.store(0, Ordering::SeqCst);
        if let Err(e) = value.flush() {
            error!("cannot flush evicted database {}: {}", key, e);
        }
    }

    fn on_last_chance_cleanup(&mut self) -> bool {
        if self.sweep_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            true
        } else {
            self.sweep_attempts.store(0, Ordering::SeqCst);
            false
        }
    }
}

type DatabaseCache = Mutex<OrderedLruCache<String, Arc<Database>, DatabaseEvictionPolicy>>;

/// 实例：数据库目录、用户与权限、四级缓存的属主。
///
/// 服务启动时从配置构造，关停时flush全部数据库后析构。
/// 日志工厂与加密注册表都是显式协作者，测试可替换。
pub struct Instance {
    options: InstanceOptions,
    uuid: Uuid,
    cipher_registry: Arc<CipherRegistry>,
    tracing_factory: Arc<TracingFactory>,
    data_dir: PathBuf,
    database_registry: RwLock<HashMap<String, DatabaseRecord>>,
    next_database_id: AtomicU32,
    database_cache: DatabaseCache,
    table_cache: Arc<TableCache>,
    block_cache: Arc<BlockCache>,
    user_registry: RwLock<HashMap<String, u32>>,
    user_cache: Mutex<LruCache<u32, Arc<RwLock<User>>>>,
    users: RwLock<Vec<User>>,
    next_user_id: AtomicU32,
}

impl Instance {
    pub fn open(
        options: InstanceOptions,
        cipher_registry: Arc<CipherRegistry>,
        tracing_factory: Arc<TracingFactory>,
    ) -> CResult<Arc<Instance>> {
        options.validate()?;
        let data_dir = options.data_dir.clone();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotCreateDirectory,
                format!("cannot create data directory {}", data_dir.display()),
                e,
            )
        })?;

        let instance = Arc::new(Instance {
            uuid: Uuid::new_v4(),
            cipher_registry,
            tracing_factory,
            data_dir: data_dir.clone(),
            database_registry: RwLock::new(HashMap::new()),
            next_database_id: AtomicU32::new(1),
            database_cache: Mutex::new(OrderedLruCache::new(
                options.database_cache_capacity,
                DatabaseEvictionPolicy::default(),
            )),
            table_cache: new_table_cache(options.table_cache_capacity),
            block_cache: new_block_cache(options.block_cache_capacity),
            user_registry: RwLock::new(HashMap::new()),
            user_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(options.user_cache_capacity).unwrap(),
            )),
            users: RwLock::new(Vec::new()),
            next_user_id: AtomicU32::new(SUPER_USER_ID + 1),
            options,
        });

        instance.scan_databases()?;
        instance.load_users()?;
        instance.bootstrap()?;
        Ok(instance)
    }

    fn scan_databases(&self) -> CResult<()> {
        let mut registry = self.database_registry.write().unwrap();
        let mut max_id = 0u32;
        for entry in std::fs::read_dir(&self.data_dir).map_err(DbError::from)? {
            let entry = entry.map_err(DbError::from)?;
            let path = entry.path();
            if !path.is_dir() || !path.join(DATABASE_META_FILE_NAME).exists() {
                continue;
            }
            let database = Database::load(
                path.clone(),
                self.cipher_for_dir(&path)?,
                DEFAULT_BLOCK_CAPACITY,
                Arc::clone(&self.table_cache),
                Arc::clone(&self.block_cache),
            )?;
            max_id = max_id.max(database.id());
            registry.insert(
                database.name().to_string(),
                DatabaseRecord {
                    id: database.id(),
                    name: database.name().to_string(),
                    dir: path,
                },
            );
        }
        self.next_database_id.store(max_id + 1, Ordering::SeqCst);
        Ok(())
    }

    /// 从库元数据读取加密算法id。
    fn cipher_for_dir(&self, dir: &std::path::Path) -> CResult<Arc<dyn crate::storage::cipher::Cipher>> {
        // 元数据是小bincode文件：读取cipher_id后经注册表解析
        #[derive(serde::Deserialize)]
        struct CipherProbe {
            _id: u32,
            _name: String,
            _uuid: String,
            cipher_id: String,
        }
        let mut stream = FileStream::open(&dir.join(DATABASE_META_FILE_NAME))?;
        let mut raw = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        let probe: CipherProbe = bincode::deserialize(&raw).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("corrupt database meta in {}: {}", dir.display(), e),
            )
        })?;
        self.cipher_registry.find(&probe.cipher_id)
    }

    fn bootstrap(self: &Arc<Self>) -> CResult<()> {
        if !self.database_exists(SYSTEM_DATABASE_NAME) {
            self.create_database_internal(SYSTEM_DATABASE_NAME, None)?;
        }
        if self.user_registry.read().unwrap().is_empty() {
            let root = User::new(SUPER_USER_ID, SUPER_USER_NAME, true);
            self.user_registry
                .write()
                .unwrap()
                .insert(root.name.clone(), root.id);
            self.users.write().unwrap().push(root.clone());
            self.save_users()?;
            self.insert_sys_users_row(&root)?;
            info!("bootstrapped super user {}", SUPER_USER_NAME);
        }
        Ok(())
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn options(&self) -> &InstanceOptions {
        &self.options
    }

    pub fn cipher_registry(&self) -> &Arc<CipherRegistry> {
        &self.cipher_registry
    }

    pub fn tracing_factory(&self) -> &Arc<TracingFactory> {
        &self.tracing_factory
    }

    // //////////////////
    // 数据库
    // //////////////////

    pub fn database_exists(&self, name: &str) -> bool {
        self.database_registry.read().unwrap().contains_key(name)
    }

    /// 按名排序的数据库记录。
    pub fn database_records_ordered_by_name(&self) -> Vec<DatabaseRecord> {
        let registry = self.database_registry.read().unwrap();
        let mut records: Vec<DatabaseRecord> = registry.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn find_database(&self, name: &str) -> CResult<Arc<Database>> {
        let record = {
            let registry = self.database_registry.read().unwrap();
            registry.get(name).cloned()
        }
        .ok_or_else(|| {
            DbError::new(
                ErrorCode::DatabaseDoesNotExist,
                format!("database {} does not exist", name),
            )
        })?;

        let mut cache = self.database_cache.lock().unwrap();
        if let Some(database) = cache.get(&record.name) {
            return Ok(Arc::clone(database));
        }
        let database = Database::load(
            record.dir.clone(),
            self.cipher_for_dir(&record.dir)?,
            DEFAULT_BLOCK_CAPACITY,
            Arc::clone(&self.table_cache),
            Arc::clone(&self.block_cache),
        )?;
        cache.emplace(record.name, Arc::clone(&database), false)?;
        Ok(database)
    }

    pub fn system_database(&self) -> CResult<Arc<Database>> {
        self.find_database(SYSTEM_DATABASE_NAME)
    }

    pub fn create_database(
        self: &Arc<Self>,
        name: &str,
        cipher_id: Option<&str>,
        current_user_id: u32,
    ) -> CResult<Arc<Database>> {
        self.check_instance_permission(current_user_id, PermissionMask::CREATE)?;
        if !is_valid_database_object_name(name) {
            return Err(DbError::new(
                ErrorCode::InvalidDatabaseName,
                format!("invalid database name '{}'", name),
            ));
        }
        if self.database_registry.read().unwrap().len() >= self.options.max_databases {
            return Err(DbError::new(
                ErrorCode::TooManyDatabases,
                format!("instance reached the database limit {}", self.options.max_databases),
            ));
        }
        self.create_database_internal(name, cipher_id)
    }

    fn create_database_internal(
        self: &Arc<Self>,
        name: &str,
        cipher_id: Option<&str>,
    ) -> CResult<Arc<Database>> {
        if self.database_exists(name) {
            return Err(DbError::new(
                ErrorCode::DatabaseAlreadyExists,
                format!("database {} already exists", name),
            ));
        }
        let cipher_id = cipher_id.unwrap_or(&self.options.default_cipher_id);
        let cipher = self.cipher_registry.find(cipher_id)?;

        let id = self.next_database_id.fetch_add(1, Ordering::SeqCst);
        let database = Database::create(
            id,
            name,
            cipher_id,
            cipher,
            &self.data_dir,
            DEFAULT_BLOCK_CAPACITY,
            Arc::clone(&self.table_cache),
            Arc::clone(&self.block_cache),
        )?;
        self.database_registry.write().unwrap().insert(
            name.to_string(),
            DatabaseRecord {
                id,
                name: name.to_string(),
                dir: database.dir().to_path_buf(),
            },
        );
        self.database_cache
            .lock()
            .unwrap()
            .emplace(name.to_string(), Arc::clone(&database), false)?;
        self.insert_sys_databases_row(&database)?;
        Ok(database)
    }

    fn insert_sys_databases_row(&self, database: &Arc<Database>) -> CResult<()> {
        let system = self.system_database()?;
        let sys_databases = system.find_table(SYS_DATABASES_NAME)?;
        sys_databases.insert_row(
            vec![
                None,
                Some(Variant::String(database.name().to_string())),
                Some(Variant::String(database.uuid().to_string())),
                Some(Variant::String(database.cipher_id().to_string())),
            ],
            system.transaction_parameters(SUPER_USER_ID),
        )?;
        Ok(())
    }

    fn delete_sys_databases_row(&self, name: &str) -> CResult<()> {
        let system = self.system_database()?;
        let sys_databases = system.find_table(SYS_DATABASES_NAME)?;
        let name_position = sys_databases.find_column_position("NAME").unwrap();
        let tp = system.transaction_parameters(SUPER_USER_ID);
        for trid in sys_databases.trid_snapshot() {
            if let Some(row) = sys_databases.read_row(trid)? {
                if row[name_position] == Variant::String(name.to_string()) {
                    sys_databases.delete_row(trid, tp)?;
                }
            }
        }
        Ok(())
    }

    /// 删库：系统库与使用中的库拒绝；数据目录整体移除。
    pub fn drop_database(&self, name: &str, current_user_id: u32) -> CResult<()> {
        if name == SYSTEM_DATABASE_NAME {
            return Err(DbError::new(
                ErrorCode::CannotDropSystemDatabase,
                "the system database cannot be dropped",
            ));
        }
        let record = {
            let registry = self.database_registry.read().unwrap();
            registry.get(name).cloned()
        }
        .ok_or_else(|| {
            DbError::new(
                ErrorCode::DatabaseDoesNotExist,
                format!("database {} does not exist", name),
            )
        })?;
        self.check_database_permission(current_user_id, record.id, PermissionMask::DROP)?;

        let database = self.find_database(name)?;
        if database.use_count() > 0 {
            return Err(DbError::new(
                ErrorCode::CannotDropUsedDatabase,
                format!("database {} is in use", name),
            ));
        }
        let database_id = database.id();
        drop(database);

        // 缓存清理：块直接丢弃，表项摘除
        crate::storage::caches::discard_blocks(&self.block_cache, |key| key.0 == database_id);
        {
            let mut cache = self.table_cache.lock().unwrap();
            let keys: Vec<(u32, u64)> = cache
                .iter()
                .map(|(key, _)| *key)
                .filter(|(db_id, _)| *db_id == database_id)
                .collect();
            for key in keys {
                let _ = cache.erase(&key);
            }
        }
        {
            let mut cache = self.database_cache.lock().unwrap();
            let _ = cache.erase(&name.to_string());
        }

        self.delete_sys_databases_row(name)?;
        std::fs::remove_dir_all(&record.dir).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotRemoveFile,
                format!("cannot remove database directory {}", record.dir.display()),
                e,
            )
        })?;
        self.database_registry.write().unwrap().remove(name);
        info!("dropped database {}", name);
        Ok(())
    }

    /// 挂接既有数据目录为一个数据库。
    pub fn attach_database(
        self: &Arc<Self>,
        name: &str,
        path: &str,
        current_user_id: u32,
    ) -> CResult<()> {
        self.check_instance_permission(current_user_id, PermissionMask::CREATE)?;
        if self.database_exists(name) {
            return Err(DbError::new(
                ErrorCode::DatabaseAlreadyExists,
                format!("database {} already exists", name),
            ));
        }
        let dir = PathBuf::from(path);
        if !dir.join(DATABASE_META_FILE_NAME).exists() {
            return Err(DbError::new(
                ErrorCode::DatabaseDoesNotExist,
                format!("{} does not hold a database", path),
            ));
        }
        let database = Database::load(
            dir.clone(),
            self.cipher_for_dir(&dir)?,
            DEFAULT_BLOCK_CAPACITY,
            Arc::clone(&self.table_cache),
            Arc::clone(&self.block_cache),
        )?;
        if database.name() != name {
            return Err(DbError::new(
                ErrorCode::InvalidDatabaseName,
                format!(
                    "directory {} holds database {}, not {}",
                    path,
                    database.name(),
                    name
                ),
            ));
        }
        self.database_registry.write().unwrap().insert(
            name.to_string(),
            DatabaseRecord {
                id: database.id(),
                name: name.to_string(),
                dir,
            },
        );
        self.insert_sys_databases_row(&database)?;
        Ok(())
    }

    /// 摘除数据库：文件保留在原目录。
    pub fn detach_database(&self, name: &str, current_user_id: u32) -> CResult<()> {
        if name == SYSTEM_DATABASE_NAME {
            return Err(DbError::new(
                ErrorCode::CannotDropSystemDatabase,
                "the system database cannot be detached",
            ));
        }
        let database = self.find_database(name)?;
        self.check_database_permission(current_user_id, database.id(), PermissionMask::DROP)?;
        if database.use_count() > 0 {
            return Err(DbError::new(
                ErrorCode::CannotDropUsedDatabase,
                format!("database {} is in use", name),
            ));
        }
        database.flush()?;
        drop(database);
        {
            let mut cache = self.database_cache.lock().unwrap();
            let _ = cache.erase(&name.to_string());
        }
        self.delete_sys_databases_row(name)?;
        self.database_registry.write().unwrap().remove(name);
        Ok(())
    }

    // //////////////////
    // 用户
    // //////////////////

    fn load_users(&self) -> CResult<()> {
        let path = self.data_dir.join(USERS_META_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }
        let mut stream = FileStream::open(&path)?;
        let mut raw = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        let users: Vec<User> = bincode::deserialize(&raw).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("corrupt users meta: {}", e),
            )
        })?;
        let mut registry = self.user_registry.write().unwrap();
        let mut max_id = SUPER_USER_ID;
        for user in &users {
            registry.insert(user.name.clone(), user.id);
            max_id = max_id.max(user.id);
        }
        self.next_user_id.store(max_id + 1, Ordering::SeqCst);
        *self.users.write().unwrap() = users;
        Ok(())
    }

    fn save_users(&self) -> CResult<()> {
        let users = self.users.read().unwrap();
        let encoded = bincode::serialize(&*users).map_err(|e| {
            DbError::new(
                ErrorCode::InvalidAttribute,
                format!("cannot serialize users meta: {}", e),
            )
        })?;
        drop(users);
        let mut stream = FileStream::create(&self.data_dir.join(USERS_META_FILE_NAME))?;
        stream.write_all(&encoded)?;
        stream.sync()?;
        Ok(())
    }

    pub fn find_user_id(&self, name: &str) -> CResult<u32> {
        self.user_registry
            .read()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| {
                DbError::new(
                    ErrorCode::UserDoesNotExist,
                    format!("user {} does not exist", name),
                )
            })
    }

    /// 用户缓存命中或从存储装载。
    pub fn find_user(&self, user_id: u32) -> CResult<Arc<RwLock<User>>> {
        {
            let mut cache = self.user_cache.lock().unwrap();
            if let Some(user) = cache.get(&user_id) {
                return Ok(Arc::clone(user));
            }
        }
        let users = self.users.read().unwrap();
        let user = users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| {
                DbError::new(
                    ErrorCode::UserDoesNotExist,
                    format!("user #{} does not exist", user_id),
                )
            })?;
        drop(users);
        let shared = Arc::new(RwLock::new(user));
        self.user_cache
            .lock()
            .unwrap()
            .put(user_id, Arc::clone(&shared));
        Ok(shared)
    }

    pub fn find_user_by_name(&self, name: &str) -> CResult<Arc<RwLock<User>>> {
        self.find_user(self.find_user_id(name)?)
    }

    /// 用户变更写回存储并使缓存失效。
    fn store_user(&self, updated: User) -> CResult<()> {
        {
            let mut users = self.users.write().unwrap();
            match users.iter_mut().find(|u| u.id == updated.id) {
                Some(slot) => *slot = updated.clone(),
                None => users.push(updated.clone()),
            }
        }
        self.user_cache.lock().unwrap().pop(&updated.id);
        self.save_users()
    }

    pub fn user_names_ordered(&self) -> Vec<String> {
        let registry = self.user_registry.read().unwrap();
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create_user(
        self: &Arc<Self>,
        name: &str,
        real_name: Option<String>,
        active: bool,
        current_user_id: u32,
    ) -> CResult<u32> {
        self.check_super_user(current_user_id)?;
        if !is_valid_database_object_name(name) {
            return Err(DbError::new(
                ErrorCode::InvalidUserName,
                format!("invalid user name '{}'", name),
            ));
        }
        if self.user_registry.read().unwrap().contains_key(name) {
            return Err(DbError::new(
                ErrorCode::UserAlreadyExists,
                format!("user {} already exists", name),
            ));
        }
        if self.user_registry.read().unwrap().len() >= self.options.max_users {
            return Err(DbError::new(
                ErrorCode::TooManyUsers,
                format!("instance reached the user limit {}", self.options.max_users),
            ));
        }
        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst);
        let mut user = User::new(id, name, false);
        user.real_name = real_name;
        user.active = active;
        self.user_registry
            .write()
            .unwrap()
            .insert(name.to_string(), id);
        self.store_user(user.clone())?;
        self.insert_sys_users_row(&user)?;
        Ok(id)
    }

    pub fn drop_user(&self, name: &str, current_user_id: u32) -> CResult<()> {
        self.check_super_user(current_user_id)?;
        let user_id = self.find_user_id(name)?;
        if user_id == SUPER_USER_ID {
            return Err(DbError::new(
                ErrorCode::PermissionDenied,
                "the super user cannot be dropped",
            ));
        }
        self.user_registry.write().unwrap().remove(name);
        self.users.write().unwrap().retain(|u| u.id != user_id);
        self.user_cache.lock().unwrap().pop(&user_id);
        self.save_users()?;
        self.delete_sys_users_row(name)?;
        Ok(())
    }

    /// 读改写一个用户（属性、密钥、令牌、权限共用路径）。
    pub fn update_user<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut User) -> CResult<R>,
    ) -> CResult<R> {
        let user_id = self.find_user_id(name)?;
        let shared = self.find_user(user_id)?;
        let mut user = shared.write().unwrap();
        let result = f(&mut user)?;
        let updated = user.clone();
        drop(user);
        self.store_user(updated)?;
        Ok(result)
    }

    pub fn check_user_token(&self, name: &str, token_name: &str, value: &[u8]) -> CResult<()> {
        let user = self.find_user_by_name(name)?;
        let guard = user.read().unwrap();
        guard.check_token(token_name, value)
    }

    // //////////////////
    // 权限
    // //////////////////

    fn check_super_user(&self, user_id: u32) -> CResult<()> {
        let user = self.find_user(user_id)?;
        if !user.read().unwrap().is_super_user() {
            return Err(DbError::new(
                ErrorCode::PermissionDenied,
                "operation requires the super user",
            ));
        }
        Ok(())
    }

    pub fn check_instance_permission(
        &self,
        user_id: u32,
        required: PermissionMask,
    ) -> CResult<()> {
        let key = UserPermissionKey::new(0, DatabaseObjectType::Instance, 0);
        self.check_permission(user_id, key, required)
    }

    pub fn check_database_permission(
        &self,
        user_id: u32,
        database_id: u32,
        required: PermissionMask,
    ) -> CResult<()> {
        let key = UserPermissionKey::new(database_id, DatabaseObjectType::Database, database_id as u64);
        self.check_permission(user_id, key, required)
    }

    pub fn check_table_permission(
        &self,
        user_id: u32,
        database_id: u32,
        table_id: u64,
        required: PermissionMask,
    ) -> CResult<()> {
        let key = UserPermissionKey::new(database_id, DatabaseObjectType::Table, table_id);
        self.check_permission(user_id, key, required)
    }

    pub fn check_permission(
        &self,
        user_id: u32,
        key: UserPermissionKey,
        required: PermissionMask,
    ) -> CResult<()> {
        let user = self.find_user(user_id)?;
        let guard = user.read().unwrap();
        if guard.has_permissions(&key, required) {
            Ok(())
        } else {
            Err(DbError::new(
                ErrorCode::PermissionDenied,
                format!("user {} lacks required permissions", guard.name),
            ))
        }
    }

    /// 表权限授予。表名"*"为该库全表通配，库名"*"为任意库。
    pub fn grant_table_permissions(
        self: &Arc<Self>,
        user_name: &str,
        database_name: &str,
        table_name: &str,
        permissions: PermissionMask,
        with_grant_option: bool,
        current_user_id: u32,
    ) -> CResult<()> {
        self.check_super_user(current_user_id)?;
        let key = self.table_permission_key(database_name, table_name)?;
        self.update_user(user_name, |user| {
            user.grant_permissions(key, permissions, with_grant_option);
            Ok(())
        })
    }

    pub fn revoke_table_permissions(
        self: &Arc<Self>,
        user_name: &str,
        database_name: &str,
        table_name: &str,
        permissions: PermissionMask,
        current_user_id: u32,
    ) -> CResult<()> {
        self.check_super_user(current_user_id)?;
        let key = self.table_permission_key(database_name, table_name)?;
        self.update_user(user_name, |user| {
            user.revoke_permissions(key, permissions);
            Ok(())
        })
    }

    fn table_permission_key(
        &self,
        database_name: &str,
        table_name: &str,
    ) -> CResult<UserPermissionKey> {
        let database_id = if database_name == "*" {
            0
        } else {
            self.find_database(database_name)?.id()
        };
        let table_id = if table_name == "*" {
            0
        } else {
            let database = self.find_database(database_name)?;
            database
                .find_table_record(table_name)
                .ok_or_else(|| {
                    DbError::new(
                        ErrorCode::TableDoesNotExist,
                        format!("table {}.{} does not exist", database_name, table_name),
                    )
                })?
                .id
        };
        Ok(UserPermissionKey::new(
            database_id,
            DatabaseObjectType::Table,
            table_id,
        ))
    }

    fn insert_sys_users_row(&self, user: &User) -> CResult<()> {
        let system = self.system_database()?;
        let sys_users = system.find_table(SYS_USERS_NAME)?;
        sys_users.insert_row(
            vec![
                None,
                Some(Variant::String(user.name.clone())),
                Some(match &user.real_name {
                    Some(real_name) => Variant::String(real_name.clone()),
                    None => Variant::Null,
                }),
                Some(Variant::Bool(user.active)),
                Some(Variant::Bool(user.super_user)),
            ],
            system.transaction_parameters(SUPER_USER_ID),
        )?;
        Ok(())
    }

    fn delete_sys_users_row(&self, name: &str) -> CResult<()> {
        let system = self.system_database()?;
        let sys_users = system.find_table(SYS_USERS_NAME)?;
        let name_position = sys_users.find_column_position("NAME").unwrap();
        let tp = system.transaction_parameters(SUPER_USER_ID);
        for trid in sys_users.trid_snapshot() {
            if let Some(row) = sys_users.read_row(trid)? {
                if row[name_position] == Variant::String(name.to_string()) {
                    sys_users.delete_row(trid, tp)?;
                }
            }
        }
        Ok(())
    }

    // //////////////////
    // 生命周期
    // //////////////////

    /// 全量落盘（关停路径）。
    pub fn flush_all(&self) -> CResult<()> {
        let names: Vec<String> = self
            .database_registry
            .read()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        for name in names {
            match self.find_database(&name) {
                Ok(database) => database.flush()?,
                Err(e) => warn!("cannot load database {} for flush: {}", name, e),
            }
        }
        self.save_users()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            error!("flush on shutdown failed: {}", e);
        }
    }
}

/// 数据库使用计数的RAII守卫。
pub struct UseDatabaseGuard {
    database: Arc<Database>,
}

impl UseDatabaseGuard {
    pub fn new(database: Arc<Database>) -> Self {
        database.increment_use_count();
        Self { database }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

impl Drop for UseDatabaseGuard {
    fn drop(&mut self) {
        self.database.decrement_use_count();
    }
}

impl std::ops::Deref for UseDatabaseGuard {
    type Target = Arc<Database>;

    fn deref(&self) -> &Arc<Database> {
        &self.database
    }
}

#[cfg(test)]
mod test {
    use crate::storage::cipher::DEFAULT_CIPHER_REGISTRY;

    use super::*;

    fn open_instance(dir: &std::path::Path) -> Arc<Instance> {
        let options = InstanceOptions::new(dir.join("data"));
        Instance::open(
            options,
            Arc::clone(&DEFAULT_CIPHER_REGISTRY),
            Arc::new(TracingFactory::disabled()),
        )
        .unwrap()
    }

    #[test]
    fn test_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let instance = open_instance(dir.path());
        assert!(instance.database_exists(SYSTEM_DATABASE_NAME));
        assert!(!instance.tracing_factory().is_installed());
        let root = instance.find_user_by_name(SUPER_USER_NAME).unwrap();
        assert!(root.read().unwrap().is_super_user());
    }

    #[test]
    fn test_create_and_drop_database() {
        let dir = tempfile::tempdir().unwrap();
        let instance = open_instance(dir.path());
        instance
            .create_database("TEST1", Some("none"), SUPER_USER_ID)
            .unwrap();
        assert!(instance.database_exists("TEST1"));

        // SYS_DATABASES行存在
        let system = instance.system_database().unwrap();
        let sys_databases = system.find_table(SYS_DATABASES_NAME).unwrap();
        let names: Vec<_> = sys_databases
            .trid_snapshot()
            .into_iter()
            .filter_map(|trid| sys_databases.read_row(trid).unwrap())
            .map(|row| row[1].clone())
            .collect();
        assert!(names.contains(&Variant::String("TEST1".to_string())));

        instance.drop_database("TEST1", SUPER_USER_ID).unwrap();
        assert!(!instance.database_exists("TEST1"));
        assert!(instance.drop_database("TEST1", SUPER_USER_ID).is_err());
        assert!(instance
            .drop_database(SYSTEM_DATABASE_NAME, SUPER_USER_ID)
            .is_err());
    }

    #[test]
    fn test_used_database_cannot_be_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let instance = open_instance(dir.path());
        instance
            .create_database("TEST1", None, SUPER_USER_ID)
            .unwrap();
        let database = instance.find_database("TEST1").unwrap();
        let guard = UseDatabaseGuard::new(Arc::clone(&database));
        drop(database);
        let err = instance.drop_database("TEST1", SUPER_USER_ID).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotDropUsedDatabase);
        drop(guard);
        instance.drop_database("TEST1", SUPER_USER_ID).unwrap();
    }

    #[test]
    fn test_reopen_preserves_databases() {
        let dir = tempfile::tempdir().unwrap();
        {
            let instance = open_instance(dir.path());
            instance
                .create_database("KEEPME", None, SUPER_USER_ID)
                .unwrap();
        }
        let instance = open_instance(dir.path());
        assert!(instance.database_exists("KEEPME"));
    }

    #[test]
    fn test_user_management_and_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let instance = open_instance(dir.path());
        instance
            .create_database("DB1", None, SUPER_USER_ID)
            .unwrap();
        let alice_id = instance
            .create_user("ALICE", Some("Alice".to_string()), true, SUPER_USER_ID)
            .unwrap();

        // 未授权时表权限检查失败
        let database = instance.find_database("DB1").unwrap();
        assert!(instance
            .check_table_permission(alice_id, database.id(), 10, PermissionMask::SELECT)
            .is_err());

        instance
            .grant_table_permissions(
                "ALICE",
                "DB1",
                "*",
                PermissionMask::SELECT,
                false,
                SUPER_USER_ID,
            )
            .unwrap();
        assert!(instance
            .check_table_permission(alice_id, database.id(), 10, PermissionMask::SELECT)
            .is_ok());

        instance
            .revoke_table_permissions("ALICE", "DB1", "*", PermissionMask::SELECT, SUPER_USER_ID)
            .unwrap();
        assert!(instance
            .check_table_permission(alice_id, database.id(), 10, PermissionMask::SELECT)
            .is_err());

        instance.drop_user("ALICE", SUPER_USER_ID).unwrap();
        assert!(instance.find_user_by_name("ALICE").is_err());
        assert!(instance.drop_user(SUPER_USER_NAME, SUPER_USER_ID).is_err());
    }

    #[test]
    fn test_tokens_roundtrip_through_instance() {
        let dir = tempfile::tempdir().unwrap();
        let instance = open_instance(dir.path());
        instance
            .create_user("BOB", None, true, SUPER_USER_ID)
            .unwrap();
        let (_, value) = instance
            .update_user("BOB", |user| user.add_token("T1", None, None))
            .unwrap();
        assert!(instance.check_user_token("BOB", "T1", &value).is_ok());
        assert!(instance.check_user_token("BOB", "T1", b"bad").is_err());
    }
}
