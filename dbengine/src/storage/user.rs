use bitflags::bitflags;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

bitflags! {
    /// 权限位掩码。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PermissionMask: u64 {
        const SELECT = 1 << 0;
        const INSERT = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const CREATE = 1 << 4;
        const DROP = 1 << 5;
        const ALTER = 1 << 6;
        const SHOW = 1 << 7;
        const SHOW_PERMISSIONS = 1 << 8;
    }
}

impl PermissionMask {
    /// 单权限位名（SHOW PERMISSIONS输出）。
    pub fn permission_names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for (flag, name) in [
            (PermissionMask::SELECT, "SELECT"),
            (PermissionMask::INSERT, "INSERT"),
            (PermissionMask::UPDATE, "UPDATE"),
            (PermissionMask::DELETE, "DELETE"),
            (PermissionMask::CREATE, "CREATE"),
            (PermissionMask::DROP, "DROP"),
            (PermissionMask::ALTER, "ALTER"),
            (PermissionMask::SHOW, "SHOW"),
            (PermissionMask::SHOW_PERMISSIONS, "SHOW_PERMISSIONS"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        names
    }
}

/// 权限客体类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseObjectType {
    Instance,
    Database,
    Table,
    Column,
    Index,
    User,
}

impl DatabaseObjectType {
    pub fn type_name(self) -> &'static str {
        match self {
            DatabaseObjectType::Instance => "INSTANCE",
            DatabaseObjectType::Database => "DATABASE",
            DatabaseObjectType::Table => "TABLE",
            DatabaseObjectType::Column => "COLUMN",
            DatabaseObjectType::Index => "INDEX",
            DatabaseObjectType::User => "USER",
        }
    }
}

/// 权限键：（数据库id，客体类型，客体id）。
///
/// 客体id为0表示该类型全部客体；数据库id为0表示任意数据库。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserPermissionKey {
    pub database_id: u32,
    pub object_type: DatabaseObjectType,
    pub object_id: u64,
}

impl UserPermissionKey {
    pub fn new(database_id: u32, object_type: DatabaseObjectType, object_id: u64) -> Self {
        Self {
            database_id,
            object_type,
            object_id,
        }
    }
}

/// 已授予权限与可转授权限。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissionData {
    pub permissions: PermissionMask,
    pub grant_options: PermissionMask,
}

impl Default for PermissionMask {
    fn default() -> Self {
        PermissionMask::empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccessKey {
    pub id: u64,
    pub name: String,
    pub text: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToken {
    pub id: u64,
    pub name: String,
    /// sha256(value)的hex
    pub value_hash: String,
    pub expiration: Option<String>,
}

/// 用户。角色/密钥/令牌按id持有，跨实体关系一律经属主查找。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub real_name: Option<String>,
    pub active: bool,
    pub super_user: bool,
    pub access_keys: Vec<UserAccessKey>,
    pub tokens: Vec<UserToken>,
    pub permissions: Vec<(UserPermissionKey, UserPermissionData)>,
    pub next_object_id: u64,
}

impl User {
    pub fn new(id: u32, name: impl Into<String>, super_user: bool) -> Self {
        Self {
            id,
            name: name.into(),
            real_name: None,
            active: true,
            super_user,
            access_keys: Vec::new(),
            tokens: Vec::new(),
            permissions: Vec::new(),
            next_object_id: 1,
        }
    }

    pub fn is_super_user(&self) -> bool {
        self.super_user
    }

    fn find_permission_mut(
        &mut self,
        key: &UserPermissionKey,
    ) -> Option<&mut UserPermissionData> {
        self.permissions
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, data)| data)
    }

    pub fn grant_permissions(
        &mut self,
        key: UserPermissionKey,
        permissions: PermissionMask,
        with_grant_option: bool,
    ) {
        let grant_options = if with_grant_option {
            permissions
        } else {
            PermissionMask::empty()
        };
        match self.find_permission_mut(&key) {
            Some(data) => {
                data.permissions |= permissions;
                data.grant_options |= grant_options;
            }
            None => self.permissions.push((
                key,
                UserPermissionData {
                    permissions,
                    grant_options,
                },
            )),
        }
    }

    pub fn revoke_permissions(&mut self, key: UserPermissionKey, permissions: PermissionMask) {
        if let Some(data) = self.find_permission_mut(&key) {
            data.permissions &= !permissions;
            data.grant_options &= !permissions;
        }
        self.permissions
            .retain(|(_, data)| !data.permissions.is_empty());
    }

    /// 权限检查。超级用户直通；客体id与数据库id支持0通配。
    pub fn has_permissions(&self, key: &UserPermissionKey, required: PermissionMask) -> bool {
        if self.super_user {
            return true;
        }
        let candidates = [
            *key,
            UserPermissionKey::new(key.database_id, key.object_type, 0),
            UserPermissionKey::new(0, key.object_type, key.object_id),
            UserPermissionKey::new(0, key.object_type, 0),
        ];
        let mut effective = PermissionMask::empty();
        for (k, data) in &self.permissions {
            if candidates.contains(k) {
                effective |= data.permissions;
            }
        }
        effective.contains(required)
    }

    pub fn find_access_key(&self, name: &str) -> Option<&UserAccessKey> {
        self.access_keys.iter().find(|k| k.name == name)
    }

    pub fn find_token(&self, name: &str) -> Option<&UserToken> {
        self.tokens.iter().find(|t| t.name == name)
    }

    pub fn add_access_key(&mut self, name: &str, text: String, active: bool) -> CResult<u64> {
        if self.find_access_key(name).is_some() {
            return Err(DbError::new(
                ErrorCode::UserAccessKeyAlreadyExists,
                format!("access key {}.{} already exists", self.name, name),
            ));
        }
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.access_keys.push(UserAccessKey {
            id,
            name: name.to_string(),
            text,
            active,
        });
        Ok(id)
    }

    pub fn drop_access_key(&mut self, name: &str) -> CResult<()> {
        if self.find_access_key(name).is_none() {
            return Err(DbError::new(
                ErrorCode::UserAccessKeyDoesNotExist,
                format!("access key {}.{} does not exist", self.name, name),
            ));
        }
        self.access_keys.retain(|k| k.name != name);
        Ok(())
    }

    /// 新令牌。返回（令牌id，明文值）；仅保存哈希。
    pub fn add_token(
        &mut self,
        name: &str,
        value: Option<Vec<u8>>,
        expiration: Option<String>,
    ) -> CResult<(u64, Vec<u8>)> {
        if self.find_token(name).is_some() {
            return Err(DbError::new(
                ErrorCode::UserTokenAlreadyExists,
                format!("token {}.{} already exists", self.name, name),
            ));
        }
        let value = match value {
            Some(v) => v,
            None => {
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.tokens.push(UserToken {
            id,
            name: name.to_string(),
            value_hash: hash_token(&value),
            expiration,
        });
        Ok((id, value))
    }

    pub fn drop_token(&mut self, name: &str) -> CResult<()> {
        if self.find_token(name).is_none() {
            return Err(DbError::new(
                ErrorCode::UserTokenDoesNotExist,
                format!("token {}.{} does not exist", self.name, name),
            ));
        }
        self.tokens.retain(|t| t.name != name);
        Ok(())
    }

    /// 令牌校验：按名字找到令牌并比对哈希。
    pub fn check_token(&self, name: &str, value: &[u8]) -> CResult<()> {
        let token = self.find_token(name).ok_or_else(|| {
            DbError::new(
                ErrorCode::UserTokenDoesNotExist,
                format!("token {}.{} does not exist", self.name, name),
            )
        })?;
        if token.value_hash != hash_token(value) {
            return Err(DbError::new(
                ErrorCode::InvalidUserToken,
                format!("token {}.{} value mismatch", self.name, name),
            ));
        }
        Ok(())
    }
}

pub fn hash_token(value: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_permission_wildcards() {
        let mut user = User::new(2, "ALICE", false);
        user.grant_permissions(
            UserPermissionKey::new(1, DatabaseObjectType::Table, 0),
            PermissionMask::SELECT,
            false,
        );
        assert!(user.has_permissions(
            &UserPermissionKey::new(1, DatabaseObjectType::Table, 42),
            PermissionMask::SELECT
        ));
        assert!(!user.has_permissions(
            &UserPermissionKey::new(2, DatabaseObjectType::Table, 42),
            PermissionMask::SELECT
        ));
        assert!(!user.has_permissions(
            &UserPermissionKey::new(1, DatabaseObjectType::Table, 42),
            PermissionMask::DELETE
        ));
    }

    #[test]
    fn test_super_user_bypasses_checks() {
        let root = User::new(1, "ROOT", true);
        assert!(root.has_permissions(
            &UserPermissionKey::new(9, DatabaseObjectType::Database, 9),
            PermissionMask::all()
        ));
    }

    #[test]
    fn test_revoke() {
        let mut user = User::new(2, "BOB", false);
        let key = UserPermissionKey::new(1, DatabaseObjectType::Table, 5);
        user.grant_permissions(key, PermissionMask::SELECT | PermissionMask::INSERT, true);
        user.revoke_permissions(key, PermissionMask::INSERT);
        assert!(user.has_permissions(&key, PermissionMask::SELECT));
        assert!(!user.has_permissions(&key, PermissionMask::INSERT));
        user.revoke_permissions(key, PermissionMask::SELECT);
        assert!(user.permissions.is_empty());
    }

    #[test]
    fn test_tokens() {
        let mut user = User::new(2, "CAROL", false);
        let (_, value) = user.add_token("T1", None, None).unwrap();
        assert!(user.check_token("T1", &value).is_ok());
        assert!(user.check_token("T1", b"wrong").is_err());
        assert!(user.check_token("T2", &value).is_err());
        user.drop_token("T1").unwrap();
        assert!(user.check_token("T1", &value).is_err());
    }
}
