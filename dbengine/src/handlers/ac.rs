use std::collections::BTreeMap;

use common::err::CResult;
use common::io::OutputStream;
use common::utils::BitMask;

use crate::handlers::rowset_writer::{BinaryRowsetWriter, RowsetWriter};
use crate::handlers::RequestHandler;
use crate::protocol::DatabaseEngineResponse;
use crate::requests::{
    GrantPermissionsForTableRequest, RevokePermissionsForTableRequest, ShowPermissionsRequest,
};
use crate::storage::user::{DatabaseObjectType, PermissionMask};
use crate::variant::{Variant, VariantType};

impl<O: OutputStream> RequestHandler<O> {
    pub(crate) fn execute_grant_permissions_for_table_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: GrantPermissionsForTableRequest,
    ) -> CResult<()> {
        let database_name = if request.database.is_empty() {
            self.current_database.clone()
        } else {
            request.database
        };
        self.instance.grant_table_permissions(
            &request.user,
            &database_name,
            &request.table,
            request.permissions,
            request.with_grant_option,
            self.current_user_id,
        )?;
        self.write_response(response)
    }

    pub(crate) fn execute_revoke_permissions_for_table_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: RevokePermissionsForTableRequest,
    ) -> CResult<()> {
        let database_name = if request.database.is_empty() {
            self.current_database.clone()
        } else {
            request.database
        };
        self.instance.revoke_table_permissions(
            &request.user,
            &database_name,
            &request.table,
            request.permissions,
            self.current_user_id,
        )?;
        self.write_response(response)
    }

    /// SHOW PERMISSIONS：
    /// (USER, DATABASE, OBJECT_TYPE, OBJECT_NAME, PERMISSION, GRANT_OPTION)，
    /// 超级用户输出一行全通配。
    pub(crate) fn execute_show_permissions_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: ShowPermissionsRequest,
    ) -> CResult<()> {
        let current_user = self.instance.find_user(self.current_user_id)?;
        let inspected = match &request.user {
            None => current_user,
            Some(name) => {
                let target = self.instance.find_user_by_name(name)?;
                let same_user = target.read().unwrap().id == self.current_user_id;
                if !same_user && !current_user.read().unwrap().is_super_user() {
                    return Err(common::err::db_error::DbError::new(
                        common::err::error_code::ErrorCode::PermissionDenied,
                        "inspecting another user requires the super user",
                    ));
                }
                target
            }
        };
        let inspected = inspected.read().unwrap().clone();

        response.add_column("USER", VariantType::String, false);
        response.add_column("DATABASE", VariantType::String, false);
        response.add_column("OBJECT_TYPE", VariantType::String, false);
        response.add_column("OBJECT_NAME", VariantType::String, false);
        response.add_column("PERMISSION", VariantType::String, false);
        response.add_column("GRANT_OPTION", VariantType::Bool, false);

        let mut rows: Vec<Vec<Variant>> = Vec::new();
        if inspected.is_super_user() {
            rows.push(vec![
                Variant::String(inspected.name.clone()),
                Variant::String("*".to_string()),
                Variant::String("*".to_string()),
                Variant::String("*".to_string()),
                Variant::String("*".to_string()),
                Variant::Bool(true),
            ]);
        } else {
            // (库名, 客体类型名, 客体名) 排序后逐权限位展开
            let mut sorted: BTreeMap<(String, String, String), (PermissionMask, PermissionMask)> =
                BTreeMap::new();
            for (key, data) in &inspected.permissions {
                let database_name = if key.database_id == 0 {
                    "*".to_string()
                } else {
                    self.database_name_by_id(key.database_id)
                };
                let object_name = self.object_name(key.database_id, key.object_type, key.object_id);
                sorted.insert(
                    (
                        database_name,
                        key.object_type.type_name().to_string(),
                        object_name,
                    ),
                    (data.permissions, data.grant_options),
                );
            }
            for ((database_name, object_type, object_name), (permissions, grant_options)) in sorted
            {
                for name in permissions.permission_names() {
                    let flag = match name {
                        "SELECT" => PermissionMask::SELECT,
                        "INSERT" => PermissionMask::INSERT,
                        "UPDATE" => PermissionMask::UPDATE,
                        "DELETE" => PermissionMask::DELETE,
                        "CREATE" => PermissionMask::CREATE,
                        "DROP" => PermissionMask::DROP,
                        "ALTER" => PermissionMask::ALTER,
                        "SHOW" => PermissionMask::SHOW,
                        _ => PermissionMask::SHOW_PERMISSIONS,
                    };
                    rows.push(vec![
                        Variant::String(inspected.name.clone()),
                        Variant::String(database_name.clone()),
                        Variant::String(object_type.clone()),
                        Variant::String(object_name.clone()),
                        Variant::String(name.to_string()),
                        Variant::Bool(grant_options.contains(flag)),
                    ]);
                }
            }
        }

        let mut writer = BinaryRowsetWriter::new(&mut self.connection);
        writer.begin_rowset(response, true)?;
        let null_mask = BitMask::new(0);
        for row in rows {
            writer.write_row(&row, &null_mask)?;
        }
        writer.end_rowset()
    }

    fn database_name_by_id(&self, database_id: u32) -> String {
        self.instance
            .database_records_ordered_by_name()
            .into_iter()
            .find(|r| r.id == database_id)
            .map(|r| r.name)
            .unwrap_or_else(|| format!("<UNAVAILABLE DATABASE #{}>", database_id))
    }

    fn object_name(
        &self,
        database_id: u32,
        object_type: DatabaseObjectType,
        object_id: u64,
    ) -> String {
        if object_id == 0 {
            return "*".to_string();
        }
        match object_type {
            DatabaseObjectType::Table => {
                let database_name = self.database_name_by_id(database_id);
                if let Ok(database) = self.instance.find_database(&database_name) {
                    for record in database.table_records_ordered_by_name() {
                        if record.id == object_id {
                            return record.name;
                        }
                    }
                }
                format!("<UNKNOWN TABLE #{}>", object_id)
            }
            DatabaseObjectType::Database => self.database_name_by_id(object_id as u32),
            other => format!("<{} #{}>", other.type_name(), object_id),
        }
    }
}
