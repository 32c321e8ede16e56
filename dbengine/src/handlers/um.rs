use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::OutputStream;

use crate::handlers::RequestHandler;
use crate::protocol::DatabaseEngineResponse;
use crate::requests::{
    AddUserAccessKeyRequest, AddUserTokenRequest, CheckUserTokenRequest, CreateUserRequest,
    DropUserAccessKeyRequest, DropUserRequest, DropUserTokenRequest,
    RenameUserAccessKeyRequest, RenameUserTokenRequest, SetUserAccessKeyAttributesRequest,
    SetUserAttributesRequest, SetUserTokenAttributesRequest,
};
use crate::storage::is_valid_database_object_name;

impl<O: OutputStream> RequestHandler<O> {
    pub(crate) fn execute_create_user_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: CreateUserRequest,
    ) -> CResult<()> {
        self.instance.create_user(
            &request.name,
            request.real_name,
            request.active,
            self.current_user_id,
        )?;
        self.write_response(response)
    }

    pub(crate) fn execute_drop_user_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DropUserRequest,
    ) -> CResult<()> {
        self.instance.drop_user(&request.name, self.current_user_id)?;
        self.write_response(response)
    }

    pub(crate) fn execute_set_user_attributes_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: SetUserAttributesRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.name)?;
        self.instance.update_user(&request.name, |user| {
            if let Some(real_name) = request.real_name {
                user.real_name = real_name;
            }
            if let Some(active) = request.active {
                user.active = active;
            }
            Ok(())
        })?;
        self.write_response(response)
    }

    pub(crate) fn execute_add_user_access_key_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: AddUserAccessKeyRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        if !is_valid_database_object_name(&request.key_name) {
            return Err(DbError::new(
                ErrorCode::InvalidAttribute,
                format!("invalid access key name '{}'", request.key_name),
            ));
        }
        self.instance.update_user(&request.user, |user| {
            user.add_access_key(&request.key_name, request.text.clone(), request.active)
        })?;
        self.write_response(response)
    }

    pub(crate) fn execute_drop_user_access_key_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DropUserAccessKeyRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        self.instance
            .update_user(&request.user, |user| user.drop_access_key(&request.key_name))?;
        self.write_response(response)
    }

    pub(crate) fn execute_set_user_access_key_attributes_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: SetUserAccessKeyAttributesRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        self.instance.update_user(&request.user, |user| {
            let name = request.key_name.clone();
            let key = user
                .access_keys
                .iter_mut()
                .find(|k| k.name == name)
                .ok_or_else(|| {
                    DbError::new(
                        ErrorCode::UserAccessKeyDoesNotExist,
                        format!("access key {} does not exist", name),
                    )
                })?;
            if let Some(active) = request.active {
                key.active = active;
            }
            Ok(())
        })?;
        self.write_response(response)
    }

    pub(crate) fn execute_rename_user_access_key_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: RenameUserAccessKeyRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        self.instance.update_user(&request.user, |user| {
            if user.find_access_key(&request.new_name).is_some() {
                return Err(DbError::new(
                    ErrorCode::UserAccessKeyAlreadyExists,
                    format!("access key {} already exists", request.new_name),
                ));
            }
            let key = user
                .access_keys
                .iter_mut()
                .find(|k| k.name == request.key_name)
                .ok_or_else(|| {
                    DbError::new(
                        ErrorCode::UserAccessKeyDoesNotExist,
                        format!("access key {} does not exist", request.key_name),
                    )
                })?;
            key.name = request.new_name.clone();
            Ok(())
        })?;
        self.write_response(response)
    }

    /// 新令牌。服务端生成时以消息文本回传一次性hex值。
    pub(crate) fn execute_add_user_token_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: AddUserTokenRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        if !is_valid_database_object_name(&request.token_name) {
            return Err(DbError::new(
                ErrorCode::InvalidAttribute,
                format!("invalid token name '{}'", request.token_name),
            ));
        }
        let generated = request.value.is_none();
        let (_, value) = self.instance.update_user(&request.user, |user| {
            user.add_token(
                &request.token_name,
                request.value.clone(),
                request.expiration.clone(),
            )
        })?;
        if generated {
            // 生成的令牌值只在此处回传一次
            response.messages.push(crate::protocol::StatusMessage {
                status_code: 0,
                text: hex::encode(&value),
            });
        }
        self.write_response(response)
    }

    pub(crate) fn execute_drop_user_token_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: DropUserTokenRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        self.instance
            .update_user(&request.user, |user| user.drop_token(&request.token_name))?;
        self.write_response(response)
    }

    pub(crate) fn execute_set_user_token_attributes_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: SetUserTokenAttributesRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        self.instance.update_user(&request.user, |user| {
            let token = user
                .tokens
                .iter_mut()
                .find(|t| t.name == request.token_name)
                .ok_or_else(|| {
                    DbError::new(
                        ErrorCode::UserTokenDoesNotExist,
                        format!("token {} does not exist", request.token_name),
                    )
                })?;
            if let Some(expiration) = request.expiration.clone() {
                token.expiration = expiration;
            }
            Ok(())
        })?;
        self.write_response(response)
    }

    pub(crate) fn execute_rename_user_token_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: RenameUserTokenRequest,
    ) -> CResult<()> {
        self.check_user_management_allowed(&request.user)?;
        self.instance.update_user(&request.user, |user| {
            if user.find_token(&request.new_name).is_some() {
                return Err(DbError::new(
                    ErrorCode::UserTokenAlreadyExists,
                    format!("token {} already exists", request.new_name),
                ));
            }
            let token = user
                .tokens
                .iter_mut()
                .find(|t| t.name == request.token_name)
                .ok_or_else(|| {
                    DbError::new(
                        ErrorCode::UserTokenDoesNotExist,
                        format!("token {} does not exist", request.token_name),
                    )
                })?;
            token.name = request.new_name.clone();
            Ok(())
        })?;
        self.write_response(response)
    }

    pub(crate) fn execute_check_user_token_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
        request: CheckUserTokenRequest,
    ) -> CResult<()> {
        self.instance
            .check_user_token(&request.user, &request.token_name, &request.value)?;
        self.write_response(response)
    }

    /// 用户管理：本人或超级用户。
    fn check_user_management_allowed(&self, target_user: &str) -> CResult<()> {
        let current = self.instance.find_user(self.current_user_id)?;
        let guard = current.read().unwrap();
        if guard.is_super_user() || guard.name == target_user {
            Ok(())
        } else {
            Err(DbError::new(
                ErrorCode::PermissionDenied,
                "operation on another user requires the super user",
            ))
        }
    }
}
