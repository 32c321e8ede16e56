use dbengine::requests::{
    AddUserAccessKeyRequest, AddUserTokenRequest, CheckUserTokenRequest, ColumnDefinition,
    CreateDatabaseRequest, CreateTableRequest, CreateUserRequest, DbEngineRequest,
    DropUserRequest, GrantPermissionsForTableRequest, RenameUserTokenRequest,
    RevokePermissionsForTableRequest, SetUserAttributesRequest, ShowPermissionsRequest,
};
use dbengine::storage::user::PermissionMask;
use dbengine::variant::{Variant, VariantType};

use crate::test_env::TestEnv;

fn create_user(env: &mut TestEnv, name: &str) {
    let decoded = env.execute(DbEngineRequest::CreateUser(CreateUserRequest {
        name: name.to_string(),
        real_name: None,
        active: true,
    }));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());
}

#[test]
fn test_create_and_drop_user() {
    let mut env = TestEnv::new();
    create_user(&mut env, "ALICE");

    let decoded = env.execute(DbEngineRequest::CreateUser(CreateUserRequest {
        name: "ALICE".to_string(),
        real_name: None,
        active: true,
    }));
    assert_eq!(decoded.response.messages.len(), 1);

    let decoded = env.execute(DbEngineRequest::SetUserAttributes(SetUserAttributesRequest {
        name: "ALICE".to_string(),
        real_name: Some(Some("Alice A.".to_string())),
        active: Some(false),
    }));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::DropUser(DropUserRequest {
        name: "ALICE".to_string(),
    }));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::DropUser(DropUserRequest {
        name: "ALICE".to_string(),
    }));
    assert_eq!(decoded.response.messages.len(), 1);
}

#[test]
fn test_access_keys() {
    let mut env = TestEnv::new();
    create_user(&mut env, "BOB");

    let decoded = env.execute(DbEngineRequest::AddUserAccessKey(AddUserAccessKeyRequest {
        user: "BOB".to_string(),
        key_name: "K1".to_string(),
        text: "ssh-ed25519 AAAA...".to_string(),
        active: true,
    }));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::AddUserAccessKey(AddUserAccessKeyRequest {
        user: "BOB".to_string(),
        key_name: "K1".to_string(),
        text: "ssh-ed25519 BBBB...".to_string(),
        active: true,
    }));
    assert_eq!(decoded.response.messages.len(), 1);

    let user = env.instance.find_user_by_name("BOB").unwrap();
    assert!(user.read().unwrap().find_access_key("K1").is_some());
}

#[test]
fn test_tokens_check_and_rename() {
    let mut env = TestEnv::new();
    create_user(&mut env, "CAROL");

    // 服务端生成的令牌值以消息文本回传一次
    let decoded = env.execute(DbEngineRequest::AddUserToken(AddUserTokenRequest {
        user: "CAROL".to_string(),
        token_name: "T1".to_string(),
        value: None,
        expiration: None,
    }));
    assert_eq!(decoded.response.messages.len(), 1);
    let token_value = hex::decode(decoded.message_texts()[0]).unwrap();

    let decoded = env.execute(DbEngineRequest::CheckUserToken(CheckUserTokenRequest {
        user: "CAROL".to_string(),
        token_name: "T1".to_string(),
        value: token_value.clone(),
    }));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::CheckUserToken(CheckUserTokenRequest {
        user: "CAROL".to_string(),
        token_name: "T1".to_string(),
        value: b"wrong".to_vec(),
    }));
    assert_eq!(decoded.response.messages.len(), 1);

    let decoded = env.execute(DbEngineRequest::RenameUserToken(RenameUserTokenRequest {
        user: "CAROL".to_string(),
        token_name: "T1".to_string(),
        new_name: "T2".to_string(),
    }));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::CheckUserToken(CheckUserTokenRequest {
        user: "CAROL".to_string(),
        token_name: "T2".to_string(),
        value: token_value,
    }));
    assert!(decoded.response.messages.is_empty());
}

#[test]
fn test_grant_revoke_and_show_permissions() {
    let mut env = TestEnv::new();
    env.execute(DbEngineRequest::CreateDatabase(CreateDatabaseRequest {
        database: "D".to_string(),
        cipher_id: None,
        cipher_key_seed: None,
    }));
    env.execute(DbEngineRequest::CreateTable(CreateTableRequest {
        database: "D".to_string(),
        table: "T".to_string(),
        columns: vec![ColumnDefinition::new("A", VariantType::Int32)],
    }));
    create_user(&mut env, "DAVE");

    let decoded = env.execute(DbEngineRequest::GrantPermissionsForTable(
        GrantPermissionsForTableRequest {
            database: "D".to_string(),
            table: "T".to_string(),
            user: "DAVE".to_string(),
            permissions: PermissionMask::SELECT | PermissionMask::INSERT,
            with_grant_option: false,
        },
    ));
    assert!(decoded.response.messages.is_empty(), "{:?}", decoded.message_texts());

    let decoded = env.execute(DbEngineRequest::ShowPermissions(ShowPermissionsRequest {
        user: Some("DAVE".to_string()),
    }));
    assert_eq!(decoded.response.column_description.len(), 6);
    assert_eq!(decoded.rows.len(), 2);
    for row in &decoded.rows {
        assert_eq!(row[0], Variant::String("DAVE".to_string()));
        assert_eq!(row[1], Variant::String("D".to_string()));
        assert_eq!(row[2], Variant::String("TABLE".to_string()));
        assert_eq!(row[3], Variant::String("T".to_string()));
        assert_eq!(row[5], Variant::Bool(false));
    }
    let permissions: Vec<&Variant> = decoded.rows.iter().map(|row| &row[4]).collect();
    assert!(permissions.contains(&&Variant::String("SELECT".to_string())));
    assert!(permissions.contains(&&Variant::String("INSERT".to_string())));

    let decoded = env.execute(DbEngineRequest::RevokePermissionsForTable(
        RevokePermissionsForTableRequest {
            database: "D".to_string(),
            table: "T".to_string(),
            user: "DAVE".to_string(),
            permissions: PermissionMask::INSERT,
        },
    ));
    assert!(decoded.response.messages.is_empty());

    let decoded = env.execute(DbEngineRequest::ShowPermissions(ShowPermissionsRequest {
        user: Some("DAVE".to_string()),
    }));
    assert_eq!(decoded.rows.len(), 1);
    assert_eq!(decoded.rows[0][4], Variant::String("SELECT".to_string()));
}

#[test]
fn test_super_user_permissions_row() {
    let mut env = TestEnv::new();
    let decoded = env.execute(DbEngineRequest::ShowPermissions(ShowPermissionsRequest {
        user: None,
    }));
    assert_eq!(decoded.rows.len(), 1);
    assert_eq!(decoded.rows[0][0], Variant::String("ROOT".to_string()));
    assert_eq!(decoded.rows[0][4], Variant::String("*".to_string()));
    assert_eq!(decoded.rows[0][5], Variant::Bool(true));
}
