use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 错误码分区:
/// - `0x0000_0001..=0x7FFF_FFFF` 用户可见错误
/// - `0x8000_0000..=0x8FFF_FFFF` IO错误
/// - `0x9000_0000..=0x9FFF_FFFF` 内部错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    // //////////////////
    // 用户可见错误
    // //////////////////
    DatabaseDoesNotExist = 0x0000_0002,
    DatabaseAlreadyExists,
    InvalidDatabaseName,
    CannotDropUsedDatabase,
    CannotDropSystemDatabase,
    TableDoesNotExist,
    TableAlreadyExists,
    InvalidTableName,
    InvalidTableAlias,
    TableDoesNotExistInContext,
    CannotModifySystemTable,
    ColumnDoesNotExist,
    ColumnAlreadyExists,
    InvalidColumnName,
    InvalidColumnAlias,
    CannotDropMasterColumn,
    SelectWithoutTables,
    DuplicateColumnName,
    DuplicateColumnAlias,
    CannotUseAllColumnsAlias,
    LimitValueNotInteger,
    LimitValueIsNegative,
    OffsetValueNotInteger,
    OffsetValueIsNegative,
    InvalidWhereCondition,
    ValueTypeMismatch,
    ValueOutOfRange,
    NotNullConstraintViolated,
    InvalidValueCount,
    RowDoesNotExist,
    IndexDoesNotExist,
    IndexAlreadyExists,
    UserDoesNotExist,
    UserAlreadyExists,
    InvalidUserName,
    PermissionDenied,
    UserAccessKeyDoesNotExist,
    UserAccessKeyAlreadyExists,
    UserTokenDoesNotExist,
    UserTokenAlreadyExists,
    InvalidUserToken,
    UnknownCipher,
    InvalidAttribute,
    TooManyDatabases,
    TooManyTables,
    TooManyUsers,
    InvalidExpression,
    InvalidLikePattern,
    InvalidDateTimeString,
    CannotCastValue,
    NotImplemented,

    // //////////////////
    // IO 错误
    // //////////////////
    CannotOpenFile = 0x8000_0001,
    CannotCreateFile,
    CannotReadFile,
    CannotWriteFile,
    CannotSyncFile,
    CannotCloseFile,
    CannotCreateDirectory,
    CannotRemoveFile,
    UnexpectedEndOfFile,
    StreamClosed,
    StreamReadError,
    StreamWriteError,
    OutOfMemory,
    InvalidChunkFormat,
    JsonWriteError,
    BlockNotFound,
    InvalidBlockOffset,
    BlockChecksumMismatch,
    CorruptMasterColumnRecord,
    CorruptBlockRegistry,
    CorruptIndexFile,

    // //////////////////
    // 内部错误
    // //////////////////
    InvalidValueType = 0x9000_0001,
    IndexDuplicateKey,
    CacheFull,
    CacheCorrupted,
    InvalidProtocolMessage,
    UnknownExpressionTag,
    VariantDecodeError,
    InvalidColumnSet,
    InvalidDataSetState,
}

impl ErrorCode {
    /// IO 错误码区间
    pub const IO_ERROR_CODE_RANGE: (u32, u32) = (0x8000_0000, 0x8FFF_FFFF);

    /// 内部错误码区间
    pub const INTERNAL_ERROR_CODE_RANGE: (u32, u32) = (0x9000_0000, 0x9FFF_FFFF);

    pub fn is_io_error(self) -> bool {
        let code: u32 = self.into();
        code >= Self::IO_ERROR_CODE_RANGE.0 && code <= Self::IO_ERROR_CODE_RANGE.1
    }

    pub fn is_internal_error(self) -> bool {
        let code: u32 = self.into();
        code >= Self::INTERNAL_ERROR_CODE_RANGE.0 && code <= Self::INTERNAL_ERROR_CODE_RANGE.1
    }

    pub fn is_user_visible(self) -> bool {
        !self.is_io_error() && !self.is_internal_error()
    }
}
