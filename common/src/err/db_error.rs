use std::io;
use std::string::FromUtf8Error;

use thiserror::Error;

use crate::err::error_code::ErrorCode;

/// 单条错误记录（code + message），用于响应消息与复合错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:#010X}] {}", u32::from(self.code), self.message)
    }
}

/// 数据库错误。
///
/// `Single` 携带错误码、错误消息与可选的底层IO原因。
/// `Compound` 聚合多个独立校验错误（SELECT 校验阶段一次性上报全部问题）。
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{record}")]
    Single {
        record: ErrorRecord,
        #[source]
        cause: Option<io::Error>,
    },

    #[error("{} errors", .0.len())]
    Compound(Vec<ErrorRecord>),
}

impl DbError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        DbError::Single {
            record: ErrorRecord::new(code, message),
            cause: None,
        }
    }

    pub fn with_cause(code: ErrorCode, message: impl Into<String>, cause: io::Error) -> Self {
        DbError::Single {
            record: ErrorRecord::new(code, message),
            cause: Some(cause),
        }
    }

    pub fn compound(errors: Vec<ErrorRecord>) -> Self {
        DbError::Compound(errors)
    }

    /// 主错误码。复合错误返回第一条的错误码。
    pub fn code(&self) -> ErrorCode {
        match self {
            DbError::Single { record, .. } => record.code,
            DbError::Compound(records) => records
                .first()
                .map(|r| r.code)
                .unwrap_or(ErrorCode::InvalidExpression),
        }
    }

    pub fn is_io_error(&self) -> bool {
        self.code().is_io_error()
    }

    pub fn is_internal_error(&self) -> bool {
        self.code().is_internal_error()
    }

    pub fn is_user_visible(&self) -> bool {
        self.code().is_user_visible()
    }

    /// 展开为错误记录列表（协议响应的 message 列表）。
    pub fn records(&self) -> Vec<ErrorRecord> {
        match self {
            DbError::Single { record, .. } => vec![record.clone()],
            DbError::Compound(records) => records.clone(),
        }
    }
}

impl From<io::Error> for DbError {
    fn from(error: io::Error) -> Self {
        let code = match error.kind() {
            io::ErrorKind::UnexpectedEof => ErrorCode::UnexpectedEndOfFile,
            io::ErrorKind::NotFound => ErrorCode::CannotOpenFile,
            io::ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
            _ => ErrorCode::StreamReadError,
        };
        DbError::with_cause(code, error.to_string(), error)
    }
}

impl From<FromUtf8Error> for DbError {
    fn from(error: FromUtf8Error) -> Self {
        DbError::new(ErrorCode::VariantDecodeError, error.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_single_error() {
        let err = DbError::new(ErrorCode::TableDoesNotExist, "table T does not exist");
        assert_eq!(err.code(), ErrorCode::TableDoesNotExist);
        assert!(err.is_user_visible());
        assert_eq!(err.records().len(), 1);
    }

    #[test]
    fn test_compound_error() {
        let err = DbError::compound(vec![
            ErrorRecord::new(ErrorCode::InvalidColumnName, "bad column ?A"),
            ErrorRecord::new(ErrorCode::DuplicateColumnAlias, "duplicate alias X"),
        ]);
        assert_eq!(err.records().len(), 2);
        assert_eq!(err.code(), ErrorCode::InvalidColumnName);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: DbError = io_err.into();
        assert!(err.is_io_error());
        assert_eq!(err.code(), ErrorCode::UnexpectedEndOfFile);
    }
}
