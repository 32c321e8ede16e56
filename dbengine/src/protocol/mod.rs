use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use common::codec::{CodedInputStream, CodedOutputStream};
use common::err::db_error::{DbError, ErrorRecord};
use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::{InputStream, OutputStream};

use crate::variant::VariantType;

/// 协议消息类型标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ProtocolMessageType {
    NoMessage = 0,
    Command = 1,
    ServerResponse = 2,
    DatabaseEngineRequest = 3,
    DatabaseEngineResponse = 4,
    ClientBeginSessionRequest = 5,
    ClientBeginSessionResponse = 6,
    ClientAuthenticationRequest = 7,
    ClientAuthenticationResponse = 8,
    DatabaseEngineRestRequest = 9,
    ValidateUserTokenRequest = 10,
    ServerInformationRequest = 11,
    ServerInformation = 12,
}

/// 行流结束标记（varint64）
pub const NO_MORE_ROWS: u64 = 0;

/// REST JSON分块大小
pub const JSON_CHUNK_SIZE: usize = 65536;

/// 响应里的一条错误/提示消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status_code: u32,
    pub text: String,
}

impl StatusMessage {
    pub fn from_record(record: &ErrorRecord) -> Self {
        Self {
            status_code: record.code.into(),
            text: record.message.clone(),
        }
    }
}

/// 结果列描述：名称 + 数据类型 + 可空性。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: VariantType,
    pub is_nullable: bool,
}

/// 数据库引擎响应。行流紧随消息体，以varint64零结尾。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEngineResponse {
    pub request_id: u64,
    /// 单请求多响应时的帧序号
    pub response_id: u32,
    pub response_count: u32,
    pub has_affected_row_count: bool,
    pub affected_row_count: u64,
    pub messages: Vec<StatusMessage>,
    pub column_description: Vec<ColumnDescription>,
    pub rest_status_code: u32,
}

impl DatabaseEngineResponse {
    pub fn new(request_id: u64, response_id: u32, response_count: u32) -> Self {
        Self {
            request_id,
            response_id,
            response_count,
            has_affected_row_count: false,
            affected_row_count: 0,
            messages: Vec::new(),
            column_description: Vec::new(),
            rest_status_code: 0,
        }
    }

    pub fn set_affected_row_count(&mut self, count: u64) {
        self.has_affected_row_count = true;
        self.affected_row_count = count;
    }

    pub fn add_message(&mut self, record: &ErrorRecord) {
        self.messages.push(StatusMessage::from_record(record));
    }

    pub fn add_column(&mut self, name: impl Into<String>, data_type: VariantType, is_nullable: bool) {
        self.column_description.push(ColumnDescription {
            name: name.into(),
            data_type,
            is_nullable,
        });
    }

    pub fn has_nullable_columns(&self) -> bool {
        self.column_description.iter().any(|c| c.is_nullable)
    }
}

/// 消息帧：`<varuint32 类型><varuint32 长度><bincode消息体>`。
pub fn write_message<T: Serialize>(
    message_type: ProtocolMessageType,
    message: &T,
    out: &mut dyn OutputStream,
) -> CResult<()> {
    let body = bincode::serialize(message).map_err(|e| {
        DbError::new(
            ErrorCode::InvalidProtocolMessage,
            format!("cannot serialize protocol message: {}", e),
        )
    })?;
    let mut coded = CodedOutputStream::new(out);
    coded.write_varint32(u32::from(message_type))?;
    coded.write_varint32(body.len() as u32)?;
    coded.write_raw(&body)?;
    Ok(())
}

/// 读一帧消息，校验类型标签。
pub fn read_message<T: for<'de> Deserialize<'de>>(
    expected_type: ProtocolMessageType,
    input: &mut dyn InputStream,
) -> CResult<T> {
    let (message_type, body) = read_raw_message(input)?;
    if message_type != expected_type {
        return Err(DbError::new(
            ErrorCode::InvalidProtocolMessage,
            format!(
                "unexpected message type {:?}, expected {:?}",
                message_type, expected_type
            ),
        ));
    }
    bincode::deserialize(&body).map_err(|e| {
        DbError::new(
            ErrorCode::InvalidProtocolMessage,
            format!("cannot decode protocol message: {}", e),
        )
    })
}

pub fn read_raw_message(
    input: &mut dyn InputStream,
) -> CResult<(ProtocolMessageType, Vec<u8>)> {
    let mut coded = CodedInputStream::new(input);
    let type_tag = coded.read_varint32()?;
    let message_type = ProtocolMessageType::try_from(type_tag).map_err(|_| {
        DbError::new(
            ErrorCode::InvalidProtocolMessage,
            format!("unknown protocol message type {}", type_tag),
        )
    })?;
    let length = coded.read_varint32()? as usize;
    let mut body = vec![0u8; length];
    coded.read_raw(&mut body)?;
    Ok((message_type, body))
}

#[cfg(test)]
mod test {
    use common::io::{DynamicMemoryOutputStream, MemoryInputStream};

    use super::*;

    #[test]
    fn test_response_message_roundtrip() {
        let mut response = DatabaseEngineResponse::new(7, 0, 1);
        response.set_affected_row_count(3);
        response.add_column("ID", VariantType::UInt64, false);
        response.add_column("NAME", VariantType::String, true);
        response.add_message(&ErrorRecord::new(
            ErrorCode::TableDoesNotExist,
            "table X does not exist",
        ));
        response.rest_status_code = 200;

        let mut sink = DynamicMemoryOutputStream::default();
        write_message(ProtocolMessageType::DatabaseEngineResponse, &response, &mut sink).unwrap();

        let mut source = MemoryInputStream::new(sink.into_inner());
        let decoded: DatabaseEngineResponse =
            read_message(ProtocolMessageType::DatabaseEngineResponse, &mut source).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.has_nullable_columns());
    }

    #[test]
    fn test_unexpected_type_rejected() {
        let response = DatabaseEngineResponse::new(1, 0, 1);
        let mut sink = DynamicMemoryOutputStream::default();
        write_message(ProtocolMessageType::ServerResponse, &response, &mut sink).unwrap();
        let mut source = MemoryInputStream::new(sink.into_inner());
        let result: CResult<DatabaseEngineResponse> =
            read_message(ProtocolMessageType::DatabaseEngineResponse, &mut source);
        assert!(result.is_err());
    }
}
