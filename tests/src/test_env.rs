use std::sync::Arc;

use tempfile::TempDir;

use common::codec::CodedInputStream;
use common::config::options::InstanceOptions;
use common::io::{ChunkedInputStream, InputStream, MemoryInputStream, SharedMemoryOutputStream};
use common::log::TracingFactory;
use dbengine::handlers::RequestHandler;
use dbengine::protocol::{read_raw_message, DatabaseEngineResponse, ProtocolMessageType};
use dbengine::requests::DbEngineRequest;
use dbengine::storage::cipher::DEFAULT_CIPHER_REGISTRY;
use dbengine::storage::instance::SUPER_USER_ID;
use dbengine::storage::Instance;
use dbengine::variant::{codec as variant_codec, Variant};

/// 请求处理器端到端测试环境：临时数据目录 + 内存连接。
pub struct TestEnv {
    _data_dir: TempDir,
    pub instance: Arc<Instance>,
    pub handler: RequestHandler<SharedMemoryOutputStream>,
    connection: SharedMemoryOutputStream,
    next_request_id: u64,
}

/// 解码后的一次响应：消息体 + 行集 + 原始尾部（REST payload）。
pub struct DecodedResponse {
    pub response: DatabaseEngineResponse,
    pub rows: Vec<Vec<Variant>>,
    pub trailing: Vec<u8>,
}

impl DecodedResponse {
    pub fn message_texts(&self) -> Vec<&str> {
        self.response
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect()
    }

    /// REST payload（分块流）解帧再按JSON解析。
    pub fn rest_payload(&self) -> serde_json::Value {
        let mut inner = MemoryInputStream::new(self.trailing.clone());
        let mut chunked = ChunkedInputStream::new(&mut inner);
        let mut payload = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = chunked.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            payload.extend_from_slice(&chunk[..n]);
        }
        serde_json::from_slice(&payload).expect("REST payload must be valid JSON")
    }
}

impl TestEnv {
    pub fn new() -> Self {
        let data_dir = TempDir::new().unwrap();
        let options = InstanceOptions::new(data_dir.path().join("data"));
        // 测试替身：不安装全局订阅器
        let instance = Instance::open(
            options,
            Arc::clone(&DEFAULT_CIPHER_REGISTRY),
            Arc::new(TracingFactory::disabled()),
        )
        .unwrap();
        let connection = SharedMemoryOutputStream::new();
        let handler = RequestHandler::new(
            Arc::clone(&instance),
            connection.clone(),
            SUPER_USER_ID,
        );
        Self {
            _data_dir: data_dir,
            instance,
            handler,
            connection,
            next_request_id: 1,
        }
    }

    /// 执行请求并解码响应帧。二进制行集按模式描述解码；
    /// REST请求（payload为分块JSON）走原始尾部。
    pub fn execute(&mut self, request: DbEngineRequest) -> DecodedResponse {
        let rest = matches!(
            request,
            DbEngineRequest::RestGetDatabases
                | DbEngineRequest::RestGetTables(_)
                | DbEngineRequest::RestGetAllRows(_)
                | DbEngineRequest::RestGetSingleRow(_)
                | DbEngineRequest::RestPostRows(_)
                | DbEngineRequest::RestPatchRow(_)
                | DbEngineRequest::RestDeleteRow(_)
                | DbEngineRequest::RestSqlQuery(_)
        );
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.handler
            .execute_request(request, request_id, 0, 1)
            .unwrap();

        let raw = self.connection.take_data();
        let mut input = MemoryInputStream::new(raw);
        let (message_type, body) = read_raw_message(&mut input).unwrap();
        assert_eq!(message_type, ProtocolMessageType::DatabaseEngineResponse);
        let response: DatabaseEngineResponse = bincode_decode(&body);
        assert_eq!(response.request_id, request_id);

        let rows = if rest || response.column_description.is_empty() || !response.messages.is_empty()
        {
            Vec::new()
        } else {
            read_rowset(&mut input, &response)
        };

        let mut trailing = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = input.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            trailing.extend_from_slice(&chunk[..n]);
        }
        DecodedResponse {
            response,
            rows,
            trailing,
        }
    }
}

fn bincode_decode(body: &[u8]) -> DatabaseEngineResponse {
    bincode::deserialize(body).expect("response body must decode")
}

/// 二进制行集解码：`varint64行长 + null掩码 + 各值`，零长度行终止。
fn read_rowset(
    input: &mut MemoryInputStream,
    response: &DatabaseEngineResponse,
) -> Vec<Vec<Variant>> {
    let has_nullable = response.has_nullable_columns();
    let column_count = response.column_description.len();
    let mask_bytes = column_count.div_ceil(8);

    let mut rows = Vec::new();
    let mut coded = CodedInputStream::new(input);
    loop {
        let row_length = coded.read_varint64().unwrap();
        if row_length == 0 {
            break;
        }
        let mask = if has_nullable {
            let mut bytes = vec![0u8; mask_bytes];
            coded.read_raw(&mut bytes).unwrap();
            bytes
        } else {
            vec![0u8; mask_bytes]
        };
        let mut row = Vec::with_capacity(column_count);
        for (index, column) in response.column_description.iter().enumerate() {
            let is_null = mask[index / 8] & (1 << (index % 8)) != 0;
            if is_null {
                row.push(Variant::Null);
            } else {
                row.push(variant_codec::read_variant(column.data_type, &mut coded).unwrap());
            }
        }
        rows.push(row);
    }
    rows
}
