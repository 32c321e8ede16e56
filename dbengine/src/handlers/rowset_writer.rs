use common::codec::CodedOutputStream;
use common::err::CResult;
use common::io::{BufferedChunkedOutputStream, IoBase, JsonWriter, OutputStream};
use common::utils::BitMask;

use crate::handlers::json_output::{write_get_json_prolog, write_json_epilog};
use crate::handlers::variant_output::write_variant_json;
use crate::protocol::{
    write_message, DatabaseEngineResponse, ProtocolMessageType, JSON_CHUNK_SIZE, NO_MORE_ROWS,
};
use crate::variant::{codec as variant_codec, Variant};

/// HTTP状态码（REST响应用）
pub mod http_status {
    pub const OK: u32 = 200;
    pub const CREATED: u32 = 201;
    pub const BAD_REQUEST: u32 = 400;
    pub const FORBIDDEN: u32 = 403;
    pub const NOT_FOUND: u32 = 404;
    pub const INTERNAL_SERVER_ERROR: u32 = 500;
}

/// 结果流的可插拔输出端。协议消息由writer在行流开始前发出。
pub trait RowsetWriter {
    fn begin_rowset(
        &mut self,
        response: &mut DatabaseEngineResponse,
        have_rows: bool,
    ) -> CResult<()>;

    fn write_row(&mut self, values: &[Variant], null_mask: &BitMask) -> CResult<()>;

    /// 行流终止（二进制发零长度行；JSON收尾并关闭分块流）。
    fn end_rowset(&mut self) -> CResult<()>;
}

/// 二进制协议行集：`varint64 行长 + null掩码（有可空列时）+ 各非NULL值`。
pub struct BinaryRowsetWriter<'a> {
    out: &'a mut dyn OutputStream,
    has_nullable_columns: bool,
}

impl<'a> BinaryRowsetWriter<'a> {
    pub fn new(out: &'a mut dyn OutputStream) -> Self {
        Self {
            out,
            has_nullable_columns: false,
        }
    }
}

impl RowsetWriter for BinaryRowsetWriter<'_> {
    fn begin_rowset(
        &mut self,
        response: &mut DatabaseEngineResponse,
        _have_rows: bool,
    ) -> CResult<()> {
        self.has_nullable_columns = response.has_nullable_columns();
        write_message(
            ProtocolMessageType::DatabaseEngineResponse,
            response,
            &mut *self.out,
        )
    }

    fn write_row(&mut self, values: &[Variant], null_mask: &BitMask) -> CResult<()> {
        let mut row_size = 0u64;
        for value in values {
            row_size += variant_codec::serialized_size(value)?;
        }
        if self.has_nullable_columns {
            row_size += null_mask.byte_size() as u64;
        }

        let mut coded = CodedOutputStream::new(&mut *self.out);
        coded.write_varint64(row_size)?;
        if self.has_nullable_columns {
            coded.write_raw(null_mask.data())?;
        }
        for value in values {
            variant_codec::write_variant(value, &mut coded)?;
        }
        Ok(())
    }

    fn end_rowset(&mut self) -> CResult<()> {
        let mut coded = CodedOutputStream::new(&mut *self.out);
        coded.write_varint64(NO_MORE_ROWS)?;
        self.out.flush()
    }
}

enum RestWriterState<'a> {
    Raw(&'a mut dyn OutputStream),
    Streaming(BufferedChunkedOutputStream<'a>),
    Closed,
}

/// REST JSON行集：响应消息后接分块JSON payload，行是按列名键入的对象。
pub struct RestJsonRowsetWriter<'a> {
    state: RestWriterState<'a>,
    field_names: Vec<String>,
    need_comma_before_row: bool,
}

impl<'a> RestJsonRowsetWriter<'a> {
    pub fn new(out: &'a mut dyn OutputStream) -> Self {
        Self {
            state: RestWriterState::Raw(out),
            field_names: Vec::new(),
            need_comma_before_row: false,
        }
    }
}

impl RowsetWriter for RestJsonRowsetWriter<'_> {
    fn begin_rowset(
        &mut self,
        response: &mut DatabaseEngineResponse,
        have_rows: bool,
    ) -> CResult<()> {
        self.field_names = response
            .column_description
            .iter()
            .map(|c| c.name.clone())
            .collect();
        response.rest_status_code = if have_rows {
            http_status::OK
        } else {
            http_status::NOT_FOUND
        };

        let state = std::mem::replace(&mut self.state, RestWriterState::Closed);
        let out = match state {
            RestWriterState::Raw(out) => out,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        write_message(ProtocolMessageType::DatabaseEngineResponse, response, &mut *out)?;

        let mut chunked = BufferedChunkedOutputStream::new(JSON_CHUNK_SIZE, out);
        {
            let mut json = JsonWriter::new(&mut chunked);
            write_get_json_prolog(response.rest_status_code, &mut json)?;
        }
        self.state = RestWriterState::Streaming(chunked);
        Ok(())
    }

    fn write_row(&mut self, values: &[Variant], _null_mask: &BitMask) -> CResult<()> {
        let chunked = match &mut self.state {
            RestWriterState::Streaming(chunked) => chunked,
            _ => return Ok(()),
        };
        let mut json = JsonWriter::new(chunked);
        if self.need_comma_before_row {
            json.write_comma()?;
        } else {
            self.need_comma_before_row = true;
        }
        json.write_object_begin()?;
        let mut need_comma = false;
        for (index, name) in self.field_names.iter().enumerate() {
            if need_comma {
                json.write_comma()?;
            } else {
                need_comma = true;
            }
            json.write_field_name(name)?;
            write_variant_json(&values[index], &mut json)?;
        }
        json.write_object_end()
    }

    fn end_rowset(&mut self) -> CResult<()> {
        let state = std::mem::replace(&mut self.state, RestWriterState::Closed);
        match state {
            RestWriterState::Streaming(mut chunked) => {
                {
                    let mut json = JsonWriter::new(&mut chunked);
                    write_json_epilog(&mut json)?;
                }
                chunked.close()
            }
            _ => Ok(()),
        }
    }
}
