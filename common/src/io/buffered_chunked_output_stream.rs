use bytes::BytesMut;

use crate::codec::varint::write_var_u32;
use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::stream::{IoBase, OutputStream};

/// 缓冲块式输出流。
///
/// 写入累积到固定大小缓冲；flush 时输出一个 `<varuint32 长度><字节>` 块；
/// close 输出残留缓冲并以零长度块结尾。
pub struct BufferedChunkedOutputStream<'a> {
    out: &'a mut dyn OutputStream,
    buffer: Vec<u8>,
    buffer_size: usize,
    closed: bool,
}

impl<'a> BufferedChunkedOutputStream<'a> {
    pub fn new(buffer_size: usize, out: &'a mut dyn OutputStream) -> Self {
        Self {
            out,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size: std::cmp::max(buffer_size, 1),
            closed: false,
        }
    }

    fn flush_chunk(&mut self) -> CResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut prefix = BytesMut::new();
        write_var_u32(self.buffer.len() as u32, &mut prefix);
        self.out.write_all(&prefix)?;
        self.out.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}

impl IoBase for BufferedChunkedOutputStream<'_> {
    fn is_valid(&self) -> bool {
        !self.closed && self.out.is_valid()
    }

    fn close(&mut self) -> CResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_chunk()?;
        // 结束块
        self.out.write_all(&[0u8])?;
        self.out.flush()?;
        self.closed = true;
        Ok(())
    }
}

impl OutputStream for BufferedChunkedOutputStream<'_> {
    fn write(&mut self, buffer: &[u8]) -> CResult<usize> {
        if self.closed {
            return Err(DbError::new(ErrorCode::StreamClosed, "chunked stream is closed"));
        }
        let mut remaining = buffer;
        while !remaining.is_empty() {
            let room = self.buffer_size - self.buffer.len();
            let n = std::cmp::min(room, remaining.len());
            self.buffer.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            if self.buffer.len() == self.buffer_size {
                self.flush_chunk()?;
            }
        }
        Ok(buffer.len())
    }

    fn flush(&mut self) -> CResult<()> {
        self.flush_chunk()
    }
}
