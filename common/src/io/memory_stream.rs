use std::sync::{Arc, Mutex};

use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::stream::{InputStream, IoBase, OutputStream};

/// 从内存缓冲读取的输入流。
#[derive(Debug)]
pub struct MemoryInputStream {
    buffer: Vec<u8>,
    pos: usize,
    valid: bool,
}

impl MemoryInputStream {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            pos: 0,
            valid: true,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }
}

impl IoBase for MemoryInputStream {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn close(&mut self) -> CResult<()> {
        self.valid = false;
        Ok(())
    }
}

impl InputStream for MemoryInputStream {
    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
        if !self.valid {
            return Err(DbError::new(ErrorCode::StreamClosed, "stream is closed"));
        }
        let n = std::cmp::min(buffer.len(), self.remaining());
        buffer[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// 从借用切片读取的输入流。
#[derive(Debug)]
pub struct SliceInputStream<'a> {
    slice: &'a [u8],
    valid: bool,
}

impl<'a> SliceInputStream<'a> {
    pub fn new(slice: &'a [u8]) -> Self {
        Self { slice, valid: true }
    }

    pub fn remaining(&self) -> usize {
        self.slice.len()
    }
}

impl IoBase for SliceInputStream<'_> {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn close(&mut self) -> CResult<()> {
        self.valid = false;
        Ok(())
    }
}

impl InputStream for SliceInputStream<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
        if !self.valid {
            return Err(DbError::new(ErrorCode::StreamClosed, "stream is closed"));
        }
        let n = std::cmp::min(buffer.len(), self.slice.len());
        buffer[..n].copy_from_slice(&self.slice[..n]);
        self.slice = &self.slice[n..];
        Ok(n)
    }
}

/// 写入自有缓冲的输出流，按固定步长按需增长。
///
/// 分配失败降级为部分写入并报 OutOfMemory，而不是panic。
#[derive(Debug)]
pub struct DynamicMemoryOutputStream {
    buffer: Vec<u8>,
    growth_step: usize,
    valid: bool,
}

pub const DEFAULT_GROWTH_STEP: usize = 4096;

impl DynamicMemoryOutputStream {
    pub fn new(initial_size: usize, growth_step: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(initial_size),
            growth_step: std::cmp::max(growth_step, 1),
            valid: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for DynamicMemoryOutputStream {
    fn default() -> Self {
        Self::new(DEFAULT_GROWTH_STEP, DEFAULT_GROWTH_STEP)
    }
}

impl IoBase for DynamicMemoryOutputStream {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn close(&mut self) -> CResult<()> {
        self.valid = false;
        Ok(())
    }
}

impl OutputStream for DynamicMemoryOutputStream {
    fn write(&mut self, buffer: &[u8]) -> CResult<usize> {
        if !self.valid {
            return Err(DbError::new(ErrorCode::StreamClosed, "stream is closed"));
        }
        if buffer.is_empty() {
            return Ok(0);
        }
        let available = self.buffer.capacity() - self.buffer.len();
        if buffer.len() > available {
            let mut need = buffer.len() - available;
            let rem = need % self.growth_step;
            if rem > 0 {
                need += self.growth_step - rem;
            }
            if self.buffer.try_reserve(need).is_err() {
                // 只写可用部分
                let n = std::cmp::min(buffer.len(), available);
                if n == 0 {
                    self.valid = false;
                    return Err(DbError::new(
                        ErrorCode::OutOfMemory,
                        "memory output stream cannot grow",
                    ));
                }
                self.buffer.extend_from_slice(&buffer[..n]);
                return Ok(n);
            }
        }
        self.buffer.extend_from_slice(buffer);
        Ok(buffer.len())
    }
}

/// 写入共享缓冲的输出流，供多方握有同一份输出（测试以及REST分片回放）。
#[derive(Debug, Clone)]
pub struct SharedMemoryOutputStream {
    buffer: Arc<Mutex<Vec<u8>>>,
    valid: bool,
}

impl SharedMemoryOutputStream {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            valid: true,
        }
    }

    pub fn buffer(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buffer)
    }

    pub fn take_data(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().unwrap())
    }
}

impl Default for SharedMemoryOutputStream {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBase for SharedMemoryOutputStream {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn close(&mut self) -> CResult<()> {
        self.valid = false;
        Ok(())
    }
}

impl OutputStream for SharedMemoryOutputStream {
    fn write(&mut self, buffer: &[u8]) -> CResult<usize> {
        if !self.valid {
            return Err(DbError::new(ErrorCode::StreamClosed, "stream is closed"));
        }
        self.buffer.lock().unwrap().extend_from_slice(buffer);
        Ok(buffer.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_memory_input_stream() {
        let mut stream = MemoryInputStream::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, &[1, 2, 3]);
        assert_eq!(stream.skip(1).unwrap(), 1);
        assert_eq!(stream.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_dynamic_memory_output_stream_grows() {
        let mut stream = DynamicMemoryOutputStream::new(4, 4);
        stream.write_all(&[0u8; 100]).unwrap();
        assert_eq!(stream.data().len(), 100);
    }

    #[test]
    fn test_closed_stream_rejects_io() {
        let mut stream = DynamicMemoryOutputStream::default();
        stream.close().unwrap();
        assert!(stream.write(&[1]).is_err());
        assert!(!stream.is_valid());
    }
}
