use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::stream::{InputStream, IoBase};

/// 限长输入流：最多允许从底层流读取 `limit` 字节。
pub struct LimitedInputStream<'a> {
    inner: Option<&'a mut dyn InputStream>,
    remaining: u64,
}

impl<'a> LimitedInputStream<'a> {
    pub fn new(inner: &'a mut dyn InputStream, limit: u64) -> Self {
        Self {
            inner: Some(inner),
            remaining: limit,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl IoBase for LimitedInputStream<'_> {
    fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    fn close(&mut self) -> CResult<()> {
        self.inner = None;
        Ok(())
    }
}

impl InputStream for LimitedInputStream<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
        let inner = self
            .inner
            .as_deref_mut()
            .ok_or_else(|| DbError::new(ErrorCode::StreamClosed, "limited stream is closed"))?;
        if self.remaining == 0 {
            return Ok(0);
        }
        let to_read = std::cmp::min(buffer.len() as u64, self.remaining) as usize;
        let n = inner.read(&mut buffer[..to_read])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
