use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;

/// 流的公共基础能力。
pub trait IoBase {
    /// 流是否仍然可用
    fn is_valid(&self) -> bool;

    /// 关闭流。重复关闭无副作用。
    fn close(&mut self) -> CResult<()>;
}

pub trait InputStream: IoBase {
    /// 读取至多 `buffer.len()` 字节，返回实际读取数。返回0表示流结束。
    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize>;

    /// 跳过 `size` 字节，返回实际跳过数。默认实现为读取后丢弃。
    fn skip(&mut self, size: u64) -> CResult<u64> {
        let mut scratch = [0u8; 4096];
        let mut remaining = size;
        while remaining > 0 {
            let to_read = std::cmp::min(remaining, scratch.len() as u64) as usize;
            let n = self.read(&mut scratch[..to_read])?;
            if n == 0 {
                break;
            }
            remaining -= n as u64;
        }
        Ok(size - remaining)
    }

    /// 精确读满 `buffer`，读不满报 UnexpectedEndOfFile。
    fn read_exact(&mut self, buffer: &mut [u8]) -> CResult<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.read(&mut buffer[filled..])?;
            if n == 0 {
                return Err(DbError::new(
                    ErrorCode::UnexpectedEndOfFile,
                    format!("short read: {} of {} bytes", filled, buffer.len()),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}

pub trait OutputStream: IoBase {
    /// 写入至多 `buffer.len()` 字节，返回实际写入数。
    fn write(&mut self, buffer: &[u8]) -> CResult<usize>;

    /// 将缓冲数据推给底层。无缓冲实现为空操作。
    fn flush(&mut self) -> CResult<()> {
        Ok(())
    }

    /// 写满整个 `buffer`。
    fn write_all(&mut self, buffer: &[u8]) -> CResult<()> {
        let mut written = 0;
        while written < buffer.len() {
            let n = self.write(&buffer[written..])?;
            if n == 0 {
                return Err(DbError::new(
                    ErrorCode::StreamWriteError,
                    format!("short write: {} of {} bytes", written, buffer.len()),
                ));
            }
            written += n;
        }
        Ok(())
    }
}
