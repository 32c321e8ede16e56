use crate::codec::varint::MAX_VAR_U64_SIZE;
use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::stream::{InputStream, IoBase};

/// 块式输入流。
///
/// 底层流为 `<varuint64 长度><长度字节>` 帧序列，对外表现为一条连续字节流。
/// 零长度块为流结束标记。跨块读取时透明读取下一个长度前缀。
/// 变长整数格式错误或块被截断视为致命IO错误并使流失效。
pub struct ChunkedInputStream<'a> {
    inner: Option<&'a mut dyn InputStream>,
    // 当前块大小
    chunk_size: u64,
    // 当前块内位置
    pos: u64,
    // 是否已读到块长度
    has_chunk_size: bool,
    // 块流结束标记
    eof: bool,
}

impl<'a> ChunkedInputStream<'a> {
    pub fn new(inner: &'a mut dyn InputStream) -> Self {
        Self {
            inner: Some(inner),
            chunk_size: 0,
            pos: 0,
            has_chunk_size: false,
            eof: false,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    fn invalidate(&mut self) {
        self.inner = None;
    }

    /// 读取下一个块长度前缀。
    fn read_chunk_size(&mut self) -> CResult<()> {
        let inner = self
            .inner
            .as_deref_mut()
            .ok_or_else(|| DbError::new(ErrorCode::StreamClosed, "chunked stream is invalid"))?;

        let mut buffer = [0u8; MAX_VAR_U64_SIZE];
        let mut count = 0usize;
        loop {
            if count == MAX_VAR_U64_SIZE {
                self.invalidate();
                return Err(DbError::new(
                    ErrorCode::InvalidChunkFormat,
                    "chunk length varint is too long",
                ));
            }
            let mut byte = [0u8; 1];
            let n = match inner.read(&mut byte) {
                Ok(n) => n,
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if n == 0 {
                if count > 0 {
                    self.invalidate();
                    return Err(DbError::new(
                        ErrorCode::InvalidChunkFormat,
                        "truncated chunk length",
                    ));
                }
                // 底层流干净地结束，按块流结束处理
                self.chunk_size = 0;
                self.pos = 0;
                self.has_chunk_size = true;
                self.eof = true;
                return Ok(());
            }
            buffer[count] = byte[0];
            count += 1;
            if byte[0] & 0x80 == 0 {
                break;
            }
        }

        let mut slice = &buffer[..count];
        let chunk_size = match crate::codec::varint::read_var_u64(&mut slice) {
            Ok(v) => v,
            Err(_) => {
                self.invalidate();
                return Err(DbError::new(
                    ErrorCode::InvalidChunkFormat,
                    "malformed chunk length",
                ));
            }
        };

        self.chunk_size = chunk_size;
        self.pos = 0;
        self.has_chunk_size = true;
        self.eof = chunk_size == 0;
        Ok(())
    }
}

impl IoBase for ChunkedInputStream<'_> {
    fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    fn close(&mut self) -> CResult<()> {
        self.invalidate();
        Ok(())
    }
}

impl InputStream for ChunkedInputStream<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
        if !self.is_valid() {
            return Err(DbError::new(ErrorCode::StreamClosed, "chunked stream is invalid"));
        }

        let mut filled = 0usize;
        while filled < buffer.len() {
            if !self.has_chunk_size {
                self.read_chunk_size()?;
            }
            if self.eof {
                break;
            }

            let to_read =
                std::cmp::min((buffer.len() - filled) as u64, self.chunk_size - self.pos) as usize;
            if to_read == 0 {
                self.has_chunk_size = false;
                continue;
            }

            let inner = self.inner.as_deref_mut().unwrap();
            let n = match inner.read(&mut buffer[filled..filled + to_read]) {
                Ok(n) => n,
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if n == 0 {
                self.invalidate();
                return Err(DbError::new(
                    ErrorCode::InvalidChunkFormat,
                    "truncated chunk body",
                ));
            }

            filled += n;
            self.pos += n as u64;
            if self.pos == self.chunk_size {
                self.has_chunk_size = false;
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use crate::codec::varint::write_var_u64;
    use crate::io::memory_stream::MemoryInputStream;

    use super::*;

    fn frame(chunks: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for chunk in chunks {
            write_var_u64(chunk.len() as u64, &mut buf);
            buf.extend_from_slice(chunk);
        }
        write_var_u64(0, &mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_read_across_chunks() {
        let mut inner = MemoryInputStream::new(frame(&[b"hello", b" ", b"world"]));
        let mut stream = ChunkedInputStream::new(&mut inner);
        let mut buf = vec![0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        assert!(stream.is_eof());
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_empty_chunk_stream() {
        let mut inner = MemoryInputStream::new(frame(&[]));
        let mut stream = ChunkedInputStream::new(&mut inner);
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert!(stream.is_eof());
    }

    #[test]
    fn test_truncated_chunk_fails() {
        let mut data = Vec::new();
        let mut prefix = BytesMut::new();
        write_var_u64(10, &mut prefix);
        data.extend_from_slice(&prefix);
        data.extend_from_slice(b"abc");
        let mut inner = MemoryInputStream::new(data);
        let mut stream = ChunkedInputStream::new(&mut inner);
        let mut buf = [0u8; 16];
        assert!(stream.read(&mut buf).is_err());
        assert!(!stream.is_valid());
    }

    #[test]
    fn test_skip_within_chunks() {
        let mut inner = MemoryInputStream::new(frame(&[b"0123456789"]));
        let mut stream = ChunkedInputStream::new(&mut inner);
        assert_eq!(stream.skip(4).unwrap(), 4);
        let mut buf = [0u8; 6];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456789");
    }
}
