use std::fmt;

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

/// LOB内容源：前向只读、可克隆、剩余大小已知的字节生产者。
pub trait ByteProducer: Send {
    fn remaining_size(&self) -> u64;

    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize>;

    fn clone_producer(&self) -> Box<dyn ByteProducer>;
}

/// 内存字节生产者。短LOB与常量LOB用。
pub struct BufferByteProducer {
    data: Vec<u8>,
    pos: usize,
}

impl BufferByteProducer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl ByteProducer for BufferByteProducer {
    fn remaining_size(&self) -> u64 {
        (self.data.len() - self.pos) as u64
    }

    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
        let n = std::cmp::min(buffer.len(), self.data.len() - self.pos);
        buffer[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn clone_producer(&self) -> Box<dyn ByteProducer> {
        Box::new(BufferByteProducer {
            data: self.data.clone(),
            pos: self.pos,
        })
    }
}

/// 文本LOB流。
pub struct ClobStream {
    inner: Box<dyn ByteProducer>,
}

/// 二进制LOB流。
pub struct BlobStream {
    inner: Box<dyn ByteProducer>,
}

macro_rules! lob_stream_impl {
    ($name:ident) => {
        impl $name {
            pub fn new(inner: Box<dyn ByteProducer>) -> Self {
                Self { inner }
            }

            pub fn remaining_size(&self) -> u64 {
                self.inner.remaining_size()
            }

            pub fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
                self.inner.read(buffer)
            }

            /// 读空全部内容。
            pub fn read_to_end(&mut self) -> CResult<Vec<u8>> {
                let mut data = Vec::with_capacity(self.remaining_size() as usize);
                let mut chunk = [0u8; super::LOB_CHUNK_SIZE];
                loop {
                    let n = self.read(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&chunk[..n]);
                }
                Ok(data)
            }
        }

        impl Clone for $name {
            fn clone(&self) -> Self {
                Self {
                    inner: self.inner.clone_producer(),
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("remaining_size", &self.remaining_size())
                    .finish()
            }
        }
    };
}

lob_stream_impl!(ClobStream);
lob_stream_impl!(BlobStream);

impl ClobStream {
    pub fn from_string(text: String) -> Self {
        Self::new(Box::new(BufferByteProducer::new(text.into_bytes())))
    }

    /// 读空并按UTF-8还原为字符串。
    pub fn read_as_string(&mut self) -> CResult<String> {
        let data = self.read_to_end()?;
        String::from_utf8(data)
            .map_err(|e| DbError::new(ErrorCode::VariantDecodeError, e.to_string()))
    }
}

impl BlobStream {
    pub fn from_binary(data: Vec<u8>) -> Self {
        Self::new(Box::new(BufferByteProducer::new(data)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_clob_stream() {
        let mut clob = ClobStream::from_string("hello clob".to_string());
        assert_eq!(clob.remaining_size(), 10);
        let copy = clob.clone();
        assert_eq!(clob.read_as_string().unwrap(), "hello clob");
        assert_eq!(clob.remaining_size(), 0);
        // 克隆体是独立游标
        assert_eq!(copy.remaining_size(), 10);
    }

    #[test]
    fn test_blob_stream_chunked_read() {
        let data: Vec<u8> = (0..=255u8).collect();
        let mut blob = BlobStream::from_binary(data.clone());
        let mut buffer = [0u8; 100];
        let mut collected = Vec::new();
        loop {
            let n = blob.read(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buffer[..n]);
        }
        assert_eq!(collected, data);
    }
}
