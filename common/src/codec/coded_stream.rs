use byteorder::{ByteOrder, LittleEndian};

use crate::codec::varint::MAX_VAR_U64_SIZE;
use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::stream::{InputStream, OutputStream};

/// 面向输出流的编码器：varint32/64、定长小端32/64、原始字节段。
pub struct CodedOutputStream<'a> {
    out: &'a mut dyn OutputStream,
}

impl<'a> CodedOutputStream<'a> {
    pub fn new(out: &'a mut dyn OutputStream) -> Self {
        Self { out }
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> CResult<()> {
        self.out.write_all(bytes)
    }

    pub fn write_u8(&mut self, value: u8) -> CResult<()> {
        self.write_raw(&[value])
    }

    pub fn write_varint64(&mut self, value: u64) -> CResult<()> {
        let mut buffer = [0u8; MAX_VAR_U64_SIZE];
        let mut value = value;
        let mut n = 0;
        while value >= 0x80 {
            buffer[n] = (value as u8 & 0x7F) | 0x80;
            value >>= 7;
            n += 1;
        }
        buffer[n] = value as u8;
        self.write_raw(&buffer[..n + 1])
    }

    pub fn write_varint32(&mut self, value: u32) -> CResult<()> {
        self.write_varint64(value as u64)
    }

    pub fn write_fixed32(&mut self, value: u32) -> CResult<()> {
        let mut buffer = [0u8; 4];
        LittleEndian::write_u32(&mut buffer, value);
        self.write_raw(&buffer)
    }

    pub fn write_fixed64(&mut self, value: u64) -> CResult<()> {
        let mut buffer = [0u8; 8];
        LittleEndian::write_u64(&mut buffer, value);
        self.write_raw(&buffer)
    }

    pub fn write_u16_le(&mut self, value: u16) -> CResult<()> {
        let mut buffer = [0u8; 2];
        LittleEndian::write_u16(&mut buffer, value);
        self.write_raw(&buffer)
    }

    pub fn write_f32_le(&mut self, value: f32) -> CResult<()> {
        self.write_fixed32(value.to_bits())
    }

    pub fn write_f64_le(&mut self, value: f64) -> CResult<()> {
        self.write_fixed64(value.to_bits())
    }
}

/// 面向输入流的解码器，与 CodedOutputStream 对偶。
pub struct CodedInputStream<'a> {
    input: &'a mut dyn InputStream,
}

impl<'a> CodedInputStream<'a> {
    pub fn new(input: &'a mut dyn InputStream) -> Self {
        Self { input }
    }

    pub fn read_raw(&mut self, buffer: &mut [u8]) -> CResult<()> {
        self.input.read_exact(buffer)
    }

    pub fn read_u8(&mut self) -> CResult<u8> {
        let mut buffer = [0u8; 1];
        self.read_raw(&mut buffer)?;
        Ok(buffer[0])
    }

    pub fn read_varint64(&mut self) -> CResult<u64> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        for _ in 0..MAX_VAR_U64_SIZE {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(DbError::new(
            ErrorCode::VariantDecodeError,
            "varint is too long",
        ))
    }

    pub fn read_varint32(&mut self) -> CResult<u32> {
        let value = self.read_varint64()?;
        u32::try_from(value)
            .map_err(|_| DbError::new(ErrorCode::VariantDecodeError, "varint exceeds 32 bits"))
    }

    pub fn read_fixed32(&mut self) -> CResult<u32> {
        let mut buffer = [0u8; 4];
        self.read_raw(&mut buffer)?;
        Ok(LittleEndian::read_u32(&buffer))
    }

    pub fn read_fixed64(&mut self) -> CResult<u64> {
        let mut buffer = [0u8; 8];
        self.read_raw(&mut buffer)?;
        Ok(LittleEndian::read_u64(&buffer))
    }

    pub fn read_u16_le(&mut self) -> CResult<u16> {
        let mut buffer = [0u8; 2];
        self.read_raw(&mut buffer)?;
        Ok(LittleEndian::read_u16(&buffer))
    }

    pub fn read_f32_le(&mut self) -> CResult<f32> {
        Ok(f32::from_bits(self.read_fixed32()?))
    }

    pub fn read_f64_le(&mut self) -> CResult<f64> {
        Ok(f64::from_bits(self.read_fixed64()?))
    }
}
