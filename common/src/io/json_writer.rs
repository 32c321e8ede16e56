use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::stream::OutputStream;

/// 流式JSON输出。调用之间无内部状态，逗号由调用方控制。
///
/// 本身不做缓冲；大payload由调用方组合 BufferedChunkedOutputStream。
pub struct JsonWriter<'a> {
    out: &'a mut dyn OutputStream,
}

impl<'a> JsonWriter<'a> {
    pub fn new(out: &'a mut dyn OutputStream) -> Self {
        Self { out }
    }

    fn write_raw(&mut self, bytes: &[u8]) -> CResult<()> {
        self.out
            .write_all(bytes)
            .map_err(|_| DbError::new(ErrorCode::JsonWriteError, "JSON write error"))
    }

    pub fn write_object_begin(&mut self) -> CResult<()> {
        self.write_raw(b"{")
    }

    pub fn write_object_end(&mut self) -> CResult<()> {
        self.write_raw(b"}")
    }

    pub fn write_array_begin(&mut self) -> CResult<()> {
        self.write_raw(b"[")
    }

    pub fn write_array_end(&mut self) -> CResult<()> {
        self.write_raw(b"]")
    }

    pub fn write_comma(&mut self) -> CResult<()> {
        self.write_raw(b",")
    }

    pub fn write_double_quote(&mut self) -> CResult<()> {
        self.write_raw(b"\"")
    }

    /// 字段名，后跟分隔符: `"name":`
    pub fn write_field_name(&mut self, name: &str) -> CResult<()> {
        self.write_raw(b"\"")?;
        self.write_raw_string(name.as_bytes())?;
        self.write_raw(b"\":")
    }

    pub fn write_null_value(&mut self) -> CResult<()> {
        self.write_raw(b"null")
    }

    pub fn write_bool_value(&mut self, value: bool) -> CResult<()> {
        self.write_raw(if value { b"true" } else { b"false" })
    }

    pub fn write_i64_value(&mut self, value: i64) -> CResult<()> {
        let text = value.to_string();
        self.write_raw(text.as_bytes())
    }

    pub fn write_u64_value(&mut self, value: u64) -> CResult<()> {
        let text = value.to_string();
        self.write_raw(text.as_bytes())
    }

    /// float：7位小数
    pub fn write_f32_value(&mut self, value: f32) -> CResult<()> {
        let text = format!("{:.7}", value);
        self.write_raw(text.as_bytes())
    }

    /// double：16位小数
    pub fn write_f64_value(&mut self, value: f64) -> CResult<()> {
        let text = format!("{:.16}", value);
        self.write_raw(text.as_bytes())
    }

    /// 带引号和转义的字符串值。
    pub fn write_string_value(&mut self, value: &str) -> CResult<()> {
        self.write_raw(b"\"")?;
        self.write_raw_string(value.as_bytes())?;
        self.write_raw(b"\"")
    }

    /// 不做转义直接输出（调用方保证内容为合法JSON片段，如十六进制文本）。
    pub fn write_bytes(&mut self, bytes: &[u8]) -> CResult<()> {
        self.write_raw(bytes)
    }

    /// 转义规则:
    /// - `"` 和 `\` 前置反斜杠
    /// - BS/FF/LF/CR/TAB 输出命名转义
    /// - 其余 < 0x20 的字节输出 `\u00XX`（含VT，JSON无`\v`）
    /// - 非ASCII码点输出 `\uXXXX`（BMP之外用代理对），输出恒为纯ASCII
    pub fn write_raw_string(&mut self, value: &[u8]) -> CResult<()> {
        let mut start = 0usize;
        let mut i = 0usize;
        while i < value.len() {
            let byte = value[i];
            if byte >= 0x20 && byte < 0x80 && byte != b'"' && byte != b'\\' {
                i += 1;
                continue;
            }
            if start < i {
                self.write_raw(&value[start..i])?;
            }
            match byte {
                b'"' => self.write_raw(b"\\\"")?,
                b'\\' => self.write_raw(b"\\\\")?,
                0x08 => self.write_raw(b"\\b")?,
                0x0C => self.write_raw(b"\\f")?,
                0x0A => self.write_raw(b"\\n")?,
                0x0D => self.write_raw(b"\\r")?,
                0x09 => self.write_raw(b"\\t")?,
                b if b < 0x20 => {
                    let seq = format!("\\u{:04x}", b);
                    self.write_raw(seq.as_bytes())?;
                }
                _ => {
                    // 多字节UTF-8序列
                    let len = utf8_sequence_len(byte);
                    let end = std::cmp::min(i + len, value.len());
                    match std::str::from_utf8(&value[i..end]) {
                        Ok(s) => {
                            if let Some(c) = s.chars().next() {
                                self.write_unicode_escape(c)?;
                            }
                            start = i + len;
                            i = start;
                            continue;
                        }
                        Err(_) => {
                            // 非法UTF-8字节按原始值转义
                            let seq = format!("\\u{:04x}", byte);
                            self.write_raw(seq.as_bytes())?;
                        }
                    }
                }
            }
            start = i + 1;
            i = start;
        }
        if start < value.len() {
            self.write_raw(&value[start..])?;
        }
        Ok(())
    }

    fn write_unicode_escape(&mut self, c: char) -> CResult<()> {
        let code = c as u32;
        if code <= 0xFFFF {
            let seq = format!("\\u{:04x}", code);
            self.write_raw(seq.as_bytes())
        } else {
            let reduced = code - 0x10000;
            let high = 0xD800 + (reduced >> 10);
            let low = 0xDC00 + (reduced & 0x3FF);
            let seq = format!("\\u{:04x}\\u{:04x}", high, low);
            self.write_raw(seq.as_bytes())
        }
    }
}

fn utf8_sequence_len(first_byte: u8) -> usize {
    match first_byte {
        b if b & 0xE0 == 0xC0 => 2,
        b if b & 0xF0 == 0xE0 => 3,
        b if b & 0xF8 == 0xF0 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod test {
    use crate::io::memory_stream::DynamicMemoryOutputStream;

    use super::*;

    fn render(f: impl FnOnce(&mut JsonWriter<'_>) -> CResult<()>) -> String {
        let mut sink = DynamicMemoryOutputStream::default();
        {
            let mut writer = JsonWriter::new(&mut sink);
            f(&mut writer).unwrap();
        }
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_simple_object() {
        let text = render(|w| {
            w.write_object_begin()?;
            w.write_field_name("status")?;
            w.write_i64_value(200)?;
            w.write_comma()?;
            w.write_field_name("rows")?;
            w.write_array_begin()?;
            w.write_array_end()?;
            w.write_object_end()
        });
        assert_eq!(text, r#"{"status":200,"rows":[]}"#);
    }

    #[test]
    fn test_escaping() {
        let text = render(|w| w.write_string_value("a\"b\\c\nd\te\u{1}"));
        assert_eq!(text, "\"a\\\"b\\\\c\\nd\\te\\u0001\"");
    }

    #[test]
    fn test_escaped_output_reparses() {
        let input = "quote\" slash\\ ctrl\u{0b}\u{1f} текст 🚀";
        let text = render(|w| w.write_string_value(input));
        assert!(text.is_ascii());
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_str().unwrap(), input);
    }

    #[test]
    fn test_control_bytes_are_ascii_encoded() {
        for byte in 0u8..0x20 {
            let text = render(|w| w.write_raw_string(&[byte]));
            assert!(text.is_ascii());
        }
    }

    #[test]
    fn test_floats() {
        let text = render(|w| w.write_f32_value(1.5));
        assert_eq!(text, "1.5000000");
        let text = render(|w| w.write_f64_value(2.25));
        assert_eq!(text, "2.2500000000000000");
    }
}
