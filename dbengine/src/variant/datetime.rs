use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use common::err::db_error::DbError;
use common::err::error_code::ErrorCode;
use common::err::CResult;

/// 日期时间值。
///
/// 磁盘与线上编码：仅日期6字节，带时间12字节，首字节低位为时间存在标志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDateTime {
    pub year: i16,
    pub month: u8,
    pub day: u8,
    pub has_time: bool,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millis: u16,
}

/// 日期部分编码字节数
pub const DATE_SERIALIZED_SIZE: usize = 6;

/// 日期+时间编码字节数
pub const DATETIME_SERIALIZED_SIZE: usize = 12;

const HAS_TIME_FLAG: u8 = 0x01;

impl RawDateTime {
    pub fn date(year: i16, month: u8, day: u8) -> Self {
        Self {
            year,
            month,
            day,
            has_time: false,
            hour: 0,
            minute: 0,
            second: 0,
            millis: 0,
        }
    }

    pub fn date_time(
        year: i16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        millis: u16,
    ) -> Self {
        Self {
            year,
            month,
            day,
            has_time: true,
            hour,
            minute,
            second,
            millis,
        }
    }

    pub fn serialized_size(&self) -> usize {
        if self.has_time {
            DATETIME_SERIALIZED_SIZE
        } else {
            DATE_SERIALIZED_SIZE
        }
    }

    /// 编码到缓冲，返回写入字节数。
    pub fn serialize_into(&self, buffer: &mut Vec<u8>) {
        let flags = if self.has_time { HAS_TIME_FLAG } else { 0 };
        buffer.push(flags);
        buffer.extend_from_slice(&self.year.to_le_bytes());
        buffer.push(self.month);
        buffer.push(self.day);
        // 保留字节，补齐日期部分到6字节
        buffer.push(0);
        if self.has_time {
            buffer.push(self.hour);
            buffer.push(self.minute);
            buffer.push(self.second);
            buffer.extend_from_slice(&self.millis.to_le_bytes());
            buffer.push(0);
        }
    }

    pub fn deserialize(input: &mut &[u8]) -> CResult<Self> {
        if input.len() < DATE_SERIALIZED_SIZE {
            return Err(DbError::new(
                ErrorCode::VariantDecodeError,
                "truncated date value",
            ));
        }
        let flags = input[0];
        let year = i16::from_le_bytes([input[1], input[2]]);
        let month = input[3];
        let day = input[4];
        let has_time = flags & HAS_TIME_FLAG != 0;
        if !has_time {
            *input = &input[DATE_SERIALIZED_SIZE..];
            return Ok(Self::date(year, month, day));
        }
        if input.len() < DATETIME_SERIALIZED_SIZE {
            return Err(DbError::new(
                ErrorCode::VariantDecodeError,
                "truncated date-time value",
            ));
        }
        let hour = input[6];
        let minute = input[7];
        let second = input[8];
        let millis = u16::from_le_bytes([input[9], input[10]]);
        *input = &input[DATETIME_SERIALIZED_SIZE..];
        Ok(Self::date_time(year, month, day, hour, minute, second, millis))
    }

    /// 解析固定格式: `YYYY-MM-DD` 或 `YYYY-MM-DD HH:MM:SS`。
    pub fn parse(text: &str) -> CResult<Self> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
            return Ok(Self::date_time(
                dt.year() as i16,
                dt.month() as u8,
                dt.day() as u8,
                dt.hour() as u8,
                dt.minute() as u8,
                dt.second() as u8,
                0,
            ));
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Ok(Self::date(d.year() as i16, d.month() as u8, d.day() as u8));
        }
        Err(DbError::new(
            ErrorCode::InvalidDateTimeString,
            format!("cannot parse date/time value '{}'", text),
        ))
    }

    /// 时间线上的瞬时序，用于比较。
    fn instant_key(&self) -> (i16, u8, u8, u8, u8, u8, u16) {
        (
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millis,
        )
    }
}

impl PartialOrd for RawDateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.instant_key().cmp(&other.instant_key()))
    }
}

impl fmt::Display for RawDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_time {
            write!(
                f,
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                self.year, self.month, self.day, self.hour, self.minute, self.second
            )
        } else {
            write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_date_roundtrip() {
        let src = RawDateTime::date(2021, 7, 14);
        let mut buffer = Vec::new();
        src.serialize_into(&mut buffer);
        assert_eq!(buffer.len(), DATE_SERIALIZED_SIZE);
        let mut slice = &buffer[..];
        assert_eq!(RawDateTime::deserialize(&mut slice).unwrap(), src);
        assert!(slice.is_empty());
    }

    #[test]
    fn test_date_time_roundtrip() {
        let src = RawDateTime::date_time(2021, 7, 14, 13, 45, 59, 250);
        let mut buffer = Vec::new();
        src.serialize_into(&mut buffer);
        assert_eq!(buffer.len(), DATETIME_SERIALIZED_SIZE);
        let mut slice = &buffer[..];
        assert_eq!(RawDateTime::deserialize(&mut slice).unwrap(), src);
    }

    #[test]
    fn test_parse_and_format() {
        let d = RawDateTime::parse("2020-01-31").unwrap();
        assert_eq!(d.to_string(), "2020-01-31");
        let dt = RawDateTime::parse("2020-01-31 10:20:30").unwrap();
        assert_eq!(dt.to_string(), "2020-01-31 10:20:30");
        assert!(RawDateTime::parse("not a date").is_err());
    }

    #[test]
    fn test_ordering_by_instant() {
        let a = RawDateTime::date(2020, 1, 1);
        let b = RawDateTime::date_time(2020, 1, 1, 0, 0, 1, 0);
        assert!(a < b);
    }
}
