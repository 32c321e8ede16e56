use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::err::db_error::DbError;
use crate::err::error_code::ErrorCode;
use crate::err::CResult;
use crate::io::error_checker::{DefaultErrorCodeChecker, ErrorCodeChecker};
use crate::io::stream::{InputStream, IoBase, OutputStream};

/// 文件流。读写经由可注入的错误检查器决定是否重试（EINTR语义）。
pub struct FileStream {
    file: Option<File>,
    checker: Arc<dyn ErrorCodeChecker>,
}

impl FileStream {
    pub fn open(path: &Path) -> CResult<Self> {
        Self::open_with_checker(path, Arc::new(DefaultErrorCodeChecker))
    }

    pub fn open_with_checker(path: &Path, checker: Arc<dyn ErrorCodeChecker>) -> CResult<Self> {
        let file = File::open(path).map_err(|e| {
            DbError::with_cause(
                ErrorCode::CannotOpenFile,
                format!("cannot open file {}", path.display()),
                e,
            )
        })?;
        Ok(Self {
            file: Some(file),
            checker,
        })
    }

    pub fn create(path: &Path) -> CResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                DbError::with_cause(
                    ErrorCode::CannotCreateFile,
                    format!("cannot create file {}", path.display()),
                    e,
                )
            })?;
        Ok(Self {
            file: Some(file),
            checker: Arc::new(DefaultErrorCodeChecker),
        })
    }

    /// 追加模式打开，文件不存在则创建。
    pub fn append(path: &Path) -> CResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                DbError::with_cause(
                    ErrorCode::CannotOpenFile,
                    format!("cannot open file {} for append", path.display()),
                    e,
                )
            })?;
        Ok(Self {
            file: Some(file),
            checker: Arc::new(DefaultErrorCodeChecker),
        })
    }

    pub fn from_file(file: File) -> Self {
        Self {
            file: Some(file),
            checker: Arc::new(DefaultErrorCodeChecker),
        }
    }

    fn file_mut(&mut self) -> CResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| DbError::new(ErrorCode::StreamClosed, "file stream is closed"))
    }

    pub fn seek_to(&mut self, offset: u64) -> CResult<()> {
        self.file_mut()?
            .seek(SeekFrom::Start(offset))
            .map_err(DbError::from)?;
        Ok(())
    }

    /// 强制刷盘（底层调用内核sync方法）
    pub fn sync(&mut self) -> CResult<()> {
        self.file_mut()?.sync_all().map_err(|e| {
            DbError::with_cause(ErrorCode::CannotSyncFile, "cannot sync file", e)
        })
    }
}

impl IoBase for FileStream {
    fn is_valid(&self) -> bool {
        self.file.is_some()
    }

    fn close(&mut self) -> CResult<()> {
        self.file = None;
        Ok(())
    }
}

impl InputStream for FileStream {
    fn read(&mut self, buffer: &mut [u8]) -> CResult<usize> {
        let checker = Arc::clone(&self.checker);
        loop {
            let result = self.file_mut()?.read(buffer);
            match result {
                Ok(n) => return Ok(n),
                Err(e) if !checker.is_fatal(e.kind()) => continue,
                Err(e) => {
                    self.file = None;
                    return Err(DbError::with_cause(
                        ErrorCode::CannotReadFile,
                        "file read failed",
                        e,
                    ));
                }
            }
        }
    }
}

impl OutputStream for FileStream {
    fn write(&mut self, buffer: &[u8]) -> CResult<usize> {
        let checker = Arc::clone(&self.checker);
        loop {
            let result = self.file_mut()?.write(buffer);
            match result {
                Ok(n) => return Ok(n),
                Err(e) if !checker.is_fatal(e.kind()) => continue,
                Err(e) => {
                    self.file = None;
                    return Err(DbError::with_cause(
                        ErrorCode::CannotWriteFile,
                        "file write failed",
                        e,
                    ));
                }
            }
        }
    }

    fn flush(&mut self) -> CResult<()> {
        self.file_mut()?.flush().map_err(DbError::from)
    }
}
