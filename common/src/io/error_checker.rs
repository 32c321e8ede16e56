use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 判定某个IO错误是否终止当前操作。
pub trait ErrorCodeChecker: Send + Sync {
    /// true 表示该错误是致命错误；false 表示应重试本次操作。
    fn is_fatal(&self, kind: io::ErrorKind) -> bool;
}

/// 默认检查器：除 Interrupted 外全部视为致命错误。
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorCodeChecker;

impl ErrorCodeChecker for DefaultErrorCodeChecker {
    fn is_fatal(&self, kind: io::ErrorKind) -> bool {
        kind != io::ErrorKind::Interrupted
    }
}

/// 检查器：进程退出标志置位后，Interrupted 也视为致命错误。
#[derive(Debug, Clone)]
pub struct ExitSignalAwareErrorCodeChecker {
    exit_signal: Arc<AtomicBool>,
}

impl ExitSignalAwareErrorCodeChecker {
    pub fn new(exit_signal: Arc<AtomicBool>) -> Self {
        Self { exit_signal }
    }
}

impl ErrorCodeChecker for ExitSignalAwareErrorCodeChecker {
    fn is_fatal(&self, kind: io::ErrorKind) -> bool {
        if kind == io::ErrorKind::Interrupted {
            self.exit_signal.load(Ordering::SeqCst)
        } else {
            true
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_checker_retries_interrupted() {
        let checker = DefaultErrorCodeChecker;
        assert!(!checker.is_fatal(io::ErrorKind::Interrupted));
        assert!(checker.is_fatal(io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_exit_aware_checker() {
        let flag = Arc::new(AtomicBool::new(false));
        let checker = ExitSignalAwareErrorCodeChecker::new(Arc::clone(&flag));
        assert!(!checker.is_fatal(io::ErrorKind::Interrupted));
        flag.store(true, Ordering::SeqCst);
        assert!(checker.is_fatal(io::ErrorKind::Interrupted));
    }
}
