use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// 进程内全局订阅器只允许安装一次
static SUBSCRIBER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// 日志输出端。
#[derive(Debug, Clone)]
pub enum LogOutput {
    Stdout,
    /// 按日滚动的文件输出，同时镜像到stdout
    RollingFile(PathBuf),
    /// 不安装全局订阅器（测试替身）
    Disabled,
}

#[derive(Debug, Clone)]
pub struct TracingFactoryOptions {
    pub output: LogOutput,
    pub level: Level,
}

impl TracingFactoryOptions {
    pub fn stdout(debug: bool) -> Self {
        Self {
            output: LogOutput::Stdout,
            level: level_for(debug),
        }
    }

    pub fn rolling_file(log_dir: impl Into<PathBuf>, debug: bool) -> Self {
        Self {
            output: LogOutput::RollingFile(log_dir.into()),
            level: level_for(debug),
        }
    }

    pub fn disabled() -> Self {
        Self {
            output: LogOutput::Disabled,
            level: Level::INFO,
        }
    }
}

fn level_for(debug: bool) -> Level {
    if debug {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// 日志子系统的显式协作者。
///
/// 由前端按配置构造后传给Instance；测试用 `disabled()` 替身即可
/// 跳过全局订阅器安装。重复安装是无害的空操作。
#[derive(Debug)]
pub struct TracingFactory {
    options: TracingFactoryOptions,
    installed: bool,
}

impl TracingFactory {
    /// 按选项安装全局tracing订阅器。
    pub fn install(options: TracingFactoryOptions) -> Self {
        let installed = match &options.output {
            LogOutput::Disabled => false,
            output => {
                if SUBSCRIBER_INSTALLED.swap(true, Ordering::SeqCst) {
                    false
                } else {
                    Self::install_subscriber(output, options.level);
                    true
                }
            }
        };
        Self { options, installed }
    }

    fn install_subscriber(output: &LogOutput, level: Level) {
        let format = fmt::format()
            .with_file(true)
            .with_line_number(false)
            .with_target(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .compact();

        match output {
            LogOutput::Stdout => {
                let _ = tracing_subscriber::fmt()
                    .with_max_level(level)
                    .event_format(format)
                    .try_init();
            }
            LogOutput::RollingFile(dir) => {
                let file_appender = rolling::daily(dir.join("iomgr"), "file.log");
                let merge = file_appender.and(io::stdout);
                let _ = tracing_subscriber::fmt()
                    .with_max_level(level)
                    .event_format(format)
                    .with_writer(merge)
                    .try_init();
            }
            LogOutput::Disabled => {}
        }
    }

    /// 测试替身：不碰全局状态。
    pub fn disabled() -> Self {
        Self {
            options: TracingFactoryOptions::disabled(),
            installed: false,
        }
    }

    /// 本工厂是否安装了全局订阅器。
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn level(&self) -> Level {
        self.options.level
    }

    pub fn log_dir(&self) -> Option<&Path> {
        match &self.options.output {
            LogOutput::RollingFile(dir) => Some(dir),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use tracing::{debug, error, info, warn};

    use super::*;

    #[test]
    fn test_disabled_factory_touches_nothing() {
        let factory = TracingFactory::disabled();
        assert!(!factory.is_installed());
        assert!(factory.log_dir().is_none());
        let again = TracingFactory::install(TracingFactoryOptions::disabled());
        assert!(!again.is_installed());
    }

    #[test]
    fn test_install_is_idempotent() {
        let first = TracingFactory::install(TracingFactoryOptions::stdout(true));
        let second = TracingFactory::install(TracingFactoryOptions::stdout(true));
        // 至多一个工厂安装了全局订阅器
        assert!(!(first.is_installed() && second.is_installed()));
        assert_eq!(first.level(), Level::DEBUG);

        debug!("TracingFactory test: {:?}", "test");
        info!("TracingFactory test: {:?}", "test");
        warn!("TracingFactory test: {:?}", "test");
        error!("TracingFactory test: {:?}", "test");
    }

    #[test]
    fn test_rolling_file_options_expose_dir() {
        let options = TracingFactoryOptions::rolling_file("/tmp/dbengine/logs", false);
        let factory = TracingFactory {
            options,
            installed: false,
        };
        assert_eq!(
            factory.log_dir().unwrap(),
            Path::new("/tmp/dbengine/logs")
        );
        assert_eq!(factory.level(), Level::INFO);
    }
}
