use chrono::{SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock, Weak};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INSTANCES: LazyLock<Mutex<Vec<Weak<LoggerInner>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

type SharedLogHandler = Arc<dyn Fn(&Logger, LogLevel, &str) + Send + Sync + 'static>;

/// Named logger with a per-instance level and a swappable output handler.
///
/// New instances start at the global level (see [`set_log_level`]); tests
/// install a capturing handler via [`Logger::set_log_handler`].
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(LoggerInner::new(name.into()));
        track_instance(&inner);
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.log_level.load(Ordering::SeqCst))
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.inner.log_level.store(level as u8, Ordering::SeqCst);
    }

    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(&Logger, LogLevel, &str) + Send + Sync + 'static,
    {
        *self.inner.log_handler.write().unwrap() = Arc::new(handler);
    }

    pub fn reset_log_handler(&self) {
        *self.inner.log_handler.write().unwrap() = default_log_handler_arc();
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.dispatch(LogLevel::Error, message.into());
    }

    fn dispatch(&self, level: LogLevel, message: String) {
        let handler = self.inner.log_handler.read().unwrap().clone();
        handler(self, level, &message);
    }

    fn from_inner(inner: Arc<LoggerInner>) -> Self {
        Self { inner }
    }
}

struct LoggerInner {
    name: String,
    log_level: AtomicU8,
    log_handler: RwLock<SharedLogHandler>,
}

impl LoggerInner {
    fn new(name: String) -> Self {
        let level = GLOBAL_LOG_LEVEL.load(Ordering::SeqCst);
        Self {
            name,
            log_level: AtomicU8::new(level),
            log_handler: RwLock::new(default_log_handler_arc()),
        }
    }
}

fn track_instance(inner: &Arc<LoggerInner>) {
    INSTANCES.lock().unwrap().push(Arc::downgrade(inner));
}

fn default_log_handler_arc() -> SharedLogHandler {
    Arc::new(default_log_handler)
}

fn default_log_handler(logger: &Logger, level: LogLevel, message: &str) {
    if level < logger.log_level() || level == LogLevel::Silent {
        return;
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let line = format!("[{}]  {}: {}", now, logger.name(), message);

    match level {
        LogLevel::Warn | LogLevel::Error => eprintln!("{line}"),
        _ => println!("{line}"),
    }
}

fn with_instances<F>(mut f: F)
where
    F: FnMut(Logger),
{
    let mut instances = INSTANCES.lock().unwrap();
    let mut i = 0;
    while i < instances.len() {
        match instances[i].upgrade() {
            Some(inner) => {
                f(Logger::from_inner(inner));
                i += 1;
            }
            None => {
                instances.swap_remove(i);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Silent = 4,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(LogError::InvalidLogLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => {
                write!(f, "Invalid value \"{level}\" assigned to `logLevel`")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level of every live logger instance and of loggers created later.
pub fn set_log_level(level: LogLevel) {
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    with_instances(|logger| logger.set_log_level(level));
}
