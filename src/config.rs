// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{error, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::exception::Exception;
use crate::param::DEFAULT_TIMEOUT_MESSAGE;

// 进程级开关：每次调用时读取，不做缓存
static LIVE_RELOAD: AtomicBool = AtomicBool::new(false);
static DEBUGGING: AtomicBool = AtomicBool::new(false);

/// 是否处于热重载（开发）模式。开启后模板缓存与文件缓存都会被绕过。
pub fn live_reload() -> bool {
    LIVE_RELOAD.load(Ordering::Relaxed)
}

pub fn set_live_reload(on: bool) {
    LIVE_RELOAD.store(on, Ordering::Relaxed);
}

/// 是否向模板暴露调试标志
pub fn debugging() -> bool {
    DEBUGGING.load(Ordering::Relaxed)
}

pub fn set_debugging(on: bool) {
    DEBUGGING.store(on, Ordering::Relaxed);
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    root_dir: String,
    port: u16,
    worker_threads: usize,
    local: bool,
    #[serde(default = "default_max_response_time_ms")]
    max_response_time_ms: u64,
    #[serde(default = "default_timeout_message")]
    timeout_message: String,
    #[serde(default = "default_shared_dir")]
    shared_dir: String,
    #[serde(default = "default_session_address")]
    session_address: String,
    #[serde(default = "default_session_connect_timeout_ms")]
    session_connect_timeout_ms: u64,
    #[serde(default)]
    sub_dir: String,
    #[serde(default)]
    live_reload: bool,
    #[serde(default)]
    debug: bool,
    #[serde(default = "default_read_buffer_size")]
    read_buffer_size: usize,
}

fn default_max_response_time_ms() -> u64 {
    20_000
}

fn default_timeout_message() -> String {
    DEFAULT_TIMEOUT_MESSAGE.to_string()
}

fn default_shared_dir() -> String {
    "views/shared".to_string()
}

fn default_session_address() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_session_connect_timeout_ms() -> u64 {
    2_000
}

fn default_read_buffer_size() -> usize {
    8192
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            root_dir: ".".to_string(),
            port: 7878,
            worker_threads: 0,
            local: true,
            max_response_time_ms: default_max_response_time_ms(),
            timeout_message: default_timeout_message(),
            shared_dir: default_shared_dir(),
            session_address: default_session_address(),
            session_connect_timeout_ms: default_session_connect_timeout_ms(),
            sub_dir: String::new(),
            live_reload: false,
            debug: false,
            read_buffer_size: default_read_buffer_size(),
        }
    }

    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let str_val = fs::read_to_string(filename)
            .map_err(|e| Exception::Config(format!("无法读取配置文件{}：{}", filename, e)))?;
        Ok(Self::from_toml_str(&str_val))
    }

    /// 解析失败时记录错误并退回默认配置，与读取文件失败区别对待。
    pub fn from_toml_str(content: &str) -> Self {
        let mut raw_config: Config = match toml::from_str(content) {
            Ok(t) => t,
            Err(e) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置：{}", e);
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.max_response_time_ms == 0 {
            warn!("max_response_time_ms被设置为0，这会让所有请求立即超时，因此该值将被改为默认值。");
            raw_config.max_response_time_ms = default_max_response_time_ms();
        }
        raw_config
    }

    /// 把配置中的开关同步到进程级标志
    pub fn apply_process_flags(&self) {
        set_live_reload(self.live_reload);
        set_debugging(self.debug);
    }
}

impl Config {
    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    /// 共享布局目录，相对路径以 `root_dir` 为基准
    pub fn shared_dir(&self) -> PathBuf {
        let shared = PathBuf::from(&self.shared_dir);
        if shared.is_absolute() {
            shared
        } else {
            PathBuf::from(&self.root_dir).join(shared)
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_response_time_ms)
    }

    pub fn timeout_message(&self) -> &str {
        &self.timeout_message
    }

    pub fn session_address(&self) -> &str {
        &self.session_address
    }

    pub fn session_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.session_connect_timeout_ms)
    }

    pub fn sub_dir(&self) -> &str {
        &self.sub_dir
    }

    pub fn live_reload(&self) -> bool {
        self.live_reload
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }
}

impl Config {
    pub fn with_root_dir(mut self, root_dir: impl Into<String>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    pub fn with_max_response_time(mut self, timeout: Duration) -> Self {
        self.max_response_time_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_timeout_message(mut self, message: impl Into<String>) -> Self {
        self.timeout_message = message.into();
        self
    }

    pub fn with_session_address(mut self, address: impl Into<String>) -> Self {
        self.session_address = address.into();
        self
    }

    pub fn with_sub_dir(mut self, sub_dir: impl Into<String>) -> Self {
        self.sub_dir = sub_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.port(), 7878);
        assert_eq!(config.max_response_time(), Duration::from_secs(20));
        assert_eq!(config.timeout_message(), DEFAULT_TIMEOUT_MESSAGE);
        assert_eq!(config.shared_dir(), PathBuf::from("./views/shared"));
        assert!(!config.live_reload());
    }

    #[test]
    fn test_from_toml_str_with_defaults() {
        let config = Config::from_toml_str(
            r#"
            root_dir = "/srv/app"
            port = 8080
            worker_threads = 0
            local = false
            max_response_time_ms = 1500
            "#,
        );
        assert_eq!(config.root_dir(), "/srv/app");
        assert_eq!(config.port(), 8080);
        assert!(config.worker_threads() > 0);
        assert_eq!(config.max_response_time(), Duration::from_millis(1500));
        assert_eq!(config.shared_dir(), PathBuf::from("/srv/app/views/shared"));
        assert_eq!(config.session_address(), "127.0.0.1:6379");
    }

    #[test]
    fn test_from_toml_str_invalid_falls_back() {
        let config = Config::from_toml_str("port = \"not a number\"");
        assert_eq!(config.port(), 7878);
    }

    #[test]
    fn test_zero_timeout_is_replaced() {
        let config = Config::from_toml_str(
            r#"
            root_dir = "."
            port = 1
            worker_threads = 1
            local = true
            max_response_time_ms = 0
            "#,
        );
        assert_eq!(config.max_response_time(), Duration::from_secs(20));
    }

    #[test]
    fn test_from_toml_missing_file() {
        let result = Config::from_toml("/definitely/not/here.toml");
        assert!(matches!(result, Err(Exception::Config(_))));
    }

    #[test]
    fn test_absolute_shared_dir() {
        let config = Config::from_toml_str(
            r#"
            root_dir = "/srv/app"
            port = 1
            worker_threads = 1
            local = true
            shared_dir = "/etc/layouts"
            "#,
        );
        assert_eq!(config.shared_dir(), PathBuf::from("/etc/layouts"));
    }
}
