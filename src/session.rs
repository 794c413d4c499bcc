// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 会话存储
//!
//! 管线只关心会话存储是否可达：第一次进入限时执行时建立一次 TCP 连接，之后复用。
//! 连接失败视为部署错误，进程直接退出。

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::OnceLock;
use std::time::Duration;

use log::{error, info};

use crate::exception::Exception;

/// 一个已连接的会话存储
#[derive(Debug)]
pub struct SessionStore {
    address: SocketAddr,
    // 连接在进程生命周期内保持打开
    _connection: TcpStream,
}

impl SessionStore {
    /// 连接会话存储，不重试
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, Exception> {
        let fail = |reason: String| Exception::SessionStore {
            address: address.to_string(),
            reason,
        };
        let resolved = address
            .to_socket_addrs()
            .map_err(|e| fail(e.to_string()))?
            .next()
            .ok_or_else(|| fail("address resolved to nothing".to_string()))?;
        let stream =
            TcpStream::connect_timeout(&resolved, timeout).map_err(|e| fail(e.to_string()))?;
        let _ = stream.set_nodelay(true);
        info!("会话存储{}连接成功", resolved);
        Ok(Self {
            address: resolved,
            _connection: stream,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

/// 只初始化一次的会话存储句柄
#[derive(Debug, Default)]
pub struct SessionCell {
    store: OnceLock<SessionStore>,
}

impl SessionCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取会话存储，第一次调用时建立连接。连接失败时记录错误并以退出码 1 终止进程。
    pub fn get_or_connect(&self, address: &str, timeout: Duration) -> &SessionStore {
        self.store
            .get_or_init(|| match SessionStore::connect(address, timeout) {
                Ok(store) => store,
                Err(e) => {
                    error!("{}，服务器无法继续运行", e);
                    std::process::exit(1);
                }
            })
    }

    /// 获取会话存储，第一次调用时建立连接，失败时返回错误而不是退出
    pub fn try_get_or_connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<&SessionStore, Exception> {
        if let Some(store) = self.store.get() {
            return Ok(store);
        }
        let store = SessionStore::connect(address, timeout)?;
        // 并发初始化时保留先到者
        let _ = self.store.set(store);
        self.store.get().ok_or_else(|| Exception::SessionStore {
            address: address.to_string(),
            reason: "session store vanished after init".to_string(),
        })
    }

    pub fn get(&self) -> Option<&SessionStore> {
        self.store.get()
    }

    pub fn is_connected(&self) -> bool {
        self.store.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let cell = SessionCell::new();
        assert!(!cell.is_connected());

        let first = cell.get_or_connect(&address, Duration::from_secs(1)) as *const SessionStore;
        let second = cell.get_or_connect(&address, Duration::from_secs(1)) as *const SessionStore;
        assert_eq!(first, second);
        assert!(cell.is_connected());
        assert_eq!(cell.get().unwrap().address().to_string(), address);
    }

    #[test]
    fn test_connect_failure_is_error() {
        // 先绑定再释放，得到一个大概率没有监听者的端口
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let cell = SessionCell::new();
        let result = cell.try_get_or_connect(&format!("127.0.0.1:{}", port), Duration::from_millis(200));
        assert!(matches!(result, Err(Exception::SessionStore { .. })));
        assert!(!cell.is_connected());
    }

    #[test]
    fn test_bad_address() {
        let result = SessionStore::connect("not an address", Duration::from_millis(100));
        assert!(result.is_err());
    }
}
