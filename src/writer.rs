// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 响应写入器
//!
//! 管线各阶段共享的响应缓冲区。写入器可以廉价克隆，所有克隆指向同一份状态，
//! 因此限时执行的后台线程和等待中的调用方可以写同一个响应。
//!
//! 一旦被 [`ResponseWriter::replace_and_seal`] 或 [`ResponseWriter::finish`] 封存，后续的任何写入都会被静默丢弃，
//! 这保证每个请求只会产出一个最终响应。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use log::{debug, warn};

use crate::param::status_text;

#[derive(Debug, Default)]
struct WriterState {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    sealed: bool,
}

/// 写入完成后的响应快照
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Written {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    state: Arc<Mutex<WriterState>>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("响应写入器锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    /// 设置响应头（名称不区分大小写），已封存时忽略
    pub fn header(&self, name: &str, value: &str) {
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        state
            .headers
            .insert(name.to_ascii_lowercase(), value.to_string());
    }

    /// 写入状态码。只有第一次调用生效，非法状态码被替换为 500。
    pub fn write_header(&self, code: u16) {
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        if state.status.is_some() {
            debug!("重复写入状态码{}，已忽略", code);
            return;
        }
        let code = if (100..=999).contains(&code) {
            code
        } else {
            warn!("非法的状态码{}，改为500", code);
            500
        };
        state.status = Some(code);
    }

    /// 追加响应体，返回实际写入的字节数
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut state = self.lock();
        if state.sealed {
            return 0;
        }
        state.body.extend_from_slice(bytes);
        bytes.len()
    }

    /// 纯文本错误响应：`text/plain`，禁止嗅探，正文为消息加换行
    pub fn error(&self, message: &str, code: u16) {
        self.header("Content-Type", "text/plain; charset=utf-8");
        self.header("X-Content-Type-Options", "nosniff");
        self.write_header(code);
        self.write(message.as_bytes());
        self.write(b"\n");
    }

    /// 307 临时重定向
    pub fn redirect(&self, location: &str) {
        self.header("Location", location);
        self.write_header(307);
    }

    /// 丢弃已写入的状态码、响应头与响应体。已封存时无效。
    pub fn reset(&self) {
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        state.status = None;
        state.headers.clear();
        state.body.clear();
    }

    /// 超时时替换响应：清空响应头与正文、写入提示并封存，状态码保持不变
    pub fn replace_and_seal(&self, message: &str) {
        let mut state = self.lock();
        if state.sealed {
            return;
        }
        state.headers.clear();
        state.headers.insert(
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        );
        state.body.clear();
        state.body.extend_from_slice(message.as_bytes());
        state.body.push(b'\n');
        state.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// 是否已经写入过任何内容
    pub fn is_dirty(&self) -> bool {
        let state = self.lock();
        state.status.is_some() || !state.body.is_empty()
    }

    pub fn status(&self) -> Option<u16> {
        self.lock().status
    }

    /// 当前响应的快照；从未写状态码时视为 200
    pub fn snapshot(&self) -> Written {
        let state = self.lock();
        Written {
            status: state.status.unwrap_or(200),
            headers: state.headers.clone(),
            body: Bytes::copy_from_slice(&state.body),
        }
    }

    /// 封存并取出最终响应
    pub fn finish(&self) -> Written {
        let mut state = self.lock();
        state.sealed = true;
        Written {
            status: state.status.unwrap_or(200),
            headers: std::mem::take(&mut state.headers),
            body: Bytes::from(std::mem::take(&mut state.body)),
        }
    }

    /// 状态码对应的原因短语
    pub fn reason(&self) -> &'static str {
        status_text(self.status().unwrap_or(200))
    }
}
