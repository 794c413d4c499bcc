// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责将 TCP 流中读取的原始字节解析为强类型的 `Request` 结构体：
//! 1. 请求行（方法、请求目标、版本）的解析，请求目标拆分为路径与查询字符串。
//! 2. 标头解析，名称统一转为小写存储。
//! 3. 查询参数与表单参数的 URL 解码。
//! 4. 内容协商相关的编码与语言解析。

use std::collections::HashMap;

use log::error;

use crate::{exception::Exception, param::*};

/// 一个 HTTP 请求的元数据与（可选的）表单正文
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpRequestMethod,
    /// 完整请求目标（含查询字符串）
    target: String,
    version: HttpVersion,
    /// 小写标头名 -> 值
    headers: HashMap<String, String>,
    /// 查询参数，同名参数保留第一个
    query: HashMap<String, String>,
    /// `application/x-www-form-urlencoded` 正文参数
    form: HashMap<String, String>,
    accept_encoding: Vec<HttpEncoding>,
}

/// 解析 `a=1&b=2` 形式的参数串
fn parse_pairs(raw: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);
        let value = decode(value);
        pairs.entry(key).or_insert(value);
    }
    pairs
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

fn parse_encodings(value: &str) -> Vec<HttpEncoding> {
    let mut encodings = Vec::new();
    for token in value.split(',') {
        let name = token.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        let encoding = match name.as_str() {
            "gzip" => HttpEncoding::Gzip,
            "deflate" => HttpEncoding::Deflate,
            "br" => HttpEncoding::Br,
            _ => continue,
        };
        if !encodings.contains(&encoding) {
            encodings.push(encoding);
        }
    }
    encodings
}

impl Request {
    /// 从原始字节缓冲区构建 `Request`。
    ///
    /// # 参数
    /// * `buffer` - 从网络 Socket 读取的原始数据（可能带有尾部的 0 填充）。
    /// * `id` - 请求 ID，用于日志追踪。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let end = buffer.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let request_string = match std::str::from_utf8(&buffer[..end]) {
            Ok(string) => string,
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let (head, body) = request_string
            .split_once("\r\n\r\n")
            .unwrap_or((request_string, ""));
        let mut lines = head.split(CRLF);
        let request_line = lines.next().unwrap_or("");

        // 请求行，例如 "GET /index.html?x=1 HTTP/1.1"
        let parts: Vec<&str> = request_line.split(' ').filter(|p| !p.is_empty()).collect();
        if parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::UnSupportedRequestMethod);
        }

        let method_str = parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = parts[2].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        let mut request = Self::new(method, parts[1]);
        request.version = version;
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                request = request.with_header(name.trim(), value.trim());
            }
        }

        let is_form = request
            .header("content-type")
            .map_or(false, |t| t.starts_with("application/x-www-form-urlencoded"));
        if method == HttpRequestMethod::Post && is_form {
            request.form = parse_pairs(body.trim_end_matches('\0'));
        }
        Ok(request)
    }

    /// 直接构造请求，供测试与内部调用使用
    pub fn new(method: HttpRequestMethod, target: &str) -> Self {
        let query = target
            .split_once('?')
            .map(|(_, q)| parse_pairs(q))
            .unwrap_or_default();
        Self {
            method,
            target: target.to_string(),
            version: HttpVersion::V1_1,
            headers: HashMap::new(),
            query,
            form: HashMap::new(),
            accept_encoding: Vec::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(HttpRequestMethod::Get, target)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name == "accept-encoding" {
            self.accept_encoding = parse_encodings(value);
        }
        self.headers.insert(name, value.to_string());
        self
    }
}

impl Request {
    pub fn version(&self) -> &HttpVersion {
        &self.version
    }

    /// 完整请求目标（含查询字符串）
    pub fn path(&self) -> &str {
        &self.target
    }

    /// 不含查询字符串的路径，已做 URL 解码
    pub fn path_only(&self) -> String {
        let raw = self
            .target
            .split_once('?')
            .map_or(self.target.as_str(), |(p, _)| p);
        match urlencoding::decode(raw) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => raw.to_string(),
        }
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// 表单值：优先取正文参数，其次取查询参数
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .get(key)
            .or_else(|| self.query.get(key))
            .map(String::as_str)
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// 客户端支持的压缩算法，按出现顺序排列
    pub fn accept_encoding(&self) -> &Vec<HttpEncoding> {
        &self.accept_encoding
    }

    pub fn accept(&self) -> Option<&str> {
        self.header("accept")
    }

    /// `Accept-Language` 中的第一个主语言标签，例如 `en-US,en;q=0.9` 返回 `en`
    pub fn accept_language(&self) -> Option<String> {
        let value = self.header("accept-language")?;
        let first = value.split(',').next()?.split(';').next()?.trim();
        let main = first.split('-').next()?.trim().to_ascii_lowercase();
        if main.is_empty() || main == "*" {
            None
        } else {
            Some(main)
        }
    }

    /// 日志用的请求描述
    pub fn describe(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.version)
    }
}
