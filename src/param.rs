// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 协议参数与常量模块
//!
//! - HTTP 状态码及原因短语，错误展示器用它推导默认的错误信息。
//! - 静态资源的 MIME 类型映射。
//! - 模板分隔符与缓存键分隔符。
//! - HTTP 方法、版本及编码格式的强类型枚举。

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

/// 服务器名称标识，用于响应头的 `Server` 字段
pub const SERVER_NAME: &str = "shaneyale-viewserver";

/// HTTP 协议规定的换行符
pub const CRLF: &str = "\r\n";

/// 模板左分隔符。刻意避开 `{{`，以免与前端模板库冲突。
pub const LEFT_DELIM: &str = "{[{";

/// 模板右分隔符
pub const RIGHT_DELIM: &str = "}]}";

/// 编译模板缓存键中，视图路径与共享布局之间的分隔符
pub const CACHE_KEY_SEPARATOR: &str = "-_-";

/// 错误来源缺省时使用的标签
pub const DEFAULT_ERROR_SOURCE: &str = "viewserver/presenter";

/// 超时提示的默认文本
pub const DEFAULT_TIMEOUT_MESSAGE: &str =
    "Your request timed out. Please try again. If this error reoccures, please contact us.";

lazy_static! {
    /// HTTP 状态码与其标准原因短语。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        map.insert(100, "Continue");
        map.insert(101, "Switching Protocols");

        map.insert(200, "OK");
        map.insert(201, "Created");
        map.insert(202, "Accepted");
        map.insert(204, "No Content");
        map.insert(206, "Partial Content");

        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(303, "See Other");
        map.insert(304, "Not Modified");
        map.insert(307, "Temporary Redirect");
        map.insert(308, "Permanent Redirect");

        map.insert(400, "Bad Request");
        map.insert(401, "Unauthorized");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(406, "Not Acceptable");
        map.insert(408, "Request Timeout");
        map.insert(409, "Conflict");
        map.insert(410, "Gone");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(415, "Unsupported Media Type");
        map.insert(418, "I'm a teapot");
        map.insert(422, "Unprocessable Content");
        map.insert(429, "Too Many Requests");

        map.insert(500, "Internal Server Error");
        map.insert(501, "Not Implemented");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map.insert(505, "HTTP Version Not Supported");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表，供静态资源处理器设置 `Content-Type`。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("css", "text/css;charset=utf-8");
        map.insert("csv", "text/csv");
        map.insert("gif", "image/gif");
        map.insert("gz", "application/gzip");
        map.insert("htm", "text/html;charset=utf-8");
        map.insert("html", "text/html;charset=utf-8");
        map.insert("ico", "image/x-icon");
        map.insert("jpg", "image/jpeg");
        map.insert("jpeg", "image/jpeg");
        map.insert("js", "text/javascript;charset=utf-8");
        map.insert("json", "application/json");
        map.insert("map", "application/json");
        map.insert("mjs", "text/javascript");
        map.insert("mp3", "audio/mpeg");
        map.insert("mp4", "video/mp4");
        map.insert("otf", "font/otf");
        map.insert("pdf", "application/pdf");
        map.insert("png", "image/png");
        map.insert("svg", "image/svg+xml");
        map.insert("ttf", "font/ttf");
        map.insert("txt", "text/plain;charset=utf-8");
        map.insert("wasm", "application/wasm");
        map.insert("webm", "video/webm");
        map.insert("webp", "image/webp");
        map.insert("woff", "font/woff");
        map.insert("woff2", "font/woff2");
        map.insert("xml", "text/xml");
        map.insert("zip", "application/zip");
        map
    };
}

/// 状态码的标准原因短语；未知状态码返回空串。
pub fn status_text(code: u16) -> &'static str {
    STATUS_CODES.get(&code).copied().unwrap_or("")
}

/// 根据扩展名查询 MIME 类型，未知扩展名回退为二进制流。
pub fn mime_for(extension: &str) -> &'static str {
    MIME_TYPES
        .get(extension.to_ascii_lowercase().as_str())
        .copied()
        .unwrap_or("application/octet-stream")
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpVersion {
    V1_0,
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpRequestMethod {
    Get,
    Head,
    Options,
    Post,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    Gzip,
    Deflate,
    Br,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_0 => write!(f, "HTTP/1.0"),
            HttpVersion::V1_1 => write!(f, "HTTP/1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_known() {
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(500), "Internal Server Error");
        assert_eq!(status_text(307), "Temporary Redirect");
    }

    #[test]
    fn test_status_text_unknown() {
        assert_eq!(status_text(999), "");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("html"), "text/html;charset=utf-8");
        assert_eq!(mime_for("PNG"), "image/png");
        assert_eq!(mime_for("nope"), "application/octet-stream");
    }

    #[test]
    fn test_display() {
        assert_eq!(HttpVersion::V1_1.to_string(), "HTTP/1.1");
        assert_eq!(HttpRequestMethod::Options.to_string(), "OPTIONS");
        assert_eq!(HttpEncoding::Br.to_string(), "br");
    }
}
