// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应报文构建
//!
//! 把管线写入 [`ResponseWriter`](crate::writer::ResponseWriter) 的结果序列化为 HTTP/1.x 报文，
//! 按照 `Accept-Encoding` 压缩正文，HEAD 请求只发送报文头。

use crate::{param::*, request::Request, writer::Written};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, warn};

use std::io::{self, Write};

const ALLOWED_METHODS: [HttpRequestMethod; 4] = [
    HttpRequestMethod::Get,
    HttpRequestMethod::Head,
    HttpRequestMethod::Options,
    HttpRequestMethod::Post,
];

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    /// 其他响应头，名称为小写
    headers: Vec<(String, String)>,
    content: Bytes,
    head_only: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: None,
            headers: Vec::new(),
            content: Bytes::new(),
            head_only: false,
        }
    }

    /// 由管线写入的结果构建响应
    pub fn from_written(written: Written, request: &Request, id: u128) -> Self {
        let mut response = Self::new();
        response.version = *request.version();
        response.set_code(written.status);
        response.head_only = request.method() == HttpRequestMethod::Head;

        for (name, value) in written.headers {
            if name == "content-type" {
                response.content_type = Some(value);
            } else {
                response.headers.push((name, value));
            }
        }

        let mime = response.content_type.as_deref().unwrap_or("");
        let encoding = if written.body.is_empty() || should_skip_compression(mime) {
            None
        } else {
            decide_encoding(request.accept_encoding())
        };
        response.content = match compress(written.body.to_vec(), encoding) {
            Ok(compressed) => {
                response.content_encoding = encoding;
                Bytes::from(compressed)
            }
            Err(e) => {
                warn!("[ID{}]压缩响应失败，改为发送原始内容：{}", id, e);
                written.body
            }
        };
        response
    }

    /// 不经过管线的纯文本响应，例如无法解析的请求
    pub fn plain(code: u16) -> Self {
        let mut response = Self::new();
        response.set_code(code);
        response.content_type = Some("text/plain; charset=utf-8".to_string());
        response.content = Bytes::from(format!("{}\n", status_text(code)));
        response
    }

    /// OPTIONS 请求的应答
    pub fn options(request: &Request) -> Self {
        let mut response = Self::new();
        response.version = *request.version();
        response.set_code(204);
        response.allow = Some(ALLOWED_METHODS.to_vec());
        response
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = status_text(code).to_string();
        self
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut header = format!(
            "{} {} {}{}",
            self.version, self.status_code, self.information, CRLF
        );
        if let Some(ref t) = self.content_type {
            header.push_str(&format!("Content-Type: {}{}", t, CRLF));
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.content.len(), CRLF));
        header.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        header.push_str(&format!("Server: {}{}", self.server_name, CRLF));
        if let Some(ref allow) = self.allow {
            let methods: Vec<String> = allow.iter().map(|m| m.to_string()).collect();
            header.push_str(&format!("Allow: {}{}", methods.join(", "), CRLF));
        }
        for (name, value) in &self.headers {
            header.push_str(&format!("{}: {}{}", canonical_name(name), value, CRLF));
        }
        header.push_str(CRLF);

        let mut bytes = header.into_bytes();
        if !self.head_only {
            bytes.extend_from_slice(&self.content);
        }
        bytes
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    pub fn content_encoding(&self) -> Option<HttpEncoding> {
        self.content_encoding
    }
}

/// `content-disposition` -> `Content-Disposition`
fn canonical_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => return Ok(data),
    };

    if let Ok(ref compressed) = result {
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes",
            mode,
            original_size,
            compressed.len()
        );
    }
    result
}

fn should_skip_compression(mime_type: &str) -> bool {
    let skip_types = [
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/x-icon",
        "video/",
        "audio/",
        "application/zip",
        "application/gzip",
        "font/woff",
        "font/woff2",
    ];

    skip_types
        .iter()
        .any(|&skip_type| mime_type.starts_with(skip_type))
}

/// 按 br、gzip、deflate 的优先级选择编码
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    [HttpEncoding::Br, HttpEncoding::Gzip, HttpEncoding::Deflate]
        .into_iter()
        .find(|e| accept_encoding.contains(e))
}
