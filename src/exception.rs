// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了请求处理管线在各个阶段可能产生的异常。
//!
//! ## 设计意图
//! - **错误分类**：覆盖协议解析、视图解析、模板加载与渲染、限时执行、会话存储等环节。
//! - **语义映射**：每个变体通过 [`Exception::classification`] 映射为 HTTP 状态码，
//!   供错误展示器（ErrorPresenter）决定响应状态。
//! - **只返回，不 panic**：缓存与渲染引擎的错误一律通过 `Result` 返回。

use std::time::Duration;

use thiserror::Error;

/// 请求处理过程中发生的异常类型。
#[derive(Debug, Clone, Error)]
pub enum Exception {
    /// 请求字节流无法解析为合法的 UTF-8 字符串。
    #[error("Request bytes can't be parsed in UTF-8")]
    RequestIsNotUtf8,
    /// 请求行不完整或使用了不支持的 HTTP 方法。
    #[error("Unsupported request method")]
    UnSupportedRequestMethod,
    /// 不支持的 HTTP 协议版本。
    #[error("Unsupported HTTP version")]
    UnsupportedHttpVersion,
    /// 静态资源不存在。对应 `404 Not Found`。
    #[error("File not found (404)")]
    FileNotFound,
    /// 路径非法，例如包含目录穿越。对应 `400 Bad Request`。
    #[error("Invalid path (400)")]
    InvalidPath,
    /// 模板源文件不存在。
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    /// 模板源文件存在但读取失败。
    #[error("couldn't read template {path}: {reason}")]
    TemplateRead { path: String, reason: String },
    /// 请求的共享布局没有被加载。
    #[error("shared layout not found: {0}")]
    LayoutNotFound(String),
    /// 模板语法错误。
    #[error("template parse error in {name}: {reason}")]
    TemplateParse { name: String, reason: String },
    /// 模板执行失败（包括执行期间被捕获的 panic）。
    #[error("error rendering template: {0}")]
    Render(String),
    /// 视图解析器（控制器）未能产出视图数据。
    #[error("view resolution failed: {0}")]
    Resolution(String),
    /// 限时执行超时。
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// 在某个恢复点捕获到的 panic。
    #[error("recovered from panic: {0}")]
    PanicRecovered(String),
    /// 会话存储无法连接。
    #[error("session store unavailable at {address}: {reason}")]
    SessionStore { address: String, reason: String },
    /// 无法为限时执行创建后台线程。
    #[error("couldn't spawn bounded task: {0}")]
    Spawn(String),
    /// 配置文件缺失或格式错误。
    #[error("config error: {0}")]
    Config(String),
}

impl Exception {
    /// 异常对应的分类码（即 HTTP 状态码）。
    ///
    /// `Timeout` 也返回 500，但超时响应不经过错误展示器，而是直接写出超时提示。
    pub fn classification(&self) -> u16 {
        use Exception::*;
        match self {
            RequestIsNotUtf8 | UnSupportedRequestMethod | UnsupportedHttpVersion | InvalidPath => {
                400
            }
            FileNotFound | TemplateNotFound(_) => 404,
            TemplateRead { .. }
            | LayoutNotFound(_)
            | TemplateParse { .. }
            | Render(_)
            | Resolution(_)
            | Timeout(_)
            | PanicRecovered(_)
            | SessionStore { .. }
            | Spawn(_)
            | Config(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_not_found() {
        assert_eq!(Exception::TemplateNotFound("a.html".into()).classification(), 404);
        assert_eq!(Exception::FileNotFound.classification(), 404);
    }

    #[test]
    fn test_classification_bad_request() {
        assert_eq!(Exception::InvalidPath.classification(), 400);
        assert_eq!(Exception::RequestIsNotUtf8.classification(), 400);
    }

    #[test]
    fn test_classification_server_error() {
        assert_eq!(Exception::Render("boom".into()).classification(), 500);
        assert_eq!(Exception::PanicRecovered("boom".into()).classification(), 500);
        assert_eq!(
            Exception::TemplateParse {
                name: "x".into(),
                reason: "y".into()
            }
            .classification(),
            500
        );
    }

    #[test]
    fn test_display() {
        let e = Exception::LayoutNotFound("layout.html".into());
        assert_eq!(e.to_string(), "shared layout not found: layout.html");
        let e = Exception::Timeout(Duration::from_millis(50));
        assert_eq!(e.to_string(), "request timed out after 50ms");
    }
}
