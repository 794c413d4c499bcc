// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 管线消费的控制器接口。

use crate::exception::Exception;
use crate::middleware::Context;
use crate::request::Request;
use crate::view::{RenderContext, ViewOutcome};

/// 为一个请求产出视图数据。
///
/// 返回的 [`ViewOutcome`] 中 `error` 非空或 `context.error_type` 非零时，管线会转去展示错误，
/// 不会渲染视图。
pub trait ViewResolver: Send + Sync {
    fn view_data(&self, ctx: &Context, r: &Request) -> ViewOutcome;
}

/// 为错误页产出视图数据。接收已经规范化的错误上下文。
pub trait ErrorController: Send + Sync {
    fn view_data(&self, ctx: RenderContext, err: Option<&Exception>) -> ViewOutcome;
}

impl<F> ViewResolver for F
where
    F: Fn(&Context, &Request) -> ViewOutcome + Send + Sync,
{
    fn view_data(&self, ctx: &Context, r: &Request) -> ViewOutcome {
        self(ctx, r)
    }
}
