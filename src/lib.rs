// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

pub mod cache;
pub mod config;
pub mod controller;
pub mod exception;
pub mod executor;
pub mod handlers;
pub mod middleware;
pub mod param;
pub mod presenter;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod template;
pub mod translate;
pub mod util;
pub mod view;
pub mod writer;

pub use cache::{FileCache, TemplateCache};
pub use config::Config;
pub use controller::{ErrorController, ViewResolver};
pub use exception::Exception;
pub use executor::{BoundedExecutor, BoundedOutcome};
pub use handlers::{ClearCacheHandler, FolderHandler, MvcHandler};
pub use middleware::{Chain, Context, Handler, InitHandler, LoggingHandler, RecoverHandler};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use presenter::ErrorPresenter;
pub use request::Request;
pub use response::Response;
pub use server::{Router, Server, Services};
pub use template::Template;
pub use translate::{Translater, Translator};
pub use view::{add_messages, Model, RenderContext, ViewEngine, ViewOutcome};
pub use writer::{ResponseWriter, Written};
