// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 本地化接口。
//!
//! 管线本身从不解释翻译内容，只把翻译器引用挂到请求上下文和渲染上下文上，
//! 由模板中的 `{[{ T "key" }]}` 调用。

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use log::warn;

/// 基于语言环境的字符串查找能力
pub trait Translator: Send + Sync {
    /// 查找 `key` 对应的文本；找不到时返回 `key` 本身。
    fn translate(&self, key: &str) -> String;

    /// 当前主语言，例如 `de-DE`
    fn language(&self) -> &str;
}

impl fmt::Debug for dyn Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Translator({})", self.language())
    }
}

/// 按语言保存字符串表的简单翻译器
#[derive(Debug, Clone, Default)]
pub struct Translater {
    default_lang: String,
    fallback_lang: String,
    url_lang: String,
    strings: HashMap<String, HashMap<String, String>>,
}

impl Translater {
    pub fn new(default_lang: &str, fallback_lang: &str, url_lang: &str) -> Self {
        Self {
            default_lang: default_lang.to_string(),
            fallback_lang: fallback_lang.to_string(),
            url_lang: url_lang.to_string(),
            strings: HashMap::new(),
        }
    }

    pub fn with_string(mut self, lang: &str, key: &str, value: &str) -> Self {
        self.strings
            .entry(lang.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn fallback_language(&self) -> &str {
        &self.fallback_lang
    }

    pub fn url_language(&self) -> &str {
        &self.url_lang
    }

    fn lookup(&self, lang: &str, key: &str) -> Option<&String> {
        self.strings.get(lang).and_then(|table| table.get(key))
    }
}

impl Translator for Translater {
    fn translate(&self, key: &str) -> String {
        self.lookup(&self.default_lang, key)
            .or_else(|| self.lookup(&self.fallback_lang, key))
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    fn language(&self) -> &str {
        &self.default_lang
    }
}

// 内置页面使用的字符串
const BUILTIN_STRINGS: [(&str, &str, &str); 6] = [
    ("de-DE", "welcome", "Willkommen"),
    ("de-DE", "footer", "Bereitgestellt von viewserver"),
    ("de-DE", "empty", "Keine Inhalte"),
    ("en-US", "welcome", "Welcome"),
    ("en-US", "footer", "Served by viewserver"),
    ("en-US", "empty", "Nothing here"),
];

lazy_static! {
    static ref TRANSLATERS: Mutex<HashMap<String, Arc<Translater>>> = Mutex::new(HashMap::new());
}

/// 获取（并缓存）指定主语言的翻译器。
///
/// `de` 对应 de-DE（回退 en-US），`en` 对应 en-US（回退 de-DE），其余语言一律按 de-DE 处理。
pub fn translater_for(main_lang: &str) -> Arc<Translater> {
    let mut translaters = match TRANSLATERS.lock() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("翻译器缓存锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    };
    translaters
        .entry(main_lang.to_string())
        .or_insert_with(|| {
            let (lang, fallback) = match main_lang {
                "en" => ("en-US", "de-DE"),
                _ => ("de-DE", "en-US"),
            };
            let translater = BUILTIN_STRINGS.iter().fold(
                Translater::new(lang, fallback, main_lang),
                |t, (l, key, value)| t.with_string(l, key, value),
            );
            Arc::new(translater)
        })
        .clone()
}

/// 默认翻译器（de-DE）
pub fn default_translater() -> Arc<Translater> {
    translater_for("de")
}
