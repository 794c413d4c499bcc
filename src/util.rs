// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::any::Any;

/// 从 `catch_unwind` 的载荷中取出可读的 panic 信息
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 把消息追加到已有消息之后，用 `<br/>` 分隔
pub fn append_message(existing: &str, message: &str) -> String {
    if existing.is_empty() {
        message.to_string()
    } else if message.is_empty() {
        existing.to_string()
    } else {
        format!("{}<br/>{}", existing, message)
    }
}

/// 规范化相对路径：去掉空段和 `.`，遇到 `..` 返回 `None`。
///
/// 返回值不以 `/` 开头，空路径返回空串。
pub fn clean_path(path: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\0') => return None,
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}
