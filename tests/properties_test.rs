// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use proptest::prelude::*;

use viewserver::template::html_escape;
use viewserver::util::{append_message, clean_path};

proptest! {
    #[test]
    fn test_clean_path_never_escapes(path in "[a-z./\\\\]{0,40}") {
        if let Some(cleaned) = clean_path(&path) {
            prop_assert!(!cleaned.starts_with('/'));
            prop_assert!(!cleaned.contains('\\'));
            prop_assert!(cleaned.split('/').all(|s| !s.is_empty() && s != "." && s != ".."));
        } else {
            prop_assert!(path.split(['/', '\\']).any(|s| s == ".."));
        }
    }

    #[test]
    fn test_clean_path_is_idempotent(path in "[a-z0-9./]{0,40}") {
        if let Some(cleaned) = clean_path(&path) {
            prop_assert_eq!(clean_path(&cleaned), Some(cleaned.clone()));
        }
    }

    #[test]
    fn test_append_message_keeps_both(existing in "[a-z ]{0,20}", message in "[a-z ]{0,20}") {
        let joined = append_message(&existing, &message);
        prop_assert!(joined.starts_with(&existing));
        prop_assert!(joined.ends_with(&message));
        let separators = joined.matches("<br/>").count();
        prop_assert_eq!(separators, usize::from(!existing.is_empty() && !message.is_empty()));
    }

    #[test]
    fn test_html_escape_removes_markup(text in ".{0,40}") {
        let escaped = html_escape(&text);
        prop_assert!(!escaped.contains('<'));
        prop_assert!(!escaped.contains('>'));
        prop_assert!(!escaped.contains('"'));
    }
}
