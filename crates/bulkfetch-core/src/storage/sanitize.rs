//! Filesystem-safe path components from remote display names and group keys.

/// Longest component we emit; short of NAME_MAX to leave room for the task id
/// suffix and extension the store appends.
const MAX_COMPONENT_BYTES: usize = 180;

/// Sanitizes a candidate path component.
///
/// Remote names come from designers and contain anything: slashes (frame
/// paths), colons (instance ids), control characters. Everything outside a
/// conservative safe set becomes `_`, runs collapse, and leading/trailing
/// dots and underscores are trimmed so no component can escape its directory
/// or hide itself.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_replaced = false;

    for c in name.chars() {
        let safe = c.is_alphanumeric() || matches!(c, '-' | '.' | '(' | ')');
        if safe {
            out.push(c);
            prev_replaced = false;
        } else if !prev_replaced {
            out.push('_');
            prev_replaced = true;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut result = if trimmed.len() > MAX_COMPONENT_BYTES {
        let mut take = MAX_COMPONENT_BYTES;
        while take > 0 && !trimmed.is_char_boundary(take) {
            take -= 1;
        }
        trimmed[..take].to_string()
    } else {
        trimmed.to_string()
    };

    if result.is_empty() {
        result.push_str("item");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separators_and_collapses() {
        assert_eq!(sanitize_component("icons/nav/home"), "icons_nav_home");
        assert_eq!(sanitize_component("a//b"), "a_b");
    }

    #[test]
    fn strips_control_chars() {
        assert_eq!(sanitize_component("ic\x00on\tset"), "ic_on_set");
    }

    #[test]
    fn trims_dots_and_underscores() {
        assert_eq!(sanitize_component("..hidden.."), "hidden");
        assert_eq!(sanitize_component("__name__"), "name");
    }

    #[test]
    fn empty_input_gets_placeholder() {
        assert_eq!(sanitize_component(""), "item");
        assert_eq!(sanitize_component("///"), "item");
    }

    #[test]
    fn long_names_truncated_on_char_boundary() {
        let long = "å".repeat(400);
        let out = sanitize_component(&long);
        assert!(out.len() <= MAX_COMPONENT_BYTES);
        assert!(!out.is_empty());
    }
}
