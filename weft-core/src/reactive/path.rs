//! Dot-delimited watch expressions.
//!
//! A watch source given as a string is a chain of property reads walked
//! from the owning scope's root data, for example `"user.profile.name"`.
//! Numeric segments index into lists. Anything more expressive than that
//! (brackets, calls, operators) must be a getter function instead.

use std::sync::Arc;

use crate::value::Value;

use super::watcher::Getter;

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Parse a dot-delimited path into a tracked getter.
///
/// Returns `None` for a malformed path; the caller reports the warning and
/// substitutes a constant-null getter.
pub(crate) fn parse_path(path: &str) -> Option<Getter> {
    if path.is_empty() || !path.chars().all(is_path_char) {
        return None;
    }
    let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
    Some(Arc::new(move |scope| {
        let mut current = scope.data().unwrap_or(Value::Null);
        for segment in &segments {
            current = match &current {
                // tracked reads, so the path subscribes like any getter
                Value::Map(map) => map.get(segment),
                Value::List(list) => match segment.parse::<usize>() {
                    Ok(index) => list.get(index),
                    Err(_) => return Ok(Value::Null),
                },
                _ => return Ok(Value::Null),
            };
        }
        Ok(current)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime::Runtime;
    use crate::value::{ObservedList, ObservedMap};

    #[test]
    fn rejects_paths_with_expression_characters() {
        assert!(parse_path("a-b").is_none());
        assert!(parse_path("a[0]").is_none());
        assert!(parse_path("a b").is_none());
        assert!(parse_path("").is_none());
        assert!(parse_path("a.b.c").is_some());
        assert!(parse_path("$data.items.0").is_some());
    }

    #[test]
    fn walks_nested_maps_and_lists() {
        let rt = Runtime::new();
        let scope = rt.create_scope(None);

        let profile = ObservedMap::new();
        profile.insert("name", "ada");
        let users: ObservedList = [Value::Map(profile)].into_iter().collect();
        let root = ObservedMap::new();
        root.insert("users", users);
        scope.set_data(Value::Map(root));

        let getter = parse_path("users.0.name").unwrap();
        assert_eq!(getter(&scope).unwrap(), Value::from("ada"));

        let missing = parse_path("users.1.name").unwrap();
        assert_eq!(missing(&scope).unwrap(), Value::Null);

        let through_primitive = parse_path("users.0.name.inner").unwrap();
        assert_eq!(through_primitive(&scope).unwrap(), Value::Null);
    }

    #[test]
    fn reads_null_without_root_data() {
        let rt = Runtime::new();
        let scope = rt.create_scope(None);
        let getter = parse_path("anything").unwrap();
        assert_eq!(getter(&scope).unwrap(), Value::Null);
    }
}
