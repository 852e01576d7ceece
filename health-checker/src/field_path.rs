use serde_json::Value;

/// Returns true when every key of the dotted `path` resolves, level by level,
/// starting at `document`. A key missing at any level, or a non-object value
/// met before the last key, counts as absent.
pub fn field_exists(document: &Value, path: &str) -> bool {
    let mut current = document;
    for key in path.split('.') {
        match current.as_object().and_then(|object| object.get(key)) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_path_exists() {
        let document = json!({"a": {"b": 1}});
        assert!(field_exists(&document, "a.b"));
        assert!(field_exists(&document, "a"));
    }

    #[test]
    fn test_missing_leaf_key() {
        assert!(!field_exists(&json!({"a": {}}), "a.b"));
    }

    #[test]
    fn test_missing_intermediate_key() {
        let document = json!({"team": {"stats": {"assists": 4}}});
        assert!(!field_exists(&document, "team.roster.assists"));
        assert!(field_exists(&document, "team.stats.assists"));
    }

    #[test]
    fn test_scalar_in_the_middle_is_absent() {
        let document = json!({"a": 5, "s": "text", "arr": [1, 2]});
        assert!(!field_exists(&document, "a.b"));
        assert!(!field_exists(&document, "s.len"));
        assert!(!field_exists(&document, "arr.0"));
    }

    #[test]
    fn test_null_values_still_exist() {
        let document = json!({"data": {"id": null}});
        assert!(field_exists(&document, "data.id"));
        assert!(!field_exists(&document, "data.id.value"));
    }

    #[test]
    fn test_non_object_document() {
        assert!(!field_exists(&json!([{"a": 1}]), "a"));
        assert!(!field_exists(&json!("plain"), "a"));
    }

    #[test]
    fn test_empty_segments_are_literal_keys() {
        assert!(!field_exists(&json!({"a": {"b": 1}}), "a..b"));
        assert!(field_exists(&json!({"": 1}), ""));
    }
}
