//! Argument validation shared by the resolution tools

use crate::errors::AppError;

pub const MAX_ATTRIBUTE_PATHS: usize = 64;

fn is_node_name_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.' | ':')
}

fn is_path_segment_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '-' | '_')
}

pub fn normalize_node_name(node: Option<String>) -> Result<String, AppError> {
    let value = node.unwrap_or_default();
    let normalized = value.trim();
    if normalized.is_empty() || !normalized.chars().all(is_node_name_char) {
        return Err(AppError::bad_request(
            "invalid_node",
            "node must contain only alphanumeric characters, dashes, underscores, dots, and :",
        ));
    }

    Ok(normalized.to_string())
}

pub fn normalize_host_id(host_id: Option<String>) -> Result<String, AppError> {
    let value = host_id.unwrap_or_default();
    let normalized = value.trim();
    if normalized.is_empty() || !normalized.chars().all(|character| character.is_ascii_digit()) {
        return Err(AppError::bad_request(
            "invalid_host_id",
            "host_id must be a decimal Zabbix host id",
        ));
    }

    Ok(normalized.to_string())
}

pub fn normalize_query(query: Option<String>) -> Result<String, AppError> {
    let value = query.unwrap_or_default();
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(AppError::bad_request(
            "invalid_query",
            "query must be a non-empty Chef search query",
        ));
    }

    Ok(normalized.to_string())
}

/// Dotted attribute paths such as `kernel.release`. Duplicates are dropped,
/// first occurrence wins.
pub fn normalize_attribute_paths(paths: Option<Vec<String>>) -> Result<Vec<String>, AppError> {
    let paths = paths.unwrap_or_default();
    if paths.len() > MAX_ATTRIBUTE_PATHS {
        return Err(AppError::bad_request(
            "invalid_attributes",
            "at most 64 attribute paths may be requested",
        ));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.trim();
        let valid = !path.is_empty()
            && path
                .split('.')
                .all(|segment| !segment.is_empty() && segment.chars().all(is_path_segment_char));
        if !valid {
            return Err(AppError::bad_request(
                "invalid_attributes",
                "attribute paths must be dot-separated segments of alphanumeric characters, dashes, and underscores",
            ));
        }

        if !normalized.iter().any(|existing| existing == path) {
            normalized.push(path.to_string());
        }
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_node_name() {
        let node = normalize_node_name(Some("  web01.prod ".to_string())).expect("valid node");
        assert_eq!(node, "web01.prod");
    }

    #[test]
    fn rejects_node_with_disallowed_characters() {
        let error = normalize_node_name(Some("web01/prod".to_string()))
            .expect_err("expected invalid node");
        assert!(error.to_string().contains("bad request"));
        assert!(normalize_node_name(None).is_err());
    }

    #[test]
    fn host_id_must_be_numeric() {
        assert_eq!(
            normalize_host_id(Some(" 10084 ".to_string())).expect("valid id"),
            "10084"
        );
        assert!(normalize_host_id(Some("10084a".to_string())).is_err());
        assert!(normalize_host_id(Some(String::new())).is_err());
    }

    #[test]
    fn rejects_blank_query() {
        assert!(normalize_query(Some("   ".to_string())).is_err());
        assert_eq!(
            normalize_query(Some(" role:web ".to_string())).expect("valid query"),
            "role:web"
        );
    }

    #[test]
    fn attribute_paths_are_deduplicated_in_order() {
        let paths = normalize_attribute_paths(Some(vec![
            "kernel.release".to_string(),
            "platform".to_string(),
            " kernel.release ".to_string(),
        ]))
        .expect("valid paths");
        assert_eq!(paths, vec!["kernel.release", "platform"]);
        assert!(normalize_attribute_paths(None).expect("no paths").is_empty());
    }

    #[test]
    fn rejects_malformed_attribute_paths() {
        for path in ["kernel..release", ".platform", "kernel release", "a/b"] {
            assert!(
                normalize_attribute_paths(Some(vec![path.to_string()])).is_err(),
                "{path} should be rejected"
            );
        }
    }
}
