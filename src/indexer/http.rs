pub const HTTP_ANY: &str = "ANY";

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD"];

pub fn normalize_method(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.trim_matches('"').to_ascii_uppercase();
    if upper == "ALL" || upper == "ANY" {
        return Some(HTTP_ANY.to_string());
    }
    if HTTP_METHODS.iter().any(|method| *method == upper) {
        return Some(upper);
    }
    None
}

/// Route literal as declared, with a leading `/` and no trailing one.
pub fn normalize_route_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let body = trimmed.trim_end_matches('/');
    if body.starts_with('/') {
        body.to_string()
    } else {
        format!("/{body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_normalize_to_upper_case() {
        assert_eq!(normalize_method("get").as_deref(), Some("GET"));
        assert_eq!(normalize_method("\"Post\"").as_deref(), Some("POST"));
        assert_eq!(normalize_method("all").as_deref(), Some(HTTP_ANY));
        assert_eq!(normalize_method("route"), None);
    }

    #[test]
    fn route_paths_gain_leading_slash() {
        assert_eq!(normalize_route_path(""), "/");
        assert_eq!(normalize_route_path("users/"), "/users");
        assert_eq!(normalize_route_path("/users/{id}"), "/users/{id}");
    }
}
