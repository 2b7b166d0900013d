//! Host + path-prefix bucket derivation: query strings and
//! obvious identifiers are normalized out so that e.g.
//! `/users/123` and `/users/456` share a bucket.

/// Derives the `(host, normalized_path)` bucket key for a request URL.
/// Falls back to the raw string (minus query) if it doesn't parse as a URI.
pub fn endpoint_bucket(url: &str) -> String {
    let without_query = url.split('?').next().unwrap_or(url);
    match without_query.parse::<http::Uri>() {
        Ok(uri) => {
            let host = uri.host().unwrap_or("").to_string();
            let path = uri.path();
            let normalized = normalize_path(path);
            format!("{host}{normalized}")
        }
        Err(_) => without_query.to_string(),
    }
}

fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment.to_string()
            } else if is_identifier_like(segment) {
                "*".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_identifier_like(segment: &str) -> bool {
    is_numeric(segment) || is_uuid_like(segment)
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

fn is_uuid_like(segment: &str) -> bool {
    let groups: Vec<&str> = segment.split('-').collect();
    groups.len() == 5
        && [8, 4, 4, 4, 12]
            .iter()
            .zip(groups.iter())
            .all(|(len, g)| g.len() == *len && g.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_string() {
        assert_eq!(
            endpoint_bucket("https://api.example.com/users?page=2"),
            "api.example.com/users"
        );
    }

    #[test]
    fn collapses_numeric_ids() {
        assert_eq!(
            endpoint_bucket("https://api.example.com/users/123/orders/456"),
            "api.example.com/users/*/orders/*"
        );
    }

    #[test]
    fn collapses_uuid_ids() {
        let url = "https://api.example.com/users/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(endpoint_bucket(url), "api.example.com/users/*");
    }

    #[test]
    fn same_bucket_for_different_ids() {
        assert_eq!(
            endpoint_bucket("https://api.example.com/users/1"),
            endpoint_bucket("https://api.example.com/users/2")
        );
    }
}
