use crate::model::UserContext;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};

/// Axum extractor for UserContext from request headers
///
/// This extractor looks for user information in request headers:
/// - X-User-Id: Required user identifier
/// - X-User-Name: Optional user display name
/// - X-User-Roles: Optional comma-separated role list
///
/// For development/testing, if no headers are present, returns a default
/// user.
#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        if let Some(user_id) = extract_header_value(headers, "x-user-id") {
            let user_name = extract_header_value(headers, "x-user-name");
            let roles = extract_header_value(headers, "x-user-roles")
                .map(|raw| {
                    raw.split(',')
                        .map(|role| role.trim().to_string())
                        .filter(|role| !role.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            Ok(UserContext::with_details(user_id, user_name, roles))
        } else {
            // For development: return default user if no headers present
            Ok(UserContext::default_user())
        }
    }
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-roles", "admin, editor,,".parse().unwrap());
        let roles = extract_header_value(&headers, "x-user-roles")
            .map(|raw| {
                raw.split(',')
                    .map(|role| role.trim().to_string())
                    .filter(|role| !role.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        assert_eq!(roles, vec!["admin".to_string(), "editor".to_string()]);
    }
}
