//! Caller identity from request headers and a static grant table.

use async_trait::async_trait;
use axum::http::HeaderMap;
use relay_types::{Authorizer, Caller, Permission, RelayError};
use std::collections::{HashMap, HashSet};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const TENANT_HEADER: &str = "x-tenant";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the caller. A request without `X-User-Id` is refused.
pub fn caller_from_headers(
    headers: &HeaderMap,
    default_tenant: &str,
) -> Result<Caller, RelayError> {
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| RelayError::Permission("Authentication required".to_string()))?;
    Ok(Caller {
        user_id: user_id.to_string(),
        email: header(headers, USER_EMAIL_HEADER).map(str::to_string),
        tenant_id: header(headers, TENANT_HEADER)
            .unwrap_or(default_tenant)
            .to_string(),
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GrantParseError {
    #[error("malformed grant entry: {0:?}")]
    Malformed(String),
    #[error("unknown permission {permission:?} for {user:?}")]
    UnknownPermission { user: String, permission: String },
}

/// Grants keyed by user id or email; `*` as a user matches everyone, `*` as a
/// permission grants all of them.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    grants: HashMap<String, HashSet<Permission>>,
}

impl StaticAuthorizer {
    /// Every identified caller holds every permission.
    pub fn allow_all() -> Self {
        let mut grants = HashMap::new();
        grants.insert("*".to_string(), Permission::ALL.into_iter().collect());
        Self { grants }
    }

    pub fn grant(mut self, user: impl Into<String>, permissions: &[Permission]) -> Self {
        self.grants
            .entry(user.into())
            .or_default()
            .extend(permissions.iter().copied());
        self
    }

    /// Parse `alice=*;bob=view_publishing_events,view_product_control`.
    pub fn parse(spec: &str) -> Result<Self, GrantParseError> {
        let mut out = Self::default();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (user, perms) = entry
                .split_once('=')
                .ok_or_else(|| GrantParseError::Malformed(entry.to_string()))?;
            let user = user.trim();
            if user.is_empty() {
                return Err(GrantParseError::Malformed(entry.to_string()));
            }
            let mut set = HashSet::new();
            for p in perms.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                if p == "*" {
                    set.extend(Permission::ALL);
                    continue;
                }
                let perm = Permission::parse(p).ok_or_else(|| GrantParseError::UnknownPermission {
                    user: user.to_string(),
                    permission: p.to_string(),
                })?;
                set.insert(perm);
            }
            out.grants.entry(user.to_string()).or_default().extend(set);
        }
        Ok(out)
    }

    fn holds(&self, key: &str, permission: Permission) -> bool {
        self.grants
            .get(key)
            .is_some_and(|set| set.contains(&permission))
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn require(&self, caller: &Caller, permission: Permission) -> Result<(), RelayError> {
        let allowed = self.holds(&caller.user_id, permission)
            || caller
                .email
                .as_deref()
                .is_some_and(|email| self.holds(email, permission))
            || self.holds("*", permission);
        if allowed {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %caller.user_id,
                permission = %permission,
                "permission denied"
            );
            Err(RelayError::Permission(format!(
                "Missing required permission: {}",
                permission
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn caller(user: &str, email: Option<&str>) -> Caller {
        Caller {
            user_id: user.into(),
            email: email.map(Into::into),
            tenant_id: "default_tenant".into(),
        }
    }

    #[tokio::test]
    async fn parsed_grants() {
        let auth =
            StaticAuthorizer::parse("admin=*; viewer@example.org=view_publishing_events").unwrap();
        assert!(auth
            .require(&caller("admin", None), Permission::ManageIntegrationFlows)
            .await
            .is_ok());
        assert!(auth
            .require(
                &caller("7", Some("viewer@example.org")),
                Permission::ViewPublishingEvents
            )
            .await
            .is_ok());
        let err = auth
            .require(
                &caller("7", Some("viewer@example.org")),
                Permission::ManagePublishingEvents,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), 403);
    }

    #[test]
    fn bad_grant_specs() {
        assert!(matches!(
            StaticAuthorizer::parse("nobody"),
            Err(GrantParseError::Malformed(_))
        ));
        assert!(matches!(
            StaticAuthorizer::parse("bob=drop_tables"),
            Err(GrantParseError::UnknownPermission { .. })
        ));
    }

    #[test]
    fn headers_resolve_caller_and_tenant() {
        let mut headers = HeaderMap::new();
        assert!(caller_from_headers(&headers, "default_tenant").is_err());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("42"));
        let c = caller_from_headers(&headers, "default_tenant").unwrap();
        assert_eq!(c.tenant_id, "default_tenant");
        assert_eq!(c.actor(), "42");

        headers.insert(USER_EMAIL_HEADER, HeaderValue::from_static("t@example.org"));
        headers.insert(TENANT_HEADER, HeaderValue::from_static("school_a"));
        let c = caller_from_headers(&headers, "default_tenant").unwrap();
        assert_eq!(c.tenant_id, "school_a");
        assert_eq!(c.actor(), "t@example.org");
    }
}
