//! SPA route access check

use axum::{extract::Query, Extension, Json};
use serde::Deserialize;

use crate::middleware::CurrentUser;
use crate::permission::guard::{resolve_route, AccessResponse};

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    #[serde(default = "root_path")]
    pub path: String,
}

fn root_path() -> String {
    "/".to_string()
}

/// GET /api/access?path=
///
/// Public: anonymous callers get the login redirect instead of a 401.
pub async fn check_access(
    current_user: Option<Extension<CurrentUser>>,
    Query(query): Query<AccessQuery>,
) -> Json<AccessResponse> {
    let user = current_user
        .as_ref()
        .map(|Extension(u)| (u.role.as_str(), &u.permissions));
    Json(resolve_route(user, &query.path).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{guard::LOGIN_PATH, perm, Permissions};

    fn user(role: &str, permissions: Permissions) -> CurrentUser {
        CurrentUser {
            id: 2,
            username: "ana".into(),
            full_name: "Ana".into(),
            role: role.into(),
            permissions,
            ip: None,
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn test_anonymous_is_sent_to_login() {
        let Json(resp) = check_access(None, Query(AccessQuery { path: "/finance".into() })).await;
        assert!(!resp.allowed);
        assert_eq!(resp.redirect, Some(LOGIN_PATH));
    }

    #[tokio::test]
    async fn test_flag_holder_is_allowed() {
        let u = user("user", Permissions::none().with(perm::FINANCE, true));
        let Json(resp) = check_access(
            Some(Extension(u)),
            Query(AccessQuery { path: "/finance/accounts".into() }),
        )
        .await;
        assert!(resp.allowed);
        assert_eq!(resp.redirect, None);
    }
}
