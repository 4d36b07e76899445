//! Module permission flags
//!
//! Access is a flat lookup: the `admin` role passes every check, every other
//! user needs the module flag set to `true` in their permission map.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};

/// Permission constants
pub mod perm {
    pub const DASHBOARD: &str = "dashboard";
    pub const ADMIN: &str = "admin";
    pub const FINANCE: &str = "finance";
    pub const PRODUCTION: &str = "production";
    pub const MAINTENANCE: &str = "maintenance";
    pub const INVENTORY: &str = "inventory";
    pub const QUALITY: &str = "quality";
    pub const COMMERCIAL: &str = "commercial";
    pub const PURCHASE: &str = "purchase";
    pub const HR: &str = "hr";
    pub const CHAT: &str = "chat";
    pub const SUPPORT: &str = "support";
    pub const FISCAL: &str = "fiscal";

    /// All module flags
    pub const ALL: [&str; 13] = [
        DASHBOARD, ADMIN, FINANCE, PRODUCTION, MAINTENANCE, INVENTORY, QUALITY, COMMERCIAL,
        PURCHASE, HR, CHAT, SUPPORT, FISCAL,
    ];

    /// Flags every authenticated user holds implicitly
    pub const IMPLICIT: [&str; 3] = ["profile", "sidebar", "navigation"];
}

/// Role with unrestricted access
pub const ADMIN_ROLE: &str = "admin";
/// Role assigned on self-registration
pub const DEFAULT_ROLE: &str = "user";

/// Per-module permission map, stored as JSON on the user row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(BTreeMap<String, bool>);

impl Permissions {
    /// Map with every known module flag set to false
    pub fn none() -> Self {
        Self(perm::ALL.iter().map(|p| (p.to_string(), false)).collect())
    }

    /// Map with every known module flag set to true
    pub fn all() -> Self {
        Self(perm::ALL.iter().map(|p| (p.to_string(), true)).collect())
    }

    pub fn with(mut self, flag: &str, value: bool) -> Self {
        self.0.insert(flag.to_string(), value);
        self
    }

    pub fn get(&self, flag: &str) -> bool {
        self.0.get(flag).copied().unwrap_or(false)
    }

    /// Flags currently granted
    pub fn granted(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, v)| **v)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Parse from the JSON column; anything that isn't a flag map yields no grants
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.as_bool().unwrap_or(false)))
                    .collect(),
            ),
            _ => Self::default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }
}

/// Lookup used by every gated operation
pub fn has_permission(role: &str, permissions: &Permissions, flag: &str) -> bool {
    if role == ADMIN_ROLE {
        return true;
    }
    if perm::IMPLICIT.contains(&flag) {
        return true;
    }
    permissions.get(flag)
}

/// Error returned when a flag is missing
pub fn denied(flag: &str) -> AppError {
    AppError::Forbidden(format!("Acesso negado. Permissão '{}' necessária.", flag))
}

/// Fail with 403 unless the flag check passes
pub fn ensure(role: &str, permissions: &Permissions, flag: &str) -> AppResult<()> {
    if has_permission(role, permissions, flag) {
        Ok(())
    } else {
        Err(denied(flag))
    }
}

/// Route guard for SPA paths
pub mod guard {
    use super::{has_permission, perm, Permissions, ADMIN_ROLE};
    use serde::Serialize;

    pub const LOGIN_PATH: &str = "/auth";
    pub const WAITING_PATH: &str = "/waiting-permissions";

    /// Paths any authenticated user may open
    const OPEN_PATHS: [&str; 5] = [
        "/user-profile",
        "/user-settings",
        "/support",
        "/waiting-permissions",
        "/chat",
    ];

    /// Path prefix -> required flag. First match wins.
    const ROUTE_TABLE: [(&str, &str); 20] = [
        ("/dashboard/production", perm::PRODUCTION),
        ("/dashboard/maintenance", perm::MAINTENANCE),
        ("/dashboard/inventory", perm::INVENTORY),
        ("/dashboard/finance", perm::FINANCE),
        ("/dashboard/commercial", perm::COMMERCIAL),
        ("/dashboard/purchase", perm::PURCHASE),
        ("/dashboard/quality", perm::QUALITY),
        ("/dashboard/hr", perm::HR),
        ("/dashboard/support", perm::SUPPORT),
        ("/dashboard/admin", perm::ADMIN),
        ("/support/", perm::SUPPORT),
        ("/production", perm::PRODUCTION),
        ("/maintenance", perm::MAINTENANCE),
        ("/finance", perm::FINANCE),
        ("/inventory", perm::INVENTORY),
        ("/commercial", perm::COMMERCIAL),
        ("/purchase", perm::PURCHASE),
        ("/quality", perm::QUALITY),
        ("/hr", perm::HR),
        ("/fiscal", perm::FISCAL),
    ];

    /// Outcome of a route check
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RouteAccess {
        Allow,
        Redirect(&'static str),
    }

    #[derive(Debug, Serialize)]
    pub struct AccessResponse {
        pub allowed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub redirect: Option<&'static str>,
    }

    impl From<RouteAccess> for AccessResponse {
        fn from(access: RouteAccess) -> Self {
            match access {
                RouteAccess::Allow => Self {
                    allowed: true,
                    redirect: None,
                },
                RouteAccess::Redirect(to) => Self {
                    allowed: false,
                    redirect: Some(to),
                },
            }
        }
    }

    fn matches(path: &str, prefix: &str) -> bool {
        if prefix.ends_with('/') {
            return path.starts_with(prefix);
        }
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Flag required to open `path`, if any
    pub fn required_flag(path: &str) -> Option<&'static str> {
        if path == "/" || path == "/dashboard" {
            return Some(perm::DASHBOARD);
        }
        if OPEN_PATHS.contains(&path) {
            return None;
        }
        ROUTE_TABLE
            .iter()
            .find(|(prefix, _)| matches(path, prefix))
            .map(|(_, flag)| *flag)
    }

    /// Decide whether a user (None = anonymous) may open an SPA path
    pub fn resolve_route(user: Option<(&str, &Permissions)>, path: &str) -> RouteAccess {
        let Some((role, permissions)) = user else {
            return RouteAccess::Redirect(LOGIN_PATH);
        };
        if role == ADMIN_ROLE {
            return RouteAccess::Allow;
        }
        match required_flag(path) {
            Some(flag) if !has_permission(role, permissions, flag) => {
                RouteAccess::Redirect(WAITING_PATH)
            }
            _ => RouteAccess::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::guard::{required_flag, resolve_route, RouteAccess};
    use super::*;

    #[test]
    fn test_admin_short_circuit() {
        let perms = Permissions::none();
        for flag in perm::ALL {
            assert!(has_permission(ADMIN_ROLE, &perms, flag));
        }
    }

    #[test]
    fn test_flag_lookup() {
        let perms = Permissions::none().with(perm::FINANCE, true);
        assert!(has_permission("user", &perms, perm::FINANCE));
        assert!(!has_permission("user", &perms, perm::HR));
        assert!(has_permission("user", &perms, "profile"));
        assert!(!has_permission("user", &Permissions::default(), "unknown"));
    }

    #[test]
    fn test_from_json_ignores_non_bool() {
        let value = serde_json::json!({"finance": true, "hr": "yes", "chat": false});
        let perms = Permissions::from_json(&value);
        assert!(perms.get("finance"));
        assert!(!perms.get("hr"));
        assert_eq!(perms.granted(), vec!["finance"]);
        assert_eq!(Permissions::from_json(&serde_json::Value::Null), Permissions::default());
    }

    #[test]
    fn test_ensure_message() {
        let err = ensure("user", &Permissions::none(), perm::HR).unwrap_err();
        assert_eq!(err.to_string(), "Acesso negado. Permissão 'hr' necessária.");
    }

    #[test]
    fn test_finance_only_user_routes() {
        let perms = Permissions::none().with(perm::FINANCE, true);
        let user = Some(("user", &perms));
        assert_eq!(resolve_route(user, "/dashboard/finance"), RouteAccess::Allow);
        assert_eq!(
            resolve_route(user, "/dashboard/hr"),
            RouteAccess::Redirect(guard::WAITING_PATH)
        );
        assert_eq!(resolve_route(user, "/finance/accounts"), RouteAccess::Allow);
        assert_eq!(resolve_route(user, "/user-profile"), RouteAccess::Allow);
    }

    #[test]
    fn test_anonymous_redirects_to_login() {
        assert_eq!(
            resolve_route(None, "/dashboard/finance"),
            RouteAccess::Redirect(guard::LOGIN_PATH)
        );
    }

    #[test]
    fn test_required_flags() {
        assert_eq!(required_flag("/"), Some(perm::DASHBOARD));
        assert_eq!(required_flag("/support"), None);
        assert_eq!(required_flag("/support/tickets"), Some(perm::SUPPORT));
        assert_eq!(required_flag("/production/product/7"), Some(perm::PRODUCTION));
        assert_eq!(required_flag("/hr"), Some(perm::HR));
        assert_eq!(required_flag("/hrx"), None);
        assert_eq!(required_flag("/commercial/fiscal-config"), Some(perm::COMMERCIAL));
        assert_eq!(required_flag("/fiscal/nfe/nova"), Some(perm::FISCAL));
    }
}
