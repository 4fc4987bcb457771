//! Navigation awareness.
//!
//! Connecting is deferred while the user is on an authentication-only page
//! (login, registration, password reset) even if a stale credential exists.

/// Reports the application's current navigation path.
pub trait RouteAwareness: Send + Sync {
    /// Current path, or `None` if the application has no notion of routes.
    fn current_path(&self) -> Option<String>;
}

impl<F> RouteAwareness for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_path(&self) -> Option<String> {
        self()
    }
}

/// Route awareness for applications without navigation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoute;

impl RouteAwareness for NoRoute {
    fn current_path(&self) -> Option<String> {
        None
    }
}

/// Path prefixes that count as authentication-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRoutes {
    prefixes: Vec<String>,
}

impl AuthRoutes {
    /// Routes matching any of `prefixes`.
    pub fn new<S: Into<String>>(prefixes: impl IntoIterator<Item = S>) -> Self {
        Self { prefixes: prefixes.into_iter().map(Into::into).collect() }
    }

    /// Configured prefixes.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Whether `path` is an authentication-only page.
    ///
    /// A prefix matches the path itself and anything below it, but not a
    /// sibling that merely shares the prefix (`/login` vs `/loginhelp`).
    pub fn is_auth_only(&self, path: &str) -> bool {
        self.prefixes.iter().any(|prefix| match path.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
            None => false,
        })
    }

    /// Whether the current route reported by `routes` is authentication-only.
    pub fn is_current_auth_only(&self, routes: &dyn RouteAwareness) -> bool {
        routes.current_path().is_some_and(|path| self.is_auth_only(&path))
    }
}

impl Default for AuthRoutes {
    fn default() -> Self {
        Self::new(["/login", "/register", "/forgot-password", "/reset-password", "/verify-email"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_auth_routes() {
        let routes = AuthRoutes::default();
        assert!(routes.is_auth_only("/login"));
        assert!(routes.is_auth_only("/login?next=/inbox"));
        assert!(routes.is_auth_only("/reset-password/abc123"));
        assert!(!routes.is_auth_only("/loginhelp"));
        assert!(!routes.is_auth_only("/inbox"));
        assert!(!routes.is_auth_only("/"));
    }

    #[test]
    fn current_route_lookup() {
        let routes = AuthRoutes::default();
        assert!(routes.is_current_auth_only(&|| Some("/register".to_string())));
        assert!(!routes.is_current_auth_only(&|| Some("/messages/c1".to_string())));
        assert!(!routes.is_current_auth_only(&NoRoute));
    }

    #[test]
    fn custom_prefixes() {
        let routes = AuthRoutes::new(["/signin"]);
        assert!(routes.is_auth_only("/signin"));
        assert!(!routes.is_auth_only("/login"));
        assert_eq!(routes.prefixes(), ["/signin".to_string()]);
    }
}
