//! Route authorization.
//!
//! [`RouteAuthorizer::authorize`] is a pure function of the requested path,
//! the published session snapshot and the view's access rule. Expiry is not
//! looked at here; the session manager drops stale sessions before they are
//! ever published as authenticated.

use serde::{Deserialize, Serialize};

use crate::auth::claims::Role;
use crate::auth::session::SessionView;

/// Access requirement a view declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    Public,
    RequiresAuth,
    RequiresRole(Role),
}

/// Outcome of an authorization check. Redirects are silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(String),
}

/// Well-known paths of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePaths {
    pub login: String,
    pub register: String,
    /// Default landing page.
    pub home: String,
    /// Landing page for admins.
    pub admin: String,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            register: "/register".to_string(),
            home: "/".to_string(),
            admin: "/admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteAuthorizer {
    paths: RoutePaths,
}

impl RouteAuthorizer {
    pub fn new(paths: RoutePaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &RoutePaths {
        &self.paths
    }

    /// Where a role lands after logging in.
    pub fn role_home(&self, role: &Role) -> &str {
        if role.is_admin() {
            &self.paths.admin
        } else {
            &self.paths.home
        }
    }

    /// Login and registration are only for visitors who are not logged in.
    pub fn is_guest_only(&self, path: &str) -> bool {
        let path = normalize(path);
        path == normalize(&self.paths.login) || path == normalize(&self.paths.register)
    }

    pub fn authorize(&self, requested_path: &str, session: &SessionView, rule: &AccessRule) -> Decision {
        let role = session.is_authenticated.then_some(session.role.as_ref()).flatten();

        match (rule, role) {
            (AccessRule::RequiresAuth | AccessRule::RequiresRole(_), None) => {
                Decision::RedirectTo(self.paths.login.clone())
            }
            (AccessRule::RequiresRole(required), Some(role)) if role != required => {
                Decision::RedirectTo(self.paths.home.clone())
            }
            (_, Some(role)) if self.is_guest_only(requested_path) => {
                Decision::RedirectTo(self.role_home(role).to_string())
            }
            _ => Decision::Allow,
        }
    }
}

/// A view and its access rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub rule: AccessRule,
}

/// The dashboard's route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    authorizer: RouteAuthorizer,
    routes: Vec<Route>,
}

impl RouteTable {
    /// Dashboard, login, registration and admin views.
    pub fn dashboard(paths: RoutePaths) -> Self {
        let routes = vec![
            Route {
                path: paths.home.clone(),
                rule: AccessRule::RequiresAuth,
            },
            Route {
                path: paths.login.clone(),
                rule: AccessRule::Public,
            },
            Route {
                path: paths.register.clone(),
                rule: AccessRule::Public,
            },
            Route {
                path: paths.admin.clone(),
                rule: AccessRule::RequiresRole(Role::Admin),
            },
        ];
        Self {
            authorizer: RouteAuthorizer::new(paths),
            routes,
        }
    }

    pub fn authorizer(&self) -> &RouteAuthorizer {
        &self.authorizer
    }

    pub fn find(&self, path: &str) -> Option<&Route> {
        let path = normalize(path);
        self.routes.iter().find(|r| normalize(&r.path) == path)
    }

    /// Decides what to render for `path`. Unknown paths go to the default
    /// landing page, which applies its own rule on the next resolve.
    pub fn resolve(&self, path: &str, session: &SessionView) -> Decision {
        match self.find(path) {
            Some(route) => self.authorizer.authorize(path, session, &route.rule),
            None => Decision::RedirectTo(self.authorizer.paths().home.clone()),
        }
    }
}

/// Strips query, fragment and trailing slashes (except for the root).
fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}
