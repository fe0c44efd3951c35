//! Route command handler.

use hailwatch_core::routes::Decision;

use crate::cli::App;

/// Prints `allow <path>` or `redirect <target>`.
pub fn check(app: &App, path: &str) {
    if app.session.expire_if_stale() {
        tracing::info!("stored session expired before the route check");
    }

    match app.routes.resolve(path, &app.session.view()) {
        Decision::Allow => println!("allow {path}"),
        Decision::RedirectTo(target) => println!("redirect {target}"),
    }
}
