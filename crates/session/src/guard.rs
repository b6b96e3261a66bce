//! Navigation guard.
//!
//! Decides where the UI should go given the session state and the route the
//! user is on. Signed-out users are sent to the sign-in page; signed-in users
//! visiting a sign-in or sign-up page are sent to the dashboard.

use crate::state::SessionState;

/// UI routes reachable without a session.
pub const PUBLIC_UI_ROUTES: &[&str] = &["/signin", "/sign-up", "/verify-otp"];

/// Where unauthenticated users are sent.
pub const SIGN_IN_ROUTE: &str = "/signin";

/// Where authenticated users landing on a public route are sent.
pub const DEFAULT_AUTH_REDIRECT: &str = "/dashboard";

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    /// Session state is not resolved yet; show a loading indicator.
    Wait,
    /// Render the requested route.
    Proceed,
    /// Replace the current route with the given one.
    Redirect(&'static str),
}

/// Returns `true` if `path` is one of the [`PUBLIC_UI_ROUTES`] or below one.
#[must_use]
pub fn is_public_ui_route(path: &str) -> bool {
    PUBLIC_UI_ROUTES.iter().any(|route| path.starts_with(route))
}

/// Decides what the UI should do for `path` under `state`.
#[must_use]
pub fn decide(state: &SessionState, path: &str) -> Navigation {
    let public = is_public_ui_route(path);
    match state {
        SessionState::Unknown => Navigation::Wait,
        SessionState::Authenticated { .. } if public => Navigation::Redirect(DEFAULT_AUTH_REDIRECT),
        SessionState::Unauthenticated if !public => Navigation::Redirect(SIGN_IN_ROUTE),
        _ => Navigation::Proceed,
    }
}
