//! Bearer token authentication with role-based access control.
//!
//! Access tokens are validated statelessly by [`SessionValidator`]. The
//! [`authenticate`] middleware wraps the API router and attaches a
//! [`Principal`] to requests that carry a valid token; handlers then use the
//! [`Auth`] extractor to require a caller and, optionally, a role.

mod errors;
mod extractors;
mod middleware;
mod validator;

pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, AnyRole, Auth, RoleConstraint};
pub use middleware::authenticate;
pub use validator::{AuthError, BEARER_PREFIX, Principal, SessionValidator, bearer_token};
