//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes, and the role guards
//! handlers use to dispatch on the resolved identity.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use school_sync_core::domain::{Identity, Role};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::Rejection;
use crate::web::state::AppState;

/// Middleware that validates the auth session cookie and resolves the caller's identity.
///
/// If valid, inserts the `Principal` and the `Identity` into request extensions.
/// A missing or expired session is a 401; an account without a profile is a 403.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Parse session ID from cookie
    let auth_session_id = session_cookie(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Validate auth session in the directory
    let principal = state
        .directory
        .validate_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            warn!("Failed to validate auth session: {:?}", e);
            StatusCode::UNAUTHORIZED
        })?;

    // 3. Resolve the profile once for the whole request
    let identity = state
        .identity
        .resolve(&principal)
        .await
        .map_err(|e| {
            error!("Failed to resolve identity of {}: {:?}", principal.user_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::FORBIDDEN)?;

    // 4. Insert into request extensions
    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(identity);

    // 5. Continue to the handler
    Ok(next.run(req).await)
}

/// Extracts the `session` cookie value, if present.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|id| !id.is_empty())
}

//=========================================================================================
// Role Guards
//=========================================================================================

fn forbidden(expected: &str, identity: &Identity) -> Rejection {
    warn!(
        "User {} with role {} called a {} endpoint",
        identity.user_id, identity.role, expected
    );
    (
        StatusCode::FORBIDDEN,
        format!("Only {} accounts can do this", expected),
    )
}

/// Returns the school's partition id.
pub fn require_school(identity: &Identity) -> Result<Uuid, Rejection> {
    match identity.role {
        Role::School => Ok(identity.user_id),
        _ => Err(forbidden("school", identity)),
    }
}

/// Returns the caller's teacher id.
pub fn require_teacher(identity: &Identity) -> Result<Uuid, Rejection> {
    match identity.role {
        Role::Teacher { teacher_id } => Ok(teacher_id),
        _ => Err(forbidden("teacher", identity)),
    }
}

/// Returns the `(student_id, class_id)` the parent account is linked to.
pub fn require_parent(identity: &Identity) -> Result<(Uuid, Uuid), Rejection> {
    match identity.role {
        Role::Parent {
            student_id,
            class_id,
        } => Ok((student_id, class_id)),
        _ => Err(forbidden("parent", identity)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc-123; lang=fr"),
        );
        assert_eq!(session_cookie(&headers), Some("abc-123"));
    }

    #[test]
    fn test_missing_or_cleared_session_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_cookie(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_cookie(&headers), None);
    }

    #[test]
    fn test_role_guards() {
        let teacher_id = Uuid::new_v4();
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: "prof@school.ma".to_string(),
            role: Role::Teacher { teacher_id },
        };
        assert_eq!(require_teacher(&identity).unwrap(), teacher_id);
        assert_eq!(require_school(&identity).unwrap_err().0, StatusCode::FORBIDDEN);
        assert_eq!(require_parent(&identity).unwrap_err().0, StatusCode::FORBIDDEN);
    }
}
