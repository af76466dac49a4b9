//! Gateway-injected identity headers extractor.

use axum::extract::FromRequestParts;
use http::StatusCode;
use http::request::Parts;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-veganbase-user-id";
pub const USER_ROLE_HEADER: &str = "x-veganbase-user-role";

/// Role at or above which a caller may act on behalf of other owners.
pub const ADMIN_ROLE: u8 = 2;

/// Caller identity injected by the gateway via `x-veganbase-user-id` and
/// `x-veganbase-user-role` headers.
///
/// Returns 401 if either header is absent or malformed.
/// Ownership checks (403) are done by handlers after extraction.
#[derive(Debug, Clone)]
pub struct IdentityHeaders {
    pub user_id: Uuid,
    pub user_role: u8,
}

impl IdentityHeaders {
    /// Owner tag used to scope subscriptions and to address events.
    pub fn owner(&self) -> String {
        self.user_id.to_string()
    }

    pub fn is_admin(&self) -> bool {
        self.user_role >= ADMIN_ROLE
    }
}

impl<S> FromRequestParts<S> for IdentityHeaders
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    // Values are read synchronously so the returned future borrows nothing from `parts`.
    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Uuid>().ok());

        let user_role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u8>().ok());

        async move {
            let user_id = user_id.ok_or(StatusCode::UNAUTHORIZED)?;
            let user_role = user_role.ok_or(StatusCode::UNAUTHORIZED)?;
            Ok(Self { user_id, user_role })
        }
    }
}
