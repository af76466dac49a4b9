//! Mock identity for handler tests.
//!
//! Services behind the gateway receive `x-veganbase-user-id` + `x-veganbase-user-role`
//! headers. `MockAuth` produces them directly so no gateway is needed.

use axum::http::request::Builder;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

/// Configurable identity injected into test requests.
pub struct MockAuth {
    pub user_id: Uuid,
    pub user_role: u8,
}

impl MockAuth {
    pub fn new(user_id: Uuid, user_role: u8) -> Self {
        Self { user_id, user_role }
    }

    /// A regular (non-admin) user with a random id.
    pub fn user() -> Self {
        Self::new(Uuid::new_v4(), 0)
    }

    /// An admin user with a random id.
    pub fn admin() -> Self {
        Self::new(Uuid::new_v4(), 2)
    }

    /// Owner tag matching `IdentityHeaders::owner`.
    pub fn owner(&self) -> String {
        self.user_id.to_string()
    }

    /// Return headers as if the gateway injected them.
    pub fn headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_static("x-veganbase-user-id"),
            HeaderValue::from_str(&self.user_id.to_string()).unwrap(),
        );
        map.insert(
            HeaderName::from_static("x-veganbase-user-role"),
            HeaderValue::from(u16::from(self.user_role)),
        );
        map
    }

    /// Apply the identity headers to a request builder.
    pub fn apply(&self, mut builder: Builder) -> Builder {
        for (name, value) in self.headers().iter() {
            builder = builder.header(name, value);
        }
        builder
    }
}
