use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

use skyhaul_fleet::{authorize, Capability, Principal, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Principal asserted by the upstream auth layer, if any
pub struct Caller(pub Option<Principal>);

impl Caller {
    pub fn require(&self, capability: Capability) -> Result<Principal, ApiError> {
        Ok(*authorize(self.0.as_ref(), capability)?)
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Malformed identity headers count as no identity at all
        let user_id = header(parts, USER_ID_HEADER).and_then(|v| v.trim().parse::<i64>().ok());
        let role = header(parts, USER_ROLE_HEADER).and_then(|v| v.trim().parse::<Role>().ok());

        Ok(Caller(match (user_id, role) {
            (Some(user_id), Some(role)) => Some(Principal::new(user_id, role)),
            _ => None,
        }))
    }
}
