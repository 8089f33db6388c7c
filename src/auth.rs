//! Request identity.
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the caller as `x-user-id` and `x-user-role` headers.

use std::fmt;
use std::str::FromStr;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Customer,
}

impl FromStr for Role {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "customer" => Ok(Role::Customer),
            other => Err(ServiceError::Unauthorized(format!("unknown role '{}'", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::Customer => f.write_str("customer"),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins see everything; buyers only what they own.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    fn from_parts(parts: &Parts) -> Result<Self, ServiceError> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing caller identity".to_string()))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| ServiceError::Unauthorized("invalid caller identity".to_string()))?;

        // no role header means an ordinary buyer
        let role = match parts.headers.get(USER_ROLE_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| ServiceError::Unauthorized("invalid role".to_string()))?
                .parse()?,
            None => Role::Customer,
        };

        Ok(Self { user_id, role })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Identity::from_parts(parts)
    }
}

/// An [`Identity`] that must carry the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminIdentity(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_parts(parts)?;
        if !identity.is_admin() {
            return Err(ServiceError::Forbidden("admin role required".to_string()));
        }
        Ok(AdminIdentity(identity))
    }
}
