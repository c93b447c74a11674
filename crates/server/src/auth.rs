// crates/server/src/auth.rs
//! Caller identity and job ownership.
//!
//! Authentication happens upstream. The gateway forwards the authenticated
//! user in `x-user-id` and, for operators, `x-user-role: admin`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jobstream_core::{JobRecord, UserId};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let role = match parts.headers.get(USER_ROLE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
            _ => Role::User,
        };

        Ok(Caller {
            user_id: user_id.to_string(),
            role,
        })
    }
}

/// Decides whether a caller may read, cancel or reattach to a job.
pub trait AccessPolicy: Send + Sync {
    fn caller_owns(&self, caller: &Caller, job: &JobRecord) -> bool;
}

/// The job's creator, or any administrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOrAdmin;

impl AccessPolicy for OwnerOrAdmin {
    fn caller_owns(&self, caller: &Caller, job: &JobRecord) -> bool {
        caller.is_admin() || caller.user_id == job.user_id
    }
}
