use std::future::{Ready, ready};

use actix_web::dev::Payload;
use actix_web::error::InternalError;
use actix_web::{FromRequest, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::routes::ErrorResponse;

/// Header carrying the authenticated username, set by the auth layer in
/// front of this service.
pub const USER_HEADER: &str = "x-auth-user";
/// Header carrying the caller's role; anything other than `admin` is a
/// regular user.
pub const ROLE_HEADER: &str = "x-auth-role";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated caller of a request.
///
/// Authentication itself happens upstream; this service only consumes the
/// resulting identity and role.
#[derive(Debug, Clone)]
pub struct Caller {
    pub username: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl FromRequest for Caller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(caller_from_request(req))
    }
}

fn caller_from_request(req: &HttpRequest) -> Result<Caller, actix_web::Error> {
    let username = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let Some(username) = username else {
        let response = HttpResponse::Unauthorized().json(ErrorResponse {
            reason: "ERR_UNAUTHENTICATED",
            code: 2,
        });
        return Err(InternalError::from_response("missing caller identity", response).into());
    };

    let role = match req.headers().get(ROLE_HEADER).and_then(|v| v.to_str().ok()) {
        Some(role) if role.eq_ignore_ascii_case("admin") => Role::Admin,
        _ => Role::User,
    };

    Ok(Caller {
        username: username.to_string(),
        role,
    })
}
