use actix_web::{HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use super::{
    ErrorResponseWithMessage, forbidden_response, internal_error_response,
};
use crate::identity::Caller;
use crate::instances::InstanceManager;
use crate::state::SettingsError;

#[derive(Serialize, Deserialize, Debug)]
pub struct Settings {
    pub user_instance_limit: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SettingsResponse {
    pub status: String,
    pub settings: Settings,
}

#[get("/api/admin/settings")]
pub async fn get_settings_handler(
    manager: web::Data<InstanceManager>,
    caller: Caller,
) -> impl Responder {
    if !caller.is_admin() {
        return forbidden_response();
    }

    let manager = manager.into_inner();
    match web::block(move || manager.user_instance_limit()).await {
        Ok(Ok(limit)) => HttpResponse::Ok().json(SettingsResponse {
            status: "ok".to_string(),
            settings: Settings {
                user_instance_limit: limit,
            },
        }),
        Ok(Err(e)) => {
            log::error!("failed to read settings: {e}");
            internal_error_response()
        }
        Err(e) => {
            log::error!("settings worker failed: {e}");
            internal_error_response()
        }
    }
}

#[post("/api/admin/settings")]
pub async fn update_settings_handler(
    manager: web::Data<InstanceManager>,
    caller: Caller,
    body: web::Json<Settings>,
) -> impl Responder {
    if !caller.is_admin() {
        return forbidden_response();
    }

    let manager = manager.into_inner();
    let limit = body.into_inner().user_instance_limit;

    match web::block(move || manager.set_user_instance_limit(limit)).await {
        Ok(Ok(limit)) => HttpResponse::Ok().json(SettingsResponse {
            status: "ok".to_string(),
            settings: Settings {
                user_instance_limit: limit,
            },
        }),
        Ok(Err(e @ SettingsError::AboveMaximum { .. })) => {
            HttpResponse::BadRequest().json(ErrorResponseWithMessage {
                reason: "ERR_INVALID_ARGUMENT",
                code: 1,
                message: e.to_string(),
            })
        }
        Ok(Err(SettingsError::Storage(e))) => {
            log::error!("failed to persist settings: {e}");
            internal_error_response()
        }
        Err(e) => {
            log::error!("settings worker failed: {e}");
            internal_error_response()
        }
    }
}
