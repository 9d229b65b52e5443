use actix_web::{HttpRequest, HttpResponse, Responder, get, post, web};
use serde::{Deserialize, Serialize};

use super::{internal_error_response, lifecycle_error_response, server_base_url};
use crate::identity::Caller;
use crate::instances::InstanceManager;
use crate::state::InstanceStatus;

#[derive(Serialize, Deserialize, Debug)]
pub struct StartRequest {
    pub problem: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StartResponse {
    pub status: String,
    pub instance_id: u64,
    pub problem: String,
    pub title: String,
    pub external_port: u16,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StopResponse {
    pub status: String,
    pub instance_id: u64,
    pub container: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct InstanceRow {
    pub instance_id: u64,
    pub problem: String,
    pub title: String,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ListResponse {
    pub status: String,
    pub instances: Vec<InstanceRow>,
}

#[post("/api/instances/start")]
pub async fn start_instance_handler(
    manager: web::Data<InstanceManager>,
    caller: Caller,
    body: web::Json<StartRequest>,
    req: HttpRequest,
) -> impl Responder {
    let base = server_base_url(&req);
    let manager = manager.into_inner();
    let problem = body.into_inner().problem;

    let result = web::block(move || manager.start(&caller, &problem)).await;
    match result {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(StartResponse {
            status: "ok".to_string(),
            url: format!("{base}:{}", outcome.external_port),
            instance_id: outcome.instance_id,
            problem: outcome.problem,
            title: outcome.title,
            external_port: outcome.external_port,
        }),
        Ok(Err(e)) => lifecycle_error_response(&e),
        Err(e) => {
            log::error!("start worker failed: {e}");
            internal_error_response()
        }
    }
}

#[post("/api/instances/stop/{instance_id}")]
pub async fn stop_instance_handler(
    manager: web::Data<InstanceManager>,
    caller: Caller,
    path: web::Path<u64>,
) -> impl Responder {
    let manager = manager.into_inner();
    let instance_id = path.into_inner();

    let result = web::block(move || manager.stop(&caller, instance_id)).await;
    match result {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(StopResponse {
            status: "ok".to_string(),
            instance_id: outcome.instance_id,
            container: outcome.container,
        }),
        Ok(Err(e)) => lifecycle_error_response(&e),
        Err(e) => {
            log::error!("stop worker failed: {e}");
            internal_error_response()
        }
    }
}

#[get("/api/instances")]
pub async fn list_instances_handler(
    manager: web::Data<InstanceManager>,
    caller: Caller,
    req: HttpRequest,
) -> impl Responder {
    let base = server_base_url(&req);
    let manager = manager.into_inner();

    let result = web::block(move || manager.list(&caller)).await;
    match result {
        Ok(Ok(views)) => {
            let instances = views
                .into_iter()
                .map(|view| InstanceRow {
                    url: view.port.map(|port| format!("{base}:{port}")),
                    instance_id: view.instance_id,
                    problem: view.problem,
                    title: view.title,
                    status: view.status,
                    owner: view.owner,
                })
                .collect();
            HttpResponse::Ok().json(ListResponse {
                status: "ok".to_string(),
                instances,
            })
        }
        Ok(Err(e)) => lifecycle_error_response(&e),
        Err(e) => {
            log::error!("list worker failed: {e}");
            internal_error_response()
        }
    }
}
