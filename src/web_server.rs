use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::instances::InstanceManager;
use crate::routes::{
    get_settings_handler, json_error_handler, list_instances_handler, start_instance_handler,
    stop_instance_handler, update_settings_handler,
};

pub fn build_server(config: ServerConfig, manager: InstanceManager) -> std::io::Result<Server> {
    let manager = web::Data::new(manager);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(manager.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(start_instance_handler)
            .service(stop_instance_handler)
            .service(list_instances_handler)
            .service(get_settings_handler)
            .service(update_settings_handler)
    })
    .bind((
        config.bind_address.unwrap_or("127.0.0.1".to_string()),
        config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
