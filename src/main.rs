use std::sync::Arc;

use clap::Parser;

use arena::catalog::Catalog;
use arena::config::{CliArgs, Config};
use arena::instances::InstanceManager;
use arena::provisioner::create_provisioner;
use arena::state::{self, StatePaths};
use arena::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        catalog_path,
        data_dir,
        limits,
    } = cli.to_config().expect("Failed to load configuration");

    let data_dir = data_dir.unwrap_or_else(StatePaths::default_data_dir);
    let paths = StatePaths::new(&data_dir);

    if cli.flush_data {
        state::remove_state(&paths);
    }

    let catalog = Catalog::load(&catalog_path).expect("Failed to load challenge catalog");
    if catalog.is_empty() {
        log::warn!("challenge catalog {} is empty", catalog_path.display());
    } else {
        log::info!(
            "loaded {} challenges from {}",
            catalog.len(),
            catalog_path.display()
        );
    }

    let provisioner = create_provisioner().expect("No usable sandbox engine");
    let manager = InstanceManager::new(paths, limits, Arc::new(catalog), Arc::from(provisioner));

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(server_config, manager).expect("Failed to build server");
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
