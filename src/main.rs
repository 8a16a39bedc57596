use std::sync::Arc;

use pingora::services::background::background_service;
use pingora_core::server::{configuration::Opt, Server};

use reqdesk::{
    api::RequestsHttpApp,
    config::{Config, StorageType},
    core::status::StoreKind,
    logging::FileLogger,
    request::LifecycleManager,
    service::{probe::StoreProbe, status::StatusHttpApp},
    storage::{EtcdStore, MemoryStore, RequestStore},
};

fn main() {
    // Read command-line arguments
    let opt = Opt::parse_args();

    let config = match Config::load_yaml_with_opt_override(&opt) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };
    let Config {
        pingora: server_conf,
        reqdesk,
    } = config;

    // Initialize logging
    let file_logger = match &reqdesk.log {
        Some(log_cfg) => {
            let logger = FileLogger::new(log_cfg.clone());
            logger.init_env_logger();
            Some(logger)
        }
        None => {
            env_logger::init();
            None
        }
    };

    // Build the request store
    let storage = (reqdesk.storage.r#type, &reqdesk.etcd);
    let (store, kind): (Arc<dyn RequestStore>, StoreKind) = match storage {
        (StorageType::Memory, _) => (Arc::new(MemoryStore::new()), StoreKind::Memory),
        (StorageType::Etcd, Some(etcd)) => {
            (Arc::new(EtcdStore::new(etcd.clone())), StoreKind::Etcd)
        }
        (StorageType::Etcd, None) => {
            eprintln!("Error loading configuration: etcd storage needs an etcd section");
            std::process::exit(1);
        }
    };
    log::info!("Using {} request store", kind.as_str());

    let manager = Arc::new(LifecycleManager::new(store.clone()));

    let mut server = Server::new_with_opt_and_conf(Some(opt), server_conf);

    log::info!("Bootstrapping...");
    server.bootstrap();

    if let Some(log_service) = file_logger {
        log::info!("Adding log sync service...");
        server.add_service(log_service);
    }

    server.add_service(background_service(
        "store probe",
        StoreProbe::new(store, kind),
    ));

    if let Some(status_cfg) = &reqdesk.status {
        log::info!("Adding status service on {}...", status_cfg.address);
        server.add_service(StatusHttpApp::status_http_service(status_cfg));
    }

    log::info!("Adding request API on {}...", reqdesk.listener);
    server.add_service(RequestsHttpApp::requests_http_service(&reqdesk, manager));

    log::info!("Starting Server...");
    server.run_forever();
}
