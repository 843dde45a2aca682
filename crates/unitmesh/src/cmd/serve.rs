use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use unitmesh_node::{KvStore, RegistryConfig, SystemService, SYSTEM_UNIT};

use crate::bridge::{Bridge, BridgeContext};
use crate::cmd::ServeArgs;
use crate::config;
use crate::exit::{node_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let store = Arc::new(KvStore::new());
    let config = config::load(Some(args.config.as_path()), &store)?;

    let registry = Arc::new(
        SystemService::start(
            Arc::clone(&store),
            RegistryConfig {
                service_name: SYSTEM_UNIT.to_string(),
                unit_format: config.unit_format.clone(),
                first_work_id: config.first_work_id,
                port_min: config.port_min,
                port_max: config.port_max,
            },
        )
        .map_err(|err| node_error("registry startup failed", err))?,
    );

    let mut bridge = if args.no_bridge || config.tcp_port == 0 {
        info!("bridge disabled");
        None
    } else {
        let context = Arc::new(BridgeContext::new(
            Arc::clone(&registry),
            config.com_format.clone(),
            None,
        ));
        Some(Bridge::start(config.tcp_port, context)?)
    };

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handler(Arc::clone(&running))?;
    info!("unitmesh serving; press ctrl-c to stop");
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    if let Some(bridge) = bridge.as_mut() {
        bridge.stop();
    }
    drop(registry);
    Ok(SUCCESS)
}

fn install_signal_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
