use quickserve::{init_logging, MetricsCollector, ServeMode, Server, ServerConfig, ServerResult};
use std::env;
use std::path::Path;
use std::sync::Arc;

fn main() -> ServerResult<()> {
    init_logging();

    // Load configuration from the file named on the command line, if any
    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) if Path::new(path).exists() => ServerConfig::from_json_file(path)?,
        Some(path) => {
            log::warn!("Config file {} not found, using defaults", path);
            ServerConfig::new()
        }
        None => ServerConfig::new(),
    };

    let mode = config.mode;
    let parent_directories = config.parent_directories;
    let anchor = config.anchor.clone();

    let server = Server::with_config(config)?;
    install_shutdown_handler(server.metrics());

    match mode {
        ServeMode::Static => {
            let callback = server.static_server(None, parent_directories, &anchor);
            server.serve(callback)
        }
        ServeMode::Proxy => server.proxy(),
    }
}

/// Print collected metrics and exit on Ctrl-C
fn install_shutdown_handler(metrics: Arc<MetricsCollector>) {
    let result = ctrlc::set_handler(move || {
        println!("Received shutdown signal. Stopping server...");
        println!("\n===== Server Metrics =====");
        println!("{}", metrics.format());
        println!("==========================");
        std::process::exit(0);
    });

    if let Err(e) = result {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }
}
