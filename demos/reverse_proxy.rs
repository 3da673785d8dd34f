use quickserve::{init_logging, Server, ServerConfig, ServerResult};
use std::env;

/// Forward proxy: point a client at this address and request absolute URLs,
/// e.g. `curl -x http://127.0.0.1:8081 http://example.com/`
fn main() -> ServerResult<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let port = args.get(1).and_then(|port| port.parse().ok()).unwrap_or(8081);
    let workers = args.get(2).and_then(|workers| workers.parse().ok()).unwrap_or(4);

    let config = ServerConfig::new()
        .with_address("127.0.0.1", port)
        .with_worker_threads(workers);
    let server = Server::with_config(config)?;

    println!("Proxying at {} with {} workers", server.serving_url(), workers);
    server.proxy()
}
