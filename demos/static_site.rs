use quickserve::{init_logging, Request, Response, Routes, Server, ServerConfig, ServerResult};
use std::env;

fn main() -> ServerResult<()> {
    init_logging();

    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let port = args.get(1).and_then(|port| port.parse().ok()).unwrap_or(8080);
    let root = args.get(2).map(String::as_str).unwrap_or(".");

    let config = ServerConfig::new()
        .with_address("127.0.0.1", port)
        .with_static_root(root)
        .with_cpu_workers();
    let server = Server::with_config(config)?;

    println!("Serving files from {} at {}", root, server.serving_url());

    // Routes take priority over files with the same name
    let routes = Routes::new()
        .route("/status", |_: &Request| {
            let info = serde_json::json!({
                "status": "running",
                "version": env!("CARGO_PKG_VERSION"),
            });
            Ok(Response::new()
                .with_content_type("application/json")
                .with_body(serde_json::to_string_pretty(&info)?))
        })
        .route("/hello", |request: &Request| {
            let name = request.query.get("name").unwrap_or("world");
            Ok(Response::new().with_body(format!("Hello, {}!", name)))
        })
        .route("/old-home", |_: &Request| Ok(Response::redirect_to("/")));

    let callback = server.static_server(Some(routes), 0, "index.html");
    server.serve(callback)
}
