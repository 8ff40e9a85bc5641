//! HTTP server command: `appfoundry serve`.

use std::path::PathBuf;

use anyhow::Result;
use appfoundry::config::AppConfig;
use appfoundry::factory::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: AppConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    for problem in config.validate() {
        eprintln!("{} {}", console::style("Config:").yellow().bold(), problem);
    }

    let mut server = ServerConfig::from_app_config(&config);
    if let Some(port) = port {
        server.port = port;
    }
    if let Some(path) = db_path {
        server.db_path = path;
    }
    server.dev_mode = dev;

    start_server(server, config).await
}
