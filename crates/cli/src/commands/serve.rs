//! `pagewise serve`: start the HTTP API.

use super::runtime::{load_config, session_factory};
use std::path::Path;

pub async fn run(explicit: Option<&Path>, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = load_config(explicit)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let factory = session_factory(&config).await?;

    println!("Pagewise gateway");
    println!("  Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("  Document:  {}", config.document.path.display());
    println!("  Variant:   {}", factory.default_variant());

    pagewise_gateway::start(&config.gateway, factory).await?;
    Ok(())
}
