use std::sync::Arc;

use chef_zabbix_mcp::{
    build_app, chef::ChefClient, config::Config, logging, resolver::Resolver,
    zabbix::ZabbixClient, AppState,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let zabbix = ZabbixClient::new(config.zabbix.clone(), config.request_timeout)?;
    let chef = ChefClient::from_config(&config.chef, config.request_timeout)?;

    let resolver = Resolver::new(Arc::new(zabbix), Arc::new(chef))
        .with_round_trip_timeout(config.request_timeout);
    let state = AppState::new(config.api_token.clone(), resolver);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        "server starting"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
