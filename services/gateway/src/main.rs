use gateway_service::config::GatewayConfig;
use gateway_service::{create_router, AppState, GradeClient};
use shared::logger::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;
    init_logger(config.log_format)?;

    let client = GradeClient::from_config(&config.service_b)?;
    let retry = client.retry_config();
    tracing::info!(
        base_url = %config.service_b.base_url,
        max_attempts = retry.max_attempts(),
        initial_backoff_ms = retry.initial_backoff().as_millis() as u64,
        max_backoff_ms = retry.max_backoff().as_millis() as u64,
        multiplier = retry.backoff_multiplier(),
        overall_timeout_ms = retry.overall_timeout().as_millis() as u64,
        "Grades service client configured"
    );

    let app = create_router(AppState::new(client));
    shared::server::serve(app, &config.host, config.port).await
}
