use std::sync::Arc;

use grades_service::config::GradesConfig;
use grades_service::{create_router, database, AppState, PgGradeStore};
use shared::logger::init_logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GradesConfig::from_env()?;
    init_logger(config.log_format)?;

    let pool = database::create_pool(&config.database).await?;
    if config.database.init_schema {
        database::init_schema(&pool).await?;
    }

    let state = AppState::new(Arc::new(PgGradeStore::new(pool)));
    let app = create_router(state);

    shared::server::serve(app, &config.host, config.port).await
}
