use tracing::{error, info, Level};

use vaultscope::{
    configuration::{get_configuration, set_configuration, AppState, State},
    error::Error,
    handler::{aggregation_task, cache_sweeper_task},
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let result = app_main().await;

    if let Err(err) = &result {
        error!("{}", err);
    }

    result
}

async fn app_main() -> Result<(), Error> {
    let subscriber = tracing_subscriber::fmt()
        .compact()
        .with_level(true)
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    set_configuration()?;
    let config = get_configuration()?;

    let state = State::new(config).await?;
    let app_state = AppState::new(state);

    for endpoint in app_state.pool.list_endpoints() {
        info!(
            "Endpoint {} ({}) at priority {}",
            endpoint.name, endpoint.url, endpoint.priority
        );
    }

    let (_, _) = tokio::try_join!(
        aggregation_task(app_state.clone()),
        cache_sweeper_task(app_state.clone()),
    )?;

    Ok(())
}
