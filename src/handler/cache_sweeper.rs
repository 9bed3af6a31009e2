use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use crate::configuration::{AppState, State};
use crate::error::Error;

/// Keeps the durable cache from accumulating expired rows.
pub async fn cache_sweeper_task(
    app_state: AppState<State>,
) -> Result<(), Error> {
    let mut interval = time::interval(Duration::from_secs(
        app_state.config.cache_cleanup_interval,
    ));

    loop {
        interval.tick().await;

        match app_state.cache.sweep_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    info!("Cache sweep removed {} row(s)", removed);
                }
            },
            Err(error) => {
                error!("Cache sweep failed: {}", error);
            },
        }
    }
}
