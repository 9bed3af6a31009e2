use std::time::Duration;

use tokio::time;
use tracing::{error, info};

use crate::configuration::{AppState, State};
use crate::error::Error;

/// Periodic full pass over the fleet. A failed pass is logged and the next
/// tick tries again; the task itself never exits.
pub async fn aggregation_task(app_state: AppState<State>) -> Result<(), Error> {
    let mut interval = time::interval(Duration::from_secs(
        app_state.config.aggregation_interval,
    ));

    loop {
        interval.tick().await;

        match app_state.vaults.fleet_summary().await {
            Ok(summary) => {
                info!(
                    "Fleet pass{}: {} vault(s), {} loan(s), debt {} USD, collateral {} USD",
                    if summary.complete { "" } else { " (partial)" },
                    summary.vaults.len(),
                    summary.total_loans,
                    summary.total_debt_usd,
                    summary.total_collateral_usd,
                );
            },
            Err(error) => {
                error!("Fleet pass failed: {}", error);
            },
        }
    }
}
