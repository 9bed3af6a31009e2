use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bigdecimal::{BigDecimal, Zero};
use tracing::{debug, warn};

use crate::error::Error;
use crate::helpers::{buffered_batch, scale_amount};
use crate::price::PriceResolver;
use crate::provider::query::ContractQueries;
use crate::types::{
    Address, FleetSummary, LoanRecord, UserPosition, UserPositionsSummary,
    VaultRecord, VaultStats,
};

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub factory: Address,
    pub vault_discovery_batch: usize,
    pub loan_processing_batch: usize,
    pub discovery_timeout: Duration,
    pub usd_sanity_bound: BigDecimal,
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    matches!(deadline, Some(at) if Instant::now() >= at)
}

/// Walks an index-based contract enumeration until the end-of-list sentinel.
/// Other failures abort the walk.
async fn enumerate_until_not_found<T, F, Fut>(
    mut fetch: F,
) -> Result<Vec<T>, Error>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut items = Vec::new();
    let mut index = 0;

    loop {
        match fetch(index).await {
            Ok(item) => {
                items.push(item);
                index += 1;
            },
            Err(error) if error.is_not_found() => return Ok(items),
            Err(error) => return Err(error),
        }
    }
}

/// Discovery and valuation over the whole fleet of lending vaults reachable
/// from the configured factory.
pub struct VaultService {
    settings: VaultSettings,
    queries: ContractQueries,
    prices: Arc<PriceResolver>,
}

impl VaultService {
    pub fn new(
        settings: VaultSettings,
        queries: ContractQueries,
        prices: Arc<PriceResolver>,
    ) -> VaultService {
        VaultService { settings, queries, prices }
    }

    /// All vaults the factory knows, with their token wiring resolved.
    pub async fn list_vaults(&self) -> Result<Vec<VaultRecord>, Error> {
        let (vaults, _) = self.discover_vaults(None).await?;
        Ok(vaults)
    }

    /// Factory walk with an optional deadline. Once the deadline passes no
    /// further lookup batch is started and the walk reports itself
    /// incomplete.
    async fn discover_vaults(
        &self,
        deadline: Option<Instant>,
    ) -> Result<(Vec<VaultRecord>, bool), Error> {
        let count = self.queries.market_count(&self.settings.factory).await?;
        debug!("Factory reports {} market(s)", count);

        if deadline_passed(deadline) {
            return Ok((Vec::new(), false));
        }

        let lookups = (0..count)
            .map(|index| {
                let queries = self.queries.clone();
                let factory = self.settings.factory.clone();
                async move { queries.controller_at(&factory, index).await }
            })
            .collect();
        let results =
            buffered_batch(lookups, self.settings.vault_discovery_batch).await;

        let mut addresses = Vec::new();
        for result in results {
            match result {
                Ok(address) => addresses.push(address),
                // A retired slot inside the counted range is skipped.
                Err(error) if error.is_not_found() => {},
                Err(error) => return Err(error),
            }
        }

        if deadline_passed(deadline) {
            return Ok((Vec::new(), false));
        }

        let records = addresses
            .into_iter()
            .map(|address| {
                let this = self;
                async move { this.vault_record(address).await }
            })
            .collect();
        let results =
            buffered_batch(records, self.settings.vault_discovery_batch).await;

        let vaults = results
            .into_iter()
            .collect::<Result<Vec<VaultRecord>, Error>>()?;

        Ok((vaults, true))
    }

    async fn vault_record(&self, address: Address) -> Result<VaultRecord, Error> {
        let borrowed_token = self.queries.borrowed_token(&address).await?;
        let collateral_token = self.queries.collateral_token(&address).await?;
        let borrowed_decimals =
            self.queries.token_decimals(&borrowed_token).await?;
        let collateral_decimals =
            self.queries.token_decimals(&collateral_token).await?;

        Ok(VaultRecord {
            address,
            borrowed_token,
            collateral_token,
            borrowed_decimals,
            collateral_decimals,
        })
    }

    /// Borrowers currently enumerable on a vault, in slot order.
    pub async fn list_vault_users(
        &self,
        vault: &Address,
    ) -> Result<Vec<Address>, Error> {
        enumerate_until_not_found(|index| {
            let queries = self.queries.clone();
            let vault = vault.clone();
            async move { queries.loan_at(&vault, index).await }
        })
        .await
    }

    /// Totals over a vault's live loans. Loans with zero debt are dust from
    /// full repayments and are skipped. A failed position read or price leg
    /// clears `valuation_complete` and leaves that leg out of the totals.
    pub async fn get_vault_stats(
        &self,
        vault: &VaultRecord,
    ) -> Result<VaultStats, Error> {
        let (stats, _) = self.vault_stats(vault, None).await?;
        Ok(stats)
    }

    /// Deadline-aware body of `get_vault_stats`. The second value is true
    /// when the position batch was never started because the deadline had
    /// passed; the stats are then empty and marked incomplete.
    async fn vault_stats(
        &self,
        vault: &VaultRecord,
        deadline: Option<Instant>,
    ) -> Result<(VaultStats, bool), Error> {
        if deadline_passed(deadline) {
            return Ok((Self::skipped_stats(vault), true));
        }

        let borrowers = self.list_vault_users(&vault.address).await?;

        if deadline_passed(deadline) {
            return Ok((Self::skipped_stats(vault), true));
        }

        let reads = borrowers
            .iter()
            .map(|borrower| {
                let queries = self.queries.clone();
                let address = vault.address.clone();
                let borrower = borrower.clone();
                async move { queries.user_state(&address, &borrower).await }
            })
            .collect();
        let results =
            buffered_batch(reads, self.settings.loan_processing_batch).await;

        let mut loans: Vec<LoanRecord> = Vec::new();
        let mut complete = true;

        for (borrower, result) in borrowers.into_iter().zip(results) {
            match result {
                Ok((collateral, debt)) => {
                    if debt.is_zero() {
                        continue;
                    }
                    loans.push(LoanRecord {
                        vault: vault.address.clone(),
                        borrower,
                        debt: scale_amount(&debt, vault.borrowed_decimals),
                        collateral: scale_amount(
                            &collateral,
                            vault.collateral_decimals,
                        ),
                    });
                },
                Err(error) => {
                    warn!(
                        "Position read for {} failed in {}: {}",
                        borrower.as_str(),
                        vault.address.as_str(),
                        error
                    );
                    complete = false;
                },
            }
        }

        let active_loans = loans.len() as u64;
        let mut total_debt = BigDecimal::zero();
        let mut total_collateral = BigDecimal::zero();

        for loan in &loans {
            total_debt += &loan.debt;
            total_collateral += &loan.collateral;
        }

        let mut total_debt_usd = BigDecimal::zero();
        let mut total_collateral_usd = BigDecimal::zero();

        if active_loans > 0 {
            match self.prices.resolve(&vault.borrowed_token).await {
                Ok(quote) => total_debt_usd = &total_debt * &quote.price,
                Err(error) => {
                    warn!(
                        "Debt leg of {} left unvalued: {}",
                        vault.address.as_str(),
                        error
                    );
                    complete = false;
                },
            }
            match self.prices.resolve(&vault.collateral_token).await {
                Ok(quote) => {
                    total_collateral_usd = &total_collateral * &quote.price;
                },
                Err(error) => {
                    warn!(
                        "Collateral leg of {} left unvalued: {}",
                        vault.address.as_str(),
                        error
                    );
                    complete = false;
                },
            }
        }

        Ok((
            VaultStats {
                address: vault.address.clone(),
                total_debt,
                total_collateral,
                total_debt_usd,
                total_collateral_usd,
                active_loans,
                valuation_complete: complete,
            },
            false,
        ))
    }

    fn skipped_stats(vault: &VaultRecord) -> VaultStats {
        VaultStats {
            address: vault.address.clone(),
            total_debt: BigDecimal::zero(),
            total_collateral: BigDecimal::zero(),
            total_debt_usd: BigDecimal::zero(),
            total_collateral_usd: BigDecimal::zero(),
            active_loans: 0,
            valuation_complete: false,
        }
    }

    /// One borrower's position in one vault. A borrower the vault has never
    /// seen reads back as all zeroes and is reported as absent. USD legs are
    /// best effort.
    pub async fn get_user_position(
        &self,
        vault: &VaultRecord,
        user: &Address,
    ) -> Result<UserPosition, Error> {
        let (collateral_raw, debt_raw) =
            self.queries.user_state(&vault.address, user).await?;

        if collateral_raw.is_zero() && debt_raw.is_zero() {
            return Err(Error::NotFound(format!(
                "{} has no position in {}",
                user.as_str(),
                vault.address.as_str()
            )));
        }

        let debt = scale_amount(&debt_raw, vault.borrowed_decimals);
        let collateral =
            scale_amount(&collateral_raw, vault.collateral_decimals);

        let debt_usd = match self.prices.resolve(&vault.borrowed_token).await {
            Ok(quote) => Some(&debt * &quote.price),
            Err(_) => None,
        };
        let collateral_usd =
            match self.prices.resolve(&vault.collateral_token).await {
                Ok(quote) => Some(&collateral * &quote.price),
                Err(_) => None,
            };

        Ok(UserPosition {
            vault: vault.address.clone(),
            user: user.clone(),
            debt,
            collateral,
            debt_usd,
            collateral_usd,
        })
    }

    /// One borrower across every vault in the fleet. Vaults without a
    /// position are silently absent from the list.
    pub async fn get_user_positions(
        &self,
        user: &Address,
    ) -> Result<UserPositionsSummary, Error> {
        let vaults = self.list_vaults().await?;

        let lookups = vaults
            .iter()
            .map(|vault| {
                let this = self;
                async move { this.get_user_position(vault, user).await }
            })
            .collect();
        let results =
            buffered_batch(lookups, self.settings.vault_discovery_batch).await;

        let mut positions = Vec::new();
        let mut total_debt_usd = BigDecimal::zero();
        let mut total_collateral_usd = BigDecimal::zero();
        let mut complete = true;

        for result in results {
            match result {
                Ok(position) => {
                    match &position.debt_usd {
                        Some(usd) => total_debt_usd += usd,
                        None => complete = false,
                    }
                    match &position.collateral_usd {
                        Some(usd) => total_collateral_usd += usd,
                        None => complete = false,
                    }
                    positions.push(position);
                },
                Err(error) if error.is_not_found() => {},
                Err(error) => {
                    warn!(
                        "Position lookup for {} failed: {}",
                        user.as_str(),
                        error
                    );
                    complete = false;
                },
            }
        }

        Ok(UserPositionsSummary {
            user: user.clone(),
            positions,
            total_debt_usd,
            total_collateral_usd,
            valuation_complete: complete,
        })
    }

    /// One full pass over the fleet. Batches already in flight when the
    /// deadline passes finish naturally; no further batch is started and
    /// the summary is marked partial.
    pub async fn fleet_summary(&self) -> Result<FleetSummary, Error> {
        let deadline = Instant::now() + self.settings.discovery_timeout;
        let (vaults, mut complete) =
            self.discover_vaults(Some(deadline)).await?;

        if !complete {
            warn!("Discovery deadline passed before the factory walk finished");
        }

        let mut stats = Vec::new();

        for vault in &vaults {
            if Instant::now() >= deadline {
                warn!(
                    "Discovery deadline passed, {} vault(s) not visited",
                    vaults.len() - stats.len()
                );
                complete = false;
                break;
            }

            match self.vault_stats(vault, Some(deadline)).await {
                Ok((vault_stats, deadline_hit)) => {
                    if deadline_hit {
                        warn!(
                            "Discovery deadline passed, {} left unread",
                            vault.address.as_str()
                        );
                        complete = false;
                    }
                    stats.push(vault_stats);
                },
                Err(error) => {
                    warn!(
                        "Skipping vault {}: {}",
                        vault.address.as_str(),
                        error
                    );
                    complete = false;
                },
            }
        }

        let mut total_loans = 0;
        let mut total_debt_usd = BigDecimal::zero();
        let mut total_collateral_usd = BigDecimal::zero();

        for vault_stats in &stats {
            total_loans += vault_stats.active_loans;
            total_debt_usd += &vault_stats.total_debt_usd;
            total_collateral_usd += &vault_stats.total_collateral_usd;
        }

        if total_debt_usd > self.settings.usd_sanity_bound
            || total_collateral_usd > self.settings.usd_sanity_bound
        {
            warn!(
                "Fleet totals exceed the sanity bound: debt {} USD, collateral {} USD",
                total_debt_usd, total_collateral_usd
            );
        }

        let collateralization_ratio = if total_debt_usd > BigDecimal::zero() {
            Some(&total_collateral_usd / &total_debt_usd)
        } else {
            None
        };

        Ok(FleetSummary {
            vaults: stats,
            total_loans,
            total_debt_usd,
            total_collateral_usd,
            collateralization_ratio,
            complete,
        })
    }
}
