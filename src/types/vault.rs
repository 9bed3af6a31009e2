use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::types::Address;

/// A lending market discovered through the factory. Factories only append,
/// so a record is immutable once returned.
#[derive(Debug, Clone, Serialize)]
pub struct VaultRecord {
    pub address: Address,
    pub borrowed_token: Address,
    pub collateral_token: Address,
    pub borrowed_decimals: u32,
    pub collateral_decimals: u32,
}

/// One borrower's position inside a vault, re-read on every pass.
#[derive(Debug, Clone, Serialize)]
pub struct LoanRecord {
    pub vault: Address,
    pub borrower: Address,
    pub debt: BigDecimal,
    pub collateral: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub address: Address,
    pub total_debt: BigDecimal,
    pub total_collateral: BigDecimal,
    pub total_debt_usd: BigDecimal,
    pub total_collateral_usd: BigDecimal,
    pub active_loans: u64,
    /// Cleared when any loan read or price leg failed; raw totals are then
    /// still reported but USD subtotals exclude the failed legs.
    pub valuation_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPosition {
    pub vault: Address,
    pub user: Address,
    pub debt: BigDecimal,
    pub collateral: BigDecimal,
    pub debt_usd: Option<BigDecimal>,
    pub collateral_usd: Option<BigDecimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPositionsSummary {
    pub user: Address,
    pub positions: Vec<UserPosition>,
    pub total_debt_usd: BigDecimal,
    pub total_collateral_usd: BigDecimal,
    pub valuation_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointInfo {
    pub name: String,
    pub url: String,
    pub is_active: bool,
    pub priority: u32,
}

/// Output of one full discovery pass across the fleet.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub vaults: Vec<VaultStats>,
    pub total_loans: u64,
    pub total_debt_usd: BigDecimal,
    pub total_collateral_usd: BigDecimal,
    pub collateralization_ratio: Option<BigDecimal>,
    /// False when the pass hit the discovery timeout and later vaults were
    /// not started.
    pub complete: bool,
}
