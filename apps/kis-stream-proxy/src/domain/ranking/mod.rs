//! Ranking Types

use serde::Serialize;

/// One row of the fluctuation ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankEntry {
    /// Short stock code.
    pub symbol: String,
    /// Korean display name.
    pub name: String,
    /// Percent change versus the prior close.
    pub change_rate: Option<f64>,
    /// Current price.
    pub price: Option<f64>,
    /// Rank position, 1-based.
    pub rank: Option<u32>,
    /// Cumulative volume.
    pub volume: Option<f64>,
}
