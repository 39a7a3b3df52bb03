use serde::{Deserialize, Serialize};

use super::NiveauConformite;

/// Overall audit score, always derived from the full set of step outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceScore {
    /// 0..100, rounded to 2 decimals
    pub score: f64,
    pub niveau: NiveauConformite,
    /// "passed/total" over critical steps
    pub points_critiques: String,
    pub poids_obtenu: f64,
    pub poids_total: u32,
}

impl ComplianceScore {
    /// (passed, total) parsed back out of `points_critiques`
    pub fn critical_counts(&self) -> Option<(usize, usize)> {
        let (passed, total) = self.points_critiques.split_once('/')?;
        Some((passed.parse().ok()?, total.parse().ok()?))
    }
}
