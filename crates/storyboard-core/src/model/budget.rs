use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Spend category; every paid capability call debits exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCategory {
    Planning,
    Embedding,
    Render,
    VisionQa,
}

impl BudgetCategory {
    pub const ALL: [BudgetCategory; 4] = [
        BudgetCategory::Planning,
        BudgetCategory::Embedding,
        BudgetCategory::Render,
        BudgetCategory::VisionQa,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BudgetCategory::Planning => "planning",
            BudgetCategory::Embedding => "embedding",
            BudgetCategory::Render => "render",
            BudgetCategory::VisionQa => "vision_qa",
        }
    }
}

impl std::fmt::Display for BudgetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category state at one point in time. Costs are in USD.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub limit: f64,
    pub spent: f64,
    pub reserved: f64,
    pub remaining: f64,
    #[serde(default)]
    pub overdraft: f64,
    pub operations: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub categories: BTreeMap<BudgetCategory, CategorySnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_limit: Option<f64>,
}

impl BudgetSnapshot {
    pub fn total_spent(&self) -> f64 {
        self.categories.values().map(|c| c.spent).sum()
    }

    pub fn spent(&self, category: BudgetCategory) -> f64 {
        self.categories.get(&category).map(|c| c.spent).unwrap_or(0.0)
    }

    pub fn operations(&self, category: BudgetCategory) -> u64 {
        self.categories
            .get(&category)
            .map(|c| c.operations)
            .unwrap_or(0)
    }

    /// Fraction of the combined limit that has been spent.
    pub fn utilization(&self) -> f64 {
        let limit = self
            .total_limit
            .unwrap_or_else(|| self.categories.values().map(|c| c.limit).sum());
        if limit <= 0.0 {
            return 0.0;
        }
        self.total_spent() / limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serializes_snake_case() {
        let json = serde_json::to_string(&BudgetCategory::VisionQa).unwrap();
        assert_eq!(json, "\"vision_qa\"");
        assert_eq!(BudgetCategory::VisionQa.to_string(), "vision_qa");
    }

    #[test]
    fn test_snapshot_totals() {
        let mut snap = BudgetSnapshot::default();
        snap.categories.insert(
            BudgetCategory::Render,
            CategorySnapshot {
                limit: 10.0,
                spent: 4.0,
                operations: 2,
                ..Default::default()
            },
        );
        snap.categories.insert(
            BudgetCategory::Planning,
            CategorySnapshot {
                limit: 10.0,
                spent: 1.0,
                operations: 1,
                ..Default::default()
            },
        );
        assert_eq!(snap.total_spent(), 5.0);
        assert_eq!(snap.operations(BudgetCategory::Render), 2);
        assert_eq!(snap.operations(BudgetCategory::VisionQa), 0);
        assert!((snap.utilization() - 0.25).abs() < 1e-9);
    }
}
