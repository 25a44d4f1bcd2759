use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel used for every "don't know" spelling the model may produce.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinCategory {
    Recycling,
    Compost,
    Landfill,
    HazardousWaste,
    EWaste,
    Donation,
}

impl BinCategory {
    pub const ALL: [BinCategory; 6] = [
        BinCategory::Recycling,
        BinCategory::Compost,
        BinCategory::Landfill,
        BinCategory::HazardousWaste,
        BinCategory::EWaste,
        BinCategory::Donation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            BinCategory::Recycling => "Recycling",
            BinCategory::Compost => "Compost",
            BinCategory::Landfill => "Landfill",
            BinCategory::HazardousWaste => "Hazardous Waste",
            BinCategory::EWaste => "E-Waste",
            BinCategory::Donation => "Donation",
        }
    }

    /// Destinations that can never carry a recyclable verdict.
    pub fn forbids_recycling(&self) -> bool {
        matches!(self, BinCategory::Landfill | BinCategory::HazardousWaste)
    }
}

impl fmt::Display for BinCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical verdict. Only the normalizer builds these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    item: String,
    material: String,
    recyclable: bool,
    bin: BinCategory,
    notes: String,
    carbon_saved_kg: f64,
}

impl AnalysisResult {
    pub(crate) fn new(
        item: String,
        material: String,
        recyclable: bool,
        bin: BinCategory,
        notes: String,
        carbon_saved_kg: f64,
    ) -> Self {
        Self {
            item,
            material,
            recyclable,
            bin,
            notes,
            carbon_saved_kg,
        }
    }

    pub fn item(&self) -> &str {
        &self.item
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn recyclable(&self) -> bool {
        self.recyclable
    }

    pub fn bin(&self) -> BinCategory {
        self.bin
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn carbon_saved_kg(&self) -> f64 {
        self.carbon_saved_kg
    }

    pub fn is_unknown_item(&self) -> bool {
        self.item == UNKNOWN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_keys() {
        let result = AnalysisResult::new(
            "Aluminum can".to_string(),
            "aluminum".to_string(),
            true,
            BinCategory::Recycling,
            "Empty and rinse".to_string(),
            0.17,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["carbonSavedKg"], 0.17);
        assert_eq!(json["bin"], "Recycling");
    }

    #[test]
    fn only_landfill_and_hazardous_forbid_recycling() {
        let forbidding: Vec<_> = BinCategory::ALL
            .into_iter()
            .filter(BinCategory::forbids_recycling)
            .collect();
        assert_eq!(
            forbidding,
            vec![BinCategory::Landfill, BinCategory::HazardousWaste]
        );
    }
}
