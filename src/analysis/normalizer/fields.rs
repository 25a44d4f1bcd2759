use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Item,
    Material,
    Recyclable,
    Bin,
    Notes,
    CarbonSavedKg,
}

/// Accepted key spellings per field, in priority order. Keys are compared
/// after `normalize_key`, so `carbon_saved_kg` and `carbonSavedKg` are one key.
pub(crate) const FIELD_SYNONYMS: &[(Field, &[&str])] = &[
    (
        Field::Item,
        &["item", "itemname", "product", "productname", "name", "object", "title"],
    ),
    (
        Field::Material,
        &["material", "materials", "materialtype", "primarymaterial", "composition"],
    ),
    (
        Field::Recyclable,
        &["recyclable", "isrecyclable", "recyclability", "canberecycled", "canrecycle"],
    ),
    (
        Field::Bin,
        &[
            "bin",
            "bintype",
            "bincategory",
            "disposal",
            "disposalmethod",
            "disposalbin",
            "destination",
            "category",
        ],
    ),
    (
        Field::Notes,
        &["notes", "note", "instructions", "preparation", "prep", "tips", "details", "explanation"],
    ),
    (
        Field::CarbonSavedKg,
        &[
            "carbonsavedkg",
            "carbonsaved",
            "co2savedkg",
            "co2saved",
            "carbonsavings",
            "carbon",
            "co2",
        ],
    ),
];

/// One level of these is unwrapped when the outer object has no known field.
pub(crate) const WRAPPER_KEYS: &[&str] = &["result", "output", "response", "data"];

pub(crate) fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A number that is not glued to a preceding word, so the `2` in `CO2` is
/// skipped. Group 1 is comma-grouped thousands, group 2 a plain value with an
/// optional decimal point or comma.
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\w.,])(?:(-?\d{1,3}(?:,\d{3})+(?:\.\d+)?)|(-?\d+(?:[.,]\d+)?))(?:\D|$)")
        .expect("number pattern is valid")
});

pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let caps = NUMBER.captures(text)?;
    if let Some(grouped) = caps.get(1) {
        return grouped.as_str().replace(',', "").parse().ok();
    }
    caps.get(2)?.as_str().replace(',', ".").parse().ok()
}

pub(crate) fn parse_recyclable(text: &str) -> Option<bool> {
    let lower = text.trim().to_lowercase();
    let first = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())?;
    match first {
        "yes" | "y" | "true" | "1" | "recyclable" | "recycle" | "recycled" | "widely" => Some(true),
        "no" | "n" | "false" | "0" | "not" | "non" | "nonrecyclable" | "unrecyclable"
        | "never" => Some(false),
        _ => None,
    }
}

/// Loosely-typed record produced by the decode ladder, before sanitization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub item: Option<String>,
    pub material: Option<String>,
    pub recyclable: Option<bool>,
    pub bin: Option<String>,
    pub notes: Option<String>,
    pub carbon_saved_kg: Option<f64>,
}

impl Draft {
    /// The record used when nothing could be decoded at all.
    pub(crate) fn fallback() -> Self {
        Self {
            item: Some(crate::analysis::result::UNKNOWN.to_string()),
            material: Some(crate::analysis::result::UNKNOWN.to_string()),
            recyclable: Some(false),
            bin: Some("Landfill".to_string()),
            notes: Some("No special preparation.".to_string()),
            carbon_saved_kg: Some(0.0),
        }
    }

    /// Stores `value` for `field`, converting as needed. Blank or unparsable
    /// values leave the field empty.
    pub(crate) fn set_text(&mut self, field: Field, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        match field {
            Field::Item => self.item = Some(value.to_string()),
            Field::Material => self.material = Some(value.to_string()),
            Field::Recyclable => self.recyclable = parse_recyclable(value),
            Field::Bin => self.bin = Some(value.to_string()),
            Field::Notes => self.notes = Some(value.to_string()),
            Field::CarbonSavedKg => self.carbon_saved_kg = parse_number(value),
        }
    }

    pub(crate) fn has(&self, field: Field) -> bool {
        match field {
            Field::Item => self.item.is_some(),
            Field::Material => self.material.is_some(),
            Field::Recyclable => self.recyclable.is_some(),
            Field::Bin => self.bin.is_some(),
            Field::Notes => self.notes.is_some(),
            Field::CarbonSavedKg => self.carbon_saved_kg.is_some(),
        }
    }

    /// Item, material, verdict and destination all present.
    pub(crate) fn has_core_fields(&self) -> bool {
        [Field::Item, Field::Material, Field::Recyclable, Field::Bin]
            .into_iter()
            .all(|field| self.has(field))
    }

    pub(crate) fn is_empty(&self) -> bool {
        FIELD_SYNONYMS.iter().all(|(field, _)| !self.has(*field))
    }

    /// Fills every empty (or blank) field from `other`.
    pub(crate) fn backfill(&mut self, other: &Draft) {
        fn fill_text(slot: &mut Option<String>, other: &Option<String>) {
            if slot.as_deref().is_none_or(|s| s.trim().is_empty()) && other.is_some() {
                slot.clone_from(other);
            }
        }
        fill_text(&mut self.item, &other.item);
        fill_text(&mut self.material, &other.material);
        fill_text(&mut self.bin, &other.bin);
        fill_text(&mut self.notes, &other.notes);
        if self.recyclable.is_none() {
            self.recyclable = other.recyclable;
        }
        if self.carbon_saved_kg.is_none() {
            self.carbon_saved_kg = other.carbon_saved_kg;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_normalize_across_casing_styles() {
        assert_eq!(normalize_key("carbon_saved_kg"), "carbonsavedkg");
        assert_eq!(normalize_key("carbonSavedKg"), "carbonsavedkg");
        assert_eq!(normalize_key("Is-Recyclable"), "isrecyclable");
    }

    #[test]
    fn recyclable_words() {
        assert_eq!(parse_recyclable("Yes (rinse first)"), Some(true));
        assert_eq!(parse_recyclable("**No**"), Some(false));
        assert_eq!(parse_recyclable("Non-recyclable"), Some(false));
        assert_eq!(parse_recyclable("depends"), None);
        assert_eq!(parse_recyclable("   "), None);
    }

    #[test]
    fn numbers_are_found_inside_text() {
        assert_eq!(parse_number("~0.17 kg CO2"), Some(0.17));
        assert_eq!(parse_number("0,5"), Some(0.5));
        assert_eq!(parse_number("-2"), Some(-2.0));
        assert_eq!(parse_number("none"), None);
    }

    #[test]
    fn numbers_glued_to_words_are_skipped() {
        assert_eq!(parse_number("CO2 saved: 0.2 kg"), Some(0.2));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("about 12,000 g"), Some(12000.0));
        assert_eq!(parse_number("CO2"), None);
        assert_eq!(parse_number("0.3kg"), Some(0.3));
    }

    #[test]
    fn backfill_only_touches_missing_fields() {
        let mut draft = Draft {
            item: Some("Can".to_string()),
            notes: Some("  ".to_string()),
            ..Draft::default()
        };
        let other = Draft {
            item: Some("Bottle".to_string()),
            notes: Some("Rinse".to_string()),
            carbon_saved_kg: Some(0.1),
            ..Draft::default()
        };
        draft.backfill(&other);
        assert_eq!(draft.item.as_deref(), Some("Can"));
        assert_eq!(draft.notes.as_deref(), Some("Rinse"));
        assert_eq!(draft.carbon_saved_kg, Some(0.1));
        assert!(!draft.has_core_fields());
    }
}
