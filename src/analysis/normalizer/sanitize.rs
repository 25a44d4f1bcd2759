use std::sync::LazyLock;

use regex::Regex;

use super::fields::Draft;
use crate::analysis::result::{AnalysisResult, BinCategory, UNKNOWN};

pub(crate) const NO_PREP_NOTE: &str = "No special preparation needed.";
pub(crate) const MUNICIPAL_NOTE: &str = "Check your local municipal website for drop-off locations.";

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("sanitizer pattern is valid")
}

static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"\[([^\]\n]+)\]\((?:https?://|www\.)[^)\s]*\)"));

static URL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\(?\b(?:https?://|www\.)[^\s)\]>]+\)?"));

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?i)\[\s*(?:\d+(?:\s*[-–,]\s*\d+)*|(?:source|citation|cite|ref)[^\]]*)\s*\]|【[^】]*】|\^\d+",
    )
});

static HEDGE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?i)(?:",
        r"(?:please\s+)?(?:always\s+)?(?:double[- ]?)?check\s+(?:with\s+)?(?:your\s+)?local\s+",
        r"(?:rules|regulations|guidelines|guidance|requirements|authorities|council|municipality",
        r"|recycling(?:\s+(?:rules|guidelines|program|programme|center|centre|facility))?)",
        r"|(?:please\s+)?(?:contact|consult|ask)\s+(?:with\s+)?(?:your\s+)?(?:local\s+)?",
        r"(?:municipality|council|city|waste\s+(?:management\s+)?(?:provider|authority|company|hauler)",
        r"|recycling\s+(?:center|centre|facility|program))",
        r"|(?:(?:rules|guidelines|acceptance|requirements|programs?|recyclability)\s+)?",
        r"(?:may\s+|can\s+|often\s+)?var(?:y|ies)\s+(?:by|depending\s+on|based\s+on)\s+",
        r"(?:your\s+)?(?:location|area|region|municipality|city|country|jurisdiction)",
        r"|depending\s+on\s+(?:your\s+)?(?:location|area|region|municipality",
        r"|local\s+(?:rules|facilities|programs?|guidelines))",
        r"|(?:if|where)\s+(?:accepted|allowed|available)\s+(?:locally|in\s+your\s+area",
        r"|by\s+your\s+(?:local\s+)?(?:program|council|municipality))",
        r")",
    ))
});

static NEGATED_RECYCLING: LazyLock<Regex> = LazyLock::new(|| {
    pattern(
        r"(?i)\b(?:non|not|un|cannot\s+be|can't\s+be|can\s*not\s+be|isn't|is\s+not|no)[\s-]*recycl\w*",
    )
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?i)\b\d{1,5}(?:\s+[a-z0-9.'-]+){1,5}?\s+",
        r"(?:street|st|avenue|ave|road|rd|boulevard|blvd|drive|dr|lane|ln|way|court|ct",
        r"|place|pl|parkway|pkwy|highway|hwy|terrace|ter|circle|cir|square|sq)\b\.?",
    ))
});

static SPACE_BEFORE_PUNCT: LazyLock<Regex> = LazyLock::new(|| pattern(r"\s+([,.;:!?])"));
static REPEATED_PUNCT: LazyLock<Regex> = LazyLock::new(|| pattern(r"[,;:]?(?:\s*[.!?])+|[,;:](?:\s*[,;:])+"));
static EMPTY_BRACKETS: LazyLock<Regex> = LazyLock::new(|| pattern(r"\(\s*\)|\[\s*\]"));

const UNKNOWN_SPELLINGS: &[&str] = &[
    "unknown",
    "unk",
    "n/a",
    "na",
    "n.a",
    "none",
    "null",
    "nil",
    "not sure",
    "unsure",
    "undetermined",
    "unidentified",
    "unclear",
    "not applicable",
    "not available",
    "not specified",
    "unspecified",
    "unknown item",
    "unknown object",
    "unknown material",
    "cannot determine",
    "can't determine",
    "not identified",
    "-",
    "--",
    "?",
];

static NEGATED_HAZARD: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(?:non|not)[\s-]*(?:hazard\w*|toxic)\b"));

static HAZARDOUS: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?i)\b(?:hazard\w*|hhw|toxic|chemicals?|batter(?:y|ies)|paints?|pesticides?",
        r"|motor\s+oil|sharps|medical\s+waste|pharmac\w*|solvents?|flammable|corrosive|propane)\b",
    ))
});
static E_WASTE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(?:e-?\s?waste|ewaste|electronics?|weee)\b"));
static DONATION: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)\b(?:donat\w*|thrift\w*|charity|charities|goodwill|second-?hand|give\s+(?:it\s+)?away)\b")
});
static COMPOST: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?i)\b(?:compost\w*|green\s+bin|food\s+(?:waste|scraps?)|yard\s+waste|garden\s+waste",
        r"|organics\s+bin)\b",
    ))
});
static RECYCLING: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(?:recycl\w*|curbside|kerbside|blue\s+(?:bin|cart)|co-?m+ingled)\b"));
static LANDFILL: LazyLock<Regex> = LazyLock::new(|| {
    pattern(concat!(
        r"(?i)\b(?:landfill|trash|garbage|rubbish|general\s+waste|black\s+bin|residual|refuse",
        r"|household\s+waste|waste\s+bin)\b",
    ))
});

/// Strips hedging, links and citation markers, then tidies what is left.
pub(crate) fn clean_text(text: &str) -> String {
    let text = MARKDOWN_LINK.replace_all(text, "$1");
    let text = URL.replace_all(&text, "");
    let text = CITATION.replace_all(&text, "");
    let text = HEDGE.replace_all(&text, "");
    let text = EMPTY_BRACKETS.replace_all(&text, "");
    let text = text.replace("**", "").replace("__", "").replace('`', "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = REPEATED_PUNCT.replace_all(&text, |caps: &regex::Captures| {
        let matched = caps.get(0).map_or("", |m| m.as_str());
        matched
            .chars()
            .rev()
            .find(|c| !c.is_whitespace())
            .map(String::from)
            .unwrap_or_default()
    });
    text.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-' | '–' | '"'))
        .trim_start_matches(['.', '!', '?'])
        .trim()
        .to_string()
}

/// Folds blank and "don't know" spellings into `UNKNOWN`.
pub(crate) fn canonical_unknown(text: &str) -> String {
    let folded = text.trim().trim_end_matches('.').trim().to_lowercase();
    if folded.is_empty() || UNKNOWN_SPELLINGS.contains(&folded.as_str()) {
        UNKNOWN.to_string()
    } else {
        text.trim().to_string()
    }
}

/// Maps free-form destination text onto the taxonomy. Keywords match whole
/// words only. Earlier categories win when several match; text with no
/// recognizable destination defers to the model's recyclable flag.
pub(crate) fn classify_bin(text: &str, recyclable: Option<bool>) -> BinCategory {
    let lower = text.to_lowercase();
    let negated = NEGATED_RECYCLING.is_match(&lower);
    let rest = NEGATED_RECYCLING.replace_all(&lower, " ");
    let rest = NEGATED_HAZARD.replace_all(&rest, " ");

    if HAZARDOUS.is_match(&rest) {
        BinCategory::HazardousWaste
    } else if E_WASTE.is_match(&rest) {
        BinCategory::EWaste
    } else if DONATION.is_match(&rest) {
        BinCategory::Donation
    } else if COMPOST.is_match(&rest) {
        BinCategory::Compost
    } else if RECYCLING.is_match(&rest) {
        BinCategory::Recycling
    } else if negated || LANDFILL.is_match(&rest) {
        BinCategory::Landfill
    } else if recyclable == Some(true) {
        BinCategory::Recycling
    } else {
        BinCategory::Landfill
    }
}

pub(crate) fn find_address(text: &str) -> Option<String> {
    ADDRESS
        .find(text)
        .map(|found| found.as_str().trim_end_matches('.').to_string())
}

fn reason_clause(bin: BinCategory, unknown_item: bool) -> &'static str {
    if unknown_item {
        return "We couldn't identify this item.";
    }
    match bin {
        BinCategory::HazardousWaste => {
            "This item contains hazardous materials and must not go in regular bins."
        }
        BinCategory::EWaste => "Electronics need special handling and can't go in curbside recycling.",
        BinCategory::Compost => "This item can be composted instead of recycled.",
        BinCategory::Donation => "This item is better reused than recycled.",
        BinCategory::Landfill | BinCategory::Recycling => {
            "This item isn't accepted in curbside recycling."
        }
    }
}

/// Turns a decoded draft into the canonical verdict. `source` is the raw
/// reply, searched for a drop-off address.
pub(crate) fn sanitize(draft: Draft, source: &str) -> AnalysisResult {
    let item = canonical_unknown(&clean_text(draft.item.as_deref().unwrap_or_default()));
    let material = canonical_unknown(&clean_text(draft.material.as_deref().unwrap_or_default()));
    let bin = classify_bin(draft.bin.as_deref().unwrap_or_default(), draft.recyclable);
    let unknown_item = item == UNKNOWN;

    let claimed = draft.recyclable.unwrap_or(bin == BinCategory::Recycling);
    let recyclable = claimed && !unknown_item && !bin.forbids_recycling();

    let notes = if recyclable {
        let cleaned = canonical_unknown(&clean_text(draft.notes.as_deref().unwrap_or_default()));
        if cleaned == UNKNOWN {
            NO_PREP_NOTE.to_string()
        } else {
            cleaned
        }
    } else {
        let location = match find_address(source) {
            Some(address) => format!("Drop it off at {address}."),
            None => MUNICIPAL_NOTE.to_string(),
        };
        format!("{} {}", reason_clause(bin, unknown_item), location)
    };

    let carbon = draft.carbon_saved_kg.unwrap_or(0.0);
    let carbon_saved_kg = if recyclable && carbon.is_finite() && carbon > 0.0 {
        carbon
    } else {
        0.0
    };

    AnalysisResult::new(item, material, recyclable, bin, notes, carbon_saved_kg)
}
