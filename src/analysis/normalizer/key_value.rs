use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use super::fields::{Draft, Field};

// A label starts a line (or follows `,;|{`), may carry list or emphasis
// markup, and ends at `:`, `=` or a spaced dash.
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?ix)
        (?:^|[\r\n,;|{])
        [\ \t]*
        (?:[-*•>\#]+[\ \t]*|\d+[.)][\ \t]*)?
        [*_"'`]*[\ \t]*
        (?:
            (?P<carbon>(?:estimated[\ _-]?)?(?:carbon|co2|co₂)(?:[\ _-]?(?:saved|savings|saving|offset|reduction))?(?:[\ _-]?\(?kg\)?)?)
          | (?P<recyclable>is[\ _-]?recyclable|recyclable|recyclability|can[\ _-]?(?:be[\ _-]?)?recycled?)
          | (?P<material>materials?(?:[\ _-]?type)?|composition)
          | (?P<bin>bin(?:[\ _-]?(?:type|category))?|disposal(?:[\ _-]?(?:method|bin|location))?|destination|category)
          | (?P<notes>notes?|instructions?|preparation|prep|tips?|details)
          | (?P<item>item(?:[\ _-]?name)?|product(?:[\ _-]?name)?|object|name)
        )
        [*_"'`]*[\ \t]*
        (?:[:=]|-[\ \t]|–|—)
        [\ \t]*[*_]*[\ \t]*
        "#,
    )
    .expect("label pattern is valid")
});

const GROUPS: [(&str, Field); 6] = [
    ("item", Field::Item),
    ("material", Field::Material),
    ("recyclable", Field::Recyclable),
    ("bin", Field::Bin),
    ("notes", Field::Notes),
    ("carbon", Field::CarbonSavedKg),
];

const VALUE_TRIM: &[char] = &['*', '_', '"', '\'', '`', ',', ';', '{', '}', '[', ']', '|'];

/// `LABEL: value` pairs in order of first appearance. A value runs until the
/// next recognized label; the first non-empty value for a field wins.
pub(crate) fn extract(text: &str) -> IndexMap<Field, String> {
    let labels: Vec<(Field, usize, usize)> = LABEL
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let field = GROUPS
                .iter()
                .find(|(name, _)| captures.name(name).is_some())
                .map(|(_, field)| *field)?;
            Some((field, whole.start(), whole.end()))
        })
        .collect();

    let mut fields = IndexMap::new();
    for (index, (field, _, value_start)) in labels.iter().enumerate() {
        let value_end = labels
            .get(index + 1)
            .map(|(_, next_start, _)| *next_start)
            .unwrap_or(text.len());
        if value_end <= *value_start {
            continue;
        }
        let value = clean_value(&text[*value_start..value_end]);
        if !value.is_empty() && !fields.contains_key(field) {
            fields.insert(*field, value);
        }
    }
    fields
}

pub(crate) fn decode(text: &str) -> Draft {
    let mut draft = Draft::default();
    for (field, value) in extract(text) {
        draft.set_text(field, &value);
    }
    draft
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c: char| c.is_whitespace() || VALUE_TRIM.contains(&c))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_in_any_order() {
        let text = "NOTES: No special prep.\nITEM: Pizza box\nMATERIAL: cardboard\nRECYCLABLE: no\nBIN: Landfill";
        let fields = extract(text);
        let order: Vec<Field> = fields.keys().copied().collect();
        assert_eq!(
            order,
            vec![
                Field::Notes,
                Field::Item,
                Field::Material,
                Field::Recyclable,
                Field::Bin
            ]
        );
        assert_eq!(fields[&Field::Item], "Pizza box");
        assert_eq!(fields[&Field::Notes], "No special prep.");

        let draft = decode(text);
        assert!(draft.has_core_fields());
        assert_eq!(draft.recyclable, Some(false));
    }

    #[test]
    fn markdown_lists_and_inline_pairs() {
        let text = "Here is my analysis:\n- **Item:** Plastic bottle\n- **Material:** PET #1\n- **Carbon saved (kg):** 0.08\nRecyclable = yes, Bin: Recycling";
        let fields = extract(text);
        assert_eq!(fields[&Field::Item], "Plastic bottle");
        assert_eq!(fields[&Field::Material], "PET #1");
        assert_eq!(fields[&Field::CarbonSavedKg], "0.08");
        assert_eq!(fields[&Field::Recyclable], "yes");
        assert_eq!(fields[&Field::Bin], "Recycling");
    }

    #[test]
    fn multi_line_values_are_collapsed() {
        let text = "Item: Jar\nNotes: Rinse it\n   and remove the lid.\nBin: Recycling";
        assert_eq!(extract(text)[&Field::Notes], "Rinse it and remove the lid.");
    }

    #[test]
    fn prose_without_labels_yields_nothing() {
        assert!(extract("I cannot help with that.").is_empty());
        assert!(decode("The item is probably a can").is_empty());
    }

    #[test]
    fn malformed_json_still_reads_as_pairs() {
        let text = r#"{"item": "Can", "recyclable": true, "bin": "Recycling",}"#;
        let draft = decode(text);
        assert_eq!(draft.item.as_deref(), Some("Can"));
        assert_eq!(draft.recyclable, Some(true));
        assert_eq!(draft.bin.as_deref(), Some("Recycling"));
    }
}
