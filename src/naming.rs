//! Route segment naming.
//!
//! A model called `ImportantPerson` is served under `/api/important_people`: the bare
//! type name is converted to snake case and its last word is pluralized.

use heck::ToSnakeCase;

/// Nouns whose plural does not follow the suffix rules
const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("tooth", "teeth"),
    ("foot", "feet"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("ox", "oxen"),
    ("datum", "data"),
    ("medium", "media"),
    ("index", "indices"),
    ("matrix", "matrices"),
    ("vertex", "vertices"),
    ("criterion", "criteria"),
    ("analysis", "analyses"),
    ("crisis", "crises"),
    ("status", "statuses"),
    ("quiz", "quizzes"),
];

/// Nouns that are the same in singular and plural
const UNCOUNTABLE: &[&str] = &[
    "equipment",
    "information",
    "rice",
    "money",
    "species",
    "series",
    "fish",
    "sheep",
    "deer",
    "news",
    "metadata",
    "feedback",
];

/// Words ending in f/fe that simply take an s
const F_EXCEPTIONS: &[&str] = &["roof", "chief", "proof", "belief", "chef", "cliff", "safe"];

/// Words ending in consonant + o that simply take an s
const O_EXCEPTIONS: &[&str] = &["photo", "piano", "halo", "memo", "logo", "video", "radio"];

/// Pluralize an English noun. For snake case input only the last word changes.
///
/// ```
/// use crudchain::naming::pluralize;
///
/// assert_eq!(pluralize("widget"), "widgets");
/// assert_eq!(pluralize("company"), "companies");
/// assert_eq!(pluralize("important_person"), "important_people");
/// ```
#[must_use]
pub fn pluralize(word: &str) -> String {
    match word.rsplit_once('_') {
        Some((head, last)) if !last.is_empty() => format!("{head}_{}", pluralize_word(last)),
        _ => pluralize_word(word),
    }
}

fn pluralize_word(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_lowercase();

    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }
    // already plural
    if IRREGULAR.iter().any(|(_, plural)| *plural == lower) {
        return word.to_string();
    }

    let stem = |n: usize| &word[..word.len() - n];
    let before_last = lower.chars().rev().nth(1);
    let is_vowel = |c: Option<char>| matches!(c, Some('a' | 'e' | 'i' | 'o' | 'u'));

    if lower.ends_with('y') && lower.len() > 1 && !is_vowel(before_last) {
        format!("{}ies", stem(1))
    } else if ["s", "sh", "ch", "x", "z"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        format!("{word}es")
    } else if lower.ends_with("fe") && lower.len() > 2 && !F_EXCEPTIONS.contains(&lower.as_str()) {
        format!("{}ves", stem(2))
    } else if lower.ends_with('f')
        && !lower.ends_with("ff")
        && lower.len() > 1
        && !F_EXCEPTIONS.contains(&lower.as_str())
    {
        format!("{}ves", stem(1))
    } else if lower.ends_with('o')
        && lower.len() > 1
        && !is_vowel(before_last)
        && !O_EXCEPTIONS.contains(&lower.as_str())
    {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

/// Derive the route segment for a Rust type name such as `my_app::models::ImportantPerson`.
///
/// Module path and generic arguments are dropped before conversion.
#[must_use]
pub fn route_segment(type_name: &str) -> String {
    let without_generics = type_name.split('<').next().unwrap_or(type_name);
    let bare = without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics);
    pluralize(&bare.to_snake_case())
}

/// Types that know which URL segment they are served under.
///
/// The default derives it from the implementing type's name, so a marker
/// `struct ImportantPerson;` yields `important_people`. Override
/// [`route_name`](HasRouteName::route_name) when the derived name is wrong.
pub trait HasRouteName {
    #[must_use]
    fn route_name() -> String {
        route_segment(std::any::type_name::<Self>())
    }
}

/// A fresh, empty instance of a record type
#[must_use]
pub fn empty_instance<T: Default>() -> T {
    T::default()
}

/// An empty growable collection of a record type, used for index results
#[must_use]
pub fn empty_collection<T>() -> Vec<T> {
    Vec::new()
}
