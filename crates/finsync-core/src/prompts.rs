//! Categorization prompt
//!
//! One prompt per sync run carries every distinct payee, the full category
//! vocabulary and the known payee hints. The template is embedded at compile
//! time and rendered with `{{var}}` substitution.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::Result;
use crate::models::{Transaction, CATEGORY_UNKNOWN};

const CATEGORIZE_TRANSACTIONS: &str =
    include_str!("../../../prompts/categorize_transactions.md");

/// Render a template, replacing every `{{key}}` with its value
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let pattern = format!("{{{{{}}}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}

/// Distinct payee names, in first-seen order
pub fn distinct_names(transactions: &[Transaction]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut names = Vec::new();
    for tx in transactions {
        if tx.name.is_empty() {
            continue;
        }
        if seen.insert(tx.name.as_str()) {
            names.push(tx.name.clone());
        }
    }
    names
}

/// Build the single classification request of a run
pub fn categorization_prompt(
    names: &[String],
    vocabulary: &[String],
    hints: &BTreeMap<String, String>,
) -> Result<String> {
    let mut vars = HashMap::new();
    vars.insert("categories", serde_json::to_string(vocabulary)?);
    vars.insert("hints", serde_json::to_string(hints)?);
    vars.insert("unknown", CATEGORY_UNKNOWN.to_string());
    vars.insert("names", serde_json::to_string(names)?);

    Ok(render(CATEGORIZE_TRANSACTIONS, &vars))
}

/// Map a categorizer answer onto the vocabulary.
///
/// Missing, empty or unknown categories become the sentinel.
pub fn normalize_category(category: Option<&str>, vocabulary: &[String]) -> String {
    let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) else {
        return CATEGORY_UNKNOWN.to_string();
    };

    vocabulary
        .iter()
        .find(|v| v.as_str() == category)
        // Models sometimes change the case of a category
        .or_else(|| vocabulary.iter().find(|v| v.eq_ignore_ascii_case(category)))
        .cloned()
        .unwrap_or_else(|| CATEGORY_UNKNOWN.to_string())
}

/// Assign every transaction its category from the name -> category map
pub fn apply_categories(
    transactions: &mut [Transaction],
    categories: &HashMap<String, String>,
    vocabulary: &[String],
) {
    for tx in transactions.iter_mut() {
        tx.category = normalize_category(categories.get(&tx.name).map(String::as_str), vocabulary);
    }
}
