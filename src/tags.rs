//! Category tag rules and their translation into Overpass filter fragments.
//!
//! A category's rules come from external config as a list of `any`/`all`
//! groups of tag dictionaries. `any` groups match a place on ANY of their
//! dictionaries (one fragment each); `all` groups match only when every
//! dictionary applies (one combined fragment of chained predicates).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tag dictionary: key -> expected value.
///
/// Values are opaque config data with two conventions: `"*"` means key
/// presence, and a `~` prefix means a case-insensitive regex match.
pub type TagMap = BTreeMap<String, String>;

/// A single category matching rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagRule {
    /// Match any one of these tag dictionaries
    Any { any: Vec<TagMap> },
    /// Match all of these tag dictionaries together
    All { all: Vec<TagMap> },
}

/// Fallback filters for categories whose rules translate to nothing.
/// Presence checks on the broad POI keys; never leaves a category with
/// an empty filter list.
const DEFAULT_FILTER_KEYS: [&str; 4] = ["amenity", "shop", "tourism", "leisure"];

/// Render one tag dictionary as a chain of Overpass predicates.
///
/// Chained predicates are a logical AND: `["amenity"="cafe"]["cuisine"~"x",i]`.
fn render_tag_map(map: &TagMap) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if value == "*" {
            out.push_str(&format!("[\"{}\"]", escape(key)));
        } else if let Some(pattern) = value.strip_prefix('~') {
            out.push_str(&format!("[\"{}\"~\"{}\",i]", escape(key), escape(pattern)));
        } else {
            out.push_str(&format!("[\"{}\"=\"{}\"]", escape(key), escape(value)));
        }
    }
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Translate one category's rules into filter fragments.
///
/// For food-flagged categories every base fragment is AND-combined with
/// every relevance hint, multiplying the fragment count. That blow-up is
/// deliberate broad matching inherited from the category config; see
/// DESIGN.md before changing it.
pub fn translate_category(rules: &[TagRule], food: bool, food_hints: &[TagMap]) -> Vec<String> {
    let mut base: Vec<String> = Vec::new();

    for rule in rules {
        match rule {
            TagRule::Any { any } => {
                for map in any {
                    let fragment = render_tag_map(map);
                    if !fragment.is_empty() {
                        base.push(fragment);
                    }
                }
            }
            TagRule::All { all } => {
                let combined: String = all.iter().map(render_tag_map).collect();
                if !combined.is_empty() {
                    base.push(combined);
                }
            }
        }
    }

    if base.is_empty() {
        base = DEFAULT_FILTER_KEYS
            .iter()
            .map(|key| format!("[\"{}\"]", key))
            .collect();
    }

    if !food || food_hints.is_empty() {
        return base;
    }

    let hints: Vec<String> = food_hints
        .iter()
        .map(render_tag_map)
        .filter(|h| !h.is_empty())
        .collect();
    if hints.is_empty() {
        return base;
    }

    let mut combined = Vec::with_capacity(base.len() * hints.len());
    for fragment in &base {
        for hint in &hints {
            combined.push(format!("{}{}", fragment, hint));
        }
    }
    combined
}
