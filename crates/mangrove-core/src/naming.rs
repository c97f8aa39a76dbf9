//! Output name sanitisation and composition.
//!
//! Names are built as `{prefix}_{value}_{suffix}` from a sanitised attribute
//! value. Distinct raw values can sanitise to the same string ("GMW 01" and
//! "GMW-01" with dashes and spaces replaced, or "a.b" and "ab" with
//! punctuation removed), so names are always resolved for the complete set of
//! values at once and colliding values are disambiguated with a stable hash.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which character classes are stripped or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizeRules {
    pub remove_non_ascii: bool,
    /// Replace `-` with `_`.
    pub replace_dashes: bool,
    /// Replace ` ` with `_`.
    pub replace_spaces: bool,
    /// Remove ASCII punctuation other than `_` and `-`.
    pub remove_punctuation: bool,
}

impl SanitizeRules {
    /// Rules used for project subsets: dashes survive, spaces become `_`.
    pub const PROJECT: SanitizeRules = SanitizeRules {
        remove_non_ascii: true,
        replace_dashes: false,
        replace_spaces: true,
        remove_punctuation: true,
    };

    /// Rules used for attribute-split layers: dashes become `_`, spaces survive.
    pub const LAYER: SanitizeRules = SanitizeRules {
        remove_non_ascii: true,
        replace_dashes: true,
        replace_spaces: false,
        remove_punctuation: true,
    };
}

pub fn sanitize(value: &str, rules: SanitizeRules) -> String {
    value
        .chars()
        .filter(|c| !(rules.remove_non_ascii && !c.is_ascii()))
        .filter_map(|c| match c {
            '-' if rules.replace_dashes => Some('_'),
            ' ' if rules.replace_spaces => Some('_'),
            '_' | '-' => Some(c),
            c if rules.remove_punctuation && c.is_ascii_punctuation() => None,
            c => Some(c),
        })
        .collect()
}

/// Composes and sanitises output names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePolicy {
    pub prefix: String,
    pub suffix: String,
    pub rules: SanitizeRules,
    pub lowercase: bool,
    /// Apply `rules` to the whole composed name instead of the value alone.
    pub sanitize_composed: bool,
}

impl NamePolicy {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>, rules: SanitizeRules) -> Self {
        Self {
            prefix: prefix.into(),
            suffix: suffix.into(),
            rules,
            lowercase: false,
            sanitize_composed: false,
        }
    }

    pub fn lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    pub fn sanitize_composed(mut self, on: bool) -> Self {
        self.sanitize_composed = on;
        self
    }

    /// Name for a single value, without collision handling.
    pub fn name(&self, value: &str) -> String {
        let name = if self.sanitize_composed {
            sanitize(&compose(&self.prefix, value, &self.suffix), self.rules)
        } else {
            compose(&self.prefix, &sanitize(value, self.rules), &self.suffix)
        };
        if self.lowercase { name.to_lowercase() } else { name }
    }

    /// Names for a complete set of values. Values whose names collide all
    /// receive a `_x{hash}` suffix derived from the raw value, so the mapping
    /// is deterministic for a given value set and injective.
    pub fn resolve<'a>(&self, values: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
        let mut by_name: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for v in values {
            let entry = by_name.entry(self.name(v)).or_default();
            if !entry.contains(&v) {
                entry.push(v);
            }
        }
        let mut out = BTreeMap::new();
        for (name, raws) in by_name {
            if raws.len() == 1 {
                out.insert(raws[0].to_string(), name);
            } else {
                log::warn!("name collision on '{}' between {:?}, disambiguating", name, raws);
                for raw in raws {
                    out.insert(raw.to_string(), format!("{name}_x{:08x}", fnv1a(raw) as u32));
                }
            }
        }
        out
    }
}

fn compose(prefix: &str, value: &str, suffix: &str) -> String {
    let mut s = String::with_capacity(prefix.len() + value.len() + suffix.len() + 2);
    if !prefix.is_empty() {
        s.push_str(prefix);
        s.push('_');
    }
    s.push_str(value);
    if !suffix.is_empty() {
        s.push('_');
        s.push_str(suffix);
    }
    s
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3))
}
