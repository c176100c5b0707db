//! Path-addressed patching of sanitized trees
//!
//! A [`HydrationPayload`] maps field paths such as `raw.contacts.top_sent_to`
//! to the values they held before sanitization. [`apply_hydration`] copies a
//! sanitized baseline and writes each payload entry back at its path, using
//! the merge rule registered for the final field name. The baseline itself is
//! never touched.
//!
//! Path grammar: `.name` steps address map properties (a missing or null
//! intermediate becomes an empty map) and `[n]` steps address list elements
//! (a non-list or an out-of-range index abandons the whole path). Paths that
//! do not resolve are skipped, never reported as failures.

use crate::tree::{render_path, PathStep, StatTree};
use crate::types::{HydrationPayload, SanitizedTree};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// A hydration path that could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("unclosed '[' in path '{0}'")]
    UnclosedBracket(String),

    #[error("invalid index '{index}' in path '{path}'")]
    InvalidIndex { path: String, index: String },
}

/// Parse `a.b[2].c` into steps; a single leading dot is ignored
pub fn parse_path(path: &str) -> Result<Vec<PathStep>, PathError> {
    let clean = path.strip_prefix('.').unwrap_or(path);
    let mut steps = Vec::new();
    let mut key = String::new();
    let mut chars = clean.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    steps.push(PathStep::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    steps.push(PathStep::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                let mut closed = false;
                for d in chars.by_ref() {
                    if d == ']' {
                        closed = true;
                        break;
                    }
                    digits.push(d);
                }
                if !closed {
                    return Err(PathError::UnclosedBracket(path.to_string()));
                }
                let index = digits
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| PathError::InvalidIndex {
                        path: path.to_string(),
                        index: digits.clone(),
                    })?;
                steps.push(PathStep::Index(index));
            }
            other => key.push(other),
        }
    }
    if !key.is_empty() {
        steps.push(PathStep::Key(key));
    }

    if steps.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(steps)
}

/// How a payload value is written into the field it targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Overwrite the destination value entirely
    FullReplace,
    /// Merge list elements selected by `key_field`, touching only
    /// `merged_subfields` of each matching element
    IndexKeyedMerge {
        key_field: &'static str,
        merged_subfields: &'static [&'static str],
    },
}

const MERGE_TABLE: &[(&str, MergeRule)] = &[
    ("top_sent_to", MergeRule::FullReplace),
    ("top_received_from", MergeRule::FullReplace),
    (
        "message_distribution",
        MergeRule::IndexKeyedMerge {
            key_field: "index",
            merged_subfields: &["contact_name", "contact_id"],
        },
    ),
    ("examples", MergeRule::FullReplace),
    ("examples_them", MergeRule::FullReplace),
    ("weekday_mvp", MergeRule::FullReplace),
    ("weekend_mvp", MergeRule::FullReplace),
    ("longest_streak_contact", MergeRule::FullReplace),
    ("top_left_unread", MergeRule::FullReplace),
    ("top_left_you_hanging", MergeRule::FullReplace),
];

/// Merge rule for a field name; unknown fields are replaced wholesale
pub fn merge_rule_for(field: &str) -> MergeRule {
    MERGE_TABLE
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, rule)| *rule)
        .unwrap_or(MergeRule::FullReplace)
}

/// Paths captured by default when a submitter opts into contact reveal
pub const DEFAULT_CAPTURE_PATHS: &[&str] = &[
    "raw.contacts.top_sent_to",
    "raw.contacts.top_received_from",
    "raw.contacts.message_distribution",
    "raw.cliffhangers.examples",
    "raw.cliffhangers.examples_them",
    "raw.temporal.weekday_mvp",
    "raw.temporal.weekend_mvp",
    "raw.streaks.longest_streak_contact",
    "raw.ghosts.top_left_unread",
    "raw.ghosts.top_left_you_hanging",
];

/// Produce a revealed copy of `baseline` with every payload entry applied
pub fn apply_hydration(baseline: &SanitizedTree, payload: &HydrationPayload) -> StatTree {
    let mut revealed = baseline.as_tree().clone();
    let mut applied = 0usize;

    for (path, value) in payload.iter() {
        match parse_path(path) {
            Ok(steps) => {
                if apply_at(&mut revealed, &steps, value) {
                    applied += 1;
                } else {
                    debug!("Hydration path did not resolve, skipping: {}", path);
                }
            }
            Err(e) => warn!("Skipping malformed hydration path: {}", e),
        }
    }

    debug!("Applied {}/{} hydration entries", applied, payload.len());
    revealed
}

fn apply_at(root: &mut StatTree, steps: &[PathStep], value: &StatTree) -> bool {
    let Some((last, parents)) = steps.split_last() else {
        return false;
    };

    let mut current = root;
    for step in parents {
        current = match (step, current) {
            (PathStep::Key(key), StatTree::Map(map)) => {
                let child = map.entry(key.clone()).or_insert(StatTree::Null);
                if child.is_null() {
                    *child = StatTree::empty_map();
                }
                child
            }
            (PathStep::Index(index), StatTree::List(items)) => match items.get_mut(*index) {
                Some(item) if !item.is_null() => item,
                _ => return false,
            },
            _ => return false,
        };
    }

    match (last, current) {
        (PathStep::Key(key), StatTree::Map(map)) => match merge_rule_for(key) {
            MergeRule::FullReplace => {
                map.insert(key.clone(), value.clone());
                true
            }
            MergeRule::IndexKeyedMerge {
                key_field,
                merged_subfields,
            } => match (value.as_list(), map.get_mut(key).and_then(StatTree::as_list_mut)) {
                (Some(entries), Some(destination)) => {
                    merge_by_index(destination, entries, key_field, merged_subfields);
                    true
                }
                _ => false,
            },
        },
        (PathStep::Index(index), StatTree::List(items)) => match items.get_mut(*index) {
            Some(slot) => {
                *slot = value.clone();
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn merge_by_index(
    destination: &mut [StatTree],
    entries: &[StatTree],
    key_field: &str,
    merged_subfields: &[&str],
) {
    for entry in entries {
        let Some(index) = entry.get(key_field).and_then(as_index) else {
            continue;
        };
        let Some(target) = destination.get_mut(index).and_then(StatTree::as_map_mut) else {
            continue;
        };
        for field in merged_subfields {
            if let Some(value) = entry.get(field).filter(|v| !v.is_null()) {
                target.insert(field.to_string(), value.clone());
            }
        }
    }
}

fn as_index(node: &StatTree) -> Option<usize> {
    node.as_f64()
        .filter(|n| *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as usize)
}

fn resolve<'a>(root: &'a StatTree, steps: &[PathStep]) -> Option<&'a StatTree> {
    steps.iter().try_fold(root, |node, step| match step {
        PathStep::Key(key) => node.get(key),
        PathStep::Index(index) => node.as_list().and_then(|items| items.get(*index)),
    })
}

/// Build a hydration payload from a raw (unsanitized) tree
///
/// Each path that resolves in `raw` is captured. Fields merged by index
/// are captured as `{index, <subfields>}` entries so that applying the
/// payload restores only those subfields.
pub fn capture_hydration(raw: &StatTree, paths: &[&str]) -> HydrationPayload {
    let mut payload = HydrationPayload::new();

    for path in paths {
        let Ok(steps) = parse_path(path) else {
            warn!("Not capturing malformed hydration path: {}", path);
            continue;
        };
        let Some(value) = resolve(raw, &steps) else {
            continue;
        };

        let rule = match steps.last() {
            Some(PathStep::Key(key)) => merge_rule_for(key),
            _ => MergeRule::FullReplace,
        };
        let captured = match (rule, value.as_list()) {
            (
                MergeRule::IndexKeyedMerge {
                    key_field,
                    merged_subfields,
                },
                Some(items),
            ) => StatTree::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let mut entry = BTreeMap::new();
                        entry.insert(key_field.to_string(), StatTree::Number(index as f64));
                        for field in merged_subfields {
                            if let Some(v) = item.get(field) {
                                entry.insert(field.to_string(), v.clone());
                            }
                        }
                        StatTree::Map(entry)
                    })
                    .collect(),
            ),
            _ => value.clone(),
        };

        payload.insert(render_path(&steps), captured);
    }

    payload
}
