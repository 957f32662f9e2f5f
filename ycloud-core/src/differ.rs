//! Differ - Compare desired configuration with recorded state
//!
//! Produces the changed-field set the CRUD lifecycle turns into a partial
//! update, and the plan classification the host asks for at plan time.

use std::collections::BTreeSet;

use crate::resource::{Attributes, Resource, State};
use crate::schema::{Mode, ResourceSchema};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create,
    /// Resource exists with differences that can be applied in place
    Update { changed: Vec<String> },
    /// A changed attribute cannot be updated in place -> destroy and recreate
    Replace { attributes: Vec<String> },
    /// Resource exists with no differences -> no action needed
    NoChange,
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange)
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(schema: &ResourceSchema, desired: &Resource, current: &State) -> Diff {
    if !current.exists {
        return Diff::Create;
    }

    let mut attributes = desired.attributes.clone();
    schema.apply_defaults(&mut attributes);
    let changed = changed_attributes(schema, &attributes, &current.attributes);
    if changed.is_empty() {
        return Diff::NoChange;
    }

    let force_new = schema.force_new_attributes();
    let forcing: Vec<String> = changed
        .iter()
        .filter(|name| force_new.contains(&name.as_str()))
        .cloned()
        .collect();

    if forcing.is_empty() {
        Diff::Update { changed }
    } else {
        Diff::Replace {
            attributes: forcing,
        }
    }
}

/// Configurable attributes whose desired value differs from the recorded one
///
/// Removing an optional attribute from configuration counts as a change.
/// Attributes the server may fill in (optional+computed) only change when
/// configuration sets them.
pub fn changed_attributes(
    schema: &ResourceSchema,
    desired: &Attributes,
    current: &Attributes,
) -> Vec<String> {
    let keys: BTreeSet<&String> = desired.keys().chain(current.keys()).collect();
    let mut changed = Vec::new();

    for key in keys {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }
        let Some(attr) = schema.attributes.get(key.as_str()) else {
            continue;
        };
        if !attr.is_configurable() {
            continue;
        }

        match (desired.get(key), current.get(key)) {
            (Some(d), Some(c)) if attr.values_equal(d, c) => {}
            (None, Some(_)) if attr.mode == Mode::OptionalComputed => {}
            (None, Some(v)) | (Some(v), None) if v.is_blank() => {}
            (None, None) => {}
            _ => changed.push(key.clone()),
        }
    }

    changed
}
