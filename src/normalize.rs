//! Input normalization for a curation session.
//!
//! Turns caller seeds into a complete `CurationState` with one grounding per
//! longform. All validation happens here so a bad seed is rejected before
//! any directory, worker, or browser is touched.
use crate::model::{CurationState, Grounding, GroundingMap, NamesMap, PositiveLabels};
use std::collections::{BTreeMap, BTreeSet};

/// Rejected caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "keys in names map must be groundings present in the grounding map (unknown: {})",
        format_keys(.keys)
    )]
    UnknownNameKeys { keys: Vec<String> },
}

fn format_keys(keys: &[String]) -> String {
    keys.iter()
        .map(|key| format!("{key:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the initial curation state for `longforms`.
///
/// Without a seed grounding map every longform starts ungrounded and any
/// supplied names or positive labels are dropped. With a seed, longforms
/// missing from it (or seeded with `""`) start ungrounded, and names are
/// resolved per assigned grounding.
pub fn normalize(
    longforms: &[String],
    grounding_map: Option<&BTreeMap<String, String>>,
    names: Option<&BTreeMap<String, String>>,
    pos_labels: Option<&[String]>,
) -> Result<CurationState, ValidationError> {
    let Some(seed) = grounding_map else {
        if names.is_some() || pos_labels.is_some() {
            tracing::debug!("no seed grounding map; ignoring supplied names and positive labels");
        }
        return Ok(CurationState {
            grounding_map: longforms
                .iter()
                .map(|longform| (longform.clone(), Grounding::Ungrounded))
                .collect(),
            names: NamesMap::new(),
            pos_labels: PositiveLabels::new(),
        });
    };

    if let Some(names) = names {
        let unknown = unknown_keys(
            names.keys().map(String::as_str),
            seed.values().map(String::as_str),
        );
        if !unknown.is_empty() {
            return Err(ValidationError::UnknownNameKeys { keys: unknown });
        }
    }

    let grounding_map: GroundingMap = longforms
        .iter()
        .map(|longform| {
            let grounding = seed
                .get(longform)
                .map(|raw| Grounding::new(raw.as_str()))
                .unwrap_or_default();
            (longform.clone(), grounding)
        })
        .collect();

    let seed_names = names;
    let names: NamesMap = grounding_map
        .values()
        .map(|grounding| {
            let name = match (grounding, seed_names) {
                (Grounding::Assigned(id), Some(seed_names)) => seed_names
                    .get(id)
                    .filter(|name| !name.is_empty())
                    .cloned()
                    .unwrap_or_default(),
                _ => String::new(),
            };
            (grounding.clone(), name)
        })
        .collect();

    let pos_labels: PositiveLabels = pos_labels
        .map(|labels| labels.iter().cloned().collect())
        .unwrap_or_default();

    let state = CurationState {
        grounding_map,
        names,
        pos_labels,
    };
    check_names_subset(&state.grounding_map, &state.names)?;
    warn_on_unassigned_labels(&state);
    Ok(state)
}

/// Check that every names key is a grounding assigned to some longform.
pub fn check_names_subset(
    grounding_map: &GroundingMap,
    names: &NamesMap,
) -> Result<(), ValidationError> {
    let unknown = unknown_keys(
        names.keys().map(Grounding::as_str),
        grounding_map.values().map(Grounding::as_str),
    );
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::UnknownNameKeys { keys: unknown })
    }
}

fn unknown_keys<'a>(
    keys: impl Iterator<Item = &'a str>,
    values: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let values: BTreeSet<&str> = values.collect();
    let unknown: BTreeSet<&str> = keys.filter(|key| !values.contains(key)).collect();
    unknown.into_iter().map(str::to_string).collect()
}

fn warn_on_unassigned_labels(state: &CurationState) {
    let assigned = state.assigned_groundings();
    for label in &state.pos_labels {
        if !assigned.contains(&Grounding::new(label.as_str())) {
            tracing::warn!(label = %label, "positive label is not assigned to any longform");
        }
    }
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
