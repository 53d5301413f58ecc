//! Diff engine for comparing desired vs deployed stack inputs.
//!
//! The deployer uses this to decide whether an update would change
//! anything, and the CLI prints the details before asking for confirmation.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::cloud::StackDescription;
use crate::config::ConfigHasher;

/// Engine for computing stack diffs.
#[derive(Debug, Default)]
pub struct DiffEngine {
    hasher: ConfigHasher,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    /// The stack does not exist yet.
    Create,
    /// Parameters or tags differ.
    Update,
    /// Nothing to do.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffDetail {
    /// `parameter.<Key>` or `tag.<Key>`.
    pub field: String,
    /// Deployed value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
}

/// Complete diff for one stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackDiff {
    /// Stack name.
    pub stack_name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Per-field differences.
    pub details: Vec<DiffDetail>,
    /// Fingerprint of the deployed inputs.
    pub old_hash: Option<String>,
    /// Fingerprint of the desired inputs.
    pub new_hash: String,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Compares desired parameters and tags with the deployed stack.
    ///
    /// Only keys present in the desired sets are compared; extra parameters
    /// the template declares with defaults, and tags added by the platform,
    /// are not considered drift.
    #[must_use]
    pub fn compute_diff(
        &self,
        stack_name: &str,
        parameters: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
        deployed: Option<&StackDescription>,
    ) -> StackDiff {
        let new_hash = self.hasher.hash_stack_inputs(parameters, tags);

        let Some(deployed) = deployed else {
            debug!("Stack {stack_name} needs to be created");
            let details = parameters
                .iter()
                .map(|(k, v)| DiffDetail {
                    field: format!("parameter.{k}"),
                    old_value: None,
                    new_value: Some(v.clone()),
                })
                .collect();

            return StackDiff {
                stack_name: stack_name.to_string(),
                diff_type: DiffType::Create,
                details,
                old_hash: None,
                new_hash,
            };
        };

        let deployed_params = restrict(&deployed.parameters, parameters);
        let deployed_tags = restrict(&deployed.tags, tags);
        let old_hash = self.hasher.hash_stack_inputs(&deployed_params, &deployed_tags);

        if ConfigHasher::hashes_match(&old_hash, &new_hash) {
            debug!("Stack {stack_name} is up to date ({})", self.hasher.short_hash(&new_hash));
            return StackDiff {
                stack_name: stack_name.to_string(),
                diff_type: DiffType::NoChange,
                details: Vec::new(),
                old_hash: Some(old_hash),
                new_hash,
            };
        }

        let mut details = Self::compare("parameter", &deployed.parameters, parameters);
        details.extend(Self::compare("tag", &deployed.tags, tags));

        debug!("Stack {stack_name} differs in {} field(s)", details.len());
        StackDiff {
            stack_name: stack_name.to_string(),
            diff_type: DiffType::Update,
            details,
            old_hash: Some(old_hash),
            new_hash,
        }
    }

    fn compare(
        kind: &str,
        deployed: &BTreeMap<String, String>,
        desired: &BTreeMap<String, String>,
    ) -> Vec<DiffDetail> {
        let keys: BTreeSet<&String> = desired.keys().collect();

        keys.into_iter()
            .filter_map(|key| {
                let old = deployed.get(key);
                let new = desired.get(key);
                (old != new).then(|| DiffDetail {
                    field: format!("{kind}.{key}"),
                    old_value: old.cloned(),
                    new_value: new.cloned(),
                })
            })
            .collect()
    }
}

fn restrict(
    source: &BTreeMap<String, String>,
    keys: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    source
        .iter()
        .filter(|(k, _)| keys.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl StackDiff {
    /// Returns true if applying this diff would change something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.diff_type != DiffType::NoChange
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            self.old_value.as_deref().unwrap_or("(none)"),
            self.new_value.as_deref().unwrap_or("(none)")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn deployed(params: &[(&str, &str)], tags: &[(&str, &str)]) -> StackDescription {
        StackDescription {
            name: String::from("llm-testgen-dev"),
            raw_status: String::from("CREATE_COMPLETE"),
            parameters: map(params),
            tags: map(tags),
            ..StackDescription::default()
        }
    }

    #[test]
    fn test_missing_stack_is_create() {
        let diff = DiffEngine::new().compute_diff(
            "llm-testgen-dev",
            &map(&[("InstanceCount", "2")]),
            &map(&[("Project", "llm-testgen")]),
            None,
        );
        assert_eq!(diff.diff_type, DiffType::Create);
        assert!(diff.has_changes());
        assert_eq!(diff.details.len(), 1);
    }

    #[test]
    fn test_identical_inputs_are_no_change() {
        let params = map(&[("InstanceCount", "2"), ("AutoStop", "true")]);
        let tags = map(&[("Project", "llm-testgen")]);
        let stack = deployed(
            &[("InstanceCount", "2"), ("AutoStop", "true"), ("VpcCidr", "10.0.0.0/16")],
            &[("Project", "llm-testgen"), ("aws:cloudformation:stack-name", "x")],
        );

        let diff = DiffEngine::new().compute_diff("llm-testgen-dev", &params, &tags, Some(&stack));
        assert_eq!(diff.diff_type, DiffType::NoChange);
        assert!(diff.details.is_empty());
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_changed_parameter_and_tag_are_reported() {
        let params = map(&[("InstanceCount", "4")]);
        let tags = map(&[("AutoStop", "false")]);
        let stack = deployed(&[("InstanceCount", "2")], &[("AutoStop", "true")]);

        let diff = DiffEngine::new().compute_diff("llm-testgen-dev", &params, &tags, Some(&stack));
        assert_eq!(diff.diff_type, DiffType::Update);
        assert_eq!(diff.details.len(), 2);
        assert_eq!(diff.details[0].field, "parameter.InstanceCount");
        assert_eq!(diff.details[0].old_value.as_deref(), Some("2"));
        assert_eq!(diff.details[1].to_string(), "tag.AutoStop: true -> false");
    }
}
