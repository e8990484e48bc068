//! # Requirement Checklist
//!
//! Per stage visit, a mapping from requirement key to completion.
//!
//! Checklists are informational: an incomplete checklist never blocks
//! `advance`. Only keys the registry defines for the visit's stage and the
//! project's type are accepted.

use crate::registry::RequirementDefinition;
use crate::{FieldKey, PipelineError, StageId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Completion flags of one stage visit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentChecklist(BTreeMap<FieldKey, bool>);

impl DocumentChecklist {
    /// Create an empty checklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion flag for a key; unset keys read as `false`.
    #[must_use]
    pub fn is_checked(&self, key: &FieldKey) -> bool {
        self.0.get(key).copied().unwrap_or(false)
    }

    /// Iterate over recorded flags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, bool)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    /// Merge a patch after validating every key against `requirements`.
    ///
    /// The patch is applied all-or-nothing: one unknown key rejects it whole.
    pub fn apply_patch(
        &mut self,
        stage: StageId,
        patch: &BTreeMap<String, bool>,
        requirements: &[&RequirementDefinition],
    ) -> Result<(), PipelineError> {
        let mut validated = Vec::with_capacity(patch.len());
        for (raw, checked) in patch {
            let known = FieldKey::parse(raw)
                .ok()
                .filter(|key| requirements.iter().any(|r| &r.field_key == key));
            match known {
                Some(key) => validated.push((key, *checked)),
                None => {
                    return Err(PipelineError::UnknownFieldKey {
                        stage,
                        key: raw.clone(),
                    });
                }
            }
        }
        self.0.extend(validated);
        Ok(())
    }

    /// Completion summary against the applicable requirements.
    #[must_use]
    pub fn status(&self, requirements: &[&RequirementDefinition]) -> ChecklistStatus {
        let missing: Vec<FieldKey> = requirements
            .iter()
            .filter(|r| !self.is_checked(&r.field_key))
            .map(|r| r.field_key.clone())
            .collect();
        ChecklistStatus {
            total: requirements.len(),
            completed: requirements.len() - missing.len(),
            missing,
        }
    }
}

/// How far a stage visit's checklist is from complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistStatus {
    pub total: usize,
    pub completed: usize,
    /// Keys still unchecked, in key order.
    pub missing: Vec<FieldKey>,
}

impl ChecklistStatus {
    /// True when every applicable requirement is checked.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}
