use std::collections::BTreeSet;

use newsloom_core::AppError;
use serde::Serialize;

use crate::registry::{Feature, StackRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
  Warning,
}

/// A stack in the selection whose required feature no selected stack
/// provides. Not a plan failure: the operator may knowingly start a
/// partial system.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureWarning {
  pub stack: String,
  pub missing_feature: Feature,
  pub provided_by: Vec<String>,
  pub severity: WarningSeverity,
}

/// Post-pass over a selection: which `requires_features` are unsatisfied
/// by the union of `provides` within the same selection.
pub fn check_missing_features(
  registry: &StackRegistry,
  selected: &[String],
) -> Result<Vec<FeatureWarning>, AppError> {
  let indices: Vec<usize> = {
    let mut names: Vec<&String> = selected.iter().collect();
    names.sort();
    names.dedup();
    names
      .into_iter()
      .map(|name| registry.index_of(name))
      .collect::<Result<_, _>>()?
  };

  let provided: BTreeSet<Feature> = indices
    .iter()
    .flat_map(|&i| registry.stack(i).provides.iter().copied())
    .collect();

  let mut warnings = Vec::new();
  for &i in &indices {
    let stack = registry.stack(i);
    for &feature in &stack.requires_features {
      if !provided.contains(&feature) {
        warnings.push(FeatureWarning {
          stack: stack.name.clone(),
          missing_feature: feature,
          provided_by: registry
            .providers_of(feature)
            .into_iter()
            .map(|s| s.name.clone())
            .collect(),
          severity: WarningSeverity::Warning,
        });
      }
    }
  }
  Ok(warnings)
}

/// Stacks that would resolve the warnings for `selected`: for each missing
/// feature, the first provider by name that is not already selected.
pub fn suggest_additional_stacks(
  registry: &StackRegistry,
  selected: &[String],
) -> Result<Vec<String>, AppError> {
  let warnings = check_missing_features(registry, selected)?;
  let already: BTreeSet<&String> = selected.iter().collect();

  let mut suggestions = BTreeSet::new();
  for warning in &warnings {
    if let Some(provider) = warning
      .provided_by
      .iter()
      .find(|name| !already.contains(name))
    {
      suggestions.insert(provider.clone());
    }
  }
  Ok(suggestions.into_iter().collect())
}
