use std::collections::BTreeSet;

use newsloom_core::AppError;

use crate::registry::{Stack, StackRegistry};

/// Forward execution plan: dependencies first, each stack exactly once,
/// stable across runs for the same registry and request. Sibling order is
/// lexicographic by stack name.
pub fn resolve<'a>(
  registry: &'a StackRegistry,
  requested: &[String],
) -> Result<Vec<&'a Stack>, AppError> {
  let roots = requested_indices(registry, requested)?;

  let mut visited = vec![false; registry.len()];
  let mut order = Vec::new();
  for root in roots {
    visit(registry, root, &mut visited, &mut order);
  }
  Ok(order.into_iter().map(|i| registry.stack(i)).collect())
}

/// Stop plan over the same vertex set as [`resolve`]: dependents first.
pub fn resolve_reverse<'a>(
  registry: &'a StackRegistry,
  requested: &[String],
) -> Result<Vec<&'a Stack>, AppError> {
  let mut plan = resolve(registry, requested)?;
  plan.reverse();
  Ok(plan)
}

/// Forward plan over the requested stacks plus everything that
/// (transitively) depends on any of them.
pub fn resolve_with_dependents<'a>(
  registry: &'a StackRegistry,
  requested: &[String],
) -> Result<Vec<&'a Stack>, AppError> {
  let roots = requested_indices(registry, requested)?;

  let mut selected: BTreeSet<usize> = BTreeSet::new();
  let mut pending: Vec<usize> = roots.into_iter().collect();
  while let Some(node) = pending.pop() {
    if !selected.insert(node) {
      continue;
    }
    pending.extend(registry.dependents_of(node).iter().copied());
  }

  let expanded: Vec<String> = selected
    .into_iter()
    .map(|i| registry.stack(i).name.clone())
    .collect();
  resolve(registry, &expanded)
}

/// Requested names mapped to indices, deduplicated, in lexicographic
/// order. Resolution is therefore idempotent under permutation of the
/// request.
fn requested_indices(
  registry: &StackRegistry,
  requested: &[String],
) -> Result<Vec<usize>, AppError> {
  let mut names: Vec<&String> = requested.iter().collect();
  names.sort();
  names.dedup();
  names.into_iter().map(|name| registry.index_of(name)).collect()
}

fn visit(registry: &StackRegistry, node: usize, visited: &mut [bool], order: &mut Vec<usize>) {
  if visited[node] {
    return;
  }
  visited[node] = true;
  for &dep in registry.dependencies_of(node) {
    visit(registry, dep, visited, order);
  }
  order.push(node);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::{Feature, StackRegistry, DEFAULT_STACK_TIMEOUT_SECONDS};

  fn stack(name: &str, depends_on: &[&str]) -> Stack {
    Stack {
      name: name.to_string(),
      description: String::new(),
      compose_file: format!("compose/{name}.yml"),
      services: Vec::new(),
      depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
      profile: None,
      optional: false,
      requires_gpu: false,
      timeout_seconds: DEFAULT_STACK_TIMEOUT_SECONDS,
      provides: Vec::new(),
      requires_features: Vec::new(),
    }
  }

  /// The registry from the platform's own deployment: core requires the
  /// search feature, workers provide it.
  fn scenario_registry() -> StackRegistry {
    let mut core = stack("core", &["base", "db", "auth"]);
    core.requires_features = vec![Feature::Search];
    let mut workers = stack("workers", &["base", "db", "core"]);
    workers.provides = vec![Feature::Search];

    StackRegistry::build(vec![
      stack("base", &[]),
      stack("db", &["base"]),
      stack("auth", &["base"]),
      core,
      workers,
    ])
    .unwrap()
  }

  fn names(plan: &[&Stack]) -> Vec<String> {
    plan.iter().map(|s| s.name.clone()).collect()
  }

  #[test]
  fn resolve_orders_dependencies_first_with_lexicographic_ties() {
    let registry = scenario_registry();
    let plan = resolve(&registry, &["core".to_string()]).unwrap();
    assert_eq!(names(&plan), vec!["base", "auth", "db", "core"]);
  }

  #[test]
  fn every_dependency_precedes_its_dependent() {
    let registry = scenario_registry();
    let plan = resolve(&registry, &["workers".to_string()]).unwrap();
    let position = |name: &str| names(&plan).iter().position(|n| n == name).unwrap();
    for stack in &plan {
      for dep in &stack.depends_on {
        assert!(
          position(dep) < position(&stack.name),
          "{dep} must precede {}",
          stack.name
        );
      }
    }
    // Each stack exactly once.
    let mut seen = names(&plan);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), plan.len());
  }

  #[test]
  fn resolve_is_order_idempotent() {
    let registry = scenario_registry();
    let a = names(&resolve(&registry, &["core".into(), "workers".into()]).unwrap());
    let b = names(&resolve(&registry, &["workers".into(), "core".into()]).unwrap());
    assert_eq!(a, b);
  }

  #[test]
  fn resolve_reverse_is_the_reverse_of_resolve() {
    let registry = scenario_registry();
    let request = vec!["core".to_string()];
    let mut forward = names(&resolve(&registry, &request).unwrap());
    let backward = names(&resolve_reverse(&registry, &request).unwrap());
    forward.reverse();
    assert_eq!(forward, backward);
  }

  #[test]
  fn resolve_with_dependents_pulls_in_transitive_dependents() {
    let registry = scenario_registry();
    // workers depends on core; stopping db without stopping workers and
    // core first would strand them.
    let plan = names(&resolve_with_dependents(&registry, &["db".to_string()]).unwrap());
    assert!(plan.contains(&"workers".to_string()));
    assert!(plan.contains(&"core".to_string()));
    assert!(plan.contains(&"db".to_string()));
  }

  #[test]
  fn unknown_stack_is_not_found() {
    let registry = scenario_registry();
    let err = resolve(&registry, &["warp-drive".to_string()]).unwrap_err();
    assert!(err.is_kind(newsloom_core::ErrorKind::NotFound));
  }

  #[test]
  fn duplicate_requests_resolve_once() {
    let registry = scenario_registry();
    let plan = names(&resolve(&registry, &["core".into(), "core".into()]).unwrap());
    assert_eq!(plan, vec!["base", "auth", "db", "core"]);
  }
}
