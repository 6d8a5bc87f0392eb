use std::collections::HashMap;
use std::fmt;

use newsloom_core::{AppError, ErrorKind};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STACK_TIMEOUT_SECONDS: u64 = 300;

/// Capability tags a stack can provide or require. Requirements name the
/// capability, never the providing stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
  Database,
  Auth,
  Search,
  Ai,
  Recap,
  Logging,
  Observability,
  Rag,
}

impl fmt::Display for Feature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Feature::Database => "database",
      Feature::Auth => "auth",
      Feature::Search => "search",
      Feature::Ai => "ai",
      Feature::Recap => "recap",
      Feature::Logging => "logging",
      Feature::Observability => "observability",
      Feature::Rag => "rag",
    };
    f.write_str(s)
  }
}

/// One named service group, as declared in the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
  pub name: String,
  pub description: String,
  pub compose_file: String,
  #[serde(default)]
  pub services: Vec<String>,
  #[serde(default)]
  pub depends_on: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub profile: Option<String>,
  #[serde(default)]
  pub optional: bool,
  #[serde(default)]
  pub requires_gpu: bool,
  #[serde(default = "default_timeout_seconds")]
  pub timeout_seconds: u64,
  #[serde(default)]
  pub provides: Vec<Feature>,
  #[serde(default)]
  pub requires_features: Vec<Feature>,
}

fn default_timeout_seconds() -> u64 {
  DEFAULT_STACK_TIMEOUT_SECONDS
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
  stacks: Vec<Stack>,
}

/// Immutable registry of stacks with pre-built adjacency.
///
/// Stacks are interned into indices; the forward and reverse edge sets are
/// plain index lists, each sorted by neighbor name so that every traversal
/// is deterministic without further bookkeeping.
#[derive(Debug)]
pub struct StackRegistry {
  stacks: Vec<Stack>,
  index: HashMap<String, usize>,
  forward: Vec<Vec<usize>>,
  reverse: Vec<Vec<usize>>,
}

impl StackRegistry {
  /// Validate names and edges and build adjacency. Cycle detection runs
  /// separately so the CLI can report a cycle instead of refusing to
  /// construct; [`StackRegistry::build`] is the everything-checked path.
  pub fn new(stacks: Vec<Stack>) -> Result<Self, AppError> {
    let mut index = HashMap::with_capacity(stacks.len());
    for (i, stack) in stacks.iter().enumerate() {
      if index.insert(stack.name.clone(), i).is_some() {
        return Err(
          AppError::config(format!("duplicate stack name {:?}", stack.name))
            .with_component("stack_registry"),
        );
      }
    }

    let mut forward: Vec<Vec<usize>> = vec![Vec::new(); stacks.len()];
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); stacks.len()];
    for (i, stack) in stacks.iter().enumerate() {
      for dep in &stack.depends_on {
        let Some(&j) = index.get(dep) else {
          return Err(
            AppError::config(format!(
              "stack {:?} depends on unregistered stack {:?}",
              stack.name, dep
            ))
            .with_component("stack_registry"),
          );
        };
        forward[i].push(j);
        reverse[j].push(i);
      }
    }

    // Lexicographic sibling order, fixed once here.
    for adjacency in forward.iter_mut().chain(reverse.iter_mut()) {
      adjacency.sort_by(|&a, &b| stacks[a].name.cmp(&stacks[b].name));
      adjacency.dedup();
    }

    Ok(Self {
      stacks,
      index,
      forward,
      reverse,
    })
  }

  /// Construct and refuse cyclic graphs, the default for services.
  pub fn build(stacks: Vec<Stack>) -> Result<Self, AppError> {
    let registry = Self::new(stacks)?;
    registry.detect_cycles()?;
    Ok(registry)
  }

  pub fn load_file(path: &std::path::Path) -> Result<Self, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
      AppError::wrap(
        ErrorKind::Config,
        format!("cannot read registry file {}", path.display()),
        e,
      )
    })?;
    let file: RegistryFile = serde_yaml::from_str(&raw).map_err(|e| {
      AppError::wrap(
        ErrorKind::Config,
        format!("malformed registry file {}", path.display()),
        e,
      )
    })?;
    Self::new(file.stacks)
  }

  pub fn len(&self) -> usize {
    self.stacks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stacks.is_empty()
  }

  pub fn stack(&self, idx: usize) -> &Stack {
    &self.stacks[idx]
  }

  pub fn stacks(&self) -> &[Stack] {
    &self.stacks
  }

  pub fn index_of(&self, name: &str) -> Result<usize, AppError> {
    self.index.get(name).copied().ok_or_else(|| {
      AppError::not_found(format!("unknown stack {name:?}"))
        .with_component("stack_registry")
    })
  }

  pub fn dependencies_of(&self, idx: usize) -> &[usize] {
    &self.forward[idx]
  }

  pub fn dependents_of(&self, idx: usize) -> &[usize] {
    &self.reverse[idx]
  }

  /// Stacks providing `feature`, sorted by name.
  pub fn providers_of(&self, feature: Feature) -> Vec<&Stack> {
    let mut providers: Vec<&Stack> = self
      .stacks
      .iter()
      .filter(|stack| stack.provides.contains(&feature))
      .collect();
    providers.sort_by(|a, b| a.name.cmp(&b.name));
    providers
  }

  /// Three-color DFS over every vertex. A gray-hit closes a cycle; the
  /// offending path is reported in `context["cycle"]`.
  pub fn detect_cycles(&self) -> Result<(), AppError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
      White,
      Gray,
      Black,
    }

    fn visit(
      registry: &StackRegistry,
      node: usize,
      colors: &mut [Color],
      path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
      colors[node] = Color::Gray;
      path.push(node);
      for &dep in registry.dependencies_of(node) {
        match colors[dep] {
          Color::Gray => {
            // Close the loop at the first repeat of `dep`.
            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
            let mut cycle: Vec<usize> = path[start..].to_vec();
            cycle.push(dep);
            return Some(cycle);
          }
          Color::White => {
            if let Some(cycle) = visit(registry, dep, colors, path) {
              return Some(cycle);
            }
          }
          Color::Black => {}
        }
      }
      path.pop();
      colors[node] = Color::Black;
      None
    }

    let mut colors = vec![Color::White; self.stacks.len()];
    let mut roots: Vec<usize> = (0..self.stacks.len()).collect();
    roots.sort_by(|&a, &b| self.stacks[a].name.cmp(&self.stacks[b].name));

    for root in roots {
      if colors[root] == Color::White {
        let mut path = Vec::new();
        if let Some(cycle) = visit(self, root, &mut colors, &mut path) {
          let rendered = cycle
            .iter()
            .map(|&n| self.stacks[n].name.as_str())
            .collect::<Vec<_>>()
            .join(" -> ");
          return Err(
            AppError::config(format!("dependency cycle: {rendered}"))
              .with_component("stack_registry")
              .with_context("cycle", rendered),
          );
        }
      }
    }
    Ok(())
  }
}

/// The platform's built-in service groups. A registry file overrides this
/// wholesale when the operator passes `--registry`.
pub fn default_registry() -> Vec<Stack> {
  fn stack(
    name: &str,
    description: &str,
    depends_on: &[&str],
    provides: &[Feature],
    requires_features: &[Feature],
  ) -> Stack {
    Stack {
      name: name.to_string(),
      description: description.to_string(),
      compose_file: format!("compose/{name}.yml"),
      services: Vec::new(),
      depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
      profile: None,
      optional: false,
      requires_gpu: false,
      timeout_seconds: DEFAULT_STACK_TIMEOUT_SECONDS,
      provides: provides.to_vec(),
      requires_features: requires_features.to_vec(),
    }
  }

  let mut stacks = vec![
    stack("base", "shared network and reverse proxy", &[], &[], &[]),
    stack("db", "primary postgres", &["base"], &[Feature::Database], &[]),
    stack(
      "search",
      "article search index",
      &["base"],
      &[Feature::Search],
      &[],
    ),
    stack(
      "auth",
      "identity gateway and kratos bridge",
      &["base", "db"],
      &[Feature::Auth],
      &[],
    ),
    stack(
      "gateway",
      "public api gateway",
      &["auth", "base", "db"],
      &[],
      &[Feature::Search],
    ),
    stack(
      "ingest",
      "feed ingestion workers and credential sidecar",
      &["base", "db"],
      &[],
      &[Feature::Auth],
    ),
    stack(
      "ai",
      "summarization and tagging workers",
      &["base", "db"],
      &[Feature::Ai, Feature::Rag],
      &[Feature::Search],
    ),
    stack(
      "recap",
      "daily recap generation",
      &["ai", "base", "db"],
      &[Feature::Recap],
      &[Feature::Ai],
    ),
    stack(
      "logging",
      "log pipeline",
      &["base"],
      &[Feature::Logging],
      &[],
    ),
    stack(
      "observability",
      "metrics and dashboards",
      &["base"],
      &[Feature::Observability],
      &[],
    ),
  ];

  for s in &mut stacks {
    match s.name.as_str() {
      "ai" => s.requires_gpu = true,
      "logging" | "observability" => s.optional = true,
      _ => {}
    }
  }
  stacks
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_registry_builds_clean() {
    let registry = StackRegistry::build(default_registry()).unwrap();
    assert!(!registry.is_empty());
    assert!(registry.index_of("gateway").is_ok());
    assert!(registry.index_of("nonexistent").is_err());
  }

  #[test]
  fn duplicate_names_are_rejected() {
    let mut stacks = default_registry();
    let dup = stacks[0].clone();
    stacks.push(dup);
    let err = StackRegistry::new(stacks).unwrap_err();
    assert!(err.is_kind(ErrorKind::Config));
  }

  #[test]
  fn dangling_dependency_is_rejected() {
    let mut stacks = default_registry();
    stacks[1].depends_on.push("ghost".to_string());
    let err = StackRegistry::new(stacks).unwrap_err();
    assert!(err.is_kind(ErrorKind::Config));
  }

  #[test]
  fn cycle_is_reported_with_its_path() {
    let mut stacks = default_registry();
    // base -> gateway closes a loop through auth/db.
    stacks[0].depends_on.push("gateway".to_string());
    let registry = StackRegistry::new(stacks).unwrap();
    let err = registry.detect_cycles().unwrap_err();
    assert!(err.is_kind(ErrorKind::Config));

    let cycle = err.context.get("cycle").unwrap();
    let nodes: Vec<&str> = cycle.split(" -> ").collect();
    assert!(nodes.len() >= 3);
    assert_eq!(nodes.first(), nodes.last());
    assert!(nodes.contains(&"base"));
  }

  #[test]
  fn yaml_registry_round_trip() {
    let yaml = r#"
stacks:
  - name: base
    description: network
    compose_file: compose/base.yml
  - name: db
    description: postgres
    compose_file: compose/db.yml
    depends_on: [base]
    provides: [database]
    timeout_seconds: 120
"#;
    let file: RegistryFile = serde_yaml::from_str(yaml).unwrap();
    let registry = StackRegistry::build(file.stacks).unwrap();
    let db = registry.stack(registry.index_of("db").unwrap());
    assert_eq!(db.provides, vec![Feature::Database]);
    assert_eq!(db.timeout_seconds, 120);
    let base = registry.stack(registry.index_of("base").unwrap());
    assert_eq!(base.timeout_seconds, DEFAULT_STACK_TIMEOUT_SECONDS);
  }
}
