use std::path::PathBuf;

use clap::{Parser, Subcommand};
use newsloom_core::observability::metrics::StackMetrics;
use newsloom_core::{AppError, ErrorKind};
use serde_json::json;

use crate::features::{check_missing_features, suggest_additional_stacks, FeatureWarning};
use crate::registry::{default_registry, Stack, StackRegistry};
use crate::resolver::{resolve, resolve_reverse, resolve_with_dependents};

pub const EXIT_OK: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_UNKNOWN_STACK: i32 = 2;
pub const EXIT_CYCLE: i32 = 3;
pub const EXIT_MISSING_FEATURE: i32 = 4;

/// Operator CLI for stack orchestration plans.
#[derive(Debug, Parser)]
#[command(name = "loomctl", about = "Compute start/stop plans over the platform's service stacks")]
pub struct Cli {
  /// Emit JSON instead of text.
  #[arg(long, global = true)]
  pub json: bool,

  /// Treat unsatisfied required features as an error (exit 4).
  #[arg(long, global = true)]
  pub strict: bool,

  /// Registry file overriding the built-in stack definitions.
  #[arg(long, global = true, value_name = "FILE")]
  pub registry: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Start plan: dependencies first.
  Resolve {
    #[arg(required = true)]
    stacks: Vec<String>,
  },
  /// Stop plan: dependents first.
  ResolveReverse {
    #[arg(required = true)]
    stacks: Vec<String>,
  },
  /// Start plan including every stack that depends on the requested ones.
  ResolveWithDependents {
    #[arg(required = true)]
    stacks: Vec<String>,
  },
  /// Report required features the selection does not provide.
  CheckFeatures {
    #[arg(required = true)]
    stacks: Vec<String>,
  },
  /// Stacks that would satisfy the selection's missing features.
  Suggest {
    #[arg(required = true)]
    stacks: Vec<String>,
  },
  /// Verify the registry's dependency graph is acyclic.
  DetectCycles,
  /// Print the registry.
  List,
}

pub fn run(cli: Cli) -> i32 {
  let registry = match load_registry(cli.registry.as_deref()) {
    Ok(registry) => registry,
    Err(e) => return fail(&e, cli.json),
  };

  // Every plan-producing command refuses a cyclic registry up front.
  if !matches!(cli.command, Command::DetectCycles) {
    if let Err(e) = registry.detect_cycles() {
      return fail(&e, cli.json);
    }
  }

  match &cli.command {
    Command::Resolve { stacks } => plan_command(&cli, &registry, stacks, resolve),
    Command::ResolveReverse { stacks } => plan_command(&cli, &registry, stacks, resolve_reverse),
    Command::ResolveWithDependents { stacks } => {
      plan_command(&cli, &registry, stacks, resolve_with_dependents)
    }
    Command::CheckFeatures { stacks } => check_features_command(&cli, &registry, stacks),
    Command::Suggest { stacks } => suggest_command(&cli, &registry, stacks),
    Command::DetectCycles => detect_cycles_command(&cli, &registry),
    Command::List => list_command(&cli, &registry),
  }
}

fn load_registry(path: Option<&std::path::Path>) -> Result<StackRegistry, AppError> {
  match path {
    Some(path) => StackRegistry::load_file(path),
    None => StackRegistry::new(default_registry()),
  }
}

type PlanFn = for<'a> fn(&'a StackRegistry, &[String]) -> Result<Vec<&'a Stack>, AppError>;

fn plan_command(cli: &Cli, registry: &StackRegistry, stacks: &[String], plan_fn: PlanFn) -> i32 {
  let plan = match plan_fn(registry, stacks) {
    Ok(plan) => plan,
    Err(e) => return fail(&e, cli.json),
  };

  // The stacks_running gauge tracks the size of the plan being acted on;
  // tooling embedding this as a library installs the recorder.
  StackMetrics::set_stacks_running(plan.len());

  let selection: Vec<String> = plan.iter().map(|s| s.name.clone()).collect();
  let warnings = match check_missing_features(registry, &selection) {
    Ok(warnings) => warnings,
    Err(e) => return fail(&e, cli.json),
  };

  if cli.json {
    println!(
      "{}",
      json!({
        "plan": plan,
        "warnings": warnings,
      })
    );
  } else {
    for (i, stack) in plan.iter().enumerate() {
      println!("{}. {} ({})", i + 1, stack.name, stack.compose_file);
    }
    print_warnings_text(&warnings);
  }

  if cli.strict && !warnings.is_empty() {
    return EXIT_MISSING_FEATURE;
  }
  EXIT_OK
}

fn check_features_command(cli: &Cli, registry: &StackRegistry, stacks: &[String]) -> i32 {
  let warnings = match check_missing_features(registry, stacks) {
    Ok(warnings) => warnings,
    Err(e) => return fail(&e, cli.json),
  };

  if cli.json {
    println!("{}", json!({ "warnings": warnings }));
  } else if warnings.is_empty() {
    println!("all required features are provided by the selection");
  } else {
    print_warnings_text(&warnings);
  }

  if cli.strict && !warnings.is_empty() {
    return EXIT_MISSING_FEATURE;
  }
  EXIT_OK
}

fn suggest_command(cli: &Cli, registry: &StackRegistry, stacks: &[String]) -> i32 {
  let suggestions = match suggest_additional_stacks(registry, stacks) {
    Ok(suggestions) => suggestions,
    Err(e) => return fail(&e, cli.json),
  };

  if cli.json {
    println!("{}", json!({ "suggestions": suggestions }));
  } else if suggestions.is_empty() {
    println!("nothing to add");
  } else {
    for name in &suggestions {
      println!("{name}");
    }
  }
  EXIT_OK
}

fn detect_cycles_command(cli: &Cli, registry: &StackRegistry) -> i32 {
  match registry.detect_cycles() {
    Ok(()) => {
      if cli.json {
        println!("{}", json!({ "status": "ok" }));
      } else {
        println!("no cycles detected");
      }
      EXIT_OK
    }
    Err(e) => fail(&e, cli.json),
  }
}

fn list_command(cli: &Cli, registry: &StackRegistry) -> i32 {
  if cli.json {
    println!("{}", json!({ "stacks": registry.stacks() }));
  } else {
    for stack in registry.stacks() {
      let deps = if stack.depends_on.is_empty() {
        "-".to_string()
      } else {
        stack.depends_on.join(", ")
      };
      println!("{:<16} deps: {:<32} {}", stack.name, deps, stack.description);
    }
  }
  EXIT_OK
}

fn print_warnings_text(warnings: &[FeatureWarning]) {
  for warning in warnings {
    eprintln!(
      "warning: {} requires feature '{}' which is not provided (provided by: {})",
      warning.stack,
      warning.missing_feature,
      warning.provided_by.join(", ")
    );
  }
}

fn fail(err: &AppError, as_json: bool) -> i32 {
  if as_json {
    println!(
      "{}",
      json!({
        "error": err.to_public(),
        "context": err.context,
      })
    );
  } else {
    eprintln!("error: {err}");
    if let Some(cycle) = err.context.get("cycle") {
      eprintln!("cycle: {cycle}");
    }
  }
  exit_code_for(err)
}

fn exit_code_for(err: &AppError) -> i32 {
  if err.is_kind(ErrorKind::NotFound) {
    EXIT_UNKNOWN_STACK
  } else if err.is_kind(ErrorKind::Config) && err.context.contains_key("cycle") {
    EXIT_CYCLE
  } else {
    EXIT_ERROR
  }
}
