//! Policy Engine (spec component 4): a live-reloadable rule program
//! evaluated against a typed pull-request context.
//!
//! The rule language itself has no teacher precedent; the hot-swap
//! concurrency shape (writers exclusive, readers shared, an in-flight
//! evaluation never interrupted by an update) follows the `RwLock`-guarded
//! state pattern used throughout the storage/cache layers this registry is
//! grounded on.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Input to a single policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    pub repository: String,
    pub tag: String,
    pub user: String,
    pub environment: String,
    pub vulnerabilities: VulnerabilityCounts,
    pub is_signed: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VulnerabilityCounts {
    pub critical: i64,
    pub high: i64,
}

#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub allow: bool,
    pub violations: Vec<String>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        PolicyDecision {
            allow: true,
            violations: Vec::new(),
        }
    }

    pub fn message(&self) -> String {
        self.violations.join("; ")
    }
}

/// A single rule in the compiled program: deny if the condition holds.
#[derive(Debug, Clone)]
enum Rule {
    /// Deny pulls when `critical vulnerability count > threshold` and the
    /// request's environment matches `environment`.
    MaxCritical { threshold: i64, environment: String },
    /// Deny pulls when `high vulnerability count > threshold` and the
    /// request's environment matches `environment`.
    MaxHigh { threshold: i64, environment: String },
    /// Deny unsigned pulls in the given environment.
    RequireSignature { environment: String },
}

impl Rule {
    fn evaluate(&self, input: &PolicyInput) -> Option<String> {
        match self {
            Rule::MaxCritical { threshold, environment } => {
                if &input.environment == environment && input.vulnerabilities.critical > *threshold {
                    Some(format!(
                        "critical vulnerabilities ({}) exceed threshold ({}) in {}",
                        input.vulnerabilities.critical, threshold, environment
                    ))
                } else {
                    None
                }
            }
            Rule::MaxHigh { threshold, environment } => {
                if &input.environment == environment && input.vulnerabilities.high > *threshold {
                    Some(format!(
                        "high vulnerabilities ({}) exceed threshold ({}) in {}",
                        input.vulnerabilities.high, threshold, environment
                    ))
                } else {
                    None
                }
            }
            Rule::RequireSignature { environment } => {
                if &input.environment == environment && !input.is_signed {
                    Some(format!("unsigned image not permitted in {environment}"))
                } else {
                    None
                }
            }
        }
    }
}

/// A compiled rule program, plus the source it was compiled from (returned
/// verbatim by `GET /api/v1/policy`).
#[derive(Clone)]
struct CompiledProgram {
    source: String,
    rules: Vec<Rule>,
}

/// Parses a simple line-oriented policy DSL:
///
/// ```text
/// deny critical > 0 in prod
/// deny high > 5 in prod
/// require signature in prod
/// ```
///
/// Blank lines and lines starting with `#` are ignored. An unparseable
/// non-comment line fails the whole compile, preserving the previously
/// active program (see [`PolicyEngine::update`]).
fn compile(source: &str) -> Result<Vec<Rule>, String> {
    let mut rules = Vec::new();
    for (lineno, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["deny", field, ">", threshold, "in", environment] if *field == "critical" || *field == "high" => {
                let threshold: i64 = threshold
                    .parse()
                    .map_err(|_| format!("line {}: invalid threshold {threshold}", lineno + 1))?;
                rules.push(if *field == "critical" {
                    Rule::MaxCritical {
                        threshold,
                        environment: environment.to_string(),
                    }
                } else {
                    Rule::MaxHigh {
                        threshold,
                        environment: environment.to_string(),
                    }
                });
            }
            ["require", "signature", "in", environment] => {
                rules.push(Rule::RequireSignature {
                    environment: environment.to_string(),
                });
            }
            _ => return Err(format!("line {}: unrecognized rule: {line}", lineno + 1)),
        }
    }
    Ok(rules)
}

/// The live policy program, swappable under an exclusive lock while
/// evaluation holds it shared.
pub struct PolicyEngine {
    program: Arc<RwLock<CompiledProgram>>,
}

impl PolicyEngine {
    /// Builds an engine with an empty (always-allow) program.
    pub fn new() -> Self {
        PolicyEngine {
            program: Arc::new(RwLock::new(CompiledProgram {
                source: String::new(),
                rules: Vec::new(),
            })),
        }
    }

    pub fn with_source(source: &str) -> Result<Self, String> {
        let rules = compile(source)?;
        Ok(PolicyEngine {
            program: Arc::new(RwLock::new(CompiledProgram {
                source: source.to_string(),
                rules,
            })),
        })
    }

    /// Returns the current policy source verbatim.
    pub async fn source(&self) -> String {
        self.program.read().await.source.clone()
    }

    /// Compiles `source` and, only on success, atomically replaces the
    /// active program. On failure the current program is left untouched.
    pub async fn update(&self, source: &str) -> Result<(), String> {
        let rules = compile(source)?;
        let mut guard = self.program.write().await;
        *guard = CompiledProgram {
            source: source.to_string(),
            rules,
        };
        Ok(())
    }

    /// Evaluates `input` against the active program. Evaluation errors
    /// (engine faults, not violations) fail open — this function's
    /// signature cannot itself fail; callers that wrap additional fallible
    /// setup around this call must apply the same fail-open rule and log.
    pub async fn evaluate(&self, input: &PolicyInput) -> PolicyDecision {
        let guard = self.program.read().await;
        let violations: Vec<String> = guard.rules.iter().filter_map(|r| r.evaluate(input)).collect();
        PolicyDecision {
            allow: violations.is_empty(),
            violations,
        }
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(environment: &str, critical: i64, high: i64, is_signed: bool) -> PolicyInput {
        PolicyInput {
            repository: "acme/app".into(),
            tag: "v1".into(),
            user: "alice".into(),
            environment: environment.into(),
            vulnerabilities: VulnerabilityCounts { critical, high },
            is_signed,
        }
    }

    #[tokio::test]
    async fn empty_program_always_allows() {
        let engine = PolicyEngine::new();
        let decision = engine.evaluate(&input("prod", 99, 99, false)).await;
        assert!(decision.allow);
    }

    #[tokio::test]
    async fn denies_when_critical_exceeds_threshold_in_environment() {
        let engine = PolicyEngine::with_source("deny critical > 0 in prod").unwrap();
        let denied = engine.evaluate(&input("prod", 2, 0, true)).await;
        assert!(!denied.allow);
        assert!(denied.message().contains("critical"));

        let allowed_dev = engine.evaluate(&input("dev", 2, 0, true)).await;
        assert!(allowed_dev.allow);
    }

    #[tokio::test]
    async fn update_rejects_bad_source_and_preserves_current() {
        let engine = PolicyEngine::with_source("deny critical > 0 in prod").unwrap();
        let err = engine.update("this is not valid").await.unwrap_err();
        assert!(err.contains("line 1"));
        // previous program still active
        let denied = engine.evaluate(&input("prod", 1, 0, true)).await;
        assert!(!denied.allow);
    }

    #[tokio::test]
    async fn update_replaces_program_atomically() {
        let engine = PolicyEngine::with_source("deny critical > 0 in prod").unwrap();
        engine.update("deny high > 10 in prod").await.unwrap();
        let now_allowed = engine.evaluate(&input("prod", 5, 0, true)).await;
        assert!(now_allowed.allow);
        let now_denied = engine.evaluate(&input("prod", 0, 11, true)).await;
        assert!(!now_denied.allow);
    }

    #[tokio::test]
    async fn require_signature_rule() {
        let engine = PolicyEngine::with_source("require signature in prod").unwrap();
        assert!(!engine.evaluate(&input("prod", 0, 0, false)).await.allow);
        assert!(engine.evaluate(&input("prod", 0, 0, true)).await.allow);
        assert!(engine.evaluate(&input("dev", 0, 0, false)).await.allow);
    }
}
