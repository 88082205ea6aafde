#![warn(missing_docs)]

//! # codegate-check
//!
//! Static validation of tool code before it reaches the sandbox.
//!
//! The generated interface and the submitted code are joined into one
//! TypeScript unit, separated by a marker line, and checked together:
//!
//! - syntax, including early errors such as duplicate declarations
//! - names that resolve to nothing in the unit or the execution context
//! - calls on the tool namespace: unknown members, argument counts and
//!   object-literal arguments against the declared input types
//!
//! Every diagnostic is reported in the coordinates of the submitted code.
//! On success the code is returned with its type syntax erased, ready to run.

mod checker;
mod source;
mod strip;
mod types;
mod usage;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use codegate_error::{Diagnostic, Severity};
use oxc_allocator::Allocator;
use oxc_ast_visit::Visit;
use oxc_diagnostics::OxcDiagnostic;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::{GetSpan, SourceType};
use serde::Serialize;

use crate::checker::{Checker, KNOWN_GLOBALS};
use crate::source::{Location, Unit};
use crate::strip::TypeStripper;
use crate::types::{Issue, TypeEnv};

pub use crate::usage::check_tool_usage;

/// Maximum bracket nesting accepted before parsing.
const MAX_NESTING_DEPTH: usize = 256;

/// Interfaces kept parsed between validations.
const INTERFACE_CACHE_CAPACITY: usize = 8;

/// Outcome of [`Validator::validate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    /// Whether the code may run.
    pub success: bool,
    /// The code with type syntax erased. Present only on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Problems found, in source order. Empty on success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Diagnostic>,
}

impl Validation {
    fn passed(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            errors: Vec::new(),
        }
    }

    fn failed(mut errors: Vec<Diagnostic>) -> Self {
        errors.sort_by_key(|d| (d.line.is_some(), d.line, d.column));
        Self {
            success: false,
            output: None,
            errors,
        }
    }
}

/// Reentrant validator for one tool namespace.
///
/// Holds a small cache of parsed interfaces and no other state.
pub struct Validator {
    namespace: String,
    cache: Mutex<VecDeque<(String, Arc<TypeEnv>)>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new("tools")
    }
}

impl Validator {
    /// Create a validator for tools declared under `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            cache: Mutex::new(VecDeque::with_capacity(INTERFACE_CACHE_CAPACITY)),
        }
    }

    /// The namespace object name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check `code` against `interface`.
    pub fn validate(&self, code: &str, interface: &str) -> Validation {
        if let Some(depth) = nesting_too_deep(code) {
            return Validation::failed(vec![Diagnostic::error(format!(
                "code nesting depth {depth} exceeds maximum {MAX_NESTING_DEPTH}"
            ))]);
        }

        let unit = Unit::new(interface, code);
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &unit.text, SourceType::ts()).parse();

        if ret.panicked || !ret.errors.is_empty() {
            let mut errors: Vec<Diagnostic> =
                ret.errors.iter().map(|e| from_oxc(&unit, e)).collect();
            if errors.is_empty() {
                errors.push(Diagnostic::error("parser gave up on malformed input"));
            }
            tracing::debug!(errors = errors.len(), "validation failed: syntax");
            return Validation::failed(errors);
        }

        let semantic_ret = SemanticBuilder::new()
            .with_check_syntax_error(true)
            .build(&ret.program);
        let mut errors: Vec<Diagnostic> = semantic_ret
            .errors
            .iter()
            .map(|e| from_oxc(&unit, e))
            .collect();

        let semantic = &semantic_ret.semantic;
        let scoping = semantic.scoping();
        for (name, references) in scoping.root_unresolved_references() {
            let name: &str = name.as_ref();
            if KNOWN_GLOBALS.contains(&name) {
                continue;
            }
            for reference_id in references.iter() {
                let reference = scoping.get_reference(*reference_id);
                let span = semantic.nodes().get_node(reference.node_id()).kind().span();
                if unit.in_user_region(span.start) {
                    errors.push(at_location(
                        &unit,
                        span.start,
                        Diagnostic::error(format!("Cannot find name '{name}'.")),
                    ));
                }
            }
        }

        let env = self.type_env(interface);
        let mut checker = Checker::new(&env, &self.namespace);
        let mut stripper = TypeStripper::new(&unit.text);
        for stmt in &ret.program.body {
            if unit.in_user_region(stmt.span().start) {
                checker.visit_statement(stmt);
                stripper.visit_statement(stmt);
            }
        }
        errors.extend(checker.issues.into_iter().map(|i| from_issue(&unit, i)));

        if errors.iter().any(Diagnostic::is_error) {
            tracing::debug!(errors = errors.len(), "validation failed");
            return Validation::failed(errors);
        }

        let stripped = stripper.finish();
        Validation::passed(unit.user_slice(&stripped).to_string())
    }

    /// Usage scan of compiled code against known identifiers.
    pub fn check_usage<'k>(
        &self,
        compiled: &str,
        known: impl IntoIterator<Item = &'k str>,
    ) -> Result<std::collections::BTreeSet<String>, Vec<Diagnostic>> {
        check_tool_usage(compiled, &self.namespace, known)
    }

    fn type_env(&self, interface: &str) -> Arc<TypeEnv> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, env)) = cache.iter().find(|(text, _)| text == interface) {
            return Arc::clone(env);
        }
        let env = Arc::new(TypeEnv::from_interface(interface, &self.namespace));
        if cache.len() == INTERFACE_CACHE_CAPACITY {
            cache.pop_front();
        }
        cache.push_back((interface.to_string(), Arc::clone(&env)));
        env
    }
}

/// Validate under the default `tools` namespace.
pub fn validate(code: &str, interface: &str) -> Validation {
    Validator::default().validate(code, interface)
}

fn nesting_too_deep(code: &str) -> Option<usize> {
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;
    for ch in code.chars() {
        match ch {
            '{' | '[' | '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            '}' | ']' | ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    (max_depth > MAX_NESTING_DEPTH).then_some(max_depth)
}

fn severity(diag: &OxcDiagnostic) -> Severity {
    match diag.severity {
        oxc_diagnostics::Severity::Error => Severity::Error,
        oxc_diagnostics::Severity::Warning => Severity::Warning,
        oxc_diagnostics::Severity::Advice => Severity::Suggestion,
    }
}

fn from_oxc(unit: &Unit, diag: &OxcDiagnostic) -> Diagnostic {
    let mut out = Diagnostic {
        severity: severity(diag),
        ..Diagnostic::error(diag.message.to_string())
    };
    if let Some(help) = &diag.help {
        out = out.with_suggestion(help.to_string());
    }
    let offset = diag
        .labels
        .as_ref()
        .and_then(|labels| labels.first())
        .map(|label| label.offset() as u32);
    match offset {
        Some(offset) => at_location(unit, offset, out),
        None => out,
    }
}

fn from_issue(unit: &Unit, issue: Issue) -> Diagnostic {
    let mut diag = Diagnostic::error(issue.message);
    if let Some(hint) = issue.suggestion {
        diag = diag.with_suggestion(hint);
    }
    at_location(unit, issue.span.start, diag)
}

fn at_location(unit: &Unit, offset: u32, diag: Diagnostic) -> Diagnostic {
    match unit.locate(offset) {
        Location::User { line, column } => diag.at(line, column, unit.code()),
        Location::Interface => Diagnostic {
            message: format!("in tool interface: {}", diag.message),
            ..diag
        },
    }
}
