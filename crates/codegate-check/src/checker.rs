//! Walks user code and reports type and usage problems.

use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};

use crate::types::{Issue, TypeEnv};

/// Globals the execution context provides, plus TypeScript's built-in
/// type names. Anything else unresolved is reported.
pub(crate) const KNOWN_GLOBALS: &[&str] = &[
    // values
    "undefined", "NaN", "Infinity", "globalThis", "console", "setTimeout", "clearTimeout",
    "JSON", "Math", "Date", "Object", "Array", "String", "Number", "Boolean", "Symbol",
    "BigInt", "Map", "Set", "WeakMap", "WeakSet", "WeakRef", "Promise", "RegExp", "Intl",
    "Error", "TypeError", "RangeError", "SyntaxError", "ReferenceError", "EvalError",
    "URIError", "AggregateError", "parseInt", "parseFloat", "isNaN", "isFinite",
    "encodeURIComponent", "decodeURIComponent", "encodeURI", "decodeURI", "ArrayBuffer",
    "DataView", "Uint8Array", "Int8Array", "Uint16Array", "Int16Array", "Uint32Array",
    "Int32Array", "Float32Array", "Float64Array", "BigInt64Array", "BigUint64Array",
    // types
    "Record", "Partial", "Required", "Readonly", "Pick", "Omit", "Exclude", "Extract",
    "NonNullable", "ReturnType", "Parameters", "Awaited", "PromiseLike", "ArrayLike",
    "ReadonlyArray", "Iterable", "Iterator", "IterableIterator", "AsyncIterable",
    "PropertyKey",
];

pub(crate) struct Checker<'e> {
    env: &'e TypeEnv,
    namespace: &'e str,
    pub issues: Vec<Issue>,
}

impl<'e> Checker<'e> {
    pub fn new(env: &'e TypeEnv, namespace: &'e str) -> Self {
        Self {
            env,
            namespace,
            issues: Vec::new(),
        }
    }

    fn is_namespace(&self, expr: &Expression<'_>) -> bool {
        matches!(expr, Expression::Identifier(id) if id.name.as_str() == self.namespace)
    }
}

impl<'a> Visit<'a> for Checker<'_> {
    fn visit_ts_enum_declaration(&mut self, it: &TSEnumDeclaration<'a>) {
        if !it.declare {
            self.issues.push(Issue::new(
                it.span,
                "Enums are not supported in tool code; use a union of string literals instead.",
            ));
        }
    }

    fn visit_ts_module_declaration(&mut self, it: &TSModuleDeclaration<'a>) {
        if !it.declare {
            self.issues.push(Issue::new(
                it.span,
                "Namespaces are not supported in tool code.",
            ));
        }
    }

    fn visit_formal_parameter(&mut self, it: &FormalParameter<'a>) {
        if it.accessibility.is_some() || it.readonly || it.r#override {
            self.issues.push(Issue::new(
                it.span,
                "Parameter properties are not supported in tool code; assign the field in the constructor body instead.",
            ));
        }
        walk::walk_formal_parameter(self, it);
    }

    fn visit_static_member_expression(&mut self, it: &StaticMemberExpression<'a>) {
        if self.is_namespace(&it.object) && self.env.has_namespace() {
            let name = it.property.name.as_str();
            if self.env.member(name).is_none() {
                let known = self.env.member_names();
                self.issues.push(Issue {
                    span: it.property.span,
                    message: format!(
                        "Property '{name}' does not exist on type 'typeof {}'.",
                        self.namespace
                    ),
                    suggestion: codegate_error::suggest_similar(name, &known),
                });
            }
        }
        walk::walk_static_member_expression(self, it);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::StaticMemberExpression(member) = &it.callee {
            if self.is_namespace(&member.object) {
                if let Some(sig) = self.env.member(member.property.name.as_str()) {
                    self.env.check_call(it, sig, &mut self.issues);
                }
            }
        }
        walk::walk_call_expression(self, it);
    }
}
