//! A small structural type model for the declarations in a tool interface,
//! and assignability checks of argument expressions against it.
//!
//! This covers the shapes the interface generator emits. Anything else
//! (`any`, generics, intersections, unresolved names) is treated as
//! accepting every value.

use std::collections::{BTreeMap, HashMap};

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};

/// Maximum alias hops before a reference is treated as unknown.
const MAX_RESOLVE_DEPTH: usize = 16;

static UNKNOWN: TsType = TsType::Unknown;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TsType {
    Unknown,
    Never,
    String,
    Number,
    Boolean,
    Null,
    Undefined,
    StringLit(String),
    NumberLit(f64),
    BoolLit(bool),
    Array(Box<TsType>),
    Object(ObjectType),
    Union(Vec<TsType>),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ObjectType {
    pub props: Vec<Property>,
    pub index: Option<Box<TsType>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Property {
    pub name: String,
    pub optional: bool,
    pub ty: TsType,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Param {
    pub optional: bool,
    pub ty: TsType,
}

/// Signature of one namespace member.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Member {
    pub params: Vec<Param>,
    pub variadic: bool,
}

/// A problem found while checking an expression.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Issue {
    pub span: Span,
    pub message: String,
    pub suggestion: Option<String>,
}

impl Issue {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            suggestion: None,
        }
    }
}

/// Named types and namespace members declared by an interface.
#[derive(Debug, Default)]
pub(crate) struct TypeEnv {
    types: HashMap<String, TsType>,
    members: BTreeMap<String, Member>,
    has_namespace: bool,
}

impl TypeEnv {
    /// Collect declarations from interface text. Unparseable parts are skipped.
    pub fn from_interface(interface: &str, namespace: &str) -> Self {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, interface, SourceType::ts()).parse();
        let mut env = Self::default();

        for stmt in &ret.program.body {
            match stmt {
                Statement::TSInterfaceDeclaration(decl) => {
                    env.types.insert(
                        decl.id.name.to_string(),
                        TsType::Object(object_type(&decl.body.body)),
                    );
                }
                Statement::TSTypeAliasDeclaration(decl) => {
                    env.types
                        .insert(decl.id.name.to_string(), convert(&decl.type_annotation));
                }
                Statement::VariableDeclaration(decl) => {
                    for declarator in &decl.declarations {
                        let BindingPatternKind::BindingIdentifier(id) = &declarator.id.kind else {
                            continue;
                        };
                        if id.name.as_str() != namespace {
                            continue;
                        }
                        env.has_namespace = true;
                        if let Some(annotation) = &declarator.id.type_annotation {
                            if let TSType::TSTypeLiteral(lit) = &annotation.type_annotation {
                                env.members = namespace_members(&lit.members);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        env
    }

    /// Whether the namespace object was declared at all.
    pub fn has_namespace(&self) -> bool {
        self.has_namespace
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.keys().map(String::as_str).collect()
    }

    /// Follow named references. Returns the structural type and the last
    /// name seen, for messages.
    fn resolve<'t>(&'t self, ty: &'t TsType) -> (&'t TsType, Option<&'t str>) {
        let mut current = ty;
        let mut label = None;
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                TsType::Named(name) => match self.types.get(name) {
                    Some(next) => {
                        label = Some(name.as_str());
                        current = next;
                    }
                    None => return (&UNKNOWN, None),
                },
                _ => return (current, label),
            }
        }
        (&UNKNOWN, None)
    }

    /// Check a call's argument list against a member signature.
    pub fn check_call(&self, call: &CallExpression<'_>, member: &Member, out: &mut Vec<Issue>) {
        if call.arguments.iter().any(|a| matches!(a, Argument::SpreadElement(_))) {
            return;
        }
        let got = call.arguments.len();
        let min = member.params.iter().filter(|p| !p.optional).count();
        let max = member.params.len();
        if got < min || (got > max && !member.variadic) {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min}-{max}")
            };
            out.push(Issue::new(
                call.span,
                format!("Expected {expected} arguments, but got {got}."),
            ));
            return;
        }
        for (arg, param) in call.arguments.iter().zip(&member.params) {
            if let Some(expr) = arg.as_expression() {
                self.check_expr(expr, &param.ty, out);
            }
        }
    }

    /// Check that `expr` is assignable to `target`, appending any issues.
    pub fn check_expr(&self, expr: &Expression<'_>, target: &TsType, out: &mut Vec<Issue>) {
        let (resolved, label) = self.resolve(target);
        let expr = expr.without_parentheses();

        match resolved {
            TsType::Unknown => return,
            TsType::Union(members) => {
                for member in members {
                    let mut scratch = Vec::new();
                    self.check_expr(expr, member, &mut scratch);
                    if scratch.is_empty() {
                        return;
                    }
                }
                if let Some(source) = literal_type(expr) {
                    out.push(self.mismatch(expr.span(), &source, resolved, label));
                }
                return;
            }
            _ => {}
        }

        match expr {
            Expression::ObjectExpression(obj) => match resolved {
                TsType::Object(shape) => self.check_object(obj, shape, label, out),
                _ => out.push(self.mismatch(
                    obj.span,
                    &TsType::Object(ObjectType::default()),
                    resolved,
                    label,
                )),
            },
            Expression::ArrayExpression(arr) => match resolved {
                TsType::Array(element) => {
                    for el in &arr.elements {
                        if let Some(e) = el.as_expression() {
                            self.check_expr(e, element, out);
                        }
                    }
                }
                _ => out.push(self.mismatch(
                    arr.span,
                    &TsType::Array(Box::new(TsType::Unknown)),
                    resolved,
                    label,
                )),
            },
            _ => {
                if let Some(source) = literal_type(expr) {
                    if !primitive_assignable(&source, resolved) {
                        out.push(self.mismatch(expr.span(), &source, resolved, label));
                    }
                }
            }
        }
    }

    fn check_object(
        &self,
        obj: &ObjectExpression<'_>,
        shape: &ObjectType,
        label: Option<&str>,
        out: &mut Vec<Issue>,
    ) {
        let target_name = label.map_or_else(|| display(&TsType::Object(shape.clone())), str::to_string);
        let mut seen = Vec::new();
        let mut has_spread = false;

        for prop in &obj.properties {
            let ObjectPropertyKind::ObjectProperty(p) = prop else {
                has_spread = true;
                continue;
            };
            if p.computed {
                has_spread = true;
                continue;
            }
            let Some(name) = p.key.static_name() else {
                continue;
            };
            seen.push(name.to_string());

            if let Some(declared) = shape.props.iter().find(|d| d.name == name.as_ref()) {
                self.check_expr(&p.value, &declared.ty, out);
            } else if let Some(index) = &shape.index {
                self.check_expr(&p.value, index, out);
            } else {
                let known: Vec<&str> = shape.props.iter().map(|d| d.name.as_str()).collect();
                out.push(Issue {
                    span: p.key.span(),
                    message: format!(
                        "Object literal may only specify known properties, and '{name}' does not exist in type '{target_name}'."
                    ),
                    suggestion: codegate_error::suggest_similar(&name, &known),
                });
            }
        }

        if has_spread {
            return;
        }
        for declared in shape.props.iter().filter(|d| !d.optional) {
            if !seen.iter().any(|s| s == &declared.name) {
                out.push(Issue::new(
                    obj.span,
                    format!(
                        "Property '{}' is missing in type '{}' but required in type '{}'.",
                        declared.name,
                        display_object_expr(obj),
                        target_name
                    ),
                ));
            }
        }
    }

    fn mismatch(&self, span: Span, source: &TsType, target: &TsType, label: Option<&str>) -> Issue {
        let keep_literal = contains_literal(target);
        let source = if keep_literal { source.clone() } else { widen(source) };
        let target = label.map_or_else(|| display(target), str::to_string);
        Issue::new(
            span,
            format!("Type '{}' is not assignable to type '{}'.", display(&source), target),
        )
    }
}

fn object_type(members: &[TSSignature<'_>]) -> ObjectType {
    let mut shape = ObjectType::default();
    for member in members {
        match member {
            TSSignature::TSPropertySignature(p) => {
                let Some(name) = p.key.static_name() else {
                    continue;
                };
                shape.props.push(Property {
                    name: name.to_string(),
                    optional: p.optional,
                    ty: p
                        .type_annotation
                        .as_ref()
                        .map_or(TsType::Unknown, |a| convert(&a.type_annotation)),
                });
            }
            TSSignature::TSIndexSignature(ix) => {
                shape.index = Some(Box::new(convert(&ix.type_annotation.type_annotation)));
            }
            _ => {}
        }
    }
    shape
}

fn namespace_members(members: &[TSSignature<'_>]) -> BTreeMap<String, Member> {
    let mut out = BTreeMap::new();
    for member in members {
        match member {
            TSSignature::TSMethodSignature(m) => {
                if let Some(name) = m.key.static_name() {
                    out.insert(name.to_string(), signature(&m.params));
                }
            }
            TSSignature::TSPropertySignature(p) => {
                let Some(name) = p.key.static_name() else {
                    continue;
                };
                let member = match p.type_annotation.as_ref().map(|a| &a.type_annotation) {
                    Some(TSType::TSFunctionType(f)) => signature(&f.params),
                    _ => Member {
                        params: Vec::new(),
                        variadic: true,
                    },
                };
                out.insert(name.to_string(), member);
            }
            _ => {}
        }
    }
    out
}

fn signature(params: &FormalParameters<'_>) -> Member {
    Member {
        params: params
            .items
            .iter()
            .map(|p| Param {
                optional: p.pattern.optional,
                ty: p
                    .pattern
                    .type_annotation
                    .as_ref()
                    .map_or(TsType::Unknown, |a| convert(&a.type_annotation)),
            })
            .collect(),
        variadic: params.rest.is_some(),
    }
}

fn convert(ty: &TSType<'_>) -> TsType {
    match ty {
        TSType::TSStringKeyword(_) => TsType::String,
        TSType::TSNumberKeyword(_) => TsType::Number,
        TSType::TSBooleanKeyword(_) => TsType::Boolean,
        TSType::TSNullKeyword(_) => TsType::Null,
        TSType::TSUndefinedKeyword(_) | TSType::TSVoidKeyword(_) => TsType::Undefined,
        TSType::TSNeverKeyword(_) => TsType::Never,
        TSType::TSLiteralType(lit) => match &lit.literal {
            TSLiteral::StringLiteral(s) => TsType::StringLit(s.value.to_string()),
            TSLiteral::NumericLiteral(n) => TsType::NumberLit(n.value),
            TSLiteral::BooleanLiteral(b) => TsType::BoolLit(b.value),
            _ => TsType::Unknown,
        },
        TSType::TSArrayType(arr) => TsType::Array(Box::new(convert(&arr.element_type))),
        TSType::TSUnionType(union) => TsType::Union(union.types.iter().map(convert).collect()),
        TSType::TSTypeLiteral(lit) => TsType::Object(object_type(&lit.members)),
        TSType::TSParenthesizedType(p) => convert(&p.type_annotation),
        TSType::TSTypeReference(r) => reference(r),
        _ => TsType::Unknown,
    }
}

fn reference(r: &TSTypeReference<'_>) -> TsType {
    let TSTypeName::IdentifierReference(id) = &r.type_name else {
        return TsType::Unknown;
    };
    let args: Vec<TsType> = r
        .type_arguments
        .as_ref()
        .map(|a| a.params.iter().map(convert).collect())
        .unwrap_or_default();
    match (id.name.as_str(), args.as_slice()) {
        ("Record", [TsType::String, value]) => TsType::Object(ObjectType {
            props: Vec::new(),
            index: Some(Box::new(value.clone())),
        }),
        ("Array", [element]) => TsType::Array(Box::new(element.clone())),
        (name, []) => TsType::Named(name.to_string()),
        _ => TsType::Unknown,
    }
}

/// The type of a literal expression, or `None` when it cannot be known
/// without full inference.
fn literal_type(expr: &Expression<'_>) -> Option<TsType> {
    match expr.without_parentheses() {
        Expression::StringLiteral(s) => Some(TsType::StringLit(s.value.to_string())),
        Expression::TemplateLiteral(_) => Some(TsType::String),
        Expression::NumericLiteral(n) => Some(TsType::NumberLit(n.value)),
        Expression::BooleanLiteral(b) => Some(TsType::BoolLit(b.value)),
        Expression::NullLiteral(_) => Some(TsType::Null),
        Expression::Identifier(id) if id.name.as_str() == "undefined" => Some(TsType::Undefined),
        Expression::ObjectExpression(_) => Some(TsType::Object(ObjectType::default())),
        Expression::ArrayExpression(_) => Some(TsType::Array(Box::new(TsType::Unknown))),
        _ => None,
    }
}

fn primitive_assignable(source: &TsType, target: &TsType) -> bool {
    use TsType::*;
    match (source, target) {
        (_, Unknown) => true,
        (StringLit(_) | String, String) => true,
        (StringLit(a), StringLit(b)) => a == b,
        (NumberLit(_) | Number, Number) => true,
        (NumberLit(a), NumberLit(b)) => a == b,
        (BoolLit(_) | Boolean, Boolean) => true,
        (BoolLit(a), BoolLit(b)) => a == b,
        (Null, Null) | (Undefined, Undefined) => true,
        _ => false,
    }
}

fn contains_literal(ty: &TsType) -> bool {
    match ty {
        TsType::StringLit(_) | TsType::NumberLit(_) | TsType::BoolLit(_) => true,
        TsType::Union(members) => members.iter().any(contains_literal),
        _ => false,
    }
}

fn widen(ty: &TsType) -> TsType {
    match ty {
        TsType::StringLit(_) => TsType::String,
        TsType::NumberLit(_) => TsType::Number,
        TsType::BoolLit(_) => TsType::Boolean,
        other => other.clone(),
    }
}

pub(crate) fn display(ty: &TsType) -> String {
    match ty {
        TsType::Unknown => "unknown".into(),
        TsType::Never => "never".into(),
        TsType::String => "string".into(),
        TsType::Number => "number".into(),
        TsType::Boolean => "boolean".into(),
        TsType::Null => "null".into(),
        TsType::Undefined => "undefined".into(),
        TsType::StringLit(s) => format!("\"{s}\""),
        TsType::NumberLit(n) => n.to_string(),
        TsType::BoolLit(b) => b.to_string(),
        TsType::Array(element) => match element.as_ref() {
            TsType::Union(_) => format!("({})[]", display(element)),
            other => format!("{}[]", display(other)),
        },
        TsType::Object(shape) => {
            if shape.props.is_empty() {
                return match &shape.index {
                    Some(value) => format!("Record<string, {}>", display(value)),
                    None => "{}".into(),
                };
            }
            let fields: Vec<String> = shape
                .props
                .iter()
                .map(|p| {
                    format!(
                        "{}{}: {};",
                        p.name,
                        if p.optional { "?" } else { "" },
                        display(&p.ty)
                    )
                })
                .collect();
            format!("{{ {} }}", fields.join(" "))
        }
        TsType::Union(members) => members.iter().map(display).collect::<Vec<_>>().join(" | "),
        TsType::Named(name) => name.clone(),
    }
}

fn display_object_expr(obj: &ObjectExpression<'_>) -> String {
    let mut fields = Vec::new();
    for prop in &obj.properties {
        if let ObjectPropertyKind::ObjectProperty(p) = prop {
            if let Some(name) = p.key.static_name() {
                let ty = literal_type(&p.value).map_or(TsType::Unknown, |t| widen(&t));
                let ty = match ty {
                    TsType::Object(_) => "{ ... }".to_string(),
                    TsType::Array(_) => "unknown[]".to_string(),
                    other => display(&other),
                };
                fields.push(format!("{name}: {ty};"));
            }
        }
    }
    if fields.is_empty() {
        "{}".into()
    } else {
        format!("{{ {} }}", fields.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERFACE: &str = r#"
interface SearchInput {
  query: string;
  limit?: number;
  sort?: "asc" | "desc";
  tags?: string[];
  filter?: {
    genre: string;
  };
}
type PingInput = Record<string, unknown>;
declare const tools: {
  search(input: SearchInput): Promise<Record<string, unknown>>;
  ping(input?: PingInput): Promise<Record<string, unknown>>;
};
"#;

    fn issues_for(call_src: &str) -> Vec<String> {
        let env = TypeEnv::from_interface(INTERFACE, "tools");
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, call_src, SourceType::ts()).parse();
        assert!(ret.errors.is_empty(), "parse errors: {:?}", ret.errors);
        let Some(Statement::ExpressionStatement(stmt)) = ret.program.body.first() else {
            panic!("expected an expression statement");
        };
        let Expression::CallExpression(call) = stmt.expression.without_parentheses() else {
            panic!("expected a call");
        };
        let Expression::StaticMemberExpression(member) = &call.callee else {
            panic!("expected a member call");
        };
        let sig = env.member(member.property.name.as_str()).expect("member");
        let mut out = Vec::new();
        env.check_call(call, sig, &mut out);
        out.into_iter().map(|i| i.message).collect()
    }

    #[test]
    fn collects_namespace_members() {
        let env = TypeEnv::from_interface(INTERFACE, "tools");
        assert!(env.has_namespace());
        assert_eq!(env.member_names(), vec!["ping", "search"]);
        assert_eq!(env.member("ping").map(|m| m.params[0].optional), Some(true));
    }

    #[test]
    fn well_typed_call_passes() {
        let issues = issues_for(r#"tools.search({ query: "x", limit: 5, sort: "asc", tags: ["a"], filter: { genre: "rock" } })"#);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn missing_required_property() {
        let issues = issues_for("tools.search({ limit: 5 })");
        assert_eq!(
            issues,
            vec!["Property 'query' is missing in type '{ limit: number; }' but required in type 'SearchInput'."]
        );
    }

    #[test]
    fn excess_property() {
        let issues = issues_for(r#"tools.search({ query: "x", qurey: "y" })"#);
        assert_eq!(
            issues,
            vec!["Object literal may only specify known properties, and 'qurey' does not exist in type 'SearchInput'."]
        );
    }

    #[test]
    fn primitive_mismatch_is_widened() {
        let issues = issues_for(r#"tools.search({ query: 42 })"#);
        assert_eq!(issues, vec!["Type 'number' is not assignable to type 'string'."]);
    }

    #[test]
    fn literal_union_mismatch_keeps_literal() {
        let issues = issues_for(r#"tools.search({ query: "x", sort: "up" })"#);
        assert_eq!(
            issues,
            vec![r#"Type '"up"' is not assignable to type '"asc" | "desc"'."#]
        );
    }

    #[test]
    fn nested_and_array_elements_are_checked() {
        let issues = issues_for(r#"tools.search({ query: "x", tags: [1], filter: {} })"#);
        assert_eq!(issues.len(), 2, "{issues:?}");
        assert!(issues[0].contains("'number' is not assignable to type 'string'"));
        assert!(issues[1].contains("Property 'genre' is missing"));
    }

    #[test]
    fn argument_count() {
        assert_eq!(issues_for("tools.search()"), vec!["Expected 1 arguments, but got 0."]);
        assert_eq!(issues_for("tools.ping({}, {})"), vec!["Expected 0-1 arguments, but got 2."]);
        assert!(issues_for("tools.ping()").is_empty());
    }

    #[test]
    fn non_literal_arguments_are_not_guessed() {
        assert!(issues_for("tools.search(input)").is_empty());
        assert!(issues_for("tools.search({ query: someValue })").is_empty());
        assert!(issues_for("tools.search({ ...base })").is_empty());
    }

    #[test]
    fn record_accepts_any_keys() {
        assert!(issues_for(r#"tools.ping({ anything: 1, other: "x" })"#).is_empty());
    }
}
