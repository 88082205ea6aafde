//! Type erasure by blanking.
//!
//! Type-only syntax is overwritten with spaces (newlines kept), so every
//! remaining token keeps its byte offset, line and column.

use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_span::{GetSpan, Span};

/// Modifier keywords with no meaning at runtime.
const TS_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "readonly", "override", "declare", "abstract",
];

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

pub(crate) struct TypeStripper<'s> {
    source: &'s [u8],
    blanks: Vec<(u32, u32)>,
}

impl<'s> TypeStripper<'s> {
    pub fn new(source: &'s str) -> Self {
        Self {
            source: source.as_bytes(),
            blanks: Vec::new(),
        }
    }

    fn blank(&mut self, start: u32, end: u32) {
        if start < end {
            self.blanks.push((start, end));
        }
    }

    fn blank_span(&mut self, span: Span) {
        self.blank(span.start, span.end);
    }

    fn skip_ws_back(&self, mut i: usize) -> usize {
        while i > 0 && self.source[i - 1].is_ascii_whitespace() {
            i -= 1;
        }
        i
    }

    /// Start of an annotation including its `:` and any `?`/`!` marker.
    fn annotation_start(&self, start: u32) -> u32 {
        let mut i = start as usize;
        if self.source.get(i) != Some(&b':') {
            let j = self.skip_ws_back(i);
            if j > 0 && self.source[j - 1] == b':' {
                i = j - 1;
            }
        }
        let j = self.skip_ws_back(i);
        if j > 0 && matches!(self.source[j - 1], b'?' | b'!') {
            i = j - 1;
        }
        i as u32
    }

    /// Blank every TS-only modifier word in `start..end`.
    fn blank_modifiers(&mut self, start: u32, end: u32) {
        let end = (end as usize).min(self.source.len());
        let mut i = start as usize;
        while i < end {
            if !is_ident_byte(self.source[i]) {
                i += 1;
                continue;
            }
            let word_start = i;
            while i < end && is_ident_byte(self.source[i]) {
                i += 1;
            }
            let word = &self.source[word_start..i];
            if TS_MODIFIERS.iter().any(|m| m.as_bytes() == word) {
                self.blank(word_start as u32, i as u32);
            }
        }
    }

    /// Start of `keyword` if it is the last word before `pos`.
    fn keyword_before(&self, pos: u32, keyword: &str) -> Option<u32> {
        let end = self.skip_ws_back(pos as usize);
        let start = end.checked_sub(keyword.len())?;
        let boundary = start == 0 || !is_ident_byte(self.source[start - 1]);
        (boundary && &self.source[start..end] == keyword.as_bytes()).then_some(start as u32)
    }

    /// Blank a `?` marker directly after `pos`.
    fn blank_optional_after(&mut self, pos: u32) {
        let mut i = pos as usize;
        while i < self.source.len() && self.source[i].is_ascii_whitespace() {
            i += 1;
        }
        if self.source.get(i) == Some(&b'?') {
            self.blank(i as u32, i as u32 + 1);
        }
    }

    /// Apply the collected blanks to `source`.
    pub fn finish(self) -> String {
        let mut bytes = self.source.to_vec();
        for (start, end) in self.blanks {
            let end = (end as usize).min(bytes.len());
            for b in bytes.iter_mut().take(end).skip(start as usize) {
                if *b != b'\n' && *b != b'\r' {
                    *b = b' ';
                }
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl<'a> Visit<'a> for TypeStripper<'_> {
    fn visit_statement(&mut self, it: &Statement<'a>) {
        match it {
            Statement::FunctionDeclaration(f) if f.declare || f.body.is_none() => {
                self.blank_span(f.span)
            }
            Statement::VariableDeclaration(v) if v.declare => self.blank_span(v.span),
            Statement::TSInterfaceDeclaration(d) => self.blank_span(d.span),
            Statement::TSTypeAliasDeclaration(d) => self.blank_span(d.span),
            Statement::TSEnumDeclaration(d) if d.declare => self.blank_span(d.span),
            Statement::TSModuleDeclaration(d) if d.declare => self.blank_span(d.span),
            _ => walk::walk_statement(self, it),
        }
    }

    fn visit_class(&mut self, it: &Class<'a>) {
        if it.declare {
            self.blank_span(it.span);
            return;
        }
        if it.r#abstract {
            let head_end = it.id.as_ref().map_or(it.body.span.start, |id| id.span.start);
            self.blank_modifiers(it.span.start, head_end);
            if let Some(start) = self.keyword_before(it.span.start, "abstract") {
                self.blank(start, start + "abstract".len() as u32);
            }
        }
        if let (Some(first), Some(last)) = (it.implements.first(), it.implements.last()) {
            if let Some(start) = self.keyword_before(first.span.start, "implements") {
                self.blank(start, last.span.end);
            }
        }
        walk::walk_class(self, it);
    }

    fn visit_class_element(&mut self, it: &ClassElement<'a>) {
        match it {
            ClassElement::TSIndexSignature(sig) => self.blank_span(sig.span),
            ClassElement::MethodDefinition(m)
                if m.r#type == MethodDefinitionType::TSAbstractMethodDefinition
                    || m.value.body.is_none() =>
            {
                self.blank_span(m.span)
            }
            ClassElement::PropertyDefinition(p)
                if p.declare || p.r#type == PropertyDefinitionType::TSAbstractPropertyDefinition =>
            {
                self.blank_span(p.span)
            }
            ClassElement::MethodDefinition(m) => {
                self.blank_modifiers(m.span.start, m.key.span().start);
                if m.optional && !m.computed {
                    self.blank_optional_after(m.key.span().end);
                }
                walk::walk_class_element(self, it);
            }
            ClassElement::PropertyDefinition(p) => {
                self.blank_modifiers(p.span.start, p.key.span().start);
                if p.optional && !p.computed && p.type_annotation.is_none() {
                    self.blank_optional_after(p.key.span().end);
                }
                walk::walk_class_element(self, it);
            }
            ClassElement::AccessorProperty(a) => {
                self.blank_modifiers(a.span.start, a.key.span().start);
                walk::walk_class_element(self, it);
            }
            ClassElement::StaticBlock(_) => walk::walk_class_element(self, it),
        }
    }

    fn visit_ts_type_annotation(&mut self, it: &TSTypeAnnotation<'a>) {
        let start = self.annotation_start(it.span.start);
        self.blank(start, it.span.end);
    }

    fn visit_binding_pattern(&mut self, it: &BindingPattern<'a>) {
        if it.optional && it.type_annotation.is_none() {
            let mut i = it.kind.span().end as usize;
            while i < self.source.len() && self.source[i].is_ascii_whitespace() {
                i += 1;
            }
            if self.source.get(i) == Some(&b'?') {
                self.blank(i as u32, i as u32 + 1);
            }
        }
        walk::walk_binding_pattern(self, it);
    }

    fn visit_ts_type_parameter_declaration(&mut self, it: &TSTypeParameterDeclaration<'a>) {
        self.blank_span(it.span);
    }

    fn visit_ts_type_parameter_instantiation(&mut self, it: &TSTypeParameterInstantiation<'a>) {
        self.blank_span(it.span);
    }

    fn visit_ts_as_expression(&mut self, it: &TSAsExpression<'a>) {
        self.blank(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_satisfies_expression(&mut self, it: &TSSatisfiesExpression<'a>) {
        self.blank(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_non_null_expression(&mut self, it: &TSNonNullExpression<'a>) {
        self.blank(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_instantiation_expression(&mut self, it: &TSInstantiationExpression<'a>) {
        self.blank(it.expression.span().end, it.span.end);
        self.visit_expression(&it.expression);
    }

    fn visit_ts_type_assertion(&mut self, it: &TSTypeAssertion<'a>) {
        self.blank(it.span.start, it.expression.span().start);
        self.visit_expression(&it.expression);
    }
}
