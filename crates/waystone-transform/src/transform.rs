//! Lowering of directive functions for each build target.

use std::collections::BTreeMap;

use nonempty::NonEmpty;
use serde::Serialize;
use waystone::{FunctionId, FunctionKind, Manifest, ManifestStep, ManifestWorkflow};

use crate::analysis::{
    Analysis, BindingSite, BodySpan, DefaultExportFix, DirectiveFunction, ModuleBinding, analyze,
};
use crate::config::{Mode, TransformConfig};
use crate::emit::{Edit, apply, text_without};
use crate::error::{Diagnostic, DiagnosticKind, Result, SyntaxError, TransformError};
use crate::parser::parse;
use crate::span::{LineIndex, Span};

const CLOSURE_VARS: &str = "__private_getClosureVars";
const REGISTER_STEP: &str = "registerStepFunction";
const STEP_PROXY: &str = r#"globalThis[Symbol.for("WORKFLOW_USE_STEP")]"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
    pub manifest: Manifest,
}

/// Rewrite one module for the build target in `config`.
///
/// Any diagnostic fails the whole module; nothing is skipped.
pub fn transform(source: &str, config: &TransformConfig) -> Result<TransformOutput> {
    FunctionId::new(
        FunctionKind::Step,
        config.source_path.as_str(),
        NonEmpty::new("_".to_string()),
    )?;

    let program = parse(source).map_err(|error| syntax_failure(source, config, error))?;
    let analysis = analyze(&program, source, &config.source_path)?;
    if !analysis.diagnostics.is_empty() {
        return Err(TransformError::Diagnostics {
            path: config.source_path.clone(),
            diagnostics: analysis.diagnostics,
        });
    }

    let manifest = manifest(&analysis.functions);
    if manifest.is_empty() {
        tracing::debug!(path = %config.source_path, "no directive functions");
        return Ok(TransformOutput {
            code: source.to_string(),
            manifest,
        });
    }

    let mut lowering = Lowering::new(source, config.mode);
    lowering.lower(&analysis)?;
    let header = header(source, config, &lowering, &manifest)?;
    lowering.edits.push(Edit::insert(header_offset(source), header));
    let code = lowering.finish();

    tracing::debug!(
        path = %config.source_path,
        mode = %config.mode,
        workflows = manifest.workflows.len(),
        steps = manifest.steps.len(),
        "transformed module"
    );
    Ok(TransformOutput { code, manifest })
}

fn syntax_failure(source: &str, config: &TransformConfig, error: SyntaxError) -> TransformError {
    let (line, column) = LineIndex::new(source).position(source, error.span.start);
    TransformError::Diagnostics {
        path: config.source_path.clone(),
        diagnostics: vec![Diagnostic {
            kind: DiagnosticKind::Syntax,
            message: error.message,
            declaration: "<module>".to_string(),
            line,
            column,
        }],
    }
}

fn manifest(functions: &[DirectiveFunction]) -> Manifest {
    let mut manifest = Manifest::default();
    for function in functions {
        let key = function.id.nesting_path();
        match function.kind {
            FunctionKind::Workflow => {
                manifest.workflows.insert(
                    key,
                    ManifestWorkflow {
                        workflow_id: function.id.to_string(),
                    },
                );
            }
            FunctionKind::Step => {
                manifest.steps.insert(
                    key,
                    ManifestStep {
                        step_id: function.id.to_string(),
                        closure_vars: function.captures.clone(),
                    },
                );
            }
        }
    }
    manifest
}

/// Past a leading `#!` line, if any.
fn header_offset(source: &str) -> usize {
    if !source.starts_with("#!") {
        return 0;
    }
    source.find('\n').map_or(source.len(), |newline| newline + 1)
}

fn header(
    source: &str,
    config: &TransformConfig,
    lowering: &Lowering<'_>,
    manifest: &Manifest,
) -> Result<String> {
    let mut header = String::new();
    if header_offset(source) > 0 && !source.contains('\n') {
        header.push('\n');
    }
    header.push_str(&manifest.to_comment()?);
    header.push('\n');

    let mut imports = Vec::new();
    if lowering.uses_closure_vars {
        imports.push(CLOSURE_VARS);
    }
    if lowering.uses_register {
        imports.push(REGISTER_STEP);
    }
    if !imports.is_empty() {
        header.push_str(&format!(
            "import {{ {} }} from {};\n",
            imports.join(", "),
            js(&config.runtime_module)?
        ));
    }
    Ok(header)
}

/// A JavaScript string literal.
fn js<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value).map_err(waystone::Error::from)?)
}

struct Lowering<'a> {
    src: &'a str,
    mode: Mode,
    edits: Vec<Edit>,
    /// Lines appended after top-level statements, keyed by statement end.
    after: BTreeMap<usize, (bool, Vec<String>)>,
    hoisted: Vec<String>,
    registrations: Vec<String>,
    uses_closure_vars: bool,
    uses_register: bool,
}

impl<'a> Lowering<'a> {
    fn new(src: &'a str, mode: Mode) -> Self {
        Self {
            src,
            mode,
            edits: Vec::new(),
            after: BTreeMap::new(),
            hoisted: Vec::new(),
            registrations: Vec::new(),
            uses_closure_vars: false,
            uses_register: false,
        }
    }

    fn lower(&mut self, analysis: &Analysis) -> Result<()> {
        if let Some(directive) = analysis.file_directive {
            if self.mode != Mode::Client {
                self.edits.push(Edit::delete(directive_line(self.src, directive)));
            }
        }
        for function in &analysis.functions {
            match (function.kind, self.mode) {
                (FunctionKind::Workflow, Mode::Workflow) => self.keep_workflow(function)?,
                (FunctionKind::Workflow, Mode::Step | Mode::Client) => {
                    self.guard_workflow(function)?
                }
                (FunctionKind::Step, Mode::Step) => self.register_step(function)?,
                (FunctionKind::Step, Mode::Workflow) => self.proxy_step(function)?,
                (FunctionKind::Step, Mode::Client) => {}
            }
        }
        Ok(())
    }

    fn finish(mut self) -> String {
        for (end, (needs_semicolon, lines)) in std::mem::take(&mut self.after) {
            let mut text = String::new();
            if needs_semicolon {
                text.push(';');
            }
            for line in lines {
                text.push('\n');
                text.push_str(&line);
            }
            self.edits.push(Edit::insert(end, text));
        }

        let mut trailer = String::new();
        for item in self.hoisted.iter().chain(&self.registrations) {
            trailer.push('\n');
            trailer.push_str(item);
        }
        if !trailer.is_empty() {
            if !self.src.ends_with('\n') {
                trailer.insert(0, '\n');
            }
            trailer.push('\n');
            self.edits.push(Edit::insert(self.src.len(), trailer));
        }
        apply(self.src, self.edits)
    }

    fn after_statement(&mut self, module: &ModuleBinding, line: String) {
        self.after
            .entry(module.statement_end)
            .or_insert_with(|| (module.needs_semicolon, Vec::new()))
            .1
            .push(line);
    }

    fn strip_directive(&mut self, function: &DirectiveFunction) {
        if let Some(directive) = function.directive {
            self.edits.push(Edit::delete(directive_line(self.src, directive)));
        }
    }

    /// Give an anonymous default export its binding name.
    fn name_default_export(&mut self, module: &ModuleBinding) {
        match module.default_export {
            Some(DefaultExportFix::InsertName { gap }) => {
                self.edits.push(Edit::replace(gap, format!(" {}", module.name)));
            }
            Some(DefaultExportFix::Wrap { prefix }) => {
                self.edits
                    .push(Edit::replace(prefix, format!("const {} = ", module.name)));
                self.after_statement(module, format!("export default {};", module.name));
            }
            None => {}
        }
    }

    fn workflow_id(&mut self, function: &DirectiveFunction, module: &ModuleBinding) -> Result<()> {
        let line = format!("{}.workflowId = {};", module.name, js(function.id.as_str())?);
        self.after_statement(module, line);
        Ok(())
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    fn keep_workflow(&mut self, function: &DirectiveFunction) -> Result<()> {
        let Some(module) = &function.module else {
            return Ok(());
        };
        self.strip_directive(function);
        self.name_default_export(module);
        self.workflow_id(function, module)
    }

    fn guard_workflow(&mut self, function: &DirectiveFunction) -> Result<()> {
        let Some(module) = &function.module else {
            return Ok(());
        };
        let message = format!(
            "InvalidInvocation: workflow {} must be started through start(), not called directly",
            function.id
        );
        let span = match function.body {
            BodySpan::Block(span) | BodySpan::Expr(span) => span,
        };
        self.edits.push(Edit::replace(
            span,
            format!("{{\n    throw new Error({});\n}}", js(&message)?),
        ));
        self.name_default_export(module);
        self.workflow_id(function, module)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn register_step(&mut self, function: &DirectiveFunction) -> Result<()> {
        self.uses_register = true;
        let callable = match &function.module {
            Some(module) => {
                self.strip_directive(function);
                self.name_default_export(module);
                module.name.clone()
            }
            None => {
                self.hoist(function);
                let hoisted = &function.hoisted_name;
                let text = match &function.site {
                    BindingSite::Declaration { name } => format!(
                        "function {name}(...args) {{ return {hoisted}.apply(this, args); }}"
                    ),
                    BindingSite::Expression => hoisted.clone(),
                    BindingSite::ObjectMethod { key } => {
                        format!("{key}: (...args) => {hoisted}(...args)")
                    }
                    BindingSite::ClassMethod { key, is_static } => format!(
                        "{}{key}(...args) {{ return {hoisted}(...args); }}",
                        static_prefix(*is_static)
                    ),
                };
                self.edits.push(Edit::replace(function.span, text));
                hoisted.clone()
            }
        };
        self.registrations.push(format!(
            "{REGISTER_STEP}({}, {callable});",
            js(function.id.as_str())?
        ));
        Ok(())
    }

    /// Move a nested step to module level, reading its captures back from
    /// the closure the caller supplied.
    fn hoist(&mut self, function: &DirectiveFunction) {
        let src = self.src;
        let star = if function.is_generator { "*" } else { "" };
        let params = function.params_span.text(src);
        let params = if params.starts_with('(') {
            params.to_string()
        } else {
            format!("({params})")
        };
        let capture = if function.captures.is_empty() {
            String::new()
        } else {
            self.uses_closure_vars = true;
            format!(
                "\n    const {{ {} }} = {CLOSURE_VARS}();",
                function.captures.join(", ")
            )
        };

        let body = match function.body {
            BodySpan::Block(span) => {
                let holes: Vec<Span> = function
                    .directive
                    .map(|directive| directive_line(src, directive))
                    .into_iter()
                    .collect();
                let text = text_without(src, span, &holes);
                let inner = text.strip_prefix('{').unwrap_or(&text);
                format!("{{{capture}{inner}")
            }
            BodySpan::Expr(span) => {
                format!("{{{capture}\n    return {};\n}}", span.text(src))
            }
        };
        self.hoisted.push(format!(
            "async function{star} {}{params} {body}",
            function.hoisted_name
        ));
    }

    fn proxy_step(&mut self, function: &DirectiveFunction) -> Result<()> {
        let closure = if function.captures.is_empty() {
            String::new()
        } else {
            format!(", () => ({{ {} }})", function.captures.join(", "))
        };
        let proxy = format!("{STEP_PROXY}({}{closure})", js(function.id.as_str())?);
        let text = match &function.site {
            BindingSite::Declaration { name } => {
                format!("function {name}(...args) {{ return {proxy}(...args); }}")
            }
            BindingSite::Expression => proxy,
            BindingSite::ObjectMethod { key } => format!("{key}: {proxy}"),
            BindingSite::ClassMethod { key, is_static } => format!(
                "{}{key}(...args) {{ return {proxy}(...args); }}",
                static_prefix(*is_static)
            ),
        };
        self.edits.push(Edit::replace(function.span, text));
        Ok(())
    }
}

/// The directive statement, widened to its whole line when nothing else
/// shares the line, else to the blanks that follow it.
fn directive_line(src: &str, directive: Span) -> Span {
    let bytes = src.as_bytes();
    let mut start = directive.start;
    while start > 0 && matches!(bytes[start - 1], b' ' | b'\t') {
        start -= 1;
    }
    let mut end = directive.end;
    while end < bytes.len() && matches!(bytes[end], b' ' | b'\t') {
        end += 1;
    }
    let own_line = start == 0 || bytes[start - 1] == b'\n';
    if !own_line {
        return Span::new(directive.start, end);
    }
    if src[end..].starts_with("\r\n") {
        end += 2;
    } else if src[end..].starts_with('\n') {
        end += 1;
    } else {
        return Span::new(directive.start, end);
    }
    Span::new(start, end)
}

fn static_prefix(is_static: bool) -> &'static str {
    if is_static { "static " } else { "" }
}
