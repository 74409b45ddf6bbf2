//! Line-level ES module to CommonJS rewrite over transpiler output.
//!
//! The transpiler prints top-level statements flush left, one declaration
//! head per line, so import and export forms are rewritten in place. Names
//! bound by exported declarations come from the parsed module instead, since
//! one declaration can bind several of them. The returned code starts with
//! one prelude line (export getters) followed by the module body with its
//! line numbers unchanged.

use std::sync::LazyLock;

use {
    deno_ast::swc::ast as swc_ast,
    regex::{Captures, Regex},
};

use crate::error::{Error, Result};

struct Patterns {
    import_from: Regex,
    import_bare: Regex,
    export_from: Regex,
    export_star: Regex,
    export_list: Regex,
    export_default_decl: Regex,
    export_default: Regex,
    export_decl: Regex,
}

impl Patterns {
    fn compile() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            import_from: Regex::new(r#"^import\s+(.+?)\s+from\s*["']([^"']+)["']\s*;?\s*$"#)?,
            import_bare: Regex::new(r#"^import\s*["']([^"']+)["']\s*;?\s*$"#)?,
            export_from: Regex::new(r#"^export\s*\{([^}]*)\}\s*from\s*["']([^"']+)["']\s*;?\s*$"#)?,
            export_star: Regex::new(
                r#"^export\s*\*\s*(?:as\s+([A-Za-z_$][\w$]*)\s+)?from\s*["']([^"']+)["']\s*;?\s*$"#,
            )?,
            export_list: Regex::new(r"^export\s*\{([^}]*)\}\s*;?\s*$")?,
            export_default_decl: Regex::new(
                r"^export\s+default\s+((?:async\s+)?function\b\s*\*?|class\b)\s*([A-Za-z_$][\w$]*)?",
            )?,
            export_default: Regex::new(r"^export\s+default\s+")?,
            export_decl: Regex::new(
                r"^export\s+(?:(?:async\s+)?function\b|class\b|const\b|let\b|var\b)",
            )?,
        })
    }
}

static PATTERNS: LazyLock<std::result::Result<Patterns, regex::Error>> =
    LazyLock::new(Patterns::compile);

fn patterns() -> Result<&'static Patterns> {
    PATTERNS
        .as_ref()
        .map_err(|e| Error::domain(format!("module rewrite patterns failed to compile: {e}")))
}

static REQUIRE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#));

/// Every string literal passed to `require(...)`, in source order.
pub(super) fn required_specifiers(code: &str) -> Result<Vec<String>> {
    let re = REQUIRE
        .as_ref()
        .map_err(|e| Error::domain(format!("require pattern failed to compile: {e}")))?;
    Ok(re
        .captures_iter(code)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect())
}

/// Every local name bound by an `export <declaration>` item of `module`, in
/// source order. Declarations the transpiler erases are skipped.
pub(super) fn declared_exports(module: &swc_ast::Module) -> Vec<String> {
    let mut names = Vec::new();
    for item in &module.body {
        let swc_ast::ModuleItem::ModuleDecl(swc_ast::ModuleDecl::ExportDecl(export)) = item else {
            continue;
        };
        match &export.decl {
            decl if is_type_only(decl) => {},
            swc_ast::Decl::Fn(f) => names.push(f.ident.sym.to_string()),
            swc_ast::Decl::Class(c) => names.push(c.ident.sym.to_string()),
            swc_ast::Decl::Var(v) => {
                for declarator in &v.decls {
                    pattern_names(&declarator.name, &mut names);
                }
            },
            swc_ast::Decl::TsEnum(e) => names.push(e.id.sym.to_string()),
            swc_ast::Decl::TsModule(m) => {
                if let swc_ast::TsModuleName::Ident(id) = &m.id {
                    names.push(id.sym.to_string());
                }
            },
            _ => {},
        }
    }
    names
}

/// Declarations that leave no runtime binding after transpiling.
fn is_type_only(decl: &swc_ast::Decl) -> bool {
    match decl {
        swc_ast::Decl::TsInterface(_) | swc_ast::Decl::TsTypeAlias(_) => true,
        swc_ast::Decl::Fn(f) => f.declare,
        swc_ast::Decl::Class(c) => c.declare,
        swc_ast::Decl::Var(v) => v.declare,
        swc_ast::Decl::TsEnum(e) => e.declare,
        swc_ast::Decl::TsModule(m) => m.declare || !namespace_has_values(m.body.as_ref()),
        swc_ast::Decl::Using(_) => false,
    }
}

fn namespace_has_values(body: Option<&swc_ast::TsNamespaceBody>) -> bool {
    match body {
        None => false,
        Some(swc_ast::TsNamespaceBody::TsNamespaceDecl(inner)) => {
            namespace_has_values(Some(&inner.body))
        },
        Some(swc_ast::TsNamespaceBody::TsModuleBlock(block)) => {
            block.body.iter().any(|item| match item {
                swc_ast::ModuleItem::ModuleDecl(swc_ast::ModuleDecl::ExportDecl(e)) => {
                    !is_type_only(&e.decl)
                },
                swc_ast::ModuleItem::Stmt(swc_ast::Stmt::Decl(d)) => !is_type_only(d),
                swc_ast::ModuleItem::Stmt(swc_ast::Stmt::Empty(_)) => false,
                _ => true,
            })
        },
    }
}

fn pattern_names(pat: &swc_ast::Pat, names: &mut Vec<String>) {
    match pat {
        swc_ast::Pat::Ident(id) => names.push(id.sym.to_string()),
        swc_ast::Pat::Array(arr) => {
            for elem in arr.elems.iter().flatten() {
                pattern_names(elem, names);
            }
        },
        swc_ast::Pat::Object(obj) => {
            for prop in &obj.props {
                match prop {
                    swc_ast::ObjectPatProp::KeyValue(kv) => pattern_names(&kv.value, names),
                    swc_ast::ObjectPatProp::Assign(a) => names.push(a.key.sym.to_string()),
                    swc_ast::ObjectPatProp::Rest(rest) => pattern_names(&rest.arg, names),
                }
            }
        },
        swc_ast::Pat::Rest(rest) => pattern_names(&rest.arg, names),
        swc_ast::Pat::Assign(a) => pattern_names(&a.left, names),
        swc_ast::Pat::Expr(_) | swc_ast::Pat::Invalid(_) => {},
    }
}

/// Rewrite `source` to CommonJS. `declared` lists the names bound by its
/// exported declarations (see [`declared_exports`]).
pub(super) fn to_commonjs(source: &str, declared: &[String]) -> Result<String> {
    let p = patterns()?;
    let mut rewriter = Rewriter {
        esm: !declared.is_empty(),
        getters: declared.iter().map(|n| (n.clone(), n.clone())).collect(),
        ..Rewriter::default()
    };
    let body: Vec<String> = source
        .lines()
        .map(|line| rewriter.rewrite_line(p, line))
        .collect();

    let mut out = String::with_capacity(source.len() + 256);
    if rewriter.esm {
        out.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });");
        for (exported, local) in &rewriter.getters {
            out.push_str(&format!(
                " Object.defineProperty(exports, {}, {{ enumerable: true, get: () => {local} }});",
                js_string(exported)
            ));
        }
    }
    out.push('\n');
    out.push_str(&body.join("\n"));
    Ok(out)
}

#[derive(Default)]
struct Rewriter {
    esm: bool,
    next_binding: usize,
    /// (exported name, local expression)
    getters: Vec<(String, String)>,
}

impl Rewriter {
    fn binding(&mut self) -> String {
        let name = format!("__jamra_m{}", self.next_binding);
        self.next_binding += 1;
        name
    }

    fn rewrite_line(&mut self, p: &Patterns, line: &str) -> String {
        if let Some(c) = p.import_from.captures(line) {
            self.esm = true;
            return self.import_clause(&c[1], &c[2]);
        }
        if let Some(c) = p.import_bare.captures(line) {
            self.esm = true;
            return format!("require({});", js_string(&c[1]));
        }
        if let Some(c) = p.export_from.captures(line) {
            self.esm = true;
            let binding = self.binding();
            for (local, exported) in specifier_pairs(&c[1]) {
                self.getters.push((exported, format!("{binding}.{local}")));
            }
            return format!("const {binding} = require({});", js_string(&c[2]));
        }
        if let Some(c) = p.export_star.captures(line) {
            self.esm = true;
            let spec = js_string(&c[2]);
            return match c.get(1) {
                Some(ns) => {
                    let binding = self.binding();
                    self.getters.push((ns.as_str().to_string(), binding.clone()));
                    format!("const {binding} = require({spec});")
                },
                None => format!("__jamra_export_star(require({spec}), exports);"),
            };
        }
        if let Some(c) = p.export_list.captures(line) {
            self.esm = true;
            for (local, exported) in specifier_pairs(&c[1]) {
                self.getters.push((exported, local));
            }
            return String::new();
        }
        if let Some(c) = p.export_default_decl.captures(line) {
            self.esm = true;
            return self.export_default_decl(line, &c);
        }
        if let Some(m) = p.export_default.find(line) {
            self.esm = true;
            return format!("exports.default = {}", &line[m.end()..]);
        }
        if p.export_decl.is_match(line) {
            self.esm = true;
            return line["export".len()..].trim_start().to_string();
        }
        line.to_string()
    }

    fn export_default_decl(&mut self, line: &str, c: &Captures<'_>) -> String {
        let rest = line["export".len()..].trim_start()["default".len()..].trim_start();
        match c.get(2).map(|m| m.as_str()) {
            Some(name) if name != "extends" => {
                self.getters.push(("default".into(), name.to_string()));
                rest.to_string()
            },
            _ => format!("exports.default = {rest}"),
        }
    }

    fn import_clause(&mut self, clause: &str, specifier: &str) -> String {
        let binding = self.binding();
        let mut out = format!("const {binding} = require({});", js_string(specifier));
        let clause = clause.trim();

        let (default_name, rest) = if clause.starts_with('{') || clause.starts_with('*') {
            (None, clause)
        } else {
            match clause.split_once(',') {
                Some((d, rest)) => (Some(d.trim()), rest.trim()),
                None => (Some(clause), ""),
            }
        };

        if let Some(name) = default_name {
            out.push_str(&format!(" const {name} = __jamra_default({binding});"));
        }
        if let Some(ns) = rest.strip_prefix('*') {
            let ns = ns.trim();
            let ns = ns.strip_prefix("as").unwrap_or(ns).trim();
            out.push_str(&format!(" const {ns} = {binding};"));
        } else if let Some(list) = rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            let fields: Vec<String> = specifier_pairs(list)
                .into_iter()
                .map(|(imported, local)| {
                    if imported == local {
                        local
                    } else {
                        format!("{imported}: {local}")
                    }
                })
                .collect();
            if !fields.is_empty() {
                out.push_str(&format!(" const {{ {} }} = {binding};", fields.join(", ")));
            }
        }
        out
    }
}

/// Parse `a, b as c` into `[(a, a), (b, c)]`.
fn specifier_pairs(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once(" as ") {
            Some((from, to)) => (from.trim().to_string(), to.trim().to_string()),
            None => (s.to_string(), s.to_string()),
        })
        .collect()
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn body(out: &str) -> Vec<&str> {
        out.split('\n').skip(1).collect()
    }

    fn exports_of(src: &str) -> Vec<String> {
        let parsed = deno_ast::parse_module(deno_ast::ParseParams {
            specifier: deno_ast::ModuleSpecifier::parse("file:///mod.ts").unwrap(),
            text: src.into(),
            media_type: deno_ast::MediaType::TypeScript,
            capture_tokens: false,
            scope_analysis: false,
            maybe_syntax: None,
        })
        .unwrap();
        match parsed.program_ref() {
            deno_ast::ProgramRef::Module(module) => declared_exports(module),
            deno_ast::ProgramRef::Script(_) => Vec::new(),
        }
    }

    fn rewrite(src: &str) -> String {
        to_commonjs(src, &exports_of(src)).unwrap()
    }

    #[test]
    fn plain_commonjs_is_untouched() {
        let src = "const x = require(\"./x\");\nmodule.exports = { x };";
        let out = rewrite(src);
        assert_eq!(out.lines().next(), Some(""));
        assert_eq!(body(&out), src.lines().collect::<Vec<_>>());
    }

    #[test]
    fn imports_become_requires() {
        let src = "import fmt, { a, b as c } from \"./util.ts\";\nimport * as ns from './ns';\nimport \"./side\";";
        let out = rewrite(src);
        let lines = body(&out);
        assert_eq!(
            lines[0],
            "const __jamra_m0 = require(\"./util.ts\"); const fmt = __jamra_default(__jamra_m0); const { a, b: c } = __jamra_m0;"
        );
        assert_eq!(
            lines[1],
            "const __jamra_m1 = require(\"./ns\"); const ns = __jamra_m1;"
        );
        assert_eq!(lines[2], "require(\"./side\");");
    }

    #[test]
    fn exports_become_getters_without_shifting_lines() {
        let src = "export const search = async (q)=>q;\nexport default class Source {\n}\nfunction helper() {}\nexport { helper as util };";
        let out = rewrite(src);
        let prelude = out.lines().next().unwrap();
        assert!(prelude.contains("\"__esModule\""));
        assert!(prelude.contains("\"search\", { enumerable: true, get: () => search }"));
        assert!(prelude.contains("\"default\", { enumerable: true, get: () => Source }"));
        assert!(prelude.contains("\"util\", { enumerable: true, get: () => helper }"));

        let lines = body(&out);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "const search = async (q)=>q;");
        assert_eq!(lines[1], "class Source {");
        assert_eq!(lines[4], "");
    }

    #[test]
    fn anonymous_default_is_assigned() {
        let out = rewrite("export default {\n  id: \"x\"\n};");
        assert_eq!(body(&out)[0], "exports.default = {");

        let out = rewrite("export default class extends Base {\n}");
        assert_eq!(body(&out)[0], "exports.default = class extends Base {");
    }

    #[test]
    fn re_exports() {
        let out = rewrite("export * from \"./a\";\nexport { x, y as z } from \"./b\";");
        let lines = body(&out);
        assert_eq!(lines[0], "__jamra_export_star(require(\"./a\"), exports);");
        assert_eq!(lines[1], "const __jamra_m0 = require(\"./b\");");
        assert!(out.lines().next().unwrap().contains("get: () => __jamra_m0.y"));
    }

    #[test]
    fn every_declarator_and_pattern_is_exported() {
        let src = "export const a = 1, b = 2;\nexport const { c, d: e, ...f } = obj;\nexport let [g, , [h], i = 3, ...j] = list;\nexport function k() {}\nexport class L {}";
        assert_eq!(
            exports_of(src),
            vec!["a", "b", "c", "e", "f", "g", "h", "i", "j", "k", "L"]
        );

        let out = rewrite(src);
        let prelude = out.lines().next().unwrap();
        for name in ["a", "b", "c", "e", "f", "g", "h", "i", "j", "k", "L"] {
            assert!(
                prelude.contains(&format!("\"{name}\", {{ enumerable: true, get: () => {name} }}")),
                "missing getter for {name}: {prelude}"
            );
        }
        assert!(!prelude.contains("\"d\""));
        assert_eq!(body(&out)[0], "const a = 1, b = 2;");
        assert_eq!(body(&out)[1], "const { c, d: e, ...f } = obj;");
    }

    #[test]
    fn erased_declarations_are_not_exported() {
        let src = "export interface Options { q: string }\nexport type Id = string;\nexport declare const host: string;\nexport enum Kind { A }\nexport namespace Util { export const x = 1; }\nexport namespace Shapes { export interface Circle { r: number } }";
        assert_eq!(exports_of(src), vec!["Kind", "Util"]);
    }

    #[test]
    fn finds_required_specifiers() {
        let specs = required_specifiers("const a = require('./a');\nrequire(\"lodash\")").unwrap();
        assert_eq!(specs, vec!["./a", "lodash"]);
    }
}
