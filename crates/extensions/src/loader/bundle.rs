//! Single-file bundling of an extension entry and its local imports.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    path::{Path, PathBuf},
};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    deno_ast::{
        EmitOptions, MediaType, ModuleSpecifier, ParseParams, ProgramRef,
        TranspileModuleOptions, TranspileOptions,
    },
    serde_json::{Value, json},
};

use crate::{
    error::{Error, Result},
    loader::esm,
};

/// Entry file extensions the loader accepts.
pub const SUPPORTED_ENTRY_EXTENSIONS: &[&str] = &["js", "cjs", "mjs", "ts", "tsx", "jsx"];

/// Probe order for extensionless relative imports.
const RESOLVE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json"];

const INLINE_MAP_MARKER: &str = "//# sourceMappingURL=data:application/json;base64,";

const RUNTIME_PRELUDE: &str = r#"(function () {
const __jamra_defs = Object.create(null);
const __jamra_cache = Object.create(null);
function __jamra_load(key) {
  const cached = __jamra_cache[key];
  if (cached !== undefined) return cached.exports;
  const def = __jamra_defs[key];
  const module = { exports: {} };
  __jamra_cache[key] = module;
  const require = (specifier) => {
    const target = def.deps[specifier];
    if (target === undefined) {
      throw new Error("Cannot find module '" + specifier + "' from '" + key + "'");
    }
    return __jamra_load(target);
  };
  def.fn.call(module.exports, module, module.exports, require);
  return module.exports;
}
function __jamra_default(mod) {
  return mod && mod.__esModule ? mod.default : mod;
}
function __jamra_export_star(from, to) {
  for (const name of Object.keys(from)) {
    if (name !== "default" && !Object.prototype.hasOwnProperty.call(to, name)) {
      Object.defineProperty(to, name, { enumerable: true, get: () => from[name] });
    }
  }
}
"#;

/// Output of [`bundle_entry`].
pub(super) struct Bundle {
    pub code: String,
    pub source_map: Option<String>,
}

struct CompiledModule {
    key: String,
    /// One prelude line followed by the module body.
    code: String,
    map: Option<Value>,
    deps: BTreeMap<String, String>,
}

/// Bundle `entry` and every relative import reachable from it into one
/// self-evaluating script whose completion value is the entry's exports.
///
/// Imports are resolved inside `root` only. Bare specifiers are left for the
/// executing context to reject.
pub(super) fn bundle_entry(root: &Path, entry: &Path) -> Result<Bundle> {
    let root = root.canonicalize().map_err(|e| {
        Error::validation(format!(
            "extension directory {} is not readable: {e}",
            root.display()
        ))
    })?;
    let entry = entry.canonicalize().map_err(|e| {
        Error::validation(format!("entry file {} not found: {e}", entry.display()))
    })?;
    if !entry.starts_with(&root) {
        return Err(Error::validation(format!(
            "entry file {} is outside the extension directory",
            entry.display()
        )));
    }

    let entry_key = module_key(&root, &entry);
    let mut keys: HashMap<PathBuf, String> = HashMap::from([(entry.clone(), entry_key.clone())]);
    let mut queue = VecDeque::from([entry]);
    let mut modules = Vec::new();

    while let Some(path) = queue.pop_front() {
        let key = module_key(&root, &path);
        let mut module = compile_module(&path, key)?;

        for specifier in esm::required_specifiers(&module.code)? {
            if !(specifier.starts_with("./") || specifier.starts_with("../")) {
                continue;
            }
            let resolved = resolve_import(&root, &path, &specifier).ok_or_else(|| {
                Error::validation(format!(
                    "cannot resolve import '{specifier}' from '{}'",
                    module.key
                ))
            })?;
            let dep_key = keys
                .entry(resolved.clone())
                .or_insert_with(|| {
                    queue.push_back(resolved.clone());
                    module_key(&root, &resolved)
                })
                .clone();
            module.deps.insert(specifier, dep_key);
        }
        modules.push(module);
    }

    if modules
        .first()
        .is_none_or(|m| m.code.trim().is_empty())
    {
        return Err(Error::validation(format!(
            "compilation of {entry_key} produced no output"
        )));
    }

    assemble(&entry_key, modules)
}

fn assemble(entry_key: &str, modules: Vec<CompiledModule>) -> Result<Bundle> {
    let mut out = String::from(RUNTIME_PRELUDE);
    let mut sections = Vec::new();

    for module in modules {
        out.push_str(&format!(
            "__jamra_defs[{}] = {{ deps: {}, fn: function (module, exports, require) {{\n",
            serde_json::to_string(&module.key)?,
            serde_json::to_string(&module.deps)?,
        ));
        if let Some(map) = module.map {
            // Body starts one line below the module's prelude line.
            let line = out.matches('\n').count() + 1;
            sections.push(json!({ "offset": { "line": line, "column": 0 }, "map": map }));
        }
        out.push_str(&module.code);
        out.push_str("\n}};\n");
    }
    out.push_str(&format!(
        "return __jamra_load({});\n}})()\n",
        serde_json::to_string(entry_key)?
    ));

    let source_map = if sections.is_empty() {
        None
    } else {
        let index = json!({ "version": 3, "file": entry_key, "sections": sections });
        let encoded = serde_json::to_string(&index)?;
        out.push_str(INLINE_MAP_MARKER);
        out.push_str(&STANDARD.encode(&encoded));
        out.push('\n');
        Some(encoded)
    };

    Ok(Bundle {
        code: out,
        source_map,
    })
}

fn compile_module(path: &Path, key: String) -> Result<CompiledModule> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let source = std::fs::read_to_string(path)?;

    if ext == "json" {
        serde_json::from_str::<Value>(&source)
            .map_err(|e| Error::validation(format!("invalid JSON module {key}: {e}")))?;
        return Ok(CompiledModule {
            key,
            code: format!("\nmodule.exports = {};", source.trim()),
            map: None,
            deps: BTreeMap::new(),
        });
    }

    if !SUPPORTED_ENTRY_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::validation(format!(
            "unsupported module type .{ext} for {key}"
        )));
    }

    let (text, map, declared) = transpile(path, source)?;
    Ok(CompiledModule {
        key,
        code: esm::to_commonjs(&text, &declared)?,
        map,
        deps: BTreeMap::new(),
    })
}

/// Transpiled text, its source map and the names its exported declarations bind.
fn transpile(path: &Path, source: String) -> Result<(String, Option<Value>, Vec<String>)> {
    let specifier = ModuleSpecifier::from_file_path(path)
        .map_err(|()| Error::validation(format!("invalid module path {}", path.display())))?;
    let parsed = deno_ast::parse_module(ParseParams {
        specifier,
        text: source.into(),
        media_type: MediaType::from_path(path),
        capture_tokens: false,
        scope_analysis: false,
        maybe_syntax: None,
    })
    .map_err(|e| Error::domain(format!("failed to parse {}: {e}", path.display())))?;

    let declared = match parsed.program_ref() {
        ProgramRef::Module(module) => esm::declared_exports(module),
        ProgramRef::Script(_) => Vec::new(),
    };

    let emitted = parsed
        .transpile(
            &TranspileOptions::default(),
            &TranspileModuleOptions::default(),
            &EmitOptions::default(),
        )
        .map_err(|e| Error::domain(format!("failed to transpile {}: {e}", path.display())))?
        .into_source();

    let (text, map) = split_inline_map(&emitted.text);
    Ok((text, map, declared))
}

/// Detach a trailing inline source map comment, decoding it when possible.
fn split_inline_map(text: &str) -> (String, Option<Value>) {
    let Some(idx) = text.rfind(INLINE_MAP_MARKER) else {
        return (text.to_string(), None);
    };
    let encoded = text[idx + INLINE_MAP_MARKER.len()..].trim();
    let map = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());
    (text[..idx].trim_end().to_string(), map)
}

fn resolve_import(root: &Path, from: &Path, specifier: &str) -> Option<PathBuf> {
    let base = from.parent()?.join(specifier);
    let mut candidates = vec![base.clone()];
    candidates.extend(RESOLVE_EXTENSIONS.iter().map(|ext| with_suffix(&base, ext)));
    // `./util.js` written against a TypeScript `util.ts`.
    if base
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e, "js" | "jsx" | "mjs" | "cjs"))
    {
        candidates.push(base.with_extension("ts"));
        candidates.push(base.with_extension("tsx"));
    }
    candidates.extend(
        RESOLVE_EXTENSIONS
            .iter()
            .map(|ext| base.join(format!("index.{ext}"))),
    );

    candidates
        .into_iter()
        .filter(|c| c.is_file())
        .filter_map(|c| c.canonicalize().ok())
        .find(|c| c.starts_with(root))
}

fn with_suffix(base: &Path, ext: &str) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

fn module_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn bundles_local_imports_once() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/index.ts",
            "import { greet } from \"./util\";\nimport data from \"./data.json\";\nexport default { greet, data };\n",
        );
        write(
            dir.path(),
            "src/util.ts",
            "import data from \"./data.json\";\nexport function greet(name: string): string {\n  return `hi ${name} ${data.v}`;\n}\n",
        );
        write(dir.path(), "src/data.json", "{\"v\": 1}");

        let bundle = bundle_entry(dir.path(), &dir.path().join("src/index.ts")).unwrap();
        assert_eq!(bundle.code.matches("__jamra_defs[\"src/util.ts\"]").count(), 1);
        assert_eq!(bundle.code.matches("__jamra_defs[\"src/data.json\"]").count(), 1);
        assert!(bundle.code.contains("return __jamra_load(\"src/index.ts\");"));
        assert!(bundle.code.contains("\"./util\":\"src/util.ts\""));
        assert!(!bundle.code.contains(": string"));
    }

    #[test]
    fn multi_binding_exports_survive_bundling() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "index.ts",
            "const obj = { c: 3, d: 4 };\nexport const a: number = 1, b = 2;\nexport const { c, d } = obj;\n",
        );
        let bundle = bundle_entry(dir.path(), &dir.path().join("index.ts")).unwrap();
        for name in ["a", "b", "c", "d"] {
            assert!(
                bundle
                    .code
                    .contains(&format!("\"{name}\", {{ enumerable: true, get: () => {name} }}")),
                "no export for {name}"
            );
        }
    }

    #[test]
    fn missing_import_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.js", "const x = require(\"./nope\");\nmodule.exports = x;\n");
        let err = bundle_entry(dir.path(), &dir.path().join("index.js"))
            .err()
            .unwrap();
        assert!(err.is_validation());
        assert!(err.to_string().contains("./nope"));
    }

    #[test]
    fn empty_entry_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.js", "");
        let err = bundle_entry(dir.path(), &dir.path().join("index.js"))
            .err()
            .unwrap();
        assert!(err.is_validation());
        assert!(err.to_string().contains("produced no output"));
    }

    #[test]
    fn bare_specifiers_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "index.js",
            "const cheerio = require(\"cheerio\");\nmodule.exports = { cheerio };\n",
        );
        let bundle = bundle_entry(dir.path(), &dir.path().join("index.js")).unwrap();
        assert!(bundle.code.contains("deps: {}"));
    }

    #[test]
    fn resolves_directory_index() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/index.ts", "export const x = 1;\n");
        write(dir.path(), "a.ts", "");
        let found = resolve_import(
            &dir.path().canonicalize().unwrap(),
            &dir.path().canonicalize().unwrap().join("a.ts"),
            "./lib",
        )
        .unwrap();
        assert!(found.ends_with("lib/index.ts"));
    }

    #[test]
    fn splits_inline_map() {
        let map = STANDARD.encode(r#"{"version":3,"mappings":""}"#);
        let (code, parsed) = split_inline_map(&format!("let a = 1;\n{INLINE_MAP_MARKER}{map}"));
        assert_eq!(code, "let a = 1;");
        assert_eq!(parsed.unwrap()["version"], 3);
    }
}
