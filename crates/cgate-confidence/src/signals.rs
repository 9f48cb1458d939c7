//! Code-signal extraction
//!
//! Architecture, naming, and style signals of a candidate, in the same
//! shape project memory uses for established patterns, so the two compare
//! field by field.

use std::collections::HashMap;
use std::hash::Hash;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language::SourceLanguage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStyle {
    CamelCase,
    PascalCase,
    SnakeCase,
    ScreamingSnakeCase,
}

impl NamingStyle {
    /// Classify one identifier; single-word lowercase names carry no signal
    #[must_use]
    pub fn classify(ident: &str) -> Option<Self> {
        let ident = ident.trim_start_matches('_');
        let first = ident.chars().next()?;
        let has_underscore = ident.contains('_');
        let has_lower = ident.chars().any(char::is_lowercase);
        let has_upper = ident.chars().any(char::is_uppercase);
        if !has_lower && has_upper {
            return (has_underscore || ident.len() > 1).then_some(Self::ScreamingSnakeCase);
        }
        if has_underscore && !has_upper {
            return Some(Self::SnakeCase);
        }
        if first.is_uppercase() && !has_underscore {
            return Some(Self::PascalCase);
        }
        if first.is_lowercase() && has_upper && !has_underscore {
            return Some(Self::CamelCase);
        }
        None
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CamelCase => "camel_case",
            Self::PascalCase => "pascal_case",
            Self::SnakeCase => "snake_case",
            Self::ScreamingSnakeCase => "screaming_snake_case",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indentation {
    Tabs,
    Spaces2,
    Spaces4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleSystem {
    EsModules,
    CommonJs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncStyle {
    AsyncAwait,
    PromiseChains,
    Callbacks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStyle {
    /// `Result` propagation with `?`
    Propagation,
    /// `unwrap`/`expect`/`panic!`
    Panics,
    /// try/catch or try/except blocks
    Exceptions,
    /// Go-style `if err != nil`
    ErrorValues,
}

/// Architecture-level signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitecturePatterns {
    pub module_system: Option<ModuleSystem>,
    pub async_style: Option<AsyncStyle>,
    pub error_style: Option<ErrorStyle>,
}

/// Naming signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingPatterns {
    pub functions: Option<NamingStyle>,
    pub types: Option<NamingStyle>,
    pub constants: Option<NamingStyle>,
}

/// Formatting signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StylePatterns {
    pub indentation: Option<Indentation>,
    pub quotes: Option<QuoteStyle>,
    pub semicolons: Option<bool>,
}

/// Architecture, naming, and style aggregates
///
/// Used both for a candidate's extracted signals and for the patterns a
/// project has established.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSummary {
    pub architecture: ArchitecturePatterns,
    pub naming: NamingPatterns,
    pub style: StylePatterns,
}

impl PatternSummary {
    /// True if no dimension carries a signal
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Flat tags for memory comparison (`module:es_modules`, `naming:snake_case`, ...)
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        if let Some(m) = self.architecture.module_system {
            tags.push(format!("module:{}", variant_name(&m)));
        }
        if let Some(a) = self.architecture.async_style {
            tags.push(format!("async:{}", variant_name(&a)));
        }
        if let Some(e) = self.architecture.error_style {
            tags.push(format!("errors:{}", variant_name(&e)));
        }
        if let Some(n) = self.naming.functions {
            tags.push(format!("naming:{}", n.as_str()));
        }
        tags
    }
}

fn variant_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

static RUST_FN: Lazy<Regex> = Lazy::new(|| compile_regex(r"\bfn\s+([A-Za-z_][A-Za-z0-9_]*)"));
static RUST_TYPE: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"\b(?:struct|enum|trait|type)\s+([A-Za-z_][A-Za-z0-9_]*)"));
static RUST_CONST: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"\b(?:const|static)\s+([A-Za-z_][A-Za-z0-9_]*)\s*:"));
static JS_FN: Lazy<Regex> = Lazy::new(|| {
    compile_regex(
        r"\bfunction\s*\*?\s*([A-Za-z_$][\w$]*)|\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>",
    )
});
static JS_TYPE: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"\b(?:class|interface|type|enum)\s+([A-Za-z_$][\w$]*)"));
static JS_CONST: Lazy<Regex> = Lazy::new(|| compile_regex(r"\bconst\s+([A-Z][A-Z0-9_]+)\s*="));
static PY_FN: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?m)^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)"));
static PY_TYPE: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?m)^\s*class\s+([A-Za-z_]\w*)"));
static PY_CONST: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?m)^([A-Z][A-Z0-9_]+)\s*="));
static GO_FN: Lazy<Regex> =
    Lazy::new(|| compile_regex(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)"));
static GO_TYPE: Lazy<Regex> = Lazy::new(|| compile_regex(r"(?m)^type\s+([A-Za-z_]\w*)"));

pub(crate) fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Covered by the `signal_regexes_compile` test
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// Extract signals from candidate content
#[must_use]
pub fn extract_signals(content: &str, language: Option<SourceLanguage>) -> PatternSummary {
    let Some(language) = language else {
        return PatternSummary {
            style: StylePatterns {
                indentation: indentation(content),
                ..StylePatterns::default()
            },
            ..PatternSummary::default()
        };
    };

    let (fns, types, consts): (Rule, Rule, Rule) = match language {
        SourceLanguage::Rust => (Some(&RUST_FN), Some(&RUST_TYPE), Some(&RUST_CONST)),
        SourceLanguage::TypeScript | SourceLanguage::Tsx | SourceLanguage::JavaScript => {
            (Some(&JS_FN), Some(&JS_TYPE), Some(&JS_CONST))
        }
        SourceLanguage::Python => (Some(&PY_FN), Some(&PY_TYPE), Some(&PY_CONST)),
        SourceLanguage::Go => (Some(&GO_FN), Some(&GO_TYPE), None),
        SourceLanguage::Json | SourceLanguage::Yaml | SourceLanguage::Toml => (None, None, None),
    };

    PatternSummary {
        architecture: ArchitecturePatterns {
            module_system: module_system(content, language),
            async_style: async_style(content, language),
            error_style: error_style(content, language),
        },
        naming: NamingPatterns {
            functions: dominant_naming(content, fns),
            types: dominant_naming(content, types),
            constants: dominant_naming(content, consts),
        },
        style: StylePatterns {
            indentation: indentation(content),
            quotes: quotes(content, language),
            semicolons: semicolons(content, language),
        },
    }
}

type Rule = Option<&'static Lazy<Regex>>;

fn dominant_naming(content: &str, rule: Rule) -> Option<NamingStyle> {
    let re = rule?;
    let styles = re.captures_iter(content).filter_map(|caps| {
        caps.iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| NamingStyle::classify(m.as_str()))
    });
    dominant(styles)
}

/// Most frequent value; ties broken by first occurrence
fn dominant<T: Copy + Eq + Hash>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts: HashMap<T, (usize, usize)> = HashMap::new();
    for (idx, value) in values.into_iter().enumerate() {
        counts.entry(value).or_insert((0, idx)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        .map(|(value, _)| value)
}

fn indentation(content: &str) -> Option<Indentation> {
    let styles = content.lines().filter_map(|line| {
        if line.starts_with('\t') {
            Some(Indentation::Tabs)
        } else {
            let spaces = line.len() - line.trim_start_matches(' ').len();
            if spaces == 0 || line.trim().is_empty() {
                None
            } else if spaces % 4 == 0 {
                Some(Indentation::Spaces4)
            } else if spaces % 2 == 0 {
                Some(Indentation::Spaces2)
            } else {
                None
            }
        }
    });
    let mut seen_two = false;
    let mut seen_any = None;
    for style in styles {
        match style {
            Indentation::Tabs => return Some(Indentation::Tabs),
            Indentation::Spaces2 => seen_two = true,
            Indentation::Spaces4 => seen_any = Some(Indentation::Spaces4),
        }
    }
    // Any line at an odd multiple of two means two-space indentation.
    if seen_two {
        Some(Indentation::Spaces2)
    } else {
        seen_any
    }
}

fn quotes(content: &str, language: SourceLanguage) -> Option<QuoteStyle> {
    if !(language.is_js_family() || language == SourceLanguage::Python) {
        return None;
    }
    let single = content.matches('\'').count();
    let double = content.matches('"').count();
    match single.cmp(&double) {
        std::cmp::Ordering::Greater => Some(QuoteStyle::Single),
        std::cmp::Ordering::Less => Some(QuoteStyle::Double),
        std::cmp::Ordering::Equal => None,
    }
}

fn semicolons(content: &str, language: SourceLanguage) -> Option<bool> {
    if !language.is_js_family() {
        return None;
    }
    let statements: Vec<&str> = content
        .lines()
        .map(str::trim_end)
        .filter(|l| {
            let t = l.trim_start();
            !t.is_empty()
                && !t.starts_with("//")
                && !t.starts_with('*')
                && !t.starts_with("/*")
                && !t.ends_with('{')
                && !t.ends_with('}')
                && !t.ends_with(',')
                && !t.ends_with('(')
                && !t.ends_with('[')
        })
        .collect();
    if statements.is_empty() {
        return None;
    }
    let with = statements.iter().filter(|l| l.ends_with(';')).count();
    Some(with * 2 >= statements.len())
}

fn module_system(content: &str, language: SourceLanguage) -> Option<ModuleSystem> {
    if !language.is_js_family() {
        return None;
    }
    let esm = content.contains("import ") && content.contains(" from ") || content.contains("export ");
    let cjs = content.contains("require(") || content.contains("module.exports");
    match (esm, cjs) {
        (true, false) => Some(ModuleSystem::EsModules),
        (false, true) => Some(ModuleSystem::CommonJs),
        _ => None,
    }
}

fn async_style(content: &str, language: SourceLanguage) -> Option<AsyncStyle> {
    let awaits = content.matches("await ").count() + content.matches(".await").count();
    let thens = if language.is_js_family() { content.matches(".then(").count() } else { 0 };
    let callbacks = if language.is_js_family() {
        content.matches("function (err").count() + content.matches("(err) =>").count() + content.matches("(err, ").count()
    } else {
        0
    };
    dominant(
        std::iter::repeat(AsyncStyle::AsyncAwait)
            .take(awaits)
            .chain(std::iter::repeat(AsyncStyle::PromiseChains).take(thens))
            .chain(std::iter::repeat(AsyncStyle::Callbacks).take(callbacks)),
    )
}

fn error_style(content: &str, language: SourceLanguage) -> Option<ErrorStyle> {
    let (good, bad, good_style, bad_style) = match language {
        SourceLanguage::Rust => (
            content.matches("?;").count() + content.matches("?)").count() + content.matches("?.").count(),
            content.matches(".unwrap()").count() + content.matches(".expect(").count() + content.matches("panic!(").count(),
            ErrorStyle::Propagation,
            ErrorStyle::Panics,
        ),
        SourceLanguage::Go => (
            content.matches("err != nil").count(),
            content.matches("panic(").count(),
            ErrorStyle::ErrorValues,
            ErrorStyle::Panics,
        ),
        SourceLanguage::Python => (content.matches("except").count(), 0, ErrorStyle::Exceptions, ErrorStyle::Panics),
        SourceLanguage::TypeScript | SourceLanguage::Tsx | SourceLanguage::JavaScript => {
            (content.matches("catch").count(), 0, ErrorStyle::Exceptions, ErrorStyle::Panics)
        }
        SourceLanguage::Json | SourceLanguage::Yaml | SourceLanguage::Toml => return None,
    };
    match (good, bad) {
        (0, 0) => None,
        (g, b) if g >= b => Some(good_style),
        _ => Some(bad_style),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn signal_regexes_compile() {
        for re in [
            &RUST_FN, &RUST_TYPE, &RUST_CONST, &JS_FN, &JS_TYPE, &JS_CONST, &PY_FN, &PY_TYPE,
            &PY_CONST, &GO_FN, &GO_TYPE,
        ] {
            assert!(!re.as_str().is_empty());
        }
    }

    #[test]
    fn naming_classification() {
        assert_eq!(NamingStyle::classify("parseConfig"), Some(NamingStyle::CamelCase));
        assert_eq!(NamingStyle::classify("ParseConfig"), Some(NamingStyle::PascalCase));
        assert_eq!(NamingStyle::classify("parse_config"), Some(NamingStyle::SnakeCase));
        assert_eq!(NamingStyle::classify("MAX_SIZE"), Some(NamingStyle::ScreamingSnakeCase));
        assert_eq!(NamingStyle::classify("parse"), None);
    }

    #[test]
    fn typescript_signals() {
        let src = "import { db } from './db';\n\nexport async function loadUser(id: string) {\n  try {\n    return await db.find(id);\n  } catch (e) {\n    return null;\n  }\n}\n";
        let signals = extract_signals(src, Some(SourceLanguage::TypeScript));
        assert_eq!(signals.architecture.module_system, Some(ModuleSystem::EsModules));
        assert_eq!(signals.architecture.async_style, Some(AsyncStyle::AsyncAwait));
        assert_eq!(signals.architecture.error_style, Some(ErrorStyle::Exceptions));
        assert_eq!(signals.naming.functions, Some(NamingStyle::CamelCase));
        assert_eq!(signals.style.indentation, Some(Indentation::Spaces2));
        assert_eq!(signals.style.quotes, Some(QuoteStyle::Single));
        assert_eq!(signals.style.semicolons, Some(true));
    }

    #[test]
    fn rust_signals() {
        let src = "pub struct Config;\n\npub fn load_config(path: &str) -> Result<Config, Error> {\n    let text = read(path)?;\n    parse(&text)?;\n    Ok(Config)\n}\n";
        let signals = extract_signals(src, Some(SourceLanguage::Rust));
        assert_eq!(signals.architecture.error_style, Some(ErrorStyle::Propagation));
        assert_eq!(signals.naming.functions, Some(NamingStyle::SnakeCase));
        assert_eq!(signals.naming.types, Some(NamingStyle::PascalCase));
        assert_eq!(signals.style.indentation, Some(Indentation::Spaces4));
        assert_eq!(signals.architecture.module_system, None);
    }

    #[test]
    fn tags_are_stable() {
        let src = "const x = require('x');\nfunction doThing(cb) { x.run().then(cb); }\n";
        let tags = extract_signals(src, Some(SourceLanguage::JavaScript)).tags();
        assert_eq!(tags, vec!["module:common_js", "async:promise_chains", "naming:camel_case"]);
    }

    #[test]
    fn empty_summary() {
        assert!(PatternSummary::default().is_empty());
        assert!(extract_signals("{}", Some(SourceLanguage::Json)).naming.functions.is_none());
    }
}
