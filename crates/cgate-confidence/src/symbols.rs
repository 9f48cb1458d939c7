//! Exported-symbol extraction
//!
//! Public surface of a file, per language:
//! - Rust: `pub` items at module level (nested `pub mod` included, qualified)
//! - TypeScript/JavaScript: `export` declarations, clauses, and `default`
//! - Python: top-level functions and classes not starting with `_`
//! - Go: capitalized top-level declarations
//!
//! Removing a symbol present in the original is a breaking-change indicator.

use std::collections::BTreeSet;
use std::time::Instant;

use tree_sitter::Node;

use crate::language::SourceLanguage;
use crate::syntax::{parse_tree, ParseResult};

/// Exported symbols of `content`; empty for unsupported languages or parse failure
#[must_use]
pub fn exported_symbols(content: &str, language: SourceLanguage) -> BTreeSet<String> {
    exported_symbols_until(content, language, None).unwrap_or_default()
}

/// As [`exported_symbols`], but `None` if the parse passed `deadline`
#[must_use]
pub fn exported_symbols_until(
    content: &str,
    language: SourceLanguage,
    deadline: Option<Instant>,
) -> Option<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let tree = match parse_tree(content, language, deadline) {
        ParseResult::Parsed(tree) => tree,
        ParseResult::Cancelled => return None,
        ParseResult::Failed => return Some(out),
    };
    let root = tree.root_node();
    let src = content.as_bytes();

    match language {
        SourceLanguage::Rust => rust_exports(root, src, "", &mut out),
        SourceLanguage::TypeScript | SourceLanguage::Tsx | SourceLanguage::JavaScript => {
            js_exports(root, src, &mut out);
        }
        SourceLanguage::Python => python_exports(root, src, &mut out),
        SourceLanguage::Go => go_exports(root, src, &mut out),
        SourceLanguage::Json | SourceLanguage::Yaml | SourceLanguage::Toml => {}
    }
    Some(out)
}

/// Symbols present in `original` but missing from `candidate`
#[must_use]
pub fn removed_exports(original: &BTreeSet<String>, candidate: &BTreeSet<String>) -> Vec<String> {
    original.difference(candidate).cloned().collect()
}

fn text<'a>(node: Node<'_>, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

fn field_text(node: Node<'_>, field: &str, src: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| text(n, src).to_string())
        .filter(|s| !s.is_empty())
}

fn rust_exports(node: Node<'_>, src: &[u8], prefix: &str, out: &mut BTreeSet<String>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let is_item = matches!(
            child.kind(),
            "function_item"
                | "struct_item"
                | "enum_item"
                | "trait_item"
                | "type_item"
                | "const_item"
                | "static_item"
                | "mod_item"
                | "union_item"
        );
        if !is_item || !is_plain_pub(child, src) {
            continue;
        }
        let Some(name) = field_text(child, "name", src) else {
            continue;
        };
        let qualified = format!("{prefix}{name}");
        if child.kind() == "mod_item" {
            if let Some(body) = child.child_by_field_name("body") {
                rust_exports(body, src, &format!("{qualified}::"), out);
            }
        }
        out.insert(qualified);
    }
}

/// `pub` exactly; `pub(crate)` and friends are not part of the public surface
fn is_plain_pub(node: Node<'_>, src: &[u8]) -> bool {
    let mut cursor = node.walk();
    let result = node
        .children(&mut cursor)
        .any(|c| c.kind() == "visibility_modifier" && text(c, src) == "pub");
    result
}

fn js_exports(root: Node<'_>, src: &[u8], out: &mut BTreeSet<String>) {
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        if stmt.kind() != "export_statement" {
            continue;
        }
        let mut inner = stmt.walk();
        let children: Vec<Node<'_>> = stmt.children(&mut inner).collect();
        if children.iter().any(|c| c.kind() == "default") {
            out.insert("default".to_string());
            continue;
        }
        if let Some(decl) = stmt.child_by_field_name("declaration") {
            js_declaration_names(decl, src, out);
        }
        for clause in children.iter().filter(|c| c.kind() == "export_clause") {
            let mut spec_cursor = clause.walk();
            for spec in clause.named_children(&mut spec_cursor) {
                if spec.kind() != "export_specifier" {
                    continue;
                }
                if let Some(name) = field_text(spec, "alias", src).or_else(|| field_text(spec, "name", src)) {
                    out.insert(name);
                }
            }
        }
    }
}

fn js_declaration_names(decl: Node<'_>, src: &[u8], out: &mut BTreeSet<String>) {
    match decl.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = decl.walk();
            for declarator in decl.named_children(&mut cursor) {
                if declarator.kind() == "variable_declarator" {
                    if let Some(name) = field_text(declarator, "name", src) {
                        out.insert(name);
                    }
                }
            }
        }
        _ => {
            if let Some(name) = field_text(decl, "name", src) {
                out.insert(name);
            }
        }
    }
}

fn python_exports(root: Node<'_>, src: &[u8], out: &mut BTreeSet<String>) {
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        let def = if stmt.kind() == "decorated_definition" {
            stmt.child_by_field_name("definition")
        } else {
            Some(stmt)
        };
        let Some(def) = def else { continue };
        if !matches!(def.kind(), "function_definition" | "class_definition") {
            continue;
        }
        if let Some(name) = field_text(def, "name", src) {
            if !name.starts_with('_') {
                out.insert(name);
            }
        }
    }
}

fn go_exports(root: Node<'_>, src: &[u8], out: &mut BTreeSet<String>) {
    let mut cursor = root.walk();
    for decl in root.named_children(&mut cursor) {
        match decl.kind() {
            "function_declaration" | "method_declaration" => {
                if let Some(name) = field_text(decl, "name", src) {
                    insert_if_exported(name, out);
                }
            }
            "type_declaration" | "const_declaration" | "var_declaration" => {
                let mut spec_cursor = decl.walk();
                for spec in decl.named_children(&mut spec_cursor) {
                    if !matches!(spec.kind(), "type_spec" | "const_spec" | "var_spec" | "type_alias") {
                        continue;
                    }
                    let mut name_cursor = spec.walk();
                    for name in spec.children_by_field_name("name", &mut name_cursor) {
                        insert_if_exported(text(name, src).to_string(), out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn insert_if_exported(name: String, out: &mut BTreeSet<String>) {
    if name.chars().next().is_some_and(char::is_uppercase) {
        out.insert(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn rust_public_items() {
        let src = "pub fn a() {}\nfn b() {}\npub(crate) fn c() {}\npub struct S;\npub mod m { pub fn inner() {} fn hidden() {} }\n";
        let set = exported_symbols(src, SourceLanguage::Rust);
        assert_eq!(names(&set), vec!["S", "a", "m", "m::inner"]);
    }

    #[test]
    fn typescript_exports() {
        let src = "export function login() {}\nexport const a = 1, b = 2;\nconst c = 3;\nexport { c as renamed };\nexport interface User { id: string }\nexport default class App {}\n";
        let set = exported_symbols(src, SourceLanguage::TypeScript);
        assert_eq!(names(&set), vec!["User", "a", "b", "default", "login", "renamed"]);
    }

    #[test]
    fn python_public_defs() {
        let src = "def public():\n    pass\n\ndef _private():\n    pass\n\n@decorator\nclass Model:\n    pass\n";
        let set = exported_symbols(src, SourceLanguage::Python);
        assert_eq!(names(&set), vec!["Model", "public"]);
    }

    #[test]
    fn go_capitalized() {
        let src = "package x\n\nfunc Public() {}\nfunc private() {}\ntype Config struct{}\nconst Max = 3\n";
        let set = exported_symbols(src, SourceLanguage::Go);
        assert_eq!(names(&set), vec!["Config", "Max", "Public"]);
    }

    #[test]
    fn removed_exports_detected() {
        let before = exported_symbols("pub fn a() {}\npub fn b() {}\n", SourceLanguage::Rust);
        let after = exported_symbols("pub fn a() {}\npub fn c() {}\n", SourceLanguage::Rust);
        assert_eq!(removed_exports(&before, &after), vec!["b".to_string()]);
    }

    #[test]
    fn expired_deadline_yields_no_symbols() {
        let src: String = (0..20_000).map(|i| format!("pub fn f{i}() {{}}\n")).collect();
        assert_eq!(exported_symbols_until(&src, SourceLanguage::Rust, Some(Instant::now())), None);
        let small = exported_symbols_until("pub fn a() {}\n", SourceLanguage::Rust, None).unwrap();
        assert_eq!(names(&small), vec!["a"]);
    }
}
