//! Type-definitions generation from the backend schema.
//!
//! The backend's collections and fields are rendered into a Rust source
//! file of serde structs, then caller-supplied rename rules (plus the
//! built-in image-alias rule) are applied to the rendered text.

use crate::config::RenamePattern;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// One collection as reported by the backend's `/collections` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionInfo {
    pub collection: String,
}

/// One field as reported by `/fields`.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldInfo {
    pub collection: String,
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub schema: Option<FieldSchemaInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSchemaInfo {
    #[serde(default)]
    pub is_nullable: bool,
}

#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    pub field_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct SchemaCollection {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

/// The assembled backend schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub collections: Vec<SchemaCollection>,
}

impl Schema {
    /// Join the `/collections` and `/fields` listings into one schema.
    /// Collection order follows the listing; fields keep their reported
    /// order.
    pub fn assemble(collections: Vec<CollectionInfo>, fields: Vec<FieldInfo>) -> Self {
        let schema_collections = collections
            .into_iter()
            .map(|info| {
                let collection_fields = fields
                    .iter()
                    .filter(|f| f.collection == info.collection)
                    .map(|f| SchemaField {
                        name: f.field.clone(),
                        field_type: f.field_type.clone(),
                        nullable: f.schema.as_ref().map(|s| s.is_nullable).unwrap_or(false),
                    })
                    .collect();
                SchemaCollection {
                    name: info.collection,
                    fields: collection_fields,
                }
            })
            .collect();

        Self {
            collections: schema_collections,
        }
    }
}

/// A compiled rename rule applied to the rendered types text.
#[derive(Debug, Clone)]
pub struct RenameRule {
    pattern: Regex,
    replacement: String,
}

impl RenameRule {
    pub fn new(pattern: &str, replacement: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)
                .with_context(|| format!("invalid rename pattern: {pattern}"))?,
            replacement: replacement.to_string(),
        })
    }

    /// Compile the configured patterns.
    pub fn compile(patterns: &[RenamePattern]) -> Result<Vec<Self>> {
        patterns
            .iter()
            .map(|p| Self::new(&p.pattern, &p.replacement))
            .collect()
    }

    pub fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }
}

/// Built-in rules: the image alias renames the system files collection
/// (and its generated struct) to the application-facing name.
pub fn builtin_rules(image_alias: Option<&str>) -> Vec<RenameRule> {
    let Some(alias) = image_alias else {
        return Vec::new();
    };

    // Both patterns are fixed identifiers, so compilation cannot fail.
    vec![
        RenameRule::new(r"\bsystem_files\b", alias).expect("static pattern"),
        RenameRule::new(r"\bSystemFiles\b", &pascal_case(alias)).expect("static pattern"),
    ]
}

pub fn apply_renames(text: &str, rules: &[RenameRule]) -> String {
    rules
        .iter()
        .fold(text.to_string(), |text, rule| rule.apply(&text))
}

/// Render the schema as a Rust source file: one serde struct per
/// collection plus a registry of collection names.
pub fn render_types(schema: &Schema) -> String {
    let mut out = String::new();
    out.push_str("// Generated from the backend schema. Do not edit by hand.\n\n");
    out.push_str("use serde::{Deserialize, Serialize};\n\n");

    out.push_str("/// Names of all known collections.\n");
    out.push_str("pub const COLLECTIONS: &[&str] = &[\n");
    for collection in &schema.collections {
        out.push_str(&format!("    \"{}\",\n", collection.name));
    }
    out.push_str("];\n");

    for collection in &schema.collections {
        out.push('\n');
        out.push_str("#[derive(Debug, Clone, Serialize, Deserialize)]\n");
        out.push_str(&format!("pub struct {} {{\n", pascal_case(&collection.name)));
        for field in &collection.fields {
            let rust_type = rust_type(&field.field_type);
            let ident = field_ident(&field.name);
            if ident != field.name || is_keyword(&field.name) {
                out.push_str(&format!("    #[serde(rename = \"{}\")]\n", field.name));
            }
            if field.nullable {
                out.push_str(&format!("    pub {ident}: Option<{rust_type}>,\n"));
            } else {
                out.push_str(&format!("    pub {ident}: {rust_type},\n"));
            }
        }
        out.push_str("}\n");
    }

    out
}

/// Map a backend field type to the Rust type it deserializes into.
/// Unknown types stay dynamic.
fn rust_type(field_type: &str) -> &'static str {
    match field_type {
        "string" | "text" | "uuid" | "hash" | "timestamp" | "dateTime" | "date" | "time" => {
            "String"
        }
        "integer" | "bigInteger" => "i64",
        "float" | "decimal" => "f64",
        "boolean" => "bool",
        _ => "serde_json::Value",
    }
}

fn pascal_case(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "type" | "ref" | "use" | "mod" | "fn" | "struct" | "enum" | "impl" | "trait" | "match"
    )
}

fn field_ident(name: &str) -> String {
    if is_keyword(name) {
        format!("r#{name}")
    } else {
        name.to_string()
    }
}

/// Generate the final types text: render, then apply the built-in and
/// configured rename rules in that order.
pub fn generate(schema: &Schema, image_alias: Option<&str>, rules: &[RenameRule]) -> String {
    let rendered = render_types(schema);
    let rendered = apply_renames(&rendered, &builtin_rules(image_alias));
    apply_renames(&rendered, rules)
}

/// Write the generated file, creating parent directories and replacing
/// the previous file atomically.
pub fn write_types_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let tmp = path.with_extension("rs.tmp");
    fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
