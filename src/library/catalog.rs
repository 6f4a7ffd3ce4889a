//! Type-schema catalog.
//!
//! Types are declared by sentinel files in the record tree and keyed by the
//! declaring directory's id. The catalog loads all of them in one recursive
//! pass, resolves inheritance up front (merge failures abort construction),
//! and keeps a segment tree so any record id maps to its nearest declared
//! type by longest prefix.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::library::thing::ThingId;
use crate::library::TYPE_FILE;

/// One property's definition: an open attribute map.
///
/// Only a handful of attributes carry engine meaning (`private`, `computed`,
/// `inverse`); everything else rides along untouched so schemas can carry
/// application-level hints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDef {
    attributes: BTreeMap<String, Value>,
}

impl PropertyDef {
    fn from_value(value: &Value) -> PropertyDef {
        let attributes = match value {
            Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => BTreeMap::new(),
        };
        PropertyDef { attributes }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Property is withheld from externalized output.
    pub fn is_private(&self) -> bool {
        matches!(self.attributes.get("private"), Some(Value::Bool(true)))
    }

    /// Named library operation that derives this property's value.
    pub fn computed_op(&self) -> Option<&str> {
        self.attributes.get("computed").and_then(Value::as_str)
    }

    /// Name of the property on the *other* side that points back here.
    pub fn inverse(&self) -> Option<&str> {
        self.attributes.get("inverse").and_then(Value::as_str)
    }

    /// Copy over every attribute the other definition has and this one lacks.
    /// Attributes already present are never overwritten.
    fn fold_missing_from(&mut self, other: &PropertyDef) {
        for (name, value) in &other.attributes {
            self.attributes
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// A type's merged definition, ready for lookups.
#[derive(Debug, Clone, Default)]
pub struct TypeDefinition {
    properties: BTreeMap<String, PropertyDef>,
    facets: Vec<String>,
    singular_name: Option<String>,
    is_name_plural: bool,
}

impl TypeDefinition {
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &PropertyDef)> {
        self.properties.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn facets(&self) -> &[String] {
        &self.facets
    }

    pub fn singular_name(&self) -> Option<&str> {
        self.singular_name.as_deref()
    }

    pub fn is_name_plural(&self) -> bool {
        self.is_name_plural
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypeFile {
    #[serde(default)]
    properties: BTreeMap<String, Value>,
    #[serde(default)]
    facets: Vec<String>,
    #[serde(default)]
    singular_name: Option<String>,
    #[serde(default)]
    is_name_plural: bool,
}

#[derive(Debug, Default)]
struct SegmentNode {
    children: BTreeMap<String, SegmentNode>,
    terminal: bool,
}

/// All declared types, inheritance already applied.
#[derive(Debug, Default)]
pub struct TypeCatalog {
    types: BTreeMap<String, TypeDefinition>,
    tree: SegmentNode,
}

impl TypeCatalog {
    /// Scan the record tree under `home` for type files and merge inheritance.
    ///
    /// Malformed type files are skipped with a warning; an inheritance chain
    /// naming an unknown ancestor or facet is fatal.
    pub fn load(home: &Path) -> Result<TypeCatalog> {
        let mut raw = BTreeMap::new();
        collect_types(home, &ThingId::root(), &mut raw)?;

        let mut catalog = TypeCatalog::default();
        for (id, _) in &raw {
            let merged = merge_inherited(&raw, id)?;
            catalog.insert_tree(id);
            catalog.types.insert(id.clone(), merged);
        }
        tracing::debug!(types = catalog.types.len(), "type catalog loaded");
        Ok(catalog)
    }

    /// Map a record id to its declared type id by longest prefix.
    pub fn resolve_type(&self, id: &ThingId) -> Option<String> {
        let segments: Vec<&str> = id.segments().collect();
        let mut node = &self.tree;
        let mut best = if node.terminal { Some(0) } else { None };
        for (depth, segment) in segments.iter().enumerate() {
            match node.children.get(*segment) {
                Some(child) => {
                    node = child;
                    if node.terminal {
                        best = Some(depth + 1);
                    }
                }
                None => break,
            }
        }
        best.map(|depth| {
            if depth == 0 {
                "/".to_string()
            } else {
                format!("/{}", segments[..depth].join("/"))
            }
        })
    }

    pub fn definition(&self, type_id: &str) -> Option<&TypeDefinition> {
        self.types.get(type_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn insert_tree(&mut self, id: &str) {
        let mut node = &mut self.tree;
        for segment in id.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.terminal = true;
    }
}

fn collect_types(
    dir: &Path,
    id: &ThingId,
    raw: &mut BTreeMap<String, RawTypeFile>,
) -> Result<()> {
    let type_path = dir.join(TYPE_FILE);
    if type_path.is_file() {
        let text = fs::read_to_string(&type_path)
            .map_err(|e| Error::from_io(e, &type_path, "type file"))?;
        match serde_json::from_str::<RawTypeFile>(&text) {
            Ok(file) => {
                raw.insert(id.as_str().to_string(), file);
            }
            Err(e) => {
                tracing::warn!(path = %type_path.display(), error = %e, "skipping malformed type file");
            }
        }
    }

    let entries = fs::read_dir(dir).map_err(|e| Error::from_io(e, dir, "record tree"))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::from_io(e, dir, "record tree"))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::from_io(e, &entry.path(), "record tree"))?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        // Dot directories hold the journal and editor state, never records.
        if name.starts_with('.') {
            continue;
        }
        collect_types(&entry.path(), &id.join(name), raw)?;
    }
    Ok(())
}

/// Fold ancestor and facet definitions into one type, nearest first.
///
/// Applies only to ids at least two segments deep; the fold never overwrites
/// an attribute the nearer definition already set. Facets come after all
/// ancestors, own facets before inherited ones, each applied once.
fn merge_inherited(raw: &BTreeMap<String, RawTypeFile>, id: &str) -> Result<TypeDefinition> {
    let own = &raw[id];
    let mut def = TypeDefinition {
        properties: own
            .properties
            .iter()
            .map(|(n, v)| (n.clone(), PropertyDef::from_value(v)))
            .collect(),
        facets: own.facets.clone(),
        singular_name: own.singular_name.clone(),
        is_name_plural: own.is_name_plural,
    };

    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Ok(def);
    }

    let mut facet_queue = own.facets.clone();
    for depth in (1..segments.len()).rev() {
        let ancestor_id = format!("/{}", segments[..depth].join("/"));
        let ancestor = raw.get(&ancestor_id).ok_or_else(|| Error::TypeResolution {
            type_id: id.to_string(),
            missing: ancestor_id.clone(),
        })?;
        fold_properties(&mut def.properties, &ancestor.properties);
        facet_queue.extend(ancestor.facets.iter().cloned());
    }

    let mut applied = BTreeSet::new();
    for facet_id in facet_queue {
        if !applied.insert(facet_id.clone()) {
            continue;
        }
        let facet = raw.get(&facet_id).ok_or_else(|| Error::TypeResolution {
            type_id: id.to_string(),
            missing: facet_id.clone(),
        })?;
        fold_properties(&mut def.properties, &facet.properties);
    }
    Ok(def)
}

fn fold_properties(target: &mut BTreeMap<String, PropertyDef>, source: &BTreeMap<String, Value>) {
    for (name, value) in source {
        let incoming = PropertyDef::from_value(value);
        match target.get_mut(name) {
            Some(existing) => existing.fold_missing_from(&incoming),
            None => {
                target.insert(name.clone(), incoming);
            }
        }
    }
}
