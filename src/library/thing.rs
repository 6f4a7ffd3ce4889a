//! Core record model.
//!
//! Defines [`ThingId`] (a slash-delimited record id), [`Reference`] (an
//! angle-bracket-wrapped pointer to another record), [`PropertyValue`] (the
//! closed set of property kinds), and [`Thing`] (a parsed stored record).

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::error::{Error, Result};

/// A record id: an absolute, slash-delimited path such as
/// `/types/books/moby-dick`. The root record is `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThingId(String);

impl ThingId {
    /// Build an id from a path string, normalizing separators and `.`/`..`
    /// segments. Input without a leading slash is treated as root-relative.
    pub fn new(path: &str) -> Self {
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
        Self::from_segments(segments.into_iter())
    }

    /// Build an id from already-clean segments.
    pub fn from_segments<'a>(segments: impl Iterator<Item = &'a str>) -> Self {
        let mut out = String::new();
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        ThingId(out)
    }

    /// The root id `/`.
    pub fn root() -> Self {
        ThingId("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, empty for the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The last segment, or `""` for the root.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// The containing id, or `None` for the root.
    pub fn parent(&self) -> Option<ThingId> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(ThingId::root()),
            Some(idx) => Some(ThingId(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Append one segment.
    pub fn join(&self, segment: &str) -> ThingId {
        if self.is_root() {
            ThingId(format!("/{segment}"))
        } else {
            ThingId(format!("{}/{segment}", self.0))
        }
    }

    /// `true` when `self` equals `prefix` or is nested beneath it.
    pub fn is_under(&self, prefix: &ThingId) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }
}

impl fmt::Display for ThingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThingId {
    fn from(path: &str) -> Self {
        ThingId::new(path)
    }
}

/// An angle-bracket-wrapped pointer to another thing: `</people/alice>` is
/// absolute, `<chapters/one>` resolves against the owning record's id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference(String);

impl Reference {
    /// Parse `<inner>` text; returns `None` for anything else.
    pub fn parse(text: &str) -> Option<Reference> {
        if text.len() >= 3 && text.starts_with('<') && text.ends_with('>') {
            Some(Reference(text[1..text.len() - 1].to_string()))
        } else {
            None
        }
    }

    /// `true` when the text is a reference at all.
    pub fn is_reference(text: &str) -> bool {
        Reference::parse(text).is_some()
    }

    /// Absolute references begin with a library-root slash.
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// The inner path text, without brackets.
    pub fn target(&self) -> &str {
        &self.0
    }

    /// Resolve to a full id: absolute references stand alone, relative ones
    /// are joined onto the owning record's id.
    pub fn resolve(&self, owner: &ThingId) -> ThingId {
        if self.is_absolute() {
            ThingId::new(&self.0)
        } else if owner.is_root() {
            ThingId::new(&format!("/{}", self.0))
        } else {
            ThingId::new(&format!("{}/{}", owner.as_str(), self.0))
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// The closed set of property kinds a stored record can carry.
///
/// The kind is inferred from the JSON shape: a bracketed string is a
/// reference, an array of bracketed strings an ordered reference list, an
/// object whose keys are all bracketed strings a keyed reference set.
/// Everything else passes through as a scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(Value),
    Reference(Reference),
    ReferenceList(Vec<Reference>),
    /// Keyed set: reference text → marker value. Key order is not
    /// significant; the map keeps them sorted for determinism.
    ReferenceSet(BTreeMap<String, Value>),
}

impl PropertyValue {
    pub fn from_json(value: Value) -> PropertyValue {
        match &value {
            Value::String(s) => {
                if let Some(reference) = Reference::parse(s) {
                    return PropertyValue::Reference(reference);
                }
            }
            Value::Array(items) if !items.is_empty() => {
                let refs: Option<Vec<Reference>> = items
                    .iter()
                    .map(|item| item.as_str().and_then(Reference::parse))
                    .collect();
                if let Some(refs) = refs {
                    return PropertyValue::ReferenceList(refs);
                }
            }
            Value::Object(map) if !map.is_empty() => {
                if map.keys().all(|k| Reference::is_reference(k)) {
                    let set = map
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<BTreeMap<_, _>>();
                    return PropertyValue::ReferenceSet(set);
                }
            }
            _ => {}
        }
        PropertyValue::Scalar(value)
    }

    /// Parsed references of a keyed set, in key order.
    pub fn set_references(&self) -> Vec<Reference> {
        match self {
            PropertyValue::ReferenceSet(set) => {
                set.keys().filter_map(|k| Reference::parse(k)).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// A parsed stored record: an id plus named properties.
#[derive(Debug, Clone)]
pub struct Thing {
    pub id: ThingId,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Thing {
    /// Interpret a parsed JSON document as a record. Only objects qualify.
    pub fn from_value(id: ThingId, value: Value) -> Result<Thing> {
        let Value::Object(map) = value else {
            return Err(Error::Parse {
                path: id.to_string(),
                detail: "record is not a JSON object".to_string(),
            });
        };
        let properties = map
            .into_iter()
            .map(|(name, value)| (name, PropertyValue::from_json(value)))
            .collect();
        Ok(Thing { id, properties })
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// A scalar string property, if present and a string.
    pub fn scalar_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(PropertyValue::Scalar(Value::String(s))) => Some(s),
            _ => None,
        }
    }

    /// Display name: the `name` property, falling back to the id's leaf.
    pub fn name(&self) -> &str {
        self.scalar_str("name").unwrap_or_else(|| self.id.leaf())
    }

    /// Resolved ids of a reference-set property, deduplicated, in key order.
    pub fn set_ids(&self, name: &str) -> Vec<ThingId> {
        let mut seen = std::collections::BTreeSet::new();
        match self.properties.get(name) {
            Some(value @ PropertyValue::ReferenceSet(_)) => value
                .set_references()
                .iter()
                .map(|r| r.resolve(&self.id))
                .filter(|id| seen.insert(id.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
}
