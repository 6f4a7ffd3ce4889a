//! Filesystem path index.
//!
//! One synchronous recursive walk at construction builds a tree of every
//! directory and loose file under the library home, counts records, and
//! harvests the fields later phases need (ACL maps, representation ids,
//! declared children). After that, id resolution never touches the disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::library::thing::{Thing, ThingId};
use crate::library::{THING_FILE, TYPE_FILE};

/// A resolved id: the canonical id plus whether it names a directory
/// (record or not) or a loose file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: ThingId,
    pub is_directory: bool,
}

#[derive(Debug, Default)]
struct PathNode {
    children: BTreeMap<String, PathNode>,
    files: BTreeSet<String>,
    is_record: bool,
    /// Child ids declared by the record's `children` map, kept on the node
    /// so later lookups can recover canonical casing without re-reading.
    child_ids: Vec<ThingId>,
}

/// Everything one scan produces: the index itself plus the harvested
/// security inputs the library takes ownership of.
#[derive(Debug, Default)]
pub struct Scan {
    pub index: PathIndex,
    pub read_acls: BTreeMap<ThingId, BTreeSet<ThingId>>,
    pub write_acls: BTreeMap<ThingId, BTreeSet<ThingId>>,
    pub representations: BTreeSet<ThingId>,
}

/// The in-memory mirror of the record tree's shape.
#[derive(Debug, Default)]
pub struct PathIndex {
    root: PathNode,
    record_count: usize,
}

impl PathIndex {
    /// Walk the record tree once, harvesting as we go.
    pub fn scan(home: &Path) -> Result<Scan> {
        let mut scan = Scan::default();
        let mut root = PathNode::default();
        scan_dir(home, &ThingId::root(), &mut root, &mut scan)?;
        scan.index.root = root;
        tracing::debug!(
            records = scan.index.record_count,
            acls = scan.read_acls.len() + scan.write_acls.len(),
            representations = scan.representations.len(),
            "path index built"
        );
        Ok(scan)
    }

    /// Resolve an id against the tree.
    ///
    /// Walks segment by segment; a final segment may land on a loose file.
    /// On a directory miss, the last matched node's declared children are
    /// searched for a tail segment that matches case-insensitively, and the
    /// walk restarts from that canonical id.
    pub fn resolve(&self, id: &ThingId) -> Option<Resolved> {
        let mut base = ThingId::root();
        let mut segments: Vec<String> = id.segments().map(str::to_string).collect();
        'restart: loop {
            let mut node = self.node(&base)?;
            let mut current = base.clone();
            let mut index = 0;
            while index < segments.len() {
                let segment = &segments[index];
                if let Some(child) = node.children.get(segment.as_str()) {
                    node = child;
                    current = current.join(segment);
                    index += 1;
                    continue;
                }
                if index == segments.len() - 1 && node.files.contains(segment.as_str()) {
                    return Some(Resolved {
                        id: current.join(segment),
                        is_directory: false,
                    });
                }
                let wanted = segment.to_lowercase();
                let recovered = node
                    .child_ids
                    .iter()
                    .find(|cid| cid.leaf().to_lowercase() == wanted)?
                    .clone();
                base = recovered;
                segments = segments.split_off(index + 1);
                continue 'restart;
            }
            return Some(Resolved {
                id: current,
                is_directory: true,
            });
        }
    }

    /// Whether the id names a directory holding a record file.
    pub fn is_record(&self, id: &ThingId) -> bool {
        self.node(id).map(|n| n.is_record).unwrap_or(false)
    }

    /// Number of record files found by the scan.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Ids of every record, in tree order.
    pub fn record_ids(&self) -> Vec<ThingId> {
        let mut out = Vec::new();
        collect_records(&self.root, &ThingId::root(), &mut out);
        out
    }

    /// Number of immediate child records under an id.
    pub fn child_record_count(&self, id: &ThingId) -> usize {
        self.node(id)
            .map(|n| n.children.values().filter(|c| c.is_record).count())
            .unwrap_or(0)
    }

    fn node(&self, id: &ThingId) -> Option<&PathNode> {
        let mut node = &self.root;
        for segment in id.segments() {
            node = node.children.get(segment)?;
        }
        Some(node)
    }
}

fn collect_records(node: &PathNode, id: &ThingId, out: &mut Vec<ThingId>) {
    if node.is_record {
        out.push(id.clone());
    }
    for (name, child) in &node.children {
        collect_records(child, &id.join(name), out);
    }
}

fn scan_dir(dir: &Path, id: &ThingId, node: &mut PathNode, scan: &mut Scan) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| Error::from_io(e, dir, "record tree"))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::from_io(e, dir, "record tree"))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::from_io(e, &entry.path(), "record tree"))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }

        if file_type.is_dir() {
            let child = node.children.entry(name.to_string()).or_default();
            scan_dir(&entry.path(), &id.join(name), child, scan)?;
        } else if name == THING_FILE {
            node.is_record = true;
            scan.index.record_count += 1;
            harvest_record(&entry.path(), id, node, scan);
        } else if name != TYPE_FILE {
            node.files.insert(name.to_string());
        }
    }
    Ok(())
}

/// Pull the security-relevant fields out of one record file. Unreadable or
/// malformed records keep their place in the tree but contribute nothing.
fn harvest_record(path: &Path, id: &ThingId, node: &mut PathNode, scan: &mut Scan) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "record file unreadable, skipping harvest");
            return;
        }
    };
    let value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed record file, skipping harvest");
            return;
        }
    };
    let thing = match Thing::from_value(id.clone(), value) {
        Ok(thing) => thing,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed record file, skipping harvest");
            return;
        }
    };

    let reads = thing.set_ids("canRead");
    if !reads.is_empty() {
        scan.read_acls.insert(id.clone(), reads.into_iter().collect());
    }
    let writes = thing.set_ids("canWrite");
    if !writes.is_empty() {
        scan.write_acls
            .insert(id.clone(), writes.into_iter().collect());
    }
    for rep in thing.set_ids("representations") {
        scan.representations.insert(rep);
    }
    for rep in thing.set_ids("pictures") {
        scan.representations.insert(rep);
    }
    node.child_ids = thing.set_ids("children");
}
