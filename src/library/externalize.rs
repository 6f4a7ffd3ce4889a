//! Record externalization.
//!
//! Turns a parsed record into the client JSON form: private properties are
//! dropped, references become compact summaries, reference collections are
//! ACL-filtered and paginated into the `{limit, offset, totalCount, members}`
//! envelope, and computed properties are resolved through the library's
//! operation registry. Collection members resolve in parallel under the
//! library throttle but keep their original one-based positions.

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::library::security::Principal;
use crate::library::thing::{PropertyValue, Thing, ThingId};
use crate::library::{Library, QueryContext};

/// Properties that never leave the engine, whatever the type says.
const GUARDED: [&str; 2] = ["canRead", "canWrite"];

pub(crate) async fn externalize_thing(
    lib: &Library,
    thing: &Thing,
    ctx: &QueryContext,
) -> Result<Value> {
    let id = &thing.id;
    let type_id = lib.resolve_type(id);
    let def = type_id.as_deref().and_then(|t| lib.type_definition(t));
    let limit = ctx.limit.unwrap_or(lib.settings.collection_limit);

    let mut out = header(lib, thing, type_id.as_deref());

    for (prop, value) in &thing.properties {
        if GUARDED.contains(&prop.as_str()) {
            continue;
        }
        let pdef = def.and_then(|d| d.property(prop));
        if pdef.map(|d| d.is_private()).unwrap_or(false) {
            continue;
        }
        if prop == "representations" || prop == "pictures" {
            let previews = representation_previews(lib, thing, prop, &ctx.principal).await?;
            out.insert(prop.clone(), previews);
            continue;
        }

        let rendered = match value {
            PropertyValue::Scalar(v) => v.clone(),
            PropertyValue::Reference(r) => {
                let target = r.resolve(id);
                if !lib.can_read(&target, &ctx.principal) {
                    continue;
                }
                summarize_id(lib, &target, Some(prop)).await?
            }
            PropertyValue::ReferenceList(refs) => {
                let entries: Vec<(usize, ThingId)> = refs
                    .iter()
                    .enumerate()
                    .map(|(i, r)| (i + 1, r.resolve(id)))
                    .collect();
                collection(lib, entries, prop, ctx.offset, limit, &ctx.principal, false).await?
            }
            PropertyValue::ReferenceSet(_) => {
                let entries: Vec<(usize, ThingId)> = thing
                    .set_ids(prop)
                    .into_iter()
                    .enumerate()
                    .map(|(i, rid)| (i + 1, rid))
                    .collect();
                collection(lib, entries, prop, ctx.offset, limit, &ctx.principal, true).await?
            }
        };
        out.insert(prop.clone(), rendered);
    }

    // Computed properties the type declares but the record does not store.
    if let Some(def) = def {
        let operations: Vec<(String, String)> = def
            .properties()
            .filter(|(name, d)| !d.is_private() && !thing.properties.contains_key(*name))
            .filter_map(|(name, d)| d.computed_op().map(|op| (name.to_string(), op.to_string())))
            .collect();
        for (name, op) in operations {
            out.insert(name, lib.run_operation(&op, id));
        }
    }

    Ok(Value::Object(out))
}

/// The compact reference form: identity and link fields only, plus an
/// inverse count when the target's type declares one for the property the
/// caller arrived through.
pub(crate) fn summarize_thing(
    lib: &Library,
    thing: &Thing,
    via_property: Option<&str>,
) -> Result<Value> {
    let id = &thing.id;
    let type_id = lib.resolve_type(id);
    let mut out = header(lib, thing, type_id.as_deref());

    if let (Some(type_id), Some(via)) = (type_id.as_deref(), via_property) {
        if let Some(def) = lib.type_definition(type_id) {
            if let Some((inverse_name, _)) =
                def.properties().find(|(_, d)| d.inverse() == Some(via))
            {
                let count = match thing.get(inverse_name) {
                    Some(PropertyValue::ReferenceList(refs)) => refs.len(),
                    Some(PropertyValue::ReferenceSet(set)) => set.len(),
                    _ => 0,
                };
                out.insert(format!("{inverse_name}Count"), json!(count));
            }
        }
    }
    Ok(Value::Object(out))
}

pub(crate) async fn summarize_id(
    lib: &Library,
    id: &ThingId,
    via_property: Option<&str>,
) -> Result<Value> {
    let thing = lib.fetch_thing(id).await?;
    summarize_thing(lib, &thing, via_property)
}

fn header(lib: &Library, thing: &Thing, type_id: Option<&str>) -> Map<String, Value> {
    let id = &thing.id;
    let mut out = Map::new();
    out.insert("href".into(), json!(lib.href(id)));
    out.insert("id".into(), json!(id.leaf()));
    out.insert("name".into(), json!(thing.name()));
    out.insert("path".into(), json!(id.as_str()));
    if let Some(type_id) = type_id {
        out.insert("type".into(), json!(type_id));
        if let Some(singular) = lib.type_definition(type_id).and_then(|d| d.singular_name()) {
            out.insert("typeName".into(), json!(singular));
        }
    }
    out
}

/// ACL-filter, paginate, and summarize one reference collection. Positions
/// are assigned from the original sequence before filtering.
async fn collection(
    lib: &Library,
    entries: Vec<(usize, ThingId)>,
    prop: &str,
    offset: usize,
    limit: usize,
    principal: &Principal,
    stub_missing: bool,
) -> Result<Value> {
    let readable: Vec<(usize, ThingId)> = entries
        .into_iter()
        .filter(|(_, id)| lib.can_read(id, principal))
        .collect();
    let total = readable.len();

    let tasks: Vec<_> = readable
        .iter()
        .skip(offset)
        .take(limit)
        .map(|(pos, id)| summarize_member(lib, id, *pos, prop, stub_missing))
        .collect();

    let mut members = Vec::with_capacity(tasks.len());
    for result in lib.throttle.run(tasks).await {
        members.push(result?);
    }

    Ok(json!({
        "limit": limit,
        "offset": offset,
        "totalCount": total,
        "members": members,
    }))
}

async fn summarize_member(
    lib: &Library,
    id: &ThingId,
    position: usize,
    prop: &str,
    stub_missing: bool,
) -> Result<Value> {
    let mut value = match summarize_id(lib, id, Some(prop)).await {
        Ok(value) => value,
        // Keyed sets tolerate dangling references with an id-only stub.
        Err(Error::NotFound(_)) if stub_missing => json!({
            "href": lib.href(id),
            "id": id.leaf(),
            "path": id.as_str(),
        }),
        Err(e) => return Err(e),
    };
    if let Value::Object(map) = &mut value {
        map.insert("position".into(), json!(position));
    }
    Ok(value)
}

/// `{href, name, title}` previews for a representation set, honoring each
/// link's ACL. Broken links are logged and dropped from the preview list.
async fn representation_previews(
    lib: &Library,
    thing: &Thing,
    prop: &str,
    principal: &Principal,
) -> Result<Value> {
    let ids = thing.set_ids(prop);
    let tasks: Vec<_> = ids.iter().map(|id| preview(lib, id, principal)).collect();
    let members: Vec<Value> = lib.throttle.run(tasks).await.into_iter().flatten().collect();
    Ok(Value::Array(members))
}

async fn preview(lib: &Library, id: &ThingId, principal: &Principal) -> Option<Value> {
    if !lib.can_read(id, principal) {
        return None;
    }
    let mut owner: &Library = lib;
    let value = loop {
        match owner.cache.read_json(&owner.representation_link_path(id)).await {
            Ok(value) => break value,
            Err(Error::NotFound(_)) => match owner.parent.as_deref() {
                Some(parent) => owner = parent,
                None => {
                    tracing::warn!(representation = %id, "representation link missing");
                    return None;
                }
            },
            Err(e) => {
                tracing::warn!(representation = %id, error = %e, "representation link unreadable");
                return None;
            }
        }
    };
    let link = Thing::from_value(id.clone(), value).ok()?;
    Some(json!({
        "href": lib.href(id),
        "name": link.name(),
        "title": link.scalar_str("title"),
    }))
}
