//! Pure, stateless translation between the application's canonical field
//! names and each backend family's wire convention. Nothing here suspends
//! or touches the network.

use crate::domain::model::{Entity, EntityKind, SyncMeta, TRANSIENT_FIELDS};
use crate::utils::error::{Result, StoreError};
use crate::utils::validation::is_valid_identifier;
use serde_json::{Map, Number, Value};

/// Wire convention of a backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProfile {
    /// snake_case columns, nested sub-objects flattened leaf-by-leaf,
    /// application id in a dedicated `frontend_id` column.
    RelationalFlat,
    /// snake_case columns, nested sub-objects kept as one JSON column,
    /// application id in `frontend_id`.
    RelationalJson,
    /// Canonical names pass through; `_id` is the application id, `_rev`
    /// rides in `backend_id`.
    Document,
    /// Canonical names pass through; the record is keyed by its id in the
    /// backend tree and keeps `id` inline.
    Tree,
    /// Identity naming for the embedded local store.
    Canonical,
}

/// Column holding the application id on backends whose primary key is
/// engine-generated. Indexed, distinct from the primary key.
pub const FRONTEND_ID_COLUMN: &str = "frontend_id";

pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn reference_ok(profile: WireProfile, value: &str) -> bool {
    if !is_valid_identifier(value) {
        return false;
    }
    // Document and tree stores reserve underscore-prefixed keys.
    match profile {
        WireProfile::Document | WireProfile::Tree => !value.starts_with('_'),
        _ => true,
    }
}

/// Checks every reference field against the backend's identifier syntax.
/// Invalid optional references are nulled (soft error, logged); an invalid
/// or missing required reference rejects the record; the save loop skips
/// it and continues with the rest of the batch.
fn check_references(
    kind: EntityKind,
    entity_id: &str,
    fields: &mut Map<String, Value>,
    profile: WireProfile,
) -> Result<()> {
    for reference in kind.references() {
        let value = fields.get(reference.field);
        let ok = match value {
            Some(Value::String(s)) => reference_ok(profile, s),
            Some(Value::Null) | None => false,
            Some(_) => false,
        };
        if ok {
            continue;
        }
        if reference.required {
            return Err(StoreError::ValidationError {
                field: reference.field.to_string(),
                message: format!(
                    "record '{}' has an invalid required reference ({:?})",
                    entity_id, value
                ),
            });
        }
        if value.is_some() && !matches!(value, Some(Value::Null)) {
            tracing::warn!(
                "🔶 {}: nulling invalid reference '{}' on record '{}'",
                kind,
                reference.field,
                entity_id
            );
            fields.insert(reference.field.to_string(), Value::Null);
        }
    }
    Ok(())
}

/// Encodes an entity into the backend wire shape. Transient bookkeeping and
/// presentational fields are stripped first; identifiers are placed per the
/// profile's identity scheme.
pub fn encode(kind: EntityKind, entity: &Entity, profile: WireProfile) -> Result<Value> {
    let mut fields = entity.fields.clone();

    for name in TRANSIENT_FIELDS {
        fields.remove(*name);
    }
    for name in kind.display_fields() {
        fields.remove(*name);
    }

    check_references(kind, &entity.id, &mut fields, profile)?;

    let mut out = Map::new();
    match profile {
        WireProfile::RelationalFlat => {
            for (key, value) in fields {
                if kind.nested_fields().contains(&key.as_str()) {
                    if let Value::Object(leaves) = value {
                        let prefix = to_snake_case(&key);
                        for (leaf, leaf_value) in leaves {
                            out.insert(format!("{}_{}", prefix, to_snake_case(&leaf)), leaf_value);
                        }
                    }
                    continue;
                }
                out.insert(to_snake_case(&key), value);
            }
            out.insert(
                FRONTEND_ID_COLUMN.to_string(),
                Value::String(entity.id.clone()),
            );
        }
        WireProfile::RelationalJson => {
            for (key, value) in fields {
                out.insert(to_snake_case(&key), value);
            }
            out.insert(
                FRONTEND_ID_COLUMN.to_string(),
                Value::String(entity.id.clone()),
            );
        }
        WireProfile::Document => {
            out = fields;
            out.insert("_id".to_string(), Value::String(entity.id.clone()));
            if let Some(rev) = &entity.backend_id {
                out.insert("_rev".to_string(), Value::String(rev.clone()));
            }
        }
        WireProfile::Tree | WireProfile::Canonical => {
            out = fields;
            out.insert("id".to_string(), Value::String(entity.id.clone()));
            if profile == WireProfile::Canonical {
                if let Some(backend_id) = &entity.backend_id {
                    out.insert("backendId".to_string(), Value::String(backend_id.clone()));
                }
            }
        }
    }

    Ok(Value::Object(out))
}

/// Stringifies a backend key, whether the engine hands back a number or a
/// string.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_numeric_fields(kind: EntityKind, fields: &mut Map<String, Value>) {
    for name in kind.numeric_fields() {
        if let Some(Value::String(s)) = fields.get(*name) {
            if let Ok(parsed) = s.parse::<f64>() {
                if let Some(number) = Number::from_f64(parsed) {
                    fields.insert(name.to_string(), Value::Number(number));
                }
            }
        }
    }
}

/// Decodes a backend wire object back into the canonical entity shape,
/// re-attaching clean sync metadata.
pub fn decode(kind: EntityKind, wire: &Value, profile: WireProfile) -> Result<Entity> {
    let object = wire.as_object().ok_or_else(|| StoreError::ValidationError {
        field: kind.collection().to_string(),
        message: "backend returned a non-object record".to_string(),
    })?;
    let mut raw = object.clone();

    let (id, backend_id, mut fields) = match profile {
        WireProfile::RelationalFlat | WireProfile::RelationalJson => {
            let backend_id = raw.remove("id").as_ref().and_then(id_string);
            let id = raw
                .remove(FRONTEND_ID_COLUMN)
                .as_ref()
                .and_then(id_string)
                .ok_or_else(|| StoreError::ValidationError {
                    field: FRONTEND_ID_COLUMN.to_string(),
                    message: format!("{} row is missing its application id", kind),
                })?;

            let mut fields = Map::new();
            if profile == WireProfile::RelationalFlat {
                // Reassemble flattened sub-objects before general renaming.
                for nested in kind.nested_fields() {
                    let prefix = format!("{}_", to_snake_case(nested));
                    let leaf_keys: Vec<String> = raw
                        .keys()
                        .filter(|k| k.starts_with(&prefix))
                        .cloned()
                        .collect();
                    if leaf_keys.is_empty() {
                        continue;
                    }
                    let mut sub = Map::new();
                    for key in leaf_keys {
                        if let Some(value) = raw.remove(&key) {
                            sub.insert(to_camel_case(&key[prefix.len()..]), value);
                        }
                    }
                    fields.insert(nested.to_string(), Value::Object(sub));
                }
            }
            for (key, value) in raw {
                fields.insert(to_camel_case(&key), value);
            }
            (id, backend_id, fields)
        }
        WireProfile::Document => {
            let id = raw
                .remove("_id")
                .as_ref()
                .and_then(id_string)
                .ok_or_else(|| StoreError::ValidationError {
                    field: "_id".to_string(),
                    message: format!("{} document is missing its id", kind),
                })?;
            let backend_id = raw.remove("_rev").as_ref().and_then(id_string);
            raw.retain(|key, _| !key.starts_with('_'));
            (id, backend_id, raw)
        }
        WireProfile::Tree => {
            let id = raw
                .remove("id")
                .as_ref()
                .and_then(id_string)
                .ok_or_else(|| StoreError::ValidationError {
                    field: "id".to_string(),
                    message: format!("{} record is missing its id", kind),
                })?;
            (id, None, raw)
        }
        WireProfile::Canonical => {
            let id = raw
                .remove("id")
                .as_ref()
                .and_then(id_string)
                .ok_or_else(|| StoreError::ValidationError {
                    field: "id".to_string(),
                    message: format!("{} record is missing its id", kind),
                })?;
            let backend_id = raw.remove("backendId").as_ref().and_then(id_string);
            (id, backend_id, raw)
        }
    };

    for name in TRANSIENT_FIELDS {
        fields.remove(*name);
    }
    coerce_numeric_fields(kind, &mut fields);

    Ok(Entity {
        id,
        backend_id,
        sync: SyncMeta::synced(),
        fields,
    })
}
