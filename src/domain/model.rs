use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Local bookkeeping flags. Stripped before every write, never persisted.
pub const TRANSIENT_FIELDS: &[&str] = &["isDirty", "isNew", "syncStatus"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Error,
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMeta {
    pub is_dirty: bool,
    pub is_new: bool,
    pub status: SyncStatus,
}

impl SyncMeta {
    /// State of a record freshly decoded from a backend.
    pub fn synced() -> Self {
        Self {
            is_dirty: false,
            is_new: false,
            status: SyncStatus::Synced,
        }
    }

    /// State of a record created in memory and not yet written anywhere.
    pub fn fresh() -> Self {
        Self {
            is_dirty: true,
            is_new: true,
            status: SyncStatus::Pending,
        }
    }
}

/// The canonical shape every persisted record takes inside the application.
///
/// `id` is assigned by the application and immutable for the lifetime of the
/// in-memory object. `backend_id` is assigned by a key-generating backend on
/// first successful insert and absent before that. Entity-specific fields
/// live in `fields` under their canonical camelCase names.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub backend_id: Option<String>,
    pub sync: SyncMeta,
    pub fields: Map<String, Value>,
}

impl Entity {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            backend_id: None,
            sync: SyncMeta::fresh(),
            fields,
        }
    }

    pub fn with_id(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            backend_id: None,
            sync: SyncMeta::fresh(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
        self.sync.is_dirty = true;
        self.sync.status = SyncStatus::Pending;
    }
}

/// A reference field pointing at another entity's application id.
#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub field: &'static str,
    pub required: bool,
}

/// The closed set of persisted entity kinds, with the per-kind schema the
/// transformer and adapters consult: collection names, numeric fields,
/// nested sub-objects, reference fields, and presentational fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Supplier,
    Article,
    Recipe,
    RecipeIngredient,
}

impl EntityKind {
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Supplier => "suppliers",
            Self::Article => "articles",
            Self::Recipe => "recipes",
            Self::RecipeIngredient => "recipe_ingredients",
        }
    }

    pub fn from_collection(s: &str) -> Option<Self> {
        match s {
            "suppliers" => Some(Self::Supplier),
            "articles" => Some(Self::Article),
            "recipes" => Some(Self::Recipe),
            "recipe_ingredients" => Some(Self::RecipeIngredient),
            _ => None,
        }
    }

    pub fn all() -> &'static [EntityKind] {
        &[
            Self::Supplier,
            Self::Article,
            Self::Recipe,
            Self::RecipeIngredient,
        ]
    }

    /// Parent kinds before dependent kinds, so identifier remapping is
    /// available when dependents are written during a bulk sync.
    pub fn sync_order() -> &'static [EntityKind] {
        Self::all()
    }

    pub fn references(&self) -> &'static [Reference] {
        match self {
            Self::Article => &[Reference {
                field: "supplierId",
                required: false,
            }],
            Self::RecipeIngredient => &[
                Reference {
                    field: "recipeId",
                    required: true,
                },
                Reference {
                    field: "articleId",
                    required: true,
                },
            ],
            _ => &[],
        }
    }

    /// Structured sub-objects stored as one JSON column on backends that
    /// support it and flattened leaf-by-leaf on backends that do not.
    pub fn nested_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Article => &["nutrition"],
            Self::Supplier => &["address"],
            _ => &[],
        }
    }

    /// Fields that relational backends return as arbitrary-precision
    /// decimal strings; decode coerces them back to plain numbers.
    pub fn numeric_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Article => &["price", "stockQuantity"],
            Self::Recipe => &["servings"],
            Self::RecipeIngredient => &["amount"],
            Self::Supplier => &[],
        }
    }

    /// Presentational fields derived from foreign keys (cached display
    /// labels). Stripped before every write.
    pub fn display_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Article => &["supplierName"],
            Self::RecipeIngredient => &["articleName"],
            _ => &[],
        }
    }

    pub fn has_pictures(&self) -> bool {
        matches!(self, Self::Article | Self::Recipe)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.collection())
    }
}

/// A backend-assigned identifier reported back from `save` for the caller
/// to apply. Replaces hidden mutation of the caller's objects.
#[derive(Debug, Clone, PartialEq)]
pub struct IdAssignment {
    pub id: String,
    pub backend_id: String,
}

#[derive(Debug, Clone)]
pub struct SkippedEntity {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct SaveOutcome {
    pub assignments: Vec<IdAssignment>,
    pub skipped: Vec<SkippedEntity>,
}

/// Applies backend-id assignments from a save back onto the caller's
/// entities and marks them synced.
pub fn apply_assignments(entities: &mut [Entity], outcome: &SaveOutcome) {
    for assignment in &outcome.assignments {
        if let Some(entity) = entities.iter_mut().find(|e| e.id == assignment.id) {
            entity.backend_id = Some(assignment.backend_id.clone());
        }
    }
    let skipped: std::collections::HashSet<&str> =
        outcome.skipped.iter().map(|s| s.id.as_str()).collect();
    for entity in entities.iter_mut() {
        if !skipped.contains(entity.id.as_str()) {
            entity.sync = SyncMeta::synced();
        }
    }
}

/// A binary asset loaded from a picture backend. The extension is whatever
/// the probe found on the backend, without the leading dot.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// A full snapshot of every entity kind, as handed to the bulk sync engine.
#[derive(Debug, Default, Clone)]
pub struct Dataset {
    pub suppliers: Vec<Entity>,
    pub articles: Vec<Entity>,
    pub recipes: Vec<Entity>,
    pub recipe_ingredients: Vec<Entity>,
}

impl Dataset {
    pub fn of_kind(&self, kind: EntityKind) -> &[Entity] {
        match kind {
            EntityKind::Supplier => &self.suppliers,
            EntityKind::Article => &self.articles,
            EntityKind::Recipe => &self.recipes,
            EntityKind::RecipeIngredient => &self.recipe_ingredients,
        }
    }

    pub fn total(&self) -> usize {
        EntityKind::all()
            .iter()
            .map(|k| self.of_kind(*k).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_kind_collection_round_trip() {
        for kind in EntityKind::all() {
            assert_eq!(EntityKind::from_collection(kind.collection()), Some(*kind));
        }
        assert_eq!(EntityKind::from_collection("unknown"), None);
    }

    #[test]
    fn test_sync_order_parents_first() {
        let order = EntityKind::sync_order();
        let pos = |k: EntityKind| order.iter().position(|x| *x == k).unwrap();
        assert!(pos(EntityKind::Supplier) < pos(EntityKind::Article));
        assert!(pos(EntityKind::Recipe) < pos(EntityKind::RecipeIngredient));
        assert!(pos(EntityKind::Article) < pos(EntityKind::RecipeIngredient));
    }

    #[test]
    fn test_new_entity_is_fresh() {
        let entity = Entity::new(fields(&[("name", json!("Flour"))]));
        assert!(!entity.id.is_empty());
        assert!(entity.backend_id.is_none());
        assert!(entity.sync.is_new);
        assert_eq!(entity.sync.status, SyncStatus::Pending);
    }

    #[test]
    fn test_apply_assignments() {
        let mut entities = vec![
            Entity::with_id("a1", fields(&[("name", json!("Flour"))])),
            Entity::with_id("a2", fields(&[("name", json!("Sugar"))])),
        ];
        let outcome = SaveOutcome {
            assignments: vec![IdAssignment {
                id: "a1".to_string(),
                backend_id: "77".to_string(),
            }],
            skipped: vec![SkippedEntity {
                id: "a2".to_string(),
                reason: "invalid reference".to_string(),
            }],
        };

        apply_assignments(&mut entities, &outcome);

        assert_eq!(entities[0].backend_id.as_deref(), Some("77"));
        assert_eq!(entities[0].id, "a1");
        assert_eq!(entities[0].sync.status, SyncStatus::Synced);
        // skipped records keep their pending state
        assert!(entities[1].backend_id.is_none());
        assert_eq!(entities[1].sync.status, SyncStatus::Pending);
    }
}
