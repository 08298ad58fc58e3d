//! World geography: locations and the entities found at them.

use super::PersistenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tokio::sync::RwLock;

/// A place in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Location {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            properties: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Kinds of things that can occupy a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Npc,
    Creature,
    Item,
    Object,
}

/// Something that exists in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            description: String::new(),
            location_id: None,
            properties: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn at(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }
}

/// Read-mostly geography lookup.
#[async_trait]
pub trait LocationCatalog: Send + Sync {
    async fn get_location(&self, id: &str) -> Result<Option<Location>, PersistenceError>;

    async fn entities_at(&self, location_id: &str) -> Result<Vec<Entity>, PersistenceError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    locations: Vec<Location>,
    #[serde(default)]
    entities: Vec<Entity>,
}

/// In-memory world catalog, optionally loaded from JSON.
///
/// The JSON document has the shape
/// `{"locations": [Location...], "entities": [Entity...]}`.
#[derive(Debug, Default)]
pub struct WorldCatalog {
    locations: RwLock<BTreeMap<String, Location>>,
    entities: RwLock<Vec<Entity>>,
}

impl WorldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let data: CatalogData = serde_json::from_str(json)?;
        let locations = data
            .locations
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();
        Ok(Self {
            locations: RwLock::new(locations),
            entities: RwLock::new(data.entities),
        })
    }

    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Insert or replace a location.
    pub async fn add_location(&self, location: Location) {
        self.locations
            .write()
            .await
            .insert(location.id.clone(), location);
    }

    pub async fn add_entity(&self, entity: Entity) {
        let mut entities = self.entities.write().await;
        entities.retain(|e| e.id != entity.id);
        entities.push(entity);
    }

    pub async fn entities_of_type(&self, kind: EntityKind) -> Vec<Entity> {
        self.entities
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn all_locations(&self) -> Vec<Location> {
        self.locations.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LocationCatalog for WorldCatalog {
    async fn get_location(&self, id: &str) -> Result<Option<Location>, PersistenceError> {
        Ok(self.locations.read().await.get(id).cloned())
    }

    async fn entities_at(&self, location_id: &str) -> Result<Vec<Entity>, PersistenceError> {
        Ok(self
            .entities
            .read()
            .await
            .iter()
            .filter(|e| e.location_id.as_deref() == Some(location_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_locations_and_entities() {
        let catalog = WorldCatalog::new();
        catalog
            .add_location(Location::new("hall", "Great Hall").with_description("Cold and vast"))
            .await;
        catalog
            .add_entity(Entity::new("ghost", "Weeping Bride", EntityKind::Npc).at("hall"))
            .await;
        catalog
            .add_entity(Entity::new("bat", "Bat Swarm", EntityKind::Creature).at("tower"))
            .await;

        let hall = catalog.get_location("hall").await.unwrap().unwrap();
        assert_eq!(hall.description, "Cold and vast");
        assert!(catalog.get_location("cellar").await.unwrap().is_none());

        let present = catalog.entities_at("hall").await.unwrap();
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].name, "Weeping Bride");
        assert_eq!(catalog.entities_of_type(EntityKind::Creature).await.len(), 1);
    }

    #[tokio::test]
    async fn test_from_json() {
        let json = r#"{
            "locations": [{"id": "gate", "name": "Castle Gate", "description": "Rusted iron"}],
            "entities": [{"id": "key", "name": "Bone Key", "kind": "item", "location_id": "gate"}]
        }"#;
        let catalog = WorldCatalog::from_json(json).unwrap();
        assert_eq!(catalog.all_locations().await.len(), 1);
        assert_eq!(catalog.entities_at("gate").await.unwrap()[0].kind, EntityKind::Item);
    }
}
