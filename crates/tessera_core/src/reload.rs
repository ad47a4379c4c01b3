//! # Reload Snapshots
//!
//! Reflection-driven capture of every live entity, used to carry world state
//! across a live reload.
//!
//! ```json
//! { "entities": [
//!   { "typeName": "Entity",
//!     "components": [
//!       { "typeName": "Position",
//!         "properties": [
//!           { "name": "x", "type": "f32", "value": 3.0, "isDefaultValue": false },
//!           { "name": "y", "type": "f32", "value": 0.0, "isDefaultValue": true } ] } ] } ] }
//! ```
//!
//! Restoring goes through the normal creation path and writes back only
//! non-default values; everything else comes from the type's default
//! instance.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ecs::{Entity, EntityId, World};
use crate::reflect::{Name, PropertyKind, PropertyValue};

/// Every live entity of a world.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Entities in slot order.
    pub entities: Vec<EntitySnapshot>,
}

/// One entity and its components.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Always the entity type name.
    pub type_name: String,
    /// Components in the entity's (sorted) order.
    pub components: Vec<ComponentSnapshot>,
}

/// One component and its reflected properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSnapshot {
    /// Registered component name.
    pub type_name: String,
    /// Properties in declaration order.
    pub properties: Vec<PropertySnapshot>,
}

/// One property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    /// Property name.
    pub name: String,
    /// Storage kind.
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    /// Current value.
    pub value: PropertyValue,
    /// Whether the value equals the default instance's.
    #[serde(rename = "isDefaultValue")]
    pub is_default: bool,
}

/// What a restore recreated and what it had to skip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Entities created.
    pub entities: usize,
    /// Components created and attached.
    pub components: usize,
    /// Non-default property values written.
    pub properties: usize,
    /// Components dropped: unknown type or duplicate on one entity.
    pub skipped_components: usize,
    /// Property values dropped: unknown name or value of the wrong kind.
    pub skipped_properties: usize,
}

impl WorldSnapshot {
    /// Serializes to JSON.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serializes to indented JSON.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parses JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Number of components across all entities.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.entities.iter().map(|e| e.components.len()).sum()
    }
}

impl World {
    /// Captures every live entity.
    ///
    /// Components not attached to an entity are not captured.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let entities = self
            .live_entities()
            .filter_map(|id| self.snapshot_entity(id))
            .collect();
        WorldSnapshot { entities }
    }

    fn snapshot_entity(&self, id: EntityId) -> Option<EntitySnapshot> {
        let entity = self.entity(id)?;
        let components = entity
            .components()
            .iter()
            .filter_map(|&component| {
                let index = component.type_index();
                let descriptor = self.registry.descriptor(index)?;
                let defaults = self.registry.default_instance(index)?;
                let bytes = self.component_bytes(component)?;
                let properties = descriptor
                    .properties
                    .iter()
                    .map(|p| PropertySnapshot {
                        name: p.name.to_string(),
                        kind: p.kind,
                        value: p.kind.read(&bytes[p.range()]),
                        is_default: bytes[p.range()] == defaults[p.range()],
                    })
                    .collect();
                Some(ComponentSnapshot {
                    type_name: descriptor.name.to_string(),
                    properties,
                })
            })
            .collect();
        Some(EntitySnapshot {
            type_name: Entity::TYPE_NAME.to_owned(),
            components,
        })
    }

    /// Recreates the entities of `snapshot` in this world.
    ///
    /// Types and properties this world does not know are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Propagates allocation errors.
    pub fn restore(&mut self, snapshot: &WorldSnapshot) -> crate::error::WorldResult<RestoreReport> {
        let mut report = RestoreReport::default();

        for record in &snapshot.entities {
            let entity = self.spawn();
            report.entities += 1;

            for component in &record.components {
                let name = Name::new(&component.type_name);
                let Some(index) = self.registry.index_by_name(&name).filter(|i| !i.is_entity()) else {
                    warn!(type_name = %component.type_name, "unknown component type in snapshot");
                    report.skipped_components += 1;
                    continue;
                };

                let object = self.allocate(index)?;
                for property in component.properties.iter().filter(|p| !p.is_default) {
                    match self.write_property(object, &Name::new(&property.name), &property.value) {
                        Ok(()) => report.properties += 1,
                        Err(error) => {
                            warn!(type_name = %component.type_name, property = %property.name, %error, "property not restored");
                            report.skipped_properties += 1;
                        }
                    }
                }

                match self.add_component_raw(entity, object) {
                    Ok(()) => report.components += 1,
                    Err(error) => {
                        warn!(type_name = %component.type_name, %error, "component not attached");
                        self.soft_delete(object);
                        report.skipped_components += 1;
                    }
                }
            }
        }

        info!(
            entities = report.entities,
            components = report.components,
            skipped = report.skipped_components,
            "snapshot restored"
        );
        Ok(report)
    }
}
