//! Type registry: descriptors, default instances, hook table and the
//! component bit index.

use std::any::TypeId;
use std::collections::HashMap;
use std::mem;

use tracing::debug;

use super::{ClassDescriptor, Name, ObjectKind, TypeIndex};
use crate::ecs::{Component, ComponentMask, Entity, EntityId};
use crate::error::{WorldError, WorldResult};
use crate::memory::BLOCK_ALIGN;

/// Attach/detach callbacks of one component type.
///
/// Monomorphised thunks over the raw instance bytes, so the registry can call
/// a component's hooks knowing only its [`TypeIndex`].
#[derive(Clone, Copy)]
pub struct ComponentHooks {
    pub(crate) attached: fn(&mut [u8], EntityId),
    pub(crate) detached: fn(&mut [u8], EntityId),
}

impl ComponentHooks {
    fn of<T: Component>() -> Self {
        Self {
            attached: attached_thunk::<T>,
            detached: detached_thunk::<T>,
        }
    }
}

fn attached_thunk<T: Component>(bytes: &mut [u8], entity: EntityId) {
    bytemuck::from_bytes_mut::<T>(bytes).on_attached(entity);
}

fn detached_thunk<T: Component>(bytes: &mut [u8], entity: EntityId) {
    bytemuck::from_bytes_mut::<T>(bytes).on_detached(entity);
}

struct TypeEntry {
    descriptor: ClassDescriptor,
    hooks: Option<ComponentHooks>,
    default_instance: Box<[u8]>,
    bit: Option<u8>,
}

/// Closed table of every type a world can store.
///
/// Component bit slots are ranks in the sorted list of component names, so a
/// given set of types always maps to the same bits regardless of the order in
/// which they were registered. Inserting a name can shift the rank of every
/// name after it, which is why the registry is sealed once the world
/// allocates its first object.
pub struct TypeRegistry {
    entries: Vec<TypeEntry>,
    by_name: HashMap<Name, TypeIndex>,
    by_rust_type: HashMap<TypeId, TypeIndex>,
    component_names: Vec<Name>,
    sealed: bool,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        let entity = TypeEntry {
            descriptor: ClassDescriptor {
                name: Name::new(Entity::TYPE_NAME),
                kind: ObjectKind::Entity,
                properties: Vec::new(),
                size: mem::size_of::<Entity>(),
                align: mem::align_of::<Entity>(),
                blocks_render: false,
            },
            hooks: None,
            default_instance: Box::default(),
            bit: None,
        };
        let mut by_name = HashMap::new();
        by_name.insert(entity.descriptor.name.clone(), TypeIndex::ENTITY);
        Self {
            entries: vec![entity],
            by_name,
            by_rust_type: HashMap::new(),
            component_names: Vec::new(),
            sealed: false,
        }
    }

    /// Registers `T`, returning its index. Registering the same type again
    /// returns the existing index.
    pub(crate) fn register<T: Component>(&mut self) -> WorldResult<TypeIndex> {
        if let Some(&index) = self.by_rust_type.get(&TypeId::of::<T>()) {
            return Ok(index);
        }
        if self.sealed {
            return Err(WorldError::RegistrationClosed(T::NAME.to_owned()));
        }
        let name = Name::new(T::NAME);
        if self.by_name.contains_key(&name) {
            return Err(WorldError::NameCollision(T::NAME.to_owned()));
        }
        if self.component_names.len() >= ComponentMask::WIDTH {
            return Err(WorldError::TooManyComponentTypes {
                limit: ComponentMask::WIDTH,
            });
        }
        if mem::align_of::<T>() > BLOCK_ALIGN {
            return Err(WorldError::UnsupportedAlignment {
                type_name: T::NAME.to_owned(),
                align: mem::align_of::<T>(),
            });
        }

        let descriptor = ClassDescriptor {
            name: name.clone(),
            kind: ObjectKind::Component,
            properties: T::properties(),
            size: mem::size_of::<T>(),
            align: mem::align_of::<T>(),
            blocks_render: T::BLOCKS_RENDER,
        };
        validate(&descriptor)?;

        let index = TypeIndex(u16::try_from(self.entries.len()).map_err(|_| {
            WorldError::TooManyComponentTypes {
                limit: ComponentMask::WIDTH,
            }
        })?);
        self.entries.push(TypeEntry {
            descriptor,
            hooks: Some(ComponentHooks::of::<T>()),
            default_instance: bytemuck::bytes_of(&T::default()).into(),
            bit: None,
        });
        self.by_name.insert(name.clone(), index);
        self.by_rust_type.insert(TypeId::of::<T>(), index);

        if let Err(position) = self.component_names.binary_search(&name) {
            self.component_names.insert(position, name);
        }
        self.rerank();

        debug!(type_name = T::NAME, index = index.0, "registered component type");
        Ok(index)
    }

    fn rerank(&mut self) {
        for (rank, name) in self.component_names.iter().enumerate() {
            if let Some(index) = self.by_name.get(name) {
                // WIDTH is 64, ranks always fit.
                #[allow(clippy::cast_possible_truncation)]
                let bit = rank as u8;
                self.entries[index.get()].bit = Some(bit);
            }
        }
    }

    /// Closes registration. Called when the first object is allocated.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Whether registration is closed.
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Index of a registered Rust type.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotRegistered`] if `T` was never registered.
    pub fn index_of<T: Component>(&self) -> WorldResult<TypeIndex> {
        self.by_rust_type
            .get(&TypeId::of::<T>())
            .copied()
            .ok_or(WorldError::NotRegistered(T::NAME))
    }

    /// Index of a type by its name.
    #[must_use]
    pub fn index_by_name(&self, name: &Name) -> Option<TypeIndex> {
        self.by_name.get(name).copied()
    }

    /// Descriptor of a registered type.
    #[must_use]
    pub fn descriptor(&self, index: TypeIndex) -> Option<&ClassDescriptor> {
        self.entries.get(index.get()).map(|e| &e.descriptor)
    }

    /// Bit slot of a component type.
    #[inline]
    #[must_use]
    pub fn bit(&self, index: TypeIndex) -> Option<u8> {
        self.entries.get(index.get()).and_then(|e| e.bit)
    }

    /// Byte image of the type's default instance.
    #[must_use]
    pub fn default_instance(&self, index: TypeIndex) -> Option<&[u8]> {
        self.entries.get(index.get()).map(|e| &*e.default_instance)
    }

    pub(crate) fn hooks(&self, index: TypeIndex) -> Option<ComponentHooks> {
        self.entries.get(index.get()).and_then(|e| e.hooks)
    }

    /// Registered component names in bit order.
    #[inline]
    #[must_use]
    pub fn component_names(&self) -> &[Name] {
        &self.component_names
    }

    /// Mask of the named component types. Unknown names are ignored.
    #[must_use]
    pub fn mask_for_names(&self, names: &[Name]) -> ComponentMask {
        names
            .iter()
            .filter_map(|n| self.index_by_name(n))
            .filter_map(|i| self.bit(i))
            .fold(ComponentMask::EMPTY, ComponentMask::with)
    }

    /// Number of registered types, the entity type included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: the entity type is registered on creation.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all registered types.
    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &ClassDescriptor)> {
        self.entries.iter().enumerate().map(|(i, e)| {
            // Bounded by u16 at registration.
            #[allow(clippy::cast_possible_truncation)]
            let index = TypeIndex(i as u16);
            (index, &e.descriptor)
        })
    }
}

fn validate(descriptor: &ClassDescriptor) -> WorldResult<()> {
    if descriptor.is_valid() {
        return Ok(());
    }
    for (i, property) in descriptor.properties.iter().enumerate() {
        let reason = if property.range().end > descriptor.size {
            format!("extends past the end of a {}-byte type", descriptor.size)
        } else if descriptor.properties[..i].iter().any(|p| p.name == property.name) {
            "duplicate property name".to_owned()
        } else {
            continue;
        };
        return Err(WorldError::InvalidDescriptor {
            type_name: descriptor.name.to_string(),
            property: property.name.to_string(),
            reason,
        });
    }
    Err(WorldError::InvalidDescriptor {
        type_name: descriptor.name.to_string(),
        property: String::new(),
        reason: "empty type name".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Position, Velocity};
    use crate::reflect::{PropertyDescriptor, PropertyKind};
    use bytemuck::{Pod, Zeroable};

    #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
    #[repr(C)]
    struct Broken {
        value: f32,
    }

    impl Component for Broken {
        const NAME: &'static str = "Broken";

        fn properties() -> Vec<PropertyDescriptor> {
            vec![PropertyDescriptor::new("value", PropertyKind::F64, 0)]
        }
    }

    #[test]
    fn test_bits_follow_name_order() {
        let mut a = TypeRegistry::new();
        let va = a.register::<Velocity>().unwrap();
        let pa = a.register::<Position>().unwrap();

        let mut b = TypeRegistry::new();
        let pb = b.register::<Position>().unwrap();
        let vb = b.register::<Velocity>().unwrap();

        assert_eq!(a.bit(pa), Some(0));
        assert_eq!(a.bit(va), Some(1));
        assert_eq!(a.bit(pa), b.bit(pb));
        assert_eq!(a.bit(va), b.bit(vb));
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = TypeRegistry::new();
        let first = registry.register::<Position>().unwrap();
        let second = registry.register::<Position>().unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.component_names().len(), 1);
    }

    #[test]
    fn test_sealed_registry_rejects_new_types() {
        let mut registry = TypeRegistry::new();
        registry.register::<Position>().unwrap();
        assert!(!registry.is_sealed());
        registry.seal();
        assert!(registry.is_sealed());
        assert!(matches!(
            registry.register::<Velocity>(),
            Err(WorldError::RegistrationClosed(_))
        ));
        // Already known types still resolve.
        assert!(registry.register::<Position>().is_ok());
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let mut registry = TypeRegistry::new();
        let err = registry.register::<Broken>().unwrap_err();
        assert!(matches!(err, WorldError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_default_instance_bytes() {
        let mut registry = TypeRegistry::new();
        let index = registry.register::<Position>().unwrap();
        let bytes = registry.default_instance(index).unwrap();
        assert_eq!(bytes, bytemuck::bytes_of(&Position::default()));
    }

    #[test]
    fn test_mask_for_names() {
        let mut registry = TypeRegistry::new();
        registry.register::<Position>().unwrap();
        registry.register::<Velocity>().unwrap();
        let mask = registry.mask_for_names(&[Name::new("Velocity"), Name::new("Missing")]);
        assert_eq!(mask, ComponentMask::EMPTY.with(1));
    }
}
