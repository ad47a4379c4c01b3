//! # World
//!
//! The central container: type registry, one arena per registered type, the
//! structural version counter, the command queue and the query cache.
//!
//! ## Structural Version
//!
//! Every create, soft-delete, component attach/detach and queued modify bumps
//! the version. Cached queries compare against it to decide whether to
//! recompute.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::component::ensure_distinct;
use super::query::QueryCache;
use super::{Component, ComponentMask, ComponentSet, Entity, EntityId, ObjectRef, StoreId, WeakRef};
use crate::commands::CommandQueue;
use crate::error::{WorldError, WorldResult};
use crate::memory::{ArenaConfig, ArenaStats, ByteStorage, ObjectArena, ObjectHeader};
use crate::reflect::{Name, PropertyValue, TypeIndex, TypeRegistry};
use crate::tasks::{SchedulerConfig, TaskScheduler};

/// Configuration of a world.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Entity arena sizing.
    pub entities: ArenaConfig,
    /// Sizing used by [`World::register_component`].
    pub components: ArenaConfig,
    /// Worker pool used by parallel iteration.
    pub scheduler: SchedulerConfig,
}

impl WorldConfig {
    /// Overrides the worker count.
    #[must_use]
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.scheduler.worker_threads = Some(workers);
        self
    }
}

#[derive(Clone, Copy)]
enum Hook {
    Attached,
    Detached,
}

/// The game world.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = World::new(WorldConfig::default())?;
/// world.register_component::<Position>()?;
///
/// let entity = world.spawn();
/// let position = world.create_with(Position::new(1.0, 2.0))?;
/// world.add_component(entity, position)?;
///
/// assert_eq!(world.get_component::<Position>(entity), Some(&Position::new(1.0, 2.0)));
/// ```
pub struct World {
    pub(crate) id: StoreId,
    pub(crate) config: WorldConfig,
    pub(crate) registry: TypeRegistry,
    pub(crate) entities: ObjectArena<Vec<Entity>>,
    pub(crate) components: Vec<ObjectArena<ByteStorage>>,
    pub(crate) version: u32,
    pub(crate) commands: CommandQueue,
    pub(crate) query_cache: QueryCache,
    pub(crate) scheduler: Arc<TaskScheduler>,
}

impl World {
    /// Creates an empty world with its own worker pool.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(config: WorldConfig) -> WorldResult<Self> {
        let scheduler = Arc::new(TaskScheduler::new(&config.scheduler)?);
        Ok(Self::with_scheduler(config, scheduler))
    }

    /// Creates an empty world sharing an existing worker pool.
    #[must_use]
    pub fn with_scheduler(config: WorldConfig, scheduler: Arc<TaskScheduler>) -> Self {
        let id = StoreId::next();
        let entities = ObjectArena::new(Name::new(Entity::TYPE_NAME), Vec::new(), config.entities);
        info!(store = id.0, workers = scheduler.worker_count(), "world created");
        Self {
            id,
            config,
            registry: TypeRegistry::new(),
            entities,
            components: Vec::new(),
            version: 0,
            commands: CommandQueue::default(),
            query_cache: QueryCache::default(),
            scheduler,
        }
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    /// Registers a component type with the default arena sizing.
    ///
    /// # Errors
    ///
    /// See [`register_component_with`](Self::register_component_with).
    pub fn register_component<T: Component>(&mut self) -> WorldResult<TypeIndex> {
        self.register_component_with::<T>(self.config.components)
    }

    /// Registers a component type and creates its arena.
    ///
    /// Registering an already known type returns its index unchanged.
    ///
    /// # Arguments
    ///
    /// * `arena` - Initial capacity and growth step of the type's arena
    ///
    /// # Errors
    ///
    /// - [`WorldError::RegistrationClosed`] once any object exists
    /// - [`WorldError::TooManyComponentTypes`] past the mask width
    /// - [`WorldError::NameCollision`] if another type uses the name
    /// - [`WorldError::InvalidDescriptor`] for a property outside the type
    pub fn register_component_with<T: Component>(&mut self, arena: ArenaConfig) -> WorldResult<TypeIndex> {
        if let Ok(index) = self.registry.index_of::<T>() {
            return Ok(index);
        }
        let index = self.registry.register::<T>()?;
        debug_assert_eq!(index.arena(), Some(self.components.len()));
        self.components.push(ObjectArena::new(
            Name::new(T::NAME),
            ByteStorage::new(bytemuck::bytes_of(&T::default())),
            arena,
        ));
        info!(
            type_name = T::NAME,
            capacity = arena.capacity,
            increment = arena.increment,
            "component type registered"
        );
        Ok(index)
    }

    /// The type registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    // ========================================================================
    // ALLOCATION
    // ========================================================================

    /// Allocates an entity immediately.
    pub fn spawn(&mut self) -> EntityId {
        self.registry.seal();
        let allocation = self.entities.allocate();
        self.bump_version();
        WeakRef::from_raw(ObjectRef::new(
            self.id,
            TypeIndex::ENTITY,
            allocation.slot,
            allocation.generation,
        ))
    }

    /// Allocates a component initialised to its default instance.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotRegistered`] if `T` is unknown.
    pub fn create<T: Component>(&mut self) -> WorldResult<WeakRef<T>> {
        let index = self.registry.index_of::<T>()?;
        self.allocate(index).map(WeakRef::from_raw)
    }

    /// Allocates a component holding `value`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotRegistered`] if `T` is unknown.
    pub fn create_with<T: Component>(&mut self, value: T) -> WorldResult<WeakRef<T>> {
        let component = self.create::<T>()?;
        if let Some(slot) = self.get_mut(component) {
            *slot = value;
        }
        Ok(component)
    }

    /// Allocates an object of any registered type.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NotRegistered`] for an index this world never
    /// handed out.
    pub fn allocate(&mut self, type_index: TypeIndex) -> WorldResult<ObjectRef> {
        let Some(arena_index) = type_index.arena() else {
            return Ok(self.spawn().raw());
        };
        let arena = self
            .components
            .get_mut(arena_index)
            .ok_or(WorldError::NotRegistered("<unknown type index>"))?;
        let allocation = arena.allocate();
        self.registry.seal();
        self.bump_version();
        Ok(ObjectRef::new(
            self.id,
            type_index,
            allocation.slot,
            allocation.generation,
        ))
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    pub(crate) fn header(&self, object: ObjectRef) -> Option<&ObjectHeader> {
        if object.store() != self.id {
            return None;
        }
        match object.type_index().arena() {
            None => self.entities.resolve(object.slot(), object.generation()),
            Some(i) => self.components.get(i)?.resolve(object.slot(), object.generation()),
        }
    }

    /// Whether the referent is alive in this world.
    #[inline]
    #[must_use]
    pub fn is_alive(&self, object: impl Into<ObjectRef>) -> bool {
        self.header(object.into()).is_some()
    }

    /// Entity record of a live entity.
    #[must_use]
    pub fn entity(&self, entity: EntityId) -> Option<&Entity> {
        let raw = entity.raw();
        if !raw.is_entity() {
            return None;
        }
        self.header(raw)?;
        self.entities.storage().get(raw.slot() as usize)
    }

    fn entity_mut(&mut self, entity: EntityId) -> Option<&mut Entity> {
        let raw = entity.raw();
        if !raw.is_entity() {
            return None;
        }
        self.header(raw)?;
        self.entities.storage_mut().get_mut(raw.slot() as usize)
    }

    /// Raw bytes of a live component.
    #[must_use]
    pub fn component_bytes(&self, component: ObjectRef) -> Option<&[u8]> {
        let arena = component.type_index().arena()?;
        self.header(component)?;
        Some(self.components[arena].storage().bytes(component.slot() as usize))
    }

    fn component_bytes_mut(&mut self, component: ObjectRef) -> Option<&mut [u8]> {
        let arena = component.type_index().arena()?;
        self.header(component)?;
        Some(self.components[arena].storage_mut().bytes_mut(component.slot() as usize))
    }

    /// Resolves a typed reference.
    #[must_use]
    pub fn get<T: Component>(&self, component: WeakRef<T>) -> Option<&T> {
        let raw = component.raw();
        if self.registry.index_of::<T>().ok()? != raw.type_index() {
            return None;
        }
        self.component_bytes(raw)
            .and_then(|bytes| bytemuck::try_from_bytes(bytes).ok())
    }

    /// Resolves a typed reference mutably.
    pub fn get_mut<T: Component>(&mut self, component: WeakRef<T>) -> Option<&mut T> {
        let raw = component.raw();
        if self.registry.index_of::<T>().ok()? != raw.type_index() {
            return None;
        }
        self.component_bytes_mut(raw)
            .and_then(|bytes| bytemuck::try_from_bytes_mut(bytes).ok())
    }

    /// Entity a live component is attached to.
    #[must_use]
    pub fn owner_of(&self, component: impl Into<ObjectRef>) -> Option<EntityId> {
        self.header(component.into())?.owner.map(WeakRef::from_raw)
    }

    // ========================================================================
    // ENTITY STORE
    // ========================================================================

    /// Attaches a component to an entity.
    ///
    /// # Errors
    ///
    /// - [`WorldError::StaleReference`] if either side is dead or foreign
    /// - [`WorldError::AlreadyAttached`] if the component has an owner
    /// - [`WorldError::DuplicateComponent`] if the entity holds the type
    pub fn add_component<T: Component>(&mut self, entity: EntityId, component: WeakRef<T>) -> WorldResult<()> {
        self.add_component_raw(entity, component.raw())
    }

    /// Type-erased [`add_component`](Self::add_component).
    ///
    /// # Errors
    ///
    /// See [`add_component`](Self::add_component).
    pub fn add_component_raw(&mut self, entity: EntityId, component: ObjectRef) -> WorldResult<()> {
        let entity_ref = entity.raw();
        if !entity_ref.is_entity() {
            return Err(WorldError::NotAnEntity);
        }
        if component.is_entity() {
            return Err(WorldError::NotAComponent);
        }
        if self.header(entity_ref).is_none() {
            return Err(WorldError::StaleReference);
        }
        match self.header(component) {
            None => return Err(WorldError::StaleReference),
            Some(header) if header.owner.is_some() => return Err(WorldError::AlreadyAttached),
            Some(_) => {}
        }

        let type_index = component.type_index();
        let bit = self.registry.bit(type_index).ok_or(WorldError::NotAComponent)?;
        let name = self
            .registry
            .descriptor(type_index)
            .map(|d| d.name.clone())
            .ok_or(WorldError::NotAComponent)?;

        self.entities.storage_mut()[entity_ref.slot() as usize].insert(name, bit, component)?;
        if let Some(header) = self.component_header_mut(component) {
            header.owner = Some(entity_ref);
        }
        self.bump_version();
        self.run_hook(component, entity, Hook::Attached);
        Ok(())
    }

    /// Detaches a component from an entity and soft-deletes it.
    ///
    /// # Errors
    ///
    /// - [`WorldError::StaleReference`] if either side is dead or foreign
    /// - [`WorldError::NotAttached`] if the entity does not hold it
    pub fn remove_component(&mut self, entity: EntityId, component: impl Into<ObjectRef>) -> WorldResult<()> {
        let component = component.into();
        if component.is_entity() {
            return Err(WorldError::NotAComponent);
        }
        if self.header(component).is_none() {
            return Err(WorldError::StaleReference);
        }
        let bit = self.registry.bit(component.type_index()).ok_or(WorldError::NotAComponent)?;
        let record = self.entity_mut(entity).ok_or(WorldError::StaleReference)?;
        if !record.remove(component, bit) {
            return Err(WorldError::NotAttached);
        }
        self.bump_version();
        self.detach_and_release(component, entity);
        Ok(())
    }

    fn component_header_mut(&mut self, component: ObjectRef) -> Option<&mut ObjectHeader> {
        if component.store() != self.id {
            return None;
        }
        self.components
            .get_mut(component.type_index().arena()?)?
            .resolve_mut(component.slot(), component.generation())
    }

    fn run_hook(&mut self, component: ObjectRef, entity: EntityId, hook: Hook) {
        let Some(hooks) = self.registry.hooks(component.type_index()) else {
            return;
        };
        let callback = match hook {
            Hook::Attached => hooks.attached,
            Hook::Detached => hooks.detached,
        };
        if let Some(bytes) = self.component_bytes_mut(component) {
            callback(bytes, entity);
        }
    }

    /// Clears the owner, runs the detach hook, then soft-deletes.
    fn detach_and_release(&mut self, component: ObjectRef, entity: EntityId) {
        if let Some(header) = self.component_header_mut(component) {
            header.owner = None;
        }
        self.run_hook(component, entity, Hook::Detached);
        if let Some(arena) = component.type_index().arena() {
            self.components[arena].release(component.slot());
        }
        self.bump_version();
    }

    /// Soft-deletes an object.
    ///
    /// An entity takes its components with it; a component is first detached
    /// from its owner. Returns `false` for a dead or foreign reference.
    pub(crate) fn soft_delete(&mut self, object: ObjectRef) -> bool {
        let Some(header) = self.header(object) else {
            return false;
        };
        let owner = header.owner;

        if object.is_entity() {
            let entity = WeakRef::from_raw(object);
            let held = self.entities.storage_mut()[object.slot() as usize].take_components();
            for component in held {
                self.detach_and_release(component, entity);
            }
            self.entities.release(object.slot());
            self.bump_version();
            return true;
        }

        match owner.and_then(|o| self.registry.bit(object.type_index()).map(|b| (o, b))) {
            Some((owner, bit)) => {
                let entity = WeakRef::from_raw(owner);
                if let Some(record) = self.entity_mut(entity) {
                    record.remove(object, bit);
                }
                self.detach_and_release(object, entity);
            }
            None => {
                if let Some(arena) = object.type_index().arena() {
                    self.components[arena].release(object.slot());
                }
                self.bump_version();
            }
        }
        true
    }

    /// Component of type `T` held by `entity`, in O(1).
    #[must_use]
    pub fn get_component<T: Component>(&self, entity: EntityId) -> Option<&T> {
        let component = self.component_ref::<T>(entity)?;
        self.component_bytes(component)
            .and_then(|bytes| bytemuck::try_from_bytes(bytes).ok())
    }

    /// Mutable component of type `T` held by `entity`, in O(1).
    pub fn get_component_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        let component = self.component_ref::<T>(entity)?;
        self.component_bytes_mut(component)
            .and_then(|bytes| bytemuck::try_from_bytes_mut(bytes).ok())
    }

    /// Typed reference to the `T` held by `entity`.
    #[must_use]
    pub fn component_ref<T: Component>(&self, entity: EntityId) -> Option<ObjectRef> {
        let bit = self.registry.bit(self.registry.index_of::<T>().ok()?)?;
        self.entity(entity)?.component_at_bit(bit)
    }

    /// Component held by `entity` under a type name.
    #[must_use]
    pub fn component_by_name(&self, entity: EntityId, name: &Name) -> Option<ObjectRef> {
        let bit = self.registry.bit(self.registry.index_by_name(name)?)?;
        self.entity(entity)?.component_at_bit(bit)
    }

    /// Whether `entity` holds every type in `mask`.
    #[must_use]
    pub fn has_components(&self, entity: EntityId, mask: ComponentMask) -> bool {
        self.entity(entity).is_some_and(|e| e.has_components(mask))
    }

    /// Mask of a component set.
    ///
    /// # Errors
    ///
    /// Returns an error for an unregistered member or a repeated type.
    pub fn mask_of<Q: ComponentSet>(&self) -> WorldResult<ComponentMask> {
        let indices = Q::type_indices(&self.registry)?;
        ensure_distinct(&indices)?;
        Ok(indices
            .iter()
            .filter_map(|&i| self.registry.bit(i))
            .fold(ComponentMask::EMPTY, ComponentMask::with))
    }

    /// Mask of named component types. Unknown names are ignored.
    #[must_use]
    pub fn mask_for_names(&self, names: &[Name]) -> ComponentMask {
        self.registry.mask_for_names(names)
    }

    // ========================================================================
    // PROPERTIES
    // ========================================================================

    /// Reads a reflected property of a live component.
    #[must_use]
    pub fn read_property(&self, component: ObjectRef, name: &Name) -> Option<PropertyValue> {
        let property = self
            .registry
            .descriptor(component.type_index())?
            .property(name)?;
        let bytes = self.component_bytes(component)?;
        Some(property.kind.read(&bytes[property.range()]))
    }

    /// Writes a reflected property of a live component.
    ///
    /// # Errors
    ///
    /// - [`WorldError::StaleReference`] for a dead component
    /// - [`WorldError::PropertyNotFound`] for an unknown property
    /// - [`WorldError::PropertyTypeMismatch`] if the value does not fit
    pub fn write_property(&mut self, component: ObjectRef, name: &Name, value: &PropertyValue) -> WorldResult<()> {
        let descriptor = self
            .registry
            .descriptor(component.type_index())
            .ok_or(WorldError::StaleReference)?;
        let property = descriptor
            .property(name)
            .cloned()
            .ok_or_else(|| WorldError::PropertyNotFound {
                type_name: descriptor.name.to_string(),
                property: name.to_string(),
            })?;
        let bytes = self
            .component_bytes_mut(component)
            .ok_or(WorldError::StaleReference)?;
        if property.kind.write(value, &mut bytes[property.range()]) {
            Ok(())
        } else {
            Err(WorldError::PropertyTypeMismatch {
                property: property.name.to_string(),
                kind: property.kind.to_string(),
            })
        }
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Identity stamped into every reference this world hands out.
    #[inline]
    #[must_use]
    pub const fn store_id(&self) -> StoreId {
        self.id
    }

    /// Current structural version.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Configuration the world was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Worker pool used for parallel iteration.
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.stats().live
    }

    /// Entity slots handed out so far, dead ones included.
    #[must_use]
    pub fn entity_slots(&self) -> usize {
        self.entities.len()
    }

    /// Live entities in slot order.
    pub fn live_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .headers()
            .iter()
            .filter(|h| h.alive)
            .map(|h| WeakRef::from_raw(ObjectRef::new(self.id, TypeIndex::ENTITY, h.slot, h.generation)))
    }

    /// Arena counters of a registered type.
    #[must_use]
    pub fn arena_stats(&self, type_index: TypeIndex) -> Option<ArenaStats> {
        match type_index.arena() {
            None => Some(self.entities.stats()),
            Some(i) => self.components.get(i).map(ObjectArena::stats),
        }
    }

    /// Arena counters of a component type.
    #[must_use]
    pub fn component_stats<T: Component>(&self) -> Option<ArenaStats> {
        self.arena_stats(self.registry.index_of::<T>().ok()?)
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("store", &self.id)
            .field("types", &self.registry.len())
            .field("entities", &self.entity_count())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{Position, Velocity};
    use bytemuck::{Pod, Zeroable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ATTACHED: AtomicUsize = AtomicUsize::new(0);
    static DETACHED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Tracked {
        value: u32,
    }

    impl Component for Tracked {
        const NAME: &'static str = "Tracked";

        fn on_attached(&mut self, _entity: EntityId) {
            self.value += 1;
            ATTACHED.fetch_add(1, Ordering::SeqCst);
        }

        fn on_detached(&mut self, _entity: EntityId) {
            DETACHED.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn world() -> World {
        let config = WorldConfig {
            entities: ArenaConfig::new(4, 4),
            components: ArenaConfig::new(4, 4),
            ..WorldConfig::default()
        }
        .with_worker_threads(1);
        let mut world = World::new(config).unwrap();
        world.register_component::<Position>().unwrap();
        world.register_component::<Velocity>().unwrap();
        world
    }

    #[test]
    fn test_add_and_get_component() {
        let mut world = world();
        let entity = world.spawn();
        let velocity = world.create_with(Velocity::new(1.0, 2.0)).unwrap();
        world.add_component(entity, velocity).unwrap();

        assert_eq!(world.get_component::<Velocity>(entity), Some(&Velocity::new(1.0, 2.0)));
        assert_eq!(world.get_component::<Position>(entity), None);
        assert_eq!(world.owner_of(velocity), Some(entity));

        world.get_component_mut::<Velocity>(entity).unwrap().x = 5.0;
        assert_eq!(world.get(velocity).unwrap().x, 5.0);
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut world = world();
        let entity = world.spawn();
        let a = world.create::<Position>().unwrap();
        let b = world.create::<Position>().unwrap();
        world.add_component(entity, a).unwrap();
        assert_eq!(
            world.add_component(entity, b),
            Err(WorldError::DuplicateComponent("Position".into()))
        );
        // A component cannot have two owners.
        let other = world.spawn();
        assert_eq!(world.add_component(other, a), Err(WorldError::AlreadyAttached));
    }

    #[test]
    fn test_version_increases_on_structural_change() {
        let mut world = world();
        let v0 = world.version();
        let entity = world.spawn();
        let v1 = world.version();
        let position = world.create::<Position>().unwrap();
        let v2 = world.version();
        world.add_component(entity, position).unwrap();
        let v3 = world.version();
        world.remove_component(entity, position).unwrap();
        let v4 = world.version();
        assert!(v0 < v1 && v1 < v2 && v2 < v3 && v3 < v4);
    }

    #[test]
    fn test_remove_component_soft_deletes() {
        let mut world = world();
        let entity = world.spawn();
        let position = world.create::<Position>().unwrap();
        world.add_component(entity, position).unwrap();
        world.remove_component(entity, position).unwrap();

        assert!(!world.is_alive(position));
        assert!(world.get(position).is_none());
        assert_eq!(world.entity(entity).unwrap().len(), 0);
        assert_eq!(world.remove_component(entity, position), Err(WorldError::StaleReference));
    }

    #[test]
    fn test_hooks_run() {
        let mut world = World::new(WorldConfig::default().with_worker_threads(1)).unwrap();
        world.register_component::<Tracked>().unwrap();
        let before_attach = ATTACHED.load(Ordering::SeqCst);
        let before_detach = DETACHED.load(Ordering::SeqCst);

        let entity = world.spawn();
        let tracked = world.create::<Tracked>().unwrap();
        world.add_component(entity, tracked).unwrap();
        assert_eq!(world.get(tracked).unwrap().value, 1);
        assert_eq!(ATTACHED.load(Ordering::SeqCst), before_attach + 1);

        assert!(world.soft_delete(entity.raw()));
        assert_eq!(DETACHED.load(Ordering::SeqCst), before_detach + 1);
        assert!(!world.is_alive(tracked));
    }

    #[test]
    fn test_entity_delete_cascades() {
        let mut world = world();
        let entity = world.spawn();
        let position = world.create::<Position>().unwrap();
        let velocity = world.create::<Velocity>().unwrap();
        world.add_component(entity, position).unwrap();
        world.add_component(entity, velocity).unwrap();

        assert!(world.soft_delete(entity.raw()));
        assert!(!world.is_alive(entity));
        assert!(!world.is_alive(position));
        assert!(!world.is_alive(velocity));
        assert!(!world.soft_delete(entity.raw()));
    }

    #[test]
    fn test_component_delete_detaches() {
        let mut world = world();
        let entity = world.spawn();
        let position = world.create::<Position>().unwrap();
        world.add_component(entity, position).unwrap();

        assert!(world.soft_delete(position.raw()));
        assert!(world.is_alive(entity));
        assert_eq!(world.entity(entity).unwrap().mask(), ComponentMask::EMPTY);
    }

    #[test]
    fn test_recycled_slot_does_not_resolve_old_ref() {
        let mut world = world();
        let old = world.create_with(Position::new(3.0, 3.0)).unwrap();
        assert!(world.soft_delete(old.raw()));
        let new = world.create::<Position>().unwrap();

        assert_eq!(new.slot(), old.slot());
        assert!(world.get(old).is_none());
        assert_eq!(world.get(new), Some(&Position::default()));
    }

    #[test]
    fn test_foreign_reference_rejected() {
        let mut a = world();
        let mut b = world();
        let entity = a.spawn();
        let position = b.create::<Position>().unwrap();
        assert_eq!(a.add_component(entity, position), Err(WorldError::StaleReference));
        assert!(a.entity(entity).is_some());
        assert!(b.entity(entity).is_none());
    }

    #[test]
    fn test_properties_by_name() {
        let mut world = world();
        let position = world.create_with(Position::new(1.5, -2.0)).unwrap();
        let x = Name::new("x");

        assert_eq!(world.read_property(position.raw(), &x), Some(PropertyValue::Float(1.5)));
        world
            .write_property(position.raw(), &Name::new("y"), &PropertyValue::Float(4.0))
            .unwrap();
        assert_eq!(world.get(position).unwrap().y, 4.0);

        assert!(matches!(
            world.write_property(position.raw(), &Name::new("z"), &PropertyValue::Float(0.0)),
            Err(WorldError::PropertyNotFound { .. })
        ));
        assert!(matches!(
            world.write_property(position.raw(), &x, &PropertyValue::Bool(true)),
            Err(WorldError::PropertyTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_mask_of_rejects_duplicates() {
        let world = world();
        assert_eq!(
            world.mask_of::<(Position, Position)>(),
            Err(WorldError::DuplicateQueryComponent)
        );
        assert_eq!(world.mask_of::<(Velocity, Position)>().unwrap().count(), 2);
    }

    #[test]
    fn test_arena_growth_keeps_references() {
        let mut world = world();
        let refs: Vec<_> = (0..10)
            .map(|i| world.create_with(Position::new(i as f32, 0.0)).unwrap())
            .collect();
        let stats = world.component_stats::<Position>().unwrap();
        assert!(stats.growths >= 2);
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(world.get(*r).unwrap().x, i as f32);
        }
    }
}
