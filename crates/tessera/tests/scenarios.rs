//! End-to-end scenarios through the runtime: parallel iteration, deferred
//! deletion with slot reuse, and render-blocking deferral.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tessera::core::{
    ArenaConfig, Component, Dispatch, EntityId, FrameContext, Position, ScheduleBuilder, SystemBuilder, TypeIndex,
    Velocity, World, WorldConfig, WorldResult,
};
use tessera::{GamePlugin, Runtime, RuntimeConfig};

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Sprite {
    frame: u32,
}

impl Component for Sprite {
    const NAME: &'static str = "Sprite";
    const BLOCKS_RENDER: bool = true;
}

#[derive(Default)]
struct Game {
    entities: usize,
    integrate: bool,
    visits: Arc<AtomicUsize>,
}

impl GamePlugin for Game {
    fn name(&self) -> &str {
        "scenarios"
    }

    fn register_types(&self, world: &mut World) -> WorldResult<()> {
        world.register_component::<Position>()?;
        world.register_component::<Velocity>()?;
        world.register_component::<Sprite>()?;
        Ok(())
    }

    fn init(&self, world: &mut World) -> WorldResult<()> {
        for i in 0..self.entities {
            let entity = world.spawn();
            let p = world.create::<Position>()?;
            let v = world.create_with(Velocity::new(i as f32, 1.0))?;
            world.add_component(entity, p)?;
            world.add_component(entity, v)?;
        }
        Ok(())
    }

    fn register_systems(&self, schedule: &mut ScheduleBuilder) {
        if !self.integrate {
            return;
        }
        let visits = Arc::clone(&self.visits);
        schedule.add(SystemBuilder::new("integrate").simulation(move |world: &mut World, _: &FrameContext| {
            let visits = Arc::clone(&visits);
            let dispatch = world
                .for_each::<(Position, Velocity), _>(true, move |_: EntityId, p: &mut Position, v: &mut Velocity| {
                    p.x += v.x;
                    p.y += v.y;
                    visits.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
            assert!(matches!(dispatch, Dispatch::Ran { .. }));
        }));
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        world: WorldConfig {
            entities: ArenaConfig::new(1_024, 256),
            components: ArenaConfig::new(1_024, 256),
            ..WorldConfig::default()
        }
        .with_worker_threads(4),
        simulation_fps: 0,
        presentation_fps: 0,
        ..RuntimeConfig::default()
    }
}

#[test]
fn parallel_iteration_updates_each_entity_once() {
    let game = Game {
        entities: 1_000,
        integrate: true,
        ..Game::default()
    };
    let visits = Arc::clone(&game.visits);
    let runtime = Runtime::new(config(), Arc::new(game)).unwrap();

    runtime.run_simulation_frame().unwrap();
    assert_eq!(visits.load(Ordering::Relaxed), 1_000);

    runtime
        .read_world(|world| {
            let entities = world.query::<(Position, Velocity)>().unwrap();
            assert_eq!(entities.len(), 1_000);
            for &entity in entities.iter() {
                let p = world.get_component::<Position>(entity).unwrap();
                let v = world.get_component::<Velocity>(entity).unwrap();
                assert_eq!((p.x, p.y), (v.x, v.y), "entity {entity:?} updated more or less than once");
            }
        })
        .unwrap();
}

#[test]
fn soft_deleted_slots_are_reused_before_growth() {
    let game = Game {
        entities: 100,
        ..Game::default()
    };
    let runtime = Runtime::new(config(), Arc::new(game)).unwrap();

    let victims: Vec<EntityId> = runtime
        .with_world(|world| {
            let all = world.query::<(Position,)>().unwrap();
            let victims: Vec<EntityId> = all.iter().step_by(10).copied().collect();
            for victim in &victims {
                world.queue_soft_delete(*victim);
            }
            victims
        })
        .unwrap();
    assert_eq!(victims.len(), 10);

    let report = runtime.run_simulation_frame().unwrap();
    assert_eq!(report.sync.deleted, 10);

    runtime
        .with_world(|world| {
            let remaining = world.query::<(Position,)>().unwrap();
            assert_eq!(remaining.len(), 90);
            assert!(victims.iter().all(|v| !remaining.contains(v)));

            let before = world.component_stats::<Position>().unwrap();
            assert_eq!(before.free, 10);

            let freed: HashSet<_> = (0..10)
                .map(|_| world.create::<Position>().unwrap().slot())
                .collect();
            let after = world.component_stats::<Position>().unwrap();
            assert_eq!(freed.len(), 10);
            assert_eq!(after.slots, before.slots);
            assert_eq!(after.growths, before.growths);
            assert_eq!(after.free, 0);

            let next = world.create::<Position>().unwrap();
            assert!(!freed.contains(&next.slot()));
            assert_eq!(world.component_stats::<Position>().unwrap().slots, before.slots + 1);

            // Entity records follow the same rule.
            let victim_slots: HashSet<_> = victims.iter().map(|v| v.slot()).collect();
            let slots_before = world.entity_slots();
            let entities_before = world.arena_stats(TypeIndex::ENTITY).unwrap();
            assert_eq!(entities_before.free, 10);

            let respawned: HashSet<_> = (0..10).map(|_| world.spawn().slot()).collect();
            assert_eq!(respawned, victim_slots);
            let entities_after = world.arena_stats(TypeIndex::ENTITY).unwrap();
            assert_eq!(world.entity_slots(), slots_before);
            assert_eq!(entities_after.growths, entities_before.growths);
            assert_eq!(entities_after.free, 0);
            assert!(victims.iter().all(|v| !world.is_alive(*v)));
        })
        .unwrap();
}

#[test]
fn render_blocking_iteration_waits_for_sync() {
    let runtime = Runtime::new(config(), Arc::new(Game::default())).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let sprite = runtime
        .with_world(|world| {
            let entity = world.spawn();
            let sprite = world.create::<Sprite>().unwrap();
            world.add_component(entity, sprite).unwrap();

            let r = Arc::clone(&runs);
            let dispatch = world
                .for_each::<(Sprite,), _>(false, move |_: EntityId, s: &mut Sprite| {
                    s.frame += 1;
                    r.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            assert_eq!(dispatch, Dispatch::Deferred);
            sprite
        })
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    runtime.read_world(|world| assert_eq!(world.get(sprite).unwrap().frame, 0));

    let report = runtime.run_simulation_frame().unwrap();
    assert_eq!(report.sync.modified, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    runtime.read_world(|world| assert_eq!(world.get(sprite).unwrap().frame, 1));
}

#[test]
fn shutdown_stops_frames() {
    let runtime = Runtime::new(config(), Arc::new(Game::default())).unwrap();
    assert!(runtime.run_simulation_frame().is_some());
    runtime.request_shutdown();
    assert!(runtime.is_shutdown());
    assert!(runtime.run_simulation_frame().is_none());
    assert!(runtime.run_presentation_frame().is_none());
    assert_eq!(runtime.run_simulation_loop(Some(5)), 0);
}
