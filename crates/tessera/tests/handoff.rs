//! Two owning threads sharing one world: the presentation side must never
//! see a half-written frame.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tessera::core::{
    ArenaConfig, EntityId, FrameContext, Position, ScheduleBuilder, SystemBuilder, World, WorldConfig, WorldResult,
};
use tessera::{GamePlugin, Runtime, RuntimeConfig};

struct Stamper {
    torn: Arc<AtomicBool>,
    observed: Arc<AtomicU64>,
}

impl GamePlugin for Stamper {
    fn name(&self) -> &str {
        "stamper"
    }

    fn register_types(&self, world: &mut World) -> WorldResult<()> {
        world.register_component::<Position>()?;
        Ok(())
    }

    fn init(&self, world: &mut World) -> WorldResult<()> {
        for _ in 0..500 {
            let entity = world.spawn();
            let p = world.create::<Position>()?;
            world.add_component(entity, p)?;
        }
        Ok(())
    }

    fn register_systems(&self, schedule: &mut ScheduleBuilder) {
        schedule.add(SystemBuilder::new("stamp").simulation(|world: &mut World, ctx: &FrameContext| {
            #[allow(clippy::cast_precision_loss)]
            let stamp = ctx.frame as f32;
            world
                .for_each::<(Position,), _>(true, move |_: EntityId, p: &mut Position| {
                    p.x = stamp;
                    p.y = stamp;
                })
                .unwrap();
            // Structural churn on top of the component writes.
            world.queue_create_entity(|world, entity| {
                let p = world.create::<Position>().unwrap();
                world.add_component(entity, p).unwrap();
            });
        }));

        let torn = Arc::clone(&self.torn);
        let observed = Arc::clone(&self.observed);
        schedule.add(SystemBuilder::new("check").presentation(move |world: &World, _: &FrameContext| {
            let entities = world.query::<(Position,)>().unwrap();
            let stamps: Vec<f32> = entities
                .iter()
                .filter_map(|e| world.get_component::<Position>(*e))
                .filter(|p| p.x != 0.0 || p.y != 0.0)
                .map(|p| p.x)
                .collect();
            // Entities created at the last sync were not stamped yet; every
            // stamped one must carry the same frame.
            if stamps.windows(2).any(|w| w[0] != w[1]) {
                torn.store(true, Ordering::SeqCst);
            }
            observed.fetch_add(1, Ordering::Relaxed);
        }));
    }
}

#[test]
fn presentation_never_sees_a_torn_frame() {
    let torn = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicU64::new(0));
    let plugin = Stamper {
        torn: Arc::clone(&torn),
        observed: Arc::clone(&observed),
    };
    let config = RuntimeConfig {
        world: WorldConfig {
            entities: ArenaConfig::new(256, 256),
            components: ArenaConfig::new(256, 256),
            ..WorldConfig::default()
        }
        .with_worker_threads(3),
        simulation_fps: 0,
        presentation_fps: 0,
        ..RuntimeConfig::default()
    };

    let runtime = Arc::new(Runtime::new(config, Arc::new(plugin)).unwrap());
    let presentation = runtime.spawn_presentation_thread().unwrap();

    let frames = runtime.run_simulation_loop(Some(200));
    runtime.request_shutdown();
    let presented = presentation.join().unwrap();

    assert_eq!(frames, 200);
    assert!(presented > 0);
    assert_eq!(observed.load(Ordering::Relaxed), presented);
    assert!(!torn.load(Ordering::SeqCst));

    let entities = runtime.with_world(|world| world.entity_count());
    // Shutdown closes the turnstile.
    assert_eq!(entities, None);
}

#[test]
fn presentation_calls_run_on_next_presentation_frame() {
    let plugin = Stamper {
        torn: Arc::new(AtomicBool::new(false)),
        observed: Arc::new(AtomicU64::new(0)),
    };
    let runtime = Runtime::new(RuntimeConfig::default(), Arc::new(plugin)).unwrap();
    let seen = Arc::new(AtomicU64::new(0));

    let s = Arc::clone(&seen);
    assert!(runtime.queue_presentation_call(move |world| {
        s.store(world.entity_count() as u64, Ordering::SeqCst);
    }));
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    runtime.run_simulation_frame().unwrap();
    runtime.run_presentation_frame().unwrap();
    // The entity queued by the first simulation frame waits for the next sync.
    assert_eq!(seen.load(Ordering::SeqCst), 500);
}
