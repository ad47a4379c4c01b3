//! # Bunnymark
//!
//! Headless stress test: bouncing bunnies integrated in parallel on the
//! simulation thread, summarised by the presentation thread, with a slice of
//! the population recycled through the command queue every second.
//!
//! ## Usage
//!
//! ```bash
//! bunnymark --config bunnymark.toml --bunnies 50000 --frames 600 --snapshot out.json
//! ```

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use tessera::core::{
    Component, EntityId, FrameContext, Position, PropertyDescriptor, PropertyKind, ScheduleBuilder,
    SystemBuilder, Velocity, World, WorldResult,
};
use tessera::{logging, GamePlugin, Runtime, RuntimeConfig, RuntimeResult};
use tracing::{error, info};

const WIDTH: f32 = 1920.0;
const HEIGHT: f32 = 1080.0;
const GRAVITY: f32 = 500.0;
const RECYCLE_PER_SECOND: usize = 100;

/// Colour of a bunny. Only read by presentation systems.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Tint {
    rgba: [u8; 4],
}

impl Component for Tint {
    const NAME: &'static str = "Tint";

    fn properties() -> Vec<PropertyDescriptor> {
        vec![PropertyDescriptor::new("rgba", PropertyKind::Color, std::mem::offset_of!(Tint, rgba))]
    }
}

struct Bunnymark {
    bunnies: usize,
}

fn spawn_bunny(world: &mut World, seed: u64) -> WorldResult<EntityId> {
    // Cheap deterministic scatter, no need for a real RNG here.
    let h = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    #[allow(clippy::cast_precision_loss)]
    let unit = |shift: u32| ((h >> shift) & 0xFFFF) as f32 / 65_535.0;

    let entity = world.spawn();
    let position = world.create_with(Position::new(unit(0) * WIDTH, unit(16) * HEIGHT * 0.5))?;
    let velocity = world.create_with(Velocity::new(unit(32) * 400.0 - 200.0, unit(48) * 200.0))?;
    #[allow(clippy::cast_possible_truncation)]
    let tint = world.create_with(Tint {
        rgba: [(h >> 8) as u8, (h >> 24) as u8, (h >> 40) as u8, 255],
    })?;
    world.add_component(entity, position)?;
    world.add_component(entity, velocity)?;
    world.add_component(entity, tint)?;
    Ok(entity)
}

fn bounce(_: EntityId, p: &mut Position, v: &mut Velocity, dt: f32) {
    v.y += GRAVITY * dt;
    p.integrate(*v, dt);
    if p.x < 0.0 || p.x > WIDTH {
        v.x = -v.x;
        p.x = p.x.clamp(0.0, WIDTH);
    }
    if p.y > HEIGHT {
        v.y = -v.y * 0.85;
        p.y = HEIGHT;
    }
}

impl GamePlugin for Bunnymark {
    fn name(&self) -> &str {
        "bunnymark"
    }

    fn register_types(&self, world: &mut World) -> WorldResult<()> {
        world.register_component::<Position>()?;
        world.register_component::<Velocity>()?;
        world.register_component::<Tint>()?;
        Ok(())
    }

    fn init(&self, world: &mut World) -> WorldResult<()> {
        for i in 0..self.bunnies as u64 {
            spawn_bunny(world, i)?;
        }
        info!(bunnies = self.bunnies, "bunnies spawned");
        Ok(())
    }

    fn register_systems(&self, schedule: &mut ScheduleBuilder) {
        schedule.add(
            SystemBuilder::new("move")
                .label("physics")
                .simulation(|world: &mut World, ctx: &FrameContext| {
                    let dt = ctx.delta_time;
                    let result = world.for_each::<(Position, Velocity), _>(
                        true,
                        move |e: EntityId, p: &mut Position, v: &mut Velocity| bounce(e, p, v, dt),
                    );
                    if let Err(e) = result {
                        error!(%e, "move failed");
                    }
                }),
        );

        let spawned = Arc::new(AtomicU64::new(1 << 32));
        schedule.add(
            SystemBuilder::new("recycle")
                .before("physics")
                .timesliced(RECYCLE_PER_SECOND * 4, move |world: &mut World, slots, ctx: &FrameContext| {
                    if ctx.frame % 60 != 0 {
                        return;
                    }
                    let victims: Vec<EntityId> = world
                        .live_entities()
                        .filter(|e| slots.contains(&(e.slot() as usize)))
                        .take(RECYCLE_PER_SECOND)
                        .collect();
                    for victim in &victims {
                        world.queue_soft_delete(*victim);
                        let seed = spawned.fetch_add(1, Ordering::Relaxed);
                        world.queue_create_entity(move |world, _| {
                            if let Err(e) = spawn_bunny(world, seed) {
                                error!(%e, "respawn failed");
                            }
                        });
                    }
                }),
        );

        schedule.add(SystemBuilder::new("stats").presentation(|world: &World, ctx: &FrameContext| {
            if ctx.frame % 120 != 0 {
                return;
            }
            let Ok(visible) = world.query::<(Position, Tint)>() else {
                return;
            };
            let mut max_y = 0.0_f32;
            for &bunny in visible.iter() {
                if let Some(p) = world.get_component::<Position>(bunny) {
                    max_y = max_y.max(HEIGHT - p.y);
                }
            }
            info!(
                frame = ctx.frame,
                bunnies = visible.len(),
                highest = max_y,
                fps = 1.0 / ctx.delta_time.max(f32::EPSILON),
                "presentation frame"
            );
        }));
    }
}

struct Args {
    config: Option<String>,
    snapshot: Option<String>,
    bunnies: usize,
    frames: u64,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config: None,
        snapshot: None,
        bunnies: 10_000,
        frames: 600,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                parsed.config = args.get(i + 1).cloned();
                i += 1;
            }
            "--snapshot" | "-s" => {
                parsed.snapshot = args.get(i + 1).cloned();
                i += 1;
            }
            "--bunnies" | "-b" => {
                if let Some(n) = args.get(i + 1).and_then(|s| s.parse().ok()) {
                    parsed.bunnies = n;
                }
                i += 1;
            }
            "--frames" | "-f" => {
                if let Some(n) = args.get(i + 1).and_then(|s| s.parse().ok()) {
                    parsed.frames = n;
                }
                i += 1;
            }
            "--help" | "-h" => {
                println!("Usage: bunnymark [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     Runtime configuration (TOML)");
                println!("  -b, --bunnies <NUM>     Initial bunny count (default: 10000)");
                println!("  -f, --frames <NUM>      Simulation frames to run (default: 600)");
                println!("  -s, --snapshot <FILE>   Write the final world as reload JSON");
                println!("  -h, --help              Show this help");
                return None;
            }
            _ => {}
        }
        i += 1;
    }
    Some(parsed)
}

fn run(args: &Args) -> RuntimeResult<()> {
    let config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    logging::init(config.level());

    let runtime = Arc::new(Runtime::new(config, Arc::new(Bunnymark { bunnies: args.bunnies }))?);
    let presentation = runtime.spawn_presentation_thread()?;

    let started = Instant::now();
    let frames = runtime.run_simulation_loop(Some(args.frames));
    if let Some(path) = &args.snapshot {
        if let Some(snapshot) = runtime.read_world(World::snapshot) {
            std::fs::write(path, snapshot.to_json_pretty()?)?;
            info!(path = %path, entities = snapshot.entities.len(), "snapshot written");
        }
    }
    runtime.request_shutdown();
    let presented = presentation
        .join()
        .map_err(|_| tessera::RuntimeError::Thread("presentation thread panicked".to_owned()))?;

    let secs = started.elapsed().as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let rate = frames as f64 / secs.max(f64::EPSILON);
    info!(frames, presented, seconds = secs, simulation_fps = rate, "bunnymark finished");
    Ok(())
}

fn main() -> ExitCode {
    let Some(args) = parse_args() else {
        return ExitCode::SUCCESS;
    };
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("bunnymark failed: {e}");
            ExitCode::FAILURE
        }
    }
}
