//! # Runtime
//!
//! Drives one world from two owning threads.
//!
//! ```text
//! Simulation thread (frame N)            Presentation thread (frame M)
//! ┌──────────────────────────────┐       ┌──────────────────────────────┐
//! │ enter_simulation()           │       │ enter_presentation()         │
//! │  1. world.sync()             │ ◄───► │  1. drain presentation calls │
//! │     creates/deletes/modifies │ turn- │  2. presentation systems     │
//! │  2. simulation systems       │ stile │     (&World)                 │
//! │ leave                        │       │ leave                        │
//! └──────────────────────────────┘       └──────────────────────────────┘
//! ```
//!
//! Anything else (worker threads, plugins, network handlers) talks to the
//! world through the command queue (`&World` methods, applied at the next
//! sync) or the presentation call queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tessera_core::{
    FrameContext, FrameTurnstile, PresentationSchedule, RestoreReport, ScheduleBuilder, SimulationSchedule,
    SyncReport, TaskScheduler, World, WorldError, WorldResult,
};
use tracing::{debug, info, warn};

use crate::clock::FrameClock;
use crate::config::RuntimeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::presentation::{PresentationQueue, PresentationSender};

/// Game logic loaded into a runtime.
///
/// A live reload swaps one plugin for another: types are registered again
/// on a fresh world, entity data is carried over through a snapshot and the
/// systems are rebuilt.
pub trait GamePlugin: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Registers every component type the plugin uses.
    ///
    /// # Errors
    ///
    /// Propagates registration errors.
    fn register_types(&self, world: &mut World) -> WorldResult<()>;

    /// Adds the plugin's systems.
    fn register_systems(&self, schedule: &mut ScheduleBuilder);

    /// Populates a new world. Not called after a reload, where the snapshot
    /// provides the entities.
    ///
    /// # Errors
    ///
    /// Propagates world errors.
    fn init(&self, world: &mut World) -> WorldResult<()> {
        let _ = world;
        Ok(())
    }
}

/// What one simulation frame did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameReport {
    /// Timing handed to the systems.
    pub ctx: FrameContext,
    /// Commands applied at the sync point.
    pub sync: SyncReport,
}

struct SimulationState {
    schedule: SimulationSchedule,
    clock: FrameClock,
}

struct PresentationState {
    schedule: PresentationSchedule,
    clock: FrameClock,
}

/// Owner of a world, its system schedules and the thread handoff.
///
/// Share it behind an `Arc`: the simulation thread calls
/// [`run_simulation_frame`](Self::run_simulation_frame), the presentation
/// thread [`run_presentation_frame`](Self::run_presentation_frame).
pub struct Runtime {
    config: RuntimeConfig,
    world: FrameTurnstile<World>,
    // Lock order: simulation, then presentation.
    simulation: Mutex<SimulationState>,
    presentation: Mutex<PresentationState>,
    calls: PresentationQueue,
    plugin: Mutex<Arc<dyn GamePlugin>>,
    scheduler: Arc<TaskScheduler>,
    shutdown: AtomicBool,
}

impl Runtime {
    /// Builds the world, registers the plugin's types, populates the world
    /// and resolves the system order.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot start, a type cannot be
    /// registered, `init` fails or the systems cannot be ordered.
    pub fn new(config: RuntimeConfig, plugin: Arc<dyn GamePlugin>) -> RuntimeResult<Self> {
        let scheduler = Arc::new(TaskScheduler::new(&config.world.scheduler)?);
        let mut world = World::with_scheduler(config.world.clone(), Arc::clone(&scheduler));
        plugin
            .register_types(&mut world)
            .map_err(|e| plugin_error(plugin.as_ref(), &e))?;
        plugin.init(&mut world).map_err(|e| plugin_error(plugin.as_ref(), &e))?;
        let (simulation, presentation) = build_schedules(plugin.as_ref())?;

        info!(
            plugin = plugin.name(),
            workers = scheduler.worker_count(),
            simulation_systems = simulation.len(),
            presentation_systems = presentation.len(),
            "runtime started"
        );

        Ok(Self {
            config,
            world: FrameTurnstile::new(world),
            simulation: Mutex::new(SimulationState {
                schedule: simulation,
                clock: FrameClock::new(),
            }),
            presentation: Mutex::new(PresentationState {
                schedule: presentation,
                clock: FrameClock::new(),
            }),
            calls: PresentationQueue::new(),
            plugin: Mutex::new(plugin),
            scheduler,
            shutdown: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // FRAMES
    // ========================================================================

    /// Runs one simulation frame: the sync point, then every simulation
    /// system, all inside the simulation phase.
    ///
    /// Returns `None` once shutdown was requested.
    pub fn run_simulation_frame(&self) -> Option<FrameReport> {
        let mut state = self.simulation.lock();
        let mut world = self.world.enter_simulation()?;
        let ctx = state.clock.tick();
        let sync = world.sync();
        state.schedule.run(&mut world, &ctx);
        Some(FrameReport { ctx, sync })
    }

    /// Runs one presentation frame: queued presentation calls, then every
    /// presentation system, inside the presentation phase.
    ///
    /// Returns `None` once shutdown was requested.
    pub fn run_presentation_frame(&self) -> Option<FrameContext> {
        let mut state = self.presentation.lock();
        let world = self.world.enter_presentation()?;
        let ctx = state.clock.tick();
        let calls = self.calls.drain(&world);
        if calls > 0 {
            debug!(calls, "presentation calls ran");
        }
        state.schedule.run(&world, &ctx);
        Some(ctx)
    }

    /// Runs simulation frames at `simulation_fps` until shutdown, or until
    /// `max_frames` frames ran. Returns the number of frames run.
    pub fn run_simulation_loop(&self, max_frames: Option<u64>) -> u64 {
        let mut frames = 0;
        while !self.is_shutdown() && max_frames.map_or(true, |max| frames < max) {
            if self.run_simulation_frame().is_none() {
                break;
            }
            frames += 1;
            pace(self.simulation.lock().clock.remaining(self.config.simulation_fps));
        }
        frames
    }

    /// Runs presentation frames at `presentation_fps` until shutdown.
    /// Returns the number of frames run.
    pub fn run_presentation_loop(&self) -> u64 {
        let mut frames = 0;
        while !self.is_shutdown() {
            if self.run_presentation_frame().is_none() {
                break;
            }
            frames += 1;
            pace(self.presentation.lock().clock.remaining(self.config.presentation_fps));
        }
        frames
    }

    /// Starts the presentation thread running
    /// [`run_presentation_loop`](Self::run_presentation_loop).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Thread`] if the thread cannot be spawned.
    pub fn spawn_presentation_thread(self: &Arc<Self>) -> RuntimeResult<JoinHandle<u64>> {
        let runtime = Arc::clone(self);
        thread::Builder::new()
            .name("tessera-presentation".to_owned())
            .spawn(move || runtime.run_presentation_loop())
            .map_err(|e| RuntimeError::Thread(e.to_string()))
    }

    // ========================================================================
    // ACCESS
    // ========================================================================

    /// Runs `f` with exclusive access to the world, inside the simulation
    /// phase. Returns `None` once shutdown was requested.
    pub fn with_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> Option<R> {
        let mut world = self.world.enter_simulation()?;
        Some(f(&mut world))
    }

    /// Runs `f` with shared access to the world, inside the presentation
    /// phase. Returns `None` once shutdown was requested.
    pub fn read_world<R>(&self, f: impl FnOnce(&World) -> R) -> Option<R> {
        let world = self.world.enter_presentation()?;
        Some(f(&world))
    }

    /// Queues `call` for the start of the next presentation frame.
    pub fn queue_presentation_call<F>(&self, call: F) -> bool
    where
        F: FnOnce(&World) + Send + 'static,
    {
        self.calls.sender().send(call)
    }

    /// Handle for queueing presentation calls from other threads.
    #[must_use]
    pub fn presentation_sender(&self) -> PresentationSender {
        self.calls.sender()
    }

    /// Configuration the runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Name of the loaded plugin.
    #[must_use]
    pub fn plugin_name(&self) -> String {
        self.plugin.lock().name().to_owned()
    }

    /// Simulation system names in run order.
    #[must_use]
    pub fn simulation_systems(&self) -> Vec<String> {
        self.simulation.lock().schedule.names().into_iter().map(str::to_owned).collect()
    }

    /// Presentation system names in run order.
    #[must_use]
    pub fn presentation_systems(&self) -> Vec<String> {
        self.presentation.lock().schedule.names().into_iter().map(str::to_owned).collect()
    }

    // ========================================================================
    // RELOAD & SHUTDOWN
    // ========================================================================

    /// Replaces the loaded plugin, carrying entity data over.
    ///
    /// Between two frames: snapshot every live entity, drop queued commands,
    /// build a fresh world with the new plugin's types, restore the
    /// snapshot, rebuild both system lists. On error the old world and
    /// systems stay in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the new plugin's types or systems are invalid, or
    /// shutdown was requested.
    pub fn hot_reload(&self, plugin: Arc<dyn GamePlugin>) -> RuntimeResult<RestoreReport> {
        let started = Instant::now();
        let mut simulation = self.simulation.lock();
        let mut presentation = self.presentation.lock();
        let mut world = self
            .world
            .enter_simulation()
            .ok_or_else(|| RuntimeError::Thread("runtime is shutting down".to_owned()))?;

        let snapshot = world.snapshot();
        let mut fresh = World::with_scheduler(self.config.world.clone(), Arc::clone(&self.scheduler));
        plugin
            .register_types(&mut fresh)
            .map_err(|e| plugin_error(plugin.as_ref(), &e))?;
        let report = fresh.restore(&snapshot)?;
        let (sim_schedule, pres_schedule) = build_schedules(plugin.as_ref())?;

        world.clear_pending_commands();
        *world = fresh;
        simulation.schedule = sim_schedule;
        presentation.schedule = pres_schedule;
        simulation.clock.reset();
        presentation.clock.reset();

        let previous = std::mem::replace(&mut *self.plugin.lock(), plugin);
        if report.skipped_components > 0 || report.skipped_properties > 0 {
            warn!(
                components = report.skipped_components,
                properties = report.skipped_properties,
                "reload dropped data the new plugin does not know"
            );
        }
        info!(
            from = previous.name(),
            to = self.plugin.lock().name(),
            entities = report.entities,
            elapsed_ms = started.elapsed().as_millis(),
            "hot reload complete"
        );
        Ok(report)
    }

    /// Stops both frame loops. Threads blocked in the turnstile wake up and
    /// return.
    pub fn request_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!("shutdown requested");
        }
        self.world.close();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("plugin", &self.plugin_name())
            .field("world", &self.world)
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

fn build_schedules(plugin: &dyn GamePlugin) -> RuntimeResult<(SimulationSchedule, PresentationSchedule)> {
    let mut builder = ScheduleBuilder::new();
    plugin.register_systems(&mut builder);
    Ok(builder.build()?)
}

fn plugin_error(plugin: &dyn GamePlugin, error: &WorldError) -> RuntimeError {
    RuntimeError::Plugin {
        plugin: plugin.name().to_owned(),
        reason: error.to_string(),
    }
}

fn pace(remaining: std::time::Duration) {
    if !remaining.is_zero() {
        thread::sleep(remaining);
    }
}
