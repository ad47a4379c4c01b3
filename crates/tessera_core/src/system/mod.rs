//! # Systems
//!
//! Per-frame game logic. A system is registered with a name, labels and
//! `before` constraints, and an affinity deciding which thread drives it:
//!
//! ```text
//!   SystemBuilder ──► ScheduleBuilder::build()
//!                          │
//!            ┌─────────────┴──────────────┐
//!            ▼                            ▼
//!   SimulationSchedule            PresentationSchedule
//!   (&mut World, sim thread)      (&World, presentation thread)
//! ```
//!
//! Ordering is resolved once when the schedules are built. A reload builds
//! new schedules from scratch.

mod schedule;

use std::ops::Range;

pub use schedule::{PresentationSchedule, ScheduleBuilder, SimulationSchedule, SystemTiming};

use crate::ecs::World;

/// Per-frame timing handed to every system.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameContext {
    /// Frame counter of the driving thread.
    pub frame: u64,
    /// Seconds since the previous frame of the driving thread.
    pub delta_time: f32,
    /// Seconds of simulated time.
    pub game_time: f64,
}

/// Simulation-side system. Receives the world mutably.
pub trait System: Send {
    /// Runs once per simulation frame.
    fn run(&mut self, world: &mut World, ctx: &FrameContext);
}

impl<F> System for F
where
    F: FnMut(&mut World, &FrameContext) + Send,
{
    fn run(&mut self, world: &mut World, ctx: &FrameContext) {
        self(world, ctx);
    }
}

/// Presentation-side system. Receives the world read-only.
pub trait PresentationSystem: Send {
    /// Runs once per presentation frame.
    fn run(&mut self, world: &World, ctx: &FrameContext);
}

impl<F> PresentationSystem for F
where
    F: FnMut(&World, &FrameContext) + Send,
{
    fn run(&mut self, world: &World, ctx: &FrameContext) {
        self(world, ctx);
    }
}

/// Thread a system runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Simulation thread.
    Simulation,
    /// Presentation thread.
    Presentation,
}

pub(crate) enum SystemKind {
    Simulation(Box<dyn System>),
    Presentation(Box<dyn PresentationSystem>),
}

/// A system ready to be added to a [`ScheduleBuilder`].
pub struct SystemDescriptor {
    pub(crate) name: String,
    pub(crate) labels: Vec<String>,
    pub(crate) before: Vec<String>,
    pub(crate) kind: SystemKind,
}

impl SystemDescriptor {
    /// System name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Labels carried by this system.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Labels this system must run before.
    #[must_use]
    pub fn before_labels(&self) -> &[String] {
        &self.before
    }

    /// Driving thread.
    #[must_use]
    pub fn affinity(&self) -> Affinity {
        match self.kind {
            SystemKind::Simulation(_) => Affinity::Simulation,
            SystemKind::Presentation(_) => Affinity::Presentation,
        }
    }
}

impl std::fmt::Debug for SystemDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("before", &self.before)
            .field("affinity", &self.affinity())
            .finish()
    }
}

/// Fluent construction of a [`SystemDescriptor`].
///
/// ```rust,ignore
/// schedule.add(
///     SystemBuilder::new("integrate")
///         .label("physics")
///         .before("render-prep")
///         .simulation(|world: &mut World, ctx: &FrameContext| { /* ... */ }),
/// );
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct SystemBuilder {
    name: String,
    labels: Vec<String>,
    before: Vec<String>,
}

impl SystemBuilder {
    /// Starts a system named `name`. The name is also one of its labels.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            labels: vec![name.clone()],
            name,
            before: Vec::new(),
        }
    }

    /// Adds a label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    /// Orders this system before every system carrying `label`.
    pub fn before(mut self, label: impl Into<String>) -> Self {
        self.before.push(label.into());
        self
    }

    /// Finishes as a simulation system.
    pub fn simulation<S: System + 'static>(self, system: S) -> SystemDescriptor {
        self.finish(SystemKind::Simulation(Box::new(system)))
    }

    /// Finishes as a presentation system.
    pub fn presentation<S: PresentationSystem + 'static>(self, system: S) -> SystemDescriptor {
        self.finish(SystemKind::Presentation(Box::new(system)))
    }

    /// Finishes as a time-sliced simulation system.
    ///
    /// Each frame `run` receives the next `per_frame` entity slots; the
    /// cursor wraps to slot 0 after the last slot.
    pub fn timesliced<F>(self, per_frame: usize, run: F) -> SystemDescriptor
    where
        F: FnMut(&mut World, Range<usize>, &FrameContext) + Send + 'static,
    {
        self.simulation(TimeSliced {
            per_frame: per_frame.max(1),
            cursor: 0,
            run,
        })
    }

    fn finish(self, kind: SystemKind) -> SystemDescriptor {
        SystemDescriptor {
            name: self.name,
            labels: self.labels,
            before: self.before,
            kind,
        }
    }
}

struct TimeSliced<F> {
    per_frame: usize,
    cursor: usize,
    run: F,
}

impl<F> System for TimeSliced<F>
where
    F: FnMut(&mut World, Range<usize>, &FrameContext) + Send,
{
    fn run(&mut self, world: &mut World, ctx: &FrameContext) {
        let slots = world.entity_slots();
        if slots == 0 {
            return;
        }
        if self.cursor >= slots {
            self.cursor = 0;
        }
        let end = (self.cursor + self.per_frame).min(slots);
        (self.run)(world, self.cursor..end, ctx);
        self.cursor = if end >= slots { 0 } else { end };
    }
}
