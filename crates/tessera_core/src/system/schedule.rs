//! Ordered system lists, resolved once from `before` constraints.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use super::{Affinity, FrameContext, PresentationSystem, System, SystemDescriptor, SystemKind};
use crate::ecs::World;
use crate::error::ScheduleError;

/// Last run duration of one system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemTiming {
    /// System name.
    pub name: String,
    /// Duration of its most recent run.
    pub last_run: Duration,
}

struct Slot<S: ?Sized> {
    name: String,
    last_run: Duration,
    system: Box<S>,
}

fn timings<S: ?Sized>(slots: &[Slot<S>]) -> Vec<SystemTiming> {
    slots
        .iter()
        .map(|s| SystemTiming {
            name: s.name.clone(),
            last_run: s.last_run,
        })
        .collect()
}

/// Systems driven by the simulation thread, in resolved order.
#[derive(Default)]
pub struct SimulationSchedule {
    systems: Vec<Slot<dyn System>>,
}

impl SimulationSchedule {
    /// Runs every system once, in order.
    pub fn run(&mut self, world: &mut World, ctx: &FrameContext) {
        for slot in &mut self.systems {
            let start = Instant::now();
            slot.system.run(world, ctx);
            slot.last_run = start.elapsed();
            trace!(system = %slot.name, elapsed_us = slot.last_run.as_micros(), "simulation system ran");
        }
    }

    /// Number of systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether the schedule is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// System names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    /// Last run duration of every system.
    #[must_use]
    pub fn timings(&self) -> Vec<SystemTiming> {
        timings(&self.systems)
    }
}

/// Systems driven by the presentation thread, in resolved order.
#[derive(Default)]
pub struct PresentationSchedule {
    systems: Vec<Slot<dyn PresentationSystem>>,
}

impl PresentationSchedule {
    /// Runs every system once, in order.
    pub fn run(&mut self, world: &World, ctx: &FrameContext) {
        for slot in &mut self.systems {
            let start = Instant::now();
            slot.system.run(world, ctx);
            slot.last_run = start.elapsed();
            trace!(system = %slot.name, elapsed_us = slot.last_run.as_micros(), "presentation system ran");
        }
    }

    /// Number of systems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether the schedule is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// System names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name.as_str()).collect()
    }

    /// Last run duration of every system.
    #[must_use]
    pub fn timings(&self) -> Vec<SystemTiming> {
        timings(&self.systems)
    }
}

/// Collects systems, then resolves both run orders.
#[derive(Default)]
pub struct ScheduleBuilder {
    systems: Vec<SystemDescriptor>,
}

impl ScheduleBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a system.
    pub fn add(&mut self, system: SystemDescriptor) -> &mut Self {
        self.systems.push(system);
        self
    }

    /// Number of systems added.
    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Whether nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Resolves the simulation and presentation orders.
    ///
    /// Within each list, a system runs before every system carrying one of
    /// its `before` labels. Otherwise registration order is kept, so a
    /// system without constraints is appended.
    ///
    /// # Errors
    ///
    /// - [`ScheduleError::DuplicateSystem`] if two systems share a name
    /// - [`ScheduleError::Cycle`] if the constraints cannot be satisfied
    pub fn build(self) -> Result<(SimulationSchedule, PresentationSchedule), ScheduleError> {
        let mut names = HashSet::new();
        for system in &self.systems {
            if !names.insert(system.name.as_str()) {
                return Err(ScheduleError::DuplicateSystem(system.name.clone()));
            }
        }

        let mut simulation = Vec::new();
        let mut presentation = Vec::new();
        for system in self.systems {
            match system.affinity() {
                Affinity::Simulation => simulation.push(system),
                Affinity::Presentation => presentation.push(system),
            }
        }

        let simulation = resolve(simulation)?;
        let presentation = resolve(presentation)?;
        info!(
            simulation = simulation.len(),
            presentation = presentation.len(),
            "system schedules built"
        );

        let mut sim = SimulationSchedule::default();
        let mut pres = PresentationSchedule::default();
        for system in simulation.into_iter().chain(presentation) {
            match system.kind {
                SystemKind::Simulation(s) => sim.systems.push(Slot {
                    name: system.name,
                    last_run: Duration::ZERO,
                    system: s,
                }),
                SystemKind::Presentation(s) => pres.systems.push(Slot {
                    name: system.name,
                    last_run: Duration::ZERO,
                    system: s,
                }),
            }
        }
        Ok((sim, pres))
    }
}

/// Stable topological sort: among ready systems the earliest registered
/// runs first.
fn resolve(systems: Vec<SystemDescriptor>) -> Result<Vec<SystemDescriptor>, ScheduleError> {
    let n = systems.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0_usize; n];

    for (i, system) in systems.iter().enumerate() {
        for label in &system.before {
            let mut matched = false;
            for (j, other) in systems.iter().enumerate() {
                if i != j && other.labels.iter().any(|l| l == label) {
                    matched = true;
                    if !successors[i].contains(&j) {
                        successors[i].push(j);
                        in_degree[j] += 1;
                    }
                }
            }
            if !matched {
                debug!(system = %system.name, label = %label, "no system carries this label, constraint ignored");
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() < n {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let systems = (0..n)
            .filter(|i| !placed.contains(i))
            .map(|i| systems[i].name.clone())
            .collect();
        return Err(ScheduleError::Cycle { systems });
    }

    let mut slots: Vec<Option<SystemDescriptor>> = systems.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}
