//! Staged frame scheduler.
//!
//! The [`Scheduler`] owns the registry, the staging buffer and the worker pool
//! and runs one frame at a time:
//!
//! 1. [`Stage::Start`] groups, on the first frame only.
//! 2. Apply the staging buffer.
//! 3. [`Stage::Main`] groups on the calling thread.
//! 4. [`Stage::Threaded`] groups on the pool, then a barrier wait.
//! 5. For each fixed step due this frame: apply, [`Stage::FixedMain`],
//!    [`Stage::FixedThreaded`] (pool + barrier), [`Stage::FixedLate`].
//! 6. [`Stage::Late`] groups on the calling thread.
//!
//! Within a stage, groups run in registration order. A group with a predicate
//! runs only when the predicate, evaluated against the current registry,
//! returns `true`. Systems within a threaded group have no relative order.
//!
//! Systems never mutate the registry directly: they read it through views and
//! queue structural changes in the staging buffer, which is applied at the
//! synchronization points above while no system is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use tessera_ecs::registry::Registry;
use tessera_ecs::staging::{ApplyReport, StagingBuffer};

use crate::config::EngineConfig;
use crate::pool::{Job, ThreadPool};
use crate::time::{scale_delta, FixedTimestep, FrameTime};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One phase of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Once, before the first frame's first apply.
    Start,
    Main,
    Threaded,
    FixedMain,
    FixedThreaded,
    FixedLate,
    Late,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Start,
        Stage::Main,
        Stage::Threaded,
        Stage::FixedMain,
        Stage::FixedThreaded,
        Stage::FixedLate,
        Stage::Late,
    ];

    /// Whether this stage's systems run on the worker pool.
    pub fn is_threaded(self) -> bool {
        matches!(self, Stage::Threaded | Stage::FixedThreaded)
    }

    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Systems and groups
// ---------------------------------------------------------------------------

/// What a system sees while it runs.
pub struct SystemContext<'a> {
    /// Read-only registry. Structural changes go through `staging`.
    pub registry: &'a Registry,
    pub staging: &'a StagingBuffer,
    pub time: FrameTime,
}

/// A system function.
pub type SystemFn = fn(&SystemContext<'_>);

/// Gate for a system group. Must not have side effects.
pub type GroupPredicate = fn(&Registry) -> bool;

/// An ordered, optionally gated list of systems.
#[derive(Debug, Clone)]
pub struct SystemGroup {
    name: String,
    predicate: Option<GroupPredicate>,
    systems: Vec<(String, SystemFn)>,
}

impl SystemGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predicate: None,
            systems: Vec::new(),
        }
    }

    /// Run this group only while `predicate` holds.
    pub fn run_if(mut self, predicate: GroupPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Append a system. On synchronous stages systems run in append order.
    pub fn with_system(mut self, name: impl Into<String>, system: SystemFn) -> Self {
        self.systems.push((name.into(), system));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    fn should_run(&self, registry: &Registry) -> bool {
        self.predicate.map_or(true, |predicate| predicate(registry))
    }
}

// ---------------------------------------------------------------------------
// StopHandle
// ---------------------------------------------------------------------------

/// Cloneable flag that ends [`Scheduler::run`] at the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timing and bookkeeping for the last frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    pub frame: u64,
    pub fixed_steps: u32,
    /// Wall-clock time per executed stage, in execution order. Fixed stages
    /// appear once per fixed step.
    pub stage_times: Vec<(Stage, Duration)>,
    /// One report per apply, in execution order.
    pub apply_reports: Vec<ApplyReport>,
    pub groups_run: usize,
    /// Groups whose predicate returned `false`.
    pub groups_skipped: usize,
    pub total_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Frame driver owning the registry, staging buffer and worker pool.
pub struct Scheduler {
    config: EngineConfig,
    registry: Arc<RwLock<Registry>>,
    staging: Arc<StagingBuffer>,
    pool: ThreadPool,
    groups: [Vec<SystemGroup>; 7],
    timestep: FixedTimestep,
    started: bool,
    frame: u64,
    stop: StopHandle,
    last_diagnostics: FrameDiagnostics,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("frame", &self.frame)
            .field("pool", &self.pool)
            .field("started", &self.started)
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler around an empty registry.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_registry(Registry::new(), config)
    }

    /// Create a scheduler around an existing registry.
    pub fn with_registry(registry: Registry, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let staging = Arc::new(StagingBuffer::new(&registry));
        let pool = ThreadPool::new(config.pool_size())?;
        let timestep = FixedTimestep::new(config.fixed_step()).with_max_steps(config.max_fixed_steps);
        Ok(Self {
            config,
            registry: Arc::new(RwLock::new(registry)),
            staging,
            pool,
            groups: Default::default(),
            timestep,
            started: false,
            frame: 0,
            stop: StopHandle::default(),
            last_diagnostics: FrameDiagnostics::default(),
        })
    }

    /// Register `group` at the end of `stage`.
    ///
    /// A group whose name is already registered in the same stage is ignored.
    pub fn add_group(&mut self, stage: Stage, group: SystemGroup) -> &mut Self {
        let groups = &mut self.groups[stage.index()];
        if groups.iter().any(|g| g.name == group.name) {
            warn!(stage = ?stage, group = %group.name, "duplicate system group ignored");
            return self;
        }
        groups.push(group);
        self
    }

    /// Group names registered for `stage`, in execution order.
    pub fn group_names(&self, stage: Stage) -> Vec<&str> {
        self.groups[stage.index()]
            .iter()
            .map(|g| g.name.as_str())
            .collect()
    }

    // -- frame execution ------------------------------------------------------

    /// Run one frame with `delta` of elapsed wall-clock time.
    pub fn run_frame(&mut self, delta: Duration) -> &FrameDiagnostics {
        let frame_start = Instant::now();
        let mut diag = FrameDiagnostics {
            frame: self.frame,
            ..FrameDiagnostics::default()
        };

        let scaled_delta = scale_delta(delta, self.config.time_scale);
        let fixed_steps = self.timestep.advance(scaled_delta);
        let time = FrameTime {
            delta,
            scaled_delta,
            fixed_step: self.timestep.step(),
            fixed_steps,
            frame: self.frame,
        };

        if !self.started {
            self.started = true;
            self.run_stage(Stage::Start, time, &mut diag);
        }

        diag.apply_reports.push(self.apply());
        self.run_stage(Stage::Main, time, &mut diag);
        self.run_stage(Stage::Threaded, time, &mut diag);

        for _ in 0..fixed_steps {
            diag.apply_reports.push(self.apply());
            self.run_stage(Stage::FixedMain, time, &mut diag);
            self.run_stage(Stage::FixedThreaded, time, &mut diag);
            self.run_stage(Stage::FixedLate, time, &mut diag);
        }

        self.run_stage(Stage::Late, time, &mut diag);

        diag.fixed_steps = fixed_steps;
        diag.total_time = frame_start.elapsed();
        debug!(
            frame = self.frame,
            fixed_steps,
            groups_run = diag.groups_run,
            groups_skipped = diag.groups_skipped,
            total_us = diag.total_time.as_micros() as u64,
            "frame complete"
        );

        self.frame += 1;
        self.last_diagnostics = diag;
        &self.last_diagnostics
    }

    /// Run `count` frames, each with the same `delta`.
    pub fn run_frames(&mut self, count: u64, delta: Duration) {
        for _ in 0..count {
            self.run_frame(delta);
        }
    }

    /// Run frames against the wall clock until the stop flag is set.
    ///
    /// The flag is checked once per frame boundary. Returns the number of
    /// frames run.
    pub fn run(&mut self) -> u64 {
        let first_frame = self.frame;
        let mut last = Instant::now();
        while !self.stop.is_stopped() {
            let now = Instant::now();
            let delta = now - last;
            last = now;
            self.run_frame(delta);
        }
        let frames = self.frame - first_frame;
        info!(frames, "run loop stopped");
        frames
    }

    fn apply(&self) -> ApplyReport {
        let mut registry = self.registry.write();
        self.staging.apply(&mut registry)
    }

    fn run_stage(&self, stage: Stage, time: FrameTime, diag: &mut FrameDiagnostics) {
        let groups = &self.groups[stage.index()];
        if groups.is_empty() {
            return;
        }
        let stage_start = Instant::now();
        if stage.is_threaded() {
            self.run_threaded(groups, time, diag);
        } else {
            self.run_sync(groups, time, diag);
        }
        diag.stage_times.push((stage, stage_start.elapsed()));
    }

    fn run_sync(&self, groups: &[SystemGroup], time: FrameTime, diag: &mut FrameDiagnostics) {
        let registry = self.registry.read();
        let ctx = SystemContext {
            registry: &registry,
            staging: &self.staging,
            time,
        };
        for group in groups {
            if !group.should_run(&registry) {
                diag.groups_skipped += 1;
                continue;
            }
            diag.groups_run += 1;
            for (_, system) in &group.systems {
                system(&ctx);
            }
        }
    }

    /// Submit one batch per enabled group, then wait for all of them.
    fn run_threaded(&self, groups: &[SystemGroup], time: FrameTime, diag: &mut FrameDiagnostics) {
        {
            let registry = self.registry.read();
            for group in groups {
                if !group.should_run(&registry) {
                    diag.groups_skipped += 1;
                    continue;
                }
                diag.groups_run += 1;
                let batch: Vec<Job> = group
                    .systems
                    .iter()
                    .map(|(_, system)| self.system_job(*system, time))
                    .collect();
                self.pool.submit_batch(batch);
            }
        }
        self.pool.wait();
    }

    fn system_job(&self, system: SystemFn, time: FrameTime) -> Job {
        let registry = Arc::clone(&self.registry);
        let staging = Arc::clone(&self.staging);
        Box::new(move || {
            let registry = registry.read();
            let ctx = SystemContext {
                registry: &registry,
                staging: &staging,
                time,
            };
            system(&ctx);
        })
    }

    // -- accessors ----------------------------------------------------------

    /// Frames completed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Shared read access to the registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read()
    }

    /// Exclusive access to the registry, for setup code between frames.
    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write()
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// The fixed-step accumulator.
    pub fn timestep(&self) -> &FixedTimestep {
        &self.timestep
    }

    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.last_diagnostics
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
