//! Tessera Engine -- frame scheduler and worker pool driving a Tessera registry.
//!
//! This crate builds on [`tessera_ecs`] to provide the frame driver: staged
//! system groups run synchronously on the calling thread or in parallel on a
//! fixed-size [`ThreadPool`](pool::ThreadPool), with the
//! [`StagingBuffer`](tessera_ecs::staging::StagingBuffer) applied at every
//! synchronization point and a fixed-timestep catch-up loop in between.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use tessera_engine::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Counter(u32);
//!
//! impl Component for Counter {}
//!
//! // A one-second fixed step keeps the fixed stages (and their applies) idle.
//! let config = EngineConfig {
//!     fixed_step_secs: 1.0,
//!     worker_threads: Some(2),
//!     ..EngineConfig::default()
//! };
//! let mut scheduler = Scheduler::new(config).unwrap();
//!
//! scheduler.add_group(
//!     Stage::Start,
//!     SystemGroup::new("setup").with_system("spawn_counter", |ctx| {
//!         ctx.staging.stage_new_entity(ComponentMap::new().with(Counter(0)));
//!     }),
//! );
//! scheduler.add_group(
//!     Stage::Threaded,
//!     SystemGroup::new("count").with_system("increment", |ctx| {
//!         for (entity, (counter,)) in ctx.registry.view::<(&Counter,)>().iter() {
//!             ctx.staging.stage_set(entity, Counter(counter.0 + 1));
//!         }
//!     }),
//! );
//!
//! scheduler.run_frames(3, Duration::from_millis(16));
//! assert_eq!(scheduler.frame_count(), 3);
//!
//! // One apply per frame: the third increment waits for the next frame's apply.
//! assert_eq!(scheduler.last_diagnostics().fixed_steps, 0);
//! let registry = scheduler.registry();
//! let values: Vec<u32> = registry.view::<(&Counter,)>().iter().map(|(_, (c,))| c.0).collect();
//! assert_eq!(values, vec![2]);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod pool;
pub mod schedule;
pub mod time;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use tessera_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while configuring or starting the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration document is not valid JSON for [`config::EngineConfig`].
    #[error("failed to parse engine config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A configuration field holds an unusable value.
    #[error("invalid engine config field `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread {index}: {source}")]
    ThreadSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_ecs::prelude::*;

    pub use crate::config::EngineConfig;
    pub use crate::pool::ThreadPool;
    pub use crate::schedule::{
        FrameDiagnostics, GroupPredicate, Scheduler, Stage, StopHandle, SystemContext,
        SystemFn, SystemGroup,
    };
    pub use crate::time::{FixedTimestep, FrameTime};
    pub use crate::EngineError;
}
