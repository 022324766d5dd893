//! Property tests for fixed-step catch-up.
//!
//! For any step size and any sequence of frame deltas, the scheduler must run
//! the fixed stages exactly `floor(accumulated / step)` times in total and
//! carry a remainder strictly below one step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use proptest::prelude::*;
use tessera_engine::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn accumulator_runs_floor_steps(
        step_ns in 1u64..50_000_000,
        deltas in prop::collection::vec(0u64..200_000_000, 1..20),
    ) {
        let step = Duration::from_nanos(step_ns);
        let mut clock = FixedTimestep::new(step);
        let mut total_steps = 0u64;
        for delta in &deltas {
            total_steps += u64::from(clock.advance(Duration::from_nanos(*delta)));
            prop_assert!(clock.remainder() < step);
        }
        let accumulated: u64 = deltas.iter().sum();
        prop_assert_eq!(total_steps, accumulated / step_ns);
        prop_assert_eq!(clock.remainder(), Duration::from_nanos(accumulated % step_ns));
    }

    #[test]
    fn clamped_accumulator_never_exceeds_cap(
        step_ns in 1_000u64..10_000_000,
        delta in 0u64..1_000_000_000,
        cap in 1u32..8,
    ) {
        let mut clock = FixedTimestep::new(Duration::from_nanos(step_ns)).with_max_steps(Some(cap));
        let steps = clock.advance(Duration::from_nanos(delta));
        prop_assert_eq!(u64::from(steps), (delta / step_ns).min(u64::from(cap)));
        prop_assert!(clock.remainder() < clock.step());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The scheduler's fixed stage fires once per due step across frames.
    #[test]
    fn scheduler_fixed_stage_matches_accumulator(
        deltas_ms in prop::collection::vec(0u64..60, 1..10),
    ) {
        static STEPS: AtomicU64 = AtomicU64::new(0);
        STEPS.store(0, Ordering::SeqCst);

        let mut scheduler = Scheduler::new(EngineConfig {
            fixed_step_secs: 0.01,
            worker_threads: Some(1),
            ..EngineConfig::default()
        })
        .unwrap();
        scheduler.add_group(
            Stage::FixedLate,
            SystemGroup::new("count").with_system("count", |_| {
                STEPS.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut reported = 0u64;
        for ms in &deltas_ms {
            reported += u64::from(scheduler.run_frame(Duration::from_millis(*ms)).fixed_steps);
        }
        let accumulated: u64 = deltas_ms.iter().sum();
        let step = scheduler.timestep().step().as_nanos() as u64;
        let expected = accumulated * 1_000_000 / step;
        prop_assert_eq!(STEPS.load(Ordering::SeqCst), expected);
        prop_assert_eq!(reported, expected);
    }
}
