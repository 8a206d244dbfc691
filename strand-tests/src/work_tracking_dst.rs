//! Deterministic simulation tests for work tracking.
//!
//! Each seed drives a `WorkManager` through random polls, completions,
//! commits, revocations and losses, then to completion. The property checker
//! watches every step.

use strand_core::ProcessingOrder;

use crate::scenarios::det_hash;
use crate::scenarios::seeds::{REGRESSION_SEEDS, SWEEP_SEED_COUNT};
use crate::workload::{WorkloadConfig, WorkloadDriver};

const ORDERINGS: [ProcessingOrder; 3] = [
    ProcessingOrder::Unordered,
    ProcessingOrder::Key,
    ProcessingOrder::Partition,
];

fn run_seed(seed: u64, config: WorkloadConfig) -> WorkloadDriver {
    let mut driver = WorkloadDriver::new(seed, config);
    let completed = driver.run_to_completion();
    let checker = driver.checker();
    assert!(
        checker.is_clean(),
        "seed {seed}: violations {:?}",
        checker.violations()
    );
    assert!(completed, "seed {seed}: workload did not complete, {:?}", driver.stats());
    driver
}

#[test]
fn test_dst_work_tracking_regression_seeds() {
    for ordering in ORDERINGS {
        for &seed in REGRESSION_SEEDS {
            let driver = run_seed(seed, WorkloadConfig::new(ordering));
            let stats = driver.stats();
            assert!(stats.succeeded > 0, "seed {seed}: nothing succeeded");
            assert!(stats.commits > 0, "seed {seed}: nothing committed");
            assert_eq!(
                driver.work_manager().number_records_out_for_processing(),
                0,
                "seed {seed}: work left in flight"
            );
            assert!(!driver.work_manager().has_incompletes(), "seed {seed}: incompletes left");
        }
    }
}

#[test]
fn test_dst_work_tracking_sweep() {
    let mut rebalances = 0;
    let mut stale = 0;
    let mut commits_checked = 0;
    for i in 0..SWEEP_SEED_COUNT {
        let seed = det_hash(0x5742_414E_4400, i);
        let ordering = ORDERINGS[(i % 3) as usize];
        let driver = run_seed(seed, WorkloadConfig::new(ordering).with_steps(600));
        rebalances += driver.stats().revokes + driver.stats().losses;
        stale += driver.stats().stale;
        commits_checked += driver.checker().commits_checked;
    }
    // The sweep must actually exercise rebalancing.
    assert!(rebalances > 0);
    assert!(stale > 0);
    assert!(commits_checked > SWEEP_SEED_COUNT);
}

#[test]
fn test_dst_work_tracking_without_rebalances() {
    for &seed in REGRESSION_SEEDS {
        let driver = run_seed(
            seed,
            WorkloadConfig::new(ProcessingOrder::Key).without_rebalances(),
        );
        assert_eq!(driver.stats().stale, 0, "seed {seed}");
    }
}

#[test]
fn test_dst_work_tracking_replay_is_exact() {
    for &seed in &REGRESSION_SEEDS[..3] {
        for ordering in ORDERINGS {
            let first = run_seed(seed, WorkloadConfig::new(ordering));
            let second = run_seed(seed, WorkloadConfig::new(ordering));
            assert_eq!(first.history(), second.history(), "seed {seed}");
            assert_eq!(first.stats(), second.stats(), "seed {seed}");
        }
    }
}
