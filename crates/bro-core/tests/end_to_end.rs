//! Funding, mining and reward working together across a restart.

use std::cell::Cell;
use std::rc::Rc;

use bro_core::hash::{hash_step, leading_zero_bits_bytes};
use bro_core::reward::START_TIME;
use bro_core::{
    reward, Challenge, CheckpointStore, Clock, FixedFeeEstimator, FundingPlanner, FundingStrategy,
    MemoryCheckpointStore, MinerConfig, MiningEvent, MiningOrchestrator, StepOutcome, Utxo,
};

#[derive(Clone)]
struct ManualClock(Rc<Cell<u64>>);

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

fn config() -> MinerConfig {
    MinerConfig {
        cpu_yield_interval: 64,
        cpu_progress_interval: 32,
        cpu_save_interval: 128,
        ..MinerConfig::default()
    }
}

#[test]
fn test_plan_then_mine_then_resume() {
    // Round one: the wallet holds one large UTXO and a few asset markers
    let wallet = vec![
        Utxo::new("aa".repeat(32), 0, 546),
        Utxo::new("bb".repeat(32), 1, 40_000),
        Utxo::new("cc".repeat(32), 0, 10_000),
    ];
    let planner = FundingPlanner::new(FixedFeeEstimator(1_200));
    let plan = planner.plan(&wallet, 3);
    assert_eq!(plan.strategy, FundingStrategy::SplitLarge);
    assert_eq!(plan.protected_count, 2);
    assert_eq!(plan.input_utxos, vec![wallet[1].clone()]);
    assert!(plan.is_balanced());

    // The funding transaction confirmed; mine its first output
    let funded = Utxo::new("dd".repeat(32), 0, plan.output_value);
    let store = MemoryCheckpointStore::new();
    let clock = ManualClock(Rc::new(Cell::new(START_TIME * 1000)));

    let mut miner = MiningOrchestrator::new(config(), store.clone(), clock.clone()).unwrap();
    miner.start(&funded).unwrap();
    for _ in 0..10 {
        assert!(matches!(miner.step(), StepOutcome::Progressed { hashes: 64 }));
        clock.0.set(clock.0.get() + 250);
    }
    let first = miner.stop().unwrap();
    drop(miner);

    // Independent recomputation of the same 640 nonces
    let challenge = Challenge::from_utxo(&funded).unwrap();
    let best_lz = (0..640)
        .map(|n| leading_zero_bits_bytes(&hash_step(challenge.as_bytes(), n)))
        .max()
        .unwrap();
    assert_eq!(first.leading_zeros, best_lz);
    assert_eq!(first.reward_amount, reward(first.nonce, &first.hash, START_TIME + 2));

    let saved = store.load(&challenge).unwrap().unwrap();
    assert_eq!(saved.current_nonce, 640);

    // Page reload: a new orchestrator over the same storage resumes
    let mut miner = MiningOrchestrator::new(config(), store.clone(), clock.clone()).unwrap();
    miner.start(&funded).unwrap();
    let mut progress_nonces = Vec::new();
    for _ in 0..5 {
        miner.step();
        for event in miner.drain_events() {
            if let MiningEvent::Progress(report) = event {
                progress_nonces.push(report.current_nonce);
            }
        }
    }
    assert_eq!(progress_nonces.first(), Some(&640));
    assert!(progress_nonces.windows(2).all(|w| w[0] < w[1]));

    let second = miner.stop().unwrap();
    assert!(second.leading_zeros >= first.leading_zeros);
    assert_eq!(miner.state().unwrap().current_nonce, 960);
}
