//! Lifecycle of a mining session.
//!
//! [`MiningOrchestrator`] owns the [`MiningState`], picks the CPU or GPU
//! strategy, persists checkpoints and queues [`MiningEvent`]s for the host.
//! Work happens in host-driven slices: each [`step`](MiningOrchestrator::step)
//! hashes one CPU slice or one GPU batch and returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::clock::Clock;
use crate::config::MinerConfig;
use crate::cpu::{CpuMiningStrategy, MiningSink};
use crate::error::{BackendError, MiningError};
use crate::event::{hash_rate, EventQueue, MiningEvent, MiningStatus, ProgressReport};
use crate::gpu::{GpuBatchCoordinator, GpuComputeBackend};
use crate::reward::RewardSchedule;
use crate::state::{Challenge, MiningMode, MiningResult, MiningState};
use crate::utxo::Utxo;

/// Cloneable handle that requests a stop of the running session.
///
/// The request is observed before the next nonce (CPU) or batch (GPU).
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where the orchestrator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Stopped,
    Completed,
}

/// What a call to [`MiningOrchestrator::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// No session is active.
    Idle,
    /// Work was done; `hashes` nonces were evaluated.
    Progressed { hashes: u64 },
    /// A GPU retry is pending until the given time.
    BackingOff { until_ms: u64 },
    /// The session has stopped.
    Stopped(Option<MiningResult>),
    /// The nonce space is exhausted.
    Completed(Option<MiningResult>),
}

/// Session statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    pub phase: Phase,
    pub mode: MiningMode,
    pub current_nonce: u64,
    pub best_leading_zeros: u32,
    /// Nonces evaluated since the session (re)started.
    pub hashes: u64,
    pub elapsed_ms: u64,
    pub hash_rate: f64,
}

enum ActiveStrategy {
    Cpu(CpuMiningStrategy),
    Gpu(GpuBatchCoordinator),
}

/// Sink wired to the orchestrator's store, clock and event queue for the
/// duration of one slice.
struct Session<'a, S, C> {
    store: &'a mut S,
    clock: &'a C,
    events: &'a mut EventQueue,
    stop: &'a StopHandle,
    reward: &'a RewardSchedule,
    started_at_ms: u64,
    start_nonce: u64,
}

impl<S: CheckpointStore, C: Clock> MiningSink for Session<'_, S, C> {
    fn should_stop(&self) -> bool {
        self.stop.is_stop_requested()
    }

    fn best_hash(&mut self, state: &MiningState) {
        let reward = self
            .reward
            .reward(state.best_nonce, &state.best_hash, self.clock.now_secs());
        info!(
            "new best hash for {} at nonce {}: {} leading zeros",
            state.challenge, state.best_nonce, state.best_leading_zeros
        );
        self.events.push(MiningEvent::BestHash {
            hash: state.best_hash.clone(),
            nonce: state.best_nonce,
            leading_zeros: state.best_leading_zeros,
            reward,
        });
    }

    fn progress(&mut self, state: &MiningState, nonce: u64, leading_zeros: u32) {
        let elapsed_ms = self.clock.now_ms().saturating_sub(self.started_at_ms);
        let hashes = state.current_nonce.saturating_sub(self.start_nonce);
        let rate = hash_rate(hashes, elapsed_ms);
        self.events.push(MiningEvent::Progress(ProgressReport::from_state(
            state,
            nonce,
            leading_zeros,
            rate,
            elapsed_ms,
        )));
    }

    fn checkpoint(&mut self, state: &MiningState) {
        save_checkpoint(self.store, state, self.clock.now_ms());
    }
}

fn save_checkpoint<S: CheckpointStore>(store: &mut S, state: &MiningState, now_ms: u64) {
    let checkpoint = Checkpoint::from_state(state, now_ms);
    if let Err(e) = store.save(&state.challenge, &checkpoint) {
        warn!("failed to save checkpoint for {}: {}", state.challenge, e);
    }
}

/// What one pass of the active strategy reported.
#[derive(Default)]
struct Pass {
    hashes: u64,
    stopped: bool,
    exhausted: bool,
    gpu_ok: bool,
    failure: Option<BackendError>,
}

/// Owns a single mining session at a time.
pub struct MiningOrchestrator<S, C> {
    config: MinerConfig,
    store: S,
    clock: C,
    gpu_backend: Option<Box<dyn GpuComputeBackend>>,
    preferred_mode: MiningMode,
    state: Option<MiningState>,
    phase: Phase,
    strategy: Option<ActiveStrategy>,
    events: EventQueue,
    stop: StopHandle,
    started_at_ms: u64,
    ended_at_ms: Option<u64>,
    start_nonce: u64,
    retry_at_ms: Option<u64>,
    gpu_failures: u32,
}

impl<S: CheckpointStore, C: Clock> MiningOrchestrator<S, C> {
    /// Validate the configuration and load the persisted mode preference.
    pub fn new(config: MinerConfig, store: S, clock: C) -> Result<Self, MiningError> {
        config.validate()?;
        let preferred_mode = match store.load_mode() {
            Ok(mode) => mode.unwrap_or_default(),
            Err(e) => {
                warn!("failed to load mining mode: {}", e);
                MiningMode::default()
            }
        };
        let events = EventQueue::new(config.max_queued_events);

        Ok(MiningOrchestrator {
            config,
            store,
            clock,
            gpu_backend: None,
            preferred_mode,
            state: None,
            phase: Phase::Idle,
            strategy: None,
            events,
            stop: StopHandle::default(),
            started_at_ms: 0,
            ended_at_ms: None,
            start_nonce: 0,
            retry_at_ms: None,
            gpu_failures: 0,
        })
    }

    /// Attach a GPU backend used when the mode is [`MiningMode::Gpu`].
    pub fn with_gpu_backend(mut self, backend: Box<dyn GpuComputeBackend>) -> Self {
        self.gpu_backend = Some(backend);
        self
    }

    pub fn set_gpu_backend(&mut self, backend: Option<Box<dyn GpuComputeBackend>>) {
        self.gpu_backend = backend;
    }

    /// Start mining the challenge derived from `utxo`.
    pub fn start(&mut self, utxo: &Utxo) -> Result<(), MiningError> {
        let challenge = Challenge::from_utxo(utxo)?;
        self.start_challenge(challenge)
    }

    /// Start mining an explicit challenge.
    ///
    /// Resumes from the in-memory state when it belongs to the same
    /// challenge, otherwise from the stored checkpoint if one exists.
    pub fn start_challenge(&mut self, challenge: Challenge) -> Result<(), MiningError> {
        if self.phase == Phase::Running {
            let current = self
                .state
                .as_ref()
                .map(|s| s.challenge.to_string())
                .unwrap_or_default();
            return Err(MiningError::AlreadyRunning(current));
        }

        self.stop.clear();
        self.push_status(MiningStatus::Starting, self.preferred_mode, format!("starting {}", challenge));

        let mut state = match self.state.take() {
            Some(state) if state.challenge == challenge => state,
            _ => self.load_state(challenge),
        };
        if state.current_nonce > 0 || state.has_result() {
            info!(
                "resuming {} at nonce {} (best {} leading zeros)",
                state.challenge, state.current_nonce, state.best_leading_zeros
            );
            self.push_status(
                MiningStatus::Resumed,
                self.preferred_mode,
                format!("resuming at nonce {}", state.current_nonce),
            );
        }

        let strategy = self.activate(&mut state);
        state.is_running = true;

        self.started_at_ms = self.clock.now_ms();
        self.ended_at_ms = None;
        self.start_nonce = state.current_nonce;
        self.retry_at_ms = None;
        self.gpu_failures = 0;
        self.strategy = Some(strategy);
        self.phase = Phase::Running;

        info!("mining {} on {}", state.challenge, state.mode);
        self.push_status(MiningStatus::Mining, state.mode, format!("mining {}", state.challenge));
        self.state = Some(state);
        Ok(())
    }

    fn load_state(&self, challenge: Challenge) -> MiningState {
        let mut state = MiningState::new(challenge, self.preferred_mode);
        match self.store.load(&state.challenge) {
            Ok(Some(checkpoint)) if checkpoint.challenge == state.challenge => {
                checkpoint.restore_into(&mut state);
            }
            Ok(_) => {}
            Err(e) => warn!("failed to load checkpoint for {}: {}", state.challenge, e),
        }
        state
    }

    /// Pick the strategy for the preferred mode, falling back to CPU when
    /// the GPU cannot be brought up.
    fn activate(&mut self, state: &mut MiningState) -> ActiveStrategy {
        if self.preferred_mode == MiningMode::Gpu {
            match self.init_gpu(&state.challenge) {
                Ok(()) => {
                    state.mode = MiningMode::Gpu;
                    return ActiveStrategy::Gpu(GpuBatchCoordinator::new(&self.config, state.current_nonce));
                }
                Err(e) => {
                    warn!("GPU unavailable, falling back to CPU: {}", e);
                    self.push_status(MiningStatus::FallbackToCpu, MiningMode::Cpu, e.to_string());
                }
            }
        }
        state.mode = MiningMode::Cpu;
        ActiveStrategy::Cpu(CpuMiningStrategy::new(&state.challenge, &self.config))
    }

    fn init_gpu(&mut self, challenge: &Challenge) -> Result<(), BackendError> {
        let backend = self
            .gpu_backend
            .as_deref_mut()
            .ok_or_else(|| BackendError::Unavailable("no compute backend attached".to_string()))?;
        backend.init()?;
        if let Err(e) = backend.set_challenge(challenge.as_bytes()) {
            backend.destroy();
            return Err(e);
        }
        Ok(())
    }

    /// Run one CPU slice or one GPU batch.
    pub fn step(&mut self) -> StepOutcome {
        match self.phase {
            Phase::Idle => return StepOutcome::Idle,
            Phase::Stopped => return StepOutcome::Stopped(self.result()),
            Phase::Completed => return StepOutcome::Completed(self.result()),
            Phase::Running => {}
        }
        if self.stop.is_stop_requested() {
            return StepOutcome::Stopped(self.finish(Phase::Stopped));
        }

        let now = self.clock.now_ms();
        if let Some(until_ms) = self.retry_at_ms {
            if now < until_ms {
                return StepOutcome::BackingOff { until_ms };
            }
            self.retry_at_ms = None;
        }

        let pass = {
            let (state, strategy) = match (self.state.as_mut(), self.strategy.as_mut()) {
                (Some(state), Some(strategy)) => (state, strategy),
                _ => {
                    self.phase = Phase::Idle;
                    return StepOutcome::Idle;
                }
            };
            let mut session = Session {
                store: &mut self.store,
                clock: &self.clock,
                events: &mut self.events,
                stop: &self.stop,
                reward: &self.config.reward,
                started_at_ms: self.started_at_ms,
                start_nonce: self.start_nonce,
            };

            match strategy {
                ActiveStrategy::Cpu(cpu) => {
                    let report = cpu.run_slice(state, &mut session);
                    Pass {
                        hashes: report.hashes,
                        stopped: report.stopped,
                        exhausted: report.exhausted,
                        ..Pass::default()
                    }
                }
                ActiveStrategy::Gpu(coordinator) => {
                    let result = match self.gpu_backend.as_deref_mut() {
                        Some(backend) => coordinator.run_batch(backend, state, &mut session),
                        None => Err(BackendError::Unavailable("compute backend detached".to_string())),
                    };
                    match result {
                        Ok(report) => Pass {
                            hashes: u64::from(report.batch_size),
                            stopped: report.stopped,
                            exhausted: report.exhausted,
                            gpu_ok: true,
                            failure: None,
                        },
                        Err(e) => Pass {
                            failure: Some(e),
                            ..Pass::default()
                        },
                    }
                }
            }
        };

        if let Some(err) = pass.failure {
            return self.handle_gpu_failure(err);
        }
        if pass.gpu_ok {
            self.gpu_failures = 0;
        }
        if pass.stopped {
            return StepOutcome::Stopped(self.finish(Phase::Stopped));
        }
        if pass.exhausted {
            return StepOutcome::Completed(self.finish(Phase::Completed));
        }
        debug!("slice done: {} hashes", pass.hashes);
        StepOutcome::Progressed { hashes: pass.hashes }
    }

    fn handle_gpu_failure(&mut self, err: BackendError) -> StepOutcome {
        self.gpu_failures += 1;
        warn!(
            "GPU batch failed ({}/{}): {}",
            self.gpu_failures, self.config.gpu_max_retries, err
        );
        if self.stop.is_stop_requested() {
            return StepOutcome::Stopped(self.finish(Phase::Stopped));
        }

        if self.gpu_failures >= self.config.gpu_max_retries {
            if let Some(backend) = self.gpu_backend.as_deref_mut() {
                backend.destroy();
            }
            self.gpu_failures = 0;
            if let Some(state) = self.state.as_mut() {
                state.mode = MiningMode::Cpu;
                self.strategy = Some(ActiveStrategy::Cpu(CpuMiningStrategy::new(
                    &state.challenge,
                    &self.config,
                )));
            }
            self.push_status(
                MiningStatus::FallbackToCpu,
                MiningMode::Cpu,
                format!("GPU failed repeatedly: {}", err),
            );
            return StepOutcome::Progressed { hashes: 0 };
        }

        let until_ms = self.clock.now_ms() + self.config.gpu_retry_backoff_ms;
        self.retry_at_ms = Some(until_ms);
        self.push_status(
            MiningStatus::Retrying,
            MiningMode::Gpu,
            format!("retrying after {} ms: {}", self.config.gpu_retry_backoff_ms, err),
        );
        StepOutcome::BackingOff { until_ms }
    }

    /// Drive the session until it stops or completes, sleeping through GPU
    /// backoffs and handing every event to `on_event`.
    #[cfg(feature = "std")]
    pub fn run<F: FnMut(MiningEvent)>(&mut self, mut on_event: F) -> Option<MiningResult> {
        loop {
            let outcome = self.step();
            for event in self.events.drain() {
                on_event(event);
            }
            match outcome {
                StepOutcome::Progressed { .. } => {}
                StepOutcome::BackingOff { until_ms } => {
                    let wait = until_ms.saturating_sub(self.clock.now_ms());
                    std::thread::sleep(std::time::Duration::from_millis(wait));
                }
                StepOutcome::Stopped(result) | StepOutcome::Completed(result) => return result,
                StepOutcome::Idle => return None,
            }
        }
    }

    /// Restart the last challenge after a stop, from its saved nonce.
    pub fn resume(&mut self) -> Result<(), MiningError> {
        let challenge = self
            .state
            .as_ref()
            .map(|state| state.challenge.clone())
            .ok_or(MiningError::NotStarted)?;
        self.start_challenge(challenge)
    }

    /// Stop the session, flush a final checkpoint and return the best result.
    pub fn stop(&mut self) -> Option<MiningResult> {
        if self.phase != Phase::Running {
            return self.result();
        }
        self.stop.stop();
        self.finish(Phase::Stopped)
    }

    fn finish(&mut self, phase: Phase) -> Option<MiningResult> {
        let now = self.clock.now_ms();
        if let Some(ActiveStrategy::Gpu(_)) = self.strategy.take() {
            if let Some(backend) = self.gpu_backend.as_deref_mut() {
                backend.destroy();
            }
        }
        self.retry_at_ms = None;
        self.ended_at_ms = Some(now);
        self.phase = phase;

        let (status, mode, message) = match self.state.as_mut() {
            Some(state) => {
                state.is_running = false;
                save_checkpoint(&mut self.store, state, now);
                let status = if phase == Phase::Completed {
                    MiningStatus::Completed
                } else {
                    MiningStatus::Stopped
                };
                info!(
                    "{} {} at nonce {} (best {} leading zeros)",
                    if phase == Phase::Completed { "completed" } else { "stopped" },
                    state.challenge,
                    state.current_nonce,
                    state.best_leading_zeros
                );
                (status, state.mode, format!("stopped at nonce {}", state.current_nonce))
            }
            None => (MiningStatus::Stopped, self.preferred_mode, String::new()),
        };
        self.push_status(status, mode, message);
        self.result()
    }

    /// Change the preferred mode. Rejected while mining.
    pub fn set_mode(&mut self, mode: MiningMode) -> bool {
        if self.phase == Phase::Running {
            warn!("cannot switch to {} while mining", mode);
            return false;
        }
        self.preferred_mode = mode;
        if let Err(e) = self.store.save_mode(mode) {
            warn!("failed to save mining mode: {}", e);
        }
        if let Some(state) = self.state.as_mut() {
            state.mode = mode;
            save_checkpoint(&mut self.store, state, self.clock.now_ms());
        }
        true
    }

    /// Stop if needed, then forget the state and its checkpoint.
    pub fn reset(&mut self) {
        if self.phase == Phase::Running {
            self.stop();
        }
        if let Some(state) = self.state.take() {
            if let Err(e) = self.store.clear(&state.challenge) {
                warn!("failed to clear checkpoint for {}: {}", state.challenge, e);
            }
        }
        self.phase = Phase::Idle;
        self.strategy = None;
        self.events.clear();
    }

    /// Take all queued events in emission order.
    ///
    /// Hosts should drain after every `step()`; once `max_queued_events` is
    /// reached the oldest progress reports are discarded.
    pub fn drain_events(&mut self) -> Vec<MiningEvent> {
        self.events.drain()
    }

    /// Cloneable stop request for code that cannot reach the orchestrator.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Best result so far, with its reward at the current time.
    pub fn result(&self) -> Option<MiningResult> {
        let state = self.state.as_ref()?;
        let now_ms = self.clock.now_ms();
        let reward = self
            .config
            .reward
            .reward(state.best_nonce, &state.best_hash, now_ms / 1000);
        state.result(reward, now_ms)
    }

    pub fn stats(&self) -> MiningStats {
        let end = self.ended_at_ms.unwrap_or_else(|| self.clock.now_ms());
        let elapsed_ms = end.saturating_sub(self.started_at_ms);
        let (current_nonce, best_leading_zeros, mode) = match &self.state {
            Some(state) => (state.current_nonce, state.best_leading_zeros, state.mode),
            None => (0, 0, self.preferred_mode),
        };
        let hashes = current_nonce.saturating_sub(self.start_nonce);
        MiningStats {
            phase: self.phase,
            mode,
            current_nonce,
            best_leading_zeros,
            hashes,
            elapsed_ms,
            hash_rate: hash_rate(hashes, elapsed_ms),
        }
    }

    pub fn state(&self) -> Option<&MiningState> {
        self.state.as_ref()
    }

    /// Preferred mode; the running mode is in [`MiningState::mode`].
    pub fn mode(&self) -> MiningMode {
        self.preferred_mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn push_status(&mut self, status: MiningStatus, mode: MiningMode, message: String) {
        self.events.push(MiningEvent::Status { status, mode, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::gpu::GpuBatchResult;
    use crate::hash::{hash_step, leading_zero_bits_bytes};
    use crate::reward::START_TIME;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct TestClock(Rc<Cell<u64>>);

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.0.set(self.0.get() + ms);
        }
    }

    fn config() -> MinerConfig {
        MinerConfig {
            cpu_yield_interval: 50,
            cpu_progress_interval: 20,
            cpu_save_interval: 40,
            gpu_batch_size: 64,
            gpu_max_retries: 2,
            gpu_retry_backoff_ms: 100,
            ..MinerConfig::default()
        }
    }

    fn orchestrator(
        store: MemoryCheckpointStore,
    ) -> (MiningOrchestrator<MemoryCheckpointStore, TestClock>, TestClock) {
        let clock = TestClock(Rc::new(Cell::new(START_TIME * 1000)));
        let miner = MiningOrchestrator::new(config(), store, clock.clone()).unwrap();
        (miner, clock)
    }

    fn utxo() -> Utxo {
        Utxo::new("c0ffee", 1, 5_000)
    }

    /// Backend that hashes only the first nonce of each batch.
    struct FirstNonceBackend {
        challenge: Vec<u8>,
        failing: bool,
        destroyed: Rc<Cell<u32>>,
    }

    impl FirstNonceBackend {
        fn boxed(failing: bool, destroyed: &Rc<Cell<u32>>) -> Box<dyn GpuComputeBackend> {
            Box::new(FirstNonceBackend {
                challenge: Vec::new(),
                failing,
                destroyed: destroyed.clone(),
            })
        }
    }

    impl GpuComputeBackend for FirstNonceBackend {
        fn init(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        fn set_challenge(&mut self, challenge: &[u8]) -> Result<(), BackendError> {
            self.challenge = challenge.to_vec();
            Ok(())
        }

        fn compute_batch(&mut self, start: u64, _size: u32) -> Result<GpuBatchResult, BackendError> {
            if self.failing {
                return Err(BackendError::BatchFailed("lost device".to_string()));
            }
            let hash = hash_step(&self.challenge, start);
            let mut words = [0u32; 8];
            for (word, chunk) in words.iter_mut().zip(hash.chunks_exact(4)) {
                *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            Ok(GpuBatchResult {
                best_words: words,
                best_leading_zeros: leading_zero_bits_bytes(&hash),
                best_nonce_hi: (start >> 32) as u32,
                best_nonce_lo: start as u32,
            })
        }

        fn destroy(&mut self) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    struct RejectingBackend {
        destroyed: Rc<Cell<u32>>,
    }

    impl GpuComputeBackend for RejectingBackend {
        fn init(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        fn set_challenge(&mut self, _challenge: &[u8]) -> Result<(), BackendError> {
            Err(BackendError::InitFailed("buffer allocation failed".to_string()))
        }

        fn compute_batch(&mut self, _start: u64, _size: u32) -> Result<GpuBatchResult, BackendError> {
            Err(BackendError::BatchFailed("not initialized".to_string()))
        }

        fn destroy(&mut self) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    fn statuses(events: &[MiningEvent]) -> Vec<MiningStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                MiningEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_step_stop() {
        let (mut miner, clock) = orchestrator(MemoryCheckpointStore::new());
        assert_eq!(miner.step(), StepOutcome::Idle);
        assert!(miner.stop().is_none());

        miner.start(&utxo()).unwrap();
        assert!(miner.is_running());
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 50 });
        clock.advance(1_000);
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 50 });

        let result = miner.stop().unwrap();
        assert_eq!(result.challenge.as_str(), "c0ffee:1");
        assert!(result.reward_amount > 0 || result.leading_zeros == 0);
        assert_eq!(miner.phase(), Phase::Stopped);
        assert!(!miner.state().unwrap().is_running);

        let stats = miner.stats();
        assert_eq!(stats.hashes, 100);
        assert_eq!(stats.elapsed_ms, 1_000);

        let events = miner.drain_events();
        assert_eq!(
            statuses(&events),
            vec![MiningStatus::Starting, MiningStatus::Mining, MiningStatus::Stopped]
        );
    }

    #[test]
    fn test_event_ordering() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.start(&utxo()).unwrap();
        for _ in 0..4 {
            miner.step();
        }

        let mut last_progress = None;
        let mut best_seen = String::new();
        for event in miner.drain_events() {
            match event {
                MiningEvent::BestHash { hash, .. } => best_seen = hash,
                MiningEvent::Progress(report) => {
                    if let Some(last) = last_progress {
                        assert!(report.current_nonce > last);
                    }
                    last_progress = Some(report.current_nonce);
                    // Any best a progress report shows was announced first
                    assert_eq!(report.best_hash, best_seen);
                }
                MiningEvent::Status { .. } => {}
            }
        }
        assert_eq!(last_progress, Some(180));
    }

    #[test]
    fn test_undrained_events_are_bounded() {
        let (mut unbounded, _) = orchestrator(MemoryCheckpointStore::new());
        let clock = TestClock(Rc::new(Cell::new(START_TIME * 1000)));
        let small = MinerConfig {
            max_queued_events: 5,
            ..config()
        };
        let mut bounded = MiningOrchestrator::new(small, MemoryCheckpointStore::new(), clock).unwrap();

        for miner in [&mut unbounded, &mut bounded] {
            miner.start(&utxo()).unwrap();
            for _ in 0..4 {
                miner.step();
            }
        }
        let all = unbounded.drain_events();
        let kept = bounded.drain_events();
        assert!(all.len() > 5);
        assert_eq!(kept.len(), 5);

        // What survives is an ordered subset of the full stream
        let mut rest = all.iter();
        for event in &kept {
            assert!(rest.any(|e| e == event), "{:?} out of order", event);
        }
    }

    #[test]
    fn test_second_start_rejected() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.start(&utxo()).unwrap();
        let err = miner.start(&Utxo::new("other", 0, 1)).unwrap_err();
        assert_eq!(err, MiningError::AlreadyRunning("c0ffee:1".to_string()));
    }

    #[test]
    fn test_invalid_utxo_rejected() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        assert!(matches!(
            miner.start(&Utxo::new("", 0, 1)),
            Err(MiningError::InvalidChallenge(_))
        ));
        assert_eq!(miner.phase(), Phase::Idle);
    }

    #[test]
    fn test_resume_never_loses_best() {
        let store = MemoryCheckpointStore::new();
        let (mut miner, _) = orchestrator(store.clone());
        miner.start(&utxo()).unwrap();
        for _ in 0..3 {
            miner.step();
        }
        let before = miner.stop().unwrap();
        let stopped_at = miner.state().unwrap().current_nonce;

        let checkpoint = store.get(&before.challenge).unwrap();
        assert_eq!(checkpoint.current_nonce, stopped_at);
        assert_eq!(checkpoint.best_hash, before.hash);

        // Fresh orchestrator over the same storage
        let (mut resumed, _) = orchestrator(store.clone());
        resumed.start(&utxo()).unwrap();
        assert_eq!(resumed.state().unwrap().current_nonce, stopped_at);
        assert!(statuses(&resumed.drain_events()).contains(&MiningStatus::Resumed));

        resumed.step();
        let after = resumed.stop().unwrap();
        assert!(after.leading_zeros >= before.leading_zeros);
        assert!(after.hash <= before.hash || after.leading_zeros > before.leading_zeros);
        assert_eq!(resumed.state().unwrap().current_nonce, stopped_at + 50);
    }

    #[test]
    fn test_restart_same_challenge_keeps_memory_state() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.start(&utxo()).unwrap();
        miner.step();
        miner.stop();
        miner.start(&utxo()).unwrap();
        assert_eq!(miner.state().unwrap().current_nonce, 50);
    }

    #[test]
    fn test_stop_without_result() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.start(&utxo()).unwrap();
        assert!(miner.stop().is_none());
        assert_eq!(miner.step(), StepOutcome::Stopped(None));
    }

    #[test]
    fn test_resume_after_stop() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        assert_eq!(miner.resume(), Err(MiningError::NotStarted));

        miner.start(&utxo()).unwrap();
        miner.step();
        miner.stop();
        miner.resume().unwrap();
        assert!(miner.is_running());
        assert_eq!(miner.state().unwrap().current_nonce, 50);
        assert_eq!(miner.resume(), Err(MiningError::AlreadyRunning("c0ffee:1".to_string())));
    }

    #[test]
    fn test_stop_handle() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.start(&utxo()).unwrap();
        miner.step();
        let handle = miner.stop_handle();
        handle.stop();
        assert!(matches!(miner.step(), StepOutcome::Stopped(Some(_))));
        assert_eq!(miner.state().unwrap().current_nonce, 50);
    }

    #[test]
    fn test_set_mode_rejected_while_running() {
        let store = MemoryCheckpointStore::new();
        let (mut miner, _) = orchestrator(store.clone());
        miner.start(&utxo()).unwrap();
        assert!(!miner.set_mode(MiningMode::Gpu));
        miner.stop();
        assert!(miner.set_mode(MiningMode::Gpu));
        assert_eq!(store.load_mode().unwrap(), Some(MiningMode::Gpu));

        // Preference is picked up by the next orchestrator
        let (next, _) = orchestrator(store);
        assert_eq!(next.mode(), MiningMode::Gpu);
    }

    #[test]
    fn test_gpu_without_backend_falls_back() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.set_mode(MiningMode::Gpu);
        miner.start(&utxo()).unwrap();
        assert_eq!(miner.state().unwrap().mode, MiningMode::Cpu);
        assert!(statuses(&miner.drain_events()).contains(&MiningStatus::FallbackToCpu));
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 50 });
    }

    #[test]
    fn test_gpu_released_when_challenge_rejected() {
        let destroyed = Rc::new(Cell::new(0));
        let (miner, _) = orchestrator(MemoryCheckpointStore::new());
        let mut miner = miner.with_gpu_backend(Box::new(RejectingBackend {
            destroyed: destroyed.clone(),
        }));
        miner.set_mode(MiningMode::Gpu);
        miner.start(&utxo()).unwrap();

        assert_eq!(destroyed.get(), 1);
        assert_eq!(miner.state().unwrap().mode, MiningMode::Cpu);
        assert!(statuses(&miner.drain_events()).contains(&MiningStatus::FallbackToCpu));
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 50 });

        // The CPU session owns no device, so stopping releases nothing more
        miner.stop();
        assert_eq!(destroyed.get(), 1);
    }

    #[test]
    fn test_gpu_batches() {
        let destroyed = Rc::new(Cell::new(0));
        let (miner, _) = orchestrator(MemoryCheckpointStore::new());
        let mut miner = miner.with_gpu_backend(FirstNonceBackend::boxed(false, &destroyed));
        miner.set_mode(MiningMode::Gpu);
        miner.start(&utxo()).unwrap();
        assert_eq!(miner.state().unwrap().mode, MiningMode::Gpu);

        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 64 });
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 64 });
        assert_eq!(miner.state().unwrap().current_nonce, 128);

        let result = miner.stop().unwrap();
        assert!(result.nonce == 0 || result.nonce == 64);
        assert_eq!(destroyed.get(), 1);
    }

    #[test]
    fn test_gpu_retry_then_cpu_fallback() {
        let destroyed = Rc::new(Cell::new(0));
        let (miner, clock) = orchestrator(MemoryCheckpointStore::new());
        let mut miner = miner.with_gpu_backend(FirstNonceBackend::boxed(true, &destroyed));
        miner.set_mode(MiningMode::Gpu);
        miner.start(&utxo()).unwrap();

        let until_ms = START_TIME * 1000 + 100;
        assert_eq!(miner.step(), StepOutcome::BackingOff { until_ms });
        assert_eq!(miner.step(), StepOutcome::BackingOff { until_ms });
        clock.advance(100);

        // Second consecutive failure reaches the retry limit
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 0 });
        assert_eq!(destroyed.get(), 1);
        assert_eq!(miner.state().unwrap().mode, MiningMode::Cpu);
        assert_eq!(miner.step(), StepOutcome::Progressed { hashes: 50 });

        let events = statuses(&miner.drain_events());
        assert!(events.contains(&MiningStatus::Retrying));
        assert_eq!(events.last(), Some(&MiningStatus::FallbackToCpu));
        // The preference is untouched by the fallback
        assert_eq!(miner.mode(), MiningMode::Gpu);
    }

    #[test]
    fn test_exhausted_nonce_space_completes() {
        let mut store = MemoryCheckpointStore::new();
        let challenge = Challenge::from_utxo(&utxo()).unwrap();
        let mut state = MiningState::new(challenge.clone(), MiningMode::Cpu);
        state.current_nonce = u64::MAX - 1;
        store.save(&challenge, &Checkpoint::from_state(&state, 0)).unwrap();

        let (mut miner, _) = orchestrator(store);
        miner.start(&utxo()).unwrap();
        assert!(matches!(miner.step(), StepOutcome::Completed(Some(_))));
        assert_eq!(miner.phase(), Phase::Completed);
        assert_eq!(miner.stats().hashes, 1);
    }

    #[test]
    fn test_reset_clears_checkpoint() {
        let store = MemoryCheckpointStore::new();
        let (mut miner, _) = orchestrator(store.clone());
        miner.start(&utxo()).unwrap();
        miner.step();
        miner.reset();
        assert!(store.is_empty());
        assert!(miner.state().is_none());
        assert_eq!(miner.phase(), Phase::Idle);

        miner.start(&utxo()).unwrap();
        assert_eq!(miner.state().unwrap().current_nonce, 0);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_run_until_stop_requested() {
        let (mut miner, _) = orchestrator(MemoryCheckpointStore::new());
        miner.start(&utxo()).unwrap();
        let handle = miner.stop_handle();
        let mut progress = 0;
        let result = miner.run(|event| {
            if let MiningEvent::Progress(_) = event {
                progress += 1;
                if progress == 3 {
                    handle.stop();
                }
            }
        });
        assert!(result.is_some());
        assert_eq!(miner.phase(), Phase::Stopped);
    }
}
