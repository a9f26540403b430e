//! Sine-wave stress modulation

use std::f64::consts::TAU;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StressConfig;
use crate::worker::PauseGate;

/// Target active worker count over time
#[derive(Debug, Clone)]
pub struct StressProfile {
    config: StressConfig,
    workers: usize,
}

impl StressProfile {
    /// Profile for a pool of `workers`
    pub fn new(config: StressConfig, workers: usize) -> Self {
        Self {
            config,
            workers: workers.max(1),
        }
    }

    /// Modulation settings
    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Active workers `elapsed` into the run
    ///
    /// `round(mean + amplitude * sin(2πt / period))`, clamped to `[1, workers]`.
    pub fn active_at(&self, elapsed: Duration) -> usize {
        let phase = TAU * elapsed.as_secs_f64() / self.config.period.as_secs_f64();
        let target = (self.config.mean + self.config.amplitude * phase.sin()).round();
        target.clamp(1.0, self.workers as f64) as usize
    }
}

/// Periodically publishes the profile's target to a [`PauseGate`]
///
/// Units above the target finish their in-flight task and wait at the gate
/// before their next start. Stopping the controller reopens the gate.
#[derive(Debug)]
pub struct StressController {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl StressController {
    /// Apply the initial target and start the control loop
    pub fn spawn(profile: StressProfile, gate: PauseGate) -> Self {
        let token = CancellationToken::new();
        let initial = profile.active_at(Duration::ZERO);
        gate.set_active_limit(initial);
        tracing::info!(
            active = initial,
            workers = profile.workers,
            period = ?profile.config.period,
            "Stress modulation started"
        );

        let task = tokio::spawn(control_loop(profile, gate, token.clone()));
        Self { token, task }
    }

    /// Stop the control loop and wait for it to reopen the gate
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Stress controller ended abnormally");
        }
    }
}

async fn control_loop(profile: StressProfile, gate: PauseGate, token: CancellationToken) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(profile.config.control_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut current = gate.active_limit();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let target = profile.active_at(started.elapsed());
        if target != current {
            tracing::debug!(from = current, to = target, "Active workers changed");
            gate.set_active_limit(target);
            current = target;
        }
    }

    gate.set_active_limit(usize::MAX);
    tracing::debug!("Stress modulation stopped");
}
