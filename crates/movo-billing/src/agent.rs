//! # Billing Agent
//!
//! Runs the billing cycle on an interval until told to stop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  BillingAgent::run                                             │
//! │                                                                │
//! │   select! {                                                    │
//! │     interval.tick()   ──► cycle.run_once(now)                  │
//! │     trigger_rx.recv() ──► cycle.run_once(now)   (run now)      │
//! │     shutdown_rx.recv() ──► break                               │
//! │   }                                                            │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A cycle that fails is logged; the next tick runs again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::context::BillingContext;
use crate::cycle::{BillingCycle, CycleReport};
use crate::error::{BillingError, BillingResult};

type TriggerReply = oneshot::Sender<BillingResult<CycleReport>>;

pub struct BillingAgent {
    ctx: BillingContext,
    cycle: Arc<BillingCycle>,
    interval: Duration,
    trigger_rx: mpsc::Receiver<TriggerReply>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for controlling the billing agent.
#[derive(Clone)]
pub struct BillingAgentHandle {
    trigger_tx: mpsc::Sender<TriggerReply>,
    shutdown_tx: mpsc::Sender<()>,
}

impl BillingAgentHandle {
    /// Runs a cycle right away and waits for its report.
    pub async fn run_now(&self) -> BillingResult<CycleReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger_tx
            .send(reply_tx)
            .await
            .map_err(|_| BillingError::AgentStopped("trigger channel closed".into()))?;
        reply_rx
            .await
            .map_err(|_| BillingError::AgentStopped("agent dropped the request".into()))?
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> BillingResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| BillingError::AgentStopped("shutdown channel closed".into()))
    }
}

impl BillingAgent {
    /// Creates the agent and its handle.
    pub fn new(
        ctx: BillingContext,
        cycle: Arc<BillingCycle>,
        interval: Duration,
    ) -> (Self, BillingAgentHandle) {
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let agent = BillingAgent {
            ctx,
            cycle,
            interval,
            trigger_rx,
            shutdown_rx,
        };
        let handle = BillingAgentHandle {
            trigger_tx,
            shutdown_tx,
        };

        (agent, handle)
    }

    /// Runs the agent loop.
    ///
    /// This should be spawned as a background task. The first cycle runs
    /// immediately.
    pub async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Billing agent starting");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Billing cycle failed");
                    }
                }

                Some(reply) = self.trigger_rx.recv() => {
                    let result = self.run_cycle().await;
                    if let Err(e) = &result {
                        error!(error = %e, "Requested billing cycle failed");
                    }
                    let _ = reply.send(result);
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Billing agent shutting down");
                    break;
                }
            }
        }

        info!("Billing agent stopped");
    }

    async fn run_cycle(&self) -> BillingResult<CycleReport> {
        self.cycle.run_once(self.ctx.time.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, harness};

    #[tokio::test]
    async fn test_agent_runs_on_demand_and_stops() {
        let h = harness(at(2024, 1, 1)).await;
        h.trial("acct-1").await;
        h.clock.set(at(2024, 1, 17));

        let (agent, handle) = BillingAgent::new(
            h.ctx.clone(),
            h.services.cycle.clone(),
            Duration::from_secs(3600),
        );
        let task = tokio::spawn(agent.run());

        let report = handle.run_now().await.unwrap();
        assert_eq!(report.processed, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let profile = h.services.subscriptions.get_profile("acct-1").await.unwrap();
        assert_eq!(profile.status, movo_core::BillingStatus::Blocked);
        assert!(handle.run_now().await.is_err());
    }
}
