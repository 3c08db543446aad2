//! Sync trigger plumbing.
//!
//! The engine itself never decides when to run; triggers come from outside:
//! the recurring timer, app resume (connectivity regained), explicit user
//! action, and the dispatcher's post-enqueue kick. All of them funnel into
//! one channel. The engine drops a trigger that lands mid-pass, so the timer
//! is what keeps the queue draining eventually.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bus::EnqueuedWrite;
use crate::sync::SyncEngine;

/// Why a pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  /// The dispatcher just parked a write.
  Enqueued,
  /// Recurring interval tick.
  Timer,
  /// App came back to the foreground / connectivity regained.
  Resume,
  /// Explicit user action.
  Manual,
}

/// Cloneable handle for firing triggers into a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
  tx: mpsc::UnboundedSender<SyncTrigger>,
}

impl SchedulerHandle {
  /// Fire-and-forget; a dead scheduler just drops the trigger.
  pub fn trigger(&self, trigger: SyncTrigger) {
    let _ = self.tx.send(trigger);
  }
}

/// Drives the engine from triggers and a recurring timer.
pub struct SyncScheduler {
  engine: Arc<SyncEngine>,
  triggers: mpsc::UnboundedReceiver<SyncTrigger>,
  handle: SchedulerHandle,
  interval: Duration,
  /// Env var holding the session token; passes only run while it is set.
  token_env: String,
}

impl SyncScheduler {
  pub fn new(engine: Arc<SyncEngine>, interval: Duration, token_env: String) -> Self {
    let (tx, triggers) = mpsc::unbounded_channel();
    Self {
      engine,
      triggers,
      handle: SchedulerHandle { tx },
      interval,
      token_env,
    }
  }

  pub fn handle(&self) -> SchedulerHandle {
    self.handle.clone()
  }

  /// Forward the dispatcher's enqueued-write events as triggers.
  pub fn bridge_enqueued(handle: SchedulerHandle, mut rx: mpsc::UnboundedReceiver<EnqueuedWrite>) {
    tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        debug!("write {} enqueued for {}, kicking sync", event.id, event.url);
        handle.trigger(SyncTrigger::Enqueued);
      }
    });
  }

  /// Run until every trigger handle is dropped.
  pub async fn run(mut self) -> Result<()> {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
      let trigger = tokio::select! {
        _ = ticker.tick() => SyncTrigger::Timer,
        received = self.triggers.recv() => match received {
          Some(t) => t,
          None => break,
        },
      };

      if !self.authenticated() {
        debug!("no session token, skipping {:?} trigger", trigger);
        continue;
      }

      match self.engine.run_pass().await {
        Ok(Some(report)) => {
          if report.attempted > 0 {
            info!(
              "sync pass ({:?}): {} attempted, {} completed, {} failed, {} abandoned",
              trigger, report.attempted, report.completed, report.failed, report.abandoned
            );
          }
        }
        Ok(None) => debug!("{:?} trigger coalesced into the running pass", trigger),
        Err(err) => warn!("sync pass failed: {}", err),
      }
    }

    Ok(())
  }

  fn authenticated(&self) -> bool {
    std::env::var(&self.token_env).map(|t| !t.is_empty()).unwrap_or(false)
  }
}
