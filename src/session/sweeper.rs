// Copyright 2026 The Streamtap Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SessionRegistry;

/// Background task calling [`SessionRegistry::sweep`] on a fixed interval.
///
/// Holds only a weak reference: dropping the last registry handle ends the
/// task at its next tick.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(registry: Weak<SessionRegistry>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.sweep();
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!("session sweeper task ended abnormally: {e}");
        }
    }
}
