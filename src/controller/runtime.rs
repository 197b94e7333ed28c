use super::LoadBalancerController;
use crate::error::Result;
use tokio::time::{Instant, MissedTickBehavior, interval};

impl LoadBalancerController {
    /// Run ticks on the configured interval until shut down.
    ///
    /// Ticks run one at a time on this task; a tick that overruns the interval
    /// causes the missed ticks to be skipped rather than queued. A shutdown
    /// request is only observed between ticks, so the last acknowledged
    /// command stays authoritative.
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting load balancer main loop");

        let period = self.config.tick_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    if let Err(e) = self.tick().await {
                        self.logger.error(&format!("Tick failed: {}", e));
                    }
                    if started.elapsed() > period {
                        self.overrun_count = self.overrun_count.saturating_add(1);
                        self.logger.warn(&format!(
                            "Tick took {} ms, longer than the {} ms interval",
                            started.elapsed().as_millis(),
                            period.as_millis()
                        ));
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.publish_snapshot();
        self.logger.info(&format!(
            "Load balancer stopped after {} ticks ({} commands, {} failures)",
            self.total_ticks, self.commands_sent, self.command_failures
        ));
        Ok(())
    }
}
