//! Charger capability
//!
//! The engine drives any EV charger that can report and accept a current
//! limit. Vendor protocols live behind this trait; `ChargerLink` adds the
//! call timeouts and maps failures onto the engine's error taxonomy.

use crate::error::{FuseguardError, Result};
use crate::types::{CommandTarget, Phase};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

#[async_trait::async_trait]
pub trait Charger: Send + Sync {
    /// Stable identifier of the charger
    fn id(&self) -> &str;

    /// Limit currently configured on `phase`, in amperes
    async fn current_limit(&self, phase: Phase) -> Result<u32>;

    /// Highest limit the charger accepts
    async fn max_current_limit(&self) -> Result<u32>;

    /// Apply a new limit. Fire-and-confirm: success means the charger accepted
    /// the request, convergence is observed through `current_limit`.
    async fn set_current_limit(&self, target: CommandTarget, amps: u32) -> Result<()>;

    async fn car_connected(&self) -> Result<bool>;

    async fn can_charge(&self) -> Result<bool>;

    async fn is_charging(&self) -> Result<bool>;

    /// Whether all phases share a single limit
    fn has_synced_phase_limits(&self) -> bool;
}

/// Charger status as observed at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChargerStatus {
    pub car_connected: bool,
    pub can_charge: bool,
    pub is_charging: bool,
}

impl ChargerStatus {
    /// Whether adjusting the limit has any effect
    pub fn accepts_commands(&self) -> bool {
        self.car_connected && self.can_charge
    }
}

/// Timeout-guarded access to the bound charger
pub struct ChargerLink {
    charger: Box<dyn Charger>,
    io_timeout: Duration,
}

impl ChargerLink {
    pub fn new(charger: Box<dyn Charger>, io_timeout: Duration) -> Self {
        Self {
            charger,
            io_timeout,
        }
    }

    pub fn id(&self) -> &str {
        self.charger.id()
    }

    pub fn has_synced_phase_limits(&self) -> bool {
        self.charger.has_synced_phase_limits()
    }

    async fn query<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match timeout(self.io_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e @ FuseguardError::ChargerUnreachable { .. })) => Err(e),
            Ok(Err(e)) => Err(FuseguardError::charger_unreachable(format!(
                "{} failed: {}",
                what, e
            ))),
            Err(_) => Err(FuseguardError::charger_unreachable(format!(
                "{} timed out after {} ms",
                what,
                self.io_timeout.as_millis()
            ))),
        }
    }

    pub async fn status(&self) -> Result<ChargerStatus> {
        let car_connected = self
            .query("car_connected", self.charger.car_connected())
            .await?;
        let can_charge = self.query("can_charge", self.charger.can_charge()).await?;
        let is_charging = self
            .query("is_charging", self.charger.is_charging())
            .await?;
        Ok(ChargerStatus {
            car_connected,
            can_charge,
            is_charging,
        })
    }

    pub async fn current_limit(&self, phase: Phase) -> Result<u32> {
        self.query("current_limit", self.charger.current_limit(phase))
            .await
    }

    pub async fn max_current_limit(&self) -> Result<u32> {
        self.query("max_current_limit", self.charger.max_current_limit())
            .await
    }

    /// Send a limit; any failure is reported as `ChargerCommandFailed`
    pub async fn set_current_limit(&self, target: CommandTarget, amps: u32) -> Result<()> {
        match timeout(
            self.io_timeout,
            self.charger.set_current_limit(target, amps),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e @ FuseguardError::ChargerCommandFailed { .. })) => Err(e),
            Ok(Err(e)) => Err(FuseguardError::charger_command_failed(format!(
                "set {} to {} A: {}",
                target, amps, e
            ))),
            Err(_) => Err(FuseguardError::charger_command_failed(format!(
                "set {} to {} A: no acknowledgement within {} ms",
                target,
                amps,
                self.io_timeout.as_millis()
            ))),
        }
    }
}
