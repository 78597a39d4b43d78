//! Electrostatic-discharge supervision.
//!
//! Two independent signals feed recovery: a timer that fires when the
//! controller has gone quiet for too long after it asked for a handshake, and
//! a counter of consecutive reports that look like corrupted memory.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::cmd;
use crate::{Error, Nt36xxx, PowerStatus};

/// Byte the firmware fills the contact area with when it wants the host to
/// start supervising.
pub const HANDSHAKE_MARKER: u8 = 0x77;
/// Fill bytes seen when the controller's memory has been upset.
pub const CORRUPTION_MARKERS: [u8; 2] = [0xFD, 0xFE];

/// Why a report triggered supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Upset {
  /// Firmware handshake request; the supervisor has been armed.
  Handshake,
  /// Too many corrupted reports in a row; a recovery was run.
  Watchdog,
}

/// `true` when all of the first six report bytes carry the handshake marker.
pub fn is_handshake_pattern(report: &[u8]) -> bool {
  report
    .get(1..=6)
    .is_some_and(|b| b.iter().all(|v| *v == HANDSHAKE_MARKER))
}

/// `true` when all of the first six report bytes are corruption fill.
pub fn is_corruption_pattern(report: &[u8]) -> bool {
  report
    .get(1..=6)
    .is_some_and(|b| b.iter().all(|v| CORRUPTION_MARKERS.contains(v)))
}

/// Counts consecutive corrupted reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchdogDetector {
  count: u8,
  threshold: u8,
}

impl WatchdogDetector {
  pub const fn new(threshold: u8) -> Self {
    Self { count: 0, threshold }
  }

  /// Feed one report. Returns `true` on the report that reaches the threshold;
  /// the counter then starts over.
  pub fn observe(&mut self, report: &[u8]) -> bool {
    if !is_corruption_pattern(report) {
      self.count = 0;
      return false;
    }
    self.count = self.count.saturating_add(1);
    if self.count >= self.threshold {
      self.count = 0;
      return true;
    }
    false
  }

  pub fn count(&self) -> u8 {
    self.count
  }
}

/// Inactivity timer driving periodic recovery.
///
/// Pure bookkeeping: callers pass the current time in milliseconds and act on
/// [`EsdSupervisor::due`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EsdSupervisor {
  period_ms: u32,
  last_activity_ms: u64,
  enabled: bool,
  retries: u32,
}

impl EsdSupervisor {
  pub const fn new(period_ms: u32) -> Self {
    Self { period_ms, last_activity_ms: 0, enabled: false, retries: 0 }
  }

  /// Arm the supervisor and start a fresh recovery count.
  pub fn enable(&mut self, now_ms: u64) {
    self.last_activity_ms = now_ms;
    self.retries = 0;
    self.enabled = true;
  }

  pub fn disable(&mut self, now_ms: u64) {
    self.last_activity_ms = now_ms;
    self.enabled = false;
  }

  pub fn record_activity(&mut self, now_ms: u64) {
    self.last_activity_ms = now_ms;
  }

  /// Whether the inactivity period has been exceeded.
  pub fn due(&self, now_ms: u64) -> bool {
    self.enabled && now_ms.saturating_sub(self.last_activity_ms) > u64::from(self.period_ms)
  }

  /// Bookkeeping after a recovery: restart the timer and count the retry.
  pub fn recovered(&mut self, now_ms: u64) {
    self.last_activity_ms = now_ms;
    self.retries = self.retries.saturating_add(1);
    self.enabled = true;
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn retries(&self) -> u32 {
    self.retries
  }

  pub fn last_activity_ms(&self) -> u64 {
    self.last_activity_ms
  }
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Periodic supervisor hook. Runs a recovery when the controller has been
  /// silent for longer than the configured period and returns whether one
  /// was attempted. Recovery failures are logged, not returned.
  pub async fn esd_tick(&mut self, now_ms: u64) -> bool {
    if !self.esd.due(now_ms) {
      return false;
    }
    warn!("no activity for {} ms, recovering", now_ms.saturating_sub(self.esd.last_activity_ms()));
    if self.recover(now_ms).await.is_err() {
      error!("esd recovery failed");
    }
    true
  }

  /// Reload firmware and restore the host-visible state.
  ///
  /// The supervisor is paused for the duration and re-armed afterwards with
  /// the retry counter incremented, whether or not the reload succeeded.
  pub(crate) async fn recover(&mut self, now_ms: u64) -> Result<(), Error<E>> {
    self.esd.disable(now_ms);
    let result = self.restart().await;
    self.esd.recovered(now_ms);
    info!("recovery #{} done", self.esd.retries());
    result
  }

  async fn restart(&mut self) -> Result<(), Error<E>> {
    self.reload().await?;
    self.restore_features().await?;
    if self.bus.power() == PowerStatus::LowPower {
      self.host_command(cmd::GESTURE_MODE).await?;
    }
    Ok(())
  }

  pub fn esd(&self) -> &EsdSupervisor {
    &self.esd
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;

  use super::*;
  use crate::sim::{self, Sim};

  fn report_with(prefix: [u8; 6]) -> [u8; 66] {
    let mut r = [0u8; 66];
    r[1..7].copy_from_slice(&prefix);
    r
  }

  #[test]
  fn handshake_needs_marker_in_every_prefix_byte() {
    assert!(is_handshake_pattern(&report_with([0x77; 6])));
    assert!(!is_handshake_pattern(&report_with([0, 0, 0x77, 0, 0, 0])));
    assert!(!is_handshake_pattern(&report_with([0x77, 0x77, 0x77, 0x77, 0x77, 0x76])));
    assert!(!is_handshake_pattern(&report_with([0; 6])));
    let mut r = report_with([0; 6]);
    r[7] = 0x77;
    assert!(!is_handshake_pattern(&r));
  }

  #[test]
  fn watchdog_fires_on_threshold_and_restarts() {
    let mut wd = WatchdogDetector::new(10);
    let bad = report_with([0xFD, 0xFE, 0xFD, 0xFD, 0xFE, 0xFE]);
    for _ in 0..9 {
      assert!(!wd.observe(&bad));
    }
    assert!(wd.observe(&bad));
    assert_eq!(wd.count(), 0);
  }

  #[test]
  fn clean_report_resets_watchdog() {
    let mut wd = WatchdogDetector::new(3);
    let bad = report_with([0xFD; 6]);
    wd.observe(&bad);
    wd.observe(&bad);
    assert!(!wd.observe(&report_with([0xFD, 0xFD, 0xFD, 0xFD, 0xFD, 0x00])));
    assert_eq!(wd.count(), 0);
    assert!(!wd.observe(&bad));
  }

  #[test]
  fn supervisor_fires_once_per_period() {
    let mut esd = EsdSupervisor::new(1500);
    esd.enable(0);
    assert!(!esd.due(1500));
    assert!(esd.due(1600));
    esd.recovered(1600);
    assert!(!esd.due(1700));
    assert!(!esd.due(3100));
    assert!(esd.due(3101));
    assert_eq!(esd.retries(), 1);
  }

  #[test]
  fn enable_resets_retries_but_recovery_does_not() {
    let mut esd = EsdSupervisor::new(100);
    esd.enable(0);
    esd.recovered(200);
    esd.recovered(400);
    assert_eq!(esd.retries(), 2);
    esd.disable(500);
    assert!(!esd.due(10_000));
    assert_eq!(esd.retries(), 2);
    esd.enable(600);
    assert_eq!(esd.retries(), 0);
  }

  #[test]
  fn silent_controller_is_recovered_once() {
    let sim = Sim::new();
    let mut dev = sim::identified(&sim);
    dev.esd.enable(0);

    assert!(!block_on(dev.esd_tick(1000)));
    assert!(block_on(dev.esd_tick(1600)));
    assert_eq!(sim.writes_to(0x3F10D).len(), 1);
    assert_eq!(dev.esd().retries(), 1);
    assert_eq!(dev.esd().last_activity_ms(), 1600);

    assert!(!block_on(dev.esd_tick(1700)));
    assert_eq!(sim.writes_to(0x3F10D).len(), 1);
  }

  #[test]
  fn failed_recovery_is_swallowed() {
    let sim = Sim::new();
    sim.set_boot_code(0x00);
    let mut dev = sim::identified(&sim);
    dev.esd.enable(0);

    assert!(block_on(dev.esd_tick(5000)));
    assert!(dev.esd().is_enabled());
    assert_eq!(dev.esd().retries(), 1);
  }
}
