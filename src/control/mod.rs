use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::cmd;
use crate::{Changes, Error, Nt36xxx, SuspendMode};

mod features;

pub use features::*;

const SUSPEND_SETTLE_MS: u32 = 50;

/// Power state of the controller as tracked by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerStatus {
  /// Deep sleep or rails down; the bus must stay silent.
  Off,
  /// Gesture scanning; transfers get a single attempt.
  LowPower,
  /// Normal operation.
  On,
  /// Leaving low power during resume.
  LowPowerExit,
}

impl PowerStatus {
  pub const fn as_str(self) -> &'static str {
    match self {
      PowerStatus::Off => "off",
      PowerStatus::LowPower => "low power",
      PowerStatus::On => "on",
      PowerStatus::LowPowerExit => "low power exit",
    }
  }
}

impl fmt::Display for PowerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  pub fn power_status(&self) -> PowerStatus {
    self.bus.power()
  }

  /// Put the controller to sleep according to [`crate::Config::suspend_mode`].
  ///
  /// Does nothing, and touches no bus, unless the controller is on. Every
  /// pressed slot is released and the releases are returned so the caller
  /// can forward them. A failed sleep command is logged; the host still
  /// treats the controller as asleep since resume reloads the firmware.
  pub async fn suspend(&mut self, now_ms: u64) -> Result<Changes, Error<E>> {
    if self.bus.power() != PowerStatus::On {
      debug!("suspend ignored in {:?}", self.bus.power());
      return Ok(Changes::none());
    }
    self.memory_map()?;
    self.esd.disable(now_ms);

    match self.config.suspend_mode {
      SuspendMode::Gesture => {
        if self.host_command(cmd::GESTURE_MODE).await.is_err() {
          error!("gesture mode command failed");
        }
        self.decoder.set_gesture_mode(true);
        self.bus.set_power(PowerStatus::LowPower);
        info!("suspended, wake gestures enabled");
      }
      SuspendMode::DeepSleep { power_off_rails } => {
        if self.host_command(cmd::DEEP_SLEEP).await.is_err() {
          error!("deep sleep command failed");
        }
        self.bus.set_power(PowerStatus::Off);
        if power_off_rails {
          self.set_rails(false)?;
        }
        info!("suspended, deep sleep");
      }
    }

    let released = self.decoder.release_all();
    self.delay.delay_ms(SUSPEND_SETTLE_MS).await;
    Ok(released)
  }

  /// Wake the controller: restore rails, reload firmware, restore features
  /// and re-arm the supervisor.
  ///
  /// A failed reload is logged and the controller is still reported as on;
  /// the supervisor retries recovery later.
  pub async fn resume(&mut self, now_ms: u64) -> Result<(), Error<E>> {
    let from = self.bus.power();
    if from == PowerStatus::On {
      debug!("resume ignored, already on");
      return Ok(());
    }
    self.memory_map()?;

    if from != PowerStatus::LowPower {
      self.set_rails(true)?;
    }
    self.bus.set_power(PowerStatus::LowPowerExit);
    if self.rst.is_some() {
      self.set_reset_line(true)?;
    }

    if self.reload().await.is_err() {
      error!("firmware reload failed on resume");
    }
    if self.restore_features().await.is_err() {
      warn!("feature restore failed on resume");
    }

    self.decoder.set_gesture_mode(false);
    self.bus.set_power(PowerStatus::On);
    self.esd.enable(now_ms);
    info!("resumed from {:?}", from);
    Ok(())
  }

  /// Put the controller in deep sleep, drop the rails and hold it in reset.
  /// Safe to call repeatedly.
  pub async fn shutdown(&mut self, now_ms: u64) -> Result<Changes, Error<E>> {
    self.esd.disable(now_ms);
    let released = self.decoder.release_all();
    if self.bus.power() == PowerStatus::Off {
      return Ok(released);
    }

    if self.identity.is_some() && self.host_command(cmd::DEEP_SLEEP).await.is_err() {
      warn!("deep sleep command failed during shutdown");
    }
    self.bus.set_power(PowerStatus::Off);
    self.set_rails(false)?;
    if self.rst.is_some() {
      self.set_reset_line(false)?;
    }
    info!("shut down");
    Ok(released)
  }
}
