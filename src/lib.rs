#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Async, `no_std` driver core for Novatek NT36xxx in-cell touch controllers
//! on SPI.
//!
//! The crate covers everything between the SPI bus and an input subsystem:
//!
//! - Framed, paged register access with bounded retries
//! - Chip identification through the trim id table
//! - Firmware download and the boot handshake with its reset-state machine
//! - Point report decoding into per-slot touch transitions, wake gestures and
//!   proximity frames
//! - ESD supervision: inactivity timer and corrupted-report watchdog
//! - Suspend/resume with gesture wake or deep sleep
//! - Raw, baseline and diff frame capture for diagnostics
//!
//! The driver never sleeps on its own clock. Callers pass the current time in
//! milliseconds to the operations that need it and invoke
//! [`Nt36xxx::handle_report`] from their interrupt task and
//! [`Nt36xxx::esd_tick`] from a periodic one.
//!
//! ```no_run
//! use embedded_hal_async::{delay::DelayNs, spi::SpiDevice};
//! use nt36xxx::{Config, NoPin, Nt36xxx};
//!
//! async fn example<SPI, E, D>(spi: SPI, delay: D) -> Result<(), nt36xxx::Error<E>>
//! where
//!   SPI: SpiDevice<u8, Error = E>,
//!   D: DelayNs,
//! {
//!   let mut touch = Nt36xxx::new(spi, None::<NoPin>, None::<NoPin>, delay, Config::default());
//!   let identity = touch.initialize(0).await?;
//!   let event = touch.handle_report(16).await?;
//!   Ok(())
//! }
//! ```

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

mod bus;
mod chip;
mod config;
mod control;
mod diag;
mod esd;
mod event;
mod firmware;
mod init;
mod reg;
mod rw;
mod shared;
#[cfg(test)]
mod sim;

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

pub use bus::{Bus, TRANSFER_MAX};
pub use chip::*;
pub use config::*;
pub use control::*;
pub use diag::*;
pub use esd::*;
pub use event::*;
pub use firmware::*;
pub use init::ResetState;
pub use rw::{page_frame, page_offset};
pub use shared::SharedNt36xxx;

/// Errors that can occur while interacting with the controller.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
  /// SPI transfer failed on every allowed attempt.
  Spi(E),
  /// A transfer or caller buffer exceeds what the operation can hold.
  BufferOverflow,
  /// The controller is powered off; no transfer was attempted.
  Suspended,
  /// The trim id matched no known chip.
  ChipNotRecognized,
  /// The reset-state byte never reached `expected`; `last` is the final code read.
  ResetTimeout { expected: ResetState, last: u8 },
  /// The firmware info block failed validation.
  FirmwareInfo,
  /// The firmware did not complete a status or auto-copy handshake.
  HandshakeTimeout,
  /// The operation needs a successful [`Nt36xxx::identify`] first.
  NotIdentified,
  /// Driving the reset or power line failed.
  Pin,
}

/// Placeholder for an absent reset or power line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPin;

impl ErrorType for NoPin {
  type Error = Infallible;
}

impl OutputPin for NoPin {
  fn set_low(&mut self) -> Result<(), Infallible> {
    Ok(())
  }

  fn set_high(&mut self) -> Result<(), Infallible> {
    Ok(())
  }
}

/// NT36xxx controller on an SPI device.
///
/// `RST` is the optional reset line and `PWR` the optional enable for the
/// panel bias rails; pass `None::<NoPin>` for lines that are not wired.
/// Create with [`Nt36xxx::new`] and bring up with [`Nt36xxx::initialize`].
pub struct Nt36xxx<SPI, RST, PWR, D> {
  bus: Bus<SPI>,
  rst: Option<RST>,
  pwr: Option<PWR>,
  delay: D,
  config: Config,
  identity: Option<DeviceIdentity>,
  reset_state: ResetState,
  decoder: Decoder,
  esd: EsdSupervisor,
  features: Features,
  fw_info: Option<FwInfo>,
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Create a driver. Nothing is sent until [`Nt36xxx::initialize`].
  pub fn new(spi: SPI, rst: Option<RST>, pwr: Option<PWR>, delay: D, config: Config) -> Self {
    Self {
      bus: Bus::new(spi, config.bus_retries, config.bulk_retries),
      rst,
      pwr,
      delay,
      decoder: Decoder::new(&config, ContactLayout::default()),
      esd: EsdSupervisor::new(config.esd_period_ms),
      features: config.features,
      config,
      identity: None,
      reset_state: ResetState::Init,
      fw_info: None,
    }
  }

  /// Power up, identify the chip, boot its firmware and arm the supervisor.
  ///
  /// An unrecognised chip or a firmware that never boots is fatal. A bad
  /// firmware info block only costs the cached [`FwInfo`].
  pub async fn initialize(&mut self, now_ms: u64) -> Result<DeviceIdentity, Error<E>> {
    self.set_rails(true)?;
    self.bus.set_power(PowerStatus::On);
    if self.rst.is_some() {
      self.set_reset_line(true)?;
      self.delay.delay_ms(10).await;
    }

    self.eng_reset().await?;
    let identity = self.identify().await?;
    self.reload().await?;

    if self.read_fw_info().await.is_err() {
      warn!("continuing without firmware info");
    }
    self.restore_features().await?;
    self.esd.enable(now_ms);

    info!("{:?} ready", identity.variant);
    Ok(identity)
  }

  pub fn identity(&self) -> Option<DeviceIdentity> {
    self.identity
  }

  /// Highest reset state observed since the last reset.
  pub fn reset_state(&self) -> ResetState {
    self.reset_state
  }

  /// Report decoder with the per-slot touch state and counters.
  pub fn decoder(&self) -> &Decoder {
    &self.decoder
  }

  /// Configuration the driver was created with.
  pub fn config(&self) -> &Config {
    &self.config
  }

  pub(crate) fn memory_map(&self) -> Result<&'static MemoryMap, Error<E>> {
    self.identity.map(|id| id.memory_map()).ok_or(Error::NotIdentified)
  }

  pub(crate) fn hw_info(&self) -> Result<HwInfo, Error<E>> {
    self.identity.map(|id| id.hw_info()).ok_or(Error::NotIdentified)
  }

  pub(crate) fn set_reset_line(&mut self, high: bool) -> Result<(), Error<E>> {
    let Some(rst) = self.rst.as_mut() else {
      return Ok(());
    };
    let result = if high { rst.set_high() } else { rst.set_low() };
    result.map_err(|_| Error::Pin)
  }

  pub(crate) fn set_rails(&mut self, on: bool) -> Result<(), Error<E>> {
    let Some(pwr) = self.pwr.as_mut() else {
      return Ok(());
    };
    let result = if on { pwr.set_high() } else { pwr.set_low() };
    result.map_err(|_| Error::Pin)
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;

  use super::*;
  use crate::sim::{self, Sim};

  #[test]
  fn initialize_brings_controller_up() {
    let sim = Sim::new();
    let mut dev = sim::device(&sim);
    let identity = block_on(dev.initialize(7)).unwrap();

    assert_eq!(identity.variant, DeviceVariant::Nt36523);
    assert_eq!(dev.power_status(), PowerStatus::On);
    assert_eq!(dev.reset_state(), ResetState::NormalRun);
    assert_eq!(dev.fw_info().map(|i| i.x_num), Some(4));
    assert!(dev.esd().is_enabled());
    assert_eq!(dev.esd().last_activity_ms(), 7);
    assert_eq!(sim.pwr_levels(), [true]);
  }

  #[test]
  fn unknown_chip_aborts_initialize() {
    let sim = Sim::new();
    sim.set_trim(0x3F004, [0x01; 6]);
    let mut dev = sim::device(&sim);
    assert!(matches!(block_on(dev.initialize(0)), Err(Error::ChipNotRecognized)));
    assert!(sim.writes_to(0x3F10D).is_empty());
  }

  #[test]
  fn operations_before_identify_fail_cleanly() {
    let sim = Sim::new();
    let mut dev = sim::device(&sim);
    dev.bus.set_power(PowerStatus::On);
    assert!(matches!(block_on(dev.load_firmware()), Err(Error::NotIdentified)));
    assert!(matches!(block_on(dev.handle_report(0)), Err(Error::NotIdentified)));
  }

  #[test]
  fn bad_fw_info_is_not_fatal() {
    let sim = Sim::new();
    sim.poke(0x2FE78, &[0x01, 0x01]);
    let mut dev = sim::device(&sim);
    assert!(block_on(dev.initialize(0)).is_ok());
    assert!(dev.fw_info().is_none());
  }
}
