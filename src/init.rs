use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::{cmd, EventMap, BLD_CRC_EN_BIT, ENG_RST_ADDR, RESET_STATE_MAX};
use crate::{CrcSupport, Error, Nt36xxx};

/// Boot progress reported by the controller at `EVENT_BUF + 0x60`.
///
/// Ordering follows the boot sequence, so `state >= target` means "at least
/// this far".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetState {
  Init,
  BaselineReK,
  BaselineReady,
  NormalRun,
}

impl ResetState {
  /// Decode a reset-state byte. Every code from `0xA3` up to `0xAF` means the
  /// firmware is running.
  pub const fn from_code(code: u8) -> Option<Self> {
    match code {
      0xA0 => Some(Self::Init),
      0xA1 => Some(Self::BaselineReK),
      0xA2 => Some(Self::BaselineReady),
      0xA3..=RESET_STATE_MAX => Some(Self::NormalRun),
      _ => None,
    }
  }

  pub const fn code(self) -> u8 {
    match self {
      Self::Init => 0xA0,
      Self::BaselineReK => 0xA1,
      Self::BaselineReady => 0xA2,
      Self::NormalRun => 0xA3,
    }
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Init => "init",
      Self::BaselineReK => "baseline rek",
      Self::BaselineReady => "baseline ready",
      Self::NormalRun => "normal run",
    }
  }
}

impl fmt::Display for ResetState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum BootStep {
  EngineeringReset,
  HardwareReset,
  BootloaderReset,
  Download,
  CrcEnable,
  BootReady,
  AwaitInit,
}

const FW_STATUS_CLEAR_POLLS: u8 = 20;
const FW_STATUS_READY_POLLS: u8 = 50;
const FW_STATUS_POLL_MS: u32 = 10;

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Download (or re-run) the firmware and wait for the bootloader.
  ///
  /// The whole boot sequence is retried `config.download.attempts` times.
  pub async fn load_firmware(&mut self) -> Result<(), Error<E>> {
    let policy = self.config.download;
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
      match self.boot().await {
        Ok(()) => {
          debug!("firmware up after {} attempt(s)", attempt + 1);
          return Ok(());
        }
        Err(e @ (Error::Suspended | Error::NotIdentified)) => return Err(e),
        Err(e) => {
          attempt += 1;
          if attempt >= attempts {
            error!("firmware load failed after {} attempts", attempt);
            return Err(e);
          }
          warn!("firmware load failed, attempt {}", attempt);
          self.delay.delay_ms(policy.interval_ms).await;
        }
      }
    }
  }

  /// Load the firmware and wait until calibration has started.
  pub(crate) async fn reload(&mut self) -> Result<ResetState, Error<E>> {
    self.load_firmware().await?;
    self.wait_for_reset_state(ResetState::BaselineReK).await
  }

  async fn boot(&mut self) -> Result<(), Error<E>> {
    let identity = self.identity.ok_or(Error::NotIdentified)?;
    let crc = identity.hw_info().crc;
    let mut step = BootStep::EngineeringReset;

    loop {
      trace!("boot step {:?}", step);
      step = match step {
        BootStep::EngineeringReset => {
          self.eng_reset().await?;
          if self.config.hw_reset && self.rst.is_some() {
            BootStep::HardwareReset
          } else {
            BootStep::BootloaderReset
          }
        }

        BootStep::HardwareReset => {
          self.pulse_reset().await?;
          BootStep::BootloaderReset
        }

        BootStep::BootloaderReset => {
          self.bootloader_reset_at(identity.swrst_addr()).await?;
          BootStep::Download
        }

        BootStep::Download => {
          self.download().await?;
          match crc {
            CrcSupport::None => BootStep::BootReady,
            _ => BootStep::CrcEnable,
          }
        }

        BootStep::CrcEnable => {
          self.bld_crc_enable().await?;
          self.fw_crc_enable().await?;
          BootStep::BootReady
        }

        BootStep::BootReady => {
          self.boot_ready(crc).await?;
          BootStep::AwaitInit
        }

        BootStep::AwaitInit => {
          self.wait_for_reset_state(ResetState::Init).await?;
          return Ok(());
        }
      };
    }
  }

  /// Poll the reset-state byte until it reaches `target`.
  ///
  /// Waiting for [`ResetState::Init`] uses the short budget from
  /// [`crate::ResetPolicy`], later states the long one. A failed transfer
  /// counts as a failed poll. The highest state seen is kept in
  /// [`Nt36xxx::reset_state`] and never goes backwards until the next reset.
  pub async fn wait_for_reset_state(&mut self, target: ResetState) -> Result<ResetState, Error<E>> {
    let addr = self.memory_map()?.event_buf | u32::from(EventMap::ResetComplete);
    let policy = self.config.reset_poll;
    let attempts = match target {
      ResetState::Init => policy.init_attempts,
      _ => policy.later_attempts,
    }
    .max(1);

    let mut last = 0u8;
    for attempt in 0..attempts {
      let mut buf = [0u8; 5];
      match self.bus.read_at(addr, &mut buf).await {
        Ok(()) => {
          last = buf[0];
          if let Some(state) = ResetState::from_code(last) {
            if state > self.reset_state {
              self.reset_state = state;
            }
            if state >= target {
              debug!("reset state {:#x} reached", last);
              return Ok(state);
            }
          }
        }
        Err(Error::Spi(_)) => warn!("reset state poll failed, attempt {}", attempt + 1),
        Err(e) => return Err(e),
      }
      if attempt + 1 < attempts {
        self.delay.delay_ms(policy.interval_ms).await;
      }
    }

    error!("reset state {:#x} never reached {:#x}", last, target.code());
    Err(Error::ResetTimeout { expected: target, last })
  }

  pub(crate) async fn eng_reset(&mut self) -> Result<(), Error<E>> {
    self.bus.write_addr(ENG_RST_ADDR, cmd::ENG_RESET).await?;
    self.reset_state = ResetState::Init;
    self.delay.delay_ms(1).await;
    Ok(())
  }

  pub(crate) async fn pulse_reset(&mut self) -> Result<(), Error<E>> {
    if self.rst.is_none() {
      return Ok(());
    }
    self.set_reset_line(false)?;
    self.delay.delay_ms(1).await;
    self.set_reset_line(true)?;
    self.reset_state = ResetState::Init;
    self.delay.delay_ms(10).await;
    Ok(())
  }

  async fn bld_crc_enable(&mut self) -> Result<(), Error<E>> {
    let addr = self.memory_map()?.bld_crc_en;
    let value = self.bus.read_addr(addr).await?;
    self.bus.write_addr(addr, value | BLD_CRC_EN_BIT).await
  }

  async fn fw_crc_enable(&mut self) -> Result<(), Error<E>> {
    let event_buf = self.memory_map()?.event_buf;
    self.bus.set_page(event_buf).await?;
    self.bus.write(&[EventMap::ResetComplete.into(), 0x00]).await?;
    self.bus.write(&[EventMap::HostCmd.into(), cmd::FW_CRC_ENABLE]).await
  }

  async fn boot_ready(&mut self, crc: CrcSupport) -> Result<(), Error<E>> {
    let map = self.memory_map()?;
    self.bus.write_addr(map.boot_rdy, 1).await?;
    self.delay.delay_ms(5).await;

    if crc == CrcSupport::None {
      self.bus.write_addr(map.boot_rdy, 0).await?;
      self.bus.write_addr(map.por_cd, cmd::POR_CD).await?;
    }
    Ok(())
  }

  /// Write the host command slot in the event buffer page.
  pub(crate) async fn host_command(&mut self, command: u8) -> Result<(), Error<E>> {
    let event_buf = self.memory_map()?.event_buf;
    self.bus.set_page(event_buf).await?;
    self.bus.write(&[EventMap::HostCmd.into(), command]).await
  }

  /// Zero the firmware status byte and wait for the firmware to acknowledge.
  pub(crate) async fn clear_fw_status(&mut self) -> Result<(), Error<E>> {
    let event_buf = self.memory_map()?.event_buf;
    for _ in 0..FW_STATUS_CLEAR_POLLS {
      self.bus.set_page(event_buf).await?;
      self.bus.write(&[EventMap::HandshakeOrSubCmd.into(), 0x00]).await?;
      let mut buf = [EventMap::HandshakeOrSubCmd.into(), 0xFF];
      self.bus.read(&mut buf).await?;
      if buf[1] == 0x00 {
        return Ok(());
      }
      self.delay.delay_ms(FW_STATUS_POLL_MS).await;
    }
    error!("firmware status did not clear");
    Err(Error::HandshakeTimeout)
  }

  /// Wait for the firmware to report that the requested mode is active.
  pub(crate) async fn check_fw_status(&mut self) -> Result<(), Error<E>> {
    let event_buf = self.memory_map()?.event_buf;
    for _ in 0..FW_STATUS_READY_POLLS {
      self.bus.set_page(event_buf).await?;
      let mut buf = [EventMap::HandshakeOrSubCmd.into(), 0x00];
      self.bus.read(&mut buf).await?;
      if buf[1] & 0xF0 == 0xA0 {
        return Ok(());
      }
      self.delay.delay_ms(FW_STATUS_POLL_MS).await;
    }
    error!("firmware status never became ready");
    Err(Error::HandshakeTimeout)
  }

  /// Pipe (0 or 1) the firmware is currently filling with frame data.
  pub(crate) async fn fw_pipe(&mut self) -> Result<u8, Error<E>> {
    let event_buf = self.memory_map()?.event_buf;
    self.bus.set_page(event_buf).await?;
    let mut buf = [EventMap::HandshakeOrSubCmd.into(), 0x00];
    self.bus.read(&mut buf).await?;
    Ok(buf[1] & 0x01)
  }
}
