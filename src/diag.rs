use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::{cmd, EventMap};
use crate::{Error, Nt36xxx, PowerStatus};

const FW_INFO_LEN: usize = 38;
const FW_INFO_ATTEMPTS: u8 = 3;
const MODE_SETTLE_MS: u32 = 20;
const CELLS_PER_READ: usize = 127;

/// Firmware build and panel geometry reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FwInfo {
  pub version: u8,
  /// Sensing channels along x and y; a frame has `x_num * y_num` cells.
  pub x_num: u8,
  pub y_num: u8,
  pub abs_x_max: u16,
  pub abs_y_max: u16,
  pub max_buttons: u8,
  pub project_id: u16,
}

impl FwInfo {
  /// Parse the block at `EVENT_BUF + 0x78`. `None` when the version byte and
  /// its complement disagree.
  pub fn parse(raw: &[u8; FW_INFO_LEN]) -> Option<Self> {
    if raw[0].wrapping_add(raw[1]) != 0xFF {
      return None;
    }
    Some(Self {
      version: raw[0],
      x_num: raw[2],
      y_num: raw[3],
      abs_x_max: u16::from_be_bytes([raw[4], raw[5]]),
      abs_y_max: u16::from_be_bytes([raw[6], raw[7]]),
      max_buttons: raw[10],
      project_id: 0,
    })
  }

  pub const fn cells(&self) -> usize {
    self.x_num as usize * self.y_num as usize
  }
}

impl fmt::Display for FwInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "fw v{} pid {:04x} {}x{} ch, {}x{} abs, {} keys",
      self.version, self.project_id, self.x_num, self.y_num, self.abs_x_max, self.abs_y_max, self.max_buttons
    )
  }
}

/// Sensor frame selectable through [`Nt36xxx::read_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
  Raw,
  Baseline,
  Diff,
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Read and cache the firmware info block and project id.
  pub async fn read_fw_info(&mut self) -> Result<FwInfo, Error<E>> {
    let event_buf = self.memory_map()?.event_buf;

    let mut info = None;
    for attempt in 0..FW_INFO_ATTEMPTS {
      let mut raw = [0u8; FW_INFO_LEN];
      self.bus.read_at(event_buf | u32::from(EventMap::FwInfo), &mut raw).await?;
      info = FwInfo::parse(&raw);
      if info.is_some() {
        break;
      }
      warn!("firmware info invalid, attempt {}", attempt + 1);
    }
    let Some(mut info) = info else {
      error!("firmware info never validated");
      return Err(Error::FirmwareInfo);
    };

    let mut pid = [0u8; 2];
    self.bus.read_at(event_buf | u32::from(EventMap::ProjectId), &mut pid).await?;
    info.project_id = u16::from_le_bytes(pid);

    info!("fw version {:#x}, project {:#x}", info.version, info.project_id);
    self.fw_info = Some(info);
    Ok(info)
  }

  pub fn fw_info(&self) -> Option<FwInfo> {
    self.fw_info
  }

  /// Capture one frame of per-cell sensor data into `out`, row major.
  ///
  /// The controller is switched to test mode for the capture and returned
  /// to normal mode afterwards; the supervisor is paused meanwhile. Returns
  /// the number of cells written.
  pub async fn read_frame(&mut self, kind: FrameKind, out: &mut [i16], now_ms: u64) -> Result<usize, Error<E>> {
    if self.bus.power() != PowerStatus::On {
      return Err(Error::Suspended);
    }
    let info = match self.fw_info {
      Some(info) => info,
      None => self.read_fw_info().await?,
    };
    let cells = info.cells();
    if out.len() < cells {
      return Err(Error::BufferOverflow);
    }

    let supervised = self.esd.is_enabled();
    self.esd.disable(now_ms);

    let captured = self.capture(kind, &mut out[..cells]).await;
    let restored = self.enter_normal_mode().await;

    if supervised {
      self.esd.enable(now_ms);
    }
    captured.and(restored).map(|_| cells)
  }

  async fn capture(&mut self, kind: FrameKind, out: &mut [i16]) -> Result<(), Error<E>> {
    self.clear_fw_status().await?;
    self.host_command(cmd::TEST_MODE_2).await?;
    self.check_fw_status().await?;

    let map = self.memory_map()?;
    let pipe = self.fw_pipe().await?;
    let base = match (kind, pipe) {
      (FrameKind::Raw, 0) => map.raw_pipe0,
      (FrameKind::Raw, _) => map.raw_pipe1,
      (FrameKind::Baseline, _) => map.baseline,
      (FrameKind::Diff, 0) => map.diff_pipe0,
      (FrameKind::Diff, _) => map.diff_pipe1,
    };
    debug!("capturing {:?} frame from {:#x}", kind, base);

    let mut bytes = [0u8; CELLS_PER_READ * 2];
    for (i, cells) in out.chunks_mut(CELLS_PER_READ).enumerate() {
      let chunk = &mut bytes[..cells.len() * 2];
      self.bus.read_region(base + (i * CELLS_PER_READ * 2) as u32, chunk).await?;
      for (cell, pair) in cells.iter_mut().zip(chunk.chunks_exact(2)) {
        *cell = i16::from_le_bytes([pair[0], pair[1]]);
      }
    }
    Ok(())
  }

  async fn enter_normal_mode(&mut self) -> Result<(), Error<E>> {
    self.host_command(cmd::NORMAL_MODE).await?;
    self.delay.delay_ms(MODE_SETTLE_MS).await;
    self.bus.write(&[EventMap::HandshakeOrSubCmd.into(), cmd::HOST_READY]).await?;
    self.delay.delay_ms(MODE_SETTLE_MS).await;
    Ok(())
  }
}
