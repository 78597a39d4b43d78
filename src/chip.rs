use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::cmd;
use crate::{Error, Nt36xxx, ResetState};

/// Chip specific register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryMap {
  pub event_buf: u32,
  pub raw_pipe0: u32,
  pub raw_pipe1: u32,
  pub baseline: u32,
  pub diff_pipe0: u32,
  pub diff_pipe1: u32,
  pub boot_rdy: u32,
  pub por_cd: u32,
  pub bld_crc_en: u32,
  pub tx_auto_copy_en: u32,
  pub spi_dma_tx_info: u32,
}

const NT36523_MAP: MemoryMap = MemoryMap {
  event_buf: 0x2FE00,
  raw_pipe0: 0x30FA0,
  raw_pipe1: 0x30FA0,
  baseline: 0x36510,
  diff_pipe0: 0x373E8,
  diff_pipe1: 0x38068,
  boot_rdy: 0x3F10D,
  por_cd: 0x3F10E,
  bld_crc_en: 0x3F30E,
  tx_auto_copy_en: 0x3F7E8,
  spi_dma_tx_info: 0x3F7F1,
};

const NT36526_MAP: MemoryMap = MemoryMap {
  event_buf: 0x22D00,
  raw_pipe0: 0x24000,
  raw_pipe1: 0x24000,
  baseline: 0x21758,
  diff_pipe0: 0x20AB0,
  diff_pipe1: 0x24AB0,
  boot_rdy: 0x3F10D,
  por_cd: 0x3F10E,
  bld_crc_en: 0x3F30E,
  tx_auto_copy_en: 0x3DFE0,
  spi_dma_tx_info: 0x3DFE1,
};

const NT36675_MAP: MemoryMap = MemoryMap {
  event_buf: 0x22D00,
  raw_pipe0: 0x24000,
  raw_pipe1: 0x24000,
  baseline: 0x21B90,
  diff_pipe0: 0x20C60,
  diff_pipe1: 0x24C60,
  boot_rdy: 0x3F10D,
  por_cd: 0x3F10E,
  bld_crc_en: 0x3F30E,
  tx_auto_copy_en: 0x3DFE0,
  spi_dma_tx_info: 0x3DFE1,
};

const NT36672A_MAP: MemoryMap = MemoryMap {
  event_buf: 0x21C00,
  raw_pipe0: 0x20000,
  raw_pipe1: 0x23000,
  baseline: 0x20BFC,
  diff_pipe0: 0x206DC,
  diff_pipe1: 0x236DC,
  boot_rdy: 0x3F10D,
  por_cd: 0x3F10E,
  bld_crc_en: 0x3F30E,
  tx_auto_copy_en: 0,
  spi_dma_tx_info: 0,
};

const NT36672C_MAP: MemoryMap = MemoryMap {
  event_buf: 0x22D00,
  raw_pipe0: 0x24000,
  raw_pipe1: 0x24000,
  baseline: 0x21758,
  diff_pipe0: 0x20AB0,
  diff_pipe1: 0x24AB0,
  boot_rdy: 0x3F10D,
  por_cd: 0x3F10E,
  bld_crc_en: 0x3F30E,
  tx_auto_copy_en: 0x3DFE0,
  spi_dma_tx_info: 0x3DFE1,
};

const NT36772_MAP: MemoryMap = MemoryMap {
  event_buf: 0x11E00,
  raw_pipe0: 0x10000,
  raw_pipe1: 0x12000,
  baseline: 0x10E70,
  diff_pipe0: 0x10830,
  diff_pipe1: 0x12830,
  boot_rdy: 0x1F141,
  por_cd: 0x1F61C,
  bld_crc_en: 0,
  tx_auto_copy_en: 0,
  spi_dma_tx_info: 0,
};

/// How the bootloader verifies a downloaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcSupport {
  None,
  Bootloader,
  BootloaderDma,
}

/// Register the chip clears once an SPI download has been copied into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutoCopy {
  None,
  SpiDmaTxInfo,
  TxAutoCopyEn,
}

/// Bit layout of a contact record's status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContactLayout {
  pub status_mask: u8,
  /// Report bytes 63/64 carry the high pressure byte of the first two contacts.
  pub pressure_ext: bool,
}

impl ContactLayout {
  pub const THREE_BIT: Self = Self { status_mask: 0x07, pressure_ext: true };
  pub const TWO_BIT: Self = Self { status_mask: 0x03, pressure_ext: false };
}

impl Default for ContactLayout {
  fn default() -> Self {
    Self::THREE_BIT
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwInfo {
  pub crc: CrcSupport,
  pub auto_copy: AutoCopy,
  pub layout: ContactLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceVariant {
  Nt36523,
  Nt36526,
  Nt36672a,
  Nt36672c,
  Nt36675,
  Nt36772,
}

impl DeviceVariant {
  pub const fn memory_map(self) -> &'static MemoryMap {
    match self {
      Self::Nt36523 => &NT36523_MAP,
      Self::Nt36526 => &NT36526_MAP,
      Self::Nt36672a => &NT36672A_MAP,
      Self::Nt36672c => &NT36672C_MAP,
      Self::Nt36675 => &NT36675_MAP,
      Self::Nt36772 => &NT36772_MAP,
    }
  }

  pub const fn hw_info(self) -> HwInfo {
    match self {
      Self::Nt36523 => HwInfo {
        crc: CrcSupport::BootloaderDma,
        auto_copy: AutoCopy::SpiDmaTxInfo,
        layout: ContactLayout::THREE_BIT,
      },
      Self::Nt36526 | Self::Nt36672c | Self::Nt36675 => HwInfo {
        crc: CrcSupport::BootloaderDma,
        auto_copy: AutoCopy::TxAutoCopyEn,
        layout: ContactLayout::THREE_BIT,
      },
      Self::Nt36672a => HwInfo {
        crc: CrcSupport::Bootloader,
        auto_copy: AutoCopy::None,
        layout: ContactLayout::THREE_BIT,
      },
      Self::Nt36772 => HwInfo {
        crc: CrcSupport::None,
        auto_copy: AutoCopy::None,
        layout: ContactLayout::TWO_BIT,
      },
    }
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Nt36523 => "NT36523",
      Self::Nt36526 => "NT36526",
      Self::Nt36672a => "NT36672A",
      Self::Nt36672c => "NT36672C",
      Self::Nt36675 => "NT36675",
      Self::Nt36772 => "NT36772",
    }
  }
}

impl fmt::Display for DeviceVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One row of the trim-id lookup table. Bytes whose mask entry is zero are
/// not compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimEntry {
  pub id: [u8; 6],
  pub mask: [u8; 6],
  pub variant: DeviceVariant,
}

impl TrimEntry {
  pub const fn new(id: [u8; 6], mask: [u8; 6], variant: DeviceVariant) -> Self {
    Self { id, mask, variant }
  }

  pub fn matches(&self, trim: &[u8; 6]) -> bool {
    self
      .id
      .iter()
      .zip(self.mask.iter())
      .zip(trim.iter())
      .all(|((id, mask), got)| *mask == 0 || id == got)
  }
}

const M_CHIP: [u8; 6] = [1, 0, 0, 1, 1, 1];
const M_FAMILY: [u8; 6] = [1, 1, 0, 1, 1, 1];
const M_TAIL: [u8; 6] = [0, 0, 0, 1, 1, 1];

/// Known trim ids. Lookup is ordered: the first matching row wins.
pub static TRIM_TABLE: &[TrimEntry] = &[
  TrimEntry::new([0x17, 0xFF, 0xFF, 0x23, 0x65, 0x03], M_CHIP, DeviceVariant::Nt36523),
  TrimEntry::new([0x0B, 0xFF, 0xFF, 0x82, 0x66, 0x03], M_CHIP, DeviceVariant::Nt36523),
  TrimEntry::new([0x0B, 0xFF, 0xFF, 0x25, 0x65, 0x03], M_CHIP, DeviceVariant::Nt36526),
  TrimEntry::new([0x0C, 0xFF, 0xFF, 0x72, 0x66, 0x03], M_CHIP, DeviceVariant::Nt36672c),
  TrimEntry::new([0x20, 0xFF, 0xFF, 0x72, 0x65, 0x03], M_CHIP, DeviceVariant::Nt36675),
  TrimEntry::new([0x00, 0x00, 0x00, 0x75, 0x66, 0x03], M_TAIL, DeviceVariant::Nt36675),
  TrimEntry::new([0x0A, 0xFF, 0xFF, 0x72, 0x66, 0x03], M_CHIP, DeviceVariant::Nt36672a),
  TrimEntry::new([0x0D, 0xFF, 0xFF, 0x72, 0x68, 0x03], M_CHIP, DeviceVariant::Nt36672a),
  TrimEntry::new([0x55, 0x00, 0xFF, 0x00, 0x00, 0x00], M_FAMILY, DeviceVariant::Nt36772),
  TrimEntry::new([0x55, 0x72, 0xFF, 0x00, 0x00, 0x00], M_FAMILY, DeviceVariant::Nt36772),
  TrimEntry::new([0xAA, 0x00, 0xFF, 0x00, 0x00, 0x00], M_FAMILY, DeviceVariant::Nt36772),
];

/// First entry of `table` that matches `trim`.
pub fn match_trim<'a>(table: &'a [TrimEntry], trim: &[u8; 6]) -> Option<&'a TrimEntry> {
  table.iter().find(|entry| entry.matches(trim))
}

/// Where the trim id and software reset register sit. Older silicon keeps
/// both in the lower half of the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrimLocation {
  Current,
  Legacy,
}

impl TrimLocation {
  pub const fn trim_addr(self) -> u32 {
    match self {
      Self::Current => 0x3F004,
      Self::Legacy => 0x1F64E,
    }
  }

  pub const fn swrst_addr(self) -> u32 {
    match self {
      Self::Current => 0x3F0FE,
      Self::Legacy => 0x1F0FE,
    }
  }
}

/// Result of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
  pub trim: [u8; 6],
  pub variant: DeviceVariant,
  pub location: TrimLocation,
}

impl DeviceIdentity {
  pub const fn memory_map(&self) -> &'static MemoryMap {
    self.variant.memory_map()
  }

  pub const fn hw_info(&self) -> HwInfo {
    self.variant.hw_info()
  }

  pub const fn swrst_addr(&self) -> u32 {
    self.location.swrst_addr()
  }
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Read the trim id and resolve it against [`TRIM_TABLE`].
  ///
  /// Each location gets up to `config.identify.attempts` attempts, each a
  /// bootloader reset followed by a trim read. A transfer failure counts as a
  /// failed attempt.
  pub async fn identify(&mut self) -> Result<DeviceIdentity, Error<E>> {
    for location in [TrimLocation::Current, TrimLocation::Legacy] {
      let policy = self.config.identify;
      for attempt in 0..policy.attempts {
        match self.bootloader_reset_at(location.swrst_addr()).await {
          Err(Error::Suspended) => return Err(Error::Suspended),
          Err(_) => warn!("bootloader reset at {:#x} failed", location.swrst_addr()),
          Ok(()) => {}
        }

        let addr = location.trim_addr();
        match self.read_trim(addr).await {
          Ok(trim) => {
            debug!("trim id {:?} at {:#x}", trim, addr);
            if let Some(entry) = match_trim(TRIM_TABLE, &trim) {
              let identity = DeviceIdentity { trim, variant: entry.variant, location };
              info!("found {:?} at {:?} location", identity.variant, location);
              self.attach(identity);
              return Ok(identity);
            }
          }
          Err(Error::Suspended) => return Err(Error::Suspended),
          Err(_) => warn!("trim read failed, attempt {}", attempt + 1),
        }
        self.delay.delay_ms(policy.interval_ms).await;
      }
    }

    error!("trim id not recognized");
    Err(Error::ChipNotRecognized)
  }

  async fn read_trim(&mut self, addr: u32) -> Result<[u8; 6], Error<E>> {
    let mut trim = [0u8; 6];
    self.bus.write_at(addr, &trim).await?;
    self.bus.read_at(addr, &mut trim).await?;
    Ok(trim)
  }

  pub(crate) fn attach(&mut self, identity: DeviceIdentity) {
    self.identity = Some(identity);
    self.decoder.set_layout(identity.hw_info().layout);
  }

  /// Stop the MCU without restarting the bootloader. The firmware stays
  /// halted until the next bootloader or hardware reset.
  pub async fn idle(&mut self) -> Result<(), Error<E>> {
    let swrst = self.identity.ok_or(Error::NotIdentified)?.swrst_addr();
    self.bus.write_addr(swrst, cmd::SW_IDLE).await?;
    self.delay.delay_ms(15).await;
    Ok(())
  }

  pub(crate) async fn bootloader_reset_at(&mut self, swrst: u32) -> Result<(), Error<E>> {
    self.bus.write_addr(swrst, cmd::BOOTLOADER_RESET).await?;
    self.reset_state = ResetState::Init;
    self.delay.delay_ms(5).await;
    Ok(())
  }
}
