//! Register map and command bytes shared by every NT36xxx variant.
//!
//! Chip specific addresses live in [`crate::MemoryMap`]; everything here is
//! either an offset into the event buffer page or an absolute address that is
//! identical across the family.

/// Mask applied to the command byte of a read transfer.
pub(crate) const SPI_READ_MASK: u8 = 0x7F;
/// Bit set in the command byte of a write transfer.
pub(crate) const SPI_WRITE_MASK: u8 = 0x80;
/// Dummy bytes clocked after the command byte before read data is valid.
pub(crate) const DUMMY_BYTES: usize = 1;
/// Command byte addressing the page-select register.
pub(crate) const PAGE_SELECT: u8 = 0xFF;

/// Engineering-mode reset register.
pub(crate) const ENG_RST_ADDR: u32 = 0x7F_FF80;

/// Offsets inside the event buffer page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub(crate) enum EventMap {
  HostCmd = 0x50,
  HandshakeOrSubCmd = 0x51,
  FeatureState = 0x5C,
  ResetComplete = 0x60,
  FwInfo = 0x78,
  ProjectId = 0x9A,
}

impl From<EventMap> for u8 {
  fn from(value: EventMap) -> Self {
    value as u8
  }
}

impl From<EventMap> for u32 {
  fn from(value: EventMap) -> Self {
    value as u32
  }
}

/// Command bytes written to the host command slot or to reset registers.
pub(crate) mod cmd {
  pub const BOOTLOADER_RESET: u8 = 0x69;
  pub const SW_IDLE: u8 = 0xAA;
  pub const ENG_RESET: u8 = 0x5A;
  pub const FW_CRC_ENABLE: u8 = 0xAE;
  pub const GESTURE_MODE: u8 = 0x13;
  pub const DEEP_SLEEP: u8 = 0x11;
  pub const TEST_MODE_2: u8 = 0x22;
  pub const NORMAL_MODE: u8 = 0x00;
  pub const HOST_READY: u8 = 0xBB;
  pub const POR_CD: u8 = 0xA0;
}

/// Bit that enables the bootloader CRC check in `bld_crc_en`.
pub(crate) const BLD_CRC_EN_BIT: u8 = 0x80;

/// Upper bound of the reset-state code range.
pub(crate) const RESET_STATE_MAX: u8 = 0xAF;
