use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::bus::TRANSFER_MAX;
use crate::{AutoCopy, Error, Nt36xxx};

/// Largest payload written per transfer during a download.
pub const DOWNLOAD_CHUNK: usize = TRANSFER_MAX - 1;

const AUTO_COPY_POLLS: u16 = 200;

/// A contiguous block of firmware placed at `address` in controller RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSegment {
  pub address: u32,
  pub data: &'static [u8],
}

impl FirmwareSegment {
  pub const fn new(address: u32, data: &'static [u8]) -> Self {
    Self { address, data }
  }
}

/// Firmware handed to the driver by the platform, already split into the
/// segments the bootloader expects.
///
/// Parsing the vendor image format is left to the caller; the driver only
/// streams the segments in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareImage {
  pub segments: &'static [FirmwareSegment],
}

impl FirmwareImage {
  pub const fn new(segments: &'static [FirmwareSegment]) -> Self {
    Self { segments }
  }

  pub fn len(&self) -> usize {
    self.segments.iter().map(|s| s.data.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Stream the configured image into controller RAM.
  ///
  /// Without an image the controller boots from its own flash and this is a
  /// no-op.
  pub(crate) async fn download(&mut self) -> Result<(), Error<E>> {
    let Some(image) = self.config.firmware else {
      trace!("no firmware image, booting from flash");
      return Ok(());
    };

    debug!("downloading {} bytes in {} segments", image.len(), image.segments.len());
    for segment in image.segments {
      for (i, chunk) in segment.data.chunks(DOWNLOAD_CHUNK).enumerate() {
        let addr = segment.address + (i * DOWNLOAD_CHUNK) as u32;
        self.bus.write_at(addr, chunk).await?;
      }
    }

    self.wait_auto_copy().await
  }

  /// Wait for the chip to finish moving the downloaded image into place.
  async fn wait_auto_copy(&mut self) -> Result<(), Error<E>> {
    let map = self.memory_map()?;
    let addr = match self.hw_info()?.auto_copy {
      AutoCopy::None => return Ok(()),
      AutoCopy::SpiDmaTxInfo => map.spi_dma_tx_info,
      AutoCopy::TxAutoCopyEn => map.tx_auto_copy_en,
    };

    for _ in 0..AUTO_COPY_POLLS {
      if self.bus.read_addr(addr).await? == 0 {
        return Ok(());
      }
      self.delay.delay_ms(1).await;
    }

    error!("auto copy at {:#x} did not finish", addr);
    Err(Error::HandshakeTimeout)
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;

  use super::*;
  use crate::sim::{self, Sim};
  use crate::Config;

  static BLOB: [u8; 300] = [0x5A; 300];
  static SEGMENTS: [FirmwareSegment; 2] = [
    FirmwareSegment::new(0x0000, &BLOB),
    FirmwareSegment::new(0x1_0000, &[1, 2, 3, 4]),
  ];

  #[test]
  fn segments_are_written_in_chunks() {
    let sim = Sim::new();
    let config = Config::default().with_firmware(FirmwareImage::new(&SEGMENTS));
    let mut dev = sim::identified_with(&sim, config);

    block_on(dev.download()).unwrap();
    assert_eq!(sim.peek(0x0000), 0x5A);
    assert_eq!(sim.peek(299), 0x5A);
    assert_eq!(sim.peek(0x1_0003), 4);
    let first = sim.writes_to(0x0000);
    assert_eq!(first[0].len(), DOWNLOAD_CHUNK);
    assert_eq!(sim.writes_to(DOWNLOAD_CHUNK as u32)[0].len(), 300 - DOWNLOAD_CHUNK);
  }

  #[test]
  fn stuck_auto_copy_times_out() {
    let sim = Sim::new();
    sim.poke(0x3F7F1, &[0x01]);
    let config = Config::default().with_firmware(FirmwareImage::new(&SEGMENTS));
    let mut dev = sim::identified_with(&sim, config);

    assert!(matches!(block_on(dev.download()), Err(Error::HandshakeTimeout)));
    assert_eq!(sim.delayed_ms(), 200);
  }

  #[test]
  fn image_length_sums_segments() {
    let image = FirmwareImage::new(&SEGMENTS);
    assert_eq!(image.len(), 304);
    assert!(!image.is_empty());
  }
}
