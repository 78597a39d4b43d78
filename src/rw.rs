use embedded_hal_async::spi::SpiDevice;

use crate::bus::{Bus, TRANSFER_MAX};
use crate::reg::PAGE_SELECT;
use crate::Error;

/// Low seven bits of a 24-bit address: the offset inside the selected page.
pub const fn page_offset(addr: u32) -> u8 {
  (addr & 0x7F) as u8
}

/// Page-select frame for `addr`. The page register takes bits 15..=22 and
/// 7..=14 of the address.
pub const fn page_frame(addr: u32) -> [u8; 3] {
  [PAGE_SELECT, ((addr >> 15) & 0xFF) as u8, ((addr >> 7) & 0xFF) as u8]
}

impl<SPI, E> Bus<SPI>
where
  SPI: SpiDevice<u8, Error = E>,
{
  /// Point the controller's 128-byte window at the page containing `addr`.
  pub async fn set_page(&mut self, addr: u32) -> Result<(), Error<E>> {
    self.write(&page_frame(addr)).await
  }

  /// Select the page for `addr` and write one byte to it.
  pub async fn write_addr(&mut self, addr: u32, value: u8) -> Result<(), Error<E>> {
    self.set_page(addr).await?;
    self.write(&[page_offset(addr), value]).await
  }

  /// Select the page for `addr` and read one byte from it.
  pub async fn read_addr(&mut self, addr: u32) -> Result<u8, Error<E>> {
    let mut buf = [0u8; 1];
    self.read_at(addr, &mut buf).await?;
    Ok(buf[0])
  }

  /// Read `out.len()` bytes starting at `addr` in a single transfer.
  pub(crate) async fn read_at(&mut self, addr: u32, out: &mut [u8]) -> Result<(), Error<E>> {
    self.set_page(addr).await?;
    let retries = self.retries();
    self.read_raw(page_offset(addr), out, retries).await
  }

  /// Write `data` starting at `addr` in a single transfer.
  pub(crate) async fn write_at(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
    self.set_page(addr).await?;
    let retries = self.retries();
    self.write_raw(page_offset(addr), data, retries).await
  }

  /// Read an arbitrarily long region, re-selecting the page for every chunk.
  pub(crate) async fn read_region(&mut self, addr: u32, out: &mut [u8]) -> Result<(), Error<E>> {
    let retries = self.bulk_retries();
    for (i, chunk) in out.chunks_mut(TRANSFER_MAX - 1).enumerate() {
      let at = addr + (i * (TRANSFER_MAX - 1)) as u32;
      self.set_page(at).await?;
      self.read_raw(page_offset(at), chunk, retries).await?;
    }
    Ok(())
  }
}
