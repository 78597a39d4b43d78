use embedded_hal_async::spi::SpiDevice;

use crate::reg::{DUMMY_BYTES, SPI_READ_MASK, SPI_WRITE_MASK};
use crate::{Error, PowerStatus};

/// Largest transfer, command byte included, that fits the staging buffers.
pub const TRANSFER_MAX: usize = 256;

const BUF_LEN: usize = TRANSFER_MAX + DUMMY_BYTES + 1;

/// SPI transport with the NT36xxx framing.
///
/// Every transfer starts with a command byte carrying the register offset in
/// its low seven bits; bit 7 selects write. Reads are full duplex and the
/// controller answers after one dummy byte, which is stripped before the data
/// is handed back to the caller.
///
/// The transport also holds the current [`PowerStatus`]: nothing is clocked
/// while the controller is [`PowerStatus::Off`], and a controller in
/// [`PowerStatus::LowPower`] gets a single attempt per transfer so a sleeping
/// chip is not hammered with retries.
pub struct Bus<SPI> {
  spi: SPI,
  tx: [u8; BUF_LEN],
  rx: [u8; BUF_LEN],
  power: PowerStatus,
  retries: u8,
  bulk_retries: u8,
}

impl<SPI, E> Bus<SPI>
where
  SPI: SpiDevice<u8, Error = E>,
{
  pub fn new(spi: SPI, retries: u8, bulk_retries: u8) -> Self {
    Self {
      spi,
      tx: [0; BUF_LEN],
      rx: [0; BUF_LEN],
      power: PowerStatus::Off,
      retries: retries.max(1),
      bulk_retries: bulk_retries.max(1),
    }
  }

  pub fn power(&self) -> PowerStatus {
    self.power
  }

  pub(crate) fn set_power(&mut self, power: PowerStatus) {
    if self.power != power {
      debug!("power status {:?} -> {:?}", self.power, power);
    }
    self.power = power;
  }

  /// Read `buf.len() - 1` bytes from the offset held in `buf[0]`.
  ///
  /// On success `buf[1..]` holds the register contents; `buf[0]` is left
  /// untouched.
  pub async fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<E>> {
    if buf.is_empty() {
      return Err(Error::BufferOverflow);
    }
    let (cmd, out) = buf.split_at_mut(1);
    self.read_raw(cmd[0], out, self.retries).await
  }

  /// Write `buf[1..]` to the offset held in `buf[0]`.
  pub async fn write(&mut self, buf: &[u8]) -> Result<(), Error<E>> {
    match buf.split_first() {
      Some((cmd, data)) => self.write_raw(*cmd, data, self.retries).await,
      None => Err(Error::BufferOverflow),
    }
  }

  /// Same as [`Bus::read`] but with the larger retry bound used for frame
  /// dumps and other bulk traffic.
  pub async fn read_bulk(&mut self, buf: &mut [u8]) -> Result<(), Error<E>> {
    if buf.is_empty() {
      return Err(Error::BufferOverflow);
    }
    let (cmd, out) = buf.split_at_mut(1);
    self.read_raw(cmd[0], out, self.bulk_retries).await
  }

  pub(crate) async fn read_raw(&mut self, offset: u8, out: &mut [u8], retries: u8) -> Result<(), Error<E>> {
    let len = out.len() + 1;
    if len > TRANSFER_MAX {
      return Err(Error::BufferOverflow);
    }
    self.ensure_powered()?;

    let frame = len + DUMMY_BYTES;
    self.tx[..frame].fill(0);
    self.tx[0] = offset & SPI_READ_MASK;

    let attempts = self.attempts(retries);
    let mut attempt = 0;
    loop {
      match self.spi.transfer(&mut self.rx[..frame], &self.tx[..frame]).await {
        Ok(()) => break,
        Err(e) => {
          attempt += 1;
          if attempt >= attempts {
            error!("spi read at {:#x} failed after {} attempts", offset, attempt);
            return Err(Error::Spi(e));
          }
          warn!("spi read at {:#x} failed, attempt {}", offset, attempt);
        }
      }
    }

    out.copy_from_slice(&self.rx[1 + DUMMY_BYTES..frame]);
    Ok(())
  }

  pub(crate) async fn write_raw(&mut self, offset: u8, data: &[u8], retries: u8) -> Result<(), Error<E>> {
    let len = data.len() + 1;
    if len > TRANSFER_MAX {
      return Err(Error::BufferOverflow);
    }
    self.ensure_powered()?;

    self.tx[0] = offset | SPI_WRITE_MASK;
    self.tx[1..len].copy_from_slice(data);

    let attempts = self.attempts(retries);
    let mut attempt = 0;
    loop {
      match self.spi.write(&self.tx[..len]).await {
        Ok(()) => return Ok(()),
        Err(e) => {
          attempt += 1;
          if attempt >= attempts {
            error!("spi write at {:#x} failed after {} attempts", offset, attempt);
            return Err(Error::Spi(e));
          }
          warn!("spi write at {:#x} failed, attempt {}", offset, attempt);
        }
      }
    }
  }

  pub(crate) fn retries(&self) -> u8 {
    self.retries
  }

  pub(crate) fn bulk_retries(&self) -> u8 {
    self.bulk_retries
  }

  fn ensure_powered(&self) -> Result<(), Error<E>> {
    match self.power {
      PowerStatus::Off => {
        debug!("transfer refused while powered off");
        Err(Error::Suspended)
      }
      _ => Ok(()),
    }
  }

  fn attempts(&self, retries: u8) -> u8 {
    match self.power {
      PowerStatus::LowPower => 1,
      _ => retries,
    }
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;

  use super::*;
  use crate::sim::Sim;

  fn bus(sim: &Sim) -> Bus<Sim> {
    let mut bus = Bus::new(sim.clone(), 5, 20);
    bus.set_power(PowerStatus::On);
    bus
  }

  #[test]
  fn write_sets_direction_bit() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    block_on(bus.write(&[0x50, 0x13])).unwrap();
    assert_eq!(sim.last_frame(), [0xD0, 0x13]);
  }

  #[test]
  fn read_clears_direction_bit_and_drops_dummy_byte() {
    let sim = Sim::new();
    sim.poke(0x2FE00 + 0x78, &[0x11, 0xEE, 0x20]);
    let mut bus = bus(&sim);
    block_on(bus.write(&[0xFF, 0x05, 0xFC])).unwrap();

    let mut buf = [0xF8, 0, 0, 0];
    block_on(bus.read(&mut buf)).unwrap();
    assert_eq!(sim.last_frame()[0], 0x78);
    assert_eq!(sim.last_frame().len(), 5);
    assert_eq!(buf, [0xF8, 0x11, 0xEE, 0x20]);
  }

  #[test]
  fn transient_failures_are_retried() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    sim.fail_next(4);
    block_on(bus.write(&[0x50, 0x00])).unwrap();
    assert_eq!(sim.transfers(), 5);
  }

  #[test]
  fn error_surfaces_after_retry_bound() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    sim.fail_next(5);
    let mut buf = [0x60, 0];
    assert!(matches!(block_on(bus.read(&mut buf)), Err(Error::Spi(_))));
    assert_eq!(sim.transfers(), 5);
  }

  #[test]
  fn bulk_reads_use_the_larger_bound() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    sim.fail_next(19);
    let mut buf = [0x00, 0, 0];
    block_on(bus.read_bulk(&mut buf)).unwrap();
    assert_eq!(sim.transfers(), 20);
  }

  #[test]
  fn low_power_gets_a_single_attempt() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    bus.set_power(PowerStatus::LowPower);
    sim.fail_next(1);
    assert!(block_on(bus.write(&[0x50, 0x00])).is_err());
    assert_eq!(sim.transfers(), 1);
  }

  #[test]
  fn powered_off_bus_is_silent() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    bus.set_power(PowerStatus::Off);
    assert!(matches!(block_on(bus.write(&[0x50, 0x00])), Err(Error::Suspended)));
    let mut buf = [0x60, 0];
    assert!(matches!(block_on(bus.read(&mut buf)), Err(Error::Suspended)));
    assert_eq!(sim.transfers(), 0);
  }

  #[test]
  fn oversized_transfers_are_rejected() {
    let sim = Sim::new();
    let mut bus = bus(&sim);
    let big = [0u8; TRANSFER_MAX + 1];
    assert!(matches!(block_on(bus.write(&big)), Err(Error::BufferOverflow)));
    assert_eq!(sim.transfers(), 0);
  }
}
