use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::{Changes, DecodedEvent, Error, FrameKind, Nt36xxx};

/// Driver behind an async mutex so the interrupt task, the supervisor tick
/// and the power/diagnostic callers can share one controller.
///
/// Each call holds the lock for the whole operation, so a recovery can never
/// interleave with a report read or a suspend.
pub struct SharedNt36xxx<M: RawMutex, SPI, RST, PWR, D> {
  inner: Mutex<M, Nt36xxx<SPI, RST, PWR, D>>,
}

impl<M, SPI, E, RST, PWR, D> SharedNt36xxx<M, SPI, RST, PWR, D>
where
  M: RawMutex,
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  pub const fn new(device: Nt36xxx<SPI, RST, PWR, D>) -> Self {
    Self { inner: Mutex::new(device) }
  }

  /// Exclusive access for anything not wrapped below.
  pub async fn lock(&self) -> MutexGuard<'_, M, Nt36xxx<SPI, RST, PWR, D>> {
    self.inner.lock().await
  }

  pub async fn handle_report(&self, now_ms: u64) -> Result<DecodedEvent, Error<E>> {
    self.inner.lock().await.handle_report(now_ms).await
  }

  pub async fn esd_tick(&self, now_ms: u64) -> bool {
    self.inner.lock().await.esd_tick(now_ms).await
  }

  pub async fn suspend(&self, now_ms: u64) -> Result<Changes, Error<E>> {
    self.inner.lock().await.suspend(now_ms).await
  }

  pub async fn resume(&self, now_ms: u64) -> Result<(), Error<E>> {
    self.inner.lock().await.resume(now_ms).await
  }

  pub async fn read_frame(&self, kind: FrameKind, out: &mut [i16], now_ms: u64) -> Result<usize, Error<E>> {
    self.inner.lock().await.read_frame(kind, out, now_ms).await
  }

  pub fn into_inner(self) -> Nt36xxx<SPI, RST, PWR, D> {
    self.inner.into_inner()
  }
}

#[cfg(test)]
mod tests {
  use embassy_futures::block_on;
  use embassy_sync::blocking_mutex::raw::NoopRawMutex;

  use super::*;
  use crate::sim::{self, Sim};
  use crate::PowerStatus;

  #[test]
  fn operations_go_through_the_lock() {
    let sim = Sim::new();
    let shared: SharedNt36xxx<NoopRawMutex, _, _, _, _> = SharedNt36xxx::new(sim::identified(&sim));

    block_on(shared.suspend(0)).unwrap();
    assert_eq!(block_on(shared.handle_report(1)).unwrap(), DecodedEvent::Ignored);
    block_on(shared.resume(2)).unwrap();
    assert!(!block_on(shared.esd_tick(3)));

    let dev = shared.into_inner();
    assert_eq!(dev.power_status(), PowerStatus::On);
  }

  #[test]
  fn guard_exposes_driver() {
    let sim = Sim::new();
    let shared: SharedNt36xxx<NoopRawMutex, _, _, _, _> = SharedNt36xxx::new(sim::identified(&sim));
    let mut dev = block_on(shared.lock());
    assert!(dev.identity().is_some());
    assert_eq!(block_on(dev.read_fw_info()).unwrap().x_num, 4);
  }
}
