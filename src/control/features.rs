use bitflags::bitflags;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::reg::EventMap;
use crate::{Error, Nt36xxx, PowerStatus};

bitflags! {
  /// Host-controlled firmware modes. Each flag mirrors a bit of the
  /// firmware's feature-state byte at `EVENT_BUF + 0x5C`.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct Features: u8 {
    /// USB charger noise mitigation.
    const CHARGER = 1 << 0;
    /// High-sensitivity glove mode.
    const GLOVE = 1 << 1;
    /// Ignore palms and pocket contact.
    const POCKET_PALM = 1 << 2;
    /// Reject grip contacts along the panel edge.
    const EDGE_REJECT = 1 << 3;
  }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Features {
  fn format(&self, f: defmt::Formatter) {
    defmt::write!(f, "Features({=u8:#x})", self.bits())
  }
}

impl Features {
  /// Host command and argument that switch a single feature on or off.
  pub fn command(self, on: bool) -> Option<[u8; 2]> {
    let cmd = match (self.bits(), on) {
      (b, true) if b == Self::CHARGER.bits() => [0x53, 0x00],
      (b, false) if b == Self::CHARGER.bits() => [0x51, 0x00],
      (b, true) if b == Self::GLOVE.bits() => [0x71, 0x00],
      (b, false) if b == Self::GLOVE.bits() => [0x72, 0x00],
      (b, true) if b == Self::POCKET_PALM.bits() => [0x74, 0x01],
      (b, false) if b == Self::POCKET_PALM.bits() => [0x74, 0x02],
      (b, true) if b == Self::EDGE_REJECT.bits() => [0x7D, 0x01],
      (b, false) if b == Self::EDGE_REJECT.bits() => [0x7D, 0x00],
      _ => return None,
    };
    Some(cmd)
  }
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Features the driver keeps enabled across reloads.
  pub fn features(&self) -> Features {
    self.features
  }

  /// Change the wanted feature set. Applied immediately when the controller
  /// is running, otherwise on the next resume.
  pub async fn set_features(&mut self, features: Features) -> Result<(), Error<E>> {
    self.features = features;
    if self.bus.power() != PowerStatus::On {
      debug!("features cached until resume");
      return Ok(());
    }
    self.restore_features().await.map(|_| ())
  }

  /// Read the firmware's feature state.
  pub async fn feature_state(&mut self) -> Result<Features, Error<E>> {
    let addr = self.memory_map()?.event_buf | u32::from(EventMap::FeatureState);
    let raw = self.bus.read_addr(addr).await?;
    Ok(Features::from_bits_truncate(raw))
  }

  /// Re-issue the commands for every feature whose firmware state differs
  /// from the cached set. Returns the number of commands sent.
  pub(crate) async fn restore_features(&mut self) -> Result<u8, Error<E>> {
    let fresh = self.feature_state().await?;
    let wanted = self.features;
    let stale = fresh.symmetric_difference(wanted);

    let mut sent = 0;
    for flag in stale.iter() {
      let Some([cmd, arg]) = flag.command(wanted.contains(flag)) else {
        continue;
      };
      let event_buf = self.memory_map()?.event_buf;
      self.bus.set_page(event_buf).await?;
      self.bus.write(&[EventMap::HostCmd.into(), cmd, arg]).await?;
      sent += 1;
    }
    if sent > 0 {
      debug!("restored {} feature(s)", sent);
    }
    Ok(sent)
  }
}
