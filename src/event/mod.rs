//! Point-report decoding.
//!
//! Every interrupt the controller leaves a 65 byte report at the start of its
//! event buffer. Byte 0 of the buffer handed to [`Decoder::decode`] is the
//! transfer's offset echo; the report proper starts at byte 1:
//!
//! | bytes    | content                                        |
//! |----------|------------------------------------------------|
//! | 1..=60   | ten 6 byte contact records                     |
//! | 61       | `0xF8` when byte 62 carries the key bitmask    |
//! | 62       | key bitmask                                    |
//! | 63..=64  | high pressure byte of contacts 0 and 1         |
//! | 65       | two's complement checksum of bytes 1..=64      |
//!
//! A contact record is `[id:5|status:3] [x_hi] [y_hi] [x_lo:4|y_lo:4] [width] [pressure]`.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiDevice;

use crate::esd::{is_handshake_pattern, Upset, WatchdogDetector};
use crate::rw::page_offset;
use crate::{Config, ContactLayout, Error, Nt36xxx, PowerStatus, Resolution};

mod gesture;
mod touchpoint;

pub use gesture::*;
pub use touchpoint::*;

/// Length of a point report, offset echo excluded.
pub const POINT_DATA_LEN: usize = 65;
/// Bytes read per report: the offset echo plus [`POINT_DATA_LEN`].
pub const REPORT_LEN: usize = POINT_DATA_LEN + 1;

const RECORD_LEN: usize = 6;
const KEY_FLAG_POS: usize = 61;
const KEY_FLAG: u8 = 0xF8;
const KEY_BITS_POS: usize = 62;
const PRESSURE_EXT_POS: usize = 63;
const PRESSURE_MAX: u16 = 1000;

const DATA_PROTOCOL_ID: u8 = 30;
const FUNCPAGE_GESTURE: u8 = 1;
const FUNCPAGE_PROXIMITY: u8 = 2;

/// Checksum the firmware is expected to store at [`POINT_DATA_LEN`].
pub fn checksum(report: &[u8]) -> u8 {
  let sum = report
    .get(1..POINT_DATA_LEN)
    .unwrap_or(&[])
    .iter()
    .fold(0u8, |acc, b| acc.wrapping_add(*b));
  (!sum).wrapping_add(1)
}

pub fn checksum_ok(report: &[u8]) -> bool {
  report.get(POINT_DATA_LEN).is_some_and(|c| *c == checksum(report))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Proximity {
  Near,
  Far,
}

/// Touch data decoded from one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
  pub changes: Changes,
  /// Contacts down after this report.
  pub active: u8,
  /// Key bitmask; bit `n` set means key `n` is held.
  pub keys: u8,
}

impl Frame {
  pub fn is_key_down(&self, key: u8) -> bool {
    key < 8 && self.keys & (1 << key) != 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodedEvent {
  Touches(Frame),
  Gesture(WakeGesture),
  Proximity(Proximity),
  Upset(Upset),
  /// Report failed its checksum or was truncated; slot state is unchanged.
  Malformed,
  /// Valid report carrying nothing to act on.
  Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecodeStats {
  pub presses: u32,
  pub releases: u32,
  pub malformed: u32,
}

/// Turns raw reports into slot transitions, wake gestures and upset signals.
#[derive(Debug, Clone)]
pub struct Decoder {
  layout: ContactLayout,
  resolution: Resolution,
  max_touch: u8,
  max_buttons: u8,
  proximity: bool,
  gesture_mode: bool,
  slots: [TouchSlot; MAX_TOUCH],
  watchdog: WatchdogDetector,
  stats: DecodeStats,
}

impl Decoder {
  pub fn new(config: &Config, layout: ContactLayout) -> Self {
    Self {
      layout,
      resolution: config.resolution,
      max_touch: config.max_touch.clamp(1, MAX_TOUCH as u8),
      max_buttons: config.max_buttons.min(8),
      proximity: config.proximity,
      gesture_mode: false,
      slots: [TouchSlot::default(); MAX_TOUCH],
      watchdog: WatchdogDetector::new(config.watchdog_threshold.max(1)),
      stats: DecodeStats::default(),
    }
  }

  pub fn decode(&mut self, report: &[u8]) -> DecodedEvent {
    if report.len() < REPORT_LEN {
      return self.malformed();
    }

    let corrupted = self.watchdog.observe(report);
    if is_handshake_pattern(report) {
      debug!("handshake report");
      return DecodedEvent::Upset(Upset::Handshake);
    }
    if corrupted {
      warn!("corrupted reports reached watchdog threshold");
      return DecodedEvent::Upset(Upset::Watchdog);
    }

    if !checksum_ok(report) {
      return self.malformed();
    }

    if self.gesture_mode {
      return self.decode_gesture(report);
    }

    let id = report[1] >> 3;
    if self.proximity && id == DATA_PROTOCOL_ID && report[2] == FUNCPAGE_PROXIMITY {
      let state = if report[3] == 1 { Proximity::Near } else { Proximity::Far };
      debug!("proximity {:?}", state);
      return DecodedEvent::Proximity(state);
    }

    DecodedEvent::Touches(self.decode_touches(report))
  }

  fn malformed(&mut self) -> DecodedEvent {
    self.stats.malformed = self.stats.malformed.wrapping_add(1);
    warn!("malformed report #{}", self.stats.malformed);
    DecodedEvent::Malformed
  }

  fn decode_gesture(&mut self, report: &[u8]) -> DecodedEvent {
    let id = report[1] >> 3;
    let code = match id {
      DATA_PROTOCOL_ID if report[2] == FUNCPAGE_GESTURE => report[3],
      DATA_PROTOCOL_ID => {
        debug!("function page {} ignored in gesture mode", report[2]);
        return DecodedEvent::Ignored;
      }
      id if id > DATA_PROTOCOL_ID => {
        warn!("invalid gesture id {}", id);
        return DecodedEvent::Ignored;
      }
      id => id,
    };

    match WakeGesture::try_from(code) {
      Ok(gesture) => {
        info!("wake gesture {:?}", gesture);
        DecodedEvent::Gesture(gesture)
      }
      Err(_) => {
        debug!("unknown gesture code {}", code);
        DecodedEvent::Ignored
      }
    }
  }

  fn decode_touches(&mut self, report: &[u8]) -> Frame {
    let mut frame = Frame::default();
    let mut refreshed = [false; MAX_TOUCH];

    for i in 0..self.max_touch as usize {
      let pos = 1 + RECORD_LEN * i;
      let rec = &report[pos..pos + RECORD_LEN];

      let id = rec[0] >> 3;
      if id == 0 || id > self.max_touch {
        continue;
      }
      let status = rec[0] & self.layout.status_mask;
      if status != 1 && status != 2 {
        continue;
      }
      let slot = (id - 1) as usize;
      if refreshed[slot] {
        continue;
      }

      let x = (u16::from(rec[1]) << 4) | u16::from(rec[3] >> 4);
      let y = (u16::from(rec[2]) << 4) | u16::from(rec[3] & 0x0F);
      if x > self.resolution.x_max || y > self.resolution.y_max {
        trace!("contact {} out of range at {}, {}", id, x, y);
        continue;
      }

      let width = rec[4].max(1);
      let mut pressure = u16::from(rec[5]);
      if self.layout.pressure_ext && i < 2 {
        pressure += u16::from(report[PRESSURE_EXT_POS + i]) << 8;
      }
      let pressure = pressure.clamp(1, PRESSURE_MAX);

      refreshed[slot] = true;
      frame.active += 1;

      let contact = Contact::new(x, y, width, pressure);
      let tracked = &mut self.slots[slot];
      tracked.was_pressed = tracked.pressed;
      if let Some(phase) = tracked.press(status, contact) {
        if phase.is_start() {
          self.stats.presses = self.stats.presses.wrapping_add(1);
        }
        frame.changes.set(Touch::new(slot as u8, phase, contact));
      }
    }

    for (slot, tracked) in self.slots.iter_mut().enumerate() {
      if refreshed[slot] {
        continue;
      }
      tracked.was_pressed = tracked.pressed;
      if tracked.release() {
        self.stats.releases = self.stats.releases.wrapping_add(1);
        frame.changes.set(Touch::new(slot as u8, TouchPhase::End, tracked.contact));
      }
    }

    if self.max_buttons > 0 {
      let mask = ((1u16 << self.max_buttons) - 1) as u8;
      if report[KEY_FLAG_POS] == KEY_FLAG {
        frame.keys = report[KEY_BITS_POS] & mask;
      }
    }

    frame
  }

  /// Lift every pressed slot.
  pub fn release_all(&mut self) -> Changes {
    let mut changes = Changes::none();
    for (slot, tracked) in self.slots.iter_mut().enumerate() {
      tracked.was_pressed = tracked.pressed;
      if tracked.release() {
        self.stats.releases = self.stats.releases.wrapping_add(1);
        changes.set(Touch::new(slot as u8, TouchPhase::End, tracked.contact));
      }
    }
    changes
  }

  pub fn set_layout(&mut self, layout: ContactLayout) {
    self.layout = layout;
  }

  pub fn layout(&self) -> ContactLayout {
    self.layout
  }

  pub fn set_gesture_mode(&mut self, enabled: bool) {
    self.gesture_mode = enabled;
  }

  pub fn gesture_mode(&self) -> bool {
    self.gesture_mode
  }

  pub fn slots(&self) -> &[TouchSlot] {
    &self.slots
  }

  pub fn stats(&self) -> DecodeStats {
    self.stats
  }
}

impl<SPI, E, RST, PWR, D> Nt36xxx<SPI, RST, PWR, D>
where
  SPI: SpiDevice<u8, Error = E>,
  RST: OutputPin,
  PWR: OutputPin,
  D: DelayNs,
{
  /// Fetch and decode the pending report. Call once per interrupt.
  ///
  /// Any decoded report counts as supervisor activity. A handshake report
  /// arms the supervisor; a watchdog upset runs a recovery right away, whose
  /// failure is logged rather than returned. While powered off nothing is
  /// read and [`DecodedEvent::Ignored`] is returned.
  pub async fn handle_report(&mut self, now_ms: u64) -> Result<DecodedEvent, Error<E>> {
    if self.bus.power() == PowerStatus::Off {
      trace!("report ignored while powered off");
      return Ok(DecodedEvent::Ignored);
    }

    let event_buf = self.memory_map()?.event_buf;
    let mut report = [0u8; REPORT_LEN];
    report[0] = page_offset(event_buf);
    self.bus.set_page(event_buf).await?;
    self.bus.read(&mut report).await?;

    let event = self.decoder.decode(&report);
    match event {
      DecodedEvent::Upset(Upset::Handshake) => {
        if !self.esd.is_enabled() {
          info!("firmware handshake, supervisor armed");
          self.esd.enable(now_ms);
        }
      }
      DecodedEvent::Upset(Upset::Watchdog) => {
        if self.recover(now_ms).await.is_err() {
          error!("watchdog recovery failed");
        }
      }
      DecodedEvent::Malformed => {}
      _ => self.esd.record_activity(now_ms),
    }
    Ok(event)
  }
}
