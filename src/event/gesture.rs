use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Linux input key codes the wake gestures map onto.
pub mod key {
  pub const KEY_W: u16 = 17;
  pub const KEY_E: u16 = 18;
  pub const KEY_O: u16 = 24;
  pub const KEY_S: u16 = 31;
  pub const KEY_Z: u16 = 44;
  pub const KEY_V: u16 = 47;
  pub const KEY_M: u16 = 50;
  pub const KEY_UP: u16 = 103;
  pub const KEY_LEFT: u16 = 105;
  pub const KEY_RIGHT: u16 = 106;
  pub const KEY_DOWN: u16 = 108;
  pub const KEY_POWER: u16 = 116;
}

/// Gesture recognised by the firmware while the panel is in gesture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WakeGesture {
  LetterC = 12,
  LetterW = 13,
  LetterV = 14,
  DoubleClick = 15,
  LetterZ = 16,
  LetterM = 17,
  LetterO = 18,
  LetterE = 19,
  LetterS = 20,
  SlideUp = 21,
  SlideDown = 22,
  SlideLeft = 23,
  SlideRight = 24,
}

impl WakeGesture {
  /// Input key emitted (press then release) for this gesture.
  pub const fn key(self) -> u16 {
    match self {
      Self::LetterC | Self::DoubleClick => key::KEY_POWER,
      Self::LetterW => key::KEY_W,
      Self::LetterV => key::KEY_V,
      Self::LetterZ => key::KEY_Z,
      Self::LetterM => key::KEY_M,
      Self::LetterO => key::KEY_O,
      Self::LetterE => key::KEY_E,
      Self::LetterS => key::KEY_S,
      Self::SlideUp => key::KEY_UP,
      Self::SlideDown => key::KEY_DOWN,
      Self::SlideLeft => key::KEY_LEFT,
      Self::SlideRight => key::KEY_RIGHT,
    }
  }

  pub const fn is_slide(self) -> bool {
    matches!(self, Self::SlideUp | Self::SlideDown | Self::SlideLeft | Self::SlideRight)
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      Self::LetterC => "C",
      Self::LetterW => "W",
      Self::LetterV => "V",
      Self::DoubleClick => "double click",
      Self::LetterZ => "Z",
      Self::LetterM => "M",
      Self::LetterO => "O",
      Self::LetterE => "e",
      Self::LetterS => "S",
      Self::SlideUp => "slide up",
      Self::SlideDown => "slide down",
      Self::SlideLeft => "slide left",
      Self::SlideRight => "slide right",
    }
  }
}

impl fmt::Display for WakeGesture {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A key tap synthesised from a gesture: press immediately followed by release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyTap {
  pub code: u16,
}

impl KeyTap {
  /// The two `(code, pressed)` edges of the tap.
  pub const fn edges(self) -> [(u16, bool); 2] {
    [(self.code, true), (self.code, false)]
  }
}

impl From<WakeGesture> for KeyTap {
  fn from(gesture: WakeGesture) -> Self {
    Self { code: gesture.key() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes_map_to_keys() {
    assert_eq!(WakeGesture::try_from(12u8).unwrap().key(), key::KEY_POWER);
    assert_eq!(WakeGesture::try_from(15u8).unwrap(), WakeGesture::DoubleClick);
    assert_eq!(WakeGesture::try_from(19u8).unwrap().key(), key::KEY_E);
    assert_eq!(WakeGesture::try_from(24u8).unwrap().key(), key::KEY_RIGHT);
    assert!(WakeGesture::try_from(11u8).is_err());
    assert!(WakeGesture::try_from(25u8).is_err());
  }

  #[test]
  fn tap_is_press_then_release() {
    let tap = KeyTap::from(WakeGesture::SlideUp);
    assert_eq!(tap.edges(), [(key::KEY_UP, true), (key::KEY_UP, false)]);
    assert_eq!(u8::from(WakeGesture::SlideUp), 21);
  }
}
