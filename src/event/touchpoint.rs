/// Upper bound on simultaneously tracked contacts.
pub const MAX_TOUCH: usize = 10;

/// Indicates how a contact changed compared to the previous report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TouchPhase {
  /// A new finger landed in this slot.
  Start,
  /// A finger already down moved or changed pressure.
  Move,
  /// The finger was lifted or not reported any more.
  End,
}

impl TouchPhase {
  pub const fn is_start(self) -> bool {
    matches!(self, TouchPhase::Start)
  }

  pub const fn is_move(self) -> bool {
    matches!(self, TouchPhase::Move)
  }

  pub const fn is_end(self) -> bool {
    matches!(self, TouchPhase::End)
  }

  pub const fn as_str(self) -> &'static str {
    match self {
      TouchPhase::Start => "start",
      TouchPhase::Move => "move",
      TouchPhase::End => "end",
    }
  }
}

/// Position, size and force of one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contact {
  pub x: u16,
  pub y: u16,
  /// Contact width; never zero for a reported contact.
  pub width: u8,
  /// Contact pressure in `1..=1000`.
  pub pressure: u16,
}

impl Contact {
  pub const fn new(x: u16, y: u16, width: u8, pressure: u16) -> Self {
    Self { x, y, width, pressure }
  }
}

/// Per-slot tracking state kept by the decoder between reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TouchSlot {
  pub contact: Contact,
  /// Raw status bits of the last record seen for this slot.
  pub status: u8,
  pub pressed: bool,
  /// Value of `pressed` before the current report.
  pub was_pressed: bool,
  /// Where the current press started.
  pub first_x: u16,
  pub first_y: u16,
  /// Number of position changes since the press started.
  pub moves: u32,
}

impl TouchSlot {
  /// Record a contact seen in the current report and return the transition
  /// it caused, if any.
  pub(crate) fn press(&mut self, status: u8, contact: Contact) -> Option<TouchPhase> {
    self.status = status;
    let phase = if !self.pressed {
      self.first_x = contact.x;
      self.first_y = contact.y;
      self.moves = 0;
      Some(TouchPhase::Start)
    } else if self.contact != contact {
      if self.contact.x != contact.x || self.contact.y != contact.y {
        self.moves = self.moves.wrapping_add(1);
      }
      Some(TouchPhase::Move)
    } else {
      None
    };
    self.pressed = true;
    self.contact = contact;
    phase
  }

  /// Release the slot. Returns `true` when it was pressed.
  pub(crate) fn release(&mut self) -> bool {
    let was = self.pressed;
    self.pressed = false;
    self.status = 0;
    was
  }
}

/// A single slot transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Touch {
  pub slot: u8,
  pub phase: TouchPhase,
  pub contact: Contact,
}

impl Touch {
  pub const fn new(slot: u8, phase: TouchPhase, contact: Contact) -> Self {
    Self { slot, phase, contact }
  }
}

/// Transitions produced by one report, at most one per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Changes {
  slots: [Option<Touch>; MAX_TOUCH],
}

impl Changes {
  pub const fn none() -> Self {
    Self { slots: [None; MAX_TOUCH] }
  }

  pub(crate) fn set(&mut self, touch: Touch) {
    if let Some(entry) = self.slots.get_mut(touch.slot as usize) {
      *entry = Some(touch);
    }
  }

  pub fn get(&self, slot: u8) -> Option<Touch> {
    self.slots.get(slot as usize).copied().flatten()
  }

  pub fn iter(&self) -> impl Iterator<Item = Touch> + '_ {
    self.slots.iter().flatten().copied()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.iter().all(Option::is_none)
  }

  pub fn count(&self) -> usize {
    self.iter().count()
  }

  pub fn has_starts(&self) -> bool {
    self.iter().any(|t| t.phase.is_start())
  }

  pub fn has_ends(&self) -> bool {
    self.iter().any(|t| t.phase.is_end())
  }

  pub fn with_phase(&self, phase: TouchPhase) -> impl Iterator<Item = Touch> + '_ {
    self.iter().filter(move |t| t.phase == phase)
  }
}

impl Default for Changes {
  fn default() -> Self {
    Self::none()
  }
}
