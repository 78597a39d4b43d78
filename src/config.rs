use crate::{Features, FirmwareImage, MAX_TOUCH};

/// Panel coordinate bounds. Contacts outside `0..=x_max` / `0..=y_max` are
/// dropped by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Resolution {
  pub x_max: u16,
  pub y_max: u16,
}

impl Resolution {
  pub const fn new(x_max: u16, y_max: u16) -> Self {
    Self { x_max, y_max }
  }
}

impl Default for Resolution {
  fn default() -> Self {
    Self::new(1080, 2400)
  }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
  pub attempts: u8,
  pub interval_ms: u32,
}

impl RetryPolicy {
  pub const fn new(attempts: u8, interval_ms: u32) -> Self {
    Self { attempts, interval_ms }
  }
}

/// Polling bounds used while waiting for the controller's reset state.
///
/// Waiting for the bootloader (`Init`) is short; any later state gets the
/// longer budget because the firmware has to calibrate first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetPolicy {
  pub init_attempts: u8,
  pub later_attempts: u8,
  pub interval_ms: u32,
}

impl ResetPolicy {
  pub const fn new(init_attempts: u8, later_attempts: u8, interval_ms: u32) -> Self {
    Self { init_attempts, later_attempts, interval_ms }
  }
}

impl Default for ResetPolicy {
  fn default() -> Self {
    Self::new(10, 50, 10)
  }
}

/// What `suspend` asks of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SuspendMode {
  /// Stay scanning at low power and report wake gestures.
  Gesture,
  /// Enter deep sleep, optionally dropping the bias rails afterwards.
  DeepSleep { power_off_rails: bool },
}

/// Driver configuration.
///
/// # Example
/// ```no_run
/// use nt36xxx::{Config, Features, Resolution, SuspendMode};
///
/// let config = Config::default()
///   .with_resolution(Resolution::new(1200, 2000))
///   .with_suspend_mode(SuspendMode::Gesture)
///   .with_features(Features::CHARGER);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Config {
  pub resolution: Resolution,
  /// Number of contact records decoded from each report, at most [`MAX_TOUCH`].
  pub max_touch: u8,
  /// Number of capacitive keys reported through the key bitmask.
  pub max_buttons: u8,
  pub suspend_mode: SuspendMode,
  /// Decode proximity frames instead of treating them as touch data.
  pub proximity: bool,
  /// Pulse the reset line during firmware reload when one is wired.
  pub hw_reset: bool,
  pub esd_period_ms: u32,
  /// Consecutive corrupted reports that force a recovery.
  pub watchdog_threshold: u8,
  pub bus_retries: u8,
  pub bulk_retries: u8,
  pub identify: RetryPolicy,
  pub reset_poll: ResetPolicy,
  pub download: RetryPolicy,
  pub firmware: Option<FirmwareImage>,
  /// Feature modes applied after every firmware (re)load.
  pub features: Features,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      resolution: Resolution::new(1080, 2400),
      max_touch: MAX_TOUCH as u8,
      max_buttons: 3,
      suspend_mode: SuspendMode::Gesture,
      proximity: false,
      hw_reset: true,
      esd_period_ms: 1500,
      watchdog_threshold: 10,
      bus_retries: 5,
      bulk_retries: 20,
      identify: RetryPolicy::new(5, 10),
      reset_poll: ResetPolicy::new(10, 50, 10),
      download: RetryPolicy::new(3, 20),
      firmware: None,
      features: Features::empty(),
    }
  }

  pub const fn with_resolution(mut self, resolution: Resolution) -> Self {
    self.resolution = resolution;
    self
  }

  pub const fn with_max_touch(mut self, max_touch: u8) -> Self {
    self.max_touch = if max_touch == 0 {
      1
    } else if max_touch as usize > MAX_TOUCH {
      MAX_TOUCH as u8
    } else {
      max_touch
    };
    self
  }

  pub const fn with_max_buttons(mut self, max_buttons: u8) -> Self {
    self.max_buttons = if max_buttons > 8 { 8 } else { max_buttons };
    self
  }

  pub const fn with_suspend_mode(mut self, suspend_mode: SuspendMode) -> Self {
    self.suspend_mode = suspend_mode;
    self
  }

  pub const fn with_proximity(mut self, proximity: bool) -> Self {
    self.proximity = proximity;
    self
  }

  pub const fn with_hw_reset(mut self, hw_reset: bool) -> Self {
    self.hw_reset = hw_reset;
    self
  }

  pub const fn with_esd_period_ms(mut self, period_ms: u32) -> Self {
    self.esd_period_ms = period_ms;
    self
  }

  pub const fn with_watchdog_threshold(mut self, threshold: u8) -> Self {
    self.watchdog_threshold = if threshold == 0 { 1 } else { threshold };
    self
  }

  pub const fn with_bus_retries(mut self, retries: u8, bulk_retries: u8) -> Self {
    self.bus_retries = retries;
    self.bulk_retries = bulk_retries;
    self
  }

  pub const fn with_identify(mut self, policy: RetryPolicy) -> Self {
    self.identify = policy;
    self
  }

  pub const fn with_reset_poll(mut self, policy: ResetPolicy) -> Self {
    self.reset_poll = policy;
    self
  }

  pub const fn with_download(mut self, policy: RetryPolicy) -> Self {
    self.download = policy;
    self
  }

  pub const fn with_firmware(mut self, firmware: FirmwareImage) -> Self {
    self.firmware = Some(firmware);
    self
  }

  pub const fn with_features(mut self, features: Features) -> Self {
    self.features = features;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}
