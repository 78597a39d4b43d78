//! Logging front shared by the whole crate.
//!
//! Forwards to `defmt` or `log` depending on the enabled Cargo feature and
//! compiles to nothing when neither is selected. Format strings must stay in
//! the subset both back ends understand (`{}`, `{:?}`, `{:#x}`).
#![allow(unused_macros)]

macro_rules! trace {
  ($s:literal $(, $x:expr)* $(,)?) => {
    {
      #[cfg(feature = "log")]
      ::log::trace!($s $(, $x)*);
      #[cfg(feature = "defmt")]
      ::defmt::trace!($s $(, $x)*);
      #[cfg(not(any(feature = "log", feature = "defmt")))]
      let _ = ($( & $x ),*);
    }
  };
}

macro_rules! debug {
  ($s:literal $(, $x:expr)* $(,)?) => {
    {
      #[cfg(feature = "log")]
      ::log::debug!($s $(, $x)*);
      #[cfg(feature = "defmt")]
      ::defmt::debug!($s $(, $x)*);
      #[cfg(not(any(feature = "log", feature = "defmt")))]
      let _ = ($( & $x ),*);
    }
  };
}

macro_rules! info {
  ($s:literal $(, $x:expr)* $(,)?) => {
    {
      #[cfg(feature = "log")]
      ::log::info!($s $(, $x)*);
      #[cfg(feature = "defmt")]
      ::defmt::info!($s $(, $x)*);
      #[cfg(not(any(feature = "log", feature = "defmt")))]
      let _ = ($( & $x ),*);
    }
  };
}

macro_rules! warn {
  ($s:literal $(, $x:expr)* $(,)?) => {
    {
      #[cfg(feature = "log")]
      ::log::warn!($s $(, $x)*);
      #[cfg(feature = "defmt")]
      ::defmt::warn!($s $(, $x)*);
      #[cfg(not(any(feature = "log", feature = "defmt")))]
      let _ = ($( & $x ),*);
    }
  };
}

macro_rules! error {
  ($s:literal $(, $x:expr)* $(,)?) => {
    {
      #[cfg(feature = "log")]
      ::log::error!($s $(, $x)*);
      #[cfg(feature = "defmt")]
      ::defmt::error!($s $(, $x)*);
      #[cfg(not(any(feature = "log", feature = "defmt")))]
      let _ = ($( & $x ),*);
    }
  };
}
