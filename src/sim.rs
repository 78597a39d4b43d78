//! In-memory NT36xxx model used by the unit tests.
//!
//! Implements the SPI framing (page register, read dummy byte, write bit) over
//! a sparse byte map and reacts to the few writes the boot and diagnostic
//! flows depend on.

use core::cell::RefCell;
use core::convert::Infallible;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::{self, ErrorKind, Operation, SpiDevice};

use crate::{Config, DeviceIdentity, DeviceVariant, MemoryMap, Nt36xxx, PowerStatus, TrimLocation};

const SWRST_ADDRS: [u32; 2] = [0x3F0FE, 0x1F0FE];

#[derive(Debug)]
pub(crate) struct SimError;

impl spi::Error for SimError {
  fn kind(&self) -> ErrorKind {
    ErrorKind::Other
  }
}

struct State {
  map: &'static MemoryMap,
  mem: BTreeMap<u32, u8>,
  read_only: Vec<(u32, u32)>,
  page: u32,
  fail_next: usize,
  transfers: usize,
  frames: Vec<Vec<u8>>,
  writes: Vec<(u32, Vec<u8>)>,
  reset_script: VecDeque<u8>,
  boot_code: u8,
  pipe: u8,
  rst: Vec<bool>,
  pwr: Vec<bool>,
  delay_ns: u64,
}

impl State {
  fn reset_addr(&self) -> u32 {
    self.map.event_buf + 0x60
  }

  fn store(&mut self, addr: u32, value: u8) {
    if self.read_only.iter().any(|(start, end)| (*start..*end).contains(&addr)) {
      return;
    }
    self.mem.insert(addr, value);
  }

  fn load(&mut self, addr: u32) -> u8 {
    if addr == self.reset_addr() {
      if let Some(code) = self.reset_script.pop_front() {
        return code;
      }
    }
    self.mem.get(&addr).copied().unwrap_or(0)
  }

  fn on_write(&mut self, data: &[u8]) {
    assert!(data[0] & 0x80 != 0, "write without direction bit");
    if data[0] == 0xFF && data.len() == 3 {
      self.page = (u32::from(data[1]) << 15) | (u32::from(data[2]) << 7);
      return;
    }

    let addr = self.page | u32::from(data[0] & 0x7F);
    self.writes.push((addr, data[1..].to_vec()));
    for (i, b) in data[1..].iter().enumerate() {
      self.store(addr + i as u32, *b);
    }

    let first = data.get(1).copied();
    if addr == self.map.boot_rdy && first == Some(1) {
      let code = self.boot_code;
      let reset = self.reset_addr();
      self.mem.insert(reset, code);
    }
    if addr == self.map.event_buf + 0x50 && first == Some(0x22) {
      let status = 0xA0 | self.pipe;
      self.mem.insert(self.map.event_buf + 0x51, status);
    }
    if SWRST_ADDRS.contains(&addr) && first == Some(0x69) {
      let reset = self.reset_addr();
      self.mem.insert(reset, 0);
    }
  }

  fn on_transfer(&mut self, read: &mut [u8], write: &[u8]) {
    assert!(write[0] & 0x80 == 0, "read with direction bit");
    let addr = self.page | u32::from(write[0]);
    for (i, slot) in read.iter_mut().enumerate() {
      *slot = if i < 2 { 0 } else { self.load(addr + (i - 2) as u32) };
    }
  }
}

/// Shared handle to the simulated controller.
#[derive(Clone)]
pub(crate) struct Sim(Rc<RefCell<State>>);

impl Sim {
  pub fn new() -> Self {
    let sim = Self::for_variant(DeviceVariant::Nt36523);
    sim.set_trim(0x3F004, [0x17, 0xAA, 0xBB, 0x23, 0x65, 0x03]);
    sim
  }

  pub fn for_variant(variant: DeviceVariant) -> Self {
    let map = variant.memory_map();
    let sim = Self(Rc::new(RefCell::new(State {
      map,
      mem: BTreeMap::new(),
      read_only: Vec::new(),
      page: 0,
      fail_next: 0,
      transfers: 0,
      frames: Vec::new(),
      writes: Vec::new(),
      reset_script: VecDeque::new(),
      boot_code: 0xA3,
      pipe: 0,
      rst: Vec::new(),
      pwr: Vec::new(),
      delay_ns: 0,
    })));
    sim.poke(map.event_buf + 0x78, &[0x05, 0xFA, 4, 3, 0x04, 0x38, 0x09, 0x60, 0, 0, 0]);
    sim.poke(map.event_buf + 0x9A, &[0x34, 0x12]);
    sim
  }

  pub fn poke(&self, addr: u32, data: &[u8]) {
    let mut st = self.0.borrow_mut();
    for (i, b) in data.iter().enumerate() {
      st.mem.insert(addr + i as u32, *b);
    }
  }

  pub fn peek(&self, addr: u32) -> u8 {
    self.0.borrow().mem.get(&addr).copied().unwrap_or(0)
  }

  /// Place a trim id the driver cannot overwrite.
  pub fn set_trim(&self, addr: u32, trim: [u8; 6]) {
    self.poke(addr, &trim);
    self.0.borrow_mut().read_only.push((addr, addr + 6));
  }

  pub fn set_reset_code(&self, code: u8) {
    let addr = self.0.borrow().reset_addr();
    self.poke(addr, &[code]);
  }

  pub fn script_reset_codes(&self, codes: &[u8]) {
    self.0.borrow_mut().reset_script.extend(codes.iter().copied());
  }

  /// Reset code published when the host sets boot-ready.
  pub fn set_boot_code(&self, code: u8) {
    self.0.borrow_mut().boot_code = code;
  }

  pub fn set_pipe(&self, pipe: u8) {
    self.0.borrow_mut().pipe = pipe;
  }

  pub fn fail_next(&self, n: usize) {
    self.0.borrow_mut().fail_next = n;
  }

  pub fn transfers(&self) -> usize {
    self.0.borrow().transfers
  }

  /// Outgoing bytes of every successful transaction.
  pub fn frames(&self) -> Vec<Vec<u8>> {
    self.0.borrow().frames.clone()
  }

  pub fn last_frame(&self) -> Vec<u8> {
    self.0.borrow().frames.last().cloned().unwrap_or_default()
  }

  /// Payloads of the register writes that started at `addr`.
  pub fn writes_to(&self, addr: u32) -> Vec<Vec<u8>> {
    self
      .0
      .borrow()
      .writes
      .iter()
      .filter(|(at, _)| *at == addr)
      .map(|(_, data)| data.clone())
      .collect()
  }

  pub fn delayed_ms(&self) -> u64 {
    self.0.borrow().delay_ns / 1_000_000
  }

  pub fn rst_levels(&self) -> Vec<bool> {
    self.0.borrow().rst.clone()
  }

  pub fn pwr_levels(&self) -> Vec<bool> {
    self.0.borrow().pwr.clone()
  }

  fn pin(&self, line: Line) -> SimPin {
    SimPin { state: self.0.clone(), line }
  }

  fn delay(&self) -> SimDelay {
    SimDelay(self.0.clone())
  }
}

impl spi::ErrorType for Sim {
  type Error = SimError;
}

impl SpiDevice<u8> for Sim {
  async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
    let mut st = self.0.borrow_mut();
    st.transfers += 1;
    if st.fail_next > 0 {
      st.fail_next -= 1;
      return Err(SimError);
    }

    for op in operations.iter_mut() {
      match op {
        Operation::Write(data) => {
          st.frames.push(data.to_vec());
          st.on_write(data);
        }
        Operation::Transfer(read, write) => {
          st.frames.push(write.to_vec());
          st.on_transfer(read, write);
        }
        Operation::TransferInPlace(buf) => {
          let write = buf.to_vec();
          st.frames.push(write.clone());
          st.on_transfer(buf, &write);
        }
        Operation::Read(buf) => buf.fill(0),
        Operation::DelayNs(_) => {}
      }
    }
    Ok(())
  }
}

#[derive(Clone, Copy)]
enum Line {
  Rst,
  Pwr,
}

pub(crate) struct SimPin {
  state: Rc<RefCell<State>>,
  line: Line,
}

impl SimPin {
  fn record(&mut self, level: bool) {
    let mut st = self.state.borrow_mut();
    match self.line {
      Line::Rst => st.rst.push(level),
      Line::Pwr => st.pwr.push(level),
    }
  }
}

impl PinErrorType for SimPin {
  type Error = Infallible;
}

impl OutputPin for SimPin {
  fn set_low(&mut self) -> Result<(), Infallible> {
    self.record(false);
    Ok(())
  }

  fn set_high(&mut self) -> Result<(), Infallible> {
    self.record(true);
    Ok(())
  }
}

pub(crate) struct SimDelay(Rc<RefCell<State>>);

impl DelayNs for SimDelay {
  async fn delay_ns(&mut self, ns: u32) {
    self.0.borrow_mut().delay_ns += u64::from(ns);
  }

  async fn delay_ms(&mut self, ms: u32) {
    self.0.borrow_mut().delay_ns += u64::from(ms) * 1_000_000;
  }
}

pub(crate) type SimDevice = Nt36xxx<Sim, SimPin, SimPin, SimDelay>;

pub(crate) fn device(sim: &Sim) -> SimDevice {
  device_with(sim, Config::default())
}

pub(crate) fn device_with(sim: &Sim, config: Config) -> SimDevice {
  Nt36xxx::new(sim.clone(), Some(sim.pin(Line::Rst)), Some(sim.pin(Line::Pwr)), sim.delay(), config)
}

/// Unidentified driver with the bus powered, as right after rail-up.
pub(crate) fn powered(sim: &Sim) -> SimDevice {
  let mut dev = device(sim);
  dev.bus.set_power(PowerStatus::On);
  dev
}

/// Driver already attached to an NT36523 and powered on, with no traffic yet.
pub(crate) fn identified(sim: &Sim) -> SimDevice {
  identified_with(sim, Config::default())
}

pub(crate) fn identified_with(sim: &Sim, config: Config) -> SimDevice {
  identified_as(sim, DeviceVariant::Nt36523, config)
}

pub(crate) fn identified_as(sim: &Sim, variant: DeviceVariant, config: Config) -> SimDevice {
  let mut dev = device_with(sim, config);
  dev.attach(DeviceIdentity { trim: [0; 6], variant, location: TrimLocation::Current });
  dev.bus.set_power(PowerStatus::On);
  dev
}
