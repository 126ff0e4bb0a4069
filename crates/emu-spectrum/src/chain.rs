//! Peripheral daisy chain.
//!
//! Devices sit in an ordered list that mirrors the expansion bus. Link 0 is
//! always the memory controller. Port accesses visit every matching link in
//! order; ROM paging requests travel only to the link immediately upstream,
//! which decides whether to act on them or pass them further up.
//!
//! # Port reads
//!
//! Bits are active low. Each matching device ANDs its byte into a running
//! value that starts at `$FF` and records which bits it drove. A device may
//! also hold a bit weakly, like a pull resistor: the weak level shows only
//! when no device drives that bit. Bits nobody drives or holds take the
//! floating-bus byte.

use std::any::Any;

use emu_core::{Memory, Source};
use serde::de::DeserializeOwned;
use zilog_z80::Registers;

use crate::error::SnapshotError;
use crate::snapshot::DeviceState;

/// Port address pattern: matches when `port & mask == bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMatch {
    pub mask: u16,
    pub bits: u16,
}

impl PortMatch {
    /// Every port.
    pub const ALL: Self = Self { mask: 0, bits: 0 };

    /// # Panics
    ///
    /// Panics if `bits` has a bit outside `mask`; such a pattern never matches.
    #[must_use]
    pub const fn new(mask: u16, bits: u16) -> Self {
        assert!(bits & !mask == 0, "port pattern bits outside mask");
        Self { mask, bits }
    }

    #[must_use]
    pub const fn matches(self, port: u16) -> bool {
        port & self.mask == self.bits
    }

    const fn is_valid(self) -> bool {
        self.bits & !self.mask == 0
    }
}

/// A device's answer to a port read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRead {
    /// Bits the device pulls low are 0; all others 1.
    pub value: u8,
    /// Bits the device actually drives.
    pub driven: u8,
    /// Levels of the weakly held bits; 1 elsewhere.
    pub weak_value: u8,
    /// Bits held weakly, overridden by any driver.
    pub weak: u8,
}

impl PortRead {
    /// Drives nothing.
    pub const NONE: Self = Self {
        value: 0xFF,
        driven: 0,
        weak_value: 0xFF,
        weak: 0,
    };

    /// Drive every bit with `value`.
    #[must_use]
    pub const fn byte(value: u8) -> Self {
        Self {
            value,
            driven: 0xFF,
            ..Self::NONE
        }
    }

    /// Drive only the bits in `driven`, taking their levels from `value`.
    #[must_use]
    pub const fn bits(value: u8, driven: u8) -> Self {
        Self {
            value: value | !driven,
            driven,
            ..Self::NONE
        }
    }

    /// Also hold the bits in `weak` at the levels in `value`.
    #[must_use]
    pub const fn hold(self, value: u8, weak: u8) -> Self {
        Self {
            weak_value: self.weak_value & (value | !weak),
            weak: self.weak | weak,
            ..self
        }
    }

    /// Combine with another device on the same access.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            value: self.value & other.value,
            driven: self.driven | other.driven,
            weak_value: self.weak_value & other.weak_value,
            weak: self.weak | other.weak,
        }
    }

    /// Final byte: undriven bits take the weak level if held, otherwise
    /// `floating`.
    #[must_use]
    pub const fn resolve(self, floating: u8) -> u8 {
        let undriven = (self.weak_value & self.weak) | (floating & !self.weak);
        self.value & (undriven | self.driven)
    }
}

/// What a link sees of the machine during a callback.
pub struct BusCtx<'a> {
    pub memory: &'a mut Memory,
    /// Links before this one, nearest last.
    upstream: &'a mut [Box<dyn Peripheral>],
    /// Cycle of the access within the current frame.
    pub cc: i32,
    /// Seconds since the start of the current audio block.
    pub time: f64,
}

impl<'a> BusCtx<'a> {
    /// Context for a callback with no upstream links (tests and host tools).
    pub fn detached(memory: &'a mut Memory, cc: i32, time: f64) -> Self {
        Self {
            memory,
            upstream: &mut [],
            cc,
            time,
        }
    }

    /// Ask the previous link to show (or hide) its ROM.
    pub fn set_upstream_rom_visible(&mut self, visible: bool) {
        if let Some((prev, rest)) = self.upstream.split_last_mut() {
            log::debug!(
                "chain: rom {} requested of {}",
                if visible { "shown" } else { "hidden" },
                prev.name()
            );
            let mut ctx = BusCtx {
                memory: &mut *self.memory,
                upstream: rest,
                cc: self.cc,
                time: self.time,
            };
            prev.set_rom_visible(&mut ctx, visible);
        }
    }
}

/// A device on the expansion bus.
///
/// Every hook has a default, so a device implements only what it decodes.
pub trait Peripheral: Send {
    /// Stable name, used in snapshots and lookups.
    fn name(&self) -> &'static str;

    fn in_match(&self) -> Option<PortMatch> {
        None
    }

    fn out_match(&self) -> Option<PortMatch> {
        None
    }

    fn input(&mut self, _ctx: &mut BusCtx<'_>, _port: u16) -> PortRead {
        PortRead::NONE
    }

    fn output(&mut self, _ctx: &mut BusCtx<'_>, _port: u16, _value: u8) {}

    /// A downstream link asks this one to show or hide its ROM. Links that
    /// own no ROM pass the request on.
    fn set_rom_visible(&mut self, ctx: &mut BusCtx<'_>, visible: bool) {
        ctx.set_upstream_rom_visible(visible);
    }

    /// Storage the display fetches from, at its first byte. Only memory
    /// controllers answer.
    fn screen(&self) -> Option<Source> {
        None
    }

    fn power_on(&mut self, _ctx: &mut BusCtx<'_>) {}

    fn reset(&mut self, _ctx: &mut BusCtx<'_>) {}

    /// The device is leaving the chain; release anything it overrides.
    fn detach(&mut self, _ctx: &mut BusCtx<'_>) {}

    /// The frame ended at `cc`; counters move back by `frame_cycles`.
    fn frame_end(&mut self, _cc: i32, _frame_cycles: i32) {}

    /// An audio block of `time` seconds ended.
    fn audio_block_end(&mut self, _time: f64) {}

    /// Opcode fetched at a `PATCH_ON_EXEC` cell; return the opcode to run.
    fn patch_opcode(
        &mut self,
        _ctx: &mut BusCtx<'_>,
        _regs: &mut Registers,
        _pc: u16,
        opcode: u8,
    ) -> u8 {
        opcode
    }

    /// Read of an `MMIO_READ` cell. `None` if this device does not own it.
    fn mmio_read(&mut self, _ctx: &mut BusCtx<'_>, _addr: u16) -> Option<u8> {
        None
    }

    /// Write to an `MMIO_WRITE` cell. `false` if this device does not own it.
    fn mmio_write(&mut self, _ctx: &mut BusCtx<'_>, _addr: u16, _value: u8) -> bool {
        false
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Decode a saved payload without touching the device.
    fn decode_state(&self, _state: &serde_json::Value) -> Result<Box<dyn Any>, serde_json::Error> {
        Ok(Box::new(()))
    }

    /// Install a payload from `decode_state` and rebuild page mappings.
    fn apply_state(&mut self, _ctx: &mut BusCtx<'_>, _state: Box<dyn Any>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Decode a JSON payload into a boxed `T`, for `Peripheral::decode_state`.
pub fn decode_state<T: DeserializeOwned + 'static>(
    state: &serde_json::Value,
) -> Result<Box<dyn Any>, serde_json::Error> {
    Ok(Box::new(T::deserialize(state)?))
}

/// The ordered list of attached devices.
pub struct PeripheralChain {
    links: Vec<Box<dyn Peripheral>>,
}

impl PeripheralChain {
    /// A chain whose first link is the memory controller.
    #[must_use]
    pub fn new(controller: Box<dyn Peripheral>) -> Self {
        let mut chain = Self { links: Vec::new() };
        chain.push(controller);
        chain
    }

    fn push(&mut self, device: Box<dyn Peripheral>) {
        for pattern in [device.in_match(), device.out_match()].into_iter().flatten() {
            assert!(
                pattern.is_valid(),
                "{}: port pattern bits {:04X} outside mask {:04X}",
                device.name(),
                pattern.bits,
                pattern.mask
            );
        }
        log::info!("chain: attached {} at link {}", device.name(), self.links.len());
        self.links.push(device);
    }

    /// Append a device at the end of the chain. It is not powered on.
    pub fn attach(&mut self, device: Box<dyn Peripheral>) -> usize {
        self.push(device);
        self.links.len() - 1
    }

    /// Remove the named device, letting it release its overrides first.
    ///
    /// # Panics
    ///
    /// Panics on an attempt to detach the memory controller.
    pub fn detach(&mut self, memory: &mut Memory, cc: i32, name: &str) -> Option<Box<dyn Peripheral>> {
        let index = self.position(name)?;
        assert!(index != 0, "the memory controller cannot be detached");
        self.with_link(index, memory, cc, 0.0, |link, ctx| link.detach(ctx));
        log::info!("chain: detached {name} from link {index}");
        Some(self.links.remove(index))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link names in chain order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.links.iter().map(|link| link.name())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.links.iter().position(|link| link.name() == name)
    }

    /// First link of type `T`.
    #[must_use]
    pub fn get<T: Peripheral + 'static>(&self) -> Option<&T> {
        self.links
            .iter()
            .find_map(|link| link.as_any().downcast_ref::<T>())
    }

    /// First link of type `T`, mutably.
    pub fn get_mut<T: Peripheral + 'static>(&mut self) -> Option<&mut T> {
        self.links
            .iter_mut()
            .find_map(|link| link.as_any_mut().downcast_mut::<T>())
    }

    /// Run `f` on link `index` with the links before it as upstream.
    fn with_link<R>(
        &mut self,
        index: usize,
        memory: &mut Memory,
        cc: i32,
        time: f64,
        f: impl FnOnce(&mut dyn Peripheral, &mut BusCtx<'_>) -> R,
    ) -> R {
        let (upstream, rest) = self.links.split_at_mut(index);
        let link = &mut rest[0];
        let mut ctx = BusCtx {
            memory,
            upstream,
            cc,
            time,
        };
        f(link.as_mut(), &mut ctx)
    }

    /// Collect the answers of every device matching `port`.
    pub fn input(&mut self, memory: &mut Memory, cc: i32, time: f64, port: u16) -> PortRead {
        let mut read = PortRead::NONE;
        for index in 0..self.links.len() {
            if self.links[index].in_match().is_some_and(|m| m.matches(port)) {
                let answer = self.with_link(index, memory, cc, time, |link, ctx| link.input(ctx, port));
                read = read.merge(answer);
            }
        }
        read
    }

    /// Deliver a write to every device matching `port`, in chain order.
    pub fn output(&mut self, memory: &mut Memory, cc: i32, time: f64, port: u16, value: u8) {
        for index in 0..self.links.len() {
            if self.links[index].out_match().is_some_and(|m| m.matches(port)) {
                self.with_link(index, memory, cc, time, |link, ctx| link.output(ctx, port, value));
            }
        }
    }

    /// Offer a patched opcode to every link in turn; each sees the previous
    /// link's substitution.
    pub fn patch_opcode(
        &mut self,
        memory: &mut Memory,
        cc: i32,
        regs: &mut Registers,
        pc: u16,
        opcode: u8,
    ) -> u8 {
        let mut opcode = opcode;
        for index in 0..self.links.len() {
            opcode = self.with_link(index, memory, cc, 0.0, |link, ctx| {
                link.patch_opcode(ctx, regs, pc, opcode)
            });
        }
        opcode
    }

    pub fn mmio_read(&mut self, memory: &mut Memory, cc: i32, addr: u16) -> Option<u8> {
        (0..self.links.len())
            .find_map(|index| self.with_link(index, memory, cc, 0.0, |link, ctx| link.mmio_read(ctx, addr)))
    }

    pub fn mmio_write(&mut self, memory: &mut Memory, cc: i32, addr: u16, value: u8) -> bool {
        (0..self.links.len()).any(|index| {
            self.with_link(index, memory, cc, 0.0, |link, ctx| link.mmio_write(ctx, addr, value))
        })
    }

    /// Display storage reported by the first link that owns one, or
    /// `Source::Unmapped` to read through the page table.
    #[must_use]
    pub fn screen(&self) -> Source {
        self.links
            .iter()
            .find_map(|link| link.screen())
            .unwrap_or(Source::Unmapped)
    }

    pub fn power_on(&mut self, memory: &mut Memory, cc: i32) {
        for index in 0..self.links.len() {
            self.with_link(index, memory, cc, 0.0, |link, ctx| {
                log::info!("chain: power on {}", link.name());
                link.power_on(ctx);
            });
        }
    }

    /// Power on a single link, for devices attached to a running machine.
    pub fn power_on_link(&mut self, index: usize, memory: &mut Memory, cc: i32) {
        self.with_link(index, memory, cc, 0.0, |link, ctx| {
            log::info!("chain: power on {}", link.name());
            link.power_on(ctx);
        });
    }

    pub fn reset(&mut self, memory: &mut Memory, cc: i32, time: f64) {
        for index in 0..self.links.len() {
            self.with_link(index, memory, cc, time, |link, ctx| {
                log::info!("chain: reset {}", link.name());
                link.reset(ctx);
            });
        }
    }

    pub fn frame_end(&mut self, cc: i32, frame_cycles: i32) {
        for link in &mut self.links {
            link.frame_end(cc, frame_cycles);
        }
    }

    pub fn audio_block_end(&mut self, time: f64) {
        for link in &mut self.links {
            link.audio_block_end(time);
        }
    }

    /// Every device's saved payload, in chain order.
    #[must_use]
    pub fn save_states(&self) -> Vec<DeviceState> {
        self.links
            .iter()
            .map(|link| DeviceState {
                name: link.name().to_string(),
                state: link.save_state(),
            })
            .collect()
    }

    /// Decode every payload in `states` without changing any device.
    pub fn stage_states(&self, states: &[DeviceState]) -> Result<Vec<Box<dyn Any>>, SnapshotError> {
        if states.len() != self.links.len() {
            return Err(SnapshotError::DeviceCount {
                expected: self.links.len(),
                found: states.len(),
            });
        }
        self.links
            .iter()
            .zip(states)
            .enumerate()
            .map(|(index, (link, saved))| {
                if saved.name != link.name() {
                    return Err(SnapshotError::DeviceName {
                        index,
                        expected: link.name().to_string(),
                        found: saved.name.clone(),
                    });
                }
                link.decode_state(&saved.state)
                    .map_err(|e| SnapshotError::DeviceState {
                        name: saved.name.clone(),
                        cause: e.to_string(),
                    })
            })
            .collect()
    }

    /// Install staged payloads in chain order.
    pub fn apply_states(&mut self, memory: &mut Memory, cc: i32, staged: Vec<Box<dyn Any>>) {
        for (index, state) in staged.into_iter().enumerate() {
            self.with_link(index, memory, cc, 0.0, |link, ctx| link.apply_state(ctx, state));
        }
    }
}
