//! Port dispatch and ROM paging across the peripheral chain.

mod support;

use std::any::Any;
use std::sync::{Arc, Mutex};

use emu_core::Memory;
use emu_spectrum::{
    BusCtx, KempstonButtons, PAGE_OUT, Peripheral, PeripheralChain, PeripheralKind, PortMatch,
    PortRead, ShadowRom, Spectrum, SpectrumConfig, SpectrumModel,
};

type CallLog = Arc<Mutex<Vec<&'static str>>>;

struct Controller;

impl Peripheral for Controller {
    fn name(&self) -> &'static str {
        "controller"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Answers and logs every access on its ports.
struct Driver {
    name: &'static str,
    ports: PortMatch,
    read: PortRead,
    log: CallLog,
}

impl Driver {
    fn boxed(name: &'static str, ports: PortMatch, read: PortRead, log: &CallLog) -> Box<Self> {
        Box::new(Self {
            name,
            ports,
            read,
            log: Arc::clone(log),
        })
    }
}

impl Peripheral for Driver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn in_match(&self) -> Option<PortMatch> {
        Some(self.ports)
    }

    fn out_match(&self) -> Option<PortMatch> {
        Some(self.ports)
    }

    fn input(&mut self, _ctx: &mut BusCtx<'_>, _port: u16) -> PortRead {
        self.log.lock().unwrap().push(self.name);
        self.read
    }

    fn output(&mut self, _ctx: &mut BusCtx<'_>, _port: u16, _value: u8) {
        self.log.lock().unwrap().push(self.name);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn read_merges_every_matching_device() {
    let log = CallLog::default();
    let mut memory = Memory::new();
    let mut chain = PeripheralChain::new(Box::new(Controller));
    chain.attach(Driver::boxed("keys", PortMatch::ALL, PortRead::bits(0x00, 0x1F), &log));
    chain.attach(Driver::boxed(
        "joystick",
        PortMatch::new(0x00E0, 0x0000),
        PortRead::bits(0x00, 0x20),
        &log,
    ));

    let read = chain.input(&mut memory, 0, 0.0, 0x0010);
    assert_eq!(read.resolve(0xFF), 0xC0);
    assert_eq!(read.driven, 0x3F);
    assert_eq!(*log.lock().unwrap(), ["keys", "joystick"]);

    // A5 high: only the catch-all device answers.
    let read = chain.input(&mut memory, 0, 0.0, 0x00FE);
    assert_eq!(read.resolve(0xFF), 0xE0);
    assert_eq!(read.resolve(0x00), 0x00);
}

#[test]
fn attach_order_is_dispatch_order() {
    for names in [["first", "second"], ["second", "first"]] {
        let log = CallLog::default();
        let mut memory = Memory::new();
        let mut chain = PeripheralChain::new(Box::new(Controller));
        for name in names {
            chain.attach(Driver::boxed(name, PortMatch::ALL, PortRead::NONE, &log));
        }
        chain.output(&mut memory, 0, 0.0, 0x1234, 0x00);
        assert_eq!(*log.lock().unwrap(), names);
    }
}

#[test]
fn detached_device_stops_answering() {
    let log = CallLog::default();
    let mut memory = Memory::new();
    let mut chain = PeripheralChain::new(Box::new(Controller));
    chain.attach(Driver::boxed("keys", PortMatch::ALL, PortRead::byte(0x12), &log));
    assert_eq!(chain.input(&mut memory, 0, 0.0, 0x00FE).resolve(0xFF), 0x12);

    assert!(chain.detach(&mut memory, 0, "keys").is_some());
    assert!(chain.detach(&mut memory, 0, "keys").is_none());
    assert_eq!(chain.input(&mut memory, 0, 0.0, 0x00FE), PortRead::NONE);
    assert_eq!(chain.names().collect::<Vec<_>>(), ["controller"]);
}

#[test]
fn machine_chain_order() {
    let config = support::config(&[])
        .with_peripheral(PeripheralKind::Kempston)
        .with_peripheral(PeripheralKind::TapeDeck);
    let spectrum = Spectrum::new(config).unwrap();
    assert_eq!(
        spectrum.chain().names().collect::<Vec<_>>(),
        ["memory-48k", "ula", "beeper", "kempston", "tape"]
    );
}

#[test]
fn kempston_read_through_the_machine() {
    // IN A,($1F); HALT
    let config = support::config(&[(0x0000, &[0xDB, 0x1F, 0x76])])
        .with_peripheral(PeripheralKind::Kempston);
    let mut spectrum = Spectrum::new(config).unwrap();
    spectrum.set_joystick(KempstonButtons::FIRE | KempstonButtons::UP, true);
    spectrum.step();
    assert_eq!(spectrum.registers().a, 0x18);
}

#[test]
fn keyboard_and_ear_bits_through_the_machine() {
    // LD A,$FE; IN A,($FE); HALT
    let mut spectrum = support::machine(&[(0x0000, &[0x3E, 0xFE, 0xDB, 0xFE, 0x76])]);
    spectrum.set_key(emu_spectrum::SpectrumKey::Z, true);
    spectrum.step();
    spectrum.step();
    // Row $FE: CAPS SHIFT, Z, X, C, V. Z is bit 1. Bits 5 and 7 float high.
    assert_eq!(spectrum.registers().a & 0x1F, 0x1D);
    assert_eq!(spectrum.registers().a & 0xA0, 0xA0);
}

/// LD SP,$8000; RST 8 in the base ROM, HALT at the return address.
const BASE: &[support::Patch<'static>] = &[(0x0000, &[0x31, 0x00, 0x80, 0xCF, 0x76])];

/// JP $0700 at the restart, RET at the page-out address.
const SHADOW: &[support::Patch<'static>] = &[(0x0008, &[0xC3, 0x00, 0x07]), (PAGE_OUT, &[0xC9])];

#[test]
fn shadow_rom_pages_in_on_restart_and_out_at_exit() {
    let mut spectrum = support::machine_with_shadow_rom(BASE, SHADOW);
    spectrum.step();
    spectrum.step();
    assert_eq!(spectrum.registers().pc, 0x0008);
    assert!(!spectrum.peripheral::<ShadowRom>().unwrap().is_paged());
    assert_eq!(spectrum.memory().peek(0x0000), 0x31);

    // Fetching $0008 pages in and runs the shadow ROM's own opcode.
    spectrum.step();
    assert!(spectrum.peripheral::<ShadowRom>().unwrap().is_paged());
    assert_eq!(spectrum.registers().pc, 0x0700);
    assert_eq!(spectrum.memory().peek(0x0008), 0xC3);
    assert_eq!(spectrum.memory().peek(0x2008), 0xC3, "mirrored");

    // The opcode at $0700 still comes from the shadow ROM.
    spectrum.step();
    assert!(!spectrum.peripheral::<ShadowRom>().unwrap().is_paged());
    assert_eq!(spectrum.registers().pc, 0x0004);
    assert_eq!(spectrum.memory().peek(0x0000), 0x31);
    assert_eq!(spectrum.memory().peek(0x0008), 0x00);
}

#[test]
fn detaching_a_paged_shadow_rom_restores_the_base_rom() {
    let mut spectrum = support::machine_with_shadow_rom(BASE, SHADOW);
    for _ in 0..3 {
        spectrum.step();
    }
    assert_eq!(spectrum.memory().peek(0x0008), 0xC3);

    assert!(spectrum.detach("shadow-rom").is_some());
    assert_eq!(spectrum.memory().peek(0x0000), 0x31);
    assert_eq!(spectrum.memory().peek(0x0008), 0x00);
    assert!(!spectrum.chain().names().any(|name| name == "shadow-rom"));
}

#[test]
fn reset_pages_the_shadow_rom_out() {
    let mut spectrum = support::machine_with_shadow_rom(BASE, SHADOW);
    for _ in 0..3 {
        spectrum.step();
    }
    spectrum.reset();
    assert!(!spectrum.peripheral::<ShadowRom>().unwrap().is_paged());
    assert_eq!(spectrum.registers().pc, 0x0000);
    assert_eq!(spectrum.memory().peek(0x0000), 0x31);
}

#[test]
fn shadow_rom_pages_in_over_either_128k_rom() {
    let mut rom = vec![0u8; 0x8000];
    // ROM 0: LD BC,$7FFD; LD A,$10; OUT (C),A selects ROM 1.
    rom[..7].copy_from_slice(&[0x01, 0xFD, 0x7F, 0x3E, 0x10, 0xED, 0x79]);
    // ROM 1 carries on: LD SP,$8000; RST 8; HALT
    rom[0x4007..0x400C].copy_from_slice(&[0x31, 0x00, 0x80, 0xCF, 0x76]);
    let config = SpectrumConfig::new(SpectrumModel::Spectrum128K, rom)
        .with_shadow_rom(support::shadow_rom_with(SHADOW))
        .with_peripheral(PeripheralKind::ShadowRom);
    let mut spectrum = Spectrum::new(config).unwrap();

    for _ in 0..5 {
        spectrum.step();
    }
    assert_eq!(spectrum.registers().pc, 0x0008);
    assert_eq!(spectrum.memory().peek(0x0007), 0x31, "ROM 1 selected");

    spectrum.step();
    assert!(spectrum.peripheral::<ShadowRom>().unwrap().is_paged());
    assert_eq!(spectrum.registers().pc, 0x0700);

    spectrum.step();
    assert!(!spectrum.peripheral::<ShadowRom>().unwrap().is_paged());
    assert_eq!(spectrum.registers().pc, 0x000B);
    assert_eq!(spectrum.memory().peek(0x0007), 0x31, "back to ROM 1");
}
