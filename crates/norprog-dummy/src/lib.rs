//! norprog-dummy - In-memory emulated SPI NOR chip
//!
//! [`EmulatedChip`] implements [`Transport`] by decoding each frame with the
//! opcode table of a [`FlashDescriptor`] and applying it to a byte array.
//! It behaves like a real part where that matters to the engine: programming
//! only clears bits and wraps within the page, erase sets bytes to 0xFF,
//! program and erase need the write-enable latch, and the busy bit stays set
//! for a configurable number of status polls.
//!
//! Faults can be injected per opcode to exercise the engine's retry logic.

use norprog_core::chip::FlashDescriptor;
use norprog_core::spi::{SpiConfig, StatusRegister, ADDRESS_BYTES};
use norprog_core::transport::{Transport, TransportError};

/// Status register bits a write-status command may change
const WRITABLE_STATUS: StatusRegister = StatusRegister::BP0
    .union(StatusRegister::BP1)
    .union(StatusRegister::BP2)
    .union(StatusRegister::TB)
    .union(StatusRegister::SEC)
    .union(StatusRegister::SRP);

/// Kind of an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The transfer fails with a transport error
    Fail,
    /// The transfer returns one byte less than it was sent
    Truncate,
}

#[derive(Debug, Clone)]
struct Fault {
    opcode: u8,
    address: Option<u32>,
    remaining: u32,
    kind: FaultKind,
}

type Hook = Box<dyn FnMut(&[u8]) + Send>;

/// Emulated SPI NOR flash chip
pub struct EmulatedChip {
    descriptor: FlashDescriptor,
    spi: SpiConfig,
    data: Vec<u8>,
    jedec_id: [u8; 3],
    protect: StatusRegister,
    write_enabled: bool,
    busy_polls: u32,
    busy_remaining: u32,
    stuck_busy: bool,
    faults: Vec<Fault>,
    log: Vec<Vec<u8>>,
    hook: Option<Hook>,
}

impl EmulatedChip {
    /// Create an erased chip matching `descriptor`
    pub fn new(descriptor: FlashDescriptor) -> Self {
        let data = vec![0xFF; descriptor.capacity as usize];
        let spi = SpiConfig::for_descriptor(&descriptor, None);
        let jedec_id = default_jedec_id(&descriptor);
        Self {
            descriptor,
            spi,
            data,
            jedec_id,
            protect: StatusRegister::empty(),
            write_enabled: false,
            busy_polls: 1,
            busy_remaining: 0,
            stuck_busy: false,
            faults: Vec::new(),
            log: Vec::new(),
            hook: None,
        }
    }

    /// Create a chip whose array starts with `initial`
    pub fn with_data(descriptor: FlashDescriptor, initial: &[u8]) -> Self {
        let mut chip = Self::new(descriptor);
        let len = initial.len().min(chip.data.len());
        chip.data[..len].copy_from_slice(&initial[..len]);
        chip
    }

    /// Override the 3 ID bytes
    pub fn with_jedec_id(mut self, id: [u8; 3]) -> Self {
        self.jedec_id = id;
        self
    }

    /// Number of status reads reporting busy after each program or erase
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Bus configuration the chip was attached with
    pub fn with_spi_config(mut self, spi: SpiConfig) -> Self {
        self.spi = spi;
        self
    }

    /// Bus configuration
    pub fn spi_config(&self) -> SpiConfig {
        self.spi
    }

    /// Descriptor the chip emulates
    pub fn descriptor(&self) -> &FlashDescriptor {
        &self.descriptor
    }

    /// Flash array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Flash array contents (mutable)
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the chip and return its array
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Fail the next `count` transfers carrying `opcode`
    pub fn fail_next(&mut self, opcode: u8, count: u32) {
        self.inject(opcode, None, count, FaultKind::Fail);
    }

    /// Fail the next `count` transfers carrying `opcode` at `address`
    pub fn fail_next_at(&mut self, opcode: u8, address: u32, count: u32) {
        self.inject(opcode, Some(address), count, FaultKind::Fail);
    }

    /// Truncate the responses of the next `count` transfers carrying `opcode`
    pub fn truncate_next(&mut self, opcode: u8, count: u32) {
        self.inject(opcode, None, count, FaultKind::Truncate);
    }

    /// Queue a fault
    pub fn inject(&mut self, opcode: u8, address: Option<u32>, count: u32, kind: FaultKind) {
        if count > 0 {
            self.faults.push(Fault {
                opcode,
                address,
                remaining: count,
                kind,
            });
        }
    }

    /// Keep the busy bit set forever (or release it)
    pub fn set_stuck_busy(&mut self, stuck: bool) {
        self.stuck_busy = stuck;
    }

    /// Call `hook` with every frame before it is executed
    pub fn set_hook(&mut self, hook: impl FnMut(&[u8]) + Send + 'static) {
        self.hook = Some(Box::new(hook));
    }

    /// Every frame received so far
    pub fn transfers(&self) -> &[Vec<u8>] {
        &self.log
    }

    /// Forget recorded frames
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Number of recorded frames carrying `opcode`
    pub fn count_opcode(&self, opcode: u8) -> usize {
        self.log.iter().filter(|frame| frame[0] == opcode).count()
    }

    /// Addresses of recorded frames carrying `opcode`, in order
    pub fn addresses_of(&self, opcode: u8) -> Vec<u32> {
        self.log
            .iter()
            .filter(|frame| frame[0] == opcode)
            .filter_map(|frame| frame_address(frame))
            .collect()
    }

    /// Returns true while a program or erase is in progress
    pub fn is_busy(&self) -> bool {
        self.stuck_busy || self.busy_remaining > 0
    }

    fn take_fault(&mut self, opcode: u8, address: Option<u32>) -> Option<FaultKind> {
        let index = self.faults.iter().position(|fault| {
            fault.opcode == opcode && (fault.address.is_none() || fault.address == address)
        })?;
        let fault = &mut self.faults[index];
        let kind = fault.kind;
        fault.remaining -= 1;
        if fault.remaining == 0 {
            self.faults.remove(index);
        }
        Some(kind)
    }

    fn status_byte(&mut self) -> u8 {
        let mut status = self.protect;
        status.set(StatusRegister::WEL, self.write_enabled);
        status.set(StatusRegister::BUSY, self.is_busy());
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
        }
        status.bits()
    }

    fn execute(&mut self, command: &[u8], response: &mut [u8]) -> Result<(), TransportError> {
        let opcode = command[0];
        let ins = self.descriptor.instructions;

        if opcode == ins.read_status {
            let status = self.status_byte();
            response[1..].fill(status);
            return Ok(());
        }
        if self.is_busy() {
            log::trace!("Ignoring opcode 0x{:02X} while busy", opcode);
            return Ok(());
        }

        if opcode == ins.read_id {
            for (slot, byte) in response[1..].iter_mut().zip(self.jedec_id.iter().cycle()) {
                *slot = *byte;
            }
        } else if opcode == ins.write_enable {
            self.write_enabled = true;
        } else if opcode == ins.write_disable {
            self.write_enabled = false;
        } else if opcode == ins.read_data {
            self.read(command, response, 0)?;
        } else if opcode == ins.fast_read {
            self.read(command, response, 1)?;
        } else if opcode == ins.page_program {
            self.program(command)?;
        } else if opcode == ins.sector_erase {
            let size = self.descriptor.sector_size;
            self.erase(command, size)?;
        } else if opcode == ins.block_erase {
            let size = self.descriptor.block_size;
            self.erase(command, size)?;
        } else if opcode == ins.chip_erase {
            if self.latch() {
                self.data.fill(0xFF);
            }
        } else if opcode == ins.write_status {
            if command.len() > 1 && self.latch() {
                self.protect = StatusRegister::from_bits_retain(command[1]) & WRITABLE_STATUS;
            }
        } else {
            return Err(TransportError::Other(format!(
                "unsupported opcode 0x{:02X}",
                opcode
            )));
        }
        Ok(())
    }

    /// Consume the write-enable latch and start a busy period
    fn latch(&mut self) -> bool {
        if !self.write_enabled {
            log::debug!("Write enable latch not set, command ignored");
            return false;
        }
        self.write_enabled = false;
        self.busy_remaining = self.busy_polls;
        true
    }

    fn read(&self, command: &[u8], response: &mut [u8], dummy: usize) -> Result<(), TransportError> {
        let address = required_address(command)?;
        let header = 1 + ADDRESS_BYTES + dummy;
        if command.len() < header {
            return Err(TransportError::Other("read frame too short".into()));
        }
        let capacity = self.data.len();
        let start = address as usize % capacity;
        // Reads past the end wrap to address 0 like real parts
        for (i, slot) in response[header..].iter_mut().enumerate() {
            *slot = self.data[(start + i) % capacity];
        }
        Ok(())
    }

    fn program(&mut self, command: &[u8]) -> Result<(), TransportError> {
        let address = required_address(command)?;
        if !self.latch() {
            return Ok(());
        }
        let page = self.descriptor.page_size as usize;
        let address = address as usize % self.data.len();
        let base = address - address % page;
        let offset = address % page;
        for (i, &byte) in command[1 + ADDRESS_BYTES..].iter().enumerate() {
            self.data[base + (offset + i) % page] &= byte;
        }
        Ok(())
    }

    fn erase(&mut self, command: &[u8], size: u32) -> Result<(), TransportError> {
        let address = required_address(command)?;
        if !self.latch() {
            return Ok(());
        }
        let size = size as usize;
        let address = address as usize % self.data.len();
        let start = address - address % size;
        let end = (start + size).min(self.data.len());
        self.data[start..end].fill(0xFF);
        Ok(())
    }
}

impl Transport for EmulatedChip {
    fn transfer(&mut self, command: &[u8]) -> Result<Vec<u8>, TransportError> {
        let Some(&opcode) = command.first() else {
            return Err(TransportError::Other("empty frame".into()));
        };
        self.log.push(command.to_vec());
        if let Some(hook) = self.hook.as_mut() {
            hook(command);
        }

        match self.take_fault(opcode, frame_address(command)) {
            Some(FaultKind::Fail) => {
                log::debug!("Injected failure on opcode 0x{:02X}", opcode);
                return Err(TransportError::Other(format!(
                    "injected failure on opcode 0x{:02X}",
                    opcode
                )));
            }
            Some(FaultKind::Truncate) => {
                log::debug!("Injected truncation on opcode 0x{:02X}", opcode);
                return Ok(vec![0; command.len() - 1]);
            }
            None => {}
        }

        let mut response = vec![0; command.len()];
        self.execute(command, &mut response)?;
        Ok(response)
    }
}

/// JEDEC ID from the descriptor; without a device ID, 0x40 and log2(capacity)
fn default_jedec_id(descriptor: &FlashDescriptor) -> [u8; 3] {
    let mfr = descriptor.manufacturer_id().unwrap_or(0xFF);
    let device = descriptor
        .device_id
        .unwrap_or(0x4000 | descriptor.capacity.trailing_zeros() as u16);
    let [hi, lo] = device.to_be_bytes();
    [mfr, hi, lo]
}

fn frame_address(command: &[u8]) -> Option<u32> {
    match command {
        [_, hi, mid, lo, ..] => Some(u32::from_be_bytes([0, *hi, *mid, *lo])),
        _ => None,
    }
}

fn required_address(command: &[u8]) -> Result<u32, TransportError> {
    frame_address(command).ok_or_else(|| {
        TransportError::Other(format!("opcode 0x{:02X} needs an address", command[0]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use norprog_core::chip::{builtin_descriptors, Region};
    use norprog_core::engine::{
        EnginePolicy, Outcome, ProgrammingEngine, Status, Worker, WriteOptions,
    };
    use norprog_core::spi::opcodes;
    use norprog_core::Error;
    use std::sync::{Arc, Mutex};

    const PAGE: usize = 256;
    const SECTOR: usize = 4096;

    /// W25Q64JV geometry shrunk to 64 KiB
    fn small() -> FlashDescriptor {
        let mut desc = builtin_descriptors().remove(0);
        desc.capacity = 0x1_0000;
        desc
    }

    fn engine_for(chip: EmulatedChip) -> ProgrammingEngine<EmulatedChip> {
        let desc = chip.descriptor().clone();
        ProgrammingEngine::new(chip, desc).unwrap().with_policy(
            EnginePolicy::default()
                .with_poll_interval(Duration::ZERO)
                .with_ready_timeout(Duration::from_millis(50)),
        )
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn read_back(engine: &mut ProgrammingEngine<EmulatedChip>, region: Region) -> Vec<u8> {
        let mut out = Vec::new();
        let outcome = engine
            .read_region(region, |chunk| out.extend_from_slice(chunk), |_| {})
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        out
    }

    #[test]
    fn test_read_jedec_id() {
        let mut engine = engine_for(EmulatedChip::new(builtin_descriptors().remove(0)));
        assert_eq!(engine.read_id().unwrap(), vec![0xEF, 0x40, 0x17]);

        let mut engine = engine_for(EmulatedChip::new(builtin_descriptors().remove(1)));
        assert_eq!(engine.read_id().unwrap(), vec![0xC2, 0x20, 0x16]);

        let mut engine = engine_for(EmulatedChip::new(small()).with_jedec_id([0xC8, 0x40, 0x15]));
        assert_eq!(engine.read_id().unwrap(), vec![0xC8, 0x40, 0x15]);
    }

    #[test]
    fn test_round_trip_sizes() {
        for len in [1, PAGE - 1, PAGE, PAGE + 1, 3 * PAGE] {
            for address in [0x2000u64, 0x2010] {
                let mut engine = engine_for(EmulatedChip::new(small()));
                let data = pattern(len, len as u8);

                let outcome = engine
                    .write_region(address, &data, WriteOptions::default())
                    .unwrap();
                assert_eq!(outcome, Outcome::Completed, "len {len} at {address:#x}");
                assert_eq!(read_back(&mut engine, Region::new(address, len)), data);
            }
        }
    }

    #[test]
    fn test_erase_sets_ff() {
        let mut engine = engine_for(EmulatedChip::with_data(small(), &[0u8; 0x1_0000]));

        let outcome = engine.erase_region(Region::new(0x1000 + 10, 20)).unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let data = engine.transport().data();
        assert!(data[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert_eq!(data[0x0FFF], 0x00);
        assert_eq!(data[0x2000], 0x00);
        assert_eq!(engine.transport().addresses_of(opcodes::SE_20), vec![0x1000]);
    }

    #[test]
    fn test_erase_spanning_sectors() {
        let mut engine = engine_for(EmulatedChip::with_data(small(), &[0u8; 0x1_0000]));
        engine
            .erase_region(Region::new(0x0FFF, 2 + SECTOR))
            .unwrap();
        assert_eq!(
            engine.transport().addresses_of(opcodes::SE_20),
            vec![0x0000, 0x1000, 0x2000]
        );
    }

    #[test]
    fn test_unaligned_write_preserves_leading_bytes() {
        let initial = pattern(0x1_0000, 7);
        let mut engine = engine_for(EmulatedChip::with_data(small(), &initial));
        let data = [0x11u8; 10];

        engine
            .write_region(0x1005, &data, WriteOptions::default())
            .unwrap();

        let flash = engine.transport().data();
        assert_eq!(&flash[0x1000..0x1005], &initial[0x1000..0x1005]);
        assert_eq!(&flash[0x1005..0x100F], &data);
        // The rest of the erased sector stays erased
        assert!(flash[0x100F..0x2000].iter().all(|&b| b == 0xFF));
        assert_eq!(&flash[0x2000..0x2100], &initial[0x2000..0x2100]);
    }

    #[test]
    fn test_leading_bytes_read_before_erase() {
        let mut engine = engine_for(EmulatedChip::with_data(small(), &pattern(0x1_0000, 3)));
        engine
            .write_region(0x1080, &[0u8; 4], WriteOptions::default())
            .unwrap();

        let log = engine.transport().transfers();
        let first_read = log.iter().position(|f| f[0] == opcodes::READ).unwrap();
        let first_erase = log.iter().position(|f| f[0] == opcodes::SE_20).unwrap();
        assert!(first_read < first_erase);
    }

    #[test]
    fn test_retry_recovers_from_two_failures() {
        let mut chip = EmulatedChip::new(small());
        chip.fail_next_at(opcodes::PP, 0x0100, 2);
        let mut engine = engine_for(chip);
        let data = pattern(3 * PAGE, 1);

        let outcome = engine
            .write_region(0, &data, WriteOptions::default())
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(engine.state().status(), Status::Completed);
        assert_eq!(read_back(&mut engine, Region::new(0, data.len())), data);
    }

    #[test]
    fn test_retry_exhausted_names_unit_address() {
        let mut chip = EmulatedChip::new(small());
        chip.fail_next_at(opcodes::PP, 0x0100, 3);
        let mut engine = engine_for(chip);

        let data = pattern(3 * PAGE, 1);

        let err = engine
            .write_region(0, &data, WriteOptions::default())
            .unwrap_err();
        assert_eq!(err.address(), Some(0x0100));
        assert_eq!(engine.state().status(), Status::Error);
        let message = engine.state().last_error().unwrap();
        assert!(message.contains("0x000100"), "{message}");

        // Units before the failing one are not rolled back
        assert_eq!(&engine.transport().data()[..PAGE], &data[..PAGE]);
        // The unit after it never started
        assert!(!engine.transport().addresses_of(opcodes::PP).contains(&0x0200));
    }

    #[test]
    fn test_read_recovers_from_two_failures() {
        let data = pattern(3 * PAGE, 7);
        let mut chip = EmulatedChip::with_data(small(), &data);
        chip.fail_next_at(opcodes::READ, 0x0100, 2);
        let mut engine = engine_for(chip);

        assert_eq!(read_back(&mut engine, Region::new(0, data.len())), data);
        assert_eq!(
            engine.transport().addresses_of(opcodes::READ),
            vec![0, 0x100, 0x100, 0x100, 0x200]
        );
        assert_eq!(engine.state().last_error(), None);
    }

    #[test]
    fn test_read_fails_after_three_failures() {
        let data = pattern(3 * PAGE, 7);
        let mut chip = EmulatedChip::with_data(small(), &data);
        chip.fail_next_at(opcodes::READ, 0x0100, 3);
        let mut engine = engine_for(chip);

        let mut chunks = Vec::new();
        let err = engine
            .read_region(
                Region::new(0, data.len()),
                |chunk| chunks.push(chunk.to_vec()),
                |_| {},
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnitFailed {
                operation: "read",
                address: 0x0100,
                ..
            }
        ));
        assert_eq!(err.address(), Some(0x0100));
        assert_eq!(chunks, vec![data[..PAGE].to_vec()]);

        let snap = engine.state().snapshot();
        assert_eq!(snap.status, Status::Error);
        assert!(snap.progress < 100);
        let message = snap.last_error.unwrap();
        assert!(message.contains("0x000100"), "{message}");
        // The chunk after the failing one is never requested
        assert!(!engine.transport().addresses_of(opcodes::READ).contains(&0x0200));
    }

    #[test]
    fn test_truncated_reads_are_retried() {
        let mut chip = EmulatedChip::with_data(small(), &[0x5A; 512]);
        chip.truncate_next(opcodes::READ, 2);
        let mut engine = engine_for(chip);
        assert_eq!(read_back(&mut engine, Region::new(0, 512)), vec![0x5A; 512]);
    }

    #[test]
    fn test_stuck_busy_fails_erase() {
        let mut chip = EmulatedChip::new(small());
        chip.set_stuck_busy(true);
        let mut engine = engine_for(chip);

        let err = engine.erase_region(Region::new(0x3000, 1)).unwrap_err();
        assert_eq!(err.address(), Some(0x3000));
        // Every attempt times out waiting for the busy bit
        assert_eq!(engine.transport().count_opcode(opcodes::SE_20), 3);
        assert_eq!(engine.state().status(), Status::Error);
    }

    #[test]
    fn test_verify_mismatch() {
        // Without erase, zeros already in the array cannot turn back into ones
        let mut engine = engine_for(EmulatedChip::with_data(small(), &[0u8; PAGE]));
        let options = WriteOptions {
            verify: true,
            auto_erase: false,
        };

        let err = engine.write_region(0, &[0xFF; 4], options).unwrap_err();
        assert!(matches!(err, Error::VerifyMismatch));
        assert_eq!(
            engine.state().last_error().as_deref(),
            Some("verification mismatch")
        );
        assert_eq!(engine.state().status(), Status::Error);
        assert!(engine.state().progress() < 100);
    }

    #[test]
    fn test_progress_monotonic_and_complete() {
        let mut engine = engine_for(EmulatedChip::new(small()));
        let mut seen = Vec::new();
        engine
            .read_region(Region::new(0, 5 * PAGE), |_| {}, |p| seen.push(p))
            .unwrap();

        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert_eq!(seen.iter().filter(|&&p| p == 100).count(), 1);
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(engine.state().progress(), 100);
        assert_eq!(engine.state().status(), Status::Completed);
    }

    #[test]
    fn test_progress_observed_during_write() {
        let mut engine = engine_for(EmulatedChip::new(small()));
        let samples: Arc<Mutex<Vec<(Status, u8)>>> = Arc::default();
        let sink = Arc::clone(&samples);
        let state = Arc::clone(engine.state());
        engine.transport_mut().set_hook(move |_| {
            if let Ok(mut sink) = sink.lock() {
                sink.push((state.status(), state.progress()));
            }
        });

        engine
            .write_region(0, &pattern(2 * SECTOR, 9), WriteOptions::default())
            .unwrap();

        let samples = samples.lock().unwrap();
        assert!(samples.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(samples.iter().all(|&(_, p)| p < 100));
        for phase in [Status::Erasing, Status::Writing, Status::Verifying] {
            assert!(samples.iter().any(|&(s, _)| s == phase), "{phase} not seen");
        }
        assert_eq!(engine.state().progress(), 100);
    }

    #[test]
    fn test_cancel_mid_write() {
        let mut engine = engine_for(EmulatedChip::new(small()));
        let state = Arc::clone(engine.state());
        let cancel_at = 0x0200u32;
        engine.transport_mut().set_hook(move |frame| {
            if frame[0] == opcodes::PP && frame_address(frame) == Some(cancel_at) {
                state.request_cancel();
            }
        });

        let data = pattern(4 * PAGE, 2);
        let outcome = engine
            .write_region(0, &data, WriteOptions::default())
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(engine.state().status(), Status::Cancelled);
        assert_eq!(engine.state().last_error(), None);
        assert!(engine.state().progress() < 100);

        // The in-flight page landed, nothing after it started
        let chip = engine.transport();
        assert_eq!(chip.addresses_of(opcodes::PP), vec![0x0000, 0x0100, 0x0200]);
        assert_eq!(&chip.data()[0x200..0x300], &data[0x200..0x300]);
        assert!(chip.data()[0x300..0x400].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_cancel_through_worker() {
        let mut chip = EmulatedChip::new(small());
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        chip.set_hook(move |frame| {
            if frame[0] == opcodes::SE_20 {
                // Hold the erase until the test has cancelled
                let _ = rx.recv();
            }
        });
        let worker = Worker::new(engine_for(chip));

        let handle = worker.erase(Region::new(0, 4 * SECTOR)).unwrap();
        assert!(handle.cancel());
        tx.send(()).unwrap();
        drop(tx);

        assert_eq!(handle.join().unwrap(), Outcome::Cancelled);
        assert_eq!(worker.state().status(), Status::Cancelled);
    }

    #[test]
    fn test_concrete_scenario() {
        let desc = small();
        assert_eq!(desc.page_size, 256);
        assert_eq!(desc.sector_size, 4096);
        let mut engine = engine_for(EmulatedChip::new(desc));
        let data = pattern(300, 0x42);

        let outcome = engine
            .write_region(4096, &data, WriteOptions::default())
            .unwrap();
        assert_eq!(outcome, Outcome::Completed);

        let chip = engine.transport();
        assert_eq!(chip.addresses_of(opcodes::SE_20), vec![4096]);
        let programs: Vec<_> = chip
            .transfers()
            .iter()
            .filter(|f| f[0] == opcodes::PP)
            .map(|f| (frame_address(f).unwrap(), f.len() - 4))
            .collect();
        assert_eq!(programs, vec![(4096, 256), (4352, 44)]);

        // Verify reads back exactly the 300 written bytes
        let verify_bytes: usize = chip
            .transfers()
            .iter()
            .filter(|f| f[0] == opcodes::READ)
            .map(|f| f.len() - 4)
            .sum();
        assert_eq!(verify_bytes, 300);
        assert_eq!(&chip.data()[4096..4396], &data[..]);
        assert_eq!(engine.state().status(), Status::Completed);
        assert_eq!(engine.state().progress(), 100);
    }

    #[test]
    fn test_chip_erase() {
        let mut engine = engine_for(EmulatedChip::with_data(small(), &[0u8; 0x1_0000]));
        assert_eq!(engine.chip_erase().unwrap(), Outcome::Completed);
        assert!(engine.transport().data().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_chip_erase_timeout_not_retried() {
        let mut chip = EmulatedChip::with_data(small(), &[0u8; 16]);
        chip.set_stuck_busy(true);
        let mut engine = engine_for(chip);

        let err = engine.chip_erase().unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
        assert_eq!(engine.transport().count_opcode(opcodes::CE_C7), 1);
        assert_eq!(engine.transport().count_opcode(opcodes::WREN), 1);

        let snap = engine.state().snapshot();
        assert_eq!(snap.status, Status::Error);
        assert!(snap.progress < 100);
        assert!(snap.last_error.is_some());
    }

    #[test]
    fn test_chip_erase_uses_descriptor_opcode() {
        let mut desc = small();
        desc.instructions.chip_erase = opcodes::CE_60;
        let mut chip = EmulatedChip::with_data(desc, &[0u8; 16]);

        // Only the descriptor's chip-erase opcode is decoded
        chip.transfer(&[opcodes::WREN]).unwrap();
        assert!(chip.transfer(&[opcodes::CE_C7]).is_err());

        let mut engine = engine_for(chip);
        assert_eq!(engine.chip_erase().unwrap(), Outcome::Completed);
        assert_eq!(engine.transport().count_opcode(opcodes::CE_60), 1);
        assert!(engine.transport().data().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_program_requires_write_enable() {
        let mut chip = EmulatedChip::new(small());
        chip.transfer(&[opcodes::PP, 0, 0, 0, 0x00]).unwrap();
        assert_eq!(chip.data()[0], 0xFF);

        chip.transfer(&[opcodes::WREN]).unwrap();
        let status = chip.transfer(&[opcodes::RDSR, 0]).unwrap()[1];
        assert!(StatusRegister::from_bits_retain(status).contains(StatusRegister::WEL));

        chip.transfer(&[opcodes::PP, 0, 0, 0, 0x0F]).unwrap();
        assert_eq!(chip.data()[0], 0x0F);
        // Busy for one poll, then ready with the latch cleared
        assert_eq!(chip.transfer(&[opcodes::RDSR, 0]).unwrap()[1], 0x01);
        assert_eq!(chip.transfer(&[opcodes::RDSR, 0]).unwrap()[1], 0x00);
    }

    #[test]
    fn test_program_wraps_within_page() {
        let mut chip = EmulatedChip::new(small());
        chip.transfer(&[opcodes::WREN]).unwrap();
        chip.transfer(&[opcodes::PP, 0x00, 0x00, 0xFF, 0x01, 0x02]).unwrap();
        assert_eq!(chip.data()[0xFF], 0x01);
        assert_eq!(chip.data()[0x00], 0x02);
        assert_eq!(chip.data()[0x100], 0xFF);
    }

    #[test]
    fn test_fast_read_skips_dummy_byte() {
        let mut chip = EmulatedChip::with_data(small(), &[1, 2, 3]);
        let response = chip
            .transfer(&[opcodes::FAST_READ, 0, 0, 0, 0, 0, 0])
            .unwrap();
        assert_eq!(&response[5..], &[1, 2]);
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let mut chip = EmulatedChip::new(small());
        assert!(matches!(chip.transfer(&[0xAB]), Err(TransportError::Other(_))));
        assert!(chip.transfer(&[]).is_err());
    }
}
