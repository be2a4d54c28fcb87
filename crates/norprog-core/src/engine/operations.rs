//! Programming engine operations
//!
//! Every operation is split into units (read chunks, program pages, erase
//! sectors). Each unit is retried according to the [`EnginePolicy`]; when a
//! unit runs out of attempts the whole operation fails and names the unit's
//! address. Units already completed are never rolled back.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::policy::EnginePolicy;
use super::session::{ProgressTracker, SessionState, Status};
use crate::checksum::{self, Hasher};
use crate::chip::{FlashDescriptor, Region};
use crate::error::{Error, Result};
use crate::spi::{CommandFrame, StatusRegister};
use crate::transport::Transport;

/// How a successful operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every unit finished
    Completed,
    /// Stopped at a unit boundary on request; not a failure
    Cancelled,
}

/// Options for [`ProgrammingEngine::write_region`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Read back and compare digests after programming
    pub verify: bool,
    /// Erase every sector the region overlaps before programming
    pub auto_erase: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            verify: true,
            auto_erase: true,
        }
    }
}

/// Flash programming engine
///
/// Bound to one transport and one chip descriptor. Runs one operation at a
/// time (every operation takes `&mut self`) and publishes its progress
/// through the shared [`SessionState`].
pub struct ProgrammingEngine<T> {
    transport: T,
    descriptor: FlashDescriptor,
    policy: EnginePolicy,
    state: Arc<SessionState>,
}

impl<T: Transport> ProgrammingEngine<T> {
    /// Create an engine for `descriptor`, rejecting invalid geometry
    pub fn new(transport: T, descriptor: FlashDescriptor) -> Result<Self> {
        descriptor.validate()?;
        Ok(Self {
            transport,
            descriptor,
            policy: EnginePolicy::default(),
            state: Arc::new(SessionState::new()),
        })
    }

    /// Replace the retry/polling policy
    pub fn with_policy(mut self, policy: EnginePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Descriptor of the chip this engine drives
    pub fn descriptor(&self) -> &FlashDescriptor {
        &self.descriptor
    }

    /// Active retry/polling policy
    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Shared session state, for observers on other threads
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport (mutable)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the engine and return its transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Request cancellation of the running operation
    pub fn cancel(&self) -> bool {
        self.state.request_cancel()
    }

    /// Alias of [`ProgrammingEngine::cancel`]
    pub fn stop(&self) -> bool {
        self.cancel()
    }

    /// Return the session to `Idle` and clear progress, throughput and error
    pub fn reset(&self) {
        self.state.reset();
    }

    /// Read `region`, streaming each chunk to `on_chunk`
    ///
    /// Chunks are page sized (the last one may be shorter). `on_progress`
    /// receives the percentage after every chunk and 100 on completion.
    pub fn read_region<C, P>(
        &mut self,
        region: Region,
        mut on_chunk: C,
        mut on_progress: P,
    ) -> Result<Outcome>
    where
        C: FnMut(&[u8]),
        P: FnMut(u8),
    {
        self.state.begin(Status::Reading);
        log::debug!(
            "Reading {} bytes at 0x{:06X}",
            region.length,
            region.address
        );
        let result = self.read_units(region, &mut on_chunk, &mut on_progress);
        self.conclude("read", result, &mut on_progress)
    }

    /// Program `data` at `address`
    ///
    /// An unaligned start keeps the bytes of the first page in front of
    /// `address`: they are read before any erase and programmed back.
    pub fn write_region(
        &mut self,
        address: u64,
        data: &[u8],
        options: WriteOptions,
    ) -> Result<Outcome> {
        self.state.begin(Status::Writing);
        log::debug!(
            "Writing {} bytes at 0x{:06X} (erase: {}, verify: {})",
            data.len(),
            address,
            options.auto_erase,
            options.verify
        );
        let result = self.write_units(Region::new(address, data.len()), data, options);
        self.conclude("write", result, &mut |_: u8| {})
    }

    /// Erase every sector overlapped by `region`
    ///
    /// Sectors are erased whole, so bytes outside `region` but inside a
    /// partially covered sector are erased too.
    pub fn erase_region(&mut self, region: Region) -> Result<Outcome> {
        self.state.begin(Status::Erasing);
        log::debug!(
            "Erasing {} bytes at 0x{:06X}",
            region.length,
            region.address
        );
        let result = self.erase_region_units(region);
        self.conclude("erase", result, &mut |_: u8| {})
    }

    /// Erase the whole chip as a single unit (no retry)
    pub fn chip_erase(&mut self) -> Result<Outcome> {
        self.state.begin(Status::Erasing);
        log::debug!("Erasing {} bytes (chip erase)", self.descriptor.capacity);
        let result = self.chip_erase_unit();
        self.conclude("chip erase", result, &mut |_: u8| {})
    }

    /// Send the read-ID opcode and return the 3 response bytes
    ///
    /// Interpreting them (manufacturer, device) is up to the caller.
    pub fn read_id(&mut self) -> Result<Vec<u8>> {
        let frame = CommandFrame::read_reg(self.descriptor.instructions.read_id, 3);
        let response = self.exchange(&frame)?;
        Ok(response[frame.header_len()..].to_vec())
    }

    fn read_units(
        &mut self,
        region: Region,
        on_chunk: &mut dyn FnMut(&[u8]),
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<Outcome> {
        self.descriptor.check_region(region)?;
        let page = self.descriptor.page_size;
        let mut tracker = ProgressTracker::new(region.chunks(page).count());

        for (addr, len) in region.chunks(page) {
            if self.state.is_cancel_requested() {
                return Ok(Outcome::Cancelled);
            }
            let data = self.retry("read", addr, |engine| engine.read_chunk(addr, len))?;
            on_chunk(&data);
            let percent = self.advance(&mut tracker, len);
            on_progress(percent);
        }

        Ok(Outcome::Completed)
    }

    fn write_units(&mut self, region: Region, data: &[u8], options: WriteOptions) -> Result<Outcome> {
        self.descriptor.check_region(region)?;
        if region.is_empty() {
            return Ok(Outcome::Completed);
        }

        let page = self.descriptor.page_size;
        let start = region.address as u32;
        let lead = self.descriptor.page_offset(start);
        let aligned = Region::new(u64::from(start - lead), lead as usize + data.len());
        let sectors = if options.auto_erase {
            self.descriptor.sectors_covering(region)
        } else {
            Vec::new()
        };
        let verify_units = if options.verify {
            region.chunks(page).count()
        } else {
            0
        };
        let mut tracker = ProgressTracker::new(
            usize::from(lead > 0) + sectors.len() + aligned.chunks(page).count() + verify_units,
        );

        let mut image = Vec::with_capacity(aligned.length);
        if lead > 0 {
            if self.state.is_cancel_requested() {
                return Ok(Outcome::Cancelled);
            }
            let head_addr = start - lead;
            log::debug!(
                "Preserving {} bytes at 0x{:06X} in front of the write",
                lead,
                head_addr
            );
            let head = self.retry("read", head_addr, |engine| {
                engine.read_chunk(head_addr, lead as usize)
            })?;
            image.extend_from_slice(&head);
            self.advance(&mut tracker, lead as usize);
        }
        image.extend_from_slice(data);

        if !sectors.is_empty() {
            self.state.enter_phase(Status::Erasing);
            if self.erase_units(&sectors, &mut tracker)? == Outcome::Cancelled {
                return Ok(Outcome::Cancelled);
            }
            self.state.enter_phase(Status::Writing);
        }

        let base = start - lead;
        for (addr, len) in aligned.chunks(page) {
            if self.state.is_cancel_requested() {
                return Ok(Outcome::Cancelled);
            }
            let offset = (addr - base) as usize;
            let chunk = &image[offset..offset + len];
            self.retry("program", addr, |engine| engine.program_page(addr, chunk))?;
            self.advance(&mut tracker, len);
        }

        if options.verify {
            self.state.enter_phase(Status::Verifying);
            return self.verify_units(region, data, &mut tracker);
        }

        Ok(Outcome::Completed)
    }

    fn verify_units(
        &mut self,
        region: Region,
        expected: &[u8],
        tracker: &mut ProgressTracker,
    ) -> Result<Outcome> {
        let wanted = checksum::digest(expected);
        let mut hasher = Hasher::new();

        for (addr, len) in region.chunks(self.descriptor.page_size) {
            if self.state.is_cancel_requested() {
                return Ok(Outcome::Cancelled);
            }
            let data = self.retry("read", addr, |engine| engine.read_chunk(addr, len))?;
            hasher.update(&data);
            self.advance(tracker, len);
        }

        let found = hasher.finalize();
        if !checksum::equal(&wanted, &found) {
            log::error!("Read-back digest {} differs from written {}", found, wanted);
            return Err(Error::VerifyMismatch);
        }
        Ok(Outcome::Completed)
    }

    fn erase_region_units(&mut self, region: Region) -> Result<Outcome> {
        self.descriptor.check_region(region)?;
        let sectors = self.descriptor.sectors_covering(region);
        let mut tracker = ProgressTracker::new(sectors.len());
        self.erase_units(&sectors, &mut tracker)
    }

    fn erase_units(&mut self, sectors: &[u32], tracker: &mut ProgressTracker) -> Result<Outcome> {
        for &addr in sectors {
            if self.state.is_cancel_requested() {
                return Ok(Outcome::Cancelled);
            }
            self.retry("erase", addr, |engine| engine.erase_sector(addr))?;
            self.advance(tracker, self.descriptor.sector_size as usize);
        }
        Ok(Outcome::Completed)
    }

    fn chip_erase_unit(&mut self) -> Result<Outcome> {
        if self.state.is_cancel_requested() {
            return Ok(Outcome::Cancelled);
        }
        self.write_enable()?;
        self.exchange(&CommandFrame::simple(self.descriptor.instructions.chip_erase))?;
        self.wait_ready(0)?;
        Ok(Outcome::Completed)
    }

    /// Run `unit` until it succeeds or the attempt budget is spent
    fn retry<R>(
        &mut self,
        operation: &'static str,
        address: u32,
        mut unit: impl FnMut(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match unit(self) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "{} at 0x{:06X} failed (attempt {}/{}): {}",
                        operation,
                        address,
                        attempt,
                        attempts,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    log::error!(
                        "{} at 0x{:06X} failed after {} attempts: {}",
                        operation,
                        address,
                        attempts,
                        e
                    );
                    return Err(Error::UnitFailed {
                        operation,
                        address,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    fn advance(&self, tracker: &mut ProgressTracker, bytes: usize) -> u8 {
        let percent = tracker.advance(bytes);
        self.state.publish(percent, tracker.throughput());
        percent
    }

    fn conclude(
        &self,
        operation: &str,
        result: Result<Outcome>,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<Outcome> {
        match &result {
            Ok(Outcome::Completed) => {
                self.state.complete();
                on_progress(100);
                log::info!(
                    "{} complete ({} bytes/s)",
                    operation,
                    self.state.throughput_bytes_per_sec()
                );
            }
            Ok(Outcome::Cancelled) => {
                self.state.cancelled();
                log::info!("{} cancelled", operation);
            }
            Err(e) => {
                self.state.fail(e);
                log::error!("{} failed: {}", operation, e);
            }
        }
        result
    }

    fn read_chunk(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let frame = CommandFrame::read(self.descriptor.instructions.read_data, addr, len)?;
        let response = self.exchange(&frame)?;
        Ok(response[frame.header_len()..].to_vec())
    }

    fn program_page(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.write_enable()?;
        let frame = CommandFrame::program(self.descriptor.instructions.page_program, addr, data)?;
        self.exchange(&frame)?;
        self.wait_ready(addr)
    }

    fn erase_sector(&mut self, addr: u32) -> Result<()> {
        self.write_enable()?;
        let frame = CommandFrame::addressed(self.descriptor.instructions.sector_erase, addr)?;
        self.exchange(&frame)?;
        self.wait_ready(addr)
    }

    fn write_enable(&mut self) -> Result<()> {
        self.exchange(&CommandFrame::simple(self.descriptor.instructions.write_enable))
            .map(drop)
    }

    fn read_status(&mut self) -> Result<StatusRegister> {
        let frame = CommandFrame::read_reg(self.descriptor.instructions.read_status, 1);
        let response = self.exchange(&frame)?;
        Ok(StatusRegister::from_bits_retain(response[frame.header_len()]))
    }

    /// Poll the status register until the busy bit clears
    fn wait_ready(&mut self, address: u32) -> Result<()> {
        let started = Instant::now();
        loop {
            if !self.read_status()?.is_busy() {
                return Ok(());
            }
            if started.elapsed() >= self.policy.ready_timeout {
                return Err(Error::Timeout {
                    address,
                    timeout_ms: self.policy.ready_timeout.as_millis() as u64,
                });
            }
            if !self.policy.poll_interval.is_zero() {
                thread::sleep(self.policy.poll_interval);
            }
        }
    }

    /// One transfer with the full-duplex length check applied
    fn exchange(&mut self, frame: &CommandFrame) -> Result<Vec<u8>> {
        let response = self.transport.transfer(frame.as_bytes())?;
        frame.payload(&response)?;
        Ok(response)
    }
}
