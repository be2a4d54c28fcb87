//! Background worker
//!
//! Runs engine operations on a dedicated thread so the caller can keep
//! observing [`SessionState`] and request cancellation. At most one
//! operation runs per engine; a second request while one is running is
//! rejected with [`Error::Busy`] instead of being queued.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::operations::{Outcome, ProgrammingEngine, WriteOptions};
use super::session::{SessionState, Status};
use crate::chip::Region;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Releases the worker's busy flag when the operation thread ends
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to an operation running on a worker thread
#[derive(Debug)]
pub struct OperationHandle<R> {
    handle: JoinHandle<Result<R>>,
    state: Arc<SessionState>,
}

impl<R> OperationHandle<R> {
    /// Ask the operation to stop at the next unit boundary
    pub fn cancel(&self) -> bool {
        self.state.request_cancel()
    }

    /// Returns true once the worker thread has ended
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Session state of the engine running this operation
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Wait for the operation and return its result
    pub fn join(self) -> Result<R> {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => {
                let err = Error::Worker(panic_message(payload.as_ref()));
                self.state.fail(&err);
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "operation thread panicked".to_string()
    }
}

/// Owns an engine and runs its operations off the caller's thread
pub struct Worker<T> {
    engine: Arc<Mutex<ProgrammingEngine<T>>>,
    state: Arc<SessionState>,
    active: Arc<AtomicBool>,
}

impl<T: Transport + Send + 'static> Worker<T> {
    /// Wrap `engine`
    pub fn new(engine: ProgrammingEngine<T>) -> Self {
        let state = Arc::clone(engine.state());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            state,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared session state
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Returns true while an operation holds the engine
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start reading `region`
    ///
    /// The callbacks run on the worker thread.
    pub fn read<C, P>(
        &self,
        region: Region,
        on_chunk: C,
        on_progress: P,
    ) -> Result<OperationHandle<Outcome>>
    where
        C: FnMut(&[u8]) + Send + 'static,
        P: FnMut(u8) + Send + 'static,
    {
        self.spawn(Status::Reading, move |engine| {
            engine.read_region(region, on_chunk, on_progress)
        })
    }

    /// Start programming `data` at `address`
    pub fn write(
        &self,
        address: u64,
        data: Vec<u8>,
        options: WriteOptions,
    ) -> Result<OperationHandle<Outcome>> {
        self.spawn(Status::Writing, move |engine| {
            engine.write_region(address, &data, options)
        })
    }

    /// Start erasing the sectors overlapped by `region`
    pub fn erase(&self, region: Region) -> Result<OperationHandle<Outcome>> {
        self.spawn(Status::Erasing, move |engine| engine.erase_region(region))
    }

    /// Start a chip erase
    pub fn chip_erase(&self) -> Result<OperationHandle<Outcome>> {
        self.spawn(Status::Erasing, |engine| engine.chip_erase())
    }

    /// Read the chip ID on the calling thread
    pub fn read_id(&self) -> Result<Vec<u8>> {
        let _guard = self.acquire()?;
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        engine.read_id()
    }

    /// Ask the running operation to stop at the next unit boundary
    pub fn cancel(&self) -> bool {
        self.state.request_cancel()
    }

    /// Return the session to `Idle`; fails while an operation runs
    pub fn reset(&self) -> Result<()> {
        let _guard = self.acquire()?;
        self.state.reset();
        Ok(())
    }

    /// Take the engine back once no operation is running
    pub fn into_engine(self) -> Result<ProgrammingEngine<T>> {
        if self.is_busy() {
            return Err(Error::Busy);
        }
        Arc::try_unwrap(self.engine)
            .map(|engine| engine.into_inner().unwrap_or_else(PoisonError::into_inner))
            .map_err(|_| Error::Busy)
    }

    fn acquire(&self) -> Result<ActiveGuard> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(ActiveGuard(Arc::clone(&self.active)))
    }

    fn spawn<R, F>(&self, status: Status, job: F) -> Result<OperationHandle<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut ProgrammingEngine<T>) -> Result<R> + Send + 'static,
    {
        let guard = self.acquire()?;
        // Publish the operation before the thread starts so an early cancel
        // request is not dropped.
        self.state.prepare(status);

        let shared = Arc::clone(&self.engine);
        let spawned = thread::Builder::new()
            .name(format!("norprog-{}", status))
            .spawn(move || {
                let result = {
                    let mut engine = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    job(&mut engine)
                };
                drop(shared);
                drop(guard);
                result
            });

        match spawned {
            Ok(handle) => Ok(OperationHandle {
                handle,
                state: Arc::clone(&self.state),
            }),
            Err(e) => {
                let err = Error::Worker(format!("failed to start operation thread: {}", e));
                self.state.fail(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::builtin_descriptors;
    use crate::engine::EnginePolicy;
    use crate::transport::TransportError;
    use core::time::Duration;
    use std::sync::mpsc;

    /// Answers zeros, but only after a token arrives on `gate`
    ///
    /// Every transfer announces itself on `entered` before it blocks.
    struct Gated {
        gate: mpsc::Receiver<()>,
        entered: mpsc::Sender<()>,
    }

    impl Transport for Gated {
        fn transfer(&mut self, command: &[u8]) -> core::result::Result<Vec<u8>, TransportError> {
            let _ = self.entered.send(());
            self.gate.recv().map_err(|_| TransportError::Disconnected)?;
            Ok(vec![0; command.len()])
        }
    }

    fn gated() -> (Worker<Gated>, mpsc::Sender<()>, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let (entered_tx, entered_rx) = mpsc::channel();
        let transport = Gated {
            gate: rx,
            entered: entered_tx,
        };
        let engine = ProgrammingEngine::new(transport, builtin_descriptors().remove(0))
            .unwrap()
            .with_policy(EnginePolicy::default().with_poll_interval(Duration::ZERO));
        (Worker::new(engine), tx, entered_rx)
    }

    fn gated_worker() -> (Worker<Gated>, mpsc::Sender<()>) {
        let (worker, tx, _) = gated();
        (worker, tx)
    }

    /// Transport that answers immediately with zeros
    struct Zeros;

    impl Transport for Zeros {
        fn transfer(&mut self, command: &[u8]) -> core::result::Result<Vec<u8>, TransportError> {
            Ok(vec![0; command.len()])
        }
    }

    #[test]
    fn test_read_runs_on_worker() {
        let (worker, tx) = gated_worker();
        for _ in 0..2 {
            tx.send(()).unwrap();
        }

        let (chunks_tx, chunks_rx) = mpsc::channel();
        let handle = worker
            .read(
                Region::new(0, 300),
                move |chunk| chunks_tx.send(chunk.len()).unwrap(),
                |_| {},
            )
            .unwrap();
        assert_eq!(handle.join().unwrap(), Outcome::Completed);
        assert_eq!(chunks_rx.iter().collect::<Vec<_>>(), vec![256, 44]);
        assert_eq!(worker.state().status(), Status::Completed);
        assert_eq!(worker.state().progress(), 100);
    }

    #[test]
    fn test_second_operation_rejected_while_busy() {
        let (worker, tx) = gated_worker();
        let handle = worker.read(Region::new(0, 1), |_| {}, |_| {}).unwrap();

        assert!(worker.is_busy());
        assert!(matches!(worker.erase(Region::new(0, 1)), Err(Error::Busy)));
        assert!(matches!(worker.read_id(), Err(Error::Busy)));
        assert!(matches!(worker.reset(), Err(Error::Busy)));

        tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), Outcome::Completed);
        assert!(!worker.is_busy());

        tx.send(()).unwrap();
        assert_eq!(worker.read_id().unwrap(), vec![0, 0, 0]);
        assert!(worker.into_engine().is_ok());
    }

    #[test]
    fn test_cancel_before_first_unit() {
        let (worker, tx) = gated_worker();
        let (chunks_tx, chunks_rx) = mpsc::channel();
        let handle = worker
            .read(
                Region::new(0, 3 * 256),
                move |chunk| chunks_tx.send(chunk.len()).unwrap(),
                |_| {},
            )
            .unwrap();

        // Requested before the thread reaches the first chunk or right as
        // it blocks in it; at most that one chunk is delivered
        assert!(handle.cancel());
        tx.send(()).unwrap();

        assert_eq!(handle.join().unwrap(), Outcome::Cancelled);
        assert!(chunks_rx.iter().count() <= 1);
        assert_eq!(worker.state().status(), Status::Cancelled);
        assert!(worker.state().progress() < 100);
        assert!(!worker.state().is_cancel_requested());
    }

    #[test]
    fn test_cancel_lets_in_flight_chunk_finish() {
        let (worker, tx, entered) = gated();
        let (chunks_tx, chunks_rx) = mpsc::channel();
        let handle = worker
            .read(
                Region::new(0, 3 * 256),
                move |chunk| chunks_tx.send(chunk.len()).unwrap(),
                |_| {},
            )
            .unwrap();

        // First chunk transfer is blocked in the transport
        entered.recv().unwrap();
        assert!(handle.cancel());
        tx.send(()).unwrap();

        assert_eq!(handle.join().unwrap(), Outcome::Cancelled);
        assert_eq!(chunks_rx.iter().collect::<Vec<_>>(), vec![256]);
        assert_eq!(worker.state().progress(), 33);
        assert_eq!(worker.state().status(), Status::Cancelled);
    }

    #[test]
    fn test_late_cancel_ignored_by_next_operation() {
        let engine = ProgrammingEngine::new(Zeros, builtin_descriptors().remove(0))
            .unwrap()
            .with_policy(EnginePolicy::default().with_poll_interval(Duration::ZERO));
        let worker = Arc::new(Worker::new(engine));

        for _ in 0..200 {
            let handle = worker.read(Region::new(0, 256), |_| {}, |_| {}).unwrap();
            let canceller = {
                let worker = Arc::clone(&worker);
                thread::spawn(move || {
                    for _ in 0..50 {
                        worker.cancel();
                    }
                })
            };
            handle.join().unwrap();
            canceller.join().unwrap();

            let next = worker.read(Region::new(0, 256), |_| {}, |_| {}).unwrap();
            assert_eq!(next.join().unwrap(), Outcome::Completed);
        }
    }

    #[test]
    fn test_panicking_callback_reported_as_error() {
        let (worker, tx) = gated_worker();
        tx.send(()).unwrap();
        let handle = worker
            .read(Region::new(0, 1), |_| panic!("boom"), |_| {})
            .unwrap();

        let err = handle.join().unwrap_err();
        assert!(matches!(&err, Error::Worker(msg) if msg == "boom"));
        assert_eq!(worker.state().status(), Status::Error);

        // The engine stays usable
        tx.send(()).unwrap();
        let handle = worker.read(Region::new(0, 1), |_| {}, |_| {}).unwrap();
        assert_eq!(handle.join().unwrap(), Outcome::Completed);
    }
}
