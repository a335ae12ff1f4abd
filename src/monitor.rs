//! Reentrant read/write monitor with an atomic write-to-read downgrade
//!
//! `ReadWriteMonitor` guards the project to indexer map of the index manager.
//! It is a single mutex-protected state machine: readers share the monitor,
//! one writer excludes everybody else, and the writer may hand its hold over to
//! a read hold without letting another writer in between.
//!
//! The monitor only orders access; it owns no data. Callers must never hold it
//! across an `.await` point, since waiting is done on a blocking condition
//! variable and reentrancy is tracked per OS thread.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

/// Errors reported when the monitor is released by a thread that does not hold it
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Read hold released by a thread that holds no read")]
    ReadNotHeld,

    #[error("Write hold released by a thread that is not the writer")]
    WriteNotHeld,

    #[error("Cannot downgrade a nested write hold (depth {depth})")]
    NestedWrite { depth: usize },
}

#[derive(Debug, Default)]
struct MonitorState {
    /// Read holds per thread, including nested reads taken by the writer
    readers: HashMap<ThreadId, usize>,
    /// Thread currently owning the write side
    writer: Option<ThreadId>,
    /// Nesting depth of the writer's holds
    write_depth: usize,
    /// Reader waiting to upgrade while keeping its read holds
    upgrading: Option<ThreadId>,
}

impl MonitorState {
    fn is_writer(&self, thread: ThreadId) -> bool {
        self.writer == Some(thread)
    }

    fn reader_count(&self) -> usize {
        self.readers.values().sum()
    }

    fn read_holds(&self, thread: ThreadId) -> usize {
        self.readers.get(&thread).copied().unwrap_or(0)
    }

    fn has_foreign_readers(&self, thread: ThreadId) -> bool {
        self.readers.keys().any(|reader| *reader != thread)
    }
}

/// Snapshot of the monitor state, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub readers: usize,
    pub write_locked: bool,
}

#[derive(Debug, Default)]
pub struct ReadWriteMonitor {
    state: Mutex<MonitorState>,
    changed: Condvar,
}

impl ReadWriteMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until no foreign writer holds the monitor, then register a reader.
    ///
    /// The thread owning the write side may always enter read.
    pub fn enter_read(&self) {
        let current = thread::current().id();
        let state = self.lock_state();
        let mut state = self
            .changed
            .wait_while(state, |s| s.writer.is_some() && !s.is_writer(current))
            .unwrap_or_else(PoisonError::into_inner);
        *state.readers.entry(current).or_insert(0) += 1;
        trace!("Monitor: enter read (readers={})", state.reader_count());
    }

    pub fn exit_read(&self) -> Result<(), MonitorError> {
        let current = thread::current().id();
        let mut state = self.lock_state();
        let Some(holds) = state.readers.get_mut(&current) else {
            return Err(MonitorError::ReadNotHeld);
        };
        *holds -= 1;
        if *holds == 0 {
            state.readers.remove(&current);
            self.changed.notify_all();
        }
        trace!("Monitor: exit read (readers={})", state.reader_count());
        Ok(())
    }

    /// Block until the monitor is free, then take the write side.
    ///
    /// Reentrant for the thread already owning the write side. A thread holding
    /// read holds upgrades: it keeps them and waits for the other readers to
    /// leave. When another reader is already upgrading, the later one gives up
    /// its read holds while waiting and gets them back with the write side, so
    /// two upgraders never wait on each other.
    pub fn enter_write(&self) {
        let current = thread::current().id();
        let mut state = self.lock_state();
        if state.is_writer(current) {
            state.write_depth += 1;
            trace!("Monitor: nested enter write (depth={})", state.write_depth);
            return;
        }

        let held = state.read_holds(current);
        if held > 0 && state.upgrading.is_none() {
            state.upgrading = Some(current);
            state = self
                .changed
                .wait_while(state, |s| s.writer.is_some() || s.has_foreign_readers(current))
                .unwrap_or_else(PoisonError::into_inner);
            state.upgrading = None;
            trace!("Monitor: upgraded read to write");
        } else {
            if held > 0 {
                debug!("Monitor: releasing {} read holds for a contended upgrade", held);
                state.readers.remove(&current);
                self.changed.notify_all();
            }
            state = self
                .changed
                .wait_while(state, |s| {
                    s.writer.is_some() || s.reader_count() > 0 || s.upgrading.is_some()
                })
                .unwrap_or_else(PoisonError::into_inner);
            if held > 0 {
                state.readers.insert(current, held);
            }
            trace!("Monitor: enter write");
        }
        state.writer = Some(current);
        state.write_depth = 1;
    }

    pub fn exit_write(&self) -> Result<(), MonitorError> {
        let current = thread::current().id();
        let mut state = self.lock_state();
        if !state.is_writer(current) {
            return Err(MonitorError::WriteNotHeld);
        }
        state.write_depth -= 1;
        if state.write_depth == 0 {
            state.writer = None;
            trace!("Monitor: exit write");
            self.changed.notify_all();
        }
        Ok(())
    }

    /// Trade the write hold for a read hold in one step.
    ///
    /// Readers waiting on the monitor are released; writers stay blocked until
    /// the new read hold is gone.
    pub fn exit_write_enter_read(&self) -> Result<(), MonitorError> {
        let current = thread::current().id();
        let mut state = self.lock_state();
        if !state.is_writer(current) {
            return Err(MonitorError::WriteNotHeld);
        }
        if state.write_depth > 1 {
            return Err(MonitorError::NestedWrite {
                depth: state.write_depth,
            });
        }
        state.writer = None;
        state.write_depth = 0;
        *state.readers.entry(current).or_insert(0) += 1;
        trace!(
            "Monitor: downgrade write to read (readers={})",
            state.reader_count()
        );
        self.changed.notify_all();
        Ok(())
    }

    pub fn status(&self) -> MonitorStatus {
        let state = self.lock_state();
        MonitorStatus {
            readers: state.reader_count(),
            write_locked: state.writer.is_some(),
        }
    }

    /// Enter read and release on drop
    pub fn read(&self) -> MonitorReadGuard<'_> {
        self.enter_read();
        MonitorReadGuard { monitor: self }
    }

    /// Enter write and release on drop
    pub fn write(&self) -> MonitorWriteGuard<'_> {
        self.enter_write();
        MonitorWriteGuard {
            monitor: self,
            held: true,
        }
    }
}

pub struct MonitorReadGuard<'a> {
    monitor: &'a ReadWriteMonitor,
}

impl Drop for MonitorReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.monitor.exit_read() {
            warn!("Monitor read guard release failed: {}", e);
        }
    }
}

pub struct MonitorWriteGuard<'a> {
    monitor: &'a ReadWriteMonitor,
    held: bool,
}

impl<'a> MonitorWriteGuard<'a> {
    /// Atomically turn this write hold into a read hold.
    ///
    /// A nested write hold cannot be downgraded; in that case the hold is
    /// released and a plain read hold is taken, which stays deadlock-free
    /// because the thread remains the writer of the outer hold.
    pub fn downgrade(mut self) -> MonitorReadGuard<'a> {
        self.held = false;
        if let Err(e) = self.monitor.exit_write_enter_read() {
            trace!("Monitor downgrade fell back to release + read: {}", e);
            if let Err(e) = self.monitor.exit_write() {
                warn!("Monitor write release failed during downgrade: {}", e);
            }
            self.monitor.enter_read();
        }
        MonitorReadGuard {
            monitor: self.monitor,
        }
    }
}

impl Drop for MonitorWriteGuard<'_> {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = self.monitor.exit_write() {
            warn!("Monitor write guard release failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_readers_share_the_monitor() {
        let monitor = ReadWriteMonitor::new();
        let _a = monitor.read();
        let _b = monitor.read();
        assert_eq!(
            monitor.status(),
            MonitorStatus {
                readers: 2,
                write_locked: false
            }
        );
    }

    #[test]
    fn test_guards_release_on_drop() {
        let monitor = ReadWriteMonitor::new();
        {
            let _w = monitor.write();
            assert!(monitor.status().write_locked);
        }
        {
            let _r = monitor.read();
        }
        assert_eq!(
            monitor.status(),
            MonitorStatus {
                readers: 0,
                write_locked: false
            }
        );
    }

    #[test]
    fn test_write_is_reentrant_for_the_writer() {
        let monitor = ReadWriteMonitor::new();
        monitor.enter_write();
        monitor.enter_write();
        monitor.enter_read();
        monitor.exit_read().unwrap();
        monitor.exit_write().unwrap();
        assert!(monitor.status().write_locked);
        monitor.exit_write().unwrap();
        assert!(!monitor.status().write_locked);
    }

    #[test]
    fn test_release_without_hold_is_rejected() {
        let monitor = ReadWriteMonitor::new();
        assert_eq!(monitor.exit_read(), Err(MonitorError::ReadNotHeld));
        assert_eq!(monitor.exit_write(), Err(MonitorError::WriteNotHeld));
        assert_eq!(
            monitor.exit_write_enter_read(),
            Err(MonitorError::WriteNotHeld)
        );
    }

    #[test]
    fn test_nested_write_cannot_downgrade_atomically() {
        let monitor = ReadWriteMonitor::new();
        monitor.enter_write();
        monitor.enter_write();
        assert_eq!(
            monitor.exit_write_enter_read(),
            Err(MonitorError::NestedWrite { depth: 2 })
        );
        monitor.exit_write().unwrap();
        monitor.exit_write().unwrap();
    }

    #[test]
    fn test_writer_excludes_readers() {
        let monitor = Arc::new(ReadWriteMonitor::new());
        let reader_entered = Arc::new(AtomicBool::new(false));

        let guard = monitor.write();
        let handle = {
            let monitor = Arc::clone(&monitor);
            let reader_entered = Arc::clone(&reader_entered);
            thread::spawn(move || {
                let _r = monitor.read();
                reader_entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!reader_entered.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(reader_entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_downgrade_admits_readers_but_not_writers() {
        let monitor = Arc::new(ReadWriteMonitor::new());
        let order = Arc::new(AtomicUsize::new(0));

        let write_guard = monitor.write();

        let writer = {
            let monitor = Arc::clone(&monitor);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                let _w = monitor.write();
                order.fetch_add(1, Ordering::SeqCst)
            })
        };
        thread::sleep(Duration::from_millis(30));

        let read_guard = write_guard.downgrade();
        assert_eq!(monitor.status().readers, 1);

        // A second reader gets in while the competing writer keeps waiting
        let reader = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || {
                let _r = monitor.read();
            })
        };
        reader.join().unwrap();

        thread::sleep(Duration::from_millis(30));
        assert_eq!(order.load(Ordering::SeqCst), 0);

        drop(read_guard);
        assert_eq!(writer.join().unwrap(), 0);
        assert_eq!(order.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_release_requires_a_read_hold_on_this_thread() {
        let monitor = Arc::new(ReadWriteMonitor::new());
        let _r = monitor.read();

        let foreign = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.exit_read())
        };
        assert_eq!(foreign.join().unwrap(), Err(MonitorError::ReadNotHeld));
        assert_eq!(monitor.status().readers, 1);
    }

    #[test]
    fn test_reader_upgrades_to_write() {
        let monitor = ReadWriteMonitor::new();
        monitor.enter_read();
        monitor.enter_read();
        monitor.enter_write();
        assert_eq!(
            monitor.status(),
            MonitorStatus {
                readers: 2,
                write_locked: true
            }
        );
        monitor.exit_write().unwrap();
        monitor.exit_read().unwrap();
        monitor.exit_read().unwrap();
        assert_eq!(monitor.status().readers, 0);
    }

    #[test]
    fn test_upgrade_waits_for_other_readers() {
        let monitor = Arc::new(ReadWriteMonitor::new());
        let upgraded = Arc::new(AtomicBool::new(false));
        let other = monitor.read();

        let upgrader = {
            let monitor = Arc::clone(&monitor);
            let upgraded = Arc::clone(&upgraded);
            thread::spawn(move || {
                let _r = monitor.read();
                let _w = monitor.write();
                upgraded.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!upgraded.load(Ordering::SeqCst));
        drop(other);
        upgrader.join().unwrap();
        assert!(upgraded.load(Ordering::SeqCst));
        assert_eq!(monitor.status().readers, 0);
    }

    #[test]
    fn test_competing_upgrades_do_not_deadlock() {
        let monitor = Arc::new(ReadWriteMonitor::new());
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let writes = Arc::new(AtomicUsize::new(0));

        let upgraders: Vec<_> = (0..2)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                let barrier = Arc::clone(&barrier);
                let writes = Arc::clone(&writes);
                thread::spawn(move || {
                    let _r = monitor.read();
                    barrier.wait();
                    let _w = monitor.write();
                    writes.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for upgrader in upgraders {
            upgrader.join().unwrap();
        }

        assert_eq!(writes.load(Ordering::SeqCst), 2);
        assert_eq!(
            monitor.status(),
            MonitorStatus {
                readers: 0,
                write_locked: false
            }
        );
    }
}
