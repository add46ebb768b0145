//! Process-wide standard stream slots
//!
//! A `StdioTable` holds what "stdin", "stdout" and "stderr" currently mean.
//! Each slot is either a plain stream shared by everyone or a `StreamProxy`
//! that dispatches by execution context. Code that reads or writes through
//! [`stdin`], [`stdout`] and [`stderr`] never needs to know which.

use std::fmt;
use std::io;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use tracing::debug;

use crate::error::StdioError;
use crate::stdio::proxy::StreamProxy;
use crate::stdio::stream::{StdStream, StreamHandle};

// ============================================================================
// Slots
// ============================================================================

/// One of the three standard stream slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Input,
    Output,
    Error,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Input, Slot::Output, Slot::Error];

    /// Reserved descriptor of the real OS stream for this slot
    pub fn descriptor(self) -> i32 {
        match self {
            Slot::Input => 0,
            Slot::Output => 1,
            Slot::Error => 2,
        }
    }

    fn index(self) -> usize {
        self.descriptor() as usize
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Input => "stdin",
            Slot::Output => "stdout",
            Slot::Error => "stderr",
        };
        f.write_str(name)
    }
}

/// What a slot currently holds
#[derive(Debug, Clone)]
pub enum SlotState {
    /// A single stream observed by every context
    Plain(StreamHandle),
    /// Virtualized: each context sees its own binding
    Proxied(Arc<StreamProxy>),
}

impl SlotState {
    pub fn as_proxy(&self) -> Option<&Arc<StreamProxy>> {
        match self {
            SlotState::Proxied(proxy) => Some(proxy),
            SlotState::Plain(_) => None,
        }
    }

    /// Stream the calling context sees through this slot
    pub fn current(&self) -> Result<StreamHandle, StdioError> {
        match self {
            SlotState::Plain(stream) => Ok(stream.clone()),
            SlotState::Proxied(proxy) => proxy.resolve(),
        }
    }
}

// ============================================================================
// Stdio Table
// ============================================================================

/// The three standard stream slots of a process (or of a test)
#[derive(Debug)]
pub struct StdioTable {
    slots: RwLock<[SlotState; 3]>,
}

impl Default for StdioTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTable {
    /// Plain slots over the real OS streams
    pub fn new() -> Self {
        Self::with_streams(
            StreamHandle::plain(StdStream::stdin()),
            StreamHandle::plain(StdStream::stdout()),
            StreamHandle::plain(StdStream::stderr()),
        )
    }

    /// Plain slots over the given streams
    pub fn with_streams(stdin: StreamHandle, stdout: StreamHandle, stderr: StreamHandle) -> Self {
        Self {
            slots: RwLock::new([
                SlotState::Plain(stdin),
                SlotState::Plain(stdout),
                SlotState::Plain(stderr),
            ]),
        }
    }

    pub fn get(&self, slot: Slot) -> SlotState {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots[slot.index()].clone()
    }

    /// Replace a slot, returning what it held before
    pub fn set(&self, slot: Slot, state: SlotState) -> SlotState {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut slots[slot.index()], state)
    }

    /// The proxy in `slot`, if that slot is virtualized
    pub fn proxy(&self, slot: Slot) -> Option<Arc<StreamProxy>> {
        self.get(slot).as_proxy().cloned()
    }

    /// Virtualize every plain slot
    ///
    /// Each new proxy is seeded with the slot's previous stream for the
    /// calling context. Slots that are already proxied are left untouched.
    pub fn install_proxies(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for slot in Slot::ALL {
            let entry = &mut slots[slot.index()];
            if let SlotState::Plain(stream) = entry {
                debug!("StdioTable: virtualizing {}", slot);
                let proxy = StreamProxy::new(slot, stream.clone());
                *entry = SlotState::Proxied(Arc::new(proxy));
            }
        }
    }

    /// Stream the calling context sees in `slot`
    pub fn current(&self, slot: Slot) -> Result<StreamHandle, StdioError> {
        self.get(slot).current()
    }

    pub fn reader(self: &Arc<Self>) -> SlotReader {
        SlotReader {
            table: Arc::clone(self),
        }
    }

    /// Writer for the output or error slot
    pub fn writer(self: &Arc<Self>, slot: Slot) -> SlotWriter {
        SlotWriter {
            table: Arc::clone(self),
            slot,
        }
    }
}

static GLOBAL: LazyLock<Arc<StdioTable>> = LazyLock::new(|| Arc::new(StdioTable::new()));

/// The process-wide table
pub fn global() -> &'static Arc<StdioTable> {
    &GLOBAL
}

/// Reader over the process-wide stdin slot
pub fn stdin() -> SlotReader {
    global().reader()
}

/// Writer over the process-wide stdout slot
pub fn stdout() -> SlotWriter {
    global().writer(Slot::Output)
}

/// Writer over the process-wide stderr slot
pub fn stderr() -> SlotWriter {
    global().writer(Slot::Error)
}

// ============================================================================
// Slot Reader / Writer
// ============================================================================

/// `Read` adapter that resolves the input slot on every call
#[derive(Debug, Clone)]
pub struct SlotReader {
    table: Arc<StdioTable>,
}

impl io::Read for SlotReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stream = self.table.current(Slot::Input)?;
        Ok(stream.read(buf)?)
    }
}

/// `Write` adapter that resolves its slot on every call
#[derive(Debug, Clone)]
pub struct SlotWriter {
    table: Arc<StdioTable>,
    slot: Slot,
}

impl io::Write for SlotWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let stream = self.table.current(self.slot)?;
        Ok(stream.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        let stream = self.table.current(self.slot)?;
        Ok(stream.flush()?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdio::stream::{ByteStream, MemoryStream};
    use crate::test_utils::fixtures::MemoryStdio;
    use std::io::{Read, Write};
    use std::thread;

    fn memory_table() -> (Arc<MemoryStream>, Arc<MemoryStream>, Arc<StdioTable>) {
        let stdio = MemoryStdio::plain("typed input");
        (stdio.stdout, stdio.stderr, stdio.table)
    }

    #[test]
    fn test_slot_descriptors_and_names() {
        assert_eq!(Slot::Input.descriptor(), 0);
        assert_eq!(Slot::Output.descriptor(), 1);
        assert_eq!(Slot::Error.descriptor(), 2);
        assert_eq!(Slot::Output.to_string(), "stdout");
    }

    #[test]
    fn test_new_table_is_plain() {
        let table = StdioTable::new();
        for slot in Slot::ALL {
            assert!(table.proxy(slot).is_none());
            let current = table.current(slot).unwrap();
            assert_eq!(current.descriptor_for(slot), Some(slot.descriptor()));
        }
    }

    #[test]
    fn test_install_proxies_seeds_previous_stream() {
        let (out, _err, table) = memory_table();

        table.install_proxies();

        let proxy = table.proxy(Slot::Output).unwrap();
        assert_eq!(proxy.binding_count(), 1);
        table.writer(Slot::Output).write_all(b"through proxy").unwrap();
        assert_eq!(out.contents_lossy(), "through proxy");
    }

    #[test]
    fn test_install_proxies_is_idempotent() {
        let (_out, _err, table) = memory_table();

        table.install_proxies();
        let first = table.proxy(Slot::Error).unwrap();
        table.install_proxies();
        let second = table.proxy(Slot::Error).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_plain_slot_is_shared_across_threads() {
        let (out, _err, table) = memory_table();

        let cloned = table.clone();
        thread::spawn(move || cloned.writer(Slot::Output).write_all(b"a").unwrap())
            .join()
            .unwrap();
        table.writer(Slot::Output).write_all(b"b").unwrap();

        assert_eq!(out.contents_lossy(), "ab");
    }

    #[test]
    fn test_proxied_slot_without_binding_fails_for_other_thread() {
        let (_out, _err, table) = memory_table();
        table.install_proxies();

        let cloned = table.clone();
        let err = thread::spawn(move || cloned.writer(Slot::Output).write_all(b"lost"))
            .join()
            .unwrap()
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_reader_reads_input_slot() {
        let MemoryStdio { stdin, table, .. } = MemoryStdio::plain("typed input");
        let mut text = String::new();
        table.reader().read_to_string(&mut text).unwrap();
        assert_eq!(text, "typed input");
        assert_eq!(ByteStream::read(&*stdin, &mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_set_returns_previous_state() {
        let (out, _err, table) = memory_table();
        let replacement = StreamHandle::plain(MemoryStream::new());

        let previous = table.set(Slot::Output, SlotState::Plain(replacement.clone()));

        let SlotState::Plain(previous) = previous else {
            panic!("expected plain slot");
        };
        assert!(previous.same_as(&StreamHandle::from(out)));
        assert!(table.current(Slot::Output).unwrap().same_as(&replacement));
    }
}
