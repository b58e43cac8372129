use crate::{namespace::AmlHandle, sync::SyncState, AmlError, Handler, Interpreter};
use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, vec, vec::Vec};
use core::{
    alloc::{GlobalAlloc, Layout},
    cell::Cell,
};
use std::{
    alloc::System,
    sync::{Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

/// Wraps the system allocator to keep a count of live allocations. Counts are per thread, so tests
/// running alongside each other don't disturb one another.
struct CountingAllocator;

std::thread_local! {
    static LIVE_ALLOCATIONS: Cell<isize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            let _ = LIVE_ALLOCATIONS.try_with(|live| live.set(live.get() + 1));
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let _ = LIVE_ALLOCATIONS.try_with(|live| live.set(live.get() - 1));
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator;

/// The number of allocations made by this thread that haven't been freed yet. Frees of memory
/// allocated elsewhere count against it.
pub fn live_allocations() -> isize {
    LIVE_ALLOCATIONS.with(|live| live.get())
}

#[derive(Default)]
struct State {
    memory: BTreeMap<usize, u8>,
    io: BTreeMap<u16, u8>,
    pci: BTreeMap<(u16, u8, u8, u8, u16), u8>,
    tables: Vec<([u8; 4], &'static [u8])>,
    notifications: Vec<(AmlHandle, u64)>,
    fatal_errors: Vec<(u8, u32, u64)>,
}

/// A host backed by sparse in-memory maps of physical memory, I/O ports and PCI configuration
/// space. Unwritten locations read as zero. Clones share the same state, so a test can keep one to
/// inspect what the interpreter did.
#[derive(Clone)]
pub struct TestHandler {
    state: Arc<Mutex<State>>,
    waiters: Arc<(Mutex<()>, Condvar)>,
    started: Instant,
}

impl TestHandler {
    pub fn new() -> TestHandler {
        TestHandler {
            state: Arc::new(Mutex::new(State::default())),
            waiters: Arc::new((Mutex::new(()), Condvar::new())),
            started: Instant::now(),
        }
    }

    pub fn write_memory(&self, address: usize, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        for (i, byte) in bytes.iter().enumerate() {
            state.memory.insert(address + i, *byte);
        }
    }

    pub fn read_memory(&self, address: usize, length: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        (address..(address + length)).map(|address| state.memory.get(&address).copied().unwrap_or(0)).collect()
    }

    pub fn read_io(&self, port: u16) -> u8 {
        self.state.lock().unwrap().io.get(&port).copied().unwrap_or(0)
    }

    pub fn read_pci(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> u8 {
        let state = self.state.lock().unwrap();
        state.pci.get(&(segment, bus, device, function, offset)).copied().unwrap_or(0)
    }

    /// Make a table available through `scan_table`. The table is leaked.
    pub fn add_table(&self, signature: [u8; 4], table: Vec<u8>) {
        let table: &'static [u8] = Box::leak(table.into_boxed_slice());
        self.state.lock().unwrap().tables.push((signature, table));
    }

    pub fn notifications(&self) -> Vec<(AmlHandle, u64)> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn fatal_errors(&self) -> Vec<(u8, u32, u64)> {
        self.state.lock().unwrap().fatal_errors.clone()
    }

    fn read_memory_le(&self, address: usize, length: usize) -> u64 {
        self.read_memory(address, length).iter().rev().fold(0, |value, byte| (value << 8) | u64::from(*byte))
    }

    fn write_memory_le(&self, address: usize, length: usize, value: u64) {
        self.write_memory(address, &value.to_le_bytes()[..length]);
    }

    fn read_io_le(&self, port: u16, length: u16) -> u64 {
        (0..length).rev().fold(0, |value, i| (value << 8) | u64::from(self.read_io(port + i)))
    }

    fn write_io_le(&self, port: u16, length: u16, value: u64) {
        let mut state = self.state.lock().unwrap();
        for i in 0..length {
            state.io.insert(port + i, (value >> (8 * i)) as u8);
        }
    }

    fn read_pci_le(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, length: u16) -> u64 {
        (0..length)
            .rev()
            .fold(0, |value, i| (value << 8) | u64::from(self.read_pci(segment, bus, device, function, offset + i)))
    }

    fn write_pci_le(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, length: u16, value: u64) {
        let mut state = self.state.lock().unwrap();
        for i in 0..length {
            state.pci.insert((segment, bus, device, function, offset + i), (value >> (8 * i)) as u8);
        }
    }
}

#[rustfmt::skip]
impl Handler for TestHandler {
    fn read_u8(&self, address: usize) -> Result<u8, AmlError> { Ok(self.read_memory_le(address, 1) as u8) }
    fn read_u16(&self, address: usize) -> Result<u16, AmlError> { Ok(self.read_memory_le(address, 2) as u16) }
    fn read_u32(&self, address: usize) -> Result<u32, AmlError> { Ok(self.read_memory_le(address, 4) as u32) }
    fn read_u64(&self, address: usize) -> Result<u64, AmlError> { Ok(self.read_memory_le(address, 8)) }

    fn write_u8(&self, address: usize, value: u8) -> Result<(), AmlError> {
        self.write_memory_le(address, 1, u64::from(value));
        Ok(())
    }
    fn write_u16(&self, address: usize, value: u16) -> Result<(), AmlError> {
        self.write_memory_le(address, 2, u64::from(value));
        Ok(())
    }
    fn write_u32(&self, address: usize, value: u32) -> Result<(), AmlError> {
        self.write_memory_le(address, 4, u64::from(value));
        Ok(())
    }
    fn write_u64(&self, address: usize, value: u64) -> Result<(), AmlError> {
        self.write_memory_le(address, 8, value);
        Ok(())
    }

    fn read_io_u8(&self, port: u16) -> Result<u8, AmlError> { Ok(self.read_io_le(port, 1) as u8) }
    fn read_io_u16(&self, port: u16) -> Result<u16, AmlError> { Ok(self.read_io_le(port, 2) as u16) }
    fn read_io_u32(&self, port: u16) -> Result<u32, AmlError> { Ok(self.read_io_le(port, 4) as u32) }

    fn write_io_u8(&self, port: u16, value: u8) -> Result<(), AmlError> {
        self.write_io_le(port, 1, u64::from(value));
        Ok(())
    }
    fn write_io_u16(&self, port: u16, value: u16) -> Result<(), AmlError> {
        self.write_io_le(port, 2, u64::from(value));
        Ok(())
    }
    fn write_io_u32(&self, port: u16, value: u32) -> Result<(), AmlError> {
        self.write_io_le(port, 4, u64::from(value));
        Ok(())
    }

    fn read_pci_u8(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> Result<u8, AmlError> {
        Ok(self.read_pci_le(segment, bus, device, function, offset, 1) as u8)
    }
    fn read_pci_u16(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> Result<u16, AmlError> {
        Ok(self.read_pci_le(segment, bus, device, function, offset, 2) as u16)
    }
    fn read_pci_u32(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16) -> Result<u32, AmlError> {
        Ok(self.read_pci_le(segment, bus, device, function, offset, 4) as u32)
    }

    fn write_pci_u8(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, value: u8) -> Result<(), AmlError> {
        self.write_pci_le(segment, bus, device, function, offset, 1, u64::from(value));
        Ok(())
    }
    fn write_pci_u16(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, value: u16) -> Result<(), AmlError> {
        self.write_pci_le(segment, bus, device, function, offset, 2, u64::from(value));
        Ok(())
    }
    fn write_pci_u32(&self, segment: u16, bus: u8, device: u8, function: u8, offset: u16, value: u32) -> Result<(), AmlError> {
        self.write_pci_le(segment, bus, device, function, offset, 4, u64::from(value));
        Ok(())
    }

    fn timer(&self) -> Result<u64, AmlError> {
        Ok((self.started.elapsed().as_nanos() / 100) as u64)
    }

    fn sleep(&self, milliseconds: u64) -> Result<(), AmlError> {
        thread::sleep(Duration::from_millis(milliseconds));
        Ok(())
    }

    fn sync_wait(&self, state: &SyncState, expected: u32, deadline: u64) -> Result<bool, AmlError> {
        let (lock, condvar) = &*self.waiters;
        let mut guard = lock.lock().unwrap();
        loop {
            if state.value() != expected {
                return Ok(false);
            }
            let now = self.timer()?;
            if now >= deadline {
                return Ok(true);
            }
            let remaining = Duration::from_nanos((deadline - now).saturating_mul(100));
            guard = condvar.wait_timeout(guard, remaining.min(Duration::from_millis(10))).unwrap().0;
        }
    }

    fn sync_wake(&self, _state: &SyncState) -> Result<(), AmlError> {
        let (lock, condvar) = &*self.waiters;
        let _guard = lock.lock().unwrap();
        condvar.notify_all();
        Ok(())
    }

    fn scan_table(&self, signature: [u8; 4], index: usize) -> Result<Option<&[u8]>, AmlError> {
        let state = self.state.lock().unwrap();
        Ok(state.tables.iter().filter(|(table, _)| *table == signature).nth(index).map(|(_, table)| *table))
    }

    fn handle_notify(&self, node: AmlHandle, value: u64) {
        self.state.lock().unwrap().notifications.push((node, value));
    }

    fn handle_fatal_error(&self, fatal_type: u8, fatal_code: u32, fatal_arg: u64) {
        self.state.lock().unwrap().fatal_errors.push((fatal_type, fatal_code, fatal_arg));
    }
}

/// A host that provides nothing at all.
pub struct NullHandler;

impl Handler for NullHandler {}

/// Concatenate byte arrays, slices and vectors into a single AML stream.
macro_rules! aml {
    ($($part:expr),* $(,)?) => {{
        let mut stream = ::alloc::vec::Vec::<u8>::new();
        $(
            stream.extend_from_slice(&$part[..]);
        )*
        stream
    }};
}
pub(crate) use aml;

/// Encode the `PkgLength` of a package with `body_length` bytes after it. The encoding counts its
/// own bytes.
pub fn pkg_length(body_length: usize) -> Vec<u8> {
    if body_length + 1 < 0x40 {
        return vec![(body_length + 1) as u8];
    }

    let following = if body_length + 2 < (1 << 12) {
        1
    } else if body_length + 3 < (1 << 20) {
        2
    } else {
        3
    };
    let length = body_length + following + 1;
    let mut encoded = vec![((following << 6) | (length & 0xf)) as u8];
    for i in 0..following {
        encoded.push((length >> (4 + 8 * i)) as u8);
    }
    encoded
}

/// `op PkgLength body`
pub fn pkg(op: u8, body: &[u8]) -> Vec<u8> {
    aml![[op], pkg_length(body.len()), body]
}

/// `ExtOpPrefix op PkgLength body`
pub fn ext_pkg(op: u8, body: &[u8]) -> Vec<u8> {
    aml![[0x5b], pkg(op, body)]
}

/// A `Method` declaration. `name` must be a full four-character name segment.
pub fn method(name: &str, flags: u8, body: &[u8]) -> Vec<u8> {
    assert_eq!(name.len(), 4);
    pkg(0x14, &aml![name.as_bytes(), [flags], body])
}

/// Create an interpreter backed by a fresh `TestHandler`, and load `aml` into the root scope.
pub fn populated(aml: &[u8]) -> Interpreter {
    let interpreter = Interpreter::new(TestHandler::new());
    let root = interpreter.namespace.lock().root();
    interpreter.populate(root, aml).unwrap();
    interpreter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_lengths() {
        assert_eq!(pkg_length(0), vec![0x01]);
        assert_eq!(pkg_length(0x3e), vec![0x3f]);
        assert_eq!(pkg_length(0x3f), vec![0x41, 0x04]);
        assert_eq!(pkg(0x12, &[0x00]), vec![0x12, 0x02, 0x00]);
        assert_eq!(method("MAIN", 1, &[0xa3]), vec![0x14, 0x07, b'M', b'A', b'I', b'N', 0x01, 0xa3]);
    }
}
