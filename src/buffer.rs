use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::error::{Error, Result};

/// Capacity granularity of a [`Buffer`]. Capacities are always a multiple of this.
pub const BLOCK_SIZE: usize = 16 * 1024;

/// Number of idle buffers a [`BufferPool`] keeps around by default
pub const DEFAULT_POOL_CAPACITY: usize = 8;

const GROW_SLACK: usize = 32;

fn round_to_block(size: usize) -> usize {
    size.saturating_add(BLOCK_SIZE - 1) & !(BLOCK_SIZE - 1)
}

type ReleaseHook = Box<dyn FnOnce(Buffer) + Send>;

struct Region {
    bytes: Vec<u8>,
    capacity: usize,
}

impl Region {
    fn ensure_capacity(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        self.capacity = capacity;
        let additional = capacity - self.bytes.len();
        self.bytes.reserve_exact(additional);
    }
}

struct Shared {
    region: RwLock<Region>,
    open_views: AtomicUsize,
    writer_attached: AtomicBool,
    on_release: Mutex<Option<ReleaseHook>>,
}

impl Shared {
    fn read_region(&self) -> RwLockReadGuard<'_, Region> {
        self.region.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_region(&self) -> RwLockWriteGuard<'_, Region> {
        self.region.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn hook(&self) -> MutexGuard<'_, Option<ReleaseHook>> {
        self.on_release.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_view(self: &Arc<Self>) {
        if self.open_views.fetch_sub(1, Ordering::SeqCst) == 1
            && !self.writer_attached.load(Ordering::SeqCst)
        {
            self.fire_release();
        }
    }

    // The hook is taken under the lock, so concurrent callers fire it at most once.
    fn fire_release(self: &Arc<Self>) {
        let hook = self.hook().take();
        if let Some(hook) = hook {
            hook(Buffer::attach(Arc::clone(self)));
        }
    }
}

/// Append-only byte store with block-rounded capacity and counted read views.
///
/// Bytes are written through the `Buffer` handle and read back through
/// [`BufferView`]s, which share the backing region instead of copying it.
/// A buffer cannot be [`reset`](Buffer::reset) while any view is open.
///
/// Buffers checked out of a [`BufferPool`] carry a release hook. Once the
/// writing handle has been given up (dropped, or consumed by
/// [`into_view`](Buffer::into_view)) and the last view closes, the hook hands
/// the buffer back to its pool. The region is therefore owned by whichever
/// views are still open.
pub struct Buffer {
    shared: Arc<Shared>,
}

impl Buffer {
    /// Create an empty, unpooled buffer
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an unpooled buffer with room for at least `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = round_to_block(capacity);
        let region = Region {
            bytes: Vec::with_capacity(capacity),
            capacity,
        };
        Self::attach(Arc::new(Shared {
            region: RwLock::new(region),
            open_views: AtomicUsize::new(0),
            writer_attached: AtomicBool::new(true),
            on_release: Mutex::new(None),
        }))
    }

    fn attach(shared: Arc<Shared>) -> Self {
        shared.writer_attached.store(true, Ordering::SeqCst);
        Self { shared }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.shared.read_region().bytes.len()
    }

    /// Whether nothing has been written since creation or the last reset
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity, always a multiple of [`BLOCK_SIZE`]
    pub fn capacity(&self) -> usize {
        self.shared.read_region().capacity
    }

    /// Number of views that have not been closed yet
    pub fn open_views(&self) -> usize {
        self.shared.open_views.load(Ordering::SeqCst)
    }

    /// Append `data`, growing the region when it does not fit.
    ///
    /// Growth targets the written size plus `data` plus a little slack, or
    /// twice the current capacity if that is larger, rounded up to the block
    /// size. Existing bytes are preserved.
    pub fn write_bytes(&mut self, data: &[u8]) {
        let mut region = self.shared.write_region();
        let required = region.bytes.len() + data.len();
        if required > region.capacity {
            let target = (required + GROW_SLACK).max(region.capacity.saturating_mul(2));
            region.ensure_capacity(round_to_block(target));
        }
        region.bytes.extend_from_slice(data);
    }

    /// Append a single byte
    pub fn write_byte(&mut self, byte: u8) {
        self.write_bytes(&[byte]);
    }

    /// Reclaim the buffer for reuse.
    ///
    /// Fails with [`Error::Invariant`] if any view is still open. Otherwise the
    /// write cursor goes back to zero and the capacity is raised to at least
    /// `min_capacity`.
    pub fn reset(&mut self, min_capacity: usize) -> Result<()> {
        let open = self.open_views();
        if open > 0 {
            return Err(Error::invariant(format!(
                "buffer reset with {} open view(s)",
                open
            )));
        }
        let mut region = self.shared.write_region();
        region.bytes.clear();
        region.ensure_capacity(round_to_block(min_capacity));
        Ok(())
    }

    /// Open a read view over `[offset, offset + length)`.
    ///
    /// Both ends are clamped to the written size. The view shares the backing
    /// region and keeps the buffer from being reset until it is closed.
    pub fn open_view(&self, offset: usize, length: usize) -> BufferView {
        let written = self.len();
        let start = offset.min(written);
        let end = start.saturating_add(length).min(written);
        BufferView::open(Arc::clone(&self.shared), start, end)
    }

    /// Give up the writing handle and return a view over everything written.
    ///
    /// For a pooled buffer, closing the returned view (and any clones of it)
    /// hands the buffer back to the pool.
    pub fn into_view(self) -> BufferView {
        let view = self.open_view(0, usize::MAX);
        drop(self);
        view
    }

    /// Copy of everything written so far
    pub fn to_vec(&self) -> Vec<u8> {
        self.shared.read_region().bytes.clone()
    }

    fn set_release_hook<F>(&mut self, hook: F)
    where
        F: FnOnce(Buffer) + Send + 'static,
    {
        *self.shared.hook() = Some(Box::new(hook));
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.shared.writer_attached.store(false, Ordering::SeqCst);
        if self.shared.open_views.load(Ordering::SeqCst) == 0 {
            self.shared.fire_release();
        }
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let region = self.shared.read_region();
        f.debug_struct("Buffer")
            .field("len", &region.bytes.len())
            .field("capacity", &region.capacity)
            .field("open_views", &self.open_views())
            .finish()
    }
}

/// Read cursor over a slice of a [`Buffer`]'s region.
///
/// Supports `mark`/`reset`/`skip` and implements [`Read`]. Dropping the view
/// closes it.
pub struct BufferView {
    shared: Arc<Shared>,
    start: usize,
    end: usize,
    pos: usize,
    mark: usize,
    open: bool,
}

impl BufferView {
    fn open(shared: Arc<Shared>, start: usize, end: usize) -> Self {
        shared.open_views.fetch_add(1, Ordering::SeqCst);
        Self {
            shared,
            start,
            end,
            pos: start,
            mark: start,
            open: true,
        }
    }

    /// Total number of bytes covered by the view
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the view covers no bytes
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes left between the read position and the end of the view
    pub fn available(&self) -> usize {
        if self.open {
            self.end - self.pos
        } else {
            0
        }
    }

    /// Remember the current read position
    pub fn mark(&mut self) {
        self.mark = self.pos;
    }

    /// Return to the last mark (or the start of the view) and clear the mark
    pub fn reset(&mut self) {
        self.pos = self.mark;
        self.mark = self.start;
    }

    /// Advance by up to `count` bytes, returning how far the cursor moved
    pub fn skip(&mut self, count: usize) -> usize {
        let skipped = count.min(self.available());
        self.pos += skipped;
        skipped
    }

    /// Read one byte, or `None` at the end of the view
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.available() == 0 {
            return None;
        }
        let byte = self.shared.read_region().bytes[self.pos];
        self.pos += 1;
        Some(byte)
    }

    /// Copy of the unread bytes, without moving the cursor
    pub fn to_vec(&self) -> Vec<u8> {
        if self.available() == 0 {
            return Vec::new();
        }
        self.shared.read_region().bytes[self.pos..self.end].to_vec()
    }

    /// Close the view. Closing twice is a no-op.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.pos = self.end;
        self.shared.release_view();
    }

    /// Whether [`close`](BufferView::close) has been called
    pub fn is_closed(&self) -> bool {
        !self.open
    }
}

impl Read for BufferView {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.available());
        if count == 0 {
            return Ok(0);
        }
        let region = self.shared.read_region();
        buf[..count].copy_from_slice(&region.bytes[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }
}

impl Clone for BufferView {
    /// Opens another view over the same range, starting at the same position
    fn clone(&self) -> Self {
        if !self.open {
            return Self {
                shared: Arc::clone(&self.shared),
                start: self.start,
                end: self.end,
                pos: self.end,
                mark: self.start,
                open: false,
            };
        }
        let mut view = BufferView::open(Arc::clone(&self.shared), self.start, self.end);
        view.pos = self.pos;
        view.mark = self.mark;
        view
    }
}

impl Drop for BufferView {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("pos", &self.pos)
            .field("open", &self.open)
            .finish()
    }
}

struct PoolInner {
    idle: Mutex<Vec<Buffer>>,
    capacity: usize,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<Buffer>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recycle(&self, buffer: Buffer) {
        let mut idle = self.idle();
        if idle.len() < self.capacity {
            idle.push(buffer);
            tracing::trace!(idle = idle.len(), "buffer returned to pool");
        }
    }
}

/// Small bounded stack of idle [`Buffer`]s shared across requests.
///
/// `acquire` never blocks: an empty pool just means a fresh allocation, and
/// a full pool drops returned buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool that keeps at most `capacity` idle buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::with_capacity(capacity)),
                capacity,
            }),
        }
    }

    /// Maximum number of idle buffers kept
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of idle buffers currently held
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Check out a buffer with at least `min_capacity` bytes of room.
    ///
    /// The buffer returns to this pool once its writing handle is gone and
    /// every view over it has been closed.
    pub fn acquire(&self, min_capacity: usize) -> Buffer {
        let idle = self.inner.idle().pop();
        let mut buffer = match idle {
            Some(mut buffer) => match buffer.reset(min_capacity) {
                Ok(()) => buffer,
                Err(e) => {
                    tracing::error!(error = %e, "idle pooled buffer could not be reset");
                    debug_assert!(false, "{}", e);
                    Buffer::with_capacity(min_capacity)
                }
            },
            None => Buffer::with_capacity(min_capacity),
        };

        let pool: Weak<PoolInner> = Arc::downgrade(&self.inner);
        buffer.set_release_hook(move |buffer| {
            if let Some(pool) = pool.upgrade() {
                pool.recycle(buffer);
            }
        });
        buffer
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("idle", &self.idle_count())
            .finish()
    }
}
