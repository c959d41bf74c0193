//! Reusable occupancy frames and the free-list they cycle through.
//!
//! A frame is one rasterising tick's world-sized occupancy image, one byte
//! per cell. Workers set cells concurrently while the frame is shared for
//! a tick, so the cells are relaxed atomics; every store writes 1, making
//! overlapping stores harmless. Zeroing happens through exclusive access
//! when the tick driver is the only holder.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// World-sized occupancy image for one rasterising tick.
pub struct Frame {
    width: u32,
    height: u32,
    cells: Box<[AtomicU8]>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            cells: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Marks the cell at `index` occupied. Out-of-range indices are ignored.
    #[inline]
    pub fn set(&self, index: usize) {
        if let Some(cell) = self.cells.get(index) {
            cell.store(1, Ordering::Relaxed);
        }
    }

    /// Reads the cell at `index`; out-of-range indices read as empty.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        self.cells
            .get(index)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Clears every cell. Requires exclusive access, which the pool
    /// guarantees for the current holder.
    pub fn zero(&mut self) {
        for cell in self.cells.iter_mut() {
            *cell.get_mut() = 0;
        }
    }

    /// Copies the occupancy bytes out, for inspection.
    pub fn to_vec(&self) -> Vec<u8> {
        self.cells
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect()
    }

    /// Overwrites the frame with the given occupancy bytes.
    pub fn fill_from(&mut self, data: &[u8]) {
        assert_eq!(data.len(), self.cells.len(), "frame size mismatch");
        for (cell, &value) in self.cells.iter_mut().zip(data) {
            *cell.get_mut() = value;
        }
    }
}

/// Bounded free-list of frames. `get` hands out an existing buffer or
/// allocates a fresh one; `put` returns it. Exactly one holder at a time;
/// returned frames are not pre-zeroed — the tick driver zeroes on acquire.
pub struct FramePool {
    width: u32,
    height: u32,
    free: Mutex<Vec<Arc<Frame>>>,
    allocated: std::sync::atomic::AtomicUsize,
}

impl FramePool {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            free: Mutex::new(Vec::new()),
            allocated: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> Arc<Frame> {
        if let Some(frame) = self.free.lock().expect("frame pool poisoned").pop() {
            return frame;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Arc::new(Frame::new(self.width, self.height))
    }

    pub fn put(&self, frame: Arc<Frame>) {
        self.free.lock().expect("frame pool poisoned").push(frame);
    }

    /// Number of frames sitting in the free-list.
    pub fn free_len(&self) -> usize {
        self.free.lock().expect("frame pool poisoned").len()
    }

    /// Total frames ever allocated by this pool.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let frame = Frame::new(8, 4);
        assert_eq!(frame.len(), 32);
        frame.set(0);
        frame.set(31);
        assert_eq!(frame.get(0), 1);
        assert_eq!(frame.get(1), 0);
        assert_eq!(frame.get(31), 1);
    }

    #[test]
    fn out_of_range_cells_are_ignored() {
        let frame = Frame::new(4, 4);
        frame.set(1000);
        assert_eq!(frame.get(1000), 0);
        assert!(frame.to_vec().iter().all(|&c| c == 0));
    }

    #[test]
    fn zero_clears_every_cell() {
        let mut frame = Frame::new(4, 4);
        for i in 0..16 {
            frame.set(i);
        }
        frame.zero();
        assert!(frame.to_vec().iter().all(|&c| c == 0));
    }

    #[test]
    fn pool_reuses_returned_frames() {
        let pool = FramePool::new(16, 16);
        let first = pool.get();
        assert_eq!(pool.allocated(), 1);
        first.set(3);
        pool.put(first);
        assert_eq!(pool.free_len(), 1);

        // The recycled frame comes back dirty; zeroing is the acquirer's job.
        let recycled = pool.get();
        assert_eq!(pool.allocated(), 1);
        assert_eq!(recycled.get(3), 1);
    }

    #[test]
    fn pool_allocates_when_empty() {
        let pool = FramePool::new(16, 16);
        let a = pool.get();
        let b = pool.get();
        assert_eq!(pool.allocated(), 2);
        assert_eq!(a.len(), b.len());
    }
}
