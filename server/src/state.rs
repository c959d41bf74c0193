//! Shared simulation state: the particle array and the per-slot input
//! and camera tables.
//!
//! The particle array is mutated every tick by the worker pool without
//! locking; safety comes from partitioning it into disjoint index ranges.
//! The input/camera tables use relaxed per-field atomics: a reader may see
//! a stale or torn snapshot of a slot, which the simulation tolerates —
//! inputs only steer gravity and the slot's owner is reading back its own
//! updates. Changes to the *set* of live slots always happen under the
//! connection registry's lock.

use rand::Rng;
use shared::{ClientCam, Input};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

/// One simulated point particle. Packed contiguously; never destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

/// Per-tick snapshot of the simulation parameters, copied into every job.
#[derive(Debug, Clone, Copy)]
pub struct SimState {
    /// Seconds elapsed since the previous tick.
    pub dt: f32,
    pub width: u32,
    pub height: u32,
}

/// The full particle population, shared across worker threads.
///
/// Workers get mutable access to contiguous ranges through
/// [`ParticleStore::slice_mut`]; the tick driver only touches the array
/// between worker joins (the periodic position reset).
pub struct ParticleStore {
    cells: Box<[UnsafeCell<Particle>]>,
}

// Range-partitioned access only; see the safety contracts below.
unsafe impl Sync for ParticleStore {}

impl ParticleStore {
    /// Creates `count` particles at random positions with zero velocity.
    pub fn random(count: usize, width: u32, height: u32) -> Self {
        let mut rng = rand::thread_rng();
        let cells = (0..count)
            .map(|_| {
                UnsafeCell::new(Particle {
                    x: rng.gen_range(0.0..width as f32),
                    y: rng.gen_range(0.0..height as f32),
                    dx: 0.0,
                    dy: 0.0,
                })
            })
            .collect();
        Self { cells }
    }

    /// Creates a store from explicit particles.
    pub fn from_particles(particles: Vec<Particle>) -> Self {
        Self {
            cells: particles.into_iter().map(UnsafeCell::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Mutable view of `start..end`.
    ///
    /// # Safety
    /// No other slice overlapping `start..end` may exist for the duration
    /// of the borrow. The tick driver guarantees this by handing each
    /// worker a disjoint range and by only taking the full slice itself
    /// between joins.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, start: usize, end: usize) -> &mut [Particle] {
        assert!(
            start <= end && end <= self.cells.len(),
            "particle range {}..{} out of bounds",
            start,
            end
        );
        if start == end {
            return &mut [];
        }
        std::slice::from_raw_parts_mut(self.cells[start].get(), end - start)
    }

    /// Re-randomises every position, preserving velocities.
    ///
    /// # Safety
    /// No worker may be running; see [`ParticleStore::slice_mut`].
    pub unsafe fn scatter(&self, width: u32, height: u32) {
        let mut rng = rand::thread_rng();
        for p in self.slice_mut(0, self.len()) {
            p.x = rng.gen_range(0.0..width as f32);
            p.y = rng.gen_range(0.0..height as f32);
        }
    }

    /// Copies the current population out, for inspection.
    ///
    /// # Safety
    /// No worker may be running; see [`ParticleStore::slice_mut`].
    pub unsafe fn snapshot(&self) -> Vec<Particle> {
        self.slice_mut(0, self.len()).to_vec()
    }
}

/// One client's touch input as relaxed per-field atomics.
#[derive(Default)]
pub struct InputSlot {
    x: AtomicU32,
    y: AtomicU32,
    touch: AtomicBool,
}

impl InputSlot {
    pub fn load(&self) -> Input {
        Input {
            x: f32::from_bits(self.x.load(Ordering::Relaxed)),
            y: f32::from_bits(self.y.load(Ordering::Relaxed)),
            is_touch_down: self.touch.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self, input: Input) {
        self.x.store(input.x.to_bits(), Ordering::Relaxed);
        self.y.store(input.y.to_bits(), Ordering::Relaxed);
        self.touch.store(input.is_touch_down, Ordering::Relaxed);
    }
}

/// One client's camera rectangle as relaxed per-field atomics.
#[derive(Default)]
pub struct CamSlot {
    x: AtomicU32,
    y: AtomicU32,
    width: AtomicI32,
    height: AtomicI32,
}

impl CamSlot {
    pub fn load(&self) -> ClientCam {
        ClientCam {
            x: f32::from_bits(self.x.load(Ordering::Relaxed)),
            y: f32::from_bits(self.y.load(Ordering::Relaxed)),
            width: self.width.load(Ordering::Relaxed),
            height: self.height.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self, cam: ClientCam) {
        self.x.store(cam.x.to_bits(), Ordering::Relaxed);
        self.y.store(cam.y.to_bits(), Ordering::Relaxed);
        self.width.store(cam.width, Ordering::Relaxed);
        self.height.store(cam.height, Ordering::Relaxed);
    }
}

/// The per-slot input and camera tables, parallel to the connection
/// registry: a client admitted at registry index `i` owns `inputs[i]`
/// and `cameras[i]`.
pub struct SlotTables {
    pub inputs: Box<[InputSlot]>,
    pub cameras: Box<[CamSlot]>,
    world_width: u32,
    world_height: u32,
}

impl SlotTables {
    pub fn new(max_clients: usize, world_width: u32, world_height: u32) -> Self {
        let tables = Self {
            inputs: (0..max_clients).map(|_| InputSlot::default()).collect(),
            cameras: (0..max_clients).map(|_| CamSlot::default()).collect(),
            world_width,
            world_height,
        };
        for slot in 0..max_clients {
            tables.reset_slot(slot);
        }
        tables
    }

    /// Number of slots, which is also the admission cap.
    pub fn capacity(&self) -> usize {
        self.inputs.len()
    }

    /// The camera every slot starts from: a 1x1 viewport near the world
    /// centre, waiting for the client's first resize.
    pub fn initial_camera(&self) -> ClientCam {
        ClientCam {
            x: self.world_width as f32 / 2.0 - 300.0,
            y: self.world_height as f32 / 2.0 - 300.0,
            width: 1,
            height: 1,
        }
    }

    /// Returns a slot to its admission state.
    pub fn reset_slot(&self, slot: usize) {
        self.inputs[slot].store(Input::default());
        self.cameras[slot].store(self.initial_camera());
    }

    /// Left-shifts every slot above `removed` so live indices stay dense,
    /// then clears the vacated tail. `live_before` is the number of live
    /// slots before the removal.
    pub fn compact_from(&self, removed: usize, live_before: usize) {
        for slot in removed..live_before.saturating_sub(1) {
            self.inputs[slot].store(self.inputs[slot + 1].load());
            self.cameras[slot].store(self.cameras[slot + 1].load());
        }
        if live_before > 0 {
            self.reset_slot(live_before - 1);
        }
    }
}
