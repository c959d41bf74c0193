//! The fixed-rate tick driver.
//!
//! Every tick: measure dt, partition the particle array, fan the jobs out
//! to the worker pool, and join. On even ticks the driver first acquires
//! and zeroes a frame for the workers to rasterise into, and after the
//! join offers it to the broadcast stage — non-blocking, so an overloaded
//! consumer costs a dropped frame, never a stalled simulation.

use crate::frame::{Frame, FramePool};
use crate::registry::ClientRegistry;
use crate::state::{ParticleStore, SimState};
use crate::workers::{partition, EngineStopped, SimJob, WorkerPool};
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};

/// Frames buffered between the driver and the broadcast stage.
pub const FRAMES_CHANNEL_CAPACITY: usize = 3;

pub struct TickDriver {
    pool: WorkerPool,
    particles: Arc<ParticleStore>,
    registry: Arc<RwLock<ClientRegistry>>,
    frames: Sender<Arc<Frame>>,
    frame_pool: Arc<FramePool>,
    ranges: Vec<(usize, usize)>,
    width: u32,
    height: u32,
    tick_hz: u32,
    reset_period: u64,
    tick_count: u64,
    last_tick: Instant,
}

impl TickDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: WorkerPool,
        particles: Arc<ParticleStore>,
        registry: Arc<RwLock<ClientRegistry>>,
        frames: Sender<Arc<Frame>>,
        frame_pool: Arc<FramePool>,
        width: u32,
        height: u32,
        tick_hz: u32,
        reset_period: u64,
    ) -> Self {
        assert!(tick_hz > 0, "tick rate must be positive");
        let ranges = partition(particles.len(), pool.size());
        Self {
            pool,
            particles,
            registry,
            frames,
            frame_pool,
            ranges,
            width,
            height,
            tick_hz,
            reset_period,
            tick_count: 0,
            last_tick: Instant::now(),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Runs ticks at the configured rate until the engine fails. A timer
    /// tick that lands mid-tick is delayed, never overlapped.
    pub async fn run(mut self) -> Result<(), EngineStopped> {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / self.tick_hz as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.last_tick = Instant::now();

        loop {
            ticker.tick().await;
            self.step().await?;
        }
    }

    /// Advances the simulation by one tick, measuring dt from the wall
    /// clock.
    pub async fn step(&mut self) -> Result<(), EngineStopped> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        self.step_with_dt(dt).await
    }

    /// Advances the simulation by one tick of exactly `dt` seconds.
    pub async fn step_with_dt(&mut self, dt: f32) -> Result<(), EngineStopped> {
        self.tick_count += 1;

        let sim = SimState {
            dt,
            width: self.width,
            height: self.height,
        };

        // Frame first: it must be zeroed before any worker can touch it.
        let frame = if self.tick_count % 2 == 0 {
            let mut frame = self.frame_pool.get();
            Arc::get_mut(&mut frame)
                .expect("pooled frame has another holder")
                .zero();
            Some(frame)
        } else {
            None
        };

        let client_count = self.registry.read().await.len();

        let jobs = self.ranges.iter().map(|&(start, end)| SimJob {
            start,
            end,
            sim,
            client_count,
            frame: frame.clone(),
        });
        self.pool.run_tick(jobs).await?;

        if self.reset_period > 0 && self.tick_count % self.reset_period == 0 {
            // SAFETY: the join above means no worker is touching the store.
            unsafe { self.particles.scatter(self.width, self.height) };
            debug!("tick {}: re-scattered particle positions", self.tick_count);
        }

        if let Some(frame) = frame {
            match self.frames.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    warn!("tick {}: broadcast too slow, dropping frame", self.tick_count);
                    self.frame_pool.put(frame);
                }
                Err(TrySendError::Closed(frame)) => {
                    self.frame_pool.put(frame);
                    return Err(EngineStopped("frames channel closed"));
                }
            }
        }

        if self.tick_count % 60 == 0 {
            debug!(
                "tick {}: dt {:.4}s ({:.1} Hz), {} clients",
                self.tick_count,
                dt,
                1.0 / dt.max(f32::EPSILON),
                client_count
            );
        }

        Ok(())
    }
}
