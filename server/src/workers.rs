//! The data-parallel simulation worker pool.
//!
//! A fixed set of OS threads drains `SimJob`s off a shared queue. Each job
//! names a contiguous particle range, so jobs within one tick never touch
//! the same particle; the occupancy frame is shared, but workers only ever
//! store 1 into it. The tick driver joins a tick by awaiting one completion
//! message per dispatched job.

use crate::frame::Frame;
use crate::physics;
use crate::state::{ParticleStore, SimState, SlotTables};
use shared::Input;
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc as async_mpsc;

/// One tick's worth of work for one worker.
pub struct SimJob {
    /// First particle index of the range.
    pub start: usize,
    /// One past the last particle index.
    pub end: usize,
    /// Snapshot of this tick's simulation parameters.
    pub sim: SimState,
    /// Live connection count; input slots at or above it are inactive.
    pub client_count: usize,
    /// Occupancy frame to rasterise into, on rasterising ticks only.
    pub frame: Option<Arc<Frame>>,
}

/// The engine's fatal condition: the worker pool or a downstream channel
/// is gone and no further ticks can run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStopped(pub &'static str);

impl fmt::Display for EngineStopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine stopped: {}", self.0)
    }
}

impl std::error::Error for EngineStopped {}

/// Sends the job completion on drop, so the driver's join barrier always
/// resolves. A worker unwinding mid-job has left its particle range half
/// written; there is no recovering the tick from that.
struct Completion(async_mpsc::UnboundedSender<()>);

impl Drop for Completion {
    fn drop(&mut self) {
        if thread::panicking() {
            std::process::abort();
        }
        let _ = self.0.send(());
    }
}

/// Fixed pool of simulation threads sharing one job queue.
pub struct WorkerPool {
    job_tx: mpsc::Sender<SimJob>,
    done_rx: async_mpsc::UnboundedReceiver<()>,
    size: usize,
}

/// Everything a worker needs that outlives individual jobs.
struct WorkerContext {
    particles: Arc<ParticleStore>,
    tables: Arc<SlotTables>,
    friction: f32,
    pull_dist_sq: f32,
    gravity_power: f32,
}

impl WorkerPool {
    pub fn new(
        size: usize,
        particles: Arc<ParticleStore>,
        tables: Arc<SlotTables>,
        friction: f32,
        pull_dist_sq: f32,
        gravity_power: f32,
    ) -> Self {
        assert!(size > 0, "worker pool needs at least one thread");

        let (job_tx, job_rx) = mpsc::channel::<SimJob>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, done_rx) = async_mpsc::unbounded_channel();

        for id in 0..size {
            let job_rx = Arc::clone(&job_rx);
            let done_tx = done_tx.clone();
            let ctx = WorkerContext {
                particles: Arc::clone(&particles),
                tables: Arc::clone(&tables),
                friction,
                pull_dist_sq,
                gravity_power,
            };

            thread::Builder::new()
                .name(format!("sim-worker-{}", id))
                .spawn(move || worker_loop(ctx, job_rx, done_tx))
                .expect("failed to spawn simulation worker");
        }

        Self {
            job_tx,
            done_rx,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Dispatches one tick's jobs and waits for every one to finish.
    pub async fn run_tick(
        &mut self,
        jobs: impl Iterator<Item = SimJob>,
    ) -> Result<(), EngineStopped> {
        let mut dispatched = 0;
        for job in jobs {
            self.job_tx
                .send(job)
                .map_err(|_| EngineStopped("worker pool is gone"))?;
            dispatched += 1;
        }
        for _ in 0..dispatched {
            self.done_rx
                .recv()
                .await
                .ok_or(EngineStopped("worker pool is gone"))?;
        }
        Ok(())
    }
}

fn worker_loop(
    ctx: WorkerContext,
    job_rx: Arc<Mutex<mpsc::Receiver<SimJob>>>,
    done_tx: async_mpsc::UnboundedSender<()>,
) {
    // Scratch for the active-input gather, reused across jobs.
    let mut active: Vec<Input> = Vec::with_capacity(ctx.tables.capacity());

    loop {
        let job = match job_rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => return,
        };
        let Ok(job) = job else { return };

        let _done = Completion(done_tx.clone());
        run_job(&ctx, &job, &mut active);
    }
}

fn run_job(ctx: &WorkerContext, job: &SimJob, active: &mut Vec<Input>) {
    let phi = physics::friction_factor(ctx.friction, job.sim.dt);

    active.clear();
    let bound = job.client_count.min(ctx.tables.capacity());
    for slot in &ctx.tables.inputs[..bound] {
        let input = slot.load();
        if input.is_touch_down {
            active.push(input);
        }
    }

    let width = job.sim.width as f32;
    let height = job.sim.height as f32;

    // SAFETY: the driver hands each job a disjoint range and keeps off the
    // store until the tick joins.
    let particles = unsafe { ctx.particles.slice_mut(job.start, job.end) };

    match &job.frame {
        Some(frame) => {
            let stride = job.sim.width as usize;
            for p in particles {
                physics::step_particle(
                    p,
                    active,
                    job.sim.dt,
                    phi,
                    ctx.pull_dist_sq,
                    ctx.gravity_power,
                    width,
                    height,
                );
                if p.x >= 0.0 && p.x < width && p.y >= 0.0 && p.y < height {
                    frame.set(p.y as usize * stride + p.x as usize);
                }
            }
        }
        None => {
            for p in particles {
                physics::step_particle(
                    p,
                    active,
                    job.sim.dt,
                    phi,
                    ctx.pull_dist_sq,
                    ctx.gravity_power,
                    width,
                    height,
                );
            }
        }
    }
}

/// Splits `count` particles into `workers` contiguous ranges. The last
/// range absorbs the remainder, so every particle lands in exactly one.
pub fn partition(count: usize, workers: usize) -> Vec<(usize, usize)> {
    assert!(workers > 0);
    let per_worker = count / workers;
    (0..workers)
        .map(|i| {
            let start = i * per_worker;
            let end = if i == workers - 1 {
                count
            } else {
                start + per_worker
            };
            (start, end)
        })
        .collect()
}
