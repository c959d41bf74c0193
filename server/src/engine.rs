//! Engine assembly: builds the shared state and wires the tick driver,
//! worker pool, and frame broadcaster together.

use crate::broadcast::FrameBroadcaster;
use crate::config::SimConfig;
use crate::frame::FramePool;
use crate::registry::ClientRegistry;
use crate::state::{Particle, ParticleStore, SlotTables};
use crate::tick::{TickDriver, FRAMES_CHANNEL_CAPACITY};
use crate::workers::{EngineStopped, WorkerPool};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// A fully wired but not yet running engine. `spawn` starts the tick
/// driver and broadcaster; the registry and tables are what the network
/// layer needs to admit connections.
pub struct Engine {
    pub driver: TickDriver,
    pub broadcaster: FrameBroadcaster,
    pub registry: Arc<RwLock<ClientRegistry>>,
    pub tables: Arc<SlotTables>,
    pub particles: Arc<ParticleStore>,
    pub frame_pool: Arc<FramePool>,
}

impl Engine {
    /// Builds an engine with a randomly scattered particle population.
    pub fn new(config: &SimConfig) -> Self {
        let particles = Arc::new(ParticleStore::random(
            config.particle_count,
            config.world_width,
            config.world_height,
        ));
        Self::assemble(config, particles)
    }

    /// Builds an engine over an explicit particle population.
    pub fn with_particles(config: &SimConfig, particles: Vec<Particle>) -> Self {
        Self::assemble(config, Arc::new(ParticleStore::from_particles(particles)))
    }

    fn assemble(config: &SimConfig, particles: Arc<ParticleStore>) -> Self {
        let tables = Arc::new(SlotTables::new(
            config.max_clients,
            config.world_width,
            config.world_height,
        ));
        let registry = Arc::new(RwLock::new(ClientRegistry::new(Arc::clone(&tables))));
        let frame_pool = Arc::new(FramePool::new(config.world_width, config.world_height));
        let (frames_tx, frames_rx) = mpsc::channel(FRAMES_CHANNEL_CAPACITY);

        let pool = WorkerPool::new(
            config.worker_threads,
            Arc::clone(&particles),
            Arc::clone(&tables),
            config.friction,
            config.pull_dist_sq,
            config.gravity_power,
        );

        let driver = TickDriver::new(
            pool,
            Arc::clone(&particles),
            Arc::clone(&registry),
            frames_tx,
            Arc::clone(&frame_pool),
            config.world_width,
            config.world_height,
            config.tick_hz,
            config.reset_period_ticks,
        );

        let broadcaster = FrameBroadcaster::new(
            frames_rx,
            Arc::clone(&frame_pool),
            Arc::clone(&registry),
            Arc::clone(&tables),
            config.world_width,
            config.world_height,
        );

        Self {
            driver,
            broadcaster,
            registry,
            tables,
            particles,
            frame_pool,
        }
    }

    /// Starts the tick driver and broadcaster as runtime tasks.
    pub fn spawn(self) -> (JoinHandle<Result<(), EngineStopped>>, JoinHandle<()>) {
        let driver = tokio::spawn(self.driver.run());
        let broadcaster = tokio::spawn(self.broadcaster.run());
        (driver, broadcaster)
    }
}
