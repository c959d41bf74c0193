//! Engine configuration and its production defaults.

/// Tuning knobs for the simulation engine. Every field has a default
/// matching the production deployment; `main` overrides them from the
/// command line.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// World width in cells.
    pub world_width: u32,
    /// World height in cells.
    pub world_height: u32,
    /// Fixed particle population, created at startup.
    pub particle_count: usize,
    /// Hard cap on concurrent connections; also sizes the input/camera tables.
    pub max_clients: usize,
    /// Target simulation rate.
    pub tick_hz: u32,
    /// Per-frame friction base; the effective factor is `friction^(dt * 60)`.
    pub friction: f32,
    /// Squared radius inside which a touch attracts particles.
    pub pull_dist_sq: f32,
    /// Strength multiplier of the touch attraction.
    pub gravity_power: f32,
    /// Particle positions are re-scattered every this many ticks.
    pub reset_period_ticks: u64,
    /// Simulation worker thread count.
    pub worker_threads: usize,
}

impl SimConfig {
    /// One worker per core, leaving a core for the async runtime, capped at 8.
    pub fn default_worker_threads() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus.saturating_sub(1).clamp(1, 8)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            world_width: 2800,
            world_height: 2800,
            particle_count: 2_500_000,
            max_clients: 1000,
            tick_hz: 60,
            friction: 0.988,
            pull_dist_sq: 936_000.0,
            gravity_power: 6.0,
            reset_period_ticks: 18_000,
            worker_threads: Self::default_worker_threads(),
        }
    }
}
