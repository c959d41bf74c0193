//! Per-particle integration: touch gravity, friction, reflective walls.

use crate::state::Particle;
use shared::Input;

/// Gravity falls off as 3/√d² inside the pull radius.
const GRAVITY_FALLOFF: f32 = 3.0;
/// Touches closer than this (squared) exert no pull, avoiding the
/// singularity at zero distance.
const MIN_PULL_DIST_SQ: f32 = 1.0;

/// Effective friction factor for one step of `dt` seconds. Raising the
/// per-frame base to `dt * 60` keeps damping frame-rate independent.
#[inline]
pub fn friction_factor(friction: f32, dt: f32) -> f32 {
    friction.powf(dt * 60.0)
}

/// Advances one particle by one step: accumulate the pull of every active
/// touch, integrate, damp, then reflect off the world walls.
#[inline]
pub fn step_particle(
    p: &mut Particle,
    active: &[Input],
    dt: f32,
    friction_factor: f32,
    pull_dist_sq: f32,
    gravity_power: f32,
    width: f32,
    height: f32,
) {
    for input in active {
        let dir_x = input.x - p.x;
        let dir_y = input.y - p.y;
        let dist_sq = dir_x * dir_x + dir_y * dir_y;
        if dist_sq < pull_dist_sq && dist_sq > MIN_PULL_DIST_SQ {
            let grav = GRAVITY_FALLOFF / dist_sq.sqrt();
            p.dx += dir_x * dt * gravity_power * grav;
            p.dy += dir_y * dt * gravity_power * grav;
        }
    }

    p.x += p.dx;
    p.y += p.dy;
    p.dx *= friction_factor;
    p.dy *= friction_factor;

    reflect(p, width, height);
}

/// Reflective boundary: on crossing a wall, roll the move back and invert
/// the velocity component. Roll-back-then-invert rather than clamping, so
/// the particle keeps its energy.
#[inline]
pub fn reflect(p: &mut Particle, width: f32, height: f32) {
    if p.x < 0.0 || p.x >= width {
        p.x -= p.dx;
        p.dx = -p.dx;
    }
    if p.y < 0.0 || p.y >= height {
        p.y -= p.dy;
        p.dy = -p.dy;
    }
}
