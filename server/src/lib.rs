//! # Particle-Field Server Library
//!
//! The simulation-and-fan-out engine behind the interactive particle
//! field: a process-wide physics simulation of millions of 2-D particles
//! advanced at 60 Hz, where every connected client steers the field with
//! touch gravity and receives a bit-packed bitmap of its own viewport at
//! half the tick rate.
//!
//! ## Architecture
//!
//! The engine is a pipeline with drop-on-overload seams:
//!
//! ```text
//! tick driver ─► worker pool ─► frame ─► frames channel (3)
//!                                             │
//!                                        broadcaster
//!                                             │ crop + bit-pack per client
//!                                    outbound queues (2 each)
//!                                             │
//!                                        write pumps ─► WebSocket
//! ```
//!
//! Physics never waits for the network: a full frames channel drops the
//! frame, a full client queue drops the payload. Client control flows the
//! other way through per-connection ingress tasks that write straight
//! into lock-free per-slot input/camera tables.
//!
//! ## Module Organization
//!
//! - [`config`] — engine options and deployment defaults
//! - [`state`] — particle store and the per-slot input/camera tables
//! - [`physics`] — per-particle integration, friction, wall reflection
//! - [`workers`] — the data-parallel worker pool and its jobs
//! - [`tick`] — the fixed-rate driver
//! - [`frame`] — occupancy frames and their pool
//! - [`broadcast`] — per-client view cropping and fan-out
//! - [`registry`] — connection slots, admission, eviction
//! - [`net`] — WebSocket ingress and write pumps
//! - [`engine`] — wires all of the above together

pub mod broadcast;
pub mod config;
pub mod engine;
pub mod frame;
pub mod net;
pub mod physics;
pub mod registry;
pub mod state;
pub mod tick;
pub mod workers;
