//! Frame fan-out: crops every client's viewport out of the world frame,
//! bit-packs it, and enqueues it on that client's outbound queue.
//!
//! Single consumer of the frames channel. For each frame it holds the
//! registry read lock, serves every live client, then returns the frame
//! to the pool. Per-client queues are never awaited: a full queue drops
//! the payload, so one slow client cannot hold the fan-out (or the
//! simulation behind it) hostage.

use crate::frame::{Frame, FramePool};
use crate::registry::ClientRegistry;
use crate::state::SlotTables;
use log::warn;
use shared::ClientCam;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::RwLock;

pub struct FrameBroadcaster {
    frames: Receiver<Arc<Frame>>,
    frame_pool: Arc<FramePool>,
    registry: Arc<RwLock<ClientRegistry>>,
    tables: Arc<SlotTables>,
    world_width: u32,
    world_height: u32,
    frame_id: u32,
}

impl FrameBroadcaster {
    pub fn new(
        frames: Receiver<Arc<Frame>>,
        frame_pool: Arc<FramePool>,
        registry: Arc<RwLock<ClientRegistry>>,
        tables: Arc<SlotTables>,
        world_width: u32,
        world_height: u32,
    ) -> Self {
        Self {
            frames,
            frame_pool,
            registry,
            tables,
            world_width,
            world_height,
            frame_id: 0,
        }
    }

    /// Consumes frames until the channel closes.
    pub async fn run(mut self) {
        while self.run_once().await {}
    }

    /// Waits for one frame, serves it, and returns it to the pool.
    /// Returns false once the frames channel has closed.
    pub async fn run_once(&mut self) -> bool {
        match self.frames.recv().await {
            Some(frame) => {
                self.dispatch(&frame).await;
                self.frame_pool.put(frame);
                true
            }
            None => false,
        }
    }

    /// Serves one frame to every live client: clamp the camera (writing
    /// the clamp back), crop and pack the viewport when it is valid, and
    /// always emit the world/camera descriptor.
    pub async fn dispatch(&mut self, frame: &Frame) {
        self.frame_id = self.frame_id.wrapping_add(1);
        let registry = self.registry.read().await;

        for (slot, client) in registry.handles().iter().enumerate() {
            let cam_slot = &self.tables.cameras[slot];
            let mut cam = cam_slot.load();
            let valid = shared::clamp_camera(&mut cam, self.world_width, self.world_height);
            cam_slot.store(cam);

            if valid {
                let packed = pack_viewport(frame, &cam, self.world_width);
                let messages = shared::encode_frame_messages(self.frame_id, &packed);
                if !client.try_send(messages) {
                    warn!("client {}: outbound queue full, dropping frame", client.id());
                }
            }

            let descriptor = shared::encode_world_descriptor(
                cam.x as i32,
                cam.y as i32,
                self.world_width,
                self.world_height,
            );
            if !client.try_send(vec![descriptor]) {
                warn!(
                    "client {}: outbound queue full, dropping descriptor",
                    client.id()
                );
            }
        }
    }
}

/// Crops the camera rectangle out of the world frame and packs it 8 cells
/// per byte, row-major, producing `height * ceil(width / 8)` bytes. Each
/// 8-column block reads 8 contiguous world cells, so a block overhanging
/// the crop picks up neighbouring world cells; reads past the buffer end
/// come back as empty. The camera must already be clamped.
pub fn pack_viewport(frame: &Frame, cam: &ClientCam, world_width: u32) -> Vec<u8> {
    let x = cam.x as usize;
    let y = cam.y as usize;
    let width = cam.width as usize;
    let height = cam.height as usize;
    let stride = world_width as usize;

    let mut packed = Vec::with_capacity(height * width.div_ceil(8));
    let mut cells = [0u8; 8];

    for row in 0..height {
        let row_start = (y + row) * stride + x;
        for col in (0..width).step_by(8) {
            let base = row_start + col;
            for (k, cell) in cells.iter_mut().enumerate() {
                *cell = frame.get(base + k);
            }
            packed.push(shared::pack_cells(cells));
        }
    }

    packed
}
