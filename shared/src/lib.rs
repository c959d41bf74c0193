//! # Shared Protocol Library
//!
//! Everything both ends of a particle-field connection must agree on:
//! the binary control-message layout clients send, the frame and
//! world-descriptor messages the server sends back, the 8-cells-per-byte
//! bit packing used for frame payloads, and the camera clamping rules
//! that keep a client's viewport inside the world.
//!
//! ## Wire format
//!
//! All integers and floats are little-endian.
//!
//! Inbound (client → server), one packet per touch/camera update:
//!
//! ```text
//! offset  size  field
//!  0      4     input.x        f32   touch position, camera-local
//!  4      4     input.y        f32
//!  8      1     input.is_down  u8    nonzero = touching
//!  9      3     (padding)
//! 12      4     cam.dx         f32   camera origin delta
//! 16      4     cam.dy         f32
//! 20      4     cam.width      i32   absolute viewport size in cells
//! 24      4     cam.height     i32
//! ```
//!
//! Outbound (server → client), each a single binary packet:
//! - FRAME (`0x01`): the client's cropped viewport, one bit per cell,
//!   row-major, LSB = first cell of each 8-cell group. Large frames are
//!   split into `[0x01][frame_id:u32][chunk_index:u8][bytes]` fragments.
//! - WORLD (`0x02`): `[cam.x:i32][cam.y:i32][world_width:u32][world_height:u32]`.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Opcode prefix of a frame payload.
pub const OPCODE_FRAME: u8 = 0x01;
/// Opcode prefix of a world/camera descriptor.
pub const OPCODE_WORLD: u8 = 0x02;

/// Largest transport message the server will emit.
pub const MAX_PAYLOAD: usize = 65_000;
/// Framing in front of each frame fragment: opcode + frame id + chunk index.
pub const FRAGMENT_HEADER: usize = 6;
/// Exact wire size of one inbound control message.
pub const CONTROL_MESSAGE_LEN: usize = 28;

/// One client's touch input, in world coordinates once ingress has
/// translated it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Input {
    pub x: f32,
    pub y: f32,
    pub is_touch_down: bool,
}

/// The axis-aligned world-space rectangle a client wants to view.
/// `x`/`y` is the top-left origin; `width`/`height` are in cells.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClientCam {
    pub x: f32,
    pub y: f32,
    pub width: i32,
    pub height: i32,
}

/// One decoded inbound control message. Camera x/y carry deltas,
/// width/height are absolute; the touch position is camera-local.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlMessage {
    pub input: Input,
    pub cam: ClientCam,
}

/// Failure to decode an inbound message. The connection survives these;
/// the offending packet is skipped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProtocolError {
    /// Payload length did not match the fixed control-message layout.
    BadLength { len: usize },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadLength { len } => write!(
                f,
                "control message is {} bytes, expected {}",
                len, CONTROL_MESSAGE_LEN
            ),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn read_f32(data: &[u8], offset: usize) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    f32::from_le_bytes(buf)
}

fn read_i32(data: &[u8], offset: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    i32::from_le_bytes(buf)
}

/// Decodes one inbound control message.
pub fn decode_control(data: &[u8]) -> Result<ControlMessage, ProtocolError> {
    if data.len() != CONTROL_MESSAGE_LEN {
        return Err(ProtocolError::BadLength { len: data.len() });
    }

    Ok(ControlMessage {
        input: Input {
            x: read_f32(data, 0),
            y: read_f32(data, 4),
            is_touch_down: data[8] != 0,
        },
        cam: ClientCam {
            x: read_f32(data, 12),
            y: read_f32(data, 16),
            width: read_i32(data, 20),
            height: read_i32(data, 24),
        },
    })
}

/// Encodes a control message into its wire form. The server never sends
/// these; clients and tests do.
pub fn encode_control(msg: &ControlMessage) -> Vec<u8> {
    let mut data = vec![0u8; CONTROL_MESSAGE_LEN];
    data[0..4].copy_from_slice(&msg.input.x.to_le_bytes());
    data[4..8].copy_from_slice(&msg.input.y.to_le_bytes());
    data[8] = msg.input.is_touch_down as u8;
    // bytes 9..12 stay zero (padding)
    data[12..16].copy_from_slice(&msg.cam.x.to_le_bytes());
    data[16..20].copy_from_slice(&msg.cam.y.to_le_bytes());
    data[20..24].copy_from_slice(&msg.cam.width.to_le_bytes());
    data[24..28].copy_from_slice(&msg.cam.height.to_le_bytes());
    data
}

/// Encodes the world/camera descriptor sent alongside every frame.
pub fn encode_world_descriptor(
    cam_x: i32,
    cam_y: i32,
    world_width: u32,
    world_height: u32,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(17);
    msg.push(OPCODE_WORLD);
    msg.extend_from_slice(&cam_x.to_le_bytes());
    msg.extend_from_slice(&cam_y.to_le_bytes());
    msg.extend_from_slice(&world_width.to_le_bytes());
    msg.extend_from_slice(&world_height.to_le_bytes());
    msg
}

/// Builds the transport messages carrying one packed frame: a single
/// `[0x01][bytes]` message when it fits in [`MAX_PAYLOAD`], otherwise
/// `[0x01][frame_id][chunk_index]`-headed fragments the client reassembles
/// in chunk order.
pub fn encode_frame_messages(frame_id: u32, packed: &[u8]) -> Vec<Vec<u8>> {
    if packed.len() + 1 <= MAX_PAYLOAD {
        let mut message = Vec::with_capacity(packed.len() + 1);
        message.push(OPCODE_FRAME);
        message.extend_from_slice(packed);
        return vec![message];
    }

    packed
        .chunks(MAX_PAYLOAD - FRAGMENT_HEADER)
        .enumerate()
        .map(|(index, chunk)| {
            let mut message = Vec::with_capacity(FRAGMENT_HEADER + chunk.len());
            message.push(OPCODE_FRAME);
            message.extend_from_slice(&frame_id.to_le_bytes());
            message.push(index as u8);
            message.extend_from_slice(chunk);
            message
        })
        .collect()
}

fn pack_lut() -> &'static HashMap<u64, u8> {
    static LUT: OnceLock<HashMap<u64, u8>> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = HashMap::with_capacity(256);
        for value in 0u16..256 {
            let mut cells = [0u8; 8];
            for (bit, cell) in cells.iter_mut().enumerate() {
                *cell = ((value >> bit) & 1) as u8;
            }
            lut.insert(u64::from_le_bytes(cells), value as u8);
        }
        lut
    })
}

/// Packs one group of 8 occupancy cells ({0,1} bytes) into a byte,
/// bit k = cells\[k\]. Keyed through a 256-entry table on the group's
/// little-endian u64; groups containing values other than 0 or 1 pack to 0.
#[inline]
pub fn pack_cells(cells: [u8; 8]) -> u8 {
    pack_lut()
        .get(&u64::from_le_bytes(cells))
        .copied()
        .unwrap_or(0)
}

/// Packs a {0,1} byte sequence 8 cells per byte; a trailing partial group
/// is zero-padded.
pub fn pack_bits(cells: &[u8]) -> Vec<u8> {
    cells
        .chunks(8)
        .map(|group| {
            let mut block = [0u8; 8];
            block[..group.len()].copy_from_slice(group);
            pack_cells(block)
        })
        .collect()
}

/// Expands packed bytes back into one {0,1} byte per cell.
pub fn unpack_bits(packed: &[u8]) -> Vec<u8> {
    let mut cells = Vec::with_capacity(packed.len() * 8);
    for &byte in packed {
        for bit in 0..8 {
            cells.push((byte >> bit) & 1);
        }
    }
    cells
}

/// Clamps a camera against the world bounds, shrinking it where it
/// overhangs an edge, and reports whether the result can be cropped at
/// all: both dimensions strictly inside (0, world).
///
/// The clamp writes back into `cam` so later relative deltas compose
/// from a coherent origin.
pub fn clamp_camera(cam: &mut ClientCam, world_width: u32, world_height: u32) -> bool {
    let world_w = world_width as i32;
    let world_h = world_height as i32;

    let max_x = world_w - cam.width;
    if (cam.x as i32) < 0 {
        cam.x = 0.0;
    } else if cam.x as i32 > max_x {
        cam.x = max_x as f32;
    }

    let max_y = world_h - cam.height;
    if (cam.y as i32) < 0 {
        cam.y = 0.0;
    } else if cam.y as i32 > max_y {
        cam.y = max_y as f32;
    }

    let x = cam.x as i32;
    if x + cam.width > world_w {
        cam.width = world_w - x;
    }
    let y = cam.y as i32;
    if y + cam.height > world_h {
        cam.height = world_h - y;
    }

    cam.width > 0 && cam.width < world_w && cam.height > 0 && cam.height < world_h
}
