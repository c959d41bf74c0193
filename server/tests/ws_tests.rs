//! Integration tests over real WebSocket connections: handshake,
//! admission control, protocol error tolerance, and frame delivery.

use futures_util::{SinkExt, StreamExt};
use server::config::SimConfig;
use server::engine::Engine;
use server::net;
use server::state::Particle;
use shared::{ClientCam, ControlMessage, Input};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async;

const DT: f32 = 1.0 / 60.0;

fn test_config(max_clients: usize) -> SimConfig {
    SimConfig {
        world_width: 16,
        world_height: 16,
        particle_count: 4,
        max_clients,
        worker_threads: 1,
        ..SimConfig::default()
    }
}

fn seed_particles() -> Vec<Particle> {
    (1..=4)
        .map(|i| Particle {
            x: i as f32,
            y: i as f32,
            dx: 0.0,
            dy: 0.0,
        })
        .collect()
}

/// Starts the accept loop on an ephemeral port. The engine is returned
/// un-spawned so tests can drive ticks deterministically.
async fn spawn_server(config: &SimConfig) -> (Engine, u16) {
    let engine = Engine::with_particles(config, seed_particles());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(net::serve(
        listener,
        "/ws".to_string(),
        Arc::clone(&engine.registry),
        Arc::clone(&engine.tables),
        config.world_width,
        config.world_height,
    ));
    (engine, port)
}

async fn wait_for_clients(engine: &Engine, expected: usize) {
    for _ in 0..200 {
        if engine.registry.read().await.len() == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "registry never reached {} clients (at {})",
        expected,
        engine.registry.read().await.len()
    );
}

#[tokio::test]
async fn malformed_message_is_skipped_and_the_connection_survives() {
    let config = test_config(2);
    let (engine, port) = spawn_server(&config).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .unwrap();
    wait_for_clients(&engine, 1).await;

    // A 1-byte garbage packet: logged and skipped, connection stays open.
    ws.send(Message::Binary(vec![0x42])).await.unwrap();

    // The next well-formed message takes effect.
    let control = ControlMessage {
        input: Input {
            x: 1.0,
            y: 2.0,
            is_touch_down: true,
        },
        cam: ClientCam {
            x: 3.0,
            y: 4.0,
            width: 8,
            height: 8,
        },
    };
    ws.send(Message::Binary(shared::encode_control(&control)))
        .await
        .unwrap();

    for _ in 0..200 {
        if engine.tables.inputs[0].load().is_touch_down {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let input = engine.tables.inputs[0].load();
    assert!(input.is_touch_down, "well-formed update never applied");
    // Touch translated through the moved (pre-clamp) camera origin:
    // initial origin is (-292, -292), the delta makes it (-289, -288).
    assert_eq!(input.x, -288.0);
    assert_eq!(input.y, -286.0);

    // Camera took the absolute size and was clamped back into the world.
    let cam = engine.tables.cameras[0].load();
    assert_eq!(cam.width, 8);
    assert_eq!(cam.height, 8);
    assert_eq!(cam.x, 0.0);
    assert_eq!(cam.y, 0.0);

    assert_eq!(engine.registry.read().await.len(), 1);
}

#[tokio::test]
async fn admission_stops_at_capacity() {
    let config = test_config(2);
    let (engine, port) = spawn_server(&config).await;
    let url = format!("ws://127.0.0.1:{}/ws", port);

    let (_ws1, _) = connect_async(url.as_str()).await.unwrap();
    wait_for_clients(&engine, 1).await;
    let (_ws2, _) = connect_async(url.as_str()).await.unwrap();
    wait_for_clients(&engine, 2).await;

    // The third connection completes the handshake but is refused and
    // dropped before admission.
    let (mut ws3, _) = connect_async(url.as_str()).await.unwrap();
    let refused = timeout(Duration::from_secs(5), ws3.next()).await.unwrap();
    assert!(
        !matches!(refused, Some(Ok(Message::Binary(_)))),
        "refused connection must not receive data"
    );
    assert_eq!(engine.registry.read().await.len(), 2);
}

#[tokio::test]
async fn wrong_route_path_is_rejected() {
    let config = test_config(2);
    let (engine, port) = spawn_server(&config).await;

    let result = connect_async(format!("ws://127.0.0.1:{}/other", port)).await;
    assert!(result.is_err(), "handshake off the route path must fail");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.registry.read().await.len(), 0);
}

#[tokio::test]
async fn client_receives_frame_then_descriptor() {
    let config = test_config(2);
    let (mut engine, port) = spawn_server(&config).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port))
        .await
        .unwrap();
    wait_for_clients(&engine, 1).await;

    // Point the camera at the top-left 8x8 crop.
    let control = ControlMessage {
        input: Input::default(),
        cam: ClientCam {
            x: 0.0,
            y: 0.0,
            width: 8,
            height: 8,
        },
    };
    ws.send(Message::Binary(shared::encode_control(&control)))
        .await
        .unwrap();
    for _ in 0..200 {
        if engine.tables.cameras[0].load().width == 8 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.tables.cameras[0].load().width, 8);

    // One rasterising tick, one fan-out pass.
    engine.driver.step_with_dt(DT).await.unwrap();
    engine.driver.step_with_dt(DT).await.unwrap();
    assert!(engine.broadcaster.run_once().await);

    let first = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap();
    let Message::Binary(frame) = first else {
        panic!("expected a binary frame message");
    };
    assert_eq!(frame[0], shared::OPCODE_FRAME);
    assert_eq!(frame.len(), 1 + 8);
    let cells = shared::unpack_bits(&frame[1..]);
    assert_eq!(cells.iter().filter(|&&c| c == 1).count(), 4);

    let second = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for descriptor")
        .unwrap()
        .unwrap();
    let Message::Binary(descriptor) = second else {
        panic!("expected a binary descriptor message");
    };
    assert_eq!(descriptor[0], shared::OPCODE_WORLD);
    assert_eq!(descriptor.len(), 17);
    assert_eq!(descriptor[1..5], 0i32.to_le_bytes());
    assert_eq!(descriptor[9..13], 16u32.to_le_bytes());
}

#[tokio::test]
async fn disconnect_evicts_and_compacts() {
    let config = test_config(4);
    let (engine, port) = spawn_server(&config).await;
    let url = format!("ws://127.0.0.1:{}/ws", port);

    let (mut ws1, _) = connect_async(url.as_str()).await.unwrap();
    wait_for_clients(&engine, 1).await;
    let (mut ws2, _) = connect_async(url.as_str()).await.unwrap();
    wait_for_clients(&engine, 2).await;

    // Give the second client a recognisable camera.
    ws2.send(Message::Binary(shared::encode_control(&ControlMessage {
        input: Input::default(),
        cam: ClientCam {
            x: 0.0,
            y: 0.0,
            width: 9,
            height: 9,
        },
    })))
    .await
    .unwrap();
    for _ in 0..200 {
        if engine.tables.cameras[1].load().width == 9 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.tables.cameras[1].load().width, 9);

    ws1.close(None).await.unwrap();
    wait_for_clients(&engine, 1).await;

    // The survivor's camera followed it down into slot 0.
    assert_eq!(engine.tables.cameras[0].load().width, 9);
    assert_eq!(
        engine.tables.cameras[1].load(),
        engine.tables.initial_camera()
    );
}
