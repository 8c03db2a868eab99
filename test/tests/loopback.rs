//! End-to-end replication over real loopback TCP.

use std::{thread, time::Duration};

use limn_producer::{
    shared::ConnectionRegistry, Pose, Serializable, ServerConfig, SharedContext, Window,
    WindowOptions,
};
use limn_test::wait_until;
use serde_json::{json, Value};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Cube {
    size: f32,
}

impl Serializable for Cube {
    fn serialize(&self, _bufs: &mut Vec<Vec<u8>>) -> Value {
        json!({ "type": "cube", "size": self.size })
    }
}

#[test]
fn registry_to_registry_over_tcp() {
    init_logging();

    let mut server = ConnectionRegistry::new();
    assert!(server.connect_server(false, 0));
    let port = server.listen_port().expect("bound port");

    let mut client = ConnectionRegistry::new();
    client.connect_client(true, "127.0.0.1", port);
    let client_conn = client.connection_ids()[0];

    assert!(wait_until(TIMEOUT, || !server.connection_ids().is_empty()));
    let server_conn = server.connection_ids()[0];

    assert!(client.send_to(
        client_conn,
        json!({ "type": "key_press", "key": 65 }),
        vec![vec![7u8, 8]],
    ));

    let mut received = Vec::new();
    assert!(wait_until(TIMEOUT, || {
        received = server.drain_inbox(server_conn);
        !received.is_empty()
    }));
    assert_eq!(received[0].message_type(), Some("key_press"));
    assert_eq!(received[0].header["conn_id"], json!(server_conn));
    assert_eq!(received[0].payloads, vec![vec![7u8, 8]]);
}

#[test]
fn producer_replicates_a_scene_to_a_tcp_viewer() {
    init_logging();

    let shared = SharedContext::new();
    shared
        .set_server_mode(ServerConfig {
            blocking: false,
            port: 0,
            ..Default::default()
        })
        .expect("server mode");
    let port = shared.listen_port().expect("bound port");

    let mut viewer = ConnectionRegistry::new();
    viewer.connect_client(true, "127.0.0.1", port);
    let viewer_conn = viewer.connection_ids()[0];

    assert!(wait_until(TIMEOUT, || shared.can_render()));

    let mut window = Window::new(&shared, WindowOptions::titled("loopback"));
    let obj = window.add(Cube { size: 2.0 }, Pose::from_pos([1.0, 0.0, 0.0]));
    window.render(false, false);

    let mut scene = None;
    assert!(wait_until(TIMEOUT, || {
        for msg in viewer.drain_inbox(viewer_conn) {
            if msg.message_type() == Some("scene") {
                scene = Some(msg);
            }
        }
        scene.is_some()
    }));
    let scene = scene.unwrap();
    let objects = scene.header["data"]["objects"].as_array().unwrap();
    assert_eq!(objects[0]["id"], json!(obj));
    assert_eq!(objects[0]["type"], json!("cube"));
    assert_eq!(objects[0]["pose"]["pos"], json!([1.0, 0.0, 0.0]));
    assert_eq!(scene.header["data"]["window"]["title"], json!("loopback"));

    // A second frame with no mutations carries no object patches.
    window.render(false, false);
    let mut second = None;
    assert!(wait_until(TIMEOUT, || {
        for msg in viewer.drain_inbox(viewer_conn) {
            if msg.message_type() == Some("scene") {
                second = Some(msg);
            }
        }
        second.is_some()
    }));
    assert_eq!(second.unwrap().header["data"]["objects"], json!([]));
}

#[test]
fn wait_for_key_blocks_until_the_viewer_presses_enter() {
    init_logging();

    let shared = SharedContext::new();
    shared
        .set_server_mode(ServerConfig {
            blocking: false,
            port: 0,
            ..Default::default()
        })
        .expect("server mode");
    let port = shared.listen_port().expect("bound port");

    let mut viewer = ConnectionRegistry::new();
    viewer.connect_client(true, "127.0.0.1", port);
    let viewer_conn = viewer.connection_ids()[0];

    assert!(wait_until(TIMEOUT, || shared.can_render()));

    let mut window = Window::new(&shared, WindowOptions::default());
    window.add(Cube { size: 1.0 }, Pose::identity());

    let producer = thread::spawn(move || {
        window.render(false, true);
        window
    });

    // The frame is followed by a wait sentinel.
    let mut saw_wait = false;
    assert!(wait_until(TIMEOUT, || {
        for msg in viewer.drain_inbox(viewer_conn) {
            if msg.message_type() == Some("wait") {
                saw_wait = true;
            }
        }
        saw_wait
    }));

    viewer.send_to(viewer_conn, json!({ "type": "key_press", "key": 257 }), Vec::new());

    let window = producer.join().expect("producer thread");
    drop(window);
}
