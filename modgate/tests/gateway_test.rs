//! Gateway lifecycle against the in-memory transport.

use std::time::Duration;

use modgate::{Gateway, GatewayConfig};
use modgate_controller::{MockTransport, PollExit, PollState};

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn config(port: u16, max_attempts: u32) -> GatewayConfig {
    GatewayConfig::parse(&format!(
        r#"{{
            device: {{ polling_ms: 5, read_period_ms: 0, err_timeout_ms: 0, max_attempts: {max_attempts} }},
            tags: [
                {{ name: "temp", desc: "Temperature", group: "state", address: 1, operation: "read_float" }},
            ],
            http: {{ listen: "127.0.0.1:{port}" }},
        }}"#
    ))
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_signal_shuts_everything_down() {
    let mock = MockTransport::new();
    mock.set_f32(1, 21.5);

    let gateway = Gateway::new(config(free_port().await, 5), mock.clone()).unwrap();
    let controller = gateway.controller().clone();
    let poller = gateway.spawn_poller().unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serve = tokio::spawn(gateway.serve(async move {
        let _ = stop_rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.state(), PollState::Running);
    assert!(controller.requests() > 0);

    stop_tx.send(()).unwrap();
    let served = tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .unwrap()
        .unwrap();
    assert!(served.is_ok());

    let exit = tokio::task::spawn_blocking(move || poller.join().unwrap())
        .await
        .unwrap();
    assert_eq!(exit, PollExit::Shutdown);
    assert!(!mock.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exhausted_engine_ends_serving() {
    let mock = MockTransport::new();
    let gateway = Gateway::new(config(free_port().await, 3), mock.clone()).unwrap();
    mock.fail_reads(true);

    let poller = gateway.spawn_poller().unwrap();
    let served = tokio::time::timeout(
        Duration::from_secs(5),
        gateway.serve(std::future::pending()),
    )
    .await
    .unwrap();
    assert!(served.is_ok());

    let exit = tokio::task::spawn_blocking(move || poller.join().unwrap())
        .await
        .unwrap();
    assert_eq!(exit, PollExit::AttemptsExhausted { attempts: 3 });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_bind_failure_is_reported() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let gateway = Gateway::new(config(port, 5), MockTransport::new()).unwrap();
    let controller = gateway.controller().clone();

    let served = tokio::time::timeout(
        Duration::from_secs(5),
        gateway.serve(std::future::pending()),
    )
    .await
    .unwrap();

    assert!(served.is_err());
    assert!(controller.is_closed());
}
