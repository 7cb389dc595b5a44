//! Device client over a real UDP socket

use std::sync::Arc;

use airctrl_client::{ClientConfig, DeviceClient};
use airctrl_coap::testing::{combo_status, SimulatedDevice};
use airctrl_coap::{UdpConfig, UdpConnector};
use airctrl_conv::CapabilityRegistry;
use airctrl_core::{Capability, CapabilityValue, DeviceIdentity};
use serde_json::json;

fn udp_client() -> DeviceClient {
    let config = ClientConfig {
        request_timeout_ms: 1000,
        handshake_timeout_ms: 1000,
        auto_poll: false,
        ..Default::default()
    };
    DeviceClient::new(
        Arc::new(CapabilityRegistry::new()),
        Arc::new(UdpConnector::new(UdpConfig::default())),
        config,
    )
}

#[tokio::test]
async fn test_udp_poll_and_command() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let server = device.serve_udp().await.unwrap();

    let client = udp_client();
    let identity = DeviceIdentity::new("127.0.0.1").with_port(server.port());
    let handle = client.connect(identity).await.unwrap();

    assert_eq!(handle.profile().model_id, "AC2729/10");
    let snapshot = client.get_status(&handle).await.unwrap();
    assert_eq!(snapshot.is_on(), Some(true));

    client
        .set_status(&handle, Capability::Mode, CapabilityValue::from("sleep"))
        .await
        .unwrap();
    assert_eq!(device.status().get("mode"), Some(&json!("S")));

    client.disconnect(&handle).await;
}

#[tokio::test]
async fn test_udp_recovers_from_corrupted_status() {
    let device = SimulatedDevice::new(combo_status("AC2729/10"));
    let server = device.serve_udp().await.unwrap();

    let client = udp_client();
    let handle = client
        .connect(DeviceIdentity::new("127.0.0.1").with_port(server.port()))
        .await
        .unwrap();

    device.corrupt_next_status(1);
    device.send_spurious_datagrams(1);
    assert!(client.get_status(&handle).await.is_ok());
    assert_eq!(device.handshakes(), 2);
}
