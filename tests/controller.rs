mod common;

use common::{test_config, Failure, MockTransport, ADDRESS};
use elk_fastlink::profile::DeviceType;
use elk_fastlink::protocol;
use elk_fastlink::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

async fn controller(transport: &MockTransport, config: ControllerConfig) -> DeviceController {
    DeviceController::new(Arc::new(transport.clone()), ADDRESS, config)
        .await
        .unwrap()
}

/// Seeds the state file before the controller reads it
fn seed(config: &ControllerConfig, record: PersistedRecord) {
    StateStore::new(config.state_path.clone())
        .try_save(ADDRESS, &record)
        .unwrap();
}

fn rgb_mode() -> PersistedRecord {
    PersistedRecord {
        brightness_mode: Some(BrightnessMode::Rgb),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn fresh_device_starts_with_defaults() {
    let transport = MockTransport::new(Some("ELK-BLEDDM"));
    let device = controller(&transport, test_config("defaults")).await;

    assert_eq!(device.profile().device_type, DeviceType::ElkBleddm);
    assert_eq!(device.name(), "ELK-BLEDDM");
    assert!(!device.is_on());
    assert_eq!(device.rgb_color(), (255, 255, 255));
    assert_eq!(device.brightness(), 255);
    assert_eq!(device.color_temp_kelvin(), 5000);
    assert_eq!(device.brightness_mode(), BrightnessMode::Auto);
    assert_eq!(device.current_effect(), None);

    // the first connect is deferred
    assert_eq!(transport.connects(), 0);
    assert!(!device.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn persisted_state_is_restored_and_clamped() {
    let transport = MockTransport::new(None);
    let config = test_config("restore");
    seed(
        &config,
        PersistedRecord {
            rgb: Some([1, 2, 3]),
            brightness: Some(0),
            color_temp: Some(12_000),
            brightness_mode: Some(BrightnessMode::Rgb),
        },
    );

    let device = controller(&transport, config).await;

    assert_eq!(device.name(), ADDRESS);
    assert_eq!(device.rgb_color(), (1, 2, 3));
    assert_eq!(device.brightness(), 1);
    assert_eq!(device.color_temp_kelvin(), 6500);
    assert_eq!(device.brightness_mode(), BrightnessMode::Rgb);
    assert!(!device.is_on());
}

#[tokio::test(start_paused = true)]
async fn rgb_mode_sends_one_scaled_frame() {
    let transport = MockTransport::new(None);
    let config = test_config("rgb-mode");
    seed(&config, rgb_mode());
    let device = controller(&transport, config).await;

    device.set_color((200, 100, 50), Some(128)).await.unwrap();

    assert_eq!(transport.frames(), vec![protocol::color(100, 50, 25).to_vec()]);
    assert_eq!(device.rgb_color(), (200, 100, 50));
    assert_eq!(device.brightness(), 128);
    assert!(device.is_on());
    assert_eq!(transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_set_color_is_idempotent() {
    let transport = MockTransport::new(None);
    let config = test_config("idempotent");
    let store = StateStore::new(config.state_path.clone());
    seed(&config, rgb_mode());
    let device = controller(&transport, config).await;

    device.set_color((10, 20, 30), Some(200)).await.unwrap();
    let first = store.load(ADDRESS);
    device.set_color((10, 20, 30), Some(200)).await.unwrap();
    let second = store.load(ADDRESS);

    let frames = transport.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], frames[1]);
    assert_eq!(first, second);
    assert_eq!(second.rgb, Some([10, 20, 30]));
    assert_eq!(second.brightness, Some(200));
}

#[tokio::test(start_paused = true)]
async fn turn_on_restores_color_after_power_frame() {
    let transport = MockTransport::new(Some("ELK-BLEDDM"));
    let device = controller(&transport, test_config("turn-on")).await;

    device.turn_on().await.unwrap();

    assert_eq!(
        transport.frames(),
        vec![
            device.profile().turn_on_frame.to_vec(),
            protocol::color(255, 255, 255).to_vec(),
            protocol::native_brightness(100).to_vec(),
        ]
    );
    assert!(device.is_on());
}

#[tokio::test(start_paused = true)]
async fn turn_off_persists_and_powers_down() {
    let transport = MockTransport::new(Some("MELK-OA10"));
    let config = test_config("turn-off");
    let store = StateStore::new(config.state_path.clone());
    let device = controller(&transport, config).await;

    device.turn_on().await.unwrap();
    transport.clear_frames();
    device.turn_off().await.unwrap();

    assert_eq!(
        transport.frames(),
        vec![device.profile().turn_off_frame.to_vec()]
    );
    assert!(!device.is_on());
    assert_eq!(store.load(ADDRESS).rgb, Some([255, 255, 255]));
}

#[tokio::test(start_paused = true)]
async fn writes_are_retried_three_times() {
    let transport = MockTransport::new(None);
    transport.state.lock().fail_always = Some(Failure::Ble);
    let device = controller(&transport, test_config("retry-bound")).await;

    let err = device.turn_off().await.unwrap_err();

    assert!(matches!(err, Error::BleError(_)), "got {err:?}");
    assert_eq!(transport.write_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn not_found_is_not_retried() {
    let transport = MockTransport::new(None);
    transport.state.lock().fail_always = Some(Failure::NotFound);
    let device = controller(&transport, test_config("not-found")).await;

    let err = device.turn_off().await.unwrap_err();

    assert!(matches!(err, Error::PeripheralNotFound(_)), "got {err:?}");
    assert_eq!(transport.write_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_failed_write_is_recovered() {
    let transport = MockTransport::new(None);
    {
        let mut state = transport.state.lock();
        state.fail_next = 1;
        state.fail_kind = Some(Failure::Ble);
    }
    let device = controller(&transport, test_config("recover-write")).await;

    device.turn_off().await.unwrap();

    assert_eq!(transport.write_attempts(), 2);
    assert_eq!(transport.frames().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn color_temperature_is_clamped_and_emulated() {
    let transport = MockTransport::new(None);
    let config = test_config("kelvin");
    seed(&config, rgb_mode());
    let device = controller(&transport, config).await;
    assert_eq!(device.min_color_temp_kelvin(), 2700);
    assert_eq!(device.max_color_temp_kelvin(), 6500);

    device
        .set_color_temperature_kelvin(1000, Some(128))
        .await
        .unwrap();

    assert_eq!(transport.frames(), vec![protocol::color(128, 39, 6).to_vec()]);
    assert_eq!(device.color_temp_kelvin(), 2700);
    assert_eq!(device.rgb_color(), (255, 77, 12));
    assert_eq!(device.brightness(), 128);
}

#[tokio::test(start_paused = true)]
async fn unchanged_brightness_mode_is_a_no_op() {
    let transport = MockTransport::new(None);
    let config = test_config("mode-same");
    seed(
        &config,
        PersistedRecord {
            brightness_mode: Some(BrightnessMode::Native),
            ..Default::default()
        },
    );
    let device = controller(&transport, config).await;

    device
        .set_brightness_mode(BrightnessMode::Native)
        .await
        .unwrap();

    assert_eq!(transport.write_attempts(), 0);
    assert_eq!(transport.connects(), 0);
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn brightness_mode_change_restarts_the_session() {
    let transport = MockTransport::new(None);
    let config = test_config("mode-change");
    let store = StateStore::new(config.state_path.clone());
    let device = controller(&transport, config).await;

    device.turn_off().await.unwrap();
    assert_eq!(transport.connects(), 1);

    device
        .set_brightness_mode(BrightnessMode::Rgb)
        .await
        .unwrap();

    assert_eq!(transport.disconnects(), 1);
    assert_eq!(transport.connects(), 2);
    assert!(device.is_connected().await);
    assert_eq!(device.brightness_mode(), BrightnessMode::Rgb);
    assert_eq!(
        store.load(ADDRESS).brightness_mode,
        Some(BrightnessMode::Rgb)
    );
}

#[tokio::test(start_paused = true)]
async fn effect_can_be_started_and_cleared() {
    let transport = MockTransport::new(None);
    let config = test_config("effect");
    seed(&config, rgb_mode());
    let device = controller(&transport, config).await;

    device.set_color((10, 20, 30), Some(255)).await.unwrap();
    device.set_effect(Some(0x8b)).await.unwrap();
    assert_eq!(device.current_effect(), Some(0x8b));

    device.set_effect(Some(0)).await.unwrap();

    assert_eq!(device.current_effect(), None);
    assert_eq!(
        transport.frames(),
        vec![
            protocol::color(10, 20, 30).to_vec(),
            protocol::effect(0x8b).to_vec(),
            protocol::effect_speed(16).to_vec(),
            protocol::color(10, 20, 30).to_vec(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn effect_speed_is_clamped_and_reapplied() {
    let transport = MockTransport::new(None);
    let device = controller(&transport, test_config("effect-speed")).await;

    device
        .set_effect(Some(Effect::JumpRedGreenBlue.id()))
        .await
        .unwrap();
    transport.clear_frames();

    device.set_effect_speed(99).await.unwrap();

    assert_eq!(device.effect_speed(), 31);
    assert_eq!(
        transport.frames(),
        vec![
            protocol::effect_speed(31).to_vec(),
            protocol::effect(Effect::JumpRedGreenBlue.id()).to_vec(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn auto_mode_falls_back_to_scaled_rgb() {
    let transport = MockTransport::new(None);
    transport.state.lock().reject_native = true;
    let device = controller(&transport, test_config("auto-fallback")).await;

    device.set_color((200, 100, 50), Some(255)).await.unwrap();

    // unscaled color, native frame refused three times, then the scaled color
    assert_eq!(
        transport.frames(),
        vec![
            protocol::color(200, 100, 50).to_vec(),
            protocol::color(200, 100, 50).to_vec(),
        ]
    );
    assert_eq!(transport.write_attempts(), 5);
    assert_eq!(device.brightness_mode(), BrightnessMode::Auto);
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_recovered_within_the_command() {
    let transport = MockTransport::new(None);
    transport.state.lock().connect_failures = 1;
    let device = controller(&transport, test_config("connect-retry")).await;

    device.turn_off().await.unwrap();

    assert_eq!(transport.connects(), 2);
    assert_eq!(
        transport.frames(),
        vec![device.profile().turn_off_frame.to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn peer_disconnect_triggers_reconnect() {
    let transport = MockTransport::new(None);
    let device = controller(&transport, test_config("peer-drop")).await;
    device.turn_off().await.unwrap();
    assert_eq!(transport.connects(), 1);

    transport.drop_link();
    time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.connects(), 2);
    assert!(device.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn deferred_connect_happens_in_the_background() {
    let transport = MockTransport::new(None);
    let device = controller(&transport, test_config("deferred")).await;

    time::sleep(Duration::from_secs(4)).await;

    assert_eq!(transport.connects(), 1);
    assert!(device.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_reconnects_after_silent_drop() {
    let transport = MockTransport::new(None);
    let device = controller(&transport, test_config("heartbeat")).await;
    device.turn_off().await.unwrap();

    time::sleep(Duration::from_secs(4)).await;
    assert_eq!(transport.connects(), 1);

    transport.drop_link_silently();
    time::sleep(Duration::from_secs(31)).await;

    assert_eq!(transport.connects(), 2);
    assert!(device.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_reconnecting() {
    let transport = MockTransport::new(None);
    let device = controller(&transport, test_config("shutdown")).await;
    device.turn_off().await.unwrap();

    device.shutdown().await;
    assert!(device.connection().is_closed());
    assert_eq!(transport.disconnects(), 1);

    transport.drop_link();
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.connects(), 1);

    // stop after shutdown is harmless
    device.stop().await;
    assert_eq!(transport.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_address_fails_construction() {
    let transport = MockTransport::new(None);
    transport.state.lock().unknown = true;

    let result =
        DeviceController::new(Arc::new(transport.clone()), ADDRESS, test_config("unknown")).await;

    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test(start_paused = true)]
async fn state_survives_a_new_controller() {
    let transport = MockTransport::new(None);
    let config = test_config("round-trip");
    let path = config.state_path.clone();

    let device = controller(&transport, config).await;
    device.set_color((12, 34, 56), Some(99)).await.unwrap();
    device
        .set_color_temperature_kelvin(3000, None)
        .await
        .unwrap();
    device.shutdown().await;

    let restored = controller(&transport, test_config("round-trip-2").with_state_path(path)).await;
    assert_eq!(restored.rgb_color(), device.rgb_color());
    assert_eq!(restored.brightness(), 99);
    assert_eq!(restored.color_temp_kelvin(), 3000);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_attempt() {
    let transport = MockTransport::new(None);
    transport.state.lock().connect_delay = Duration::from_millis(100);
    let device = controller(&transport, test_config("single-flight")).await;
    let connection = device.connection().clone();

    let started = time::Instant::now();
    let (first_done, second_done) = tokio::join!(
        async {
            connection.ensure_connected().await;
            time::Instant::now()
        },
        async {
            connection.ensure_connected().await;
            time::Instant::now()
        },
    );

    // the second caller sees the attempt in flight and returns at once
    assert_eq!(second_done, started);
    assert_eq!(first_done - started, Duration::from_millis(100));
    assert_eq!(transport.connects(), 1);
    assert!(connection.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn repeated_connect_failures_keep_one_pending_reconnect() {
    let transport = MockTransport::new(None);
    transport.state.lock().connect_failures = 10;
    let device = controller(&transport, test_config("one-reconnect")).await;
    let connection = device.connection();

    for _ in 0..3 {
        connection.ensure_connected().await;
    }
    assert_eq!(transport.connects(), 3);

    // one reconnect every 50ms, not one per failure
    time::sleep(Duration::from_millis(60)).await;
    assert_eq!(transport.connects(), 4);
    time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.connects(), 5);

    device.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn late_disconnect_of_replaced_link_is_ignored() {
    let transport = MockTransport::new(None);
    let device = controller(&transport, test_config("stale-callback")).await;
    device.turn_off().await.unwrap();

    let stale = transport.drop_link_deferred().unwrap();
    device.turn_off().await.unwrap();
    assert_eq!(transport.connects(), 2);

    stale();
    assert!(device.is_connected().await);
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.connects(), 2);
    assert!(device.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn link_without_write_characteristic_is_closed() {
    let transport = MockTransport::new(None);
    transport.state.lock().missing_characteristic = true;
    let device = controller(&transport, test_config("no-characteristic")).await;

    device.connection().ensure_connected().await;

    assert_eq!(transport.connects(), 1);
    assert_eq!(transport.disconnects(), 1);
    assert!(!device.is_connected().await);
    device.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn controllers_sharing_a_state_file_keep_both_records() {
    let config = test_config("shared-file");
    let path = config.state_path.clone();

    let mut devices = Vec::new();
    for address in ["AA:AA:AA:AA:AA:AA", "BB:BB:BB:BB:BB:BB"] {
        let transport = MockTransport::new(None);
        let device = DeviceController::new(Arc::new(transport), address, config.clone())
            .await
            .unwrap();
        devices.push(Arc::new(device));
    }

    let tasks: Vec<_> = devices
        .iter()
        .cloned()
        .map(|device| {
            tokio::spawn(async move {
                for level in 1..=40u8 {
                    device.set_brightness(level).await.unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let store = StateStore::new(path);
    for device in &devices {
        assert_eq!(store.load(device.address()).brightness, Some(40));
        device.shutdown().await;
    }
}
