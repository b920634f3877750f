//! Tests for the sensor test mode request/response protocol

mod common;

use common::*;

const CALIBRATED: u8 = b'1';
const UNCALIBRATED: u8 = b'0';

fn panel0_reading() -> PanelReading {
    PanelReading {
        bad_sensor_input: [false, false, false, false],
        sensor_level: [10, 20, 30, 40],
        dip_switch: 5,
    }
}

/// A connected session polling calibrated values, whose pad never answers
/// on its own. The first request is sent at `t0`.
fn polling_session(t0: Instant) -> Session {
    let session = connected_session(SimulatedPad::new());
    with_sim(&session, |sim| sim.set_drop_sensor_responses(true));
    session.set_sensor_test_mode(SensorTestMode::CalibratedValues);
    session.lock().update_at(t0).unwrap();
    session
}

fn sensor_requests(session: &Session) -> Vec<Bytes> {
    with_sim(session, |sim| {
        sim.sent_commands()
            .iter()
            .filter(|cmd| cmd.first() == Some(&TAG_SENSOR_TEST))
            .cloned()
            .collect()
    })
}

#[test]
fn test_mode_off_sends_nothing() {
    let session = connected_session(SimulatedPad::new());
    for _ in 0..5 {
        session.update().unwrap();
    }
    assert!(sensor_requests(&session).is_empty());
    assert_eq!(session.sensor_test_data(), None);
}

#[test]
fn test_request_carries_mode() {
    let t0 = Instant::now();
    let session = polling_session(t0);

    assert_eq!(sensor_requests(&session), vec![Bytes::from_static(b"y1\n")]);
    assert_eq!(
        session.lock().awaiting_sensor_response(),
        Some(SensorTestMode::CalibratedValues)
    );
}

#[test]
fn test_decodes_valid_panel_and_marks_others_absent() {
    let t0 = Instant::now();
    let session = polling_session(t0);
    let log = record_notifications(&session);

    with_sim(&session, |sim| {
        sim.inject_packet(sensor_response(CALIBRATED, &[(0, panel0_reading())]))
    });
    session.lock().update_at(t0 + Duration::from_millis(10)).unwrap();

    let data = session.sensor_test_data().expect("sensor data should be decoded");
    assert!(data.have_data_from_panel[0]);
    assert_eq!(data.bad_sensor_input[0], [false, false, false, false]);
    assert_eq!(data.sensor_level[0], [10, 20, 30, 40]);
    assert_eq!(data.dip_switch_per_panel[0], 5);
    for panel in 1..PANEL_COUNT {
        assert!(!data.have_data_from_panel[panel], "panel {panel} should be absent");
        assert_eq!(data.sensor_level[panel], [0, 0, 0, 0]);
    }

    assert_eq!(session.lock().awaiting_sensor_response(), None);
    assert_eq!(log.lock().as_slice(), &[(0, UpdateReason::Updated)]);
}

#[test]
fn test_simulated_pad_answers_requests() {
    let mut sim = SimulatedPad::new();
    let reading = PanelReading {
        bad_sensor_input: [false, true, false, false],
        sensor_level: [-5, 0, 1000, i16::MAX],
        dip_switch: 0x0F,
    };
    sim.set_panel(4, Some(reading));
    sim.set_panel(8, Some(panel0_reading()));
    let session = connected_session(sim);

    session.set_sensor_test_mode(SensorTestMode::UncalibratedValues);
    session.update().unwrap();

    let data = session.sensor_test_data().expect("sensor data should be decoded");
    assert_eq!(data.panel(4), Some(reading));
    assert_eq!(data.panel(8), Some(panel0_reading()));
    assert_eq!(data.panels_present(), 2);
}

#[test]
fn test_wrong_echo_is_discarded_and_request_stays_outstanding() {
    let t0 = Instant::now();
    let session = polling_session(t0);

    with_sim(&session, |sim| {
        sim.inject_packet(sensor_response(UNCALIBRATED, &[(0, panel0_reading())]))
    });
    let (result, logs) = capture_logs(|| session.lock().update_at(t0 + Duration::from_millis(10)));
    result.unwrap();

    assert_eq!(logs.count("INFO", "different mode"), 1, "{:#?}", logs.lines());
    assert_eq!(session.sensor_test_data(), None);
    assert_eq!(
        session.lock().awaiting_sensor_response(),
        Some(SensorTestMode::CalibratedValues)
    );
    // Still outstanding, so no new request went out.
    assert_eq!(sensor_requests(&session).len(), 1);

    // The real answer can still be accepted.
    with_sim(&session, |sim| {
        sim.inject_packet(sensor_response(CALIBRATED, &[(0, panel0_reading())]))
    });
    session.lock().update_at(t0 + Duration::from_millis(20)).unwrap();

    assert_eq!(
        session.sensor_test_data().and_then(|data| data.panel(0)),
        Some(panel0_reading())
    );
    assert_eq!(session.lock().awaiting_sensor_response(), None);
}

#[test]
fn test_response_for_changed_mode_is_dropped_but_clears_request() {
    let t0 = Instant::now();
    let session = polling_session(t0);

    session.set_sensor_test_mode(SensorTestMode::UncalibratedValues);
    with_sim(&session, |sim| {
        sim.inject_packet(sensor_response(CALIBRATED, &[(0, panel0_reading())]))
    });
    session.lock().update_at(t0 + Duration::from_millis(10)).unwrap();

    assert_eq!(session.sensor_test_data(), None);
    assert_eq!(session.lock().awaiting_sensor_response(), None);

    // With the slot free, the next tick asks for the new mode.
    session.lock().update_at(t0 + Duration::from_millis(20)).unwrap();
    assert_eq!(
        sensor_requests(&session),
        vec![Bytes::from_static(b"y1\n"), Bytes::from_static(b"y0\n")]
    );
}

#[test]
fn test_unsolicited_response_is_ignored() {
    let session = connected_session(SimulatedPad::new());
    let log = record_notifications(&session);

    with_sim(&session, |sim| {
        sim.inject_packet(sensor_response(CALIBRATED, &[(0, panel0_reading())]))
    });
    let (result, logs) = capture_logs(|| session.update());
    result.unwrap();

    assert_eq!(session.sensor_test_data(), None);
    assert!(log.lock().is_empty());
    assert_eq!(logs.count("INFO", "unexpected sensor test response"), 1, "{:#?}", logs.lines());
}

#[test]
fn test_lost_request_is_resent_after_timeout() {
    let t0 = Instant::now();
    let session = polling_session(t0);

    session.lock().update_at(t0 + Duration::from_millis(1999)).unwrap();
    assert_eq!(sensor_requests(&session).len(), 1);

    session.lock().update_at(t0 + Duration::from_millis(2000)).unwrap();
    assert_eq!(sensor_requests(&session).len(), 2);

    // The resend restarted the window.
    session.lock().update_at(t0 + Duration::from_millis(3999)).unwrap();
    assert_eq!(sensor_requests(&session).len(), 2);
    session.lock().update_at(t0 + Duration::from_millis(4000)).unwrap();
    assert_eq!(sensor_requests(&session).len(), 3);
}

#[test]
fn test_timeout_is_configurable() {
    let t0 = Instant::now();
    let options = smx_rs::SessionOptions::default().with_sensor_request_timeout(Duration::from_millis(100));
    let session = DeviceSession::with_options(SimulatedPad::new(), DeviceLock::new(), None, options);
    session.open_device_handle(SimulatedHandle::player(0)).unwrap();
    with_sim(&session, |sim| sim.set_drop_sensor_responses(true));
    session.set_sensor_test_mode(SensorTestMode::Noise);

    session.lock().update_at(t0).unwrap();
    session.lock().update_at(t0 + Duration::from_millis(99)).unwrap();
    assert_eq!(sensor_requests(&session).len(), 1);
    session.lock().update_at(t0 + Duration::from_millis(100)).unwrap();
    assert_eq!(sensor_requests(&session), vec![Bytes::from_static(b"y2\n"); 2]);
}

#[test]
fn test_answered_requests_repeat_every_tick() {
    let session = connected_session(SimulatedPad::new());
    session.set_sensor_test_mode(SensorTestMode::Tare);

    for _ in 0..3 {
        session.update().unwrap();
    }

    assert_eq!(sensor_requests(&session).len(), 3);
    assert!(session.sensor_test_data().is_some());
    assert_eq!(session.sensor_test_data().map(|data| data.panels_present()), Some(0));
}

#[test]
fn test_truncated_response_leaves_request_outstanding() {
    let t0 = Instant::now();
    let session = polling_session(t0);

    let full = sensor_response(CALIBRATED, &[(0, panel0_reading())]);
    with_sim(&session, |sim| sim.inject_packet(full.slice(..full.len() - 1)));
    session.lock().update_at(t0 + Duration::from_millis(10)).unwrap();

    assert_eq!(session.sensor_test_data(), None);
    assert_eq!(
        session.lock().awaiting_sensor_response(),
        Some(SensorTestMode::CalibratedValues)
    );
}

#[test]
fn test_snapshot_survives_disconnect() {
    let mut sim = SimulatedPad::new();
    sim.set_panel(0, Some(panel0_reading()));
    let session = connected_session(sim);
    session.set_sensor_test_mode(SensorTestMode::CalibratedValues);
    session.update().unwrap();

    session.close_device();

    assert_eq!(
        session.sensor_test_data().and_then(|data| data.panel(0)),
        Some(panel0_reading())
    );
    assert_eq!(session.lock().awaiting_sensor_response(), None);
}
