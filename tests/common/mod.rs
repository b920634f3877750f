//! Common test utilities and shared imports

// Not every test file uses every helper.
#![allow(dead_code, unused_imports)]

pub use bytes::Bytes;
pub use smx_rs::protocol::{Packet, SensorTestResponse, TAG_FACTORY_RESET, TAG_READ_CONFIG, TAG_RESET_PANELS, TAG_SENSOR_TEST, TAG_WRITE_CONFIG};
pub use smx_rs::sensor::{PANEL_COUNT, PANEL_RECORD_SIZE, PanelReading, pack_panel_records};
pub use smx_rs::{
    CONFIG_SIZE, DeviceLock, DeviceSession, PadConfig, SensorTestMode, SimulatedHandle, SimulatedPad, SmxError,
    UpdateReason,
};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

use parking_lot::Mutex;
use std::io;

pub type Session = DeviceSession<SimulatedPad>;
pub type Notifications = Arc<Mutex<Vec<(usize, UpdateReason)>>>;

/// A configuration block filled with `byte`.
pub fn config_filled(byte: u8) -> PadConfig {
    PadConfig::from_bytes([byte; CONFIG_SIZE])
}

/// A session on a simulated pad, opened but not yet ticked.
pub fn opened_session(sim: SimulatedPad) -> Session {
    let session = DeviceSession::new(sim, DeviceLock::new(), None);
    session
        .open_device_handle(SimulatedHandle::player(0))
        .expect("Failed to open simulated pad");
    session
}

/// A session that has been activated and has read the pad's configuration.
pub fn connected_session(sim: SimulatedPad) -> Session {
    let session = opened_session(sim);
    // First tick reads the pad's identity, the second activates it.
    session.update().expect("first tick failed");
    session.update().expect("second tick failed");
    assert!(session.is_connected(), "pad should be connected after activation");
    session
}

/// Record every notification the session sends.
pub fn record_notifications(session: &Session) -> Notifications {
    let log: Notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    session.set_update_callback(Some(Box::new(move |pad: usize, reason: UpdateReason| {
        sink.lock().push((pad, reason));
    })));
    log
}

pub fn count_reason(log: &Notifications, reason: UpdateReason) -> usize {
    log.lock().iter().filter(|(_, r)| *r == reason).count()
}

/// Run `f` against the simulated pad behind the session.
pub fn with_sim<R>(session: &Session, f: impl FnOnce(&mut SimulatedPad) -> R) -> R {
    let mut state = session.lock();
    f(state.connection_mut())
}

/// Build a `y` response for `mode` with the given panels answering.
pub fn sensor_response(mode: u8, panels: &[(usize, PanelReading)]) -> Bytes {
    let mut records = [[0u8; PANEL_RECORD_SIZE]; PANEL_COUNT];
    for (panel, reading) in panels {
        records[*panel] = reading.encode();
    }
    Packet::SensorTestData(SensorTestResponse {
        mode,
        words: pack_panel_records(&records),
    })
    .to_bytes()
}

/// Log output recorded while running under [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock()).lines().map(str::to_owned).collect()
    }

    /// Lines logged at `level` (e.g. "WARN") whose text contains `needle`.
    pub fn count(&self, level: &str, needle: &str) -> usize {
        self.lines()
            .iter()
            .filter(|line| line.contains(level) && line.contains(needle))
            .count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with every event on this thread recorded, down to `TRACE`.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, logs)
}

pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}
