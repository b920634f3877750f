// src/session.rs

use crate::config::PadConfig;
use crate::connection::{Completion, Connection, SERIAL_SIZE};
use crate::error::Result;
use crate::lock::{DeviceLock, DeviceLockGuard};
use crate::notify::{Notifier, UpdateCallback, UpdateReason};
use crate::options::SessionOptions;
use crate::protocol::{Command, Packet, SensorTestMode, SensorTestResponse, TAG_SENSOR_TEST};
use crate::sensor::SensorTestData;
use crate::wake::WakeSignal;
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// High-level identity of a connected pad.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadInfo {
    pub connected: bool,
    pub serial: [u8; SERIAL_SIZE],
    pub firmware_version: u16,
}

impl PadInfo {
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(self.serial)
    }
}

/// One pad slot: a [`Connection`] plus the protocol state kept on top of it.
///
/// The session outlives individual connections. Its state can only be
/// reached through a guard, which requires holding the [`DeviceLock`] shared
/// with the sibling sessions. The convenience methods here each take the
/// lock for the duration of the call.
pub struct DeviceSession<C: Connection> {
    lock: DeviceLock,
    state: Mutex<SessionState<C>>,
}

impl<C: Connection> DeviceSession<C> {
    pub fn new(connection: C, lock: DeviceLock, wake: Option<WakeSignal>) -> Self {
        Self::with_options(connection, lock, wake, SessionOptions::default())
    }

    pub fn with_options(connection: C, lock: DeviceLock, wake: Option<WakeSignal>, options: SessionOptions) -> Self {
        Self {
            lock,
            state: Mutex::new(SessionState::new(connection, wake, options)),
        }
    }

    pub fn device_lock(&self) -> &DeviceLock {
        &self.lock
    }

    /// Acquire the shared lock and return this session's state.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the shared lock.
    pub fn lock(&self) -> SessionGuard<'_, C> {
        let device = self.lock.lock();
        SessionGuard {
            state: self.state.lock(),
            _device: device,
        }
    }

    /// Reach this session's state through a shared lock the caller already
    /// holds, e.g. when one thread updates every sibling in a single pass.
    ///
    /// # Panics
    ///
    /// Panics if `held` guards a different lock than this session's, or if
    /// this thread already holds this session's state.
    pub fn locked<'a>(&'a self, held: &'a DeviceLockGuard<'_>) -> MutexGuard<'a, SessionState<C>> {
        if !held.belongs_to(&self.lock) {
            panic!("device session accessed with a guard for a different lock");
        }
        if !self.lock.is_locked_by_current_thread() {
            panic!("device session accessed with a guard held by another thread");
        }
        // With the shared lock held here, the state can only be taken by
        // this thread already.
        self.state
            .try_lock()
            .unwrap_or_else(|| panic!("device session state acquired recursively"))
    }

    pub fn open_device_handle(&self, handle: C::Handle) -> Result<()> {
        self.lock().open_device_handle(handle)
    }

    pub fn close_device(&self) {
        self.lock().close_device();
    }

    pub fn device_handle(&self) -> Option<C::Handle> {
        self.lock().device_handle()
    }

    pub fn set_update_callback(&self, callback: Option<UpdateCallback>) {
        self.lock().set_update_callback(callback);
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    pub fn send_command(&self, command: Bytes, completion: Option<Completion>) {
        self.lock().send_command(command, completion);
    }

    pub fn info(&self) -> PadInfo {
        self.lock().info()
    }

    pub fn config(&self) -> (PadConfig, bool) {
        self.lock().config()
    }

    pub fn set_config(&self, config: PadConfig) {
        self.lock().set_config(config);
    }

    pub fn input_state(&self) -> u16 {
        self.lock().input_state()
    }

    pub fn factory_reset(&self) {
        self.lock().factory_reset();
    }

    pub fn force_recalibration(&self) {
        self.lock().force_recalibration();
    }

    pub fn set_sensor_test_mode(&self, mode: SensorTestMode) {
        self.lock().set_sensor_test_mode(mode);
    }

    pub fn sensor_test_mode(&self) -> SensorTestMode {
        self.lock().sensor_test_mode()
    }

    pub fn sensor_test_data(&self) -> Option<SensorTestData> {
        self.lock().sensor_test_data()
    }

    pub fn update(&self) -> Result<()> {
        self.lock().update()
    }
}

/// Holds both the shared lock and this session's state.
pub struct SessionGuard<'a, C: Connection> {
    // Declared first so the state is released before the shared lock.
    state: MutexGuard<'a, SessionState<C>>,
    _device: DeviceLockGuard<'a>,
}

impl<C: Connection> Deref for SessionGuard<'_, C> {
    type Target = SessionState<C>;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<C: Connection> DerefMut for SessionGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

/// The protocol state of one pad. Only reachable with the device lock held.
pub struct SessionState<C: Connection> {
    connection: C,
    wake: Option<WakeSignal>,
    options: SessionOptions,
    notifier: Notifier,

    /// Last configuration read from, or optimistically written to, the pad.
    config: PadConfig,
    /// Configuration set by the caller and not sent yet.
    wanted_config: PadConfig,
    have_config: bool,
    write_pending: bool,
    write_in_flight: bool,

    sensor_test_mode: SensorTestMode,
    /// Mode of the outstanding sensor request, `Off` if none.
    awaiting_sensor_mode: SensorTestMode,
    sensor_request_sent_at: Option<Instant>,
    sensor_test_data: Option<SensorTestData>,
}

impl<C: Connection> SessionState<C> {
    fn new(connection: C, wake: Option<WakeSignal>, options: SessionOptions) -> Self {
        Self {
            connection,
            wake,
            options,
            notifier: Notifier::default(),
            config: PadConfig::default(),
            wanted_config: PadConfig::default(),
            have_config: false,
            write_pending: false,
            write_in_flight: false,
            sensor_test_mode: SensorTestMode::Off,
            awaiting_sensor_mode: SensorTestMode::Off,
            sensor_request_sent_at: None,
            sensor_test_data: None,
        }
    }

    pub fn open_device_handle(&mut self, handle: C::Handle) -> Result<()> {
        self.connection.open(handle)
    }

    /// Close the connection. The last configuration and sensor data are kept
    /// until the pad is reconnected and read again.
    pub fn close_device(&mut self) {
        self.connection.close();
        self.have_config = false;
        self.write_pending = false;
        self.write_in_flight = false;
        self.awaiting_sensor_mode = SensorTestMode::Off;

        self.notify(UpdateReason::Updated);
    }

    pub fn device_handle(&self) -> Option<C::Handle> {
        self.connection.device_handle()
    }

    pub fn set_update_callback(&mut self, callback: Option<UpdateCallback>) {
        self.notifier.set(callback);
    }

    /// A pad isn't reported as connected until its configuration has been read.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected_with_device_info() && self.have_config
    }

    pub fn is_player2(&self) -> bool {
        self.is_connected() && self.connection.device_info().is_player2
    }

    /// Queue a raw command. Dropped if the transport isn't connected.
    pub fn send_command(&mut self, command: Bytes, completion: Option<Completion>) {
        if !self.connection.is_connected() {
            trace!(bytes = hex::encode(&command), "not connected, dropping command");
            return;
        }

        debug!(bytes = hex::encode(&command), "queueing pad command");
        self.connection.send_command(command, completion);

        if let Some(wake) = &self.wake {
            wake.wake();
        }
    }

    fn send(&mut self, command: Command, completion: Option<Completion>) {
        self.send_command(command.encode(), completion);
    }

    pub fn info(&self) -> PadInfo {
        if !self.is_connected() {
            return PadInfo::default();
        }

        let device_info = self.connection.device_info();
        PadInfo {
            connected: true,
            serial: device_info.serial,
            firmware_version: device_info.firmware_version,
        }
    }

    /// The configuration, and whether one has ever been read from the pad.
    ///
    /// A value passed to [`set_config`](Self::set_config) is returned
    /// immediately, before it has been sent.
    pub fn config(&self) -> (PadConfig, bool) {
        let config = if self.write_pending { self.wanted_config } else { self.config };
        (config, self.have_config)
    }

    /// Queue a configuration write. Rapid calls coalesce into one `w`.
    pub fn set_config(&mut self, config: PadConfig) {
        self.wanted_config = config;
        self.write_pending = true;
    }

    pub fn input_state(&self) -> u16 {
        self.connection.input_state()
    }

    /// Restore the pad's default configuration and read it back.
    pub fn factory_reset(&mut self) {
        info!("factory reset requested");
        self.send(Command::FactoryReset, None);
        self.send(Command::ReadConfig, Some(Completion::FactoryResetReadback));
    }

    pub fn force_recalibration(&mut self) {
        info!("forcing recalibration");
        self.send(Command::ForceRecalibration, None);
    }

    pub fn set_sensor_test_mode(&mut self, mode: SensorTestMode) {
        self.sensor_test_mode = mode;
    }

    pub fn sensor_test_mode(&self) -> SensorTestMode {
        self.sensor_test_mode
    }

    /// The most recent sensor test response, if one has been accepted.
    pub fn sensor_test_data(&self) -> Option<SensorTestData> {
        self.sensor_test_data
    }

    /// Mode of the sensor request currently waiting for a response.
    pub fn awaiting_sensor_response(&self) -> Option<SensorTestMode> {
        (!self.awaiting_sensor_mode.is_off()).then_some(self.awaiting_sensor_mode)
    }

    pub fn is_config_write_pending(&self) -> bool {
        self.write_pending
    }

    pub fn is_config_write_in_flight(&self) -> bool {
        self.write_in_flight
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Run one tick. Called periodically by the thread driving the pads.
    pub fn update(&mut self) -> Result<()> {
        self.update_at(Instant::now())
    }

    /// Run one tick as of `now`.
    pub fn update_at(&mut self, now: Instant) -> Result<()> {
        if !self.connection.is_connected() {
            return Ok(());
        }

        self.check_active();
        self.send_config();
        self.update_test_mode(now);

        let old_input_state = self.connection.input_state();

        // Send queued commands and receive packets. Writes confirmed before a
        // failure still complete.
        let mut completed = Vec::new();
        let pumped = self.connection.update(&mut completed);
        for completion in completed {
            self.resolve(completion);
        }
        pumped.inspect_err(|e| {
            warn!("pad transport error: {}", e);
        })?;

        if old_input_state != self.connection.input_state() {
            self.notify(UpdateReason::Updated);
        }

        self.handle_packets();
        Ok(())
    }

    /// The first time the pad's identity is known, reset the panels and read
    /// its configuration.
    fn check_active(&mut self) {
        if !self.connection.is_connected_with_device_info() || self.connection.is_active() {
            return;
        }

        self.connection.set_active(true);
        info!(
            serial = hex::encode_upper(self.connection.device_info().serial),
            "activating pad"
        );

        self.send(Command::ResetPanels, None);
        self.send(Command::ReadConfig, None);
    }

    fn send_config(&mut self) {
        if !self.connection.is_connected() || !self.write_pending || self.write_in_flight {
            return;
        }

        // Never write before the pad's own configuration has been read.
        if !self.have_config {
            return;
        }

        self.write_in_flight = true;
        self.send(Command::WriteConfig(self.wanted_config), Some(Completion::ConfigWritten));
        self.write_pending = false;

        // Report the value just sent until the readback arrives.
        self.config = self.wanted_config;

        self.send(Command::ReadConfig, None);
    }

    fn update_test_mode(&mut self, now: Instant) {
        if self.sensor_test_mode.is_off() {
            return;
        }

        if !self.awaiting_sensor_mode.is_off() {
            let stale = self
                .sensor_request_sent_at
                .is_none_or(|sent_at| now.saturating_duration_since(sent_at) >= self.options.sensor_request_timeout);
            if !stale {
                return;
            }
            debug!(mode = %self.awaiting_sensor_mode, "sensor test request timed out, resending");
        }

        self.awaiting_sensor_mode = self.sensor_test_mode;
        self.sensor_request_sent_at = Some(now);
        self.send(Command::RequestSensorTest(self.sensor_test_mode), None);
    }

    fn resolve(&mut self, completion: Completion) {
        match completion {
            Completion::ConfigWritten => self.write_in_flight = false,
            Completion::FactoryResetReadback => self.notify(UpdateReason::FactoryResetComplete),
            Completion::Callback(callback) => callback(),
        }
    }

    fn handle_packets(&mut self) {
        while let Some(buf) = self.connection.read_packet() {
            if buf.is_empty() {
                continue;
            }
            let tag = buf[0];
            trace!(bytes = hex::encode(&buf), "pad read");

            match Packet::from_bytes(buf) {
                Ok(Packet::ConfigReadback(data)) => self.handle_config_readback(&data),
                Ok(Packet::SensorTestData(response)) => self.handle_sensor_test_response(response),
                Ok(Packet::Unknown { tag, .. }) => trace!(tag, "ignoring packet with unknown tag"),
                Err(e) if tag == TAG_SENSOR_TEST => {
                    debug!("incomplete sensor test response: {}", e);
                }
                Err(e) => warn!("Communication error: invalid configuration packet: {}", e),
            }
        }
    }

    fn handle_config_readback(&mut self, data: &[u8]) {
        let copied = self.config.copy_from_prefix(data);
        debug!(len = data.len(), copied, "read back configuration");
        self.have_config = true;

        self.notify(UpdateReason::Updated);
    }

    fn handle_sensor_test_response(&mut self, response: SensorTestResponse) {
        if self.awaiting_sensor_mode.is_off() {
            info!("Ignoring unexpected sensor test response. It may have been sent by another application.");
            return;
        }

        let expected = u8::from(self.awaiting_sensor_mode);
        if response.mode != expected {
            info!(
                got = response.mode,
                expected, "Ignoring sensor test response for a different mode"
            );
            return;
        }

        self.awaiting_sensor_mode = SensorTestMode::Off;

        // The mode changed while the request was in the air.
        if response.mode != u8::from(self.sensor_test_mode) {
            return;
        }

        let data = SensorTestData::decode(&response.words);
        trace!(panels = data.panels_present(), "decoded sensor test data");
        self.sensor_test_data = Some(data);

        self.notify(UpdateReason::Updated);
    }

    fn notify(&mut self, reason: UpdateReason) {
        let pad = usize::from(self.connection.device_info().is_player2);
        self.notifier.notify(pad, reason);
    }
}
