//! An in-memory pad that answers commands the way the firmware does.
//!
//! Used by the integration tests and by `pad-monitor` when no hardware is
//! attached. Besides emulating the firmware it can inject packets, input
//! changes and transport failures.

use crate::config::PadConfig;
use crate::connection::{Completion, Connection, DeviceInfo, SERIAL_SIZE};
use crate::error::{Result, SmxError};
use crate::protocol::{Command, Packet, SensorTestResponse};
use crate::sensor::{PANEL_COUNT, PANEL_RECORD_SIZE, PanelReading, pack_panel_records};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Identifies the simulated device a connection is opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedHandle {
    pub serial: [u8; SERIAL_SIZE],
    pub firmware_version: u16,
    pub player2: bool,
}

impl SimulatedHandle {
    /// A handle for player 1 (`0`) or player 2 (`1`), with a serial derived
    /// from the player number.
    pub fn player(pad: usize) -> Self {
        let mut serial = [0u8; SERIAL_SIZE];
        for (i, byte) in serial.iter_mut().enumerate() {
            *byte = (pad as u8).wrapping_mul(0x10).wrapping_add(i as u8);
        }
        Self {
            serial,
            firmware_version: 5,
            player2: pad == 1,
        }
    }
}

#[derive(Default)]
pub struct SimulatedPad {
    handle: Option<SimulatedHandle>,
    identified: bool,
    active: bool,
    stalled: bool,
    drop_sensor_responses: bool,
    fail_next_update: Option<String>,
    fail_after_next_pump: Option<String>,

    firmware_config: PadConfig,
    default_config: PadConfig,
    panels: [Option<PanelReading>; PANEL_COUNT],
    input_state: u16,
    next_input_state: Option<u16>,

    outbound: VecDeque<(Bytes, Option<Completion>)>,
    inbound: VecDeque<Bytes>,
    sent: Vec<Bytes>,
}

impl SimulatedPad {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pad whose stored and factory default configuration is `config`.
    pub fn with_config(config: PadConfig) -> Self {
        Self {
            firmware_config: config,
            default_config: config,
            ..Self::default()
        }
    }

    /// Configuration currently stored in the emulated firmware.
    pub fn firmware_config(&self) -> PadConfig {
        self.firmware_config
    }

    pub fn set_firmware_config(&mut self, config: PadConfig) {
        self.firmware_config = config;
    }

    /// Set what `panel` reports in sensor test mode. `None` makes it send an
    /// invalid signature.
    pub fn set_panel(&mut self, panel: usize, reading: Option<PanelReading>) {
        if let Some(slot) = self.panels.get_mut(panel) {
            *slot = reading;
        }
    }

    /// Change the input state on the next [`update`](Connection::update).
    pub fn set_input_state(&mut self, state: u16) {
        self.next_input_state = Some(state);
    }

    /// Queue a packet as if the pad had sent it.
    pub fn inject_packet(&mut self, packet: impl Into<Bytes>) {
        self.inbound.push_back(packet.into());
    }

    /// Make the next [`update`](Connection::update) fail.
    pub fn fail_next_update(&mut self, message: impl Into<String>) {
        self.fail_next_update = Some(message.into());
    }

    /// Make the next [`update`](Connection::update) write every queued
    /// command and then fail, as a link that drops mid-pass would.
    pub fn fail_after_next_pump(&mut self, message: impl Into<String>) {
        self.fail_after_next_pump = Some(message.into());
    }

    /// While stalled, queued commands are neither written nor confirmed.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Swallow sensor test requests without answering them.
    pub fn set_drop_sensor_responses(&mut self, drop: bool) {
        self.drop_sensor_responses = drop;
    }

    /// Every command queued since the pad was created, in order.
    pub fn sent_commands(&self) -> &[Bytes] {
        &self.sent
    }

    pub fn count_sent(&self, tag: u8) -> usize {
        self.sent.iter().filter(|cmd| cmd.first() == Some(&tag)).count()
    }

    fn sensor_response(&self, mode: u8) -> Bytes {
        let mut records = [[0u8; PANEL_RECORD_SIZE]; PANEL_COUNT];
        for (record, reading) in records.iter_mut().zip(self.panels.iter()) {
            if let Some(reading) = reading {
                *record = reading.encode();
            }
        }
        Packet::SensorTestData(SensorTestResponse {
            mode,
            words: pack_panel_records(&records),
        })
        .to_bytes()
    }

    fn execute(&mut self, bytes: &[u8]) {
        let command = match Command::from_bytes(bytes) {
            Ok(command) => command,
            Err(e) => {
                warn!("simulated pad ignoring command: {}", e);
                return;
            }
        };

        match command {
            Command::ReadConfig => {
                let readback = Packet::ConfigReadback(Bytes::copy_from_slice(self.firmware_config.as_bytes()));
                self.inbound.push_back(readback.to_bytes());
            }
            Command::WriteConfig(config) => self.firmware_config = config,
            Command::FactoryReset => self.firmware_config = self.default_config,
            Command::ForceRecalibration | Command::ResetPanels => {}
            Command::RequestSensorTest(mode) => {
                if !self.drop_sensor_responses {
                    let response = self.sensor_response(mode.into());
                    self.inbound.push_back(response);
                }
            }
        }
    }
}

impl Connection for SimulatedPad {
    type Handle = SimulatedHandle;

    fn open(&mut self, handle: SimulatedHandle) -> Result<()> {
        if self.handle.is_some() {
            return Err(SmxError::HandleInUse);
        }
        debug!(serial = hex::encode_upper(handle.serial), "simulated pad opened");
        self.handle = Some(handle);
        self.identified = false;
        self.active = false;
        Ok(())
    }

    fn close(&mut self) {
        self.handle = None;
        self.identified = false;
        self.active = false;
        self.outbound.clear();
        self.inbound.clear();
    }

    fn device_handle(&self) -> Option<SimulatedHandle> {
        self.handle
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn is_connected_with_device_info(&self) -> bool {
        self.handle.is_some() && self.identified
    }

    fn device_info(&self) -> DeviceInfo {
        match self.handle {
            Some(handle) if self.identified => DeviceInfo {
                serial: handle.serial,
                firmware_version: handle.firmware_version,
                is_player2: handle.player2,
            },
            _ => DeviceInfo::default(),
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn send_command(&mut self, command: Bytes, completion: Option<Completion>) {
        self.sent.push(command.clone());
        self.outbound.push_back((command, completion));
    }

    fn read_packet(&mut self) -> Option<Bytes> {
        self.inbound.pop_front()
    }

    fn input_state(&self) -> u16 {
        self.input_state
    }

    fn update(&mut self, completed: &mut Vec<Completion>) -> Result<()> {
        if let Some(message) = self.fail_next_update.take() {
            return Err(SmxError::Transport(message));
        }
        if self.handle.is_none() {
            return Err(SmxError::NotConnected);
        }

        // The identity is read during the first pass after opening.
        self.identified = true;

        if let Some(state) = self.next_input_state.take() {
            self.input_state = state;
        }

        if self.stalled {
            return Ok(());
        }

        while let Some((command, completion)) = self.outbound.pop_front() {
            self.execute(&command);
            completed.extend(completion);
        }

        match self.fail_after_next_pump.take() {
            Some(message) => Err(SmxError::Transport(message)),
            None => Ok(()),
        }
    }
}
