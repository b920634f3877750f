//! Decoding of sensor test mode responses.
//!
//! The master controller collects a fixed-size record from each of the nine
//! panels and transmits them bit-interleaved: word `k` of the response
//! carries bit `k` of every panel's record, with panel `p` in bit position
//! `p`. Records are rebuilt least-significant bit first.
//!
//! Record layout (10 bytes, fields packed low bit to high bit):
//!
//! | Bits | Field |
//! |------|-------|
//! | 0..3 | signature, always `0 1 0` |
//! | 3..7 | bad sensor input flag for sensors 0-3 |
//! | 7 | unused |
//! | 8..72 | four `i16` sensor levels, little-endian |
//! | 72..76 | DIP switch value |
//! | 76..80 | unused |

use bytes::Buf;

pub const PANEL_COUNT: usize = 9;
pub const SENSORS_PER_PANEL: usize = 4;
pub const PANEL_RECORD_SIZE: usize = 10;

/// Number of response words needed to carry a full record for every panel.
pub const WORDS_PER_RESPONSE: usize = PANEL_RECORD_SIZE * 8;

const SIGNATURE_MASK: u8 = 0b0000_0111;
// sig1 = 0, sig2 = 1, sig3 = 0
const SIGNATURE: u8 = 0b0000_0010;
const BAD_SENSOR_SHIFT: u8 = 3;
const DIP_MASK: u8 = 0x0F;

pub type PanelRecord = [u8; PANEL_RECORD_SIZE];

/// Rebuild the record for `panel` from the interleaved response words.
///
/// Words past the end of `words` contribute zero bits. A panel beyond the
/// width of a word has no bits and yields an all-zero record.
pub fn extract_panel_record(words: &[u16], panel: usize) -> PanelRecord {
    let shift = u32::try_from(panel).unwrap_or(u32::MAX);
    let mut bits = words.iter().map(|word| word.checked_shr(shift).unwrap_or(0) & 1 == 1);
    let mut record = [0u8; PANEL_RECORD_SIZE];
    for byte in record.iter_mut() {
        for bit in 0..8 {
            if bits.next().unwrap_or(false) {
                *byte |= 1 << bit;
            }
        }
    }
    record
}

/// Interleave per-panel records into response words, the inverse of
/// [`extract_panel_record`].
pub fn pack_panel_records(records: &[PanelRecord; PANEL_COUNT]) -> Vec<u16> {
    (0..WORDS_PER_RESPONSE)
        .map(|bit_index| {
            records.iter().enumerate().fold(0u16, |word, (panel, record)| {
                let bit = (record[bit_index / 8] >> (bit_index % 8)) & 1;
                word | (u16::from(bit) << panel)
            })
        })
        .collect()
}

/// One panel's diagnostic reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelReading {
    /// True if that sensor's most recent reading is invalid.
    pub bad_sensor_input: [bool; SENSORS_PER_PANEL],
    pub sensor_level: [i16; SENSORS_PER_PANEL],
    pub dip_switch: u8,
}

impl PanelReading {
    /// Decode a panel record. Returns `None` if the signature doesn't match,
    /// which happens when the panel didn't answer and the bits are noise
    /// from a player standing on it.
    pub fn decode(record: &PanelRecord) -> Option<Self> {
        if record[0] & SIGNATURE_MASK != SIGNATURE {
            return None;
        }

        let mut reading = PanelReading::default();
        for (sensor, bad) in reading.bad_sensor_input.iter_mut().enumerate() {
            *bad = (record[0] >> (BAD_SENSOR_SHIFT as usize + sensor)) & 1 == 1;
        }

        let mut levels = &record[1..1 + SENSORS_PER_PANEL * 2];
        for level in reading.sensor_level.iter_mut() {
            *level = levels.get_i16_le();
        }

        reading.dip_switch = record[PANEL_RECORD_SIZE - 1] & DIP_MASK;
        Some(reading)
    }

    /// Build the record a healthy panel would send for this reading.
    pub fn encode(&self) -> PanelRecord {
        let mut record = [0u8; PANEL_RECORD_SIZE];
        record[0] = SIGNATURE;
        for (sensor, &bad) in self.bad_sensor_input.iter().enumerate() {
            if bad {
                record[0] |= 1 << (BAD_SENSOR_SHIFT as usize + sensor);
            }
        }
        for (sensor, level) in self.sensor_level.iter().enumerate() {
            let offset = 1 + sensor * 2;
            record[offset..offset + 2].copy_from_slice(&level.to_le_bytes());
        }
        record[PANEL_RECORD_SIZE - 1] = self.dip_switch & DIP_MASK;
        record
    }
}

/// The latest decoded sensor test response for all panels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorTestData {
    pub have_data_from_panel: [bool; PANEL_COUNT],
    pub sensor_level: [[i16; SENSORS_PER_PANEL]; PANEL_COUNT],
    pub bad_sensor_input: [[bool; SENSORS_PER_PANEL]; PANEL_COUNT],
    pub dip_switch_per_panel: [u8; PANEL_COUNT],
}

impl SensorTestData {
    /// Decode every panel from a response body. Panels with an invalid
    /// signature are marked absent and keep zeroed fields.
    pub fn decode(words: &[u16]) -> Self {
        let mut data = SensorTestData::default();
        for panel in 0..PANEL_COUNT {
            let record = extract_panel_record(words, panel);
            let Some(reading) = PanelReading::decode(&record) else {
                continue;
            };
            data.have_data_from_panel[panel] = true;
            data.bad_sensor_input[panel] = reading.bad_sensor_input;
            data.sensor_level[panel] = reading.sensor_level;
            data.dip_switch_per_panel[panel] = reading.dip_switch;
        }
        data
    }

    pub fn panel(&self, panel: usize) -> Option<PanelReading> {
        if !*self.have_data_from_panel.get(panel)? {
            return None;
        }
        Some(PanelReading {
            bad_sensor_input: self.bad_sensor_input[panel],
            sensor_level: self.sensor_level[panel],
            dip_switch: self.dip_switch_per_panel[panel],
        })
    }

    pub fn panels_present(&self) -> usize {
        self.have_data_from_panel.iter().filter(|&&present| present).count()
    }
}
