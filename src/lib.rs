pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod notify;
pub mod options;
pub mod protocol;
pub mod sensor;
pub mod session;
pub mod sim;
pub mod wake;

pub use config::{CONFIG_SIZE, PadConfig};
pub use connection::{Completion, Connection, DeviceInfo};
pub use error::{Result, SmxError};
pub use lock::{DeviceLock, DeviceLockGuard};
pub use notify::{UpdateCallback, UpdateReason};
pub use options::SessionOptions;
pub use protocol::SensorTestMode;
pub use sensor::{PanelReading, SensorTestData};
pub use session::{DeviceSession, PadInfo, SessionGuard, SessionState};
pub use sim::{SimulatedHandle, SimulatedPad};
pub use wake::WakeSignal;
