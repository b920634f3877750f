use strum_macros::Display;

/// Why the update callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UpdateReason {
    /// Configuration, input state, connection state or sensor data changed.
    Updated,
    /// The configuration readback after a factory reset was sent.
    FactoryResetComplete,
}

/// Receives the pad number (0 or 1) and the reason.
///
/// Invoked with the device lock held: it must not call into any session.
pub type UpdateCallback = Box<dyn FnMut(usize, UpdateReason) + Send>;

#[derive(Default)]
pub struct Notifier {
    callback: Option<UpdateCallback>,
}

impl Notifier {
    pub fn set(&mut self, callback: Option<UpdateCallback>) {
        self.callback = callback;
    }

    pub fn notify(&mut self, pad: usize, reason: UpdateReason) {
        if let Some(callback) = self.callback.as_mut() {
            callback(pad, reason);
        }
    }
}
