use tokio::sync::watch;

/// Process-wide "immersive focus" flag. Writers publish, the navigation
/// shell subscribes and is woken on every change.
#[derive(Debug)]
pub struct FocusModeSignal {
    sender: watch::Sender<bool>,
}

impl Default for FocusModeSignal {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FocusModeSignal {
    pub fn new(initial: bool) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self { sender }
    }

    pub fn is_enabled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Returns whether the value changed. Subscribers are only notified on
    /// an actual change.
    pub fn publish(&self, enabled: bool) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == enabled {
                return false;
            }
            *current = enabled;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
