//! Synchronous change notification.

/// Callback receiving the name of the entity that changed.
pub type ChangeListener = Box<dyn Fn(&str) + Send>;

/// Observer list attached to each entity store. Listeners run synchronously
/// in registration order, strictly after the file write and in-memory index
/// update have committed, so a caller never observes a stale derived cache
/// after a mutating call returns. There is no teardown; listeners live for
/// the process.
#[derive(Default)]
pub struct Observers {
    listeners: Vec<ChangeListener>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: ChangeListener) {
        self.listeners.push(listener);
    }

    pub fn notify(&self, entity: &str) {
        for listener in &self.listeners {
            listener(entity);
        }
    }
}
