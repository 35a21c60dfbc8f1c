use std::sync::{RwLock, Weak};
use tracing::{Level, event};

/// Receives notice that a DocType's effective shape may have changed.
pub trait InvalidationListener: Send + Sync {
    fn invalidate(&self, doctype: &str);

    fn invalidate_all(&self);
}

/// Subscriber list shared by the registry and the overlay.
///
/// Listeners are held weakly so a dropped cache unsubscribes itself.
#[derive(Default)]
pub struct Listeners {
    inner: RwLock<Vec<Weak<dyn InvalidationListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Weak<dyn InvalidationListener>) {
        match self.inner.write() {
            Ok(mut guard) => guard.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, doctype: &str) {
        self.each(|listener| listener.invalidate(doctype));
    }

    pub fn notify_all(&self) {
        self.each(|listener| listener.invalidate_all());
    }

    fn each(&self, f: impl Fn(&dyn InvalidationListener)) {
        let live: Vec<_> = {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.retain(|w| w.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        if live.is_empty() {
            event!(Level::TRACE, "no invalidation listeners");
        }
        for listener in live {
            f(listener.as_ref());
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("count", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl InvalidationListener for Recorder {
        fn invalidate(&self, doctype: &str) {
            self.seen.lock().unwrap().push(doctype.to_string());
        }

        fn invalidate_all(&self) {
            self.seen.lock().unwrap().push("*".to_string());
        }
    }

    #[test]
    fn test_notify_and_prune() {
        let listeners = Listeners::new();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn InvalidationListener> = Arc::downgrade(&recorder) as Weak<dyn InvalidationListener>;
        listeners.subscribe(weak);

        listeners.notify("User");
        listeners.notify_all();
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["User", "*"]);

        drop(recorder);
        listeners.notify("User");
        assert!(listeners.is_empty());
    }
}
