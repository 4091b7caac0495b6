//! Typed event listeners
//!
//! Databases publish a closed set of event enums. Listeners are called
//! synchronously in registration order.

use std::fmt;

pub type ListenerId = u32;

type Callback<E> = Box<dyn FnMut(&E) + Send + Sync>;

pub struct Listeners<E> {
    listeners: Vec<(ListenerId, Callback<E>)>,
    next_id: ListenerId,
}

impl<E> Default for Listeners<E> {
    fn default() -> Self {
        Listeners {
            listeners: Vec::new(),
            next_id: 1,
        }
    }
}

impl<E> Listeners<E> {
    pub fn add<F>(&mut self, f: F) -> ListenerId
    where
        F: FnMut(&E) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(f)));
        id
    }

    /// Returns false if no such listener was registered
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &E) {
        for (_, f) in self.listeners.iter_mut() {
            f(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.listeners.len())
            .finish()
    }
}

/// Records every event it is given, for tests
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct EventLog<E>(std::sync::Arc<std::sync::Mutex<Vec<E>>>);

#[cfg(test)]
impl<E: Clone + Send + 'static> EventLog<E> {
    pub(crate) fn new() -> Self {
        EventLog(Default::default())
    }

    pub(crate) fn listener(&self) -> impl FnMut(&E) + Send + Sync + 'static {
        let log = self.0.clone();
        move |e: &E| log.lock().unwrap().push(e.clone())
    }

    pub(crate) fn take(&self) -> Vec<E> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut l: Listeners<u32> = Listeners::default();
        let s1 = seen.clone();
        let a = l.add(move |e| s1.lock().unwrap().push(("a", *e)));
        let s2 = seen.clone();
        l.add(move |e| s2.lock().unwrap().push(("b", *e)));

        l.emit(&7);
        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);

        assert!(l.remove(a));
        assert!(!l.remove(a));
        l.emit(&8);
        assert_eq!(seen.lock().unwrap().last(), Some(&("b", 8)));
        assert_eq!(l.len(), 1);
    }
}
