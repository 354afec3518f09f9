// SPDX-License-Identifier: MIT OR Apache-2.0

//! Generic object subscription.
//!
//! Tracks a keyed set of values from a stream of set/unset/remove events
//! and forwards every effective change to callbacks supplied at
//! construction. The push engine uses one of these to follow space views in
//! the tech space.
use std::collections::HashMap;
use std::hash::Hash;

/// One change in the observed object set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionEvent<K, V> {
    /// A value appeared or changed.
    Set(K, V),

    /// A value was cleared but the key remains known.
    Unset(K),

    /// The key left the observed set entirely.
    Remove(K),
}

type SetCallback<K, V> = Box<dyn FnMut(&K, &V, Option<&V>) + Send>;
type KeyCallback<K> = Box<dyn FnMut(&K) + Send>;

/// Keyed subscription state with injected callbacks.
///
/// `on_set` receives the key, the new value and the previous value (if
/// any); `on_unset` and `on_remove` receive the key. Events which change
/// nothing invoke no callback.
pub struct ObjectSubscription<K, V> {
    entries: HashMap<K, Option<V>>,
    on_set: SetCallback<K, V>,
    on_unset: KeyCallback<K>,
    on_remove: KeyCallback<K>,
}

impl<K, V> std::fmt::Debug for ObjectSubscription<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ObjectSubscription")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> ObjectSubscription<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    pub fn new(
        on_set: impl FnMut(&K, &V, Option<&V>) + Send + 'static,
        on_unset: impl FnMut(&K) + Send + 'static,
        on_remove: impl FnMut(&K) + Send + 'static,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            on_set: Box::new(on_set),
            on_unset: Box::new(on_unset),
            on_remove: Box::new(on_remove),
        }
    }

    /// Seeds the state without invoking callbacks, used for the initial
    /// snapshot extracted at subscription time.
    pub fn seed(&mut self, initial: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in initial {
            self.entries.insert(key, Some(value));
        }
    }

    /// Applies one event, invoking the matching callback when the state
    /// actually changed.
    pub fn apply(&mut self, event: SubscriptionEvent<K, V>) {
        match event {
            SubscriptionEvent::Set(key, value) => {
                let previous = self.entries.get(&key).cloned().flatten();
                if previous.as_ref() == Some(&value) {
                    return;
                }
                (self.on_set)(&key, &value, previous.as_ref());
                self.entries.insert(key, Some(value));
            }
            SubscriptionEvent::Unset(key) => {
                match self.entries.get_mut(&key) {
                    Some(slot) if slot.is_some() => {
                        *slot = None;
                        (self.on_unset)(&key);
                    }
                    _ => (),
                }
            }
            SubscriptionEvent::Remove(key) => {
                if self.entries.remove(&key).is_some() {
                    (self.on_remove)(&key);
                }
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).and_then(|slot| slot.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{ObjectSubscription, SubscriptionEvent};

    #[test]
    fn callbacks_fire_on_effective_changes_only() {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();
        let set_log = log.clone();
        let unset_log = log.clone();
        let remove_log = log.clone();

        let mut subscription = ObjectSubscription::new(
            move |key: &String, value: &u32, previous: Option<&u32>| {
                set_log
                    .lock()
                    .unwrap()
                    .push(format!("set {key}={value} (was {previous:?})"));
            },
            move |key: &String| unset_log.lock().unwrap().push(format!("unset {key}")),
            move |key: &String| remove_log.lock().unwrap().push(format!("remove {key}")),
        );

        subscription.seed([("a".to_string(), 1)]);
        assert!(log.lock().unwrap().is_empty());

        // Identical value changes nothing.
        subscription.apply(SubscriptionEvent::Set("a".into(), 1));
        assert!(log.lock().unwrap().is_empty());

        subscription.apply(SubscriptionEvent::Set("a".into(), 2));
        subscription.apply(SubscriptionEvent::Unset("a".into()));
        subscription.apply(SubscriptionEvent::Unset("a".into()));
        subscription.apply(SubscriptionEvent::Remove("a".into()));
        subscription.apply(SubscriptionEvent::Remove("a".into()));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "set a=2 (was Some(1))".to_string(),
                "unset a".to_string(),
                "remove a".to_string(),
            ]
        );
        assert!(subscription.is_empty());
    }

    #[test]
    fn unset_keeps_the_key_known() {
        let mut subscription: ObjectSubscription<&'static str, u32> =
            ObjectSubscription::new(|_, _, _| (), |_| (), |_| ());
        subscription.apply(SubscriptionEvent::Set("k", 5));
        subscription.apply(SubscriptionEvent::Unset("k"));

        assert_eq!(subscription.get(&"k"), None);
        assert_eq!(subscription.len(), 1);
    }
}
