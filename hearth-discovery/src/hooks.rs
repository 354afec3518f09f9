// SPDX-License-Identifier: MIT OR Apache-2.0

//! Peer-to-peer-possible hooks.
//!
//! Consumers register named callbacks which fire whenever the
//! classification of the local network flips between possible and
//! impossible. Registration is idempotent by name; every transition invokes
//! each hook exactly once.
use std::collections::HashMap;
use std::sync::Mutex;

/// Whether direct peer-to-peer connections look possible on the current
/// interface set.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum P2pStatus {
    Possible,
    Impossible,
}

impl P2pStatus {
    fn from_bool(possible: bool) -> Self {
        if possible { Self::Possible } else { Self::Impossible }
    }
}

type Hook = Box<dyn Fn(P2pStatus) + Send + Sync>;

struct RegistryState {
    hooks: HashMap<String, Hook>,
    possible: Option<bool>,
}

/// Registry of peer-to-peer-possible hooks.
pub struct HookRegistry {
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("HookRegistry").finish_non_exhaustive()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                hooks: HashMap::new(),
                possible: None,
            }),
        }
    }

    /// Registers a hook under a name. Registering the same name again keeps
    /// the existing hook. When a classification is already known the new
    /// hook receives it immediately.
    pub fn register(&self, name: &str, hook: impl Fn(P2pStatus) + Send + Sync + 'static) {
        let mut state = self.state.lock().expect("hook registry mutex poisoned");
        if state.hooks.contains_key(name) {
            return;
        }
        if let Some(possible) = state.possible {
            hook(P2pStatus::from_bool(possible));
        }
        state.hooks.insert(name.to_string(), Box::new(hook));
    }

    /// Feeds a fresh classification into the registry. Hooks only run when
    /// it differs from the previous one.
    pub fn update(&self, possible: bool) {
        let state = self.state.lock().expect("hook registry mutex poisoned");
        if state.possible == Some(possible) {
            return;
        }
        let mut state = state;
        state.possible = Some(possible);
        let status = P2pStatus::from_bool(possible);
        for hook in state.hooks.values() {
            hook(status);
        }
    }

    pub fn current(&self) -> Option<P2pStatus> {
        self.state
            .lock()
            .expect("hook registry mutex poisoned")
            .possible
            .map(P2pStatus::from_bool)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{HookRegistry, P2pStatus};

    fn recording_hook(log: &Arc<Mutex<Vec<P2pStatus>>>) -> impl Fn(P2pStatus) + Send + Sync + use<> {
        let log = log.clone();
        move |status| log.lock().unwrap().push(status)
    }

    #[test]
    fn hooks_fire_once_per_transition() {
        let registry = HookRegistry::new();
        let log = Arc::default();
        registry.register("net", recording_hook(&log));

        registry.update(true);
        registry.update(true);
        registry.update(false);
        registry.update(false);
        registry.update(true);

        assert_eq!(*log.lock().unwrap(), vec![
            P2pStatus::Possible,
            P2pStatus::Impossible,
            P2pStatus::Possible,
        ]);
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = HookRegistry::new();
        let log = Arc::default();
        registry.register("net", recording_hook(&log));
        // Second registration under the same name is dropped.
        registry.register("net", recording_hook(&log));

        registry.update(true);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn late_registration_sees_the_current_state() {
        let registry = HookRegistry::new();
        registry.update(false);

        let log: Arc<Mutex<Vec<P2pStatus>>> = Arc::default();
        registry.register("late", recording_hook(&log));
        assert_eq!(*log.lock().unwrap(), vec![P2pStatus::Impossible]);
        assert_eq!(registry.current(), Some(P2pStatus::Impossible));
    }
}
