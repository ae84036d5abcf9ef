/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Wait subscriptions on container state transitions.
//!
//! A registration names a set of containers (each name also covers its
//! subtree), an optional state predicate and a delivery channel. The
//! first matching transition resolves it; deadlines and client
//! disconnects are handled by the caller, which drops the receiver and
//! removes the registration.

use crate::containers::{ContainerName, ContainerState};
use tokio::sync::oneshot;

/// Default predicate: clients waiting with no explicit states are
/// waiting for death.
const DEFAULT_STATES: &[ContainerState] = &[ContainerState::Dead];

#[derive(Debug)]
struct Registration {
    id: u64,
    names: Vec<ContainerName>,
    states: Vec<ContainerState>,
    tx: oneshot::Sender<(String, String)>,
}

impl Registration {
    fn matches(&self, name: &ContainerName, state: ContainerState) -> bool {
        let states = if self.states.is_empty() {
            DEFAULT_STATES
        } else {
            &self.states
        };

        if !states.contains(&state) {
            return false;
        }

        self.names
            .iter()
            .any(|wanted| wanted == name || name.is_descendant_of(wanted))
    }
}

#[derive(Debug, Default)]
pub struct WaitRegistry {
    registrations: Vec<Registration>,
    next_id: u64,
}

impl WaitRegistry {
    /// Registers a wait; the receiver resolves with `(name, state)` on
    /// the first matching transition.
    pub fn register(
        &mut self,
        names: Vec<ContainerName>,
        states: Vec<ContainerState>,
    ) -> (u64, oneshot::Receiver<(String, String)>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;

        self.registrations.push(Registration { id, names, states, tx });
        (id, rx)
    }

    /// Drops a registration whose client went away or timed out.
    pub fn remove(&mut self, id: u64) {
        self.registrations.retain(|registration| registration.id != id);
    }

    /// Delivers a state transition; each matching registration resolves
    /// at most once and is dropped.
    pub fn notify(&mut self, name: &ContainerName, state: ContainerState) {
        let mut resolved = Vec::new();

        for registration in &self.registrations {
            if registration.matches(name, state) {
                resolved.push(registration.id);
            }
        }

        for id in resolved {
            if let Some(position) = self
                .registrations
                .iter()
                .position(|registration| registration.id == id)
            {
                let registration = self.registrations.remove(position);
                // the receiver may already be gone; nothing to do then
                let _ = registration
                    .tx
                    .send((name.to_string(), state.to_string()));
            }
        }
    }

    /// Drops registrations whose clients disconnected without waiting
    /// for a resolution.
    pub fn sweep_closed(&mut self) {
        self.registrations.retain(|registration| !registration.tx.is_closed());
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(path: &str) -> ContainerName {
        ContainerName::parse(path).expect("name")
    }

    #[test]
    fn test_wait_fires_on_death_by_default() {
        let mut registry = WaitRegistry::default();
        let (_, mut rx) = registry.register(vec![name("a")], vec![]);

        registry.notify(&name("a"), ContainerState::Running);
        assert!(rx.try_recv().is_err(), "running should not match");

        registry.notify(&name("a"), ContainerState::Dead);
        let (resolved, state) = rx.try_recv().expect("resolved");
        assert_eq!(resolved, "a");
        assert_eq!(state, "dead");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wait_matches_subtree() {
        let mut registry = WaitRegistry::default();
        let (_, mut rx) = registry.register(vec![name("a")], vec![]);

        registry.notify(&name("a/b/c"), ContainerState::Dead);
        let (resolved, _) = rx.try_recv().expect("resolved");
        assert_eq!(resolved, "a/b/c");
    }

    #[test]
    fn test_wait_with_explicit_predicate() {
        let mut registry = WaitRegistry::default();
        let (_, mut rx) = registry
            .register(vec![name("a")], vec![ContainerState::Stopped]);

        registry.notify(&name("a"), ContainerState::Dead);
        assert!(rx.try_recv().is_err());

        registry.notify(&name("a"), ContainerState::Stopped);
        let (_, state) = rx.try_recv().expect("resolved");
        assert_eq!(state, "stopped");
    }

    #[test]
    fn test_first_match_wins_only_once() {
        let mut registry = WaitRegistry::default();
        let (_, mut rx) = registry.register(vec![name("a"), name("b")], vec![]);

        registry.notify(&name("a"), ContainerState::Dead);
        registry.notify(&name("b"), ContainerState::Dead);

        let (resolved, _) = rx.try_recv().expect("first transition");
        assert_eq!(resolved, "a");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_registration_never_fires() {
        let mut registry = WaitRegistry::default();
        let (id, mut rx) = registry.register(vec![name("a")], vec![]);

        registry.remove(id);
        registry.notify(&name("a"), ContainerState::Dead);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_unrelated_containers_do_not_match() {
        let mut registry = WaitRegistry::default();
        let (_, mut rx) = registry.register(vec![name("a")], vec![]);

        registry.notify(&name("ax"), ContainerState::Dead);
        registry.notify(&name("b"), ContainerState::Dead);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }
}
