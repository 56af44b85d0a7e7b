//! In-process backends.
//!
//! [`MemoryBackendProvider`] hands out one [`MemoryBackend`] per backend name.
//! Failures can be injected per operation and, unless built with
//! [`MemoryBackendProvider::unrecorded`], every call and sent notification is
//! recorded for inspection. Long-running hosts use the unrecorded flavour so
//! only the installation records themselves are kept.

use crate::{
    BackendError, BackendOperation, BackendProvider, InstallationBackend, InstallationId,
    NotificationBackendConfig, NotifyPayload, Registration,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A recorded backend call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCall {
    pub operation: BackendOperation,
    pub installation_id: InstallationId,
}

#[derive(Debug)]
struct FailureRule {
    operation: BackendOperation,
    /// `None` fails forever.
    remaining: Option<u32>,
    error: BackendError,
}

#[derive(Debug, Default)]
struct State {
    installations: HashMap<InstallationId, Registration>,
    sent: Vec<(InstallationId, NotifyPayload)>,
    calls: Vec<BackendCall>,
    failures: Vec<FailureRule>,
}

/// One in-memory hub.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    record: bool,
    state: Mutex<State>,
}

impl MemoryBackend {
    /// A backend that records every call.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            record: true,
            state: Mutex::new(State::default()),
        }
    }

    /// A backend that keeps installations but no call or send log.
    pub fn unrecorded(name: impl Into<String>) -> Self {
        Self {
            record: false,
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the next `times` calls of `operation` fail with `error`.
    pub fn fail_next(&self, operation: BackendOperation, times: u32, error: BackendError) {
        self.state.lock().failures.push(FailureRule {
            operation,
            remaining: Some(times),
            error,
        });
    }

    /// Makes every call of `operation` fail with `error`.
    pub fn fail_always(&self, operation: BackendOperation, error: BackendError) {
        self.state.lock().failures.push(FailureRule {
            operation,
            remaining: None,
            error,
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Seeds a record without going through a recorded call.
    pub fn insert(&self, installation_id: InstallationId, registration: Registration) {
        self.state
            .lock()
            .installations
            .insert(installation_id, registration);
    }

    pub fn installation(&self, installation_id: &InstallationId) -> Option<Registration> {
        self.state.lock().installations.get(installation_id).cloned()
    }

    pub fn contains(&self, installation_id: &InstallationId) -> bool {
        self.state.lock().installations.contains_key(installation_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().installations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, operation: BackendOperation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn sent(&self) -> Vec<(InstallationId, NotifyPayload)> {
        self.state.lock().sent.clone()
    }

    /// Records the call and returns the injected failure, if any.
    fn enter(
        &self,
        state: &mut State,
        operation: BackendOperation,
        installation_id: &InstallationId,
    ) -> Result<(), BackendError> {
        if self.record {
            state.calls.push(BackendCall {
                operation,
                installation_id: installation_id.clone(),
            });
        }
        let Some(idx) = state
            .failures
            .iter()
            .position(|rule| rule.operation == operation && rule.remaining != Some(0))
        else {
            return Ok(());
        };
        let rule = &mut state.failures[idx];
        let error = rule.error.clone();
        let exhausted = match rule.remaining.as_mut() {
            Some(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            state.failures.remove(idx);
        }
        Err(error)
    }
}

#[async_trait]
impl InstallationBackend for MemoryBackend {
    async fn create_or_update(
        &self,
        installation_id: &InstallationId,
        registration: &Registration,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        self.enter(&mut state, BackendOperation::CreateOrUpdate, installation_id)?;
        state
            .installations
            .insert(installation_id.clone(), registration.clone());
        Ok(())
    }

    async fn delete(&self, installation_id: &InstallationId) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        self.enter(&mut state, BackendOperation::Delete, installation_id)?;
        state
            .installations
            .remove(installation_id)
            .map(|_| ())
            .ok_or(BackendError::NotFound)
    }

    async fn send(
        &self,
        installation_id: &InstallationId,
        payload: &NotifyPayload,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        self.enter(&mut state, BackendOperation::Send, installation_id)?;
        if !state.installations.contains_key(installation_id) {
            return Err(BackendError::NotFound);
        }
        if self.record {
            state.sent.push((installation_id.clone(), payload.clone()));
        }
        Ok(())
    }
}

/// Creates one [`MemoryBackend`] per backend name on first use.
#[derive(Debug)]
pub struct MemoryBackendProvider {
    record: bool,
    backends: Mutex<HashMap<String, Arc<MemoryBackend>>>,
}

impl Default for MemoryBackendProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackendProvider {
    /// A provider whose backends record every call.
    pub fn new() -> Self {
        Self {
            record: true,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// A provider whose backends keep no call or send log.
    pub fn unrecorded() -> Self {
        Self {
            record: false,
            ..Self::new()
        }
    }

    /// Returns the backend registered under `name`, creating it if needed.
    pub fn get(&self, name: &str) -> Arc<MemoryBackend> {
        Arc::clone(
            self.backends
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(if self.record {
                        MemoryBackend::new(name)
                    } else {
                        MemoryBackend::unrecorded(name)
                    })
                }),
        )
    }
}

impl BackendProvider for MemoryBackendProvider {
    fn backend(
        &self,
        config: &NotificationBackendConfig,
    ) -> Result<Arc<dyn InstallationBackend>, BackendError> {
        Ok(self.get(&config.name))
    }
}
