/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Listener identity keying used for broker registrations.

use super::EnvelopeListener;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identifies a listener by the address of its shared allocation.
#[derive(Clone)]
pub(crate) struct ListenerIdentityKey {
    listener: Arc<dyn EnvelopeListener>,
}

impl ListenerIdentityKey {
    pub(crate) fn new(listener: Arc<dyn EnvelopeListener>) -> Self {
        Self { listener }
    }

    pub(crate) fn listener(&self) -> &Arc<dyn EnvelopeListener> {
        &self.listener
    }

    fn address(&self) -> *const () {
        Arc::as_ptr(&self.listener) as *const ()
    }
}

impl Hash for ListenerIdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl PartialEq for ListenerIdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for ListenerIdentityKey {}

impl Debug for ListenerIdentityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerIdentityKey")
            .field("address", &self.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::ListenerIdentityKey;
    use crate::broker::EnvelopeListener;
    use crate::envelope::Envelope;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct NoopListener;

    #[async_trait]
    impl EnvelopeListener for NoopListener {
        async fn on_receive(&self, _envelope: Envelope) {}
    }

    #[test]
    fn clones_of_one_arc_share_identity() {
        let listener: Arc<dyn EnvelopeListener> = Arc::new(NoopListener);
        let other: Arc<dyn EnvelopeListener> = Arc::new(NoopListener);

        let mut keys = HashSet::new();
        keys.insert(ListenerIdentityKey::new(listener.clone()));

        assert!(keys.contains(&ListenerIdentityKey::new(listener)));
        assert!(!keys.contains(&ListenerIdentityKey::new(other)));
    }
}
