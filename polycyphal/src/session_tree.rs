//! Keyed index of live RX sessions
//!
//! One tree per session kind, keyed by port id. The user owns the session (`Rc`); the
//! tree keeps only a weak back-reference, so the transport can never touch a destroyed
//! session. A session unlinks itself through the transport's session-event path before
//! its destructor returns.

use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use core::cell::RefCell;

use crate::error::ArgumentError;
use crate::session::RxSessionDelegate;

pub(crate) struct SessionTree<K: Ord + Copy> {
    nodes: RefCell<BTreeMap<K, Weak<dyn RxSessionDelegate>>>,
}

impl<K: Ord + Copy> SessionTree<K> {
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(BTreeMap::new()),
        }
    }

    /// Links a new session under `key`.
    ///
    /// At most one live session may hold a key; a second linking fails. An entry whose
    /// session is already gone does not count as occupied.
    pub fn ensure_new(
        &self,
        key: K,
        delegate: Weak<dyn RxSessionDelegate>,
    ) -> Result<(), ArgumentError> {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(existing) = nodes.get(&key)
            && existing.strong_count() > 0
        {
            return Err(ArgumentError);
        }
        nodes.insert(key, delegate);
        Ok(())
    }

    /// Point lookup of the live session under `key`.
    pub fn find(&self, key: K) -> Option<Rc<dyn RxSessionDelegate>> {
        self.nodes.borrow().get(&key)?.upgrade()
    }

    pub fn remove(&self, key: K) -> bool {
        self.nodes.borrow_mut().remove(&key).is_some()
    }

    /// Number of linked nodes; debug introspection only.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }
}
