//! Display surface placement and page layout.
//!
//! The display surface is the element the engine draws into. It lives in at
//! most one container at a time; moving it between containers keeps the
//! engine instance alive. Container geometry comes from the page through the
//! [`Layout`] trait.

use std::collections::BTreeMap;
use std::sync::RwLock;

use twin_types::{ContainerId, Rect};

use crate::lock;

/// Source of container bounding rectangles.
pub trait Layout: Send + Sync {
    /// Current bounding rectangle of `container`, or `None` if the
    /// container does not exist on the page.
    fn bounds(&self, container: &ContainerId) -> Option<Rect>;
}

/// In-memory [`Layout`] fed by the page whenever a container is laid out.
#[derive(Debug, Default)]
pub struct SharedLayout {
    containers: RwLock<BTreeMap<ContainerId, Rect>>,
}

impl SharedLayout {
    /// Create an empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or update) a container's bounds.
    pub fn set(&self, container: ContainerId, bounds: Rect) {
        lock::write(&self.containers).insert(container, bounds);
    }

    /// Forget a container (its view was torn down).
    pub fn remove(&self, container: &ContainerId) -> Option<Rect> {
        lock::write(&self.containers).remove(container)
    }
}

impl Layout for SharedLayout {
    fn bounds(&self, container: &ContainerId) -> Option<Rect> {
        lock::read(&self.containers).get(container).copied()
    }
}

/// Where the display surface currently lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplaySurface {
    parent: Option<ContainerId>,
}

impl DisplaySurface {
    /// Container currently holding the surface.
    pub const fn parent(&self) -> Option<&ContainerId> {
        self.parent.as_ref()
    }

    /// Whether the surface is attached to `container`.
    pub fn is_attached_to(&self, container: &ContainerId) -> bool {
        self.parent.as_ref() == Some(container)
    }

    /// Detach from the current parent (if any) and append to `container`.
    ///
    /// Returns the previous parent.
    pub fn move_to(&mut self, container: ContainerId) -> Option<ContainerId> {
        self.parent.replace(container)
    }
}
