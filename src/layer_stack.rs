//! Ordered layer sequence. Index 0 is the bottom and is composited first.
//!
//! Structural changes (add, insert, remove, move, visibility) are reported
//! to subscribers and bump [`LayerStack::revision`]. The compositor does not
//! watch the stack: whoever mutates it must call
//! [`crate::compositor::Compositor::invalidate_cache`] afterwards.

use std::fmt;

use crate::backend::RenderBackend;
use crate::layer::Layer;

/// Structural change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Inserted { index: usize },
    Removed { index: usize },
    Moved { from: usize, to: usize },
    VisibilityChanged { index: usize, enabled: bool },
    Cleared,
}

type Listener = Box<dyn FnMut(&StackEvent)>;

#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn Layer>>,
    listeners: Vec<Listener>,
    revision: u64,
}

impl fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerStack")
            .field("layers", &self.layers)
            .field("listeners", &self.listeners.len())
            .field("revision", &self.revision)
            .finish()
    }
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for structural changes.
    pub fn subscribe(&mut self, listener: impl FnMut(&StackEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Incremented on every structural change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Append on top; returns the new index.
    pub fn push(&mut self, layer: Box<dyn Layer>) -> usize {
        self.layers.push(layer);
        let index = self.layers.len() - 1;
        self.notify(StackEvent::Inserted { index });
        index
    }

    /// Insert at `index` (clamped to the stack length); returns the index used.
    pub fn insert(&mut self, index: usize, layer: Box<dyn Layer>) -> usize {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.notify(StackEvent::Inserted { index });
        index
    }

    /// Detach a layer. Its resources stay allocated; see
    /// [`LayerStack::remove_and_dispose`].
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn Layer>> {
        if index >= self.layers.len() {
            return None;
        }
        let layer = self.layers.remove(index);
        self.notify(StackEvent::Removed { index });
        Some(layer)
    }

    /// Remove a layer and release its backend resources.
    pub fn remove_and_dispose(&mut self, index: usize, backend: &mut dyn RenderBackend) -> bool {
        match self.remove(index) {
            Some(mut layer) => {
                layer.dispose(backend);
                true
            }
            None => false,
        }
    }

    /// Swap with the layer above. Returns false at the top.
    pub fn move_up(&mut self, index: usize) -> bool {
        if index + 1 >= self.layers.len() {
            return false;
        }
        self.layers.swap(index, index + 1);
        self.notify(StackEvent::Moved {
            from: index,
            to: index + 1,
        });
        true
    }

    /// Swap with the layer below. Returns false at the bottom.
    pub fn move_down(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.layers.len() {
            return false;
        }
        self.layers.swap(index, index - 1);
        self.notify(StackEvent::Moved {
            from: index,
            to: index - 1,
        });
        true
    }

    /// Show or hide a layer. Counts as a structural change.
    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        let Some(layer) = self.layers.get_mut(index) else {
            return false;
        };
        if layer.common().enabled() == enabled {
            return true;
        }
        layer.common_mut().set_enabled(enabled);
        self.notify(StackEvent::VisibilityChanged { index, enabled });
        true
    }

    /// Drop every layer, releasing resources.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for layer in &mut self.layers {
            layer.dispose(backend);
        }
        self.layers.clear();
        self.notify(StackEvent::Cleared);
    }

    pub fn get(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|layer| layer.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.get_mut(index).map(|layer| layer.as_mut())
    }

    /// Typed access to a concrete layer variant.
    pub fn get_as<T: Layer + 'static>(&self, index: usize) -> Option<&T> {
        self.layers.get(index)?.as_any().downcast_ref::<T>()
    }

    pub fn get_as_mut<T: Layer + 'static>(&mut self, index: usize) -> Option<&mut T> {
        self.layers.get_mut(index)?.as_any_mut().downcast_mut::<T>()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &dyn Layer> + ExactSizeIterator {
        self.layers.iter().map(|layer| layer.as_ref())
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Box<dyn Layer>] {
        &mut self.layers
    }

    /// Per-layer dirty flags, bottom first.
    pub fn dirty_flags(&self) -> Vec<bool> {
        self.layers.iter().map(|layer| layer.is_dirty()).collect()
    }

    /// Restore flags captured with [`LayerStack::dirty_flags`]. Extra or
    /// missing entries are ignored.
    pub fn restore_dirty_flags(&mut self, flags: &[bool]) {
        for (layer, dirty) in self.layers.iter_mut().zip(flags) {
            layer.common_mut().set_dirty(*dirty);
        }
    }

    /// Initialize every layer that is not ready yet. Failures are logged and
    /// leave that layer skipped by the compositor; returns how many failed.
    pub fn initialize_all(&mut self, backend: &mut dyn RenderBackend) -> usize {
        let mut failures = 0;
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if layer.is_ready() {
                continue;
            }
            if let Err(err) = layer.initialize(backend) {
                failures += 1;
                tracing::warn!(index, layer = layer.name(), error = %err, "layer initialization failed; it will be skipped");
            }
        }
        failures
    }

    fn notify(&mut self, event: StackEvent) {
        self.revision += 1;
        tracing::trace!(?event, revision = self.revision, "layer stack changed");
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}
