//! Mock output backend.
//!
//! Records node and device lifecycle events so transport behavior can be
//! verified without audio hardware: node leaks, fan-out gains, device binds
//! and releases.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use clipdeck_core::{DeviceSelection, Error, OutputPath, Result};
use parking_lot::Mutex;

use crate::router::{GraphNode, NodeSpec, OutputBackend};

#[derive(Default)]
struct MockShared {
    live_nodes: AtomicUsize,
    created_nodes: AtomicUsize,
    fail_next_bind: AtomicBool,
    binds: Mutex<Vec<(OutputPath, DeviceSelection)>>,
    releases: Mutex<Vec<OutputPath>>,
    last_spec: Mutex<Option<NodeSpec>>,
    last_gains: Mutex<Option<(f32, f32)>>,
    last_rate: Mutex<Option<f64>>,
    last_looping: Mutex<Option<bool>>,
}

/// Observer handle into a [`MockBackend`]'s recorded events.
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<MockShared>,
}

impl MockHandle {
    /// Nodes currently alive (created minus dropped).
    pub fn live_nodes(&self) -> usize {
        self.shared.live_nodes.load(Ordering::SeqCst)
    }

    /// Total nodes ever created.
    pub fn created_nodes(&self) -> usize {
        self.shared.created_nodes.load(Ordering::SeqCst)
    }

    /// Make the next `bind_device` call fail.
    pub fn fail_next_bind(&self) {
        self.shared.fail_next_bind.store(true, Ordering::SeqCst);
    }

    pub fn bind_count(&self) -> usize {
        self.shared.binds.lock().len()
    }

    pub fn binds(&self) -> Vec<(OutputPath, DeviceSelection)> {
        self.shared.binds.lock().clone()
    }

    pub fn released_paths(&self) -> Vec<OutputPath> {
        self.shared.releases.lock().clone()
    }

    /// The spec of the most recently created node.
    pub fn last_spec(&self) -> Option<NodeSpec> {
        self.shared.last_spec.lock().clone()
    }

    /// The most recent `set_gains` applied to a live node.
    pub fn last_gains(&self) -> Option<(f32, f32)> {
        *self.shared.last_gains.lock()
    }

    pub fn last_rate(&self) -> Option<f64> {
        *self.shared.last_rate.lock()
    }

    pub fn last_looping(&self) -> Option<bool> {
        *self.shared.last_looping.lock()
    }
}

/// Output backend that records instead of rendering.
#[derive(Default)]
pub struct MockBackend {
    shared: Arc<MockShared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer handle; clone-cheap, usable after the backend is boxed.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl OutputBackend for MockBackend {
    fn start_node(&mut self, spec: NodeSpec) -> Result<Box<dyn GraphNode>> {
        self.shared.created_nodes.fetch_add(1, Ordering::SeqCst);
        self.shared.live_nodes.fetch_add(1, Ordering::SeqCst);
        *self.shared.last_gains.lock() = Some((spec.main_gain, spec.aux_gain));
        *self.shared.last_rate.lock() = Some(spec.rate);
        *self.shared.last_looping.lock() = Some(spec.looping);
        *self.shared.last_spec.lock() = Some(spec);
        Ok(Box::new(MockNode {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn bind_device(&mut self, path: OutputPath, selection: &DeviceSelection) -> Result<()> {
        if self.shared.fail_next_bind.swap(false, Ordering::SeqCst) {
            return Err(Error::DeviceBind {
                device: format!("{selection:?}"),
                reason: "mock bind failure".into(),
            });
        }
        self.shared.binds.lock().push((path, selection.clone()));
        Ok(())
    }

    fn release_path(&mut self, path: OutputPath) {
        self.shared.releases.lock().push(path);
    }
}

struct MockNode {
    shared: Arc<MockShared>,
}

impl GraphNode for MockNode {
    fn set_rate(&mut self, rate: f64) {
        *self.shared.last_rate.lock() = Some(rate);
    }

    fn set_looping(&mut self, looping: bool) {
        *self.shared.last_looping.lock() = Some(looping);
    }

    fn set_gains(&mut self, main: f32, aux: f32) {
        *self.shared.last_gains.lock() = Some((main, aux));
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.shared.live_nodes.fetch_sub(1, Ordering::SeqCst);
    }
}
