//! Push-style viewer event stream.
//!
//! Every subscriber gets its own channel. Receivers that were dropped are
//! pruned on the next emit.

use crate::app::InteractionMode;
use crate::assets::{ModelOpenResult, OpenedModelInfo, QueueProgress};
use crate::render::hud::{Distance, MarkerInfo, SnapPoint};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ViewerEvent {
    LoadingStateChanged(bool),
    /// `None` once the queue has drained.
    LoadingQueueChanged(Option<QueueProgress>),
    ModelLoadingStarted { url: String, guid: String },
    /// Percent, 0 again when the load ends.
    ModelLoadingProgress { url: String, guid: String, progress: u8 },
    ModelLoadingEnded(ModelOpenResult),
    OpenedModelsChanged(Vec<OpenedModelInfo>),
    SelectionChanged { ids: BTreeSet<String>, manual: bool },
    HiddenChanged(BTreeSet<String>),
    MarkersChanged(Vec<MarkerInfo>),
    MarkersHighlighted(Vec<MarkerInfo>),
    MarkersSelected { markers: Vec<MarkerInfo>, manual: bool },
    SnapPointsHighlighted(Vec<SnapPoint>),
    SnapPointsSelected(Vec<SnapPoint>),
    DistanceMeasured(Option<Distance>),
    ModeChanged(InteractionMode),
    CameraPositionChanged([f32; 3]),
    /// Milliseconds spent composing the last frame.
    LastFrameTime(f64),
    ContextLossChanged(bool),
}

#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Rc<RefCell<Vec<Sender<ViewerEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ViewerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    pub fn emit(&self, event: ViewerEvent) {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}
