//! Runs capture adapters side by side

use crate::capture::{CaptureAdapter, CaptureSummary, StopSignal};
use std::path::PathBuf;
use std::thread::JoinHandle;

/// Runs every adapter on its own named thread until all have finished
///
/// Adapters share nothing but the stop signal. A panic in one adapter is
/// reported in its summary and leaves the others running.
pub struct CaptureRunner {
    adapters: Vec<CaptureAdapter>,
    stop: StopSignal,
}

impl CaptureRunner {
    pub fn new(stop: StopSignal) -> Self {
        Self {
            adapters: Vec::new(),
            stop,
        }
    }

    /// Builder method: add an adapter
    pub fn with_adapter(mut self, adapter: CaptureAdapter) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn add_adapter(&mut self, adapter: CaptureAdapter) {
        self.adapters.push(adapter);
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Handle that stops every adapter of this runner
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Start all adapters and wait for them; summaries keep adapter order
    pub fn run(self) -> Vec<CaptureSummary> {
        log::info!("Starting {} capture adapters", self.adapters.len());

        let mut handles: Vec<(String, PathBuf, Option<JoinHandle<CaptureSummary>>)> = Vec::new();
        for adapter in self.adapters {
            let tag = adapter.tag().to_string();
            let output = adapter.output().to_path_buf();
            let stop = self.stop.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("capture-{}", tag))
                .spawn(move || adapter.run(&stop));
            match spawned {
                Ok(handle) => handles.push((tag, output, Some(handle))),
                Err(e) => {
                    log::error!("[{}] Could not start capture thread: {}", tag, e);
                    handles.push((tag, output, None));
                }
            }
        }

        handles
            .into_iter()
            .map(|(tag, output, handle)| match handle {
                Some(handle) => handle.join().unwrap_or_else(|panic| {
                    let reason = panic_message(panic.as_ref());
                    log::error!("[{}] Capture thread panicked: {}", tag, reason);
                    CaptureSummary::failed(&tag, &output, format!("panicked: {}", reason))
                }),
                None => CaptureSummary::failed(&tag, &output, "thread could not be started"),
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
