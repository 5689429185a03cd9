use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Signal sent to the main loop when the user asks to stop.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    /// First Ctrl-C: cancel outstanding jobs and wait for them to settle.
    Graceful,
    /// Second Ctrl-C: stop waiting and exit immediately.
    Immediate,
}

/// Tracks how many times the user has asked to shut down, so a second
/// Ctrl-C escalates from graceful to immediate.
#[derive(Default)]
pub struct ShutdownController {
    requests: AtomicU8,
}

impl ShutdownController {
    pub fn record_request(&self) -> ShutdownEvent {
        let previous = self.requests.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            ShutdownEvent::Graceful
        } else {
            ShutdownEvent::Immediate
        }
    }
}

/// Spawns a task that listens for Ctrl-C and forwards escalating
/// [`ShutdownEvent`]s onto `tx`.
pub fn spawn_ctrl_c_handler(controller: Arc<ShutdownController>, tx: mpsc::UnboundedSender<ShutdownEvent>) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let event = controller.record_request();
            if tx.send(event).is_err() {
                return;
            }
        }
    });
}
