use std::sync::Arc;
use std::time::Instant;

use console_bridge::ConsoleBridge;

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    bridge: Arc<ConsoleBridge>,
}

impl AppState {
    pub fn new(bridge: ConsoleBridge) -> Self {
        Self {
            start: Instant::now(),
            bridge: Arc::new(bridge),
        }
    }

    pub fn bridge(&self) -> &ConsoleBridge {
        &self.bridge
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}
