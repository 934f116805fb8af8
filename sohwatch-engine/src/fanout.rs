//! Subscriber fan-out for flushed and update-response payloads.

use std::sync::Arc;

use sohwatch_types::StationAndStationGroupSoh;
use tokio::sync::broadcast;

/// Default number of payloads a slow subscriber may fall behind before it
/// starts missing them.
pub const DEFAULT_FANOUT_CAPACITY: usize = 64;

/// Broadcasts payloads to every current subscriber.
///
/// Payloads are shared behind an `Arc`; a subscriber that lags more than the
/// channel capacity receives `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct SohFanout {
    sender: broadcast::Sender<Arc<StationAndStationGroupSoh>>,
}

impl Default for SohFanout {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_CAPACITY)
    }
}

impl SohFanout {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to payloads published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StationAndStationGroupSoh>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Push a payload. Returns how many subscribers will see it.
    pub fn publish(&self, payload: StationAndStationGroupSoh) -> usize {
        let stations = payload.station_soh.len();
        let update_response = payload.is_update_response;
        match self.sender.send(Arc::new(payload)) {
            Ok(receivers) => {
                tracing::debug!(stations, update_response, receivers, "Published SOH payload");
                receivers
            }
            Err(_) => {
                tracing::debug!(stations, update_response, "No SOH subscribers, payload dropped");
                0
            }
        }
    }
}
