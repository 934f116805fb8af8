//! The SOH aggregation engine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sohwatch_broker::{Consumer, Producer};
use sohwatch_types::{
    AcknowledgedStatusChange, ChannelMonitorInput, Milliseconds, QuietedStatusChange,
    SohStatusChange, StationAndStationGroupSoh, StationGroupStatus, StationSohSnapshot,
};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::fanout::{SohFanout, DEFAULT_FANOUT_CAPACITY};
use crate::provider::{SohSettings, StationDirectory};
use crate::store::{Applied, SnapshotStore};
use crate::timer::{self, FlushHandle, QUIET_WINDOW};
use crate::EngineError;

/// Target for end-to-end latency markers.
pub const TIMING_TARGET: &str = "sohwatch::timing";

/// Broker topics the engine reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SohTopics {
    /// Inbound station/group SOH.
    pub station_soh: String,
    /// Outbound acknowledgements.
    pub acknowledged: String,
    /// Outbound quiet requests.
    pub quieted: String,
}

impl Default for SohTopics {
    fn default() -> Self {
        Self {
            station_soh: "soh.ui-materialized-view".to_string(),
            acknowledged: "soh.ack-station-soh".to_string(),
            quieted: "soh.quieted-list".to_string(),
        }
    }
}

struct EngineState {
    store: SnapshotStore,
    /// `None` until the first batch; a flush is then allowed immediately.
    last_message_at: Option<Instant>,
}

struct EngineInner {
    topics: SohTopics,
    producer: Producer,
    fanout: SohFanout,
    clock: Arc<dyn Clock>,
    update_interval: Duration,
    default_quiet_interval: Duration,
    quiet_window: Duration,
    state: Mutex<EngineState>,
}

/// Consolidates SOH snapshots from the broker and pushes batched updates to
/// subscribers.
///
/// All state sits behind one mutex, so batch handling, timer ticks and
/// queries are serialized. Payloads are handed to the fan-out while that
/// mutex is held, so subscribers see them in state order. Cheap to clone.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use sohwatch_broker::{MemoryBroker, Producer};
/// use sohwatch_engine::{SohEngine, SohTopics};
///
/// let broker = MemoryBroker::new();
/// let topics = SohTopics::default();
/// let producer = Producer::new(
///     Arc::new(broker),
///     vec![topics.acknowledged.clone(), topics.quieted.clone()],
/// );
///
/// let engine = SohEngine::builder()
///     .topics(topics)
///     .producer(producer)
///     .directory(vec!["AAK".to_string(), "ABC".to_string()])
///     .build()
///     .unwrap();
///
/// assert_eq!(engine.get_all_station_snapshots().len(), 2);
/// ```
#[derive(Clone)]
pub struct SohEngine {
    inner: Arc<EngineInner>,
}

impl SohEngine {
    /// Create a builder for configuring the engine.
    pub fn builder() -> SohEngineBuilder {
        SohEngineBuilder::default()
    }

    /// Register as the SOH topic handler on `consumer` and start the flush
    /// timer. Must be called from within a tokio runtime.
    pub fn initialize(&self, consumer: &Consumer) -> FlushHandle {
        let engine = self.clone();
        consumer.register_typed_handler(
            &self.inner.topics.station_soh,
            move |topic, messages: Vec<StationAndStationGroupSoh>| engine.on_batch(topic, messages),
        );
        tracing::info!(
            topic = %self.inner.topics.station_soh,
            stations = self.inner.state.lock().store.len(),
            "SOH engine initialized"
        );
        self.start_timer()
    }

    /// Start only the flush timer.
    pub fn start_timer(&self) -> FlushHandle {
        timer::spawn(self.clone())
    }

    /// Apply seed snapshots through the normal dedup path, as if consumed.
    pub fn seed_snapshots(&self, snapshots: Vec<StationSohSnapshot>) {
        let mut state = self.inner.state.lock();
        let mut applied = 0;
        for snapshot in snapshots {
            if state.store.apply(snapshot, false).is_stored() {
                applied += 1;
            }
        }
        tracing::info!(applied, "Seeded SOH snapshots");
    }

    /// Handle a decoded batch from the SOH topic.
    pub fn on_batch(&self, topic: &str, messages: Vec<StationAndStationGroupSoh>) {
        if topic != self.inner.topics.station_soh {
            tracing::warn!(topic, count = messages.len(), "Received data for unknown topic");
            return;
        }
        tracing::debug!(topic, count = messages.len(), "Consuming SOH messages");

        let received_at = self.inner.clock.now_ms();
        {
            let mut state = self.inner.state.lock();
            state.last_message_at = Some(Instant::now());

            for message in messages {
                let is_update_response = message.is_update_response;
                if is_update_response {
                    tracing::info!(
                        station = message.station_soh.first().map(|s| s.station_name.as_str()).unwrap_or(""),
                        "Processing update response message"
                    );
                }

                state.store.replace_groups(message.station_groups);

                for snapshot in &message.station_soh {
                    match state.store.apply(snapshot.clone(), is_update_response) {
                        Applied::Stored { .. } if !is_update_response => {
                            tracing::info!(
                                target: TIMING_TARGET,
                                uuid = %snapshot.uuid,
                                station = %snapshot.station_name,
                                received_at,
                                created_at = snapshot.creation_time,
                                "Timing point B: SOH object received"
                            );
                        }
                        Applied::Stored { .. } => {}
                        Applied::Duplicate => {
                            tracing::warn!(
                                uuid = %snapshot.uuid,
                                station = %snapshot.station_name,
                                "Duplicate station SOH uuid found, dropping entry"
                            );
                        }
                    }
                }

                if is_update_response {
                    self.inner.fanout.publish(StationAndStationGroupSoh::update_response(
                        state.store.groups().to_vec(),
                        message
                            .station_soh
                            .iter()
                            .map(StationSohSnapshot::without_channels)
                            .collect(),
                    ));
                }
            }

            if let Some(group) = state.store.groups().first() {
                tracing::debug!(group = %group.group_name, created_at = group.time, "Station group state replaced");
            }
        }
    }

    /// One flush-timer tick. Flushes the pending snapshots when there are any
    /// and nothing has been consumed for the quiet window (default
    /// [`QUIET_WINDOW`]). Returns whether a flush happened.
    pub fn on_timer_tick(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.store.has_pending() {
            return false;
        }
        if let Some(last) = state.last_message_at {
            if last.elapsed() < self.inner.quiet_window {
                return false;
            }
        }

        let stations: Vec<StationSohSnapshot> = state
            .store
            .take_pending()
            .iter()
            .map(StationSohSnapshot::without_channels)
            .collect();
        state.last_message_at = Some(Instant::now());

        tracing::debug!(stations = stations.len(), "Flushing pending SOH");
        self.inner
            .fanout
            .publish(StationAndStationGroupSoh::new(state.store.groups().to_vec(), stations));
        true
    }

    /// Every stored snapshot, in station-name order.
    pub fn get_all_station_snapshots(&self) -> Vec<StationSohSnapshot> {
        self.inner.state.lock().store.snapshots().cloned().collect()
    }

    pub fn get_station_snapshot(&self, station_name: &str) -> Option<StationSohSnapshot> {
        self.inner.state.lock().store.get(station_name).cloned()
    }

    /// Full current state with channel detail stripped, for initial queries.
    pub fn get_station_and_group_snapshot_with_empty_channels(&self) -> StationAndStationGroupSoh {
        let state = self.inner.state.lock();
        StationAndStationGroupSoh::new(
            state.store.groups().to_vec(),
            state
                .store
                .snapshots()
                .map(StationSohSnapshot::without_channels)
                .collect(),
        )
    }

    pub fn station_groups(&self) -> Vec<StationGroupStatus> {
        self.inner.state.lock().store.groups().to_vec()
    }

    /// Subscribe to flushed and update-response payloads.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StationAndStationGroupSoh>> {
        self.inner.fanout.subscribe()
    }

    pub fn fanout(&self) -> &SohFanout {
        &self.inner.fanout
    }

    pub fn update_interval(&self) -> Duration {
        self.inner.update_interval
    }

    pub fn default_quiet_interval(&self) -> Duration {
        self.inner.default_quiet_interval
    }

    /// Number of stations waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().store.pending_len()
    }

    /// Publish an acknowledgement of every unacknowledged change on each
    /// named station.
    ///
    /// Stations with nothing to acknowledge, and stations the engine does
    /// not know, publish nothing. Publishing happens in the background and
    /// failures are only logged, so this always returns `true`.
    pub fn acknowledge(&self, requester: &str, station_names: &[String], comment: Option<&str>) -> bool {
        tracing::info!(
            stations = %station_names.join(","),
            requester,
            comment = comment.unwrap_or(""),
            "Publishing SOH acknowledgement"
        );

        let now = self.inner.clock.now_ms();
        let changes: Vec<AcknowledgedStatusChange> = {
            let state = self.inner.state.lock();
            station_names
                .iter()
                .filter_map(|name| match state.store.get(name) {
                    Some(snapshot) => acknowledgement(snapshot, requester, now, comment),
                    None => {
                        tracing::warn!(station = %name, "Cannot acknowledge unknown station");
                        None
                    }
                })
                .collect()
        };

        for change in changes {
            self.publish(self.inner.topics.acknowledged.clone(), change);
        }
        true
    }

    /// Publish a quiet request for every channel/monitor pair of every input.
    ///
    /// No local state changes; the effect arrives back as an update-response.
    /// Always returns `true`.
    pub fn quiet(&self, requester: &str, inputs: &[ChannelMonitorInput]) -> bool {
        let now = self.inner.clock.now_ms();

        for input in inputs {
            let pairs: Vec<String> = input
                .channel_monitor_pairs
                .iter()
                .map(|p| format!("{}/{}", p.channel_name, p.monitor_type))
                .collect();
            tracing::info!(
                station = %input.station_name,
                pairs = %pairs.join(","),
                requester,
                comment = input.comment.as_deref().unwrap_or(""),
                "Publishing SOH quiet"
            );

            for pair in &input.channel_monitor_pairs {
                let change = QuietedStatusChange {
                    station_name: input.station_name.clone(),
                    monitor_type: pair.monitor_type.clone(),
                    channel_name: pair.channel_name.clone(),
                    quiet_until: now.saturating_add(input.quiet_duration_ms),
                    quiet_duration: Milliseconds::from_millis(input.quiet_duration_ms),
                    quieted_by: requester.to_string(),
                    comment: input.comment.clone(),
                };
                self.publish(self.inner.topics.quieted.clone(), change);
            }
        }
        true
    }

    fn publish<T>(&self, topic: String, message: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::error!(topic = %topic, "No async runtime available, message not published");
                return;
            }
        };

        let producer = self.inner.producer.clone();
        handle.spawn(async move {
            if let Err(e) = producer.send_json(&topic, &[message], None).await {
                tracing::error!(topic = %topic, error = %e, "Failed to publish change with SOH producer");
            }
        });
    }
}

impl std::fmt::Debug for SohEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SohEngine")
            .field("topics", &self.inner.topics)
            .field("update_interval", &self.inner.update_interval)
            .finish()
    }
}

fn acknowledgement(
    snapshot: &StationSohSnapshot,
    requester: &str,
    now: u64,
    comment: Option<&str>,
) -> Option<AcknowledgedStatusChange> {
    let changes: Vec<SohStatusChange> = snapshot
        .channel_sohs
        .iter()
        .flat_map(|channel| {
            channel.unacknowledged().map(move |mvs| SohStatusChange {
                first_change_time: snapshot.creation_time,
                monitor_type: mvs.monitor_type.clone(),
                changed_channel: channel.channel_name.clone(),
            })
        })
        .collect();

    if changes.is_empty() {
        tracing::debug!(station = %snapshot.station_name, "Nothing to acknowledge");
        return None;
    }

    Some(AcknowledgedStatusChange {
        id: uuid::Uuid::new_v4().to_string(),
        acknowledged_by: requester.to_string(),
        acknowledged_at: now,
        acknowledged_station: snapshot.station_name.clone(),
        acknowledged_changes: changes,
        comment: comment.map(str::to_string),
    })
}

/// Builder for [`SohEngine`].
#[derive(Default)]
pub struct SohEngineBuilder {
    topics: Option<SohTopics>,
    producer: Option<Producer>,
    directory: Option<Box<dyn StationDirectory>>,
    clock: Option<Arc<dyn Clock>>,
    update_interval: Option<Duration>,
    default_quiet_interval: Option<Duration>,
    station_groups: Vec<StationGroupStatus>,
    fanout_capacity: Option<usize>,
    quiet_window: Option<Duration>,
}

impl SohEngineBuilder {
    /// Set the topics (default: [`SohTopics::default`]).
    pub fn topics(mut self, topics: SohTopics) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set the producer used for acknowledgements and quiet requests.
    pub fn producer(mut self, producer: Producer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Set the station directory the snapshot map is seeded from.
    pub fn directory(mut self, directory: impl StationDirectory + 'static) -> Self {
        self.directory = Some(Box::new(directory));
        self
    }

    /// Take intervals and station groups from `settings`.
    pub fn settings(mut self, settings: &dyn SohSettings) -> Self {
        self.update_interval = Some(settings.update_interval());
        self.default_quiet_interval = Some(settings.default_quiet_interval());
        self.station_groups = settings.station_groups();
        self
    }

    /// Set the wall clock (default: system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the fan-out channel capacity (default: 64).
    pub fn fanout_capacity(mut self, capacity: usize) -> Self {
        self.fanout_capacity = Some(capacity);
        self
    }

    /// Set how long ingest must be idle before a flush (default: 500 ms).
    pub fn quiet_window(mut self, window: Duration) -> Self {
        self.quiet_window = Some(window);
        self
    }

    /// Build the engine, seeding an empty snapshot for every known station.
    pub fn build(self) -> Result<SohEngine, EngineError> {
        let producer = self
            .producer
            .ok_or_else(|| EngineError::Config("no producer configured".to_string()))?;

        let stations = match &self.directory {
            Some(directory) => directory.station_names()?,
            None => Vec::new(),
        };

        let mut store = SnapshotStore::new();
        store.replace_groups(self.station_groups);
        store.seed_placeholders(stations);

        let defaults = crate::provider::StaticSettings::default();
        Ok(SohEngine {
            inner: Arc::new(EngineInner {
                topics: self.topics.unwrap_or_default(),
                producer,
                fanout: SohFanout::new(self.fanout_capacity.unwrap_or(DEFAULT_FANOUT_CAPACITY)),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                update_interval: self.update_interval.unwrap_or(defaults.update_interval),
                default_quiet_interval: self
                    .default_quiet_interval
                    .unwrap_or(defaults.default_quiet_interval),
                quiet_window: self.quiet_window.unwrap_or(QUIET_WINDOW),
                state: Mutex::new(EngineState {
                    store,
                    last_message_at: None,
                }),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::provider::StaticSettings;
    use crate::timer::FLUSH_TICK;
    use sohwatch_broker::MemoryBroker;
    use sohwatch_types::{
        ChannelMonitorPair, ChannelSoh, SohMonitorValueAndStatus, SohStatus,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    struct Fixture {
        broker: MemoryBroker,
        consumer: Consumer,
        engine: SohEngine,
        clock: Arc<ManualClock>,
    }

    fn fixture(stations: &[&str]) -> Fixture {
        let broker = MemoryBroker::new();
        let topics = SohTopics::default();
        let consumer = Consumer::new(Arc::new(broker.clone()), vec![topics.station_soh.clone()]);
        let producer = Producer::new(
            Arc::new(broker.clone()),
            vec![topics.acknowledged.clone(), topics.quieted.clone()],
        );
        let clock = Arc::new(ManualClock::new(1_000_000));
        let settings = StaticSettings {
            station_groups: vec![StationGroupStatus::unevaluated("ALL_1", 1)],
            ..StaticSettings::default()
        };

        let engine = SohEngine::builder()
            .topics(topics)
            .producer(producer)
            .directory(stations.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .settings(&settings)
            .clock(clock.clone())
            .build()
            .unwrap();

        Fixture {
            broker,
            consumer,
            engine,
            clock,
        }
    }

    fn soh(station: &str, uuid: &str) -> StationSohSnapshot {
        StationSohSnapshot::new(station, uuid).channel(
            ChannelSoh::new(format!("{}.{}.BHZ", station, station))
                .monitor(SohMonitorValueAndStatus::new("LAG", SohStatus::Good)),
        )
    }

    fn batch(snapshots: Vec<StationSohSnapshot>) -> Vec<StationAndStationGroupSoh> {
        vec![StationAndStationGroupSoh::new(
            vec![StationGroupStatus::unevaluated("ALL_1", 1)],
            snapshots,
        )]
    }

    fn update_response(snapshots: Vec<StationSohSnapshot>) -> Vec<StationAndStationGroupSoh> {
        vec![StationAndStationGroupSoh::update_response(
            vec![StationGroupStatus::unevaluated("ALL_1", 1)],
            snapshots,
        )]
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn topic(f: &Fixture) -> String {
        f.engine.inner.topics.station_soh.clone()
    }

    #[test]
    fn seeds_one_placeholder_per_station() {
        let f = fixture(&["AAK", "ABC", "ARCES"]);
        let all = f.engine.get_all_station_snapshots();

        assert_eq!(all.len(), 3);
        assert!(all.iter().all(StationSohSnapshot::is_placeholder));
        assert_eq!(f.engine.pending_count(), 3);
        assert_eq!(f.engine.station_groups()[0].group_name, "ALL_1");
    }

    #[test]
    fn build_without_producer_fails() {
        let result = SohEngine::builder().build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn directory_failure_is_fatal() {
        struct Broken;
        impl StationDirectory for Broken {
            fn station_names(&self) -> Result<Vec<String>, EngineError> {
                Err(EngineError::Directory("unreachable".to_string()))
            }
        }

        let producer = Producer::new(Arc::new(MemoryBroker::new()), Vec::new());
        let result = SohEngine::builder().producer(producer).directory(Broken).build();
        assert!(matches!(result, Err(EngineError::Directory(_))));
    }

    #[test]
    fn duplicate_uuid_is_dropped() {
        let f = fixture(&["AAK"]);
        let first = soh("AAK", "v1").created_at(1);
        let second = soh("AAK", "v1").created_at(2);

        f.engine.on_batch(&topic(&f), batch(vec![first]));
        f.engine.on_batch(&topic(&f), batch(vec![second]));

        assert_eq!(f.engine.get_station_snapshot("AAK").unwrap().creation_time, 1);
        assert_eq!(f.engine.get_all_station_snapshots().len(), 1);
    }

    #[test]
    fn newer_uuid_overwrites() {
        let f = fixture(&["AAK"]);
        f.engine.on_batch(&topic(&f), batch(vec![soh("AAK", "v1")]));
        f.engine.on_batch(&topic(&f), batch(vec![soh("AAK", "v2")]));

        assert_eq!(f.engine.get_station_snapshot("AAK").unwrap().uuid, "v2");
    }

    #[test]
    fn unknown_topic_is_ignored() {
        let f = fixture(&["AAK"]);
        f.engine.on_batch("system.system-messages", batch(vec![soh("AAK", "v1")]));

        assert!(f.engine.get_station_snapshot("AAK").unwrap().is_placeholder());
        assert_eq!(f.engine.pending_count(), 1);
    }

    #[test]
    fn groups_replaced_before_snapshots_applied() {
        let f = fixture(&["AAK"]);
        let message = StationAndStationGroupSoh::new(
            vec![
                StationGroupStatus::unevaluated("A", 1),
                StationGroupStatus::unevaluated("B", 2),
            ],
            vec![soh("AAK", "v1")],
        );
        f.engine.on_batch(&topic(&f), vec![message]);

        let groups = f.engine.station_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].group_name, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_flush_with_latest_state() {
        let f = fixture(&["AAK"]);
        let mut rx = f.engine.subscribe();
        let _timer = f.engine.start_timer();

        for i in 0..5 {
            f.engine
                .on_batch(&topic(&f), batch(vec![soh("AAK", &format!("v{}", i))]));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_millis(700)).await;

        let payload = rx.try_recv().unwrap();
        assert!(!payload.is_update_response);
        assert_eq!(payload.station_soh.len(), 1);
        assert_eq!(payload.station_soh[0].uuid, "v4");
        assert!(payload.station_soh[0].channel_sohs.is_empty());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // Nothing new arrives, so nothing more is flushed.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn steady_stream_suppresses_flush() {
        let f = fixture(&["AAK"]);
        let mut rx = f.engine.subscribe();
        let _timer = f.engine.start_timer();

        for i in 0..20 {
            f.engine
                .on_batch(&topic(&f), batch(vec![soh("AAK", &format!("v{}", i))]));
            tokio::time::sleep(Duration::from_millis(400)).await;
        }

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(f.engine.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_response_is_pushed_immediately() {
        let f = fixture(&["AAK", "ABC"]);
        assert!(f.engine.on_timer_tick());
        let mut rx = f.engine.subscribe();

        f.engine
            .on_batch(&topic(&f), update_response(vec![soh("AAK", "v1")]));

        let payload = rx.try_recv().unwrap();
        assert!(payload.is_update_response);
        assert_eq!(payload.station_soh[0].station_name, "AAK");
        assert!(payload.station_soh[0].channel_sohs.is_empty());
        assert_eq!(payload.station_groups[0].group_name, "ALL_1");

        // Not pending, so the timer has nothing to flush.
        assert_eq!(f.engine.pending_count(), 0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!f.engine.on_timer_tick());
        // The primary map still holds the channel detail.
        assert_eq!(f.engine.get_station_snapshot("AAK").unwrap().channel_sohs.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_response_refreshes_pending_station() {
        let f = fixture(&["AAK"]);
        f.engine.on_batch(&topic(&f), batch(vec![soh("AAK", "v1")]));
        f.engine
            .on_batch(&topic(&f), update_response(vec![soh("AAK", "v2")]));

        assert_eq!(f.engine.pending_count(), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;

        let mut rx = f.engine.subscribe();
        assert!(f.engine.on_timer_tick());
        assert_eq!(rx.try_recv().unwrap().station_soh[0].uuid, "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let f = fixture(&["AAK"]);
        f.engine.seed_snapshots(vec![soh("AAK", "mock")]);
        let mut rx = f.engine.subscribe();
        let _timer = f.engine.start_timer();

        tokio::time::sleep(FLUSH_TICK - Duration::from_millis(10)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rx.try_recv().unwrap().station_soh[0].uuid, "mock");
    }

    #[tokio::test(start_paused = true)]
    async fn placeholders_flush_on_first_tick() {
        let f = fixture(&["AAK", "ABC"]);
        let mut rx = f.engine.subscribe();
        let _timer = f.engine.start_timer();

        tokio::time::sleep(FLUSH_TICK + Duration::from_millis(10)).await;
        let payload = rx.try_recv().unwrap();
        let names: Vec<&str> = payload.station_soh.iter().map(|s| s.station_name.as_str()).collect();
        assert_eq!(names, vec!["AAK", "ABC"]);
        assert!(payload.station_soh.iter().all(StationSohSnapshot::is_placeholder));
        assert_eq!(f.engine.pending_count(), 0);
    }

    #[test]
    fn concurrent_ticks_keep_fanout_in_state_order() {
        const ROUNDS: u64 = 2_000;

        let broker = MemoryBroker::new();
        let topics = SohTopics::default();
        let producer = Producer::new(Arc::new(broker), vec![topics.acknowledged.clone()]);
        let engine = SohEngine::builder()
            .topics(topics)
            .producer(producer)
            .directory(vec!["AAK".to_string()])
            .quiet_window(Duration::ZERO)
            .fanout_capacity(4 * ROUNDS as usize)
            .build()
            .unwrap();
        let station_topic = engine.inner.topics.station_soh.clone();
        assert!(engine.on_timer_tick());
        let mut rx = engine.subscribe();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..ROUNDS {
                    engine.on_batch(&station_topic, batch(vec![soh("AAK", &(2 * i).to_string())]));
                    engine.on_batch(
                        &station_topic,
                        update_response(vec![soh("AAK", &(2 * i + 1).to_string())]),
                    );
                }
                done.store(true, std::sync::atomic::Ordering::SeqCst);
            });
            scope.spawn(|| {
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    engine.on_timer_tick();
                }
            });
        });

        let mut seen = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            for snapshot in &payload.station_soh {
                seen.push(snapshot.uuid.parse::<u64>().unwrap());
            }
        }
        assert!(seen.len() as u64 >= ROUNDS);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "fan-out went backwards");
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_no_longer_flushes() {
        let f = fixture(&["AAK"]);
        let mut rx = f.engine.subscribe();
        let timer = f.engine.start_timer();
        timer.shutdown().await;

        f.engine.on_batch(&topic(&f), batch(vec![soh("AAK", "v1")]));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn initial_query_strips_channels() {
        let f = fixture(&["AAK"]);
        f.engine.on_batch(&topic(&f), batch(vec![soh("AAK", "v1")]));

        let full = f.engine.get_station_and_group_snapshot_with_empty_channels();
        assert!(!full.is_update_response);
        assert_eq!(full.station_groups.len(), 1);
        assert!(full.station_soh[0].channel_sohs.is_empty());
        assert_eq!(f.engine.get_station_snapshot("AAK").unwrap().channel_sohs.len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_publishes_only_flagged_monitors() {
        let f = fixture(&["AAK", "ABC"]);
        let aak = StationSohSnapshot::new("AAK", "v1").created_at(900).channel(
            ChannelSoh::new("AAK.AAK.BHZ")
                .monitor(SohMonitorValueAndStatus::new("LAG", SohStatus::Bad).unacknowledged())
                .monitor(SohMonitorValueAndStatus::new("MISSING", SohStatus::Bad).unacknowledged())
                .monitor(SohMonitorValueAndStatus::new("TIMELINESS", SohStatus::Good)),
        );
        f.engine.on_batch(&topic(&f), batch(vec![aak, soh("ABC", "v1")]));

        let acknowledged = f.engine.acknowledge(
            "analyst1",
            &["AAK".to_string(), "ABC".to_string(), "NOPE".to_string()],
            Some("looked at it"),
        );
        assert!(acknowledged);
        settle().await;

        let sent = f.broker.sent("soh.ack-station-soh");
        assert_eq!(sent.len(), 1);
        let change: AcknowledgedStatusChange = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(change.acknowledged_station, "AAK");
        assert_eq!(change.acknowledged_by, "analyst1");
        assert_eq!(change.acknowledged_at, 1_000_000);
        assert_eq!(change.comment.as_deref(), Some("looked at it"));
        let types: Vec<&str> = change
            .acknowledged_changes
            .iter()
            .map(|c| c.monitor_type.as_str())
            .collect();
        assert_eq!(types, vec!["LAG", "MISSING"]);
        assert!(change.acknowledged_changes.iter().all(|c| c.first_change_time == 900));
        assert!(change
            .acknowledged_changes
            .iter()
            .all(|c| c.changed_channel == "AAK.AAK.BHZ"));
    }

    #[tokio::test]
    async fn quiet_computes_expiry_from_now() {
        let f = fixture(&["AAK"]);
        f.clock.set(5_000);

        let input = ChannelMonitorInput {
            station_name: "AAK".to_string(),
            channel_monitor_pairs: vec![
                ChannelMonitorPair::new("AAK.AAK.BHZ", "LAG"),
                ChannelMonitorPair::new("AAK.AAK.BHN", "MISSING"),
            ],
            quiet_duration_ms: 60_000,
            comment: None,
        };
        assert!(f.engine.quiet("analyst1", &[input]));
        settle().await;

        let sent = f.broker.sent("soh.quieted-list");
        assert_eq!(sent.len(), 2);
        let first: QuietedStatusChange = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(first.quiet_until, 65_000);
        assert_eq!(first.quiet_duration, Milliseconds::from_millis(60_000));
        assert_eq!(first.monitor_type, "LAG");
        assert_eq!(first.quieted_by, "analyst1");

        // Quieting never touches local state.
        assert!(f.engine.get_station_snapshot("AAK").unwrap().is_placeholder());
    }

    #[tokio::test]
    async fn quiet_expiry_saturates() {
        let f = fixture(&["AAK"]);
        let input = ChannelMonitorInput {
            station_name: "AAK".to_string(),
            channel_monitor_pairs: vec![ChannelMonitorPair::new("AAK.AAK.BHZ", "LAG")],
            quiet_duration_ms: u64::MAX,
            comment: None,
        };

        assert!(f.engine.quiet("analyst1", &[input]));
        settle().await;

        let sent = f.broker.sent("soh.quieted-list");
        let change: QuietedStatusChange = serde_json::from_slice(&sent[0]).unwrap();
        assert_eq!(change.quiet_until, u64::MAX);
        assert_eq!(change.quiet_duration, Milliseconds::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        let f = fixture(&["AAK"]);
        f.broker.fail_next_sends(1);
        let input = ChannelMonitorInput {
            station_name: "AAK".to_string(),
            channel_monitor_pairs: vec![ChannelMonitorPair::new("AAK.AAK.BHZ", "LAG")],
            quiet_duration_ms: 1_000,
            comment: Some("noisy".to_string()),
        };

        assert!(f.engine.quiet("analyst1", &[input]));
        settle().await;
        assert!(f.broker.sent("soh.quieted-list").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_consume_flush_acknowledge() {
        let f = fixture(&["AAK"]);
        let mut rx = f.engine.subscribe();
        let _timer = f.engine.initialize(&f.consumer);
        f.consumer.start().await;

        let aak = StationSohSnapshot::new("AAK", "v1").channel(
            ChannelSoh::new("AAK.AAK.BHZ")
                .monitor(SohMonitorValueAndStatus::new("LAG", SohStatus::Bad).unacknowledged()),
        );
        f.broker
            .publish_json("soh.ui-materialized-view", &batch(vec![aak]))
            .unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.station_soh.len(), 1);
        assert_eq!(payload.station_soh[0].uuid, "v1");
        assert!(payload.station_soh[0].channel_sohs.is_empty());

        f.engine.acknowledge("analyst1", &["AAK".to_string()], None);
        settle().await;
        assert_eq!(f.broker.sent("soh.ack-station-soh").len(), 1);
    }
}
