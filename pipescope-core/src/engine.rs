//! The engine: one task that owns all dashboard state.
//!
//! The merge coordinator (and so the graph), the animation clock and the
//! selection live inside a single task. Snapshots, stream events, connection
//! changes and UI commands reach it through one ordered channel; ticks and
//! polls come from timers in the same `select!`. Every input is handled in one
//! synchronous turn and a fresh [`DashboardView`] is published afterwards, so
//! readers never observe a partially applied update.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::animation::AnimationClock;
use crate::config::PipescopeConfig;
use crate::error::{ConfigError, FetchError, Result};
use crate::merge::{MergeCoordinator, MergeOutcome};
use crate::selection::SelectionState;
use crate::snapshot::{LoadedSnapshot, SnapshotLoader, SnapshotSource};
use crate::stream::{Backoff, StreamReconciler, StreamTransport};
use crate::transport::{HttpSnapshotSource, WsTransport};
use crate::types::{ConnectionState, NodeId, UpdateEvent};
use crate::view::{Aggregates, DashboardView, EngineNotice, NoticeKind, ViewStats};

const INPUT_BUFFER: usize = 256;
const NOTICE_BUFFER: usize = 32;

/// Everything the engine task reacts to, in arrival order.
#[derive(Debug)]
pub enum EngineInput {
    Snapshot(Arc<LoadedSnapshot>),
    FetchFailed(FetchError),
    Event(UpdateEvent),
    Connection(ConnectionState),
    Notice(EngineNotice),
    Command(Command),
}

/// UI controls.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select(Option<NodeId>),
    SetPlaying(bool),
    TogglePlaying,
    Refresh,
}

pub struct Engine {
    coordinator: MergeCoordinator,
    clock: AnimationClock,
    selection: SelectionState,
    connection: ConnectionState,
    notice: Option<EngineNotice>,
    aggregates: Aggregates,
    rng: StdRng,
    loader: Arc<SnapshotLoader>,
    inputs: mpsc::Sender<EngineInput>,
    view: watch::Sender<DashboardView>,
    notices: broadcast::Sender<EngineNotice>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Engine {
    /// Validate the config and start the engine and stream tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: PipescopeConfig,
        source: Arc<dyn SnapshotSource>,
        transport: Arc<dyn StreamTransport>,
    ) -> std::result::Result<EngineHandle, ConfigError> {
        config.validate()?;

        let id = Uuid::new_v4();
        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_BUFFER);
        let (view_tx, view_rx) = watch::channel(DashboardView::default());
        let (notices_tx, _) = broadcast::channel(NOTICE_BUFFER);
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let loader = Arc::new(SnapshotLoader::new(source));

        let mut clock = AnimationClock::from_config(&config.animation);
        clock.set_running(!config.animation.start_paused);

        let span = tracing::info_span!("engine", engine_id = %id);

        let reconciler = StreamReconciler::new(
            transport,
            Arc::clone(&loader),
            inputs_tx.clone(),
            config.stream.topic.clone(),
            Backoff::from_config(&config.stream),
            cancel.child_token(),
        );
        tasks.spawn(reconciler.run().instrument(span.clone()));

        let engine = Engine {
            coordinator: MergeCoordinator::new(),
            clock,
            selection: SelectionState::new(),
            connection: ConnectionState::Disconnected,
            notice: None,
            aggregates: Aggregates::default(),
            rng: StdRng::from_entropy(),
            loader,
            inputs: inputs_tx.clone(),
            view: view_tx,
            notices: notices_tx.clone(),
            cancel: cancel.clone(),
            tasks: tasks.clone(),
        };
        engine.publish();
        tasks.spawn(engine.run(config, inputs_rx).instrument(span));

        tracing::info!(engine_id = %id, "Engine started");
        Ok(EngineHandle {
            id,
            inputs: inputs_tx,
            view: view_rx,
            notices: notices_tx,
            cancel,
            tasks,
        })
    }

    /// Start with the HTTP snapshot source and WebSocket transport from config.
    pub fn connect(config: PipescopeConfig) -> Result<EngineHandle> {
        let source = HttpSnapshotSource::from_config(&config)?;
        let transport = WsTransport::from_config(&config);
        Ok(Self::start(config, Arc::new(source), Arc::new(transport))?)
    }

    async fn run(mut self, config: PipescopeConfig, mut inputs: mpsc::Receiver<EngineInput>) {
        let mut tick = tokio::time::interval(config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first poll tick fires immediately and performs the initial fetch.
        let mut poll = tokio::time::interval(config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(input) => self.handle(input),
                    None => break,
                },
                _ = tick.tick() => {
                    if !self.on_tick() {
                        continue;
                    }
                }
                _ = poll.tick() => {
                    self.spawn_fetch("poll");
                    continue;
                }
            }
            self.publish();
        }

        self.loader.abandon().await;
        self.connection = ConnectionState::Disconnected;
        self.publish();
        tracing::info!(
            snapshots = self.coordinator.stats().snapshots_applied,
            events = self.coordinator.stats().events_applied,
            "Engine stopped"
        );
    }

    fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Snapshot(snapshot) => self.on_snapshot(&snapshot),
            EngineInput::FetchFailed(e) => {
                tracing::debug!(error = %e, "Keeping last known state after failed fetch");
                self.raise(EngineNotice::new(
                    NoticeKind::FetchFailed,
                    format!("Snapshot fetch failed: {e}"),
                ));
            }
            EngineInput::Event(event) => self.on_event(event),
            EngineInput::Connection(state) => {
                if self.connection != state {
                    tracing::debug!(from = %self.connection, to = %state, "Connection state changed");
                    self.connection = state;
                }
            }
            EngineInput::Notice(notice) => self.raise(notice),
            EngineInput::Command(command) => self.on_command(command),
        }
    }

    fn on_snapshot(&mut self, snapshot: &LoadedSnapshot) {
        if self.coordinator.on_loaded(snapshot) != MergeOutcome::Applied {
            return;
        }
        self.aggregates = Aggregates::from(&snapshot.payload);
        self.selection.retain_existing(self.coordinator.graph());
        self.notice = None;
    }

    fn on_event(&mut self, event: UpdateEvent) {
        // Dropped and rejected events are logged by the coordinator.
        if self.coordinator.on_event(event) == MergeOutcome::RefreshRequested {
            self.spawn_fetch("refresh_needed");
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Select(node_id) => self.selection.select(node_id),
            Command::SetPlaying(playing) => self.clock.set_running(playing),
            Command::TogglePlaying => {
                let playing = self.clock.toggle();
                tracing::debug!(playing, "Animation toggled");
            }
            Command::Refresh => self.spawn_fetch("manual"),
        }
    }

    /// Advance the animation. `true` if anything visible moved.
    fn on_tick(&mut self) -> bool {
        self.clock
            .tick(self.coordinator.graph_mut(), &mut self.rng)
            .is_some_and(|report| !report.is_idle())
    }

    fn raise(&mut self, notice: EngineNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice.clone());
        self.notice = Some(notice);
    }

    /// Fetch in the background. Concurrent requests coalesce in the loader,
    /// and duplicate deliveries are dropped by sequence number.
    fn spawn_fetch(&self, reason: &'static str) {
        tracing::debug!(reason, "Requesting snapshot");
        let loader = Arc::clone(&self.loader);
        let inputs = self.inputs.clone();
        let cancel = self.cancel.clone();
        self.tasks.spawn(
            async move {
                let input = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = loader.fetch() => match result {
                        Ok(snapshot) => EngineInput::Snapshot(snapshot),
                        Err(e) => EngineInput::FetchFailed(e),
                    },
                };
                let _ = inputs.send(input).await;
            }
            .in_current_span(),
        );
    }

    fn publish(&self) {
        let mut view = DashboardView::from_graph(self.coordinator.graph());
        view.connection = self.connection;
        view.playing = self.clock.is_running();
        view.selected = self.selection.selected().map(str::to_owned);
        view.notice = self.notice.clone();
        view.aggregates = self.aggregates.clone();
        view.stats = ViewStats::new(self.coordinator.stats(), self.clock.ticks());
        view.snapshot_seq = self.coordinator.last_snapshot_seq();
        self.view.send_replace(view);
    }
}

/// Control surface for a running engine. Dropping it shuts the engine down.
pub struct EngineHandle {
    id: Uuid,
    inputs: mpsc::Sender<EngineInput>,
    view: watch::Receiver<DashboardView>,
    notices: broadcast::Sender<EngineNotice>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl EngineHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The latest published view.
    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// A receiver notified on every published view.
    pub fn watch(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    /// Select a node, or clear with `None`. Selecting the selected node clears it.
    pub async fn select(&self, node_id: Option<NodeId>) {
        self.command(Command::Select(node_id)).await;
    }

    pub async fn set_playing(&self, playing: bool) {
        self.command(Command::SetPlaying(playing)).await;
    }

    pub async fn toggle_playing(&self) {
        self.command(Command::TogglePlaying).await;
    }

    /// Fetch a fresh snapshot now. Joins a fetch already in flight.
    pub async fn refresh(&self) {
        self.command(Command::Refresh).await;
    }

    async fn command(&self, command: Command) {
        if self.inputs.send(EngineInput::Command(command)).await.is_err() {
            tracing::debug!(engine_id = %self.id, "Command sent to stopped engine");
        }
    }

    /// Stop timers, abandon fetches, close the stream. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(engine_id = %self.id, "Engine shutting down");
            self.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for every engine task to finish. Call after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::status::NodeStatus;
    use crate::stream::StreamConnection;
    use crate::types::{Edge, Node, NodeKind, SnapshotPayload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn fetch(&self) -> std::result::Result<SnapshotPayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SnapshotPayload::new(
                vec![
                    Node::new("A", NodeKind::Source)
                        .with_status(NodeStatus::Running)
                        .with_metrics(18, 24),
                    Node::new("B", NodeKind::Output),
                ],
                vec![Edge::new("A", "B", true)],
            ))
        }
    }

    /// Never connects.
    struct OfflineTransport;

    #[async_trait]
    impl StreamTransport for OfflineTransport {
        async fn connect(&self) -> std::result::Result<Box<dyn StreamConnection>, StreamError> {
            Err(StreamError::Connect {
                url: self.endpoint(),
                message: "offline".into(),
            })
        }

        fn endpoint(&self) -> String {
            "offline://".into()
        }
    }

    fn start(config: PipescopeConfig) -> (EngineHandle, Arc<FixedSource>) {
        let source = Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
        });
        let handle = Engine::start(config, source.clone(), Arc::new(OfflineTransport)).unwrap();
        (handle, source)
    }

    async fn wait_for(
        handle: &EngineHandle,
        predicate: impl FnMut(&DashboardView) -> bool,
    ) -> DashboardView {
        let mut rx = handle.watch();
        let view = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
            .await
            .expect("view condition not reached")
            .expect("engine dropped view channel")
            .clone();
        view
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_fetch_populates_view() {
        let (handle, _) = start(PipescopeConfig::default());
        let view = wait_for(&handle, |v| v.snapshot_seq.is_some()).await;
        assert_eq!(view.nodes.len(), 2);
        assert!(view.playing);
        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_twice_clears() {
        let (handle, _) = start(PipescopeConfig::default());
        wait_for(&handle, |v| v.snapshot_seq.is_some()).await;

        handle.select(Some("A".into())).await;
        wait_for(&handle, |v| v.selected.as_deref() == Some("A")).await;
        handle.select(Some("A".into())).await;
        let view = wait_for(&handle, |v| v.selected.is_none()).await;
        assert!(view.selected.is_none());

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_flow() {
        let mut config = PipescopeConfig::default();
        config.animation.start_paused = true;
        let (handle, _) = start(config);
        let view = wait_for(&handle, |v| v.snapshot_seq.is_some()).await;
        assert!(!view.playing);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.view().edge("A", "B").unwrap().flow_progress, 0.0);

        handle.toggle_playing().await;
        let view = wait_for(&handle, |v| {
            v.edge("A", "B").is_some_and(|e| e.flow_progress > 0.0)
        })
        .await;
        assert!(view.playing);

        handle.shutdown();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_idempotent() {
        let (handle, _) = start(PipescopeConfig::default());
        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shut_down());
        handle.join().await;
        handle.shutdown();
        handle.refresh().await;
        assert_eq!(handle.view().connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = PipescopeConfig::default();
        config.animation.tick_ms = 0;
        let source = Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
        });
        let result = Engine::start(config, source, Arc::new(OfflineTransport));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
