//! Live results synchronizer.
//!
//! [`LiveResults`] owns at most one push channel. Opening a new activation
//! first tears the previous channel down and waits for its task to finish, so
//! two channels never race updates into the same state.

use super::channel::{ChannelConnector, ChannelTarget};
use super::{LiveState, Phase, ResultsState};
use crate::api::{ApiError, ResultsSource};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The running push channel of the current activation
struct ChannelTask {
    target: ChannelTarget,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Synchronizes a results view with the server for one poll at a time
pub struct LiveResults {
    source: Arc<dyn ResultsSource>,
    connector: Arc<dyn ChannelConnector>,
    state: Arc<watch::Sender<ResultsState>>,
    creator_key: Option<String>,
    channel: Option<ChannelTask>,
    /// Set once the current activation has established its channel
    channel_opened: bool,
}

impl LiveResults {
    pub fn new(source: Arc<dyn ResultsSource>, connector: Arc<dyn ChannelConnector>) -> Self {
        let (state, _) = watch::channel(ResultsState::default());
        Self {
            source,
            connector,
            state: Arc::new(state),
            creator_key: None,
            channel: None,
            channel_opened: false,
        }
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ResultsState> {
        self.state.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> ResultsState {
        self.state.borrow().clone()
    }

    /// Liveness flag
    pub fn is_live(&self) -> bool {
        self.state.borrow().is_live()
    }

    /// Target of the channel currently open or connecting, if any
    pub fn channel_target(&self) -> Option<&ChannelTarget> {
        self.channel
            .as_ref()
            .filter(|task| !task.handle.is_finished())
            .map(|task| &task.target)
    }

    /// Activate for `poll_id`.
    ///
    /// Closes any previous channel, fetches the snapshot, then opens the push
    /// channel. A failed fetch leaves the state in [`Phase::Failed`] and opens
    /// nothing.
    pub async fn open(&mut self, poll_id: &str, creator_key: Option<&str>) -> Result<(), ApiError> {
        self.close().await;

        self.channel_opened = false;
        self.creator_key = creator_key.map(str::to_string);
        self.state.send_replace(ResultsState::loading(poll_id));
        debug!(poll_id = %poll_id, "fetching results snapshot");

        match self.source.fetch_results(poll_id, creator_key).await {
            Ok(results) => {
                self.state.send_modify(|s| {
                    s.phase = Phase::Ready;
                    s.tally = results.votes;
                    s.poll = Some(results.poll);
                });
                self.ensure_channel();
                Ok(())
            }
            Err(e) => {
                warn!(poll_id = %poll_id, error = %e, "could not load results");
                let failure = e.clone();
                self.state.send_modify(|s| s.phase = Phase::Failed(failure));
                Err(e)
            }
        }
    }

    /// Open the push channel for the current activation.
    ///
    /// Returns `false` without doing anything when there is no ready snapshot
    /// or this activation already has a channel (open, connecting or ended).
    pub fn ensure_channel(&mut self) -> bool {
        if self.channel_opened {
            return false;
        }

        let target = {
            let state = self.state.borrow();
            match (&state.phase, &state.poll, &state.poll_id) {
                (Phase::Ready, Some(poll), Some(poll_id)) => {
                    let creator_key = if poll.public_results {
                        None
                    } else {
                        self.creator_key.clone()
                    };
                    ChannelTarget::new(poll_id.clone(), creator_key)
                }
                _ => return false,
            }
        };

        self.state.send_modify(|s| s.live = LiveState::Connecting);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_channel(
            self.connector.clone(),
            target.clone(),
            self.state.clone(),
            cancel.clone(),
        ));

        self.channel = Some(ChannelTask {
            target,
            cancel,
            handle,
        });
        self.channel_opened = true;
        true
    }

    /// Deactivate: close the channel and wait until its task has exited.
    ///
    /// The phase, poll and tally are left as they were.
    pub async fn close(&mut self) {
        if let Some(task) = self.channel.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(poll_id = %task.target.poll_id, error = %e, "results channel task failed");
            }
            debug!(poll_id = %task.target.poll_id, "results channel torn down");
        }

        self.state.send_if_modified(|s| {
            if s.live == LiveState::Disconnected {
                false
            } else {
                s.live = LiveState::Disconnected;
                true
            }
        });
    }
}

impl Drop for LiveResults {
    fn drop(&mut self) {
        if let Some(task) = self.channel.take() {
            task.cancel.cancel();
        }
    }
}

fn set_live(state: &watch::Sender<ResultsState>, live: LiveState) {
    state.send_if_modified(|s| {
        let changed = s.live != live;
        s.live = live;
        changed
    });
}

/// Drive one push channel until the server closes it, it errors, or it is cancelled.
///
/// Once cancelled, the task never writes to `state` again.
async fn run_channel(
    connector: Arc<dyn ChannelConnector>,
    target: ChannelTarget,
    state: Arc<watch::Sender<ResultsState>>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connector.connect(&target) => result,
    };

    let mut channel = match connected {
        Ok(channel) => channel,
        Err(e) => {
            warn!(poll_id = %target.poll_id, error = %e, "results channel failed to open");
            if !cancel.is_cancelled() {
                set_live(&state, LiveState::Disconnected);
            }
            return;
        }
    };

    if cancel.is_cancelled() {
        channel.close().await;
        return;
    }
    set_live(&state, LiveState::Live);
    info!(poll_id = %target.poll_id, "results are live");

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                channel.close().await;
                return;
            }
            next = channel.next_update() => next,
        };

        if cancel.is_cancelled() {
            channel.close().await;
            return;
        }

        match next {
            Some(Ok(update)) => {
                debug!(poll_id = %target.poll_id, total = update.votes.total(), "tally update");
                state.send_modify(|s| s.tally = update.votes);
            }
            Some(Err(e)) => {
                warn!(poll_id = %target.poll_id, error = %e, "results channel error");
                break;
            }
            None => {
                info!(poll_id = %target.poll_id, "results channel closed by server");
                break;
            }
        }
    }

    channel.close().await;
    set_live(&state, LiveState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::channel::{ChannelError, TallyUpdate, UpdateChannel};
    use crate::polls::{PollOption, PollPublic, PollResults, PollTheme, Tally};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockSource {
        results: Mutex<HashMap<String, Result<PollResults, ApiError>>>,
        fetches: AtomicUsize,
        keys_seen: Mutex<Vec<Option<String>>>,
    }

    impl MockSource {
        fn with(self, poll_id: &str, result: Result<PollResults, ApiError>) -> Self {
            self.results.lock().insert(poll_id.to_string(), result);
            self
        }
    }

    #[async_trait]
    impl ResultsSource for MockSource {
        async fn fetch_results(
            &self,
            poll_id: &str,
            creator_key: Option<&str>,
        ) -> Result<PollResults, ApiError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.keys_seen.lock().push(creator_key.map(str::to_string));
            self.results
                .lock()
                .get(poll_id)
                .cloned()
                .unwrap_or_else(|| Err(ApiError::NotFound("Poll not found.".to_string())))
        }
    }

    enum Frame {
        Update(Tally),
        Fail,
        Close,
    }

    #[derive(Clone)]
    struct OpenedChannel {
        target: ChannelTarget,
        closed: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<Frame>,
    }

    impl OpenedChannel {
        fn push(&self, frame: Frame) {
            let _ = self.tx.send(frame);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct MockConnector {
        opened: Mutex<Vec<OpenedChannel>>,
        refuse: AtomicBool,
    }

    impl MockConnector {
        fn opened(&self) -> Vec<OpenedChannel> {
            self.opened.lock().clone()
        }

        fn open_targets(&self) -> Vec<ChannelTarget> {
            self.opened()
                .into_iter()
                .filter(|c| !c.is_closed())
                .map(|c| c.target)
                .collect()
        }
    }

    #[async_trait]
    impl ChannelConnector for MockConnector {
        async fn connect(
            &self,
            target: &ChannelTarget,
        ) -> Result<Box<dyn UpdateChannel>, ChannelError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChannelError::Connect("connection refused".to_string()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let closed = Arc::new(AtomicBool::new(false));
            self.opened.lock().push(OpenedChannel {
                target: target.clone(),
                closed: closed.clone(),
                tx,
            });
            Ok(Box::new(MockChannel { rx, closed }))
        }
    }

    struct MockChannel {
        rx: mpsc::UnboundedReceiver<Frame>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl UpdateChannel for MockChannel {
        async fn next_update(&mut self) -> Option<Result<TallyUpdate, ChannelError>> {
            match self.rx.recv().await? {
                Frame::Update(votes) => Some(Ok(TallyUpdate { votes })),
                Frame::Fail => Some(Err(ChannelError::Transport("connection reset".to_string()))),
                Frame::Close => None,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn results(poll_id: &str, public_results: bool, votes: &[(&str, u64)]) -> PollResults {
        PollResults {
            poll: PollPublic {
                poll_id: poll_id.to_string(),
                question: "Favourite colour?".to_string(),
                options: vec![PollOption::new("o1", "Red"), PollOption::new("o2", "Blue")],
                allow_multiple_choices: false,
                theme: PollTheme::Default,
                active_until: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
                expire_at: Utc.with_ymd_and_hms(2030, 1, 8, 0, 0, 0).unwrap(),
                public_results,
            },
            votes: votes.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    fn setup(source: MockSource) -> (LiveResults, Arc<MockSource>, Arc<MockConnector>) {
        let source = Arc::new(source);
        let connector = Arc::new(MockConnector::default());
        let live = LiveResults::new(source.clone(), connector.clone());
        (live, source, connector)
    }

    async fn wait_until(
        rx: &mut watch::Receiver<ResultsState>,
        predicate: impl FnMut(&ResultsState) -> bool,
    ) -> ResultsState {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for state")
            .expect("state sender dropped")
            .clone()
    }

    #[tokio::test]
    async fn test_snapshot_then_live() {
        let (mut live, source, connector) =
            setup(MockSource::default().with("p1", Ok(results("p1", true, &[("o1", 1)]))));
        let mut rx = live.subscribe();

        live.open("p1", None).await.unwrap();
        let state = wait_until(&mut rx, |s| s.is_live()).await;

        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(state.tally.count("o1"), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(connector.open_targets(), vec![ChannelTarget::new("p1", None)]);
    }

    #[tokio::test]
    async fn test_update_replaces_whole_tally() {
        let (mut live, _source, connector) = setup(
            MockSource::default().with("p1", Ok(results("p1", true, &[("o1", 3), ("o2", 1)]))),
        );
        let mut rx = live.subscribe();
        live.open("p1", None).await.unwrap();
        wait_until(&mut rx, |s| s.is_live()).await;

        let channel = connector.opened().remove(0);
        channel.push(Frame::Update([("o2", 5)].into_iter().collect()));
        let state = wait_until(&mut rx, |s| s.tally.count("o2") == 5).await;

        assert_eq!(state.tally.count("o1"), 0);
        assert_eq!(state.tally.total(), 5);

        // Last received wins, even if it is lower
        channel.push(Frame::Update([("o1", 1), ("o2", 2)].into_iter().collect()));
        let state = wait_until(&mut rx, |s| s.tally.count("o2") == 2).await;
        assert_eq!(state.tally.count("o1"), 1);
    }

    #[tokio::test]
    async fn test_switching_polls_leaves_one_channel() {
        let (mut live, _source, connector) = setup(
            MockSource::default()
                .with("a", Ok(results("a", true, &[])))
                .with("b", Ok(results("b", true, &[]))),
        );
        let mut rx = live.subscribe();

        live.open("a", None).await.unwrap();
        wait_until(&mut rx, |s| s.is_live()).await;

        live.open("b", None).await.unwrap();
        wait_until(&mut rx, |s| s.is_live() && s.poll_id.as_deref() == Some("b")).await;

        let opened = connector.opened();
        assert_eq!(opened.len(), 2);
        assert_eq!(opened[0].target.poll_id, "a");
        assert!(opened[0].is_closed());
        assert_eq!(connector.open_targets(), vec![ChannelTarget::new("b", None)]);
        assert_eq!(live.channel_target(), Some(&ChannelTarget::new("b", None)));
    }

    #[tokio::test]
    async fn test_not_found_opens_no_channel() {
        let (mut live, _source, connector) = setup(MockSource::default().with(
            "gone",
            Err(ApiError::NotFound("This poll does not exist.".to_string())),
        ));

        let err = live.open("gone", None).await.unwrap_err();
        assert!(err.is_terminal_for_view());

        let state = live.state();
        assert_eq!(
            state.error().map(|e| e.to_string()),
            Some("This poll does not exist.".to_string())
        );
        assert!(!state.is_live());
        assert!(!live.ensure_channel());
        assert!(connector.opened().is_empty());
        assert!(live.channel_target().is_none());
    }

    #[tokio::test]
    async fn test_unexpected_close_keeps_tally_without_reconnect() {
        let (mut live, _source, connector) =
            setup(MockSource::default().with("p1", Ok(results("p1", true, &[("o1", 7)]))));
        let mut rx = live.subscribe();
        live.open("p1", None).await.unwrap();
        wait_until(&mut rx, |s| s.is_live()).await;

        connector.opened()[0].push(Frame::Close);
        let state = wait_until(&mut rx, |s| s.live == LiveState::Disconnected).await;

        assert_eq!(state.phase, Phase::Ready);
        assert_eq!(state.tally.count("o1"), 7);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.opened().len(), 1);
        assert!(!live.ensure_channel());
        assert_eq!(connector.opened().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_drops_liveness() {
        let (mut live, _source, connector) =
            setup(MockSource::default().with("p1", Ok(results("p1", true, &[("o1", 2)]))));
        let mut rx = live.subscribe();
        live.open("p1", None).await.unwrap();
        wait_until(&mut rx, |s| s.is_live()).await;

        connector.opened()[0].push(Frame::Fail);
        let state = wait_until(&mut rx, |s| s.live == LiveState::Disconnected).await;

        assert_eq!(state.tally.count("o1"), 2);
        assert!(connector.opened()[0].is_closed());
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_snapshot() {
        let (mut live, _source, connector) =
            setup(MockSource::default().with("p1", Ok(results("p1", true, &[("o2", 4)]))));
        connector.refuse.store(true, Ordering::SeqCst);
        let mut rx = live.subscribe();

        live.open("p1", None).await.unwrap();
        let state = wait_until(&mut rx, |s| {
            s.phase == Phase::Ready && s.live == LiveState::Disconnected
        })
        .await;

        assert_eq!(state.tally.count("o2"), 4);
        assert!(connector.opened().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_channel_is_idempotent() {
        let (mut live, _source, connector) =
            setup(MockSource::default().with("p1", Ok(results("p1", true, &[]))));
        live.open("p1", None).await.unwrap();

        assert!(!live.ensure_channel());
        assert!(!live.ensure_channel());

        let mut rx = live.subscribe();
        wait_until(&mut rx, |s| s.is_live()).await;
        assert_eq!(connector.opened().len(), 1);
    }

    #[tokio::test]
    async fn test_private_results_scope_channel_to_creator_key() {
        let (mut live, source, connector) = setup(
            MockSource::default()
                .with("secret", Ok(results("secret", false, &[])))
                .with("open", Ok(results("open", true, &[]))),
        );
        let mut rx = live.subscribe();

        live.open("secret", Some("key-123")).await.unwrap();
        wait_until(&mut rx, |s| s.is_live()).await;
        assert_eq!(
            live.channel_target(),
            Some(&ChannelTarget::new("secret", Some("key-123".to_string())))
        );

        live.open("open", Some("key-123")).await.unwrap();
        wait_until(&mut rx, |s| s.is_live() && s.poll_id.as_deref() == Some("open")).await;
        assert_eq!(connector.open_targets(), vec![ChannelTarget::new("open", None)]);

        assert_eq!(
            *source.keys_seen.lock(),
            vec![Some("key-123".to_string()), Some("key-123".to_string())]
        );
    }

    #[tokio::test]
    async fn test_close_tears_down_channel() {
        let (mut live, _source, connector) =
            setup(MockSource::default().with("p1", Ok(results("p1", true, &[("o1", 1)]))));
        let mut rx = live.subscribe();
        live.open("p1", None).await.unwrap();
        wait_until(&mut rx, |s| s.is_live()).await;

        live.close().await;

        assert!(connector.opened()[0].is_closed());
        assert!(live.channel_target().is_none());
        assert!(!live.is_live());
        assert_eq!(live.state().phase, Phase::Ready);
        assert_eq!(live.state().tally.count("o1"), 1);

        // Updates after teardown never reach the state
        connector.opened()[0].push(Frame::Update([("o1", 99)].into_iter().collect()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(live.state().tally.count("o1"), 1);
    }
}
