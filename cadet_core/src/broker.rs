use crate::config::BrokerConfig;
use crate::graph::{GraphBuilder, GraphRefreshScheduler, ReferenceGraph};
use crate::ingest::{ApplyOutcome, Card, IngestEvent, WorkerCommand};
use crate::models::{CARD_TABLES, Category, DATA_TABLES, EntityKeys, Table, Version, key_string};
use crate::store::{Snapshot, VersionedStore};
use crate::waiters::{Delivery, PollDelivery, PollWaiterRegistry, RefreshWaiterRegistry};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Everything the broker mutates, kept behind one lock so that each store
/// mutation and the waiter releases it triggers form a single step.
struct BrokerState {
    store: VersionedStore,
    refreshing: RefreshWaiterRegistry,
    polling: PollWaiterRegistry,
    scheduler: GraphRefreshScheduler,
}

#[derive(Default)]
struct Tally {
    applied: usize,
    rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub version: Version,
    pub graph_version: u64,
    pub graphs_built_at: Option<DateTime<Utc>>,
    pub graph_dirty: bool,
    pub refresh_waiters: usize,
    pub poll_waiters: usize,
}

/// Synchronization point between the ingestion worker and HTTP clients.
///
/// Owns the versioned store, both waiter registries and the graph scheduler.
/// Construct one per process and share it behind an `Arc`.
pub struct Broker {
    cfg: BrokerConfig,
    state: Mutex<BrokerState>,
    builder: Arc<dyn GraphBuilder>,
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl Broker {
    /// Build a broker and the receiving end of its worker command channel.
    #[tracing::instrument(level = "debug", skip(builder))]
    pub fn new(
        cfg: BrokerConfig,
        builder: Arc<dyn GraphBuilder>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerCommand>)> {
        cfg.validate()?;
        let (commands, rx) = mpsc::unbounded_channel();
        let broker = Self {
            cfg,
            state: Mutex::new(BrokerState {
                store: VersionedStore::new(),
                refreshing: RefreshWaiterRegistry::new(),
                polling: PollWaiterRegistry::new(),
                scheduler: GraphRefreshScheduler::new(),
            }),
            builder,
            commands,
        };
        Ok((broker, rx))
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.cfg
    }

    /// Apply one worker update: write records, bump the version per record,
    /// resolve matching refresh waiters and release long-poll waiters.
    #[tracing::instrument(level = "debug", skip_all, fields(kind = event.kind()))]
    pub async fn apply(&self, event: IngestEvent) -> ApplyOutcome {
        let mut st = self.state.lock().await;
        let outcome = st.apply(event);
        if outcome.rejected > 0 {
            tracing::warn!(
                applied = outcome.applied,
                rejected = outcome.rejected,
                "ingest event partially rejected"
            );
        }
        outcome
    }

    /// Apply events from `events` in arrival order until the sender goes away.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn run_ingest(&self, mut events: mpsc::Receiver<IngestEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        tracing::info!("ingest channel closed");
    }

    pub async fn get(&self, table: Table, key: &str) -> Option<(Version, Value)> {
        let st = self.state.lock().await;
        st.store
            .get(table, key)
            .map(|v| (st.store.version(), v.clone()))
    }

    pub async fn snapshot(&self, tables: &[Table]) -> Snapshot {
        self.state.lock().await.store.snapshot(tables)
    }

    /// Repos, comparisons, projects and column cards.
    pub async fn data(&self) -> Snapshot {
        self.snapshot(&DATA_TABLES).await
    }

    /// Issues, pull requests, actors and reviewers.
    pub async fn cards(&self) -> Snapshot {
        self.snapshot(&CARD_TABLES).await
    }

    pub async fn graphs(&self) -> (Version, Vec<ReferenceGraph>) {
        let st = self.state.lock().await;
        (st.store.version(), st.store.graphs().to_vec())
    }

    /// Ask the worker to refresh every (category, key) and wait until all of
    /// them have been written back.
    ///
    /// Deliveries come back in request order. Fails with
    /// `Error::RefreshTimeout` if the worker does not answer within
    /// `refresh_timeout`; the abandoned waiters are pruned.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn refresh(&self, requests: &[(Category, String)]) -> Result<Vec<Delivery>> {
        if requests.is_empty() {
            return Err(Error::InvalidInput(
                "refresh needs at least one category=key pair".to_string(),
            ));
        }

        let receivers = {
            let mut st = self.state.lock().await;
            let mut receivers = Vec::with_capacity(requests.len());
            for (category, key) in requests {
                tracing::info!(%category, key = key.as_str(), "queue refresh");
                receivers.push(st.refreshing.enqueue(*category, key));
                self.send(WorkerCommand::Refresh {
                    category: *category,
                    key: key.clone(),
                })?;
            }
            receivers
        };

        let mut deliveries = Vec::with_capacity(receivers.len());
        let wait = async {
            for rx in receivers {
                let delivery = rx
                    .await
                    .map_err(|_| Error::Closed("refresh waiter dropped".to_string()))?;
                deliveries.push(delivery);
            }
            Ok::<_, Error>(())
        };

        let waited = time::timeout(self.cfg.refresh_timeout, wait).await;
        match waited {
            Ok(res) => res.map(|()| deliveries),
            Err(_) => {
                let pending = requests.len() - deliveries.len();
                let pruned = self.state.lock().await.refreshing.prune();
                tracing::warn!(pending, pruned, "refresh timed out");
                Err(Error::RefreshTimeout { pending })
            }
        }
    }

    /// Wait for the next release of long-poll waiters.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn poll(&self) -> Result<PollDelivery> {
        let rx = self.state.lock().await.polling.enqueue();
        rx.await
            .map_err(|_| Error::Closed("poll waiter dropped".to_string()))
    }

    /// Forward a webhook delivery to the worker without waiting on it.
    #[tracing::instrument(level = "debug", skip(self, payload))]
    pub fn forward_hook(&self, event: Option<String>, payload: Value) -> Result<()> {
        self.send(WorkerCommand::Hook { event, payload })
    }

    /// Release every long-poll waiter with the current data snapshot.
    pub async fn release_polls(&self) -> usize {
        self.state.lock().await.release_polls()
    }

    /// One scheduler tick: rebuild and publish the graphs if anything
    /// relevant changed since the last rebuild.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn tick_graph(&self) -> bool {
        let mut st = self.state.lock().await;
        if !st.scheduler.take_dirty() {
            return false;
        }
        let input = st.store.graph_input();
        let graphs = self.builder.build(&input);
        let count = graphs.len();
        let graph_version = st.store.set_graphs(graphs);
        tracing::info!(
            graph_version,
            graphs = count,
            cards = input.card_ids.len(),
            "refreshed reference graphs"
        );
        true
    }

    /// Drop waiters whose callers have disconnected.
    pub async fn prune_waiters(&self) -> usize {
        let mut st = self.state.lock().await;
        st.refreshing.prune() + st.polling.prune()
    }

    pub async fn stats(&self) -> BrokerStats {
        let st = self.state.lock().await;
        BrokerStats {
            version: st.store.version(),
            graph_version: st.store.graph_version(),
            graphs_built_at: st.store.graphs_built_at(),
            graph_dirty: st.scheduler.is_dirty(),
            refresh_waiters: st.refreshing.pending(),
            poll_waiters: st.polling.pending(),
        }
    }

    /// Start the poll-release timer and the graph scheduler. Both stop when
    /// `cancel` fires.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn spawn_background(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.clone().run_poll_timer(cancel.clone())),
            tokio::spawn(self.clone().run_graph_scheduler(cancel)),
        ]
    }

    async fn run_poll_timer(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.cfg.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let mut st = self.state.lock().await;
                    let pruned = st.refreshing.prune() + st.polling.prune();
                    let released = st.release_polls();
                    tracing::debug!(released, pruned, "poll timer fired");
                }
            }
        }
    }

    // Re-armed after each tick completes, so a slow rebuild delays the next
    // tick instead of stacking.
    async fn run_graph_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.cfg.graph_interval) => {
                    self.tick_graph().await;
                }
            }
        }
    }

    fn send(&self, cmd: WorkerCommand) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| Error::Closed("worker command channel closed".to_string()))
    }
}

impl BrokerState {
    fn apply(&mut self, event: IngestEvent) -> ApplyOutcome {
        let mut tally = Tally::default();
        let mut graph_relevant = false;

        match event {
            IngestEvent::SetRepos(repos) => {
                for repo in repos {
                    self.put_entity(Category::Repo, repo, &mut tally);
                }
            }
            IngestEvent::SetRepo(repo) => {
                self.put_entity(Category::Repo, repo, &mut tally);
            }
            IngestEvent::SetProjects(projects) => {
                for project in projects {
                    self.put_entity(Category::Project, project, &mut tally);
                }
            }
            IngestEvent::SetIssues(issues) => {
                for issue in issues {
                    self.put_entity(Category::Issue, issue, &mut tally);
                }
                graph_relevant = true;
            }
            IngestEvent::SetIssue(issue) => {
                self.put_entity(Category::Issue, issue, &mut tally);
                graph_relevant = true;
            }
            IngestEvent::SetPullRequests(prs) => {
                for pr in prs {
                    self.put_entity(Category::Pr, pr, &mut tally);
                }
                graph_relevant = true;
            }
            IngestEvent::SetPullRequest(pr) => {
                self.put_entity(Category::Pr, pr, &mut tally);
                graph_relevant = true;
            }
            IngestEvent::SetComparison(id, value) => {
                self.put_keyed(Table::Comparisons, &id, value, &mut tally);
            }
            IngestEvent::SetReferences(id, refs) => {
                self.put_keyed(Table::References, &id, Value::Array(refs), &mut tally);
                graph_relevant = true;
            }
            IngestEvent::SetActors(id, value) => {
                self.put_keyed(Table::Actors, &id, value, &mut tally);
            }
            IngestEvent::SetReviewers(id, value) => {
                self.put_keyed(Table::Reviewers, &id, value, &mut tally);
            }
            IngestEvent::SetCards(column, cards) => {
                self.put_cards(&column, cards, &mut tally);
                graph_relevant = true;
            }
            IngestEvent::SetGraphs(graphs) => {
                tracing::info!(graphs = graphs.len(), "got graphs");
                self.store.set_graphs(graphs);
                return ApplyOutcome {
                    version: self.store.version(),
                    applied: 1,
                    rejected: 0,
                };
            }
        }

        if tally.applied > 0 {
            if graph_relevant {
                self.scheduler.mark_dirty();
            }
            self.release_polls();
        }

        ApplyOutcome {
            version: self.store.version(),
            applied: tally.applied,
            rejected: tally.rejected,
        }
    }

    /// Write one record under its keys, then resolve waiters for the alias
    /// and the id. The version is bumped before any waiter sees the record.
    fn commit(&mut self, category: Category, keys: &EntityKeys, record: Value) -> Version {
        let table = category.table();
        let version = self.store.apply(table, keys, record);
        let Some(record) = self.store.get(table, &keys.id) else {
            return version;
        };
        if let Some(alias) = &keys.alias {
            self.refreshing.resolve(category, alias, record, version);
        }
        self.refreshing.resolve(category, &keys.id, record, version);
        version
    }

    fn put_entity(&mut self, category: Category, record: Value, tally: &mut Tally) -> bool {
        match EntityKeys::for_record(category, &record) {
            Ok(keys) => {
                self.commit(category, &keys, record);
                tally.applied += 1;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed record");
                tally.rejected += 1;
                false
            }
        }
    }

    fn put_keyed(&mut self, table: Table, id: &Value, value: Value, tally: &mut Tally) {
        let Some(key) = key_string(id) else {
            tracing::warn!(?table, "ignoring keyed update without id");
            tally.rejected += 1;
            return;
        };
        self.store.apply(table, &EntityKeys::id(key), value);
        tally.applied += 1;
    }

    /// Store the issues and pull requests embedded in a column's cards, then
    /// the column's card list itself (content reduced to `contentId`).
    fn put_cards(&mut self, column: &Value, cards: Vec<Card>, tally: &mut Tally) {
        let Some(column) = key_string(column) else {
            tracing::warn!("ignoring cards update without column id");
            tally.rejected += 1;
            return;
        };

        let mut column_cards = Vec::with_capacity(cards.len());
        for card in cards {
            let Some(content) = card.content else {
                column_cards.push(json!({ "id": card.id, "note": card.note }));
                continue;
            };
            for (category, record) in [
                (Category::Issue, content.issue),
                (Category::Pr, content.pull_request),
            ] {
                let Some(record) = record else {
                    continue;
                };
                let content_id = record.get("id").cloned();
                if self.put_entity(category, record, tally) {
                    column_cards.push(json!({ "id": card.id, "contentId": content_id }));
                }
            }
        }

        self.commit(
            Category::ColumnCards,
            &EntityKeys::id(column),
            Value::Array(column_cards),
        );
        tally.applied += 1;
    }

    fn release_polls(&mut self) -> usize {
        if self.polling.is_empty() {
            return 0;
        }
        let snapshot = Arc::new(self.store.snapshot(&DATA_TABLES));
        self.polling.release_all(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ComponentGraphBuilder, GraphInput};
    use std::time::Duration;

    fn broker() -> (Arc<Broker>, mpsc::UnboundedReceiver<WorkerCommand>) {
        let (b, rx) = Broker::new(BrokerConfig::default(), Arc::new(ComponentGraphBuilder)).unwrap();
        (Arc::new(b), rx)
    }

    fn issue(id: u64, state: &str) -> Value {
        json!({ "id": id, "state": state, "title": format!("issue {id}") })
    }

    #[derive(Default)]
    struct RecordingBuilder {
        inputs: std::sync::Mutex<Vec<GraphInput>>,
    }

    impl GraphBuilder for RecordingBuilder {
        fn build(&self, input: &GraphInput) -> Vec<ReferenceGraph> {
            self.inputs.lock().unwrap().push(input.clone());
            Vec::new()
        }
    }

    #[tokio::test]
    async fn batch_bumps_version_per_record_and_resolves_each() {
        let (broker, _cmds) = broker();
        let before = broker.stats().await.version;

        let mut waiters = Vec::new();
        {
            let mut st = broker.state.lock().await;
            for id in 1..=5 {
                waiters.push(st.refreshing.enqueue(Category::Issue, &id.to_string()));
            }
        }

        let outcome = broker
            .apply(IngestEvent::SetIssues((1..=5).map(|i| issue(i, "OPEN")).collect()))
            .await;
        assert_eq!(outcome.applied, 5);
        assert_eq!(outcome.version.0, before.0 + 5);

        for (i, rx) in waiters.into_iter().enumerate() {
            let d = rx.await.unwrap();
            assert_eq!(d.record, issue(i as u64 + 1, "OPEN"));
            assert_eq!(d.version.0, before.0 + i as u64 + 1);
        }
        assert_eq!(broker.stats().await.refresh_waiters, 0);
    }

    #[tokio::test]
    async fn repo_id_and_alias_waiters_resolve_independently() {
        let (broker, _cmds) = broker();
        let (by_id, by_alias, other) = {
            let mut st = broker.state.lock().await;
            (
                st.refreshing.enqueue(Category::Repo, "42"),
                st.refreshing.enqueue(Category::Repo, "org/name"),
                st.refreshing.enqueue(Category::Repo, "org/other"),
            )
        };

        let repo = json!({ "id": 42, "owner": "org", "name": "name" });
        broker
            .apply(IngestEvent::SetRepos(vec![
                repo.clone(),
                json!({ "id": 43, "owner": "org", "name": "misc" }),
            ]))
            .await;

        assert_eq!(by_id.await.unwrap().record, repo);
        assert_eq!(by_alias.await.unwrap().record, repo);
        assert_eq!(broker.stats().await.refresh_waiters, 1);
        drop(other);
        assert_eq!(broker.get(Table::Repos, "org/name").await.unwrap().1, repo);
    }

    #[tokio::test]
    async fn refresh_waits_for_every_requested_key() {
        let (broker, mut cmds) = broker();
        let b = broker.clone();
        let task = tokio::spawn(async move {
            b.refresh(&[
                (Category::Issue, "1".to_string()),
                (Category::Pr, "2".to_string()),
            ])
            .await
        });

        assert_eq!(
            cmds.recv().await,
            Some(WorkerCommand::Refresh {
                category: Category::Issue,
                key: "1".to_string()
            })
        );
        assert_eq!(
            cmds.recv().await,
            Some(WorkerCommand::Refresh {
                category: Category::Pr,
                key: "2".to_string()
            })
        );

        broker.apply(IngestEvent::SetIssue(issue(1, "OPEN"))).await;
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        let pr = json!({ "id": 2, "state": "OPEN" });
        broker.apply(IngestEvent::SetPullRequest(pr.clone())).await;

        let deliveries = task.await.unwrap().unwrap();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].record, issue(1, "OPEN"));
        assert_eq!(deliveries[1].record, pr);
        assert!(deliveries[1].version > deliveries[0].version);
    }

    #[tokio::test]
    async fn duplicate_refreshes_share_one_write() {
        let (broker, _cmds) = broker();
        let a = {
            let b = broker.clone();
            tokio::spawn(async move { b.refresh(&[(Category::Issue, "9".to_string())]).await })
        };
        let b2 = {
            let b = broker.clone();
            tokio::spawn(async move { b.refresh(&[(Category::Issue, "9".to_string())]).await })
        };
        while broker.stats().await.refresh_waiters < 2 {
            tokio::task::yield_now().await;
        }

        broker.apply(IngestEvent::SetIssue(issue(9, "OPEN"))).await;
        let a = a.await.unwrap().unwrap();
        let b2 = b2.await.unwrap().unwrap();
        assert_eq!(a, b2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_times_out_and_prunes_waiters() {
        let (broker, _cmds) = broker();
        let err = broker
            .refresh(&[(Category::Issue, "404".to_string())])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RefreshTimeout { pending: 1 }));
        assert_eq!(broker.stats().await.refresh_waiters, 0);
    }

    #[tokio::test]
    async fn abandoned_refresh_is_pruned() {
        let (broker, _cmds) = broker();
        let b = broker.clone();
        let task = tokio::spawn(async move { b.refresh(&[(Category::Pr, "5".to_string())]).await });
        while broker.stats().await.refresh_waiters == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert_eq!(broker.prune_waiters().await, 1);
        assert_eq!(broker.stats().await.refresh_waiters, 0);
    }

    #[tokio::test]
    async fn refresh_rejects_empty_request() {
        let (broker, _cmds) = broker();
        assert!(matches!(
            broker.refresh(&[]).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn mutation_releases_long_poll_waiters() {
        let (broker, _cmds) = broker();
        let b = broker.clone();
        let poll = tokio::spawn(async move { b.poll().await });
        while broker.stats().await.poll_waiters == 0 {
            tokio::task::yield_now().await;
        }

        let outcome = broker
            .apply(IngestEvent::SetComparison(json!(42), json!({ "ahead": 3 })))
            .await;
        let got = poll.await.unwrap().unwrap();
        assert_eq!(got.version, outcome.version);
        assert_eq!(got.snapshot.tables[&Table::Comparisons]["42"], json!({ "ahead": 3 }));
    }

    #[tokio::test]
    async fn manual_release_hands_out_current_snapshot() {
        let (broker, _cmds) = broker();
        assert_eq!(broker.release_polls().await, 0);

        let b = broker.clone();
        let poll = tokio::spawn(async move { b.poll().await });
        while broker.stats().await.poll_waiters == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.release_polls().await, 1);
        assert_eq!(poll.await.unwrap().unwrap().version, Version::INITIAL);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timer_releases_without_changes() {
        let (broker, _cmds) = broker();
        let cancel = CancellationToken::new();
        broker.spawn_background(cancel.clone());

        let b = broker.clone();
        let poll = tokio::spawn(async move { b.poll().await });
        time::sleep(broker.config().poll_interval + Duration::from_secs(1)).await;

        let got = poll.await.unwrap().unwrap();
        assert_eq!(got.version, Version::INITIAL);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_updates_costs_one_rebuild() {
        let (broker, _cmds) = broker();
        assert!(broker.tick_graph().await);
        assert_eq!(broker.stats().await.graph_version, 1);

        let cancel = CancellationToken::new();
        broker.spawn_background(cancel.clone());
        broker.apply(IngestEvent::SetIssue(issue(1, "OPEN"))).await;
        broker
            .apply(IngestEvent::SetReferences(json!(1), vec![json!(2)]))
            .await;
        assert!(broker.stats().await.graph_dirty);

        let interval = broker.config().graph_interval;
        time::sleep(interval + Duration::from_secs(1)).await;
        assert_eq!(broker.stats().await.graph_version, 2);

        time::sleep(interval).await;
        assert_eq!(broker.stats().await.graph_version, 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn graph_rebuild_reads_open_cards_and_references() {
        let recorder = Arc::new(RecordingBuilder::default());
        let (broker, _cmds) = Broker::new(BrokerConfig::default(), recorder.clone()).unwrap();

        broker
            .apply(IngestEvent::SetIssues(vec![issue(1, "OPEN"), issue(2, "CLOSED")]))
            .await;
        broker
            .apply(IngestEvent::SetPullRequests(vec![json!({ "id": 3, "state": "OPEN" })]))
            .await;
        broker
            .apply(IngestEvent::SetReferences(json!(1), vec![json!(3)]))
            .await;
        assert!(broker.tick_graph().await);
        assert!(!broker.tick_graph().await);

        let inputs = recorder.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].card_ids, vec!["1".to_string(), "3".to_string()]);
        assert_eq!(
            inputs[0].references,
            vec![("1".to_string(), vec!["3".to_string()])]
        );
    }

    #[tokio::test]
    async fn cards_store_content_and_column_list() {
        let (broker, _cmds) = broker();
        let (issue_rx, column_rx) = {
            let mut st = broker.state.lock().await;
            (
                st.refreshing.enqueue(Category::Issue, "5"),
                st.refreshing.enqueue(Category::ColumnCards, "10"),
            )
        };
        let before = broker.stats().await.version;

        let cards: Vec<Card> = serde_json::from_value(json!([
            { "id": 100, "content": { "issue": { "id": 5, "state": "OPEN" } } },
            { "id": 101, "content": { "pull_request": { "id": 6, "state": "OPEN" } } },
            { "id": 102, "note": "remember the milk" }
        ]))
        .unwrap();
        let outcome = broker.apply(IngestEvent::SetCards(json!(10), cards)).await;

        assert_eq!(outcome.version.0, before.0 + 3);
        assert_eq!(issue_rx.await.unwrap().record["state"], "OPEN");
        assert_eq!(
            column_rx.await.unwrap().record,
            json!([
                { "id": 100, "contentId": 5 },
                { "id": 101, "contentId": 6 },
                { "id": 102, "note": "remember the milk" }
            ])
        );
        assert!(broker.get(Table::Prs, "6").await.is_some());
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let (broker, _cmds) = broker();
        let before = broker.stats().await.version;
        let outcome = broker
            .apply(IngestEvent::SetRepos(vec![
                json!({ "id": 1, "name": "no-owner" }),
                json!({ "id": 2, "owner": "org", "name": "ok" }),
            ]))
            .await;

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.version.0, before.0 + 1);
        assert!(broker.get(Table::Repos, "1").await.is_none());

        let outcome = broker
            .apply(IngestEvent::SetActors(Value::Null, json!([])))
            .await;
        assert_eq!(outcome.rejected, 1);
        assert_eq!(outcome.version.0, before.0 + 1);
    }

    #[tokio::test]
    async fn hooks_are_forwarded_to_worker() {
        let (broker, mut cmds) = broker();
        broker
            .forward_hook(Some("issues".to_string()), json!({ "action": "opened" }))
            .unwrap();
        assert_eq!(
            cmds.recv().await,
            Some(WorkerCommand::Hook {
                event: Some("issues".to_string()),
                payload: json!({ "action": "opened" })
            })
        );
    }

    #[tokio::test]
    async fn ingest_loop_applies_in_order() {
        let (broker, _cmds) = broker();
        let (tx, rx) = mpsc::channel(8);
        tx.send(IngestEvent::SetIssue(issue(1, "OPEN"))).await.unwrap();
        tx.send(IngestEvent::SetIssue(issue(1, "CLOSED"))).await.unwrap();
        drop(tx);

        broker.run_ingest(rx).await;
        let (version, record) = broker.get(Table::Issues, "1").await.unwrap();
        assert_eq!(record["state"], "CLOSED");
        assert_eq!(version, Version(3));
    }
}
