//! Control-loop tests against the embedded store and an in-memory executor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleet_executor::{ExecError, ExecResult, InstanceExecutor, InstanceHandle, InstanceSpec};
use fleet_monitor::*;
use fleet_state::*;
use tokio::sync::oneshot;

// ── Test doubles ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ExecState {
    /// name -> running
    containers: BTreeMap<String, bool>,
    calls: Vec<String>,
    specs: Vec<InstanceSpec>,
    fail_creates: u32,
    fail_removes: u32,
    fail_restarts: u32,
}

/// Executor that keeps containers in a map and records every call.
#[derive(Debug, Default)]
struct RecordingExecutor {
    state: Mutex<ExecState>,
}

impl RecordingExecutor {
    fn with_running(names: &[&str]) -> Self {
        let exec = Self::default();
        {
            let mut st = exec.state.lock().unwrap();
            for name in names {
                st.containers.insert(name.to_string(), true);
            }
        }
        exec
    }

    fn with_stopped(names: &[&str]) -> Self {
        let exec = Self::default();
        {
            let mut st = exec.state.lock().unwrap();
            for name in names {
                st.containers.insert(name.to_string(), false);
            }
        }
        exec
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn has(&self, name: &str) -> bool {
        self.state.lock().unwrap().containers.contains_key(name)
    }

    fn running(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    fn spec(&self, name: &str) -> Option<InstanceSpec> {
        self.state
            .lock()
            .unwrap()
            .specs
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    fn fail_creates(&self, n: u32) {
        self.state.lock().unwrap().fail_creates = n;
    }

    fn fail_removes(&self, n: u32) {
        self.state.lock().unwrap().fail_removes = n;
    }

    fn fail_restarts(&self, n: u32) {
        self.state.lock().unwrap().fail_restarts = n;
    }
}

fn injected() -> ExecError {
    ExecError::Api {
        status: 500,
        message: "injected failure".to_string(),
    }
}

impl InstanceExecutor for RecordingExecutor {
    async fn exists(&self, name: &str) -> ExecResult<bool> {
        Ok(self.has(name))
    }

    async fn is_running(&self, name: &str) -> ExecResult<bool> {
        Ok(self.running(name))
    }

    async fn is_healthy(&self, name: &str) -> ExecResult<bool> {
        Ok(self.running(name))
    }

    async fn create(&self, spec: &InstanceSpec) -> ExecResult<InstanceHandle> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("create {}", spec.name));
        if st.fail_creates > 0 {
            st.fail_creates -= 1;
            return Err(injected());
        }
        if st.containers.contains_key(&spec.name) {
            return Ok(InstanceHandle::existing(&spec.name));
        }
        st.containers.insert(spec.name.clone(), false);
        st.specs.push(spec.clone());
        Ok(InstanceHandle {
            name: spec.name.clone(),
            id: Some(format!("id-{}", spec.name)),
            created: true,
        })
    }

    async fn start(&self, handle: &InstanceHandle) -> ExecResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("start {}", handle.name));
        if let Some(running) = st.containers.get_mut(&handle.name) {
            *running = true;
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> ExecResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("stop {name}"));
        if let Some(running) = st.containers.get_mut(name) {
            *running = false;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> ExecResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("remove {name}"));
        if st.fail_removes > 0 {
            st.fail_removes -= 1;
            return Err(injected());
        }
        st.containers.remove(name);
        Ok(())
    }

    async fn restart(&self, name: &str) -> ExecResult<()> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(format!("restart {name}"));
        if st.fail_restarts > 0 {
            st.fail_restarts -= 1;
            return Err(injected());
        }
        Ok(())
    }
}

/// Embedded store whose status scan can be made to fail.
#[derive(Debug, Clone)]
struct FlakyStore {
    inner: StateStore,
    fail_scans: Arc<AtomicBool>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: StateStore::open_in_memory().unwrap(),
            fail_scans: Arc::new(AtomicBool::new(false)),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.fail_scans.store(failing, Ordering::SeqCst);
    }
}

impl FleetStore for FlakyStore {
    async fn group_names(&self) -> StateResult<Vec<String>> {
        self.inner.group_names().await
    }

    async fn group_indexed(&self, name: &str) -> StateResult<bool> {
        self.inner.group_indexed(name).await
    }

    async fn index_group(&self, name: &str) -> StateResult<()> {
        self.inner.index_group(name).await
    }

    async fn group_fields(&self, name: &str) -> StateResult<BTreeMap<String, String>> {
        self.inner.group_fields(name).await
    }

    async fn set_group_fields_nx(
        &self,
        name: &str,
        fields: &BTreeMap<String, String>,
    ) -> StateResult<usize> {
        self.inner.set_group_fields_nx(name, fields).await
    }

    async fn delete_group(&self, name: &str) -> StateResult<bool> {
        self.inner.delete_group(name).await
    }

    async fn status_keys(&self, pattern: &str) -> StateResult<Vec<String>> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(StateError::Connection("injected scan failure".to_string()));
        }
        self.inner.status_keys(pattern).await
    }

    async fn get_status(&self, key: &str) -> StateResult<Option<String>> {
        self.inner.get_status(key).await
    }

    async fn put_status(&self, key: &str, value: &str) -> StateResult<()> {
        self.inner.put_status(key, value).await
    }

    async fn delete_status(&self, key: &str) -> StateResult<bool> {
        self.inner.delete_status(key).await
    }
}

// ── Helpers ───────────────────────────────────────────────────────

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

struct Harness<S: FleetStore> {
    fleet: Fleet<S>,
    exec: Arc<RecordingExecutor>,
    monitor: FleetMonitor<S, RecordingExecutor>,
}

fn harness_with<S: FleetStore>(store: S, exec: RecordingExecutor) -> Harness<S> {
    let fleet = Fleet::new(store);
    let exec = Arc::new(exec);
    let monitor = FleetMonitor::new(
        fleet.clone(),
        exec.clone(),
        MonitorConfig::default(),
        Provisioner::default(),
    );
    Harness {
        fleet,
        exec,
        monitor,
    }
}

fn harness() -> Harness<StateStore> {
    harness_with(StateStore::open_in_memory().unwrap(), RecordingExecutor::default())
}

fn micro(total: u32, joinable: u32) -> ServerGroup {
    let mut group = ServerGroup::new("Micro", "MICRO", 26000);
    group.max_players = 16;
    group.required_total_servers = total;
    group.required_joinable_servers = joinable;
    group.server_type = "Minigames".to_string();
    group
}

async fn put_record<S: FleetStore>(
    fleet: &Fleet<S>,
    name: &str,
    group: &str,
    motd: &str,
    players: u32,
    max: u32,
    now: u64,
) -> ServerRecord {
    let mut record = ServerRecord::placeholder(name, group, 0, now);
    record.motd = motd.to_string();
    record.player_count = players;
    record.max_player_count = max;
    record.start_up_date = now / 1000 - 120;
    fleet.put_server_status(&record).await.unwrap();
    record
}

fn names(kills: &[(String, KillReason)]) -> Vec<&str> {
    kills.iter().map(|(n, _)| n.as_str()).collect()
}

// ── Startup ───────────────────────────────────────────────────────

#[tokio::test]
async fn init_seeds_defaults_and_drops_player_groups() {
    let h = harness();
    let mut player = ServerGroup::new("Alice", "Alice", 27000);
    player.server_type = "Player".to_string();
    let mut community = ServerGroup::new("Guild", "Guild", 27100);
    community.server_type = "COMMUNITY".to_string();
    h.fleet.register_group(&player).await.unwrap();
    h.fleet.register_group(&community).await.unwrap();

    let removed = h.monitor.init().await.unwrap();
    assert_eq!(removed, vec!["Alice", "Guild"]);
    assert_eq!(h.fleet.group_names().await.unwrap(), vec!["Lobby", "MIN", "NANO"]);
}

// ── Provisioning ──────────────────────────────────────────────────

#[tokio::test]
async fn first_tick_provisions_each_group_once() {
    let mut h = harness();
    h.monitor.init().await.unwrap();

    let report = h.monitor.tick_at(now_ms()).await.unwrap();
    assert_eq!(report.creates, vec!["Lobby-1", "MIN-1", "NANO-1"]);
    h.monitor.settle().await;

    for name in ["Lobby-1", "MIN-1", "NANO-1"] {
        assert!(h.exec.running(name), "{name} should be running");
        let record = h.fleet.server_status(name).await.unwrap().unwrap();
        assert_eq!(record.motd, "Starting");
    }
    let nano = h.fleet.server_status("NANO-1").await.unwrap().unwrap();
    assert_eq!(nano.port, 25901);
    assert_eq!(nano.max_player_count, 16);

    let spec = h.exec.spec("MIN-1").unwrap();
    assert_eq!(spec.env_value("MINEPLEX_PORT"), Some("25801"));
    assert_eq!(spec.env_value("MINEPLEX_PLUGIN"), Some("Arcade.jar"));

    // Placeholders count as booting capacity: nothing more is created.
    let report = h.monitor.tick_at(now_ms()).await.unwrap();
    assert!(report.creates.is_empty());
    assert!(report.kills.is_empty());
}

#[tokio::test]
async fn unsettled_creations_are_not_duplicated() {
    let mut h = harness();
    h.monitor.init().await.unwrap();

    h.monitor.tick_at(now_ms()).await.unwrap();
    let report = h.monitor.tick_at(now_ms()).await.unwrap();
    assert!(report.creates.is_empty());

    h.monitor.settle().await;
    assert_eq!(h.exec.count("create MIN-1"), 1);
}

#[tokio::test]
async fn new_names_fill_gaps() {
    let mut h = harness();
    h.fleet.register_group(&micro(3, 0)).await.unwrap();
    let now = now_ms();
    put_record(&h.fleet, "MICRO-1", "MICRO", "in game", 5, 16, now).await;
    put_record(&h.fleet, "MICRO-3", "MICRO", "in game", 5, 16, now).await;

    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(report.creates, vec!["MICRO-2"]);
    h.monitor.settle().await;
    assert_eq!(h.fleet.server_status("MICRO-2").await.unwrap().unwrap().port, 26002);
}

#[tokio::test]
async fn failed_create_is_retried_next_tick() {
    let mut h = harness();
    h.fleet.register_group(&micro(1, 1)).await.unwrap();
    h.exec.fail_creates(1);

    let report = h.monitor.tick_at(now_ms()).await.unwrap();
    assert_eq!(report.creates, vec!["MICRO-1"]);
    h.monitor.settle().await;
    assert_eq!(h.monitor.registry().lifecycle("MICRO-1"), None);
    assert!(h.fleet.server_status("MICRO-1").await.unwrap().is_none());

    let report = h.monitor.tick_at(now_ms()).await.unwrap();
    assert_eq!(report.creates, vec!["MICRO-1"]);
    h.monitor.settle().await;
    assert_eq!(h.exec.count("create MICRO-1"), 2);
    assert!(h.fleet.server_status("MICRO-1").await.unwrap().is_some());
}

#[tokio::test]
async fn existing_container_is_not_recreated() {
    let mut h = harness_with(
        StateStore::open_in_memory().unwrap(),
        RecordingExecutor::with_running(&["MICRO-1"]),
    );
    h.fleet.register_group(&micro(1, 1)).await.unwrap();

    h.monitor.tick_at(now_ms()).await.unwrap();
    h.monitor.settle().await;

    assert_eq!(h.exec.count("create MICRO-1"), 1);
    assert_eq!(h.exec.count("start MICRO-1"), 0);
    // The placeholder still lets the loop see the instance.
    assert!(h.fleet.server_status("MICRO-1").await.unwrap().is_some());
}

#[tokio::test]
async fn existing_stopped_container_is_started() {
    let mut h = harness_with(
        StateStore::open_in_memory().unwrap(),
        RecordingExecutor::with_stopped(&["MICRO-1"]),
    );
    h.fleet.register_group(&micro(1, 1)).await.unwrap();

    h.monitor.tick_at(now_ms()).await.unwrap();
    h.monitor.settle().await;

    assert_eq!(h.exec.count("create MICRO-1"), 1);
    assert_eq!(h.exec.count("start MICRO-1"), 1);
    assert!(h.exec.running("MICRO-1"));
}

// ── Retirement ────────────────────────────────────────────────────

#[tokio::test]
async fn excess_kills_only_empty_instances() {
    let names_running = ["MICRO-1", "MICRO-2", "MICRO-3", "MICRO-4", "MICRO-5"];
    let mut h = harness_with(
        StateStore::open_in_memory().unwrap(),
        RecordingExecutor::with_running(&names_running),
    );
    h.fleet.register_group(&micro(2, 1)).await.unwrap();
    let now = now_ms();
    put_record(&h.fleet, "MICRO-1", "MICRO", "waiting", 3, 16, now).await;
    put_record(&h.fleet, "MICRO-2", "MICRO", "waiting", 0, 16, now).await;
    put_record(&h.fleet, "MICRO-3", "MICRO", "in game", 5, 16, now).await;
    put_record(&h.fleet, "MICRO-4", "MICRO", "waiting", 2, 16, now).await;
    put_record(&h.fleet, "MICRO-5", "MICRO", "waiting", 0, 16, now).await;

    // total 5 > 2 and joinable 4 > 1: three wanted, two empties available.
    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(names(&report.kills), vec!["MICRO-5", "MICRO-2"]);
    assert!(report.kills.iter().all(|(_, r)| *r == KillReason::Excess));
    assert!(report.creates.is_empty());

    h.monitor.settle().await;
    for killed in ["MICRO-2", "MICRO-5"] {
        assert!(!h.exec.has(killed));
        assert_eq!(h.exec.count(&format!("stop {killed}")), 1);
        assert!(h.fleet.server_status(killed).await.unwrap().is_none());
        assert_eq!(h.monitor.registry().pending_kill(killed), None);
    }
    for busy in ["MICRO-1", "MICRO-3", "MICRO-4"] {
        assert!(h.exec.running(busy));
        assert!(h.fleet.server_status(busy).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn stale_instances_die_even_in_ignored_groups() {
    let mut h = harness();
    let now = now_ms();
    put_record(&h.fleet, "Testing-1", "Testing", "", 0, 50, now - 60_000).await;
    put_record(&h.fleet, "Clans-1", "clans", "finished", 0, 50, now).await;

    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(report.kills, vec![("Testing-1".to_string(), KillReason::Dead)]);
    h.monitor.settle().await;
    assert!(h.fleet.server_status("Testing-1").await.unwrap().is_none());
    assert!(h.fleet.server_status("Clans-1").await.unwrap().is_some());
}

#[tokio::test]
async fn finished_and_slow_starting_instances_are_killed() {
    let mut h = harness();
    h.fleet.register_group(&micro(0, 0)).await.unwrap();
    let now = now_ms();
    put_record(&h.fleet, "MICRO-1", "MICRO", "Finished", 0, 16, now).await;
    let mut slow = put_record(&h.fleet, "MICRO-2", "MICRO", "Starting", 0, 16, now).await;
    slow.start_up_date = now / 1000 - 400;
    h.fleet.put_server_status(&slow).await.unwrap();

    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(
        report.kills,
        vec![
            ("MICRO-1".to_string(), KillReason::Finished),
            ("MICRO-2".to_string(), KillReason::SlowStartup),
        ]
    );
}

#[tokio::test]
async fn failed_kill_stays_pending_and_is_retried() {
    let mut h = harness();
    h.fleet.register_group(&micro(0, 0)).await.unwrap();
    let now = now_ms();
    put_record(&h.fleet, "MICRO-1", "MICRO", "finished", 0, 16, now).await;
    h.exec.fail_removes(1);

    h.monitor.tick_at(now).await.unwrap();
    h.monitor.settle().await;
    assert_eq!(h.monitor.registry().pending_kill("MICRO-1"), Some(KillReason::Finished));
    assert!(h.fleet.server_status("MICRO-1").await.unwrap().is_some());

    // Already pending: not re-decided, only re-dispatched.
    let report = h.monitor.tick_at(now + 2000).await.unwrap();
    assert!(report.kills.is_empty());
    h.monitor.settle().await;

    assert_eq!(h.exec.count("remove MICRO-1"), 2);
    assert_eq!(h.monitor.registry().pending_kill("MICRO-1"), None);
    assert!(h.fleet.server_status("MICRO-1").await.unwrap().is_none());
}

#[tokio::test]
async fn orphans_wait_for_a_full_group_view() {
    let mut h = harness();
    h.fleet.register_group(&micro(0, 0)).await.unwrap();
    h.fleet.store().index_group("Broken").await.unwrap();
    let mut partial = BTreeMap::new();
    partial.insert("name".to_string(), "Broken".to_string());
    h.fleet
        .store()
        .set_group_fields_nx("Broken", &partial)
        .await
        .unwrap();

    let now = now_ms();
    put_record(&h.fleet, "Ghost-1", "Ghost", "waiting", 1, 16, now).await;

    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(report.skipped_groups, vec!["Broken"]);
    assert!(report.kills.is_empty());

    h.fleet.remove_group("Broken").await.unwrap();
    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(report.kills, vec![("Ghost-1".to_string(), KillReason::Cleanup)]);
}

// ── Restarts ──────────────────────────────────────────────────────

#[tokio::test]
async fn laggy_restart_then_online_on_fresh_heartbeat() {
    let mut h = harness();
    h.fleet.register_group(&micro(0, 0)).await.unwrap();
    let now = now_ms();
    let mut laggy = put_record(&h.fleet, "MICRO-1", "MICRO", "in game", 4, 16, now).await;
    laggy.tps = 8.5;
    h.fleet.put_server_status(&laggy).await.unwrap();

    let report = h.monitor.tick_at(now).await.unwrap();
    assert_eq!(report.restarts, vec![("MICRO-1".to_string(), RestartReason::Laggy)]);
    h.monitor.settle().await;
    assert_eq!(h.exec.count("restart MICRO-1"), 1);
    assert_eq!(h.monitor.registry().lifecycle("MICRO-1"), Some(Lifecycle::Restarting));

    // Same old record: still restarting, and not restarted again.
    laggy.tps = 20.0;
    h.fleet.put_server_status(&laggy).await.unwrap();
    h.monitor.tick_at(now + 1000).await.unwrap();
    assert_eq!(h.monitor.registry().lifecycle("MICRO-1"), Some(Lifecycle::Restarting));

    laggy.current_time = now + 1500;
    h.fleet.put_server_status(&laggy).await.unwrap();
    h.monitor.tick_at(now + 2000).await.unwrap();
    assert_eq!(h.monitor.registry().lifecycle("MICRO-1"), Some(Lifecycle::Online));
    assert_eq!(h.exec.count("restart MICRO-1"), 1);
}

#[tokio::test]
async fn kill_and_restart_sets_stay_disjoint() {
    let mut h = harness();
    h.fleet.register_group(&micro(0, 0)).await.unwrap();
    let now = now_ms();
    let mut laggy = put_record(&h.fleet, "MICRO-1", "MICRO", "in game", 4, 16, now).await;
    laggy.tps = 3.0;
    h.fleet.put_server_status(&laggy).await.unwrap();
    h.exec.fail_restarts(10);

    for i in 0..3 {
        h.monitor.tick_at(now + i * 2000).await.unwrap();
        h.monitor.settle().await;
        assert!(h.monitor.registry().is_exclusive());
    }
    assert_eq!(
        h.monitor.registry().pending_restart("MICRO-1"),
        Some(RestartReason::Laggy)
    );

    let (tx, rx) = oneshot::channel();
    h.monitor
        .handle_command(Command::KillServer {
            name: "MICRO-1".to_string(),
            reason: KillReason::Cleanup,
            reply: tx,
        })
        .await;
    assert!(rx.await.unwrap().unwrap());
    assert!(h.monitor.registry().is_exclusive());
    assert_eq!(h.monitor.registry().pending_restart("MICRO-1"), None);

    let (tx, rx) = oneshot::channel();
    h.monitor
        .handle_command(Command::RestartServer {
            name: "MICRO-1".to_string(),
            reply: tx,
        })
        .await;
    assert!(!rx.await.unwrap().unwrap());

    h.monitor.settle().await;
    assert!(h.monitor.registry().is_exclusive());
    assert!(h.fleet.server_status("MICRO-1").await.unwrap().is_none());
}

#[tokio::test]
async fn lobby_hygiene_restart_has_cooldown() {
    let mut h = harness();
    h.fleet.register_group(&ServerGroup::lobby()).await.unwrap();
    let now = now_ms();
    put_record(&h.fleet, "Lobby-1", "Lobby", "", 0, 50, now).await;
    put_record(&h.fleet, "Lobby-2", "Lobby", "", 0, 50, now).await;

    // 100 free slots, one surplus, throttle allows (100 - 50) / 80 = 0 kills.
    let report1 = h.monitor.tick_at(now).await.unwrap();
    assert!(report1.kills.is_empty());
    assert_eq!(
        report1.restarts,
        vec![("Lobby-2".to_string(), RestartReason::Hygiene)]
    );
    h.monitor.settle().await;

    let report2 = h.monitor.tick_at(now + 2000).await.unwrap();
    assert!(report2.restarts.is_empty());

    let later = now + 601_000;
    put_record(&h.fleet, "Lobby-1", "Lobby", "", 0, 50, later).await;
    put_record(&h.fleet, "Lobby-2", "Lobby", "", 0, 50, later).await;
    let report3 = h.monitor.tick_at(later).await.unwrap();
    assert_eq!(report3.restarts.len(), 1);
}

// ── Commands ──────────────────────────────────────────────────────

async fn create(h: &mut Harness<StateStore>, group: &str, name: &str) -> MonitorResult<bool> {
    let (tx, rx) = oneshot::channel();
    h.monitor
        .handle_command(Command::CreateServer {
            group: group.to_string(),
            name: name.to_string(),
            reply: tx,
        })
        .await;
    let result = rx.await.unwrap();
    h.monitor.settle().await;
    result
}

#[tokio::test]
async fn createserver_validates_and_provisions() {
    let mut h = harness();
    h.fleet.register_group(&micro(0, 0)).await.unwrap();

    assert!(create(&mut h, "Micro", "MICRO-7").await.unwrap());
    let record = h.fleet.server_status("MICRO-7").await.unwrap().unwrap();
    assert_eq!(record.port, 26007);
    assert_eq!(record.group(), Some("MICRO"));
    assert!(h.exec.running("MICRO-7"));

    assert!(matches!(
        create(&mut h, "Micro", "MICRO-7").await,
        Err(MonitorError::AlreadyExists(_))
    ));
    assert!(matches!(
        create(&mut h, "Nope", "NOPE-1").await,
        Err(MonitorError::NotFound(_))
    ));
    assert!(matches!(
        create(&mut h, "Micro", "MICRO").await,
        Err(MonitorError::InvalidName(_))
    ));
    assert!(matches!(
        create(&mut h, "Micro", "MICRO 8").await,
        Err(MonitorError::InvalidName(_))
    ));
    assert!(matches!(
        create(&mut h, "Micro", "MICRO-8?force=1").await,
        Err(MonitorError::InvalidName(_))
    ));
    assert_eq!(h.exec.count("create MICRO 8"), 0);
    assert_eq!(h.exec.count("create MICRO-7"), 1);
}

#[tokio::test]
async fn kill_unknown_server_is_not_found() {
    let mut h = harness();
    let (tx, rx) = oneshot::channel();
    h.monitor
        .handle_command(Command::KillServer {
            name: "MIN-9".to_string(),
            reason: KillReason::Cleanup,
            reply: tx,
        })
        .await;
    assert!(matches!(rx.await.unwrap(), Err(MonitorError::NotFound(_))));
}

// ── Faults & loop ─────────────────────────────────────────────────

#[tokio::test]
async fn store_failure_fails_only_that_tick() {
    let store = FlakyStore::new();
    let mut h = harness_with(store.clone(), RecordingExecutor::default());
    h.fleet.register_group(&micro(1, 0)).await.unwrap();

    store.set_failing(true);
    let err = h.monitor.tick_at(now_ms()).await.unwrap_err();
    assert!(matches!(err, MonitorError::Io(_)));
    assert!(h.exec.calls().is_empty());

    store.set_failing(false);
    let report = h.monitor.tick_at(now_ms()).await.unwrap();
    assert_eq!(report.creates, vec!["MICRO-1"]);
}

#[tokio::test]
async fn run_loop_serves_handle_and_stops_on_shutdown() {
    let store = StateStore::open_in_memory().unwrap();
    let fleet = Fleet::new(store);
    fleet.register_group(&micro(0, 0)).await.unwrap();
    let exec = Arc::new(RecordingExecutor::default());
    let config = MonitorConfig {
        tick_ms: 20,
        ..MonitorConfig::default()
    };
    let mut monitor = FleetMonitor::new(fleet.clone(), exec.clone(), config, Provisioner::default());
    let handle = monitor.handle();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(async move { monitor.run(shutdown_rx).await });

    assert!(handle.create_server("Micro", "MICRO-1").await.unwrap());
    tokio::time::sleep(Duration::from_millis(60)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.lifecycle.get("MICRO-1"), Some(&Lifecycle::Starting));
    assert!(snapshot.in_flight.is_empty());
    assert!(snapshot.pending_kill.is_empty());

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert!(matches!(handle.snapshot().await, Err(MonitorError::Unavailable)));
}
