use std::time::Instant;

use tracing::{debug, error, trace};

use crate::banker;
use crate::cycle;
use crate::error::GraphError;
use crate::graph::GraphStore;
use crate::section::{ExclusiveSection, SpinLock};
use crate::types::{Edge, EdgeKind, ForkId, Grant, Phase, PhilosopherId};

/// 複数の哲学者が同時に safe な要求を出しているときの順番の決め方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fairness {
    /// 検査を通った者から順に渡す
    ArrivalOrder,
    /// 隣の哲学者のほうが長く食べておらず、しかも今すぐ渡せるなら譲る
    #[default]
    LongestWaitFirst,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub granted: u64,
    pub denied_cycle: u64,
    pub denied_unsafe: u64,
    pub deferred: u64,
    pub forced_releases: u64,
}

/// force_release で回収したもの
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Released {
    pub forks: Vec<ForkId>,
    pub requests: Vec<ForkId>,
}

/// 排他区間で守られる状態一式
#[derive(Debug)]
pub struct ArbiterState {
    store: GraphStore,
    last_meal: Vec<Instant>,
    closed: bool,
    stats: Stats,
}

impl ArbiterState {
    fn new(mut store: GraphStore) -> Result<Self, GraphError> {
        store.check_invariants()?;

        // 持ち込まれた辺に合わせて状態を揃える
        for p in store.philosopher_ids().collect::<Vec<_>>() {
            if store.phase(p)? == Phase::Dead {
                continue;
            }
            let phase = if store.held(p)?.len() == 2 {
                Phase::Eating
            } else if store.held(p)?.is_empty() && store.requested(p)?.is_empty() {
                Phase::Thinking
            } else {
                Phase::Hungry
            };
            store.set_phase(p, phase)?;
        }

        let now = Instant::now();
        Ok(ArbiterState {
            last_meal: vec![now; store.len()],
            store,
            closed: false,
            stats: Stats::default(),
        })
    }

    // デバッグビルドでは変更を確定するたびに全体を検査する
    fn committed(&self) -> Result<(), GraphError> {
        if cfg!(debug_assertions) {
            if let Err(e) = self.store.check_invariants() {
                error!(error = %e, "graph invariant violated");
                return Err(e);
            }
        }
        Ok(())
    }

    // p が requested を取ろうとしているとき、譲るべき隣人がいるか
    fn hungrier_rival(&self, p: PhilosopherId, requested: &[ForkId]) -> Option<PhilosopherId> {
        let mine = (self.last_meal[p.0], p);

        self.store.philosopher_ids().find(|&q| {
            q != p
                && self.store.phase(q).ok() == Some(Phase::Hungry)
                && requested.iter().any(|&f| self.store.requests(q, f))
                && (self.last_meal[q.0], q) < mine
                && self
                    .store
                    .requested(q)
                    .is_ok_and(|wants| banker::is_safe_given_request(&self.store, q, wants))
        })
    }
}

// 仮に追加した要求辺を、commit しない限りスコープを抜けるときに必ず取り除く
struct Trial<'g> {
    store: &'g mut GraphStore,
    philosopher: PhilosopherId,
    added: Vec<ForkId>,
    committed: bool,
}

impl<'g> Trial<'g> {
    fn begin(store: &'g mut GraphStore, philosopher: PhilosopherId) -> Self {
        Trial {
            store,
            philosopher,
            added: Vec::with_capacity(2),
            committed: false,
        }
    }

    fn request(&mut self, f: ForkId) -> Result<(), GraphError> {
        if self.store.add_request_edge(self.philosopher, f)? {
            self.added.push(f);
        }
        Ok(())
    }

    fn store(&self) -> &GraphStore {
        &*self.store
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl<'g> Drop for Trial<'g> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for f in self.added.drain(..) {
            if let Err(e) = self.store.remove_request_edge(self.philosopher, f) {
                error!(error = %e, "failed to roll back tentative request");
            }
        }
    }
}

/// 箸の割り当てを行う唯一の窓口
///
/// グラフを変更できるのはこの型だけで、変更と解析はすべて 1 つの排他区間の中で行う。
/// 要求は空きを待たない。通らなければすぐ Denied を返し、再試行は呼び出し側に任せる。
pub struct ResourceArbiter<L = parking_lot::Mutex<ArbiterState>> {
    section: L,
    fairness: Fairness,
}

pub type SpinArbiter = ResourceArbiter<SpinLock<ArbiterState>>;

impl ResourceArbiter {
    pub fn new(n: usize) -> Result<Self, GraphError> {
        Self::with_fairness(n, Fairness::default())
    }

    pub fn with_fairness(n: usize, fairness: Fairness) -> Result<Self, GraphError> {
        Self::with_section(GraphStore::new(n)?, fairness)
    }

    /// 既存のグラフから始める。store は不変条件を満たしていなければならない
    pub fn from_store(store: GraphStore, fairness: Fairness) -> Result<Self, GraphError> {
        Self::with_section(store, fairness)
    }
}

impl<L: ExclusiveSection<ArbiterState>> ResourceArbiter<L> {
    pub fn with_section(store: GraphStore, fairness: Fairness) -> Result<Self, GraphError> {
        Ok(ResourceArbiter {
            section: L::new(ArbiterState::new(store)?),
            fairness,
        })
    }

    pub fn len(&self) -> usize {
        self.section.enter().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fairness(&self) -> Fairness {
        self.fairness
    }

    /// p に左右の箸を両方まとめて渡せるなら渡す
    pub fn request_forks(&self, p: PhilosopherId) -> Result<Grant, GraphError> {
        let mut guard = self.section.enter();
        let state = &mut *guard;

        match state.store.phase(p)? {
            Phase::Dead => {
                trace!(philosopher = %p, "request from dead philosopher");
                return Ok(Grant::Denied);
            }
            Phase::Eating => return Ok(Grant::Granted),
            Phase::Thinking | Phase::Hungry => {}
        }
        if state.closed {
            return Ok(Grant::Denied);
        }

        let (left, right) = state.store.forks_of(p)?;
        state.store.set_phase(p, Phase::Hungry)?;

        // 1 人だと箸が 1 本しかなく、永遠に食べられない
        if left == right {
            state.stats.denied_unsafe += 1;
            trace!(philosopher = %p, cause = "single fork", "denied");
            return Ok(Grant::Denied);
        }

        let mut trial = Trial::begin(&mut state.store, p);
        for f in [left, right] {
            if !trial.store().holds(p, f) {
                trial.request(f)?;
            }
        }

        let closes_cycle = trial
            .store()
            .requested(p)?
            .iter()
            .any(|&f| cycle::would_create_cycle(trial.store(), Edge::request(p, f)));
        if closes_cycle {
            // trial が drop されて仮の辺は消える
            drop(trial);
            if state.store.held(p)?.is_empty() && state.store.requested(p)?.is_empty() {
                state.store.set_phase(p, Phase::Thinking)?;
            }
            state.stats.denied_cycle += 1;
            trace!(philosopher = %p, cause = "cycle", "denied");
            state.committed()?;
            return Ok(Grant::Denied);
        }
        // ここから先で Denied になっても要求辺は保留として残す
        trial.commit();

        let requested = state.store.requested(p)?.to_vec();
        if !banker::is_safe_given_request(&state.store, p, &requested) {
            state.stats.denied_unsafe += 1;
            trace!(philosopher = %p, cause = "unsafe", "denied");
            state.committed()?;
            return Ok(Grant::Denied);
        }

        if self.fairness == Fairness::LongestWaitFirst {
            if let Some(q) = state.hungrier_rival(p, &requested) {
                state.stats.deferred += 1;
                debug!(philosopher = %p, rival = %q, "deferred to hungrier neighbour");
                state.committed()?;
                return Ok(Grant::Denied);
            }
        }

        // 両方まとめて昇格する。途中で失敗したら元の状態のまま
        let mut next = state.store.snapshot();
        for &f in &requested {
            next.promote_to_allocation(p, f)?;
        }
        next.set_phase(p, Phase::Eating)?;
        state.store = next;

        state.last_meal[p.0] = Instant::now();
        state.stats.granted += 1;
        trace!(philosopher = %p, "granted");
        state.committed()?;
        Ok(Grant::Granted)
    }

    /// 食べ終わった p の箸を返す
    ///
    /// 割り当てなしの返却は EdgeNotFound (致命的)。
    /// 死亡扱いの哲学者の箸は DeathMonitor 側で回収済みなので何もしない。
    pub fn release_forks(&self, p: PhilosopherId) -> Result<(), GraphError> {
        let mut guard = self.section.enter();
        let state = &mut *guard;

        if state.store.phase(p)? == Phase::Dead {
            return Ok(());
        }

        let held = state.store.held(p)?.to_vec();
        if held.is_empty() {
            let (left, _) = state.store.forks_of(p)?;
            let e = GraphError::EdgeNotFound {
                philosopher: p,
                fork: left,
                kind: EdgeKind::Allocation,
            };
            error!(error = %e, state = %state.store, "release without grant");
            return Err(e);
        }

        for f in held {
            state.store.remove_allocation_edge(p, f)?;
        }
        let phase = if state.store.requested(p)?.is_empty() {
            Phase::Thinking
        } else {
            Phase::Hungry
        };
        state.store.set_phase(p, phase)?;

        trace!(philosopher = %p, "released");
        state.committed()
    }

    /// 持ち主以外からでも呼べる強制解放。p は Dead になる
    pub fn force_release(&self, p: PhilosopherId) -> Result<Released, GraphError> {
        let mut guard = self.section.enter();
        let state = &mut *guard;

        if state.store.phase(p)? == Phase::Dead {
            return Ok(Released::default());
        }

        let released = Released {
            forks: state.store.held(p)?.to_vec(),
            requests: state.store.requested(p)?.to_vec(),
        };
        for &f in &released.forks {
            state.store.remove_allocation_edge(p, f)?;
        }
        for &f in &released.requests {
            state.store.remove_request_edge(p, f)?;
        }
        state.store.set_phase(p, Phase::Dead)?;
        state.stats.forced_releases += 1;

        debug!(
            philosopher = %p,
            forks = released.forks.len(),
            requests = released.requests.len(),
            "force released"
        );
        state.committed()?;
        Ok(released)
    }

    /// 保留中の要求を取り下げる。箸を持っていなければ Thinking に戻る
    pub fn withdraw(&self, p: PhilosopherId) -> Result<Vec<ForkId>, GraphError> {
        let mut guard = self.section.enter();
        let state = &mut *guard;

        if state.store.phase(p)? == Phase::Dead {
            return Ok(Vec::new());
        }

        let requests = state.store.requested(p)?.to_vec();
        for &f in &requests {
            state.store.remove_request_edge(p, f)?;
        }
        if state.store.held(p)?.is_empty() {
            state.store.set_phase(p, Phase::Thinking)?;
        }

        state.committed()?;
        Ok(requests)
    }

    /// 全員が Thinking か Dead で、箸を誰も持っていないことを確かめて閉じる
    /// 以後の request_forks はすべて Denied
    pub fn shutdown(&self) -> Result<Stats, GraphError> {
        let mut guard = self.section.enter();
        let state = &mut *guard;

        for p in state.store.philosopher_ids() {
            let phase = state.store.phase(p)?;
            let busy = !matches!(phase, Phase::Thinking | Phase::Dead)
                || !state.store.held(p)?.is_empty()
                || !state.store.requested(p)?.is_empty();
            if busy {
                let e = GraphError::InvariantViolation(format!(
                    "shutdown while {p} is {phase:?}\n{}",
                    state.store
                ));
                error!(error = %e, "unclean shutdown");
                return Err(e);
            }
        }

        state.store.check_invariants()?;
        state.closed = true;
        Ok(state.stats)
    }

    pub fn phase(&self, p: PhilosopherId) -> Result<Phase, GraphError> {
        self.section.enter().store.phase(p)
    }

    pub fn holder(&self, f: ForkId) -> Result<Option<PhilosopherId>, GraphError> {
        self.section.enter().store.holder(f)
    }

    pub fn snapshot(&self) -> GraphStore {
        self.section.enter().store.snapshot()
    }

    pub fn check_invariants(&self) -> Result<(), GraphError> {
        self.section.enter().store.check_invariants()
    }

    pub fn stats(&self) -> Stats {
        self.section.enter().stats
    }
}
