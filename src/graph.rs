use std::fmt;

use crate::cycle;
use crate::error::GraphError;
use crate::types::{EdgeKind, ForkId, Node, Phase, PhilosopherId};

// 哲学者が同時に持てる箸の最大数
pub const MAX_HELD: usize = 2;

#[derive(Debug, Clone)]
pub struct PhilosopherNode {
    phase: Phase,
    held: Vec<ForkId>,      // 確保中の箸 (割り当て辺)
    requested: Vec<ForkId>, // 要求中でまだ持っていない箸 (要求辺)
}

#[derive(Debug, Clone, Default)]
pub struct ForkNode {
    holder: Option<PhilosopherId>,
}

/// 割り当て関係と要求関係を持つ二部グラフ
///
/// 頂点は起動時に確定し、以後増えも減りもしない。
/// 辺は哲学者と箸の間にしか張れない表現になっているので、二部性は型で保証される。
/// ミューテータは失敗したとき状態を一切変更しない。
#[derive(Debug, Clone)]
pub struct GraphStore {
    philosophers: Vec<PhilosopherNode>,
    forks: Vec<ForkNode>,
}

impl GraphStore {
    pub fn new(n: usize) -> Result<Self, GraphError> {
        if n == 0 {
            return Err(GraphError::EmptyTable);
        }

        let philosophers = (0..n)
            .map(|_| PhilosopherNode {
                phase: Phase::Thinking,
                held: Vec::with_capacity(MAX_HELD),
                requested: Vec::with_capacity(MAX_HELD),
            })
            .collect();

        Ok(GraphStore {
            philosophers,
            forks: vec![ForkNode::default(); n],
        })
    }

    /// 哲学者の人数 (= 箸の本数)
    pub fn len(&self) -> usize {
        self.philosophers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.philosophers.is_empty()
    }

    pub fn philosopher_ids(&self) -> impl Iterator<Item = PhilosopherId> {
        (0..self.len()).map(PhilosopherId)
    }

    /// p の左右の箸。左は p と同じ番号、右は次の番号
    pub fn forks_of(&self, p: PhilosopherId) -> Result<(ForkId, ForkId), GraphError> {
        self.node(p)?;
        Ok((ForkId(p.0), ForkId((p.0 + 1) % self.len())))
    }

    pub fn phase(&self, p: PhilosopherId) -> Result<Phase, GraphError> {
        Ok(self.node(p)?.phase)
    }

    pub(crate) fn set_phase(&mut self, p: PhilosopherId, phase: Phase) -> Result<(), GraphError> {
        self.node_mut(p)?.phase = phase;
        Ok(())
    }

    pub fn held(&self, p: PhilosopherId) -> Result<&[ForkId], GraphError> {
        Ok(&self.node(p)?.held)
    }

    pub fn requested(&self, p: PhilosopherId) -> Result<&[ForkId], GraphError> {
        Ok(&self.node(p)?.requested)
    }

    pub fn holder(&self, f: ForkId) -> Result<Option<PhilosopherId>, GraphError> {
        Ok(self.fork(f)?.holder)
    }

    pub fn holds(&self, p: PhilosopherId, f: ForkId) -> bool {
        self.philosophers
            .get(p.0)
            .is_some_and(|node| node.held.contains(&f))
    }

    pub fn requests(&self, p: PhilosopherId, f: ForkId) -> bool {
        self.philosophers
            .get(p.0)
            .is_some_and(|node| node.requested.contains(&f))
    }

    pub fn edge_count(&self) -> usize {
        self.philosophers
            .iter()
            .map(|node| node.held.len() + node.requested.len())
            .sum()
    }

    /// p -> f の要求辺を追加する。既にあれば何もせず false を返す
    pub fn add_request_edge(&mut self, p: PhilosopherId, f: ForkId) -> Result<bool, GraphError> {
        self.fork(f)?;
        let node = self.node_mut(p)?;

        if node.held.contains(&f) {
            return Err(GraphError::InvariantViolation(format!(
                "{p} requested {f} which it already holds"
            )));
        }
        if node.requested.contains(&f) {
            return Ok(false);
        }

        node.requested.push(f);
        Ok(true)
    }

    pub fn remove_request_edge(&mut self, p: PhilosopherId, f: ForkId) -> Result<(), GraphError> {
        self.fork(f)?;
        let node = self.node_mut(p)?;

        match node.requested.iter().position(|&r| r == f) {
            Some(pos) => {
                node.requested.swap_remove(pos);
                Ok(())
            }
            None => Err(GraphError::EdgeNotFound {
                philosopher: p,
                fork: f,
                kind: EdgeKind::Request,
            }),
        }
    }

    /// 要求辺 p -> f を割り当て辺 f -> p に昇格させる
    pub fn promote_to_allocation(&mut self, p: PhilosopherId, f: ForkId) -> Result<(), GraphError> {
        let holder = self.fork(f)?.holder;
        let node = self.node(p)?;

        let pos = node
            .requested
            .iter()
            .position(|&r| r == f)
            .ok_or(GraphError::EdgeNotFound {
                philosopher: p,
                fork: f,
                kind: EdgeKind::Request,
            })?;

        if let Some(other) = holder {
            return Err(GraphError::InvariantViolation(format!(
                "{f} is already held by {other}, cannot allocate it to {p}"
            )));
        }
        if node.held.len() >= MAX_HELD {
            return Err(GraphError::InvariantViolation(format!(
                "{p} already holds {MAX_HELD} forks"
            )));
        }

        // 検証がすべて済んでから書き換える
        let node = &mut self.philosophers[p.0];
        node.requested.swap_remove(pos);
        node.held.push(f);
        self.forks[f.0].holder = Some(p);
        Ok(())
    }

    pub fn remove_allocation_edge(&mut self, p: PhilosopherId, f: ForkId) -> Result<(), GraphError> {
        let holder = self.fork(f)?.holder;
        let node = self.node_mut(p)?;

        let pos = match node.held.iter().position(|&h| h == f) {
            Some(pos) if holder == Some(p) => pos,
            Some(_) => {
                return Err(GraphError::InvariantViolation(format!(
                    "{p} lists {f} as held but the fork's holder is {holder:?}"
                )))
            }
            None => {
                return Err(GraphError::EdgeNotFound {
                    philosopher: p,
                    fork: f,
                    kind: EdgeKind::Allocation,
                })
            }
        };

        node.held.swap_remove(pos);
        self.forks[f.0].holder = None;
        Ok(())
    }

    /// 解析用のコピー。O(|V| + |E|)
    pub fn snapshot(&self) -> GraphStore {
        self.clone()
    }

    /// 待ち グラフ上の後続頂点
    /// 哲学者 -> 要求中の箸、箸 -> 保持者
    pub fn successors(&self, node: Node) -> Vec<Node> {
        match node {
            Node::Philosopher(p) => self
                .philosophers
                .get(p.0)
                .map(|n| n.requested.iter().map(|&f| Node::Fork(f)).collect())
                .unwrap_or_default(),
            Node::Fork(f) => self
                .forks
                .get(f.0)
                .and_then(|k| k.holder)
                .map(|p| vec![Node::Philosopher(p)])
                .unwrap_or_default(),
        }
    }

    /// 不変条件 2, 3, 4, 5 と、哲学者側と箸側の相互参照を検査する
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        for (i, node) in self.philosophers.iter().enumerate() {
            let p = PhilosopherId(i);

            if node.held.len() > MAX_HELD {
                return Err(self.violation(format!("{p} holds {} forks", node.held.len())));
            }

            for (j, f) in node.held.iter().enumerate() {
                if node.held[..j].contains(f) {
                    return Err(self.violation(format!("{p} holds {f} twice")));
                }
                match self.forks.get(f.0) {
                    Some(fork) if fork.holder == Some(p) => {}
                    Some(fork) => {
                        return Err(self.violation(format!(
                            "{p} lists {f} as held but its holder is {:?}",
                            fork.holder
                        )))
                    }
                    None => return Err(self.violation(format!("{p} holds unknown fork {f}"))),
                }
                if node.requested.contains(f) {
                    return Err(self.violation(format!("{p} both holds and requests {f}")));
                }
            }

            for (j, f) in node.requested.iter().enumerate() {
                if f.0 >= self.forks.len() {
                    return Err(self.violation(format!("{p} requests unknown fork {f}")));
                }
                if node.requested[..j].contains(f) {
                    return Err(self.violation(format!("{p} requests {f} twice")));
                }
            }

            if node.phase == Phase::Dead && !(node.held.is_empty() && node.requested.is_empty()) {
                return Err(self.violation(format!("dead {p} still owns edges")));
            }
        }

        for (i, fork) in self.forks.iter().enumerate() {
            let f = ForkId(i);
            if let Some(p) = fork.holder {
                if !self.holds(p, f) {
                    return Err(self.violation(format!("{f} points at {p} which does not hold it")));
                }
            }
        }

        if let Some(ring) = cycle::find_cycle(self) {
            let ring = ring
                .iter()
                .map(|node| node.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(self.violation(format!("wait-for cycle {ring}")));
        }

        Ok(())
    }

    fn violation(&self, what: String) -> GraphError {
        GraphError::InvariantViolation(format!("{what}\n{self}"))
    }

    fn node(&self, p: PhilosopherId) -> Result<&PhilosopherNode, GraphError> {
        self.philosophers
            .get(p.0)
            .ok_or(GraphError::UnknownPhilosopher(p))
    }

    fn node_mut(&mut self, p: PhilosopherId) -> Result<&mut PhilosopherNode, GraphError> {
        self.philosophers
            .get_mut(p.0)
            .ok_or(GraphError::UnknownPhilosopher(p))
    }

    fn fork(&self, f: ForkId) -> Result<&ForkNode, GraphError> {
        self.forks.get(f.0).ok_or(GraphError::UnknownFork(f))
    }
}

// 致命的エラー時の状態ダンプ
impl fmt::Display for GraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.philosophers.iter().enumerate() {
            write!(f, "  {} {:?} holds [", PhilosopherId(i), node.phase)?;
            for (j, k) in node.held.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{k}")?;
            }
            write!(f, "] wants [")?;
            for (j, k) in node.requested.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{k}")?;
            }
            writeln!(f, "]")?;
        }
        for (i, fork) in self.forks.iter().enumerate() {
            match fork.holder {
                Some(p) => writeln!(f, "  {} -> {p}", ForkId(i))?,
                None => writeln!(f, "  {} free", ForkId(i))?,
            }
        }
        Ok(())
    }
}
