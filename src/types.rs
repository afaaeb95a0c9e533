use std::fmt;

/// 哲学者の番号 (0 始まり)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhilosopherId(pub usize);

/// 箸 (フォーク) の番号 (0 始まり)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForkId(pub usize);

impl fmt::Display for PhilosopherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    Hungry,
    Eating,
    Dead, // 終端状態。DeathMonitor からのみ遷移する
}

/// request_forks の結果。Denied はエラーではなく通常の制御フロー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Denied,
}

/// 待ち グラフの頂点
/// インデックスは哲学者が 0..n、箸が n..2n
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Philosopher(PhilosopherId),
    Fork(ForkId),
}

impl Node {
    pub fn index(self, n: usize) -> usize {
        match self {
            Node::Philosopher(p) => p.0,
            Node::Fork(f) => n + f.0,
        }
    }

    pub fn from_index(idx: usize, n: usize) -> Node {
        if idx < n {
            Node::Philosopher(PhilosopherId(idx))
        } else {
            Node::Fork(ForkId(idx - n))
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Philosopher(p) => p.fmt(f),
            Node::Fork(k) => k.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Request,
    Allocation,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Request => write!(f, "request"),
            EdgeKind::Allocation => write!(f, "allocation"),
        }
    }
}

/// 待ち グラフの辺
/// - Request:    P -> F (P は F を待っている)
/// - Allocation: F -> P (F は P が食べ終わるまで解放されない)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub philosopher: PhilosopherId,
    pub fork: ForkId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn request(philosopher: PhilosopherId, fork: ForkId) -> Edge {
        Edge {
            philosopher,
            fork,
            kind: EdgeKind::Request,
        }
    }

    pub fn allocation(philosopher: PhilosopherId, fork: ForkId) -> Edge {
        Edge {
            philosopher,
            fork,
            kind: EdgeKind::Allocation,
        }
    }

    pub fn source(&self) -> Node {
        match self.kind {
            EdgeKind::Request => Node::Philosopher(self.philosopher),
            EdgeKind::Allocation => Node::Fork(self.fork),
        }
    }

    pub fn destination(&self) -> Node {
        match self.kind {
            EdgeKind::Request => Node::Fork(self.fork),
            EdgeKind::Allocation => Node::Philosopher(self.philosopher),
        }
    }
}
