//! 待ち グラフの閉路検出
//!
//! 再帰ではなく明示的なスタックで深さ優先探索する。
//! visited (探索済みで閉路が無かった頂点) と on_path (現在の経路上の頂点) を
//! Traversal に持たせているので、探索の途中経過をテストから直接見られる。

use crate::graph::GraphStore;
use crate::types::{Edge, Node};

struct Frame {
    node: Node,
    successors: Vec<Node>,
    next: usize, // 次に見る後続頂点の位置
}

pub struct Traversal {
    n: usize,
    visited: Vec<bool>,
    on_path: Vec<bool>,
    stack: Vec<Frame>,
}

impl Traversal {
    pub fn new(store: &GraphStore) -> Self {
        let n = store.len();
        Traversal {
            n,
            visited: vec![false; 2 * n],
            on_path: vec![false; 2 * n],
            stack: Vec::new(),
        }
    }

    pub fn is_visited(&self, node: Node) -> bool {
        self.visited[node.index(self.n)]
    }

    pub fn is_on_path(&self, node: Node) -> bool {
        self.on_path[node.index(self.n)]
    }

    /// 現在の経路の長さ。閉路を見つけて止まった場合は経路が残る
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// start から探索する。extra はまだ store に無い (かもしれない) 候補辺で、
    /// store の辺に重ねて扱う。後退辺を見つけたら閉路 (始点を末尾に重ねた列) を返す
    pub fn run(&mut self, store: &GraphStore, extra: Option<Edge>, start: Node) -> Option<Vec<Node>> {
        if self.is_visited(start) {
            return None;
        }
        self.push(store, extra, start);

        while let Some(frame) = self.stack.last_mut() {
            if let Some(&next) = frame.successors.get(frame.next) {
                frame.next += 1;
                let idx = next.index(self.n);

                // 経路上の頂点に戻ってきた = 後退辺
                if self.on_path[idx] {
                    return Some(self.cycle_through(next));
                }
                // 探索済みの頂点からは閉路が見つかっていないので潜らない
                if self.visited[idx] {
                    continue;
                }
                self.push(store, extra, next);
            } else {
                let idx = frame.node.index(self.n);
                self.stack.pop();
                self.on_path[idx] = false;
                self.visited[idx] = true;
            }
        }

        None
    }

    fn push(&mut self, store: &GraphStore, extra: Option<Edge>, node: Node) {
        let mut successors = store.successors(node);
        if let Some(edge) = extra {
            let dst = edge.destination();
            if edge.source() == node && !successors.contains(&dst) {
                successors.push(dst);
            }
        }

        self.on_path[node.index(self.n)] = true;
        self.stack.push(Frame {
            node,
            successors,
            next: 0,
        });
    }

    fn cycle_through(&self, head: Node) -> Vec<Node> {
        let mut ring: Vec<Node> = self
            .stack
            .iter()
            .map(|frame| frame.node)
            .skip_while(|&node| node != head)
            .collect();
        ring.push(head);
        ring
    }
}

/// candidate を追加すると閉路ができるか
///
/// candidate の終点から探索し、始点を経由して終点に戻れれば閉路。
/// candidate が既に store に入っていても結果は同じ。
pub fn would_create_cycle(store: &GraphStore, candidate: Edge) -> bool {
    Traversal::new(store)
        .run(store, Some(candidate), candidate.destination())
        .is_some()
}

/// グラフ全体から閉路を 1 つ探す
pub fn find_cycle(store: &GraphStore) -> Option<Vec<Node>> {
    let mut traversal = Traversal::new(store);
    let n = store.len();

    (0..2 * n).find_map(|idx| traversal.run(store, None, Node::from_index(idx, n)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{ForkId, PhilosopherId};

    fn hold(g: &mut GraphStore, p: usize, f: usize) {
        g.add_request_edge(PhilosopherId(p), ForkId(f)).unwrap();
        g.promote_to_allocation(PhilosopherId(p), ForkId(f)).unwrap();
    }

    fn want(g: &mut GraphStore, p: usize, f: usize) {
        g.add_request_edge(PhilosopherId(p), ForkId(f)).unwrap();
    }

    // 3 人がそれぞれ左の箸を持ち、P0 -> F1, P1 -> F2 を要求中
    fn almost_ring() -> GraphStore {
        let mut g = GraphStore::new(3).unwrap();
        for i in 0..3 {
            hold(&mut g, i, i);
        }
        want(&mut g, 0, 1);
        want(&mut g, 1, 2);
        g
    }

    #[test]
    fn test_closing_edge_is_a_cycle() {
        let g = almost_ring();
        assert!(find_cycle(&g).is_none());
        assert!(would_create_cycle(
            &g,
            Edge::request(PhilosopherId(2), ForkId(0))
        ));
    }

    #[test]
    fn test_installed_candidate_gives_same_answer() {
        let mut g = almost_ring();
        let edge = Edge::request(PhilosopherId(2), ForkId(0));
        want(&mut g, 2, 0);
        assert!(would_create_cycle(&g, edge));
        assert!(find_cycle(&g).is_some());
    }

    #[test]
    fn test_request_for_free_fork_is_never_a_cycle() {
        let mut g = GraphStore::new(3).unwrap();
        hold(&mut g, 0, 0);
        want(&mut g, 1, 0);
        assert!(!would_create_cycle(
            &g,
            Edge::request(PhilosopherId(1), ForkId(2))
        ));
    }

    #[test]
    fn test_chain_without_loop_is_acyclic() {
        // P0 -> F1 -> P1 -> F2 -> P2, P2 は何も待っていない
        let mut g = GraphStore::new(3).unwrap();
        hold(&mut g, 1, 1);
        hold(&mut g, 2, 2);
        want(&mut g, 0, 1);
        want(&mut g, 1, 2);
        assert!(find_cycle(&g).is_none());
        assert!(!would_create_cycle(
            &g,
            Edge::request(PhilosopherId(0), ForkId(0))
        ));
    }

    #[test]
    fn test_cycle_path_is_reported_in_order() {
        let mut g = GraphStore::new(2).unwrap();
        hold(&mut g, 0, 0);
        hold(&mut g, 1, 1);
        want(&mut g, 0, 1);
        want(&mut g, 1, 0);

        let ring = find_cycle(&g).unwrap();
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring.len(), 5);
        // 隣り合う頂点は必ず哲学者と箸の組
        for pair in ring.windows(2) {
            assert_ne!(
                matches!(pair[0], Node::Philosopher(_)),
                matches!(pair[1], Node::Philosopher(_))
            );
        }
    }

    #[test]
    fn test_traversal_bookkeeping() {
        let mut g = GraphStore::new(3).unwrap();
        hold(&mut g, 1, 1);
        want(&mut g, 0, 1);

        let mut t = Traversal::new(&g);
        let start = Node::Philosopher(PhilosopherId(0));
        assert!(t.run(&g, None, start).is_none());

        // 探索し終わった頂点は visited、経路は空
        assert_eq!(t.depth(), 0);
        for node in [
            start,
            Node::Fork(ForkId(1)),
            Node::Philosopher(PhilosopherId(1)),
        ] {
            assert!(t.is_visited(node));
            assert!(!t.is_on_path(node));
        }
        assert!(!t.is_visited(Node::Fork(ForkId(2))));

        // visited の頂点から再度始めても何もしない
        assert!(t.run(&g, None, start).is_none());
    }

    #[test]
    fn test_traversal_keeps_path_when_cycle_found() {
        let mut g = almost_ring();
        want(&mut g, 2, 0);

        let mut t = Traversal::new(&g);
        let start = Node::Philosopher(PhilosopherId(0));
        let ring = t.run(&g, None, start).unwrap();
        assert_eq!(t.depth(), 6);
        assert!(t.is_on_path(Node::Fork(ForkId(0))));
        assert_eq!(ring.len(), 7);
    }
}
