use crate::graph::GraphStore;
use crate::types::{ForkId, PhilosopherId};

// 銀行家のアルゴリズム
// 箸は 1 本ずつがそれぞれ別種の資源で、各資源の単位数は 1
#[derive(Debug)]
struct Ledger {
    // 利用可能な箸のシミュレート値
    work: Vec<bool>,
    // 哲学者ごとの確保中の箸
    allocation_for_philosophers: Vec<Vec<ForkId>>,
    // 哲学者ごとのまだ足りない箸 (要求中の箸)
    needed_for_philosophers: Vec<Vec<ForkId>>,
}

impl Ledger {
    // p の要求が通ったと仮定した状態 (候補状態) を作る
    // 要求する箸が他人に握られていれば、そもそも割り当てられないので None
    fn candidate(store: &GraphStore, p: PhilosopherId, requested: &[ForkId]) -> Option<Self> {
        let n = store.len();
        let mut work = vec![true; n];
        let mut allocation_for_philosophers = Vec::with_capacity(n);
        let mut needed_for_philosophers = Vec::with_capacity(n);

        for i in store.philosopher_ids() {
            let held = store.held(i).ok()?;
            for f in held {
                work[f.0] = false;
            }
            allocation_for_philosophers.push(held.to_vec());
            needed_for_philosophers.push(store.requested(i).ok()?.to_vec());
        }

        let p_alloc = allocation_for_philosophers.get_mut(p.0)?;
        for &f in requested {
            match store.holder(f).ok()? {
                Some(q) if q == p => continue,
                Some(_) => return None,
                None => {}
            }
            if p_alloc.contains(&f) {
                continue;
            }
            // 箸は 2 本までしか持てない
            if p_alloc.len() >= crate::graph::MAX_HELD {
                return None;
            }
            p_alloc.push(f);
            work[f.0] = false;
        }
        needed_for_philosophers[p.0].retain(|f| !requested.contains(f));

        Some(Ledger {
            work,
            allocation_for_philosophers,
            needed_for_philosophers,
        })
    }

    // 全員が食べ終われる順番があるか。あればその順番を返す
    fn safe_sequence(mut self) -> Option<Vec<PhilosopherId>> {
        let n = self.allocation_for_philosophers.len();
        let mut finish = vec![false; n];
        let mut order = Vec::with_capacity(n);

        loop {
            // 条件を満たす哲学者を 1 人見つけたら、その人の箸を返却してから最初から見直す
            // 返却によって前に見た哲学者が食べられるようになることがあるため
            let found = (0..n).find(|&i| {
                !finish[i]
                    && self.needed_for_philosophers[i]
                        .iter()
                        .all(|f| self.work[f.0])
            });

            match found {
                Some(i) => {
                    finish[i] = true;
                    order.push(PhilosopherId(i));
                    // 必要な箸をすべて借り切ったので、すべて返却する
                    for f in &self.allocation_for_philosophers[i] {
                        self.work[f.0] = true;
                    }
                }
                None => break,
            }
        }

        if finish.iter().all(|&done| done) {
            Some(order)
        } else {
            None
        }
    }
}

/// p が requested を受け取ったと仮定して、その状態が safe か
///
/// 今の状態ではなく候補状態で判定する。store には触らない。
pub fn is_safe_given_request(store: &GraphStore, p: PhilosopherId, requested: &[ForkId]) -> bool {
    safe_sequence(store, p, requested).is_some()
}

/// is_safe_given_request と同じ判定で、全員が食べ終われる順番の一例を返す
pub fn safe_sequence(
    store: &GraphStore,
    p: PhilosopherId,
    requested: &[ForkId],
) -> Option<Vec<PhilosopherId>> {
    Ledger::candidate(store, p, requested)?.safe_sequence()
}

/// 現在の状態が safe か (仮の要求なし)
pub fn is_safe(store: &GraphStore) -> bool {
    Ledger::candidate(store, PhilosopherId(0), &[])
        .and_then(Ledger::safe_sequence)
        .is_some()
}
