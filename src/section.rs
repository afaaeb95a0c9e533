//! アービタの排他区間
//!
//! グラフの変更と解析はすべてこの区間の中で行う。
//! 区間の実装は差し替えられる (既定は parking_lot の Mutex)。

use std::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// 値 T への排他的なアクセスを与えるロック
///
/// 再入はできない。区間の中からアービタを呼び直すとデッドロックする。
pub trait ExclusiveSection<T> {
    type Guard<'a>: DerefMut<Target = T>
    where
        Self: 'a;

    fn new(value: T) -> Self;

    fn enter(&self) -> Self::Guard<'_>;
}

impl<T> ExclusiveSection<T> for parking_lot::Mutex<T> {
    type Guard<'a>
        = parking_lot::MutexGuard<'a, T>
    where
        Self: 'a;

    fn new(value: T) -> Self {
        parking_lot::Mutex::new(value)
    }

    fn enter(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

// スピンロック用の型
// 区間がごく短い (n が小さい) ときはスリープより回ったほうが速いこともある
pub struct SpinLock<T> {
    lock: AtomicBool,    // ロック用共有変数
    data: UnsafeCell<T>, // 保護対象データ
}

// ロックの解放および、ロック中に保護対象データを操作するための型
pub struct SpinLockGuard<'a, T> {
    spin_lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub fn new(v: T) -> Self {
        SpinLock {
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(v),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            // TTAS: 空くまでは読み込みだけで待つ
            while self.lock.load(Ordering::Relaxed) {
                hint::spin_loop();
            }

            if self
                .lock
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        SpinLockGuard { spin_lock: self }
    }
}

// 保護対象データを別スレッドへ渡せるなら共有してよい
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.spin_lock.lock.store(false, Ordering::Release);
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.spin_lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.spin_lock.data.get() }
    }
}

impl<T> ExclusiveSection<T> for SpinLock<T> {
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        Self: 'a;

    fn new(value: T) -> Self {
        SpinLock::new(value)
    }

    fn enter(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Arc, thread};

    const NUM_THREADS: usize = 4;
    const NUM_LOOP: usize = 10000;

    fn count_with<L: ExclusiveSection<usize> + Send + Sync + 'static>() -> usize {
        let lock = Arc::new(L::new(0));
        let mut v = Vec::new();

        for _ in 0..NUM_THREADS {
            let lock0 = lock.clone();
            let t = thread::spawn(move || {
                for _ in 0..NUM_LOOP {
                    let mut data = lock0.enter();
                    *data += 1;
                }
            });
            v.push(t);
        }

        for t in v {
            t.join().unwrap();
        }

        let n = *lock.enter();
        n
    }

    #[test]
    fn test_spin_lock_counts() {
        assert_eq!(count_with::<SpinLock<usize>>(), NUM_THREADS * NUM_LOOP);
    }

    #[test]
    fn test_mutex_counts() {
        assert_eq!(
            count_with::<parking_lot::Mutex<usize>>(),
            NUM_THREADS * NUM_LOOP
        );
    }
}
