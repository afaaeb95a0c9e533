//! 哲学者のライフサイクルと死亡監視
//!
//! 哲学者ごとに 1 スレッド、監視に 1 スレッド。
//! グラフに触れるのは ResourceArbiter 経由だけで、監視スレッドは最後の食事時刻しか見ない。

use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::arbiter::{ArbiterState, ResourceArbiter};
use crate::config::Config;
use crate::error::GraphError;
use crate::graph::GraphStore;
use crate::report::{Reporter, Status};
use crate::section::{ExclusiveSection, SpinLock};
use crate::types::{Grant, PhilosopherId};

// 監視の間隔。死亡の報告はこれ以上は遅れない
const MONITOR_TICK: Duration = Duration::from_millis(1);
// 食事・睡眠中に停止フラグを見る間隔
const NAP_SLICE: Duration = Duration::from_micros(500);
// Denied のあとの待ち時間の下限と上限
const BACKOFF_MIN_US: u64 = 20;
const BACKOFF_MAX_US: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Died { id: PhilosopherId, at_ms: u64 },
    AllFed,
    Interrupted,
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("failed to set up the run: {0}")]
    Setup(#[from] io::Error),
    #[error("{0} thread panicked")]
    Panicked(String),
}

#[derive(Default)]
struct Seat {
    last_meal_ms: AtomicU64,
    meals: AtomicU32,
    fed: AtomicBool, // must_eat 回食べ終えた
}

struct Table<L> {
    arbiter: ResourceArbiter<L>,
    config: Config,
    reporter: Reporter,
    seats: Vec<Seat>,
    stop: Arc<AtomicBool>,
    fatal: Mutex<Option<GraphError>>,
}

impl<L: ExclusiveSection<ArbiterState>> Table<L> {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn halt(&self) {
        self.stop.store(true, Ordering::Release);
    }

    fn fail(&self, e: GraphError) {
        error!(error = %e, "fatal arbiter error, stopping the run");
        self.reporter.silence();
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(e);
        }
        drop(fatal);
        self.halt();
    }

    // 止められたら途中で起きる sleep
    fn nap(&self, d: Duration) {
        let deadline = self.reporter.elapsed_ms() + d.as_millis() as u64;
        while !self.stopped() {
            let now = self.reporter.elapsed_ms();
            if now >= deadline {
                break;
            }
            thread::sleep(NAP_SLICE.min(Duration::from_millis(deadline - now)));
        }
    }

    fn report(&self, p: PhilosopherId, status: Status) {
        if !self.stopped() {
            self.reporter.status(p, status);
        }
    }
}

fn philosopher<L: ExclusiveSection<ArbiterState>>(
    table: &Table<L>,
    p: PhilosopherId,
) -> Result<(), GraphError> {
    let seat = &table.seats[p.0];
    let mut rng = rand::thread_rng();

    while !table.stopped() {
        table.report(p, Status::Thinking);

        // 空いていなければすぐ Denied が返るので、ゆらぎを入れて取り直す
        let mut backoff_us = BACKOFF_MIN_US;
        loop {
            if table.stopped() {
                table.arbiter.withdraw(p)?;
                return Ok(());
            }
            match table.arbiter.request_forks(p)? {
                Grant::Granted => break,
                Grant::Denied => {
                    let us = rng.gen_range(BACKOFF_MIN_US..=backoff_us);
                    thread::sleep(Duration::from_micros(us));
                    backoff_us = (backoff_us * 2).min(BACKOFF_MAX_US);
                }
            }
        }

        seat.last_meal_ms.store(table.reporter.elapsed_ms(), Ordering::Release);
        table.report(p, Status::TakenFork);
        table.report(p, Status::TakenFork);
        table.report(p, Status::Eating);
        table.nap(table.config.time_to_eat);
        table.arbiter.release_forks(p)?;

        let meals = seat.meals.fetch_add(1, Ordering::AcqRel) + 1;
        let fed = table.config.must_eat.is_some_and(|target| meals >= target);
        if fed {
            seat.fed.store(true, Ordering::Release);
        }

        table.report(p, Status::Sleeping);
        table.nap(table.config.time_to_sleep);

        if fed {
            debug!(philosopher = %p, meals, "fed");
            break;
        }
    }

    Ok(())
}

fn monitor<L: ExclusiveSection<ArbiterState>>(table: &Table<L>) -> Result<Outcome, GraphError> {
    let limit = table.config.time_to_die.as_millis() as u64;

    loop {
        if table.stopped() {
            return Ok(Outcome::Interrupted);
        }

        let mut all_fed = table.config.must_eat.is_some();
        for (i, seat) in table.seats.iter().enumerate() {
            if seat.fed.load(Ordering::Acquire) {
                continue;
            }
            all_fed = false;

            let now = table.reporter.elapsed_ms();
            let last = seat.last_meal_ms.load(Ordering::Acquire);
            if now.saturating_sub(last) > limit {
                let p = PhilosopherId(i);
                table.reporter.status(p, Status::Died);
                table.halt();
                // 本人のスレッドが寝ていても箸と要求を回収する
                let released = table.arbiter.force_release(p)?;
                debug!(philosopher = %p, forks = released.forks.len(), "reclaimed");
                return Ok(Outcome::Died { id: p, at_ms: now });
            }
        }

        if all_fed {
            table.halt();
            return Ok(Outcome::AllFed);
        }

        thread::sleep(MONITOR_TICK);
    }
}

/// 標準出力に状態を書き出しながら実行する
pub fn run(config: &Config) -> Result<Outcome, SimError> {
    run_to(config, Box::new(io::stdout()))
}

/// out に状態を書き出しながら実行する。排他区間の種類は config.spin で選ぶ
pub fn run_to(config: &Config, out: Box<dyn Write + Send>) -> Result<Outcome, SimError> {
    if config.spin {
        run_with::<SpinLock<ArbiterState>>(config, out)
    } else {
        run_with::<parking_lot::Mutex<ArbiterState>>(config, out)
    }
}

pub fn run_with<L>(config: &Config, out: Box<dyn Write + Send>) -> Result<Outcome, SimError>
where
    L: ExclusiveSection<ArbiterState> + Send + Sync + 'static,
{
    let arbiter = ResourceArbiter::<L>::with_section(
        GraphStore::new(config.philosophers)?,
        config.fairness,
    )?;

    let stop = Arc::new(AtomicBool::new(false));
    let signals = [libc::SIGINT, libc::SIGTERM]
        .into_iter()
        .map(|sig| signal_hook::flag::register(sig, stop.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let table = Arc::new(Table {
        arbiter,
        config: config.clone(),
        reporter: Reporter::new(out),
        seats: (0..config.philosophers).map(|_| Seat::default()).collect(),
        stop,
        fatal: Mutex::new(None),
    });

    info!(
        philosophers = config.philosophers,
        fairness = ?config.fairness,
        spin = config.spin,
        "simulation started"
    );

    let mut v = Vec::new();
    for i in 0..config.philosophers {
        let table0 = table.clone();
        let t = thread::Builder::new()
            .name(format!("philosopher-{}", i + 1))
            .spawn(move || {
                if let Err(e) = philosopher(&table0, PhilosopherId(i)) {
                    table0.fail(e);
                }
            })
            .inspect_err(|_| table.halt())?;
        v.push(t);
    }

    let table0 = table.clone();
    let watcher = thread::Builder::new()
        .name("monitor".into())
        .spawn(move || match monitor(&table0) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                table0.fail(e);
                None
            }
        })
        .inspect_err(|_| table.halt())?;

    let mut panicked = None;
    for (i, t) in v.into_iter().enumerate() {
        if t.join().is_err() && panicked.is_none() {
            table.halt();
            panicked = Some(format!("philosopher-{}", i + 1));
        }
    }
    let outcome = match watcher.join() {
        Ok(outcome) => outcome,
        Err(_) => {
            if panicked.is_none() {
                panicked = Some("monitor".to_string());
            }
            None
        }
    };

    for id in signals {
        signal_hook::low_level::unregister(id);
    }

    if let Some(e) = table.fatal.lock().take() {
        return Err(e.into());
    }
    if let Some(name) = panicked {
        return Err(SimError::Panicked(name));
    }

    let stats = table.arbiter.shutdown()?;
    let outcome = outcome.unwrap_or(Outcome::Interrupted);
    info!(?outcome, ?stats, "simulation finished");
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arbiter::Fairness;
    use crate::report::test::SharedBuf;

    fn config(n: usize, die: u64, eat: u64, sleep: u64, must_eat: Option<u32>) -> Config {
        Config {
            philosophers: n,
            time_to_die: Duration::from_millis(die),
            time_to_eat: Duration::from_millis(eat),
            time_to_sleep: Duration::from_millis(sleep),
            must_eat,
            fairness: Fairness::LongestWaitFirst,
            spin: false,
        }
    }

    fn lines_of(buf: &SharedBuf, id: usize, msg: &str) -> usize {
        let suffix = format!(" {id} {msg}");
        buf.lines().iter().filter(|l| l.ends_with(&suffix)).count()
    }

    #[test]
    fn test_everyone_gets_fed() {
        let buf = SharedBuf::default();
        let outcome = run_to(&config(5, 800, 20, 20, Some(3)), Box::new(buf.clone())).unwrap();
        assert_eq!(outcome, Outcome::AllFed);

        for id in 1..=5 {
            assert!(lines_of(&buf, id, "is eating") >= 3);
            assert_eq!(lines_of(&buf, id, "died"), 0);
        }
    }

    #[test]
    fn test_everyone_gets_fed_with_spin_lock() {
        let mut c = config(4, 800, 10, 10, Some(5));
        c.spin = true;
        c.fairness = Fairness::ArrivalOrder;
        let outcome = run_to(&c, Box::new(SharedBuf::default())).unwrap();
        assert_eq!(outcome, Outcome::AllFed);
    }

    #[test]
    fn test_lonely_philosopher_dies() {
        let buf = SharedBuf::default();
        let outcome = run_to(&config(1, 60, 20, 20, None), Box::new(buf.clone())).unwrap();

        match outcome {
            Outcome::Died { id, at_ms } => {
                assert_eq!(id, PhilosopherId(0));
                assert!(at_ms > 60);
            }
            other => panic!("unexpected {other:?}"),
        }
        // died は最後の 1 行だけ
        let lines = buf.lines();
        assert!(lines.last().unwrap().ends_with(" 1 died"));
        assert_eq!(lines_of(&buf, 1, "died"), 1);
        assert_eq!(lines_of(&buf, 1, "is eating"), 0);
    }

    #[test]
    fn test_death_while_eating_reclaims_forks() {
        // 食事が寿命より長いので、隣人は必ず飢え死にする
        let buf = SharedBuf::default();
        let outcome = run_to(&config(3, 50, 200, 10, None), Box::new(buf.clone())).unwrap();
        assert!(matches!(outcome, Outcome::Died { .. }));

        let lines = buf.lines();
        assert!(lines.last().unwrap().ends_with(" died"));
        assert_eq!(lines.iter().filter(|l| l.ends_with(" died")).count(), 1);
    }
}
