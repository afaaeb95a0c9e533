use std::{
    fmt,
    io::{self, Write},
    time::Instant,
};

use parking_lot::Mutex;
use tracing::warn;

use crate::types::PhilosopherId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    TakenFork,
    Eating,
    Sleeping,
    Thinking,
    Died,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Status::TakenFork => "has taken a fork",
            Status::Eating => "is eating",
            Status::Sleeping => "is sleeping",
            Status::Thinking => "is thinking",
            Status::Died => "died",
        };
        f.write_str(msg)
    }
}

struct Sink {
    out: Box<dyn Write + Send>,
    silenced: bool, // died を出したあとは何も出さない
}

/// 状態表示の行を 1 本のロックで直列化して書き出す
///
/// 行の形式は `<開始からの ms> <1 始まりの番号> <メッセージ>`
pub struct Reporter {
    start: Instant,
    sink: Mutex<Sink>,
}

impl Reporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Reporter {
            start: Instant::now(),
            sink: Mutex::new(Sink {
                out,
                silenced: false,
            }),
        }
    }

    pub fn stdout() -> Self {
        Reporter::new(Box::new(io::stdout()))
    }

    /// 開始からの経過時間 (ms)
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// 1 行書き出す。既に止められていれば false
    pub fn status(&self, p: PhilosopherId, status: Status) -> bool {
        let mut sink = self.sink.lock();
        if sink.silenced {
            return false;
        }
        // 時刻はロックを取ってから測る。でないと行の時刻が前後する
        let ms = self.elapsed_ms();
        if let Err(e) = writeln!(sink.out, "{} {} {}", ms, p.0 + 1, status) {
            warn!(error = %e, "failed to write status line");
        }
        if status == Status::Died {
            sink.silenced = true;
            if let Err(e) = sink.out.flush() {
                warn!(error = %e, "failed to flush status lines");
            }
        }
        true
    }

    /// 以後の行を捨てる
    pub fn silence(&self) {
        let mut sink = self.sink.lock();
        sink.silenced = true;
        if let Err(e) = sink.out.flush() {
            warn!(error = %e, "failed to flush status lines");
        }
    }
}
