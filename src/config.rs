use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::arbiter::Fairness;

/// Dining philosophers with a deadlock-free fork arbiter
#[derive(Parser, Debug)]
#[command(name = "philo")]
pub struct Args {
    /// Number of philosophers (and forks)
    pub number_of_philosophers: usize,
    /// A philosopher dies if it has not started eating within this many ms
    pub time_to_die: u64,
    /// Time spent eating, in ms
    pub time_to_eat: u64,
    /// Time spent sleeping, in ms
    pub time_to_sleep: u64,
    /// Stop once every philosopher has eaten this many times
    pub must_eat_count: Option<u32>,

    /// How to order neighbours that could both eat
    #[arg(long, value_enum, default_value_t = FairnessArg::LongestWait)]
    pub fairness: FairnessArg,

    /// Guard the arbiter with a spin lock instead of a mutex
    #[arg(long)]
    pub spin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FairnessArg {
    LongestWait,
    Arrival,
}

impl From<FairnessArg> for Fairness {
    fn from(arg: FairnessArg) -> Self {
        match arg {
            FairnessArg::LongestWait => Fairness::LongestWaitFirst,
            FairnessArg::Arrival => Fairness::ArrivalOrder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("number_of_philosophers must be at least 1")]
    NoPhilosophers,
    #[error("{0} must be at least 1 ms")]
    ZeroDuration(&'static str),
    #[error("must_eat_count must be at least 1 when given")]
    ZeroMeals,
}

/// 検証済みの設定。エンジンが使うのは philosophers と fairness だけ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub philosophers: usize,
    pub time_to_die: Duration,
    pub time_to_eat: Duration,
    pub time_to_sleep: Duration,
    pub must_eat: Option<u32>,
    pub fairness: Fairness,
    pub spin: bool,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.number_of_philosophers == 0 {
            return Err(ConfigError::NoPhilosophers);
        }

        let ms = |name: &'static str, v: u64| {
            if v == 0 {
                Err(ConfigError::ZeroDuration(name))
            } else {
                Ok(Duration::from_millis(v))
            }
        };

        if args.must_eat_count == Some(0) {
            return Err(ConfigError::ZeroMeals);
        }

        Ok(Config {
            philosophers: args.number_of_philosophers,
            time_to_die: ms("time_to_die", args.time_to_die)?,
            time_to_eat: ms("time_to_eat", args.time_to_eat)?,
            time_to_sleep: ms("time_to_sleep", args.time_to_sleep)?,
            must_eat: args.must_eat_count,
            fairness: args.fairness.into(),
            spin: args.spin,
        })
    }
}
