//! 食事する哲学者のための、デッドロックしない箸の割り当てエンジン
//!
//! - [`graph::GraphStore`]: 割り当て辺と要求辺の二部グラフ
//! - [`cycle`]: 要求を足すと待ちの環ができるかを調べる
//! - [`banker`]: 銀行家のアルゴリズムで、渡したあとも全員が食べ終われるかを調べる
//! - [`arbiter::ResourceArbiter`]: グラフを変更できる唯一の窓口
//!
//! [`sim`] はこのエンジンの上に載せたスレッド版のシミュレーション。

pub mod arbiter;
pub mod banker;
pub mod config;
pub mod cycle;
pub mod error;
pub mod graph;
pub mod report;
pub mod section;
pub mod sim;
pub mod types;

pub use arbiter::{ArbiterState, Fairness, Released, ResourceArbiter, SpinArbiter, Stats};
pub use error::GraphError;
pub use graph::GraphStore;
pub use types::{Edge, EdgeKind, ForkId, Grant, Node, Phase, PhilosopherId};
