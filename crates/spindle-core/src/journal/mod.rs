//! Journal - StateStore の上に載る per-aggregate のログ
//!
//! - **StateTransaction**: 1 ターン分の書き込みバッファ
//! - **OrderedLog**: command / event / message の追記専用ログ

mod ordered_log;
mod transaction;

pub use ordered_log::{COMMAND_LOG, EVENT_LOG, MESSAGE_LOG, OrderedLog};
pub use transaction::StateTransaction;
