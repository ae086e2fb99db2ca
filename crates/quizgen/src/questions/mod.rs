pub mod repo;
pub mod stats;

pub use repo::{QuestionRow, QuestionsRepo};
pub use stats::{AreaPoolStat, PoolHealth, PoolStats};
