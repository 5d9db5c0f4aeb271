//! 展示层辅助：汇总统计、表格与 CSV 输出

pub mod export;
pub mod summary;

pub use export::{default_export_name, write_csv, write_table};
pub use summary::{GenderCounts, Summary};
