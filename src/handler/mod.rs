pub mod aggregation;
pub mod cache_sweeper;

pub use aggregation::aggregation_task;
pub use cache_sweeper::cache_sweeper_task;
