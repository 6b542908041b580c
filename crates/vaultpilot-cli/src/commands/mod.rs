pub mod audit;
pub mod daemon;
pub mod health;
pub mod pause;
pub mod schedule;
pub mod status;
pub mod task;
pub mod utils;
