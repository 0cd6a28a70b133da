pub mod cluster;
pub mod config;
pub mod job;
pub mod progress;
pub mod report;

#[cfg(test)]
mod tests;
