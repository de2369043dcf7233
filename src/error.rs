use thiserror::Error;

use crate::hardware::topology::TopologyParseError;

#[derive(Error, Debug)]
pub enum StressError {
    #[error("Configuration Error: {0}")]
    Config(String),
    #[error("Topology Error: {0}")]
    Topology(#[from] TopologyParseError),
    #[error("Invalid Scheduling Class: {0}")]
    InvalidClass(String),
    #[error("Scheduling Failed: {0}")]
    Scheduling(String),

    #[error("Actor Panicked: role {role} ({actor}) | {message}")]
    ActorPanicked { role: usize, actor: String, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Thread Spawn Failed: {0}")]
    Spawn(String),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StressResult<T> = Result<T, StressError>;
