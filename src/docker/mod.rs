// Container engine: the capability trait builds run against, and the docker CLI backend.

pub mod engine;
pub mod run;
pub mod types;

pub use engine::{ContainerEngine, DockerCli};
pub use types::{
    CancelToken, CommandResult, ContainerCommand, ContainerHandle, EngineError, Inspection,
    PullCompletion, PullStream,
};
