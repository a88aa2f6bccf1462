pub mod audit;
pub mod clock;
pub mod errors;
pub mod hook;
pub mod init;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod phaseloop_config;
pub mod publish;
pub mod queue;
pub mod safety;
pub mod session;
pub mod signals;
pub mod util;
pub mod verify;
