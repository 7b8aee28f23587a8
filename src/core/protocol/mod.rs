//! Ready4Sky vendor protocol
//! Frame codec, session state, the per-family command table and the engine
//! running composite operations over a [`Transport`](crate::core::bluetooth::Transport).

pub mod auth;
pub mod commands;
pub mod device_type;
pub mod engine;
pub mod frame;
pub mod handle;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::SecretKey;
pub use commands::{opcode, Command, CookProgram, KettleMode, LightTarget, Rgb, COOKER_PROGRAMS};
pub use device_type::{DeviceType, SUPPORTED_DEVICES};
pub use engine::{EngineOptions, ProtocolEngine};
pub use frame::Frame;
pub use handle::{DeviceHandle, HandleOptions};
pub use session::{LinkPhase, Session};
