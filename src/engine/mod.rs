pub mod backend;
pub mod scripted;

pub use backend::{
    EngineCallback, EngineError, EngineEvent, EngineFactory, EngineFault, EngineKind, EngineRequest,
    RecognitionEngine, SessionHandle,
};
pub use scripted::{EngineScript, ScriptStep, ScriptedEngine};
