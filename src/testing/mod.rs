//! Test doubles for the injection seams: a scriptable wire engine, a manual
//! clock, a deterministic token signer, and a handler that records every
//! callback. Compiled into the library so integration tests and downstream
//! consumers can drive a session without a broker.

pub mod mocks;

pub use mocks::{FakeSigner, ManualClock, MockEngine, MockHandle, PublishRecord, RecordingHandler};
