//! Playback Engine Module
//!
//! Core switching engine including:
//! - Decoded buffers and asset loading
//! - Gain automation and the software mixer
//! - Transport clock
//! - Session scheduling and crossfades
//! - The public playback orchestrator

pub mod automation;
pub mod buffer;
pub mod graph;
pub mod io;
pub mod player;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;

pub use automation::{AutomationEvent, GainParam};
pub use buffer::{ChannelLayout, DecodedBuffer};
pub use graph::{
    AudioBackend, AudioGraph, EndReason, GainId, GraphRenderer, OutputStatus, SourceEnded,
    SourceId,
};
pub use io::{decode_audio, load_asset, AssetSource, FileSystemSource, MemorySource};
pub use player::{PlaybackEngine, PlaybackStatus, PlayerState};
pub use scheduler::CrossfadeScheduler;
pub use session::{PlaybackSession, SessionId};
pub use store::{BufferStore, LoadFailure, LoadHandle, LoadOutcome, Readiness};
pub use transport::TransportState;
