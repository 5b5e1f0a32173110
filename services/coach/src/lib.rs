//! RepCoach client library
//!
//! Everything needed to run a coached workout session against a
//! conversational voice agent: configuration, the agent connection, audio
//! playback, paced camera capture, the local tool bridge and the session
//! actor that ties them together. The `coach` binary is a thin wrapper
//! around this library.

pub mod audio;
pub mod audio_utils;
pub mod capture;
pub mod config;
pub mod form_tool;
pub mod orchestrator;
pub mod recorder;
pub mod signed_url;
pub mod ws;
