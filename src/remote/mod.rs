//! Client for the remote transcoding service.

pub mod cache;
pub mod client;
pub mod signing;
pub mod types;

pub use client::{RemoteClient, RemoteClientConfig, RemoteResult, TranscodeApi};
pub use types::{CachePolicy, CloudInfo, Encoding, EncodingFilter, JobStatus, Profile, Video};
