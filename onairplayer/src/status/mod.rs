//! Now-playing status: fetch, recognise, normalize, poll

pub mod client;
pub mod poller;
pub mod shapes;

pub use client::{ClientBuilder, StatusClient};
pub use poller::{PollerHandle, StatusPoller, DEFAULT_POLL_INTERVAL};
pub use shapes::{ShapeKind, StatusShape};
