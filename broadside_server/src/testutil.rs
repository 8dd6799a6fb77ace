// Test-only helpers shared by the unit test modules.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use broadside_protocol::{FrameKind, FrameWrite};

use crate::client::ClientWriter;

/// A `FrameWrite` that records every frame instead of touching a socket.
pub struct CaptureWriter {
    frames: CapturedFrames,
}

/// Shared handle to the frames a `CaptureWriter` has recorded.
#[derive(Clone, Default)]
pub struct CapturedFrames {
    inner: Arc<Mutex<Vec<(FrameKind, String)>>>,
}

impl CapturedFrames {
    /// Snapshot everything captured so far.
    pub fn take(&self) -> Vec<(FrameKind, String)> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The captured texts only, for substring assertions.
    pub fn texts(&self) -> Vec<String> {
        self.take().into_iter().map(|(_, text)| text).collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.texts().iter().any(|t| t.contains(needle))
    }
}

impl CaptureWriter {
    pub fn boxed() -> (Box<dyn FrameWrite + Send>, CapturedFrames) {
        let frames = CapturedFrames::default();
        (
            Box::new(Self {
                frames: frames.clone(),
            }),
            frames,
        )
    }

    /// A ready-to-use `ClientWriter` backed by a capture sink.
    pub fn client_writer() -> (Arc<ClientWriter>, CapturedFrames) {
        let (sink, frames) = Self::boxed();
        (ClientWriter::new(sink), frames)
    }
}

impl FrameWrite for CaptureWriter {
    fn write_frame(&mut self, kind: FrameKind, text: &str) -> io::Result<()> {
        self.frames
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, text.to_string()));
        Ok(())
    }
}
