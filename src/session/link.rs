use std::{io, sync::mpsc};

use super::Event;

/// Raw frame boundary to the device.
///
/// Neither call may block the reactor for long: `send` hands the frame to
/// the link and returns, and inbound frames are pushed through the
/// [`FrameSink`] from whatever context the link receives on.
pub trait LinkAdapter: Send + 'static {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Called once, before the first `send`.
    fn on_receive(&mut self, sink: FrameSink);
}

/// Receive callback handed to a [`LinkAdapter`].
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Event>,
}

impl FrameSink {
    pub(super) fn new(tx: mpsc::Sender<Event>) -> Self {
        FrameSink { tx }
    }

    /// Queues one inbound frame for the session.
    ///
    /// Returns `false` once the session is closed.
    pub fn deliver(&self, frame: &[u8]) -> bool {
        self.tx.send(Event::Frame(frame.to_vec())).is_ok()
    }
}
