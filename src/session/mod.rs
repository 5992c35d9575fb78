//! Blocking front end over [`Transport`].
//!
//! A reactor thread owns the transport. Callers, and the link's receive
//! callback, reach it only through one event queue; each operation gets its
//! completion back on a channel of its own.

mod link;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub use link::*;
use log::{debug, info, warn};

use crate::{
    error::{Error, Result},
    layer::{check_transfer, Builder, Completion, Mode, OpId, Stat, Transport},
};

pub(crate) enum Event {
    Frame(Vec<u8>),
    Submit {
        id: OpId,
        request: Request,
        responder: mpsc::Sender<Result<Completion>>,
    },
    Cancel(OpId),
    Stat(mpsc::Sender<Stat>),
    Close(mpsc::Sender<()>),
}

pub(crate) enum Request {
    Write {
        address: u32,
        data: Vec<u8>,
        mode: Mode,
    },
    Read {
        address: u32,
        len: usize,
        mode: Mode,
    },
}

pub struct Session {
    tx: mpsc::Sender<Event>,
    next_id: AtomicU64,
    max_fragment: usize,
    reactor: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Validates `builder`, hooks the link up and starts the reactor.
    pub fn open<L: LinkAdapter>(builder: Builder, mut link: L) -> Result<Self> {
        let transport = builder.build()?;
        let max_fragment = transport.max_fragment();

        let (tx, rx) = mpsc::channel();
        link.on_receive(FrameSink::new(tx.clone()));

        let reactor = Reactor {
            transport,
            link,
            rx,
            responders: HashMap::new(),
        };
        let reactor = thread::spawn(move || reactor.run());

        Ok(Session {
            tx,
            next_id: AtomicU64::new(0),
            max_fragment,
            reactor: Mutex::new(Some(reactor)),
        })
    }

    #[must_use]
    #[inline]
    pub fn max_fragment(&self) -> usize {
        self.max_fragment
    }

    /// Writes `data` at `address`, returning once every fragment is acked.
    pub fn write(&self, address: u32, data: &[u8]) -> Result<()> {
        self.submit_write(address, data)?.wait()
    }

    /// Reads `len` bytes from `address`.
    pub fn read(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.submit_read(address, len)?.wait()
    }

    /// Like [`Self::write`], but `data` must fit one frame.
    pub fn write_register(&self, address: u32, data: &[u8]) -> Result<()> {
        let pending = self.submit(Request::Write {
            address,
            data: data.to_vec(),
            mode: Mode::SingleFrame,
        })?;
        Pending::new(pending, written).wait()
    }

    /// Like [`Self::read`], but `len` must fit one frame.
    pub fn read_register(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        let pending = self.submit(Request::Read {
            address,
            len,
            mode: Mode::SingleFrame,
        })?;
        Pending::new(pending, read_data).wait()
    }

    pub fn submit_write(&self, address: u32, data: &[u8]) -> Result<Pending<()>> {
        let pending = self.submit(Request::Write {
            address,
            data: data.to_vec(),
            mode: Mode::Fragmented,
        })?;
        Ok(Pending::new(pending, written))
    }

    pub fn submit_read(&self, address: u32, len: usize) -> Result<Pending<Vec<u8>>> {
        let pending = self.submit(Request::Read {
            address,
            len,
            mode: Mode::Fragmented,
        })?;
        Ok(Pending::new(pending, read_data))
    }

    fn submit(&self, request: Request) -> Result<RawPending> {
        let (address, len, mode) = match &request {
            Request::Write {
                address,
                data,
                mode,
            } => (*address, data.len(), *mode),
            Request::Read { address, len, mode } => (*address, *len, *mode),
        };
        check_transfer(address, len, mode, self.max_fragment)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (responder, rx) = mpsc::channel();
        self.tx
            .send(Event::Submit {
                id,
                request,
                responder,
            })
            .map_err(|_e| Error::Closed)?;
        Ok(RawPending {
            id,
            rx,
            tx: self.tx.clone(),
        })
    }

    pub fn stat(&self) -> Result<Stat> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(Event::Stat(reply)).map_err(|_e| Error::Closed)?;
        rx.recv().map_err(|_e| Error::Closed)
    }

    /// Stops the reactor. Operations still pending fail with
    /// [`Error::Closed`].
    ///
    /// Closing twice is harmless.
    pub fn close(&self) {
        let (done, rx) = mpsc::channel();
        if self.tx.send(Event::Close(done)).is_ok() {
            let _ = rx.recv();
        }
        let reactor = match self.reactor.lock() {
            Ok(mut x) => x.take(),
            Err(e) => e.into_inner().take(),
        };
        if let Some(reactor) = reactor {
            if reactor.join().is_err() {
                warn!("reactor thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

struct RawPending {
    id: OpId,
    rx: mpsc::Receiver<Result<Completion>>,
    tx: mpsc::Sender<Event>,
}

/// A submitted operation.
///
/// Dropping the handle does not cancel the operation.
pub struct Pending<T> {
    raw: RawPending,
    convert: fn(Completion) -> T,
}

impl<T> Pending<T> {
    fn new(raw: RawPending, convert: fn(Completion) -> T) -> Self {
        Pending { raw, convert }
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> OpId {
        self.raw.id
    }

    /// Blocks until the operation finishes.
    pub fn wait(self) -> Result<T> {
        match self.raw.rx.recv() {
            Ok(result) => result.map(self.convert),
            Err(_) => Err(Error::Closed),
        }
    }

    /// Blocks for at most `timeout`.
    ///
    /// Returns `None` if the operation is still running. The outcome is
    /// handed out once; later calls report [`Error::Closed`].
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        match self.raw.rx.recv_timeout(timeout) {
            Ok(result) => Some(result.map(self.convert)),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Err(Error::Closed)),
        }
    }

    /// Aborts the operation and stops all of its retransmissions.
    ///
    /// A no-op if it already finished; [`Self::wait`] then still returns the
    /// outcome it finished with.
    pub fn cancel(&self) {
        let _ = self.raw.tx.send(Event::Cancel(self.raw.id));
    }
}

fn written(_: Completion) {}

fn read_data(completion: Completion) -> Vec<u8> {
    match completion {
        Completion::Read(data) => data,
        Completion::Written => Vec::new(),
    }
}

struct Reactor<L> {
    transport: Transport,
    link: L,
    rx: mpsc::Receiver<Event>,
    responders: HashMap<OpId, mpsc::Sender<Result<Completion>>>,
}

impl<L: LinkAdapter> Reactor<L> {
    fn run(mut self) {
        debug!("reactor started");
        loop {
            let event = match self.transport.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.rx.recv_timeout(timeout) {
                        Ok(x) => Some(x),
                        Err(mpsc::RecvTimeoutError::Timeout) => None,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.rx.recv() {
                    Ok(x) => Some(x),
                    Err(_) => break,
                },
            };

            let now = Instant::now();
            match event {
                Some(Event::Frame(frame)) => self.transport.input_frame(&frame, now),
                Some(Event::Submit {
                    id,
                    request,
                    responder,
                }) => self.submit(id, request, responder, now),
                Some(Event::Cancel(id)) => {
                    if !self.transport.cancel(id, now) {
                        debug!("cancel of finished operation {}", id);
                    }
                }
                Some(Event::Stat(reply)) => {
                    let _ = reply.send(self.transport.stat());
                }
                Some(Event::Close(done)) => {
                    self.transport.close();
                    self.flush();
                    info!("session closed: {:?}", self.transport.stat());
                    let _ = done.send(());
                    return;
                }
                None => (),
            }
            self.transport.handle_timeouts(now);
            self.flush();
        }

        // every sender is gone
        self.transport.close();
        self.flush();
    }

    fn submit(
        &mut self,
        id: OpId,
        request: Request,
        responder: mpsc::Sender<Result<Completion>>,
        now: Instant,
    ) {
        let res = match request {
            Request::Write {
                address,
                data,
                mode,
            } => self.transport.submit_write(id, address, &data, mode, now),
            Request::Read { address, len, mode } => {
                self.transport.submit_read(id, address, len, mode, now)
            }
        };
        match res {
            Ok(()) => {
                self.responders.insert(id, responder);
            }
            Err(e) => {
                let _ = responder.send(Err(e));
            }
        }
    }

    fn flush(&mut self) {
        while let Some(frame) = self.transport.pop_output() {
            if let Err(e) = self.link.send(&frame) {
                warn!("link send failed: {}", e);
            }
        }
        while let Some((id, result)) = self.transport.pop_completion() {
            if let Some(responder) = self.responders.remove(&id) {
                let _ = responder.send(result);
            }
        }
    }
}
