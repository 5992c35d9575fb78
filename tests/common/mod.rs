#![allow(dead_code)]

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use rsp::{
    layer::Builder,
    protocol::{
        frame::{FrameCodec, FrameCodecBuilder},
        packet::Packet,
    },
    FrameSink, LinkAdapter,
};

pub const MEMORY_LEN: usize = 1 << 20;

pub fn fast_builder() -> Builder {
    Builder {
        rtd: Duration::from_millis(20),
        ..Builder::default()
    }
}

/// Register map on the far side of the link.
pub struct SimDevice {
    codec: FrameCodec,
    pub memory: Vec<u8>,
    rng: StdRng,
    /// Chance of losing a frame in either direction.
    pub drop_rate: f64,
    /// Hold responses until this many are queued, then release them shuffled.
    pub reorder_depth: usize,
    /// Swallow every request.
    pub silent: bool,
    held: Vec<Vec<u8>>,
    /// Frames that reached the device.
    pub frames_seen: usize,
}

impl SimDevice {
    pub fn new(builder: &Builder, seed: u64) -> Self {
        let codec = FrameCodecBuilder {
            local: builder.device_id,
            remote: builder.local_id,
            ether_type: builder.ether_type,
            min_payload_len: builder.min_payload_len,
            fcs: builder.fcs,
        }
        .build();
        SimDevice {
            codec,
            memory: vec![0; MEMORY_LEN],
            rng: StdRng::seed_from_u64(seed),
            drop_rate: 0.0,
            reorder_depth: 0,
            silent: false,
            held: Vec::new(),
            frames_seen: 0,
        }
    }

    /// Serves one host frame and returns the frames to send back.
    fn serve(&mut self, frame: &[u8]) -> Vec<Vec<u8>> {
        if self.drop_rate > 0.0 && self.rng.gen_bool(self.drop_rate) {
            return vec![];
        }
        self.frames_seen += 1;
        if self.silent {
            return vec![];
        }
        let packet = match self.codec.decode(frame) {
            Ok(x) => x,
            Err(_) => return vec![],
        };
        let reply = match packet {
            Packet::Write {
                seq,
                address,
                payload,
            } => {
                let start = address as usize;
                self.memory[start..start + payload.len()].copy_from_slice(&payload);
                Packet::WriteAck { seq }
            }
            Packet::Read { seq, address, len } => {
                let start = address as usize;
                Packet::ReadRsp {
                    seq,
                    address,
                    payload: self.memory[start..start + len as usize].to_vec(),
                }
            }
            Packet::WriteAck { .. } | Packet::ReadRsp { .. } => return vec![],
        };
        let reply = self.codec.encode(&reply).unwrap();
        if self.drop_rate > 0.0 && self.rng.gen_bool(self.drop_rate) {
            return vec![];
        }

        if self.reorder_depth == 0 {
            return vec![reply];
        }
        self.held.push(reply);
        if self.held.len() < self.reorder_depth {
            return vec![];
        }
        let mut out: Vec<Vec<u8>> = self.held.drain(..).collect();
        out.shuffle(&mut self.rng);
        out
    }
}

pub struct SimLink {
    device: Arc<Mutex<SimDevice>>,
    sink: Option<FrameSink>,
}

impl SimLink {
    pub fn new(device: Arc<Mutex<SimDevice>>) -> Self {
        SimLink { device, sink: None }
    }
}

impl LinkAdapter for SimLink {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let replies = self.device.lock().unwrap().serve(frame);
        if let Some(sink) = &self.sink {
            for reply in replies {
                sink.deliver(&reply);
            }
        }
        Ok(())
    }

    fn on_receive(&mut self, sink: FrameSink) {
        self.sink = Some(sink);
    }
}

pub fn setup(builder: Builder, seed: u64) -> (rsp::Session, Arc<Mutex<SimDevice>>) {
    let device = Arc::new(Mutex::new(SimDevice::new(&builder, seed)));
    let link = SimLink::new(Arc::clone(&device));
    let session = rsp::Session::open(builder, link).unwrap();
    (session, device)
}

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}
