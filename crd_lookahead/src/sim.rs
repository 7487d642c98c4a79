//! In-process simulated motion card.
//!
//! Implements [`CardLink`] by decoding request frames, executing them
//! against a small card model and encoding the reply. Records received for
//! a FIFO queue up until `CrdStart`, which executes them instantly and
//! updates the status snapshot. Faults can be queued to exercise the
//! transport's retry handling.

use std::collections::VecDeque;

use heapless::Vec;
use tracing::{debug, trace};

use crd::consts::{AXIS_MAX, CARD_FIFO_DEPTH, CRDSYS_MAX, CRD_POS_COUNT, FIFO_PER_CRD, FRAME_LEN_MAX};
use crd::crd::{AllSysStatus, CrdPrm, CrdStatus, OriginPolicy, Record, Segment};
use crd::wire::{Frame, MsgType, ResultCode, WireError, WireReader, WireWriter};

use crate::error::LinkError;
use crate::transport::CardLink;

/// Fault applied to the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Execute the request but lose the reply.
    Timeout,
    /// Refuse the request without executing it.
    Nak,
    /// Execute the request and flip a bit in the reply.
    CorruptResponse,
    /// Answer with a non-zero result code without executing.
    Reject(ResultCode),
    /// Drop the link.
    Disconnect,
}

#[derive(Debug, Default)]
struct CrdModel {
    prm: Option<CrdPrm>,
    /// Machine position of coordinate-system zero [pulse].
    origin: [i64; AXIS_MAX],
    /// Current position in coordinate-system axes [pulse].
    pos: [i64; AXIS_MAX],
    pending: [VecDeque<Record>; FIFO_PER_CRD],
    received: [std::vec::Vec<Record>; FIFO_PER_CRD],
}

/// Software model of the card behind a link.
#[derive(Debug)]
pub struct SimulatedCard {
    card_id: u8,
    faults: VecDeque<Fault>,
    /// Last executed request and the reply produced for it.
    last: Option<(std::vec::Vec<u8>, Vec<u8, FRAME_LEN_MAX>)>,
    requests: std::vec::Vec<std::vec::Vec<u8>>,
    executed: usize,
    duplicates: usize,
    crds: [CrdModel; CRDSYS_MAX],
    status: AllSysStatus,
}

impl SimulatedCard {
    pub fn new(card_id: u8) -> Self {
        let mut status = AllSysStatus::default();
        status.crd_space = [CARD_FIFO_DEPTH as i32; CRDSYS_MAX];
        Self {
            card_id,
            faults: VecDeque::new(),
            last: None,
            requests: std::vec::Vec::new(),
            executed: 0,
            duplicates: 0,
            crds: Default::default(),
            status,
        }
    }

    /// Queue a fault for an upcoming request.
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Every request received, resends included.
    pub fn requests(&self) -> &[std::vec::Vec<u8>] {
        &self.requests
    }

    /// Requests executed (resends answered from cache excluded).
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Resends answered from cache.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Every record accepted for a FIFO, in arrival order.
    pub fn received(&self, crd: usize, fifo: usize) -> &[Record] {
        &self.crds[crd].received[fifo]
    }

    /// Records waiting for `CrdStart`.
    pub fn pending(&self, crd: usize, fifo: usize) -> usize {
        self.crds[crd].pending[fifo].len()
    }

    pub fn crd_prm(&self, crd: usize) -> Option<&CrdPrm> {
        self.crds[crd].prm.as_ref()
    }

    pub fn status(&self) -> &AllSysStatus {
        &self.status
    }

    /// Move a profile axis (jogging outside any program).
    pub fn set_prf_pos(&mut self, profile: usize, pos: f64) {
        self.status.prf_pos[profile] = pos;
        self.status.enc_pos[profile] = pos;
    }

    fn execute(&mut self, req: &Frame) -> Frame {
        let crd = req.header.crd_mask.trailing_zeros() as usize;
        let result = match req.header.kind() {
            Some(MsgType::CrdPrm) if crd < CRDSYS_MAX => self.load_prm(crd, &req.payload),
            Some(MsgType::CrdData) if crd < CRDSYS_MAX => {
                self.accept_records(crd, req.header.subtype as usize, &req.payload)
            }
            Some(MsgType::CrdClear) if crd < CRDSYS_MAX => {
                match self.crds[crd].pending.get_mut(req.header.subtype as usize) {
                    Some(q) => {
                        q.clear();
                        ResultCode::Success
                    }
                    None => ResultCode::DataWrong,
                }
            }
            Some(MsgType::CrdStart) => {
                for crd in 0..CRDSYS_MAX {
                    if req.header.crd_mask & (1 << crd) != 0 {
                        self.run(crd);
                    }
                }
                ResultCode::Success
            }
            Some(MsgType::SysStatus) => {
                let mut w = WireWriter::<FRAME_LEN_MAX>::new();
                let reply = match self.status.encode(&mut w) {
                    Ok(()) => req.reply(ResultCode::Success).with_payload(w.as_slice()),
                    Err(e) => Err(e),
                };
                return reply.unwrap_or_else(|_| req.reply(ResultCode::ExecFail));
            }
            _ => ResultCode::DataWrong,
        };
        req.reply(result)
    }

    fn load_prm(&mut self, crd: usize, payload: &[u8]) -> ResultCode {
        let Ok(prm) = CrdPrm::decode(&mut WireReader::new(payload)) else {
            return ResultCode::DataWrong;
        };
        let model = &mut self.crds[crd];
        for k in 0..prm.dimension as usize {
            let Some(p) = prm.profile_index(k) else {
                continue;
            };
            let machine = self.status.prf_pos[p].round() as i64;
            model.origin[k] = match prm.origin {
                OriginPolicy::CurrentPosition => machine,
                OriginPolicy::User(o) => o[k] as i64,
            };
            model.pos[k] = machine - model.origin[k];
        }
        model.pending.iter_mut().for_each(VecDeque::clear);
        debug!(crd, dimension = prm.dimension, "simulated card: coordinate system loaded");
        model.prm = Some(prm);
        ResultCode::Success
    }

    fn accept_records(&mut self, crd: usize, fifo: usize, payload: &[u8]) -> ResultCode {
        if fifo >= FIFO_PER_CRD || self.crds[crd].prm.is_none() {
            return ResultCode::ExecFail;
        }
        let records = match parse_records(payload) {
            Ok(r) => r,
            Err(_) => return ResultCode::DataWrong,
        };
        let model = &mut self.crds[crd];
        if model.pending[fifo].len() + records.len() > CARD_FIFO_DEPTH {
            return ResultCode::ExecFail;
        }
        trace!(crd, fifo, count = records.len(), "simulated card: records queued");
        model.received[fifo].extend(records.iter().cloned());
        model.pending[fifo].extend(records);
        self.status.crd_space[crd] =
            (CARD_FIFO_DEPTH - model.pending.iter().map(VecDeque::len).max().unwrap_or(0)) as i32;
        self.status.crd_status[crd].remove(CrdStatus::FIFO_FINISH_0 | CrdStatus::FIFO_FINISH_1);
        ResultCode::Success
    }

    /// Execute everything queued on a coordinate system.
    fn run(&mut self, crd: usize) {
        let Some(prm) = self.crds[crd].prm.clone() else {
            return;
        };
        for fifo in 0..FIFO_PER_CRD {
            let mut ran = false;
            while let Some(rec) = self.crds[crd].pending[fifo].pop_front() {
                self.apply(crd, &prm, &rec.segment);
                self.status.crd_vel[crd] = rec.exit_speed;
                ran = true;
            }
            if ran {
                self.status.crd_status[crd].insert(CrdStatus::fifo_finish(fifo));
            }
        }
        let model = &self.crds[crd];
        for k in 0..prm.dimension as usize {
            if let Some(p) = prm.profile_index(k) {
                let machine = (model.pos[k] + model.origin[k]) as f64;
                self.status.prf_pos[p] = machine;
                self.status.enc_pos[p] = machine;
            }
        }
        for (k, slot) in self.status.crd_pos[crd].iter_mut().enumerate().take(CRD_POS_COUNT) {
            *slot = model.pos[k] as f64;
        }
        self.status.remainder_seg_num[crd] = 0;
        self.status.crd_space[crd] = CARD_FIFO_DEPTH as i32;
    }

    fn apply(&mut self, crd: usize, prm: &CrdPrm, segment: &Segment) {
        let model = &mut self.crds[crd];
        match segment {
            Segment::Rapid(m) => {
                for (k, &t) in m.targets.iter().enumerate() {
                    model.pos[k] = t as i64;
                }
            }
            Segment::Line(m) => {
                for (k, &t) in m.targets.iter().enumerate() {
                    model.pos[k] = t as i64;
                }
            }
            Segment::ArcCw(a) | Segment::ArcCcw(a) => {
                let (i, j) = a.plane.axes();
                model.pos[i] = a.end[0] as i64;
                model.pos[j] = a.end[1] as i64;
            }
            Segment::HelixCw(h) | Segment::HelixCcw(h) => {
                let (i, j) = h.arc.plane.axes();
                model.pos[i] = h.arc.end[0] as i64;
                model.pos[j] = h.arc.end[1] as i64;
                model.pos[h.arc.plane.normal()] = h.lead as i64;
            }
            Segment::BufferMove(m) => {
                for k in 0..prm.dimension as usize {
                    match prm.profile_index(k) {
                        Some(p) if m.axes.has_profile(p) => {
                            model.pos[k] = m.positions[p] as i64;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        self.status.user_seg_num[crd] = segment.seg_num();
    }

    fn respond(&mut self, bytes: &[u8]) -> Result<Vec<u8, FRAME_LEN_MAX>, LinkError> {
        let req = Frame::decode(bytes).map_err(|e| match e {
            WireError::ChecksumMismatch { .. } => LinkError::ChecksumMismatch,
            _ => LinkError::Nak,
        })?;
        if req.header.card_id != self.card_id {
            return Err(LinkError::Timeout);
        }
        let fault = self.faults.pop_front();

        match fault {
            Some(Fault::Nak) => return Err(LinkError::Nak),
            Some(Fault::Disconnect) => return Err(LinkError::Io("simulated disconnect".into())),
            _ => {}
        }

        let replay = match &self.last {
            Some((prev, resp)) if prev.as_slice() == bytes => Some(resp.clone()),
            _ => None,
        };
        let encoded = match replay {
            Some(resp) => {
                self.duplicates += 1;
                trace!(counter = req.header.frame_count, "simulated card: resend answered from cache");
                resp
            }
            None => {
                let mut reply = match fault {
                    Some(Fault::Reject(code)) => req.reply(code),
                    _ => {
                        self.executed += 1;
                        self.execute(&req)
                    }
                };
                reply.seal();
                let encoded = reply.encode().map_err(|e| LinkError::Io(e.to_string()))?;
                self.last = Some((bytes.to_vec(), encoded.clone()));
                encoded
            }
        };

        match fault {
            Some(Fault::Timeout) => Err(LinkError::Timeout),
            Some(Fault::CorruptResponse) => {
                let mut corrupt = encoded;
                if let Some(b) = corrupt.last_mut() {
                    *b ^= 0x01;
                }
                Ok(corrupt)
            }
            _ => Ok(encoded),
        }
    }
}

impl CardLink for SimulatedCard {
    fn send_and_await(&mut self, frame: &[u8]) -> Result<Vec<u8, FRAME_LEN_MAX>, LinkError> {
        self.requests.push(frame.to_vec());
        self.respond(frame)
    }
}

fn parse_records(payload: &[u8]) -> Result<std::vec::Vec<Record>, WireError> {
    let mut r = WireReader::new(payload);
    let mut out = std::vec::Vec::new();
    while !r.is_exhausted() {
        out.push(Segment::decode_record(&mut r)?);
    }
    Ok(out)
}
