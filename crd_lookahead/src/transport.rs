//! Request/acknowledge protocol over a card link.
//!
//! Every request gets the next frame counter, is sealed and encoded once,
//! and is resent byte for byte until the card answers or the retry limit is
//! spent. The card recognises a resend by its unchanged counter and replays
//! its previous answer instead of executing twice.

use heapless::Vec;
use tracing::{error, trace, warn};

use crd::consts::FRAME_LEN_MAX;
use crd::crd::prm::CRD_PRM_LEN;
use crd::crd::{AllSysStatus, CrdPrm};
use crd::wire::{Frame, FrameHeader, MsgType, ResultCode, WireError, WireReader, WireWriter};

use crate::error::{LinkError, LookAheadError};

/// A physical connection to one card (serial line, socket, simulator).
pub trait CardLink: Send {
    /// Transmit one encoded frame and wait for the card's reply.
    fn send_and_await(&mut self, frame: &[u8]) -> Result<Vec<u8, FRAME_LEN_MAX>, LinkError>;
}

impl<L: CardLink + ?Sized> CardLink for Box<L> {
    fn send_and_await(&mut self, frame: &[u8]) -> Result<Vec<u8, FRAME_LEN_MAX>, LinkError> {
        (**self).send_and_await(frame)
    }
}

/// Frame-level protocol on top of a [`CardLink`].
#[derive(Debug)]
pub struct FrameTransport<L> {
    link: L,
    card_id: u8,
    counter: u8,
    retry_limit: u8,
}

impl<L: CardLink> FrameTransport<L> {
    pub fn new(link: L, card_id: u8, retry_limit: u8) -> Self {
        Self {
            link,
            card_id,
            counter: 0,
            retry_limit,
        }
    }

    #[inline]
    pub fn card_id(&self) -> u8 {
        self.card_id
    }

    /// Counter of the most recent request.
    #[inline]
    pub fn frame_counter(&self) -> u8 {
        self.counter
    }

    #[inline]
    pub fn retry_limit(&self) -> u8 {
        self.retry_limit
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Send a request and return the card's successful response.
    pub fn send_and_await(&mut self, mut frame: Frame) -> Result<Frame, LookAheadError> {
        self.counter = self.counter.wrapping_add(1);
        frame.header.card_id = self.card_id;
        frame.header.frame_count = self.counter;
        frame.seal();
        let bytes = frame.encode()?;

        let attempts = u32::from(self.retry_limit) + 1;
        let mut last = LookAheadError::TransportTimeout;
        for attempt in 1..=attempts {
            match self.exchange(&frame.header, &bytes) {
                Ok(resp) => {
                    trace!(counter = self.counter, attempt, "frame acknowledged");
                    return Self::check_result(resp);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        counter = self.counter,
                        attempt,
                        of = attempts,
                        error = %e,
                        "card exchange failed, resending"
                    );
                    last = e;
                }
                Err(LookAheadError::LinkFailure { last, .. }) => {
                    error!(counter = self.counter, attempt, error = %last, "card link lost");
                    return Err(LookAheadError::LinkFailure {
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        error!(counter = self.counter, attempts, error = %last, "retries exhausted");
        Err(LookAheadError::LinkFailure {
            attempts,
            last: Box::new(last),
        })
    }

    fn exchange(&mut self, request: &FrameHeader, bytes: &[u8]) -> Result<Frame, LookAheadError> {
        let raw = self.link.send_and_await(bytes)?;
        let resp = Frame::decode(&raw).map_err(|e| match e {
            WireError::ChecksumMismatch { .. } => LookAheadError::ChecksumMismatch,
            _ => LookAheadError::TransportNak,
        })?;
        let h = &resp.header;
        if h.msg_type != request.msg_type
            || h.subtype != request.subtype
            || h.frame_count != request.frame_count
        {
            warn!(
                expected = request.frame_count,
                got = h.frame_count,
                "response does not echo the request"
            );
            return Err(LookAheadError::TransportNak);
        }
        Ok(resp)
    }

    fn check_result(resp: Frame) -> Result<Frame, LookAheadError> {
        match resp.header.result {
            0 => Ok(resp),
            raw => Err(LookAheadError::CardRejected {
                code: ResultCode::from_u8(raw),
                raw,
            }),
        }
    }

    // ─── Messages ───────────────────────────────────────────────────

    /// Download coordinate-system parameters.
    pub fn send_prm(&mut self, crd: usize, prm: &CrdPrm) -> Result<(), LookAheadError> {
        let mut w = WireWriter::<CRD_PRM_LEN>::new();
        prm.encode(&mut w)?;
        let mut frame = Frame::new(self.card_id, MsgType::CrdPrm, 0).with_payload(w.as_slice())?;
        frame.header.crd_mask = crd_bit(crd);
        frame.header.axis_mask = prm.axis_mask();
        self.send_and_await(frame).map(drop)
    }

    /// Discard the card-side FIFO.
    pub fn clear(&mut self, crd: usize, fifo: usize) -> Result<(), LookAheadError> {
        let mut frame = Frame::new(self.card_id, MsgType::CrdClear, fifo as u8);
        frame.header.crd_mask = crd_bit(crd);
        self.send_and_await(frame).map(drop)
    }

    /// Start interpolation on every coordinate system in `crd_mask`.
    pub fn start(&mut self, crd_mask: u8) -> Result<(), LookAheadError> {
        let mut frame = Frame::new(self.card_id, MsgType::CrdStart, 0);
        frame.header.crd_mask = crd_mask;
        self.send_and_await(frame).map(drop)
    }

    /// Send one batch of encoded records to a FIFO.
    pub fn send_records(
        &mut self,
        crd: usize,
        fifo: usize,
        axis_mask: u32,
        records: &[u8],
    ) -> Result<(), LookAheadError> {
        let mut frame =
            Frame::new(self.card_id, MsgType::CrdData, fifo as u8).with_payload(records)?;
        frame.header.crd_mask = crd_bit(crd);
        frame.header.axis_mask = axis_mask;
        self.send_and_await(frame).map(drop)
    }

    pub fn query_status(&mut self) -> Result<AllSysStatus, LookAheadError> {
        let resp = self.send_and_await(Frame::new(self.card_id, MsgType::SysStatus, 0))?;
        Ok(AllSysStatus::decode(&mut WireReader::new(&resp.payload))?)
    }
}

#[inline]
pub(crate) fn crd_bit(crd: usize) -> u8 {
    1u8 << crd
}
