//! Assembles discrete access units from an arbitrarily-chunked Annex B
//! elementary stream.
//!
//! The caller feeds byte slices of any framing; the assembler buffers
//! partial NAL units across calls, decides access-unit boundaries from
//! parameter-set and slice-header state, and hands back each finished AU
//! as one owned byte buffer (start codes included).
//!
//! Boundary decisions cannot always wait for a NAL unit's terminating
//! start code: the final slice of a burst has no terminator until more
//! stream arrives, yet its header already says whether it opens a new
//! picture. The assembler therefore parses the still-open tail slice with
//! the zero-extending bit cursor, flushes the previous unit as soon as
//! the header says so, and re-checks once the unit's true extent is
//! known.

use bytes::Bytes;
use log::{debug, warn};

use crate::rbsp::to_rbsp;
use crate::scan::{self, Scan};
use crate::{h264, h265, Codec, DecoderConfig, Error};

/// Outcome of one [AuParser::get_au] call.
#[derive(Debug)]
pub enum Pulled {
    /// A complete access unit; more stream may follow.
    Au(AccessUnit),
    /// No complete access unit yet; feed more input.
    NeedMore,
    /// End of stream. Carries the final access unit when one was pending.
    End(Option<AccessUnit>),
}

/// One access unit: the NAL units of a single coded picture plus its
/// associated non-VCL units, as raw Annex B bytes.
#[derive(Debug)]
pub struct AccessUnit {
    pub data: Bytes,
    /// True when the unit contains an IDR (H.264) or IRAP (H.265) slice.
    pub is_keyframe: bool,
    /// Set on the first access unit after the stream parameters changed.
    pub new_config: Option<DecoderConfig>,
}

enum Tables {
    H264(h264::StreamInfo),
    H265(h265::StreamInfo),
}

/// What has already been decided about the still-open NAL at the end of
/// the stream buffer.
#[derive(Clone, Copy)]
enum TailState {
    /// Nothing yet; the full decision happens when the unit completes.
    Fresh,
    /// The tail is a slice already attributed to the output unit; its
    /// bytes keep accumulating in the stream buffer.
    Vcl {
        /// The previous unit has been flushed on this slice's account.
        flushed: bool,
        /// Whether a slice was buffered when this one was first seen.
        prev_had_slice: bool,
        /// IDR/IRAP marker to apply when the bytes are appended.
        keyframe: bool,
    },
    /// The tail was discarded (pre-SPS slice); drop its bytes.
    Discarded,
}

/// Only the slice-header prefix matters for boundary detection; a slice
/// NAL's payload past this many bytes never affects it.
const SLICE_HEADER_PEEK: usize = 128;

pub struct AuParser {
    tables: Tables,

    /// Stream bytes not yet attributed to an emitted AU, beginning at the
    /// current NAL's start code.
    buf: Vec<u8>,
    /// Length of the start code opening the current NAL.
    cur_sc_len: usize,
    /// Offset in `buf` where the start-code scan resumes.
    scan_from: usize,
    /// First start code seen; before that the input head is validated.
    started: bool,
    tail: TailState,

    /// NAL units of the AU being assembled.
    out: Vec<u8>,
    out_keyframe: bool,
    has_slice: bool,
    have_sps: bool,

    last_config: Option<DecoderConfig>,
    pending_config: Option<DecoderConfig>,
    finished: bool,
}

impl AuParser {
    pub fn new(codec: Codec) -> AuParser {
        AuParser {
            tables: match codec {
                Codec::H264 => Tables::H264(h264::StreamInfo::new()),
                Codec::H265 => Tables::H265(h265::StreamInfo::new()),
            },
            buf: Vec::new(),
            cur_sc_len: 0,
            scan_from: 0,
            started: false,
            tail: TailState::Fresh,
            out: Vec::new(),
            out_keyframe: false,
            has_slice: false,
            have_sps: false,
            last_config: None,
            pending_config: None,
            finished: false,
        }
    }

    /// Appends `input` to the stream and returns at most one finished
    /// access unit. Call with an empty slice to keep draining buffered
    /// data; pass `eos` once the stream has ended to flush the tail.
    pub fn get_au(&mut self, input: &[u8], eos: bool) -> Result<Pulled, Error> {
        if self.finished {
            return Ok(Pulled::End(None));
        }
        if !input.is_empty() {
            self.buf
                .try_reserve(input.len())
                .map_err(|_| Error::Alloc(input.len()))?;
            self.buf.extend_from_slice(input);
        }
        if !self.started {
            match scan::start_code_len(&self.buf, 0) {
                Some(len) => {
                    self.started = true;
                    self.cur_sc_len = len;
                    self.scan_from = len;
                }
                None if self.buf.is_empty() && eos => {
                    self.finished = true;
                    return Ok(Pulled::End(None));
                }
                None if self.buf.len() < 4 && !eos => return Ok(Pulled::NeedMore),
                None => return Err(Error::BadStartCode),
            }
        }
        loop {
            match scan::next_start_code(&self.buf, self.scan_from) {
                Scan::NeedMore(resume) => {
                    if eos {
                        return self.finish();
                    }
                    self.scan_from = std::cmp::max(self.scan_from, resume);
                    if let Some(au) = self.preprocess_tail()? {
                        return Ok(Pulled::Au(au));
                    }
                    return Ok(Pulled::NeedMore);
                }
                Scan::Found(next) => {
                    // buf[..next] is one complete NAL unit, start code
                    // included. Copy it out first so an allocation failure
                    // leaves the stream buffer intact for a retry.
                    let mut nal = Vec::new();
                    nal.try_reserve(next).map_err(|_| Error::Alloc(next))?;
                    nal.extend_from_slice(&self.buf[..next]);
                    let flushed = self.complete_nal(&nal)?;
                    self.buf.drain(..next);
                    self.cur_sc_len = scan::start_code_len(&self.buf, 0)
                        .expect("scanner stopped at a start code");
                    self.scan_from = self.cur_sc_len;
                    if let Some(au) = flushed {
                        return Ok(Pulled::Au(au));
                    }
                }
            }
        }
    }

    /// End of stream: whatever follows the last start code is the final
    /// NAL; after it is handled, the pending unit is emitted as-is.
    fn finish(&mut self) -> Result<Pulled, Error> {
        if !self.buf.is_empty() {
            let mut nal = Vec::new();
            nal.try_reserve(self.buf.len())
                .map_err(|_| Error::Alloc(self.buf.len()))?;
            nal.extend_from_slice(&self.buf);
            let flushed = self.complete_nal(&nal)?;
            self.buf.clear();
            self.scan_from = 0;
            if let Some(au) = flushed {
                // The final unit follows on the next call.
                return Ok(Pulled::Au(au));
            }
        }
        self.finished = true;
        if self.out.is_empty() {
            return Ok(Pulled::End(None));
        }
        let data = std::mem::take(&mut self.out);
        let au = AccessUnit {
            data: Bytes::from(data),
            is_keyframe: std::mem::take(&mut self.out_keyframe),
            new_config: self.pending_config.take(),
        };
        debug!("emitting final {}-byte au", au.data.len());
        Ok(Pulled::End(Some(au)))
    }

    /// Decides what can already be decided about the open tail NAL: a
    /// slice's header is parsed with whatever bytes have arrived, and the
    /// previous access unit is flushed the moment the header signals a
    /// new picture.
    fn preprocess_tail(&mut self) -> Result<Option<AccessUnit>, Error> {
        let header_len = match self.tables {
            Tables::H264(_) => 1,
            Tables::H265(_) => 2,
        };
        if self.buf.len() < self.cur_sc_len + header_len {
            return Ok(None);
        }
        match self.tail {
            TailState::Discarded | TailState::Vcl { flushed: true, .. } => return Ok(None),
            TailState::Fresh | TailState::Vcl { flushed: false, .. } => {}
        }
        let take = std::cmp::min(
            self.buf.len(),
            self.cur_sc_len + header_len + SLICE_HEADER_PEEK,
        );
        let mut prefix = Vec::new();
        prefix.try_reserve(take).map_err(|_| Error::Alloc(take))?;
        prefix.extend_from_slice(&self.buf[..take]);

        let (nal_type, is_slice, is_keyframe) = match self.tables {
            Tables::H264(_) => {
                let t = prefix[self.cur_sc_len] & 0x1f;
                (t, t == h264::NAL_SLICE || t == h264::NAL_IDR, t == h264::NAL_IDR)
            }
            Tables::H265(_) => {
                let t = (prefix[self.cur_sc_len] >> 1) & 0x3f;
                (t, h265::is_supported_slice(t), h265::is_irap(t))
            }
        };
        if !is_slice {
            // Non-slice units wait for their true extent.
            return Ok(None);
        }
        if !self.have_sps {
            if let TailState::Fresh = self.tail {
                warn!("discarding VCL NAL before any valid SPS");
                self.clear_partial_au();
                self.tail = TailState::Discarded;
            }
            return Ok(None);
        }
        let rbsp = to_rbsp(&prefix[self.cur_sc_len + header_len..])?;
        let new_picture = match self.tables {
            Tables::H264(ref t) => {
                let header = match t.parse_slice(&rbsp, prefix[self.cur_sc_len]) {
                    Ok(h) => h,
                    // Not enough of the header yet; decide at completion.
                    Err(_) => return Ok(None),
                };
                t.is_new_picture(&header)
            }
            Tables::H265(ref t) => match h265::SliceHeader::parse(&rbsp, nal_type) {
                Ok(h) => t.is_new_picture(&h),
                Err(_) => return Ok(None),
            },
        };

        match self.tail {
            TailState::Fresh => {
                let prev_had_slice = self.has_slice;
                let au = if prev_had_slice && new_picture {
                    Some(self.flush_open_au())
                } else {
                    None
                };
                self.tail = TailState::Vcl {
                    flushed: au.is_some(),
                    prev_had_slice,
                    keyframe: is_keyframe,
                };
                self.has_slice = true;
                Ok(au)
            }
            TailState::Vcl { flushed: false, prev_had_slice, keyframe } => {
                // A fuller read of the same header may upgrade the verdict.
                if prev_had_slice && new_picture {
                    let au = self.flush_open_au();
                    self.tail = TailState::Vcl { flushed: true, prev_had_slice, keyframe };
                    self.has_slice = true;
                    Ok(Some(au))
                } else {
                    Ok(None)
                }
            }
            _ => unreachable!("filtered above"),
        }
    }

    /// Handles a NAL unit whose full extent is known, honoring any
    /// decisions already made while it was the open tail.
    fn complete_nal(&mut self, nal: &[u8]) -> Result<Option<AccessUnit>, Error> {
        let state = std::mem::replace(&mut self.tail, TailState::Fresh);
        match state {
            TailState::Fresh => self.process_nal(nal),
            TailState::Discarded => Ok(None),
            TailState::Vcl { flushed, prev_had_slice, keyframe } => {
                self.finish_attributed_slice(nal, flushed, prev_had_slice, keyframe)
            }
        }
    }

    /// Re-parses an already-attributed slice with its full bytes, applies
    /// a flush the earlier truncated read missed, and appends the bytes.
    fn finish_attributed_slice(
        &mut self,
        nal: &[u8],
        flushed: bool,
        prev_had_slice: bool,
        keyframe: bool,
    ) -> Result<Option<AccessUnit>, Error> {
        let sc_len = scan::start_code_len(nal, 0).ok_or(Error::BadStartCode)?;
        let (header_len, nal_header) = match self.tables {
            Tables::H264(_) => (1, nal[sc_len]),
            Tables::H265(_) => (2, (nal[sc_len] >> 1) & 0x3f),
        };
        let peek = std::cmp::min(nal.len(), sc_len + header_len + SLICE_HEADER_PEEK);
        let rbsp = to_rbsp(&nal[sc_len + header_len..peek])?;
        let mut flush_now = false;
        match self.tables {
            Tables::H264(ref mut t) => match t.parse_slice(&rbsp, nal_header) {
                Ok(header) => {
                    flush_now = !flushed && prev_had_slice && t.is_new_picture(&header);
                    t.record_slice(header);
                }
                Err(e) => warn!("keeping undecodable slice already attributed: {}", e),
            },
            Tables::H265(ref mut t) => match h265::SliceHeader::parse(&rbsp, nal_header) {
                Ok(header) => {
                    flush_now = !flushed && prev_had_slice && t.is_new_picture(&header);
                    t.record_slice(header);
                }
                Err(e) => warn!("keeping undecodable slice already attributed: {}", e),
            },
        }
        let au = if flush_now {
            Some(self.flush_au(nal)?)
        } else {
            self.append(nal)?;
            None
        };
        self.has_slice = true;
        self.out_keyframe |= keyframe;
        Ok(au)
    }

    /// Handles one complete NAL unit with no prior decisions; returns the
    /// access unit this NAL flushed, if it closed one.
    fn process_nal(&mut self, nal: &[u8]) -> Result<Option<AccessUnit>, Error> {
        let sc_len = scan::start_code_len(nal, 0).ok_or(Error::BadStartCode)?;
        if nal.len() <= sc_len {
            // A bare start code with no header byte; nothing to keep.
            warn!("dropping empty NAL unit");
            return Ok(None);
        }
        match self.tables {
            Tables::H264(_) => self.process_h264_nal(nal, sc_len),
            Tables::H265(_) => self.process_h265_nal(nal, sc_len),
        }
    }

    fn process_h264_nal(&mut self, nal: &[u8], sc_len: usize) -> Result<Option<AccessUnit>, Error> {
        let header = nal[sc_len];
        let nal_type = header & 0x1f;
        let payload = &nal[sc_len + 1..];
        let tables = match self.tables {
            Tables::H264(ref mut t) => t,
            _ => unreachable!(),
        };
        match nal_type {
            h264::NAL_SPS => {
                let rbsp = to_rbsp(payload)?;
                let config = match tables.handle_sps(&rbsp) {
                    Ok(sps) => sps.decoder_config(),
                    Err(e) => {
                        warn!("dropping malformed SPS: {}", e);
                        return Ok(None);
                    }
                };
                let flushed = self.start_new_au_if_open(nal)?;
                self.have_sps = true;
                self.note_config(config);
                Ok(flushed)
            }
            h264::NAL_PPS => {
                let rbsp = to_rbsp(payload)?;
                if let Err(e) = tables.handle_pps(&rbsp) {
                    warn!("dropping malformed PPS: {}", e);
                    return Ok(None);
                }
                self.start_new_au_if_open(nal)
            }
            h264::NAL_SEI | h264::NAL_AUD | h264::NAL_PREFIX => self.start_new_au_if_open(nal),
            h264::NAL_SLICE | h264::NAL_IDR => {
                if !self.have_sps {
                    warn!("discarding VCL NAL before any valid SPS");
                    self.clear_partial_au();
                    return Ok(None);
                }
                let peek = std::cmp::min(payload.len(), SLICE_HEADER_PEEK);
                let rbsp = to_rbsp(&payload[..peek])?;
                let new_picture = match tables.handle_slice(&rbsp, header) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("dropping undecodable slice: {}", e);
                        return Ok(None);
                    }
                };
                let flushed = if self.has_slice && new_picture {
                    Some(self.flush_au(nal)?)
                } else {
                    self.append(nal)?;
                    None
                };
                self.has_slice = true;
                if nal_type == h264::NAL_IDR {
                    self.out_keyframe = true;
                }
                Ok(flushed)
            }
            t if h264::is_vcl(t) => {
                // Slice data partitions carry no boundary signal here.
                if !self.have_sps {
                    warn!("discarding VCL NAL before any valid SPS");
                    self.clear_partial_au();
                    return Ok(None);
                }
                self.append(nal)?;
                self.has_slice = true;
                Ok(None)
            }
            _ => {
                self.append(nal)?;
                Ok(None)
            }
        }
    }

    fn process_h265_nal(&mut self, nal: &[u8], sc_len: usize) -> Result<Option<AccessUnit>, Error> {
        if nal.len() < sc_len + 2 {
            warn!("dropping truncated NAL header");
            return Ok(None);
        }
        let nal_type = (nal[sc_len] >> 1) & 0x3f;
        let payload = &nal[sc_len + 2..];
        let tables = match self.tables {
            Tables::H265(ref mut t) => t,
            _ => unreachable!(),
        };
        match nal_type {
            h265::NAL_VPS => {
                let rbsp = to_rbsp(payload)?;
                if let Err(e) = tables.handle_vps(&rbsp) {
                    warn!("dropping malformed VPS: {}", e);
                    return Ok(None);
                }
                self.start_new_au_if_open(nal)
            }
            h265::NAL_SPS => {
                let rbsp = to_rbsp(payload)?;
                let config = match tables.handle_sps(&rbsp) {
                    Ok(sps) => sps.decoder_config(),
                    Err(e) => {
                        warn!("dropping malformed SPS: {}", e);
                        return Ok(None);
                    }
                };
                self.append(nal)?;
                self.have_sps = true;
                self.note_config(config);
                Ok(None)
            }
            h265::NAL_PPS => {
                let rbsp = to_rbsp(payload)?;
                if let Err(e) = tables.handle_pps(&rbsp) {
                    warn!("dropping malformed PPS: {}", e);
                    return Ok(None);
                }
                self.append(nal)?;
                Ok(None)
            }
            h265::NAL_SEI_PREFIX => self.start_new_au_if_open(nal),
            t if h265::is_supported_slice(t) => {
                if !self.have_sps {
                    warn!("discarding VCL NAL before any valid SPS");
                    self.clear_partial_au();
                    return Ok(None);
                }
                let peek = std::cmp::min(payload.len(), SLICE_HEADER_PEEK);
                let rbsp = to_rbsp(&payload[..peek])?;
                let new_picture = match tables.handle_slice(&rbsp, t) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("dropping undecodable slice segment: {}", e);
                        return Ok(None);
                    }
                };
                let flushed = if self.has_slice && new_picture {
                    Some(self.flush_au(nal)?)
                } else {
                    self.append(nal)?;
                    None
                };
                self.has_slice = true;
                if h265::is_irap(t) {
                    self.out_keyframe = true;
                }
                Ok(flushed)
            }
            t if h265::is_vcl(t) => {
                if !self.have_sps {
                    warn!("discarding VCL NAL before any valid SPS");
                    self.clear_partial_au();
                    return Ok(None);
                }
                self.append(nal)?;
                self.has_slice = true;
                Ok(None)
            }
            _ => {
                self.append(nal)?;
                Ok(None)
            }
        }
    }

    /// For non-VCL AU starters: flushes the open AU when a slice has been
    /// buffered, then begins the next AU with `nal`.
    fn start_new_au_if_open(&mut self, nal: &[u8]) -> Result<Option<AccessUnit>, Error> {
        if self.has_slice {
            Ok(Some(self.flush_au(nal)?))
        } else {
            self.append(nal)?;
            Ok(None)
        }
    }

    /// Emits the buffered AU and starts a fresh one holding `nal`.
    fn flush_au(&mut self, nal: &[u8]) -> Result<AccessUnit, Error> {
        let mut fresh = Vec::new();
        fresh.try_reserve(nal.len()).map_err(|_| Error::Alloc(nal.len()))?;
        fresh.extend_from_slice(nal);
        let data = std::mem::replace(&mut self.out, fresh);
        self.has_slice = false;
        let au = AccessUnit {
            data: Bytes::from(data),
            is_keyframe: std::mem::take(&mut self.out_keyframe),
            new_config: self.pending_config.take(),
        };
        debug!(
            "emitting {}-byte au{}",
            au.data.len(),
            if au.is_keyframe { " (keyframe)" } else { "" }
        );
        Ok(au)
    }

    /// Emits the buffered AU, leaving the next one empty (its first NAL
    /// is the open tail, which joins once its extent is known).
    fn flush_open_au(&mut self) -> AccessUnit {
        let data = std::mem::take(&mut self.out);
        self.has_slice = false;
        let au = AccessUnit {
            data: Bytes::from(data),
            is_keyframe: std::mem::take(&mut self.out_keyframe),
            new_config: self.pending_config.take(),
        };
        debug!(
            "emitting {}-byte au{} at open-tail boundary",
            au.data.len(),
            if au.is_keyframe { " (keyframe)" } else { "" }
        );
        au
    }

    fn append(&mut self, nal: &[u8]) -> Result<(), Error> {
        self.out
            .try_reserve(nal.len())
            .map_err(|_| Error::Alloc(nal.len()))?;
        self.out.extend_from_slice(nal);
        Ok(())
    }

    fn clear_partial_au(&mut self) {
        self.out.clear();
        self.out_keyframe = false;
        self.has_slice = false;
    }

    fn note_config(&mut self, config: DecoderConfig) {
        if self.last_config.as_ref() != Some(&config) {
            debug!("stream configuration changed: {:?}", config);
            self.last_config = Some(config.clone());
            self.pending_config = Some(config);
        }
    }
}
