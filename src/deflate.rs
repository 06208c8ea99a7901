//! DEFLATE encoding
//!
//! The encoder drains the sliding window matcher and bit-packs its tokens
//! against the fixed Huffman tables of RFC 1951 (it never builds per-block
//! dynamic tables; the decoder accepts streams from encoders that do).
//! Around that sits a block strategy: compression is tried in bounded
//! probes and whenever a probe makes the data bigger the same bytes are
//! rewritten as stored blocks, so the output can never grow much past the
//! input.  Small writes skip the probing entirely, it costs more than it
//! saves at that size.
//!
//! The stream always ends with an empty stored block carrying the final
//! bit, even when nothing was ever written.

use crate::Options;
use crate::tools::bits::OutputBits;
use crate::tools::huffman::{canonical_codes,END_OF_BLOCK,LENGTH_BASE,LENGTH_EXTRA,DIST_BASE,DIST_EXTRA,STATIC_LITERAL_LENGTHS,STATIC_DISTANCE_LENGTHS};
use crate::matcher::{SlidingWindow,Token,LOOKAHEAD_RESERVE};
use std::sync::OnceLock;

/// largest payload of one stored block
const MAX_STORED_BLOCK: usize = 65531;

/// wire-ready codes for the fixed literal/length alphabet
fn static_literal_codes() -> &'static [u32] {
    static CODES: OnceLock<Vec<u32>> = OnceLock::new();
    CODES.get_or_init(|| canonical_codes(&STATIC_LITERAL_LENGTHS))
}

/// wire-ready codes for the fixed distance alphabet
fn static_distance_codes() -> &'static [u32] {
    static CODES: OnceLock<Vec<u32>> = OnceLock::new();
    CODES.get_or_init(|| canonical_codes(&STATIC_DISTANCE_LENGTHS))
}

/// length code slot for a match length in 3..=258
fn length_slot(length: usize) -> usize {
    const LUT: [u8;259] = {
        let mut lut = [0u8;259];
        let mut len = 3;
        while len <= 258 {
            let mut slot = 28;
            let mut s = 0;
            while s < 28 {
                if len >= LENGTH_BASE[s] as usize && len < LENGTH_BASE[s+1] as usize {
                    slot = s;
                    break;
                }
                s += 1;
            }
            lut[len] = slot as u8;
            len += 1;
        }
        lut
    };
    LUT[length] as usize
}

/// distance code slot for a distance in 1..=32768
fn distance_slot(distance: usize) -> usize {
    match DIST_BASE.binary_search(&(distance as u16)) {
        Ok(slot) => slot,
        Err(slot) => slot - 1
    }
}

/// write raw data as stored blocks (type 00), splitting as needed;
/// `last` marks the final chunk as the end of the whole stream
fn write_stored(out: &mut OutputBits,data: &[u8],last: bool) {
    let mut start = 0;
    loop {
        let end = (start + MAX_STORED_BLOCK).min(data.len());
        let final_chunk = end == data.len();
        out.write_bits(1,(last && final_chunk) as u32);
        out.write_bits(2,0);
        out.pad_to_byte();
        let len = (end - start) as u16;
        out.write_u16(len);
        out.write_u16(!len);
        out.write_bytes(&data[start..end]);
        if final_chunk {
            return;
        }
        start = end;
    }
}

/// Turns matcher tokens into bits of a static Huffman block.
struct MatchEncoder {
    window: SlidingWindow
}

impl MatchEncoder {
    fn new() -> Self {
        Self {
            window: SlidingWindow::new()
        }
    }
    /// open a static block, final bit clear
    fn write_block_header(&self,out: &mut OutputBits) {
        out.write_bits(1,0);
        out.write_bits(2,1);
    }
    /// close the open block with the end-of-block code
    fn write_block_footer(&self,out: &mut OutputBits) {
        self.write_symbol(out,END_OF_BLOCK);
    }
    fn write_symbol(&self,out: &mut OutputBits,symbol: usize) {
        out.write_bits(STATIC_LITERAL_LENGTHS[symbol] as u32,static_literal_codes()[symbol]);
    }
    fn write_match(&self,out: &mut OutputBits,length: usize,distance: usize) {
        let slot = length_slot(length);
        self.write_symbol(out,257 + slot);
        let extra = LENGTH_EXTRA[slot];
        if extra > 0 {
            out.write_bits(extra as u32,(length - LENGTH_BASE[slot] as usize) as u32);
        }
        let slot = distance_slot(distance);
        out.write_bits(STATIC_DISTANCE_LENGTHS[slot] as u32,static_distance_codes()[slot]);
        let extra = DIST_EXTRA[slot];
        if extra > 0 {
            out.write_bits(extra as u32,(distance - DIST_BASE[slot] as usize) as u32);
        }
    }
    fn write_token(&self,out: &mut OutputBits,token: Token) {
        match token {
            Token::Literal(val) => self.write_symbol(out,val as usize),
            Token::Match { length, distance } => self.write_match(out,length as usize,distance as usize),
            Token::LiteralMatch { literal, length, distance } => {
                self.write_symbol(out,literal as usize);
                self.write_match(out,length as usize,distance as usize);
            }
        }
    }
    /// Feed up to `limit` bytes of `input` through the matcher, emitting
    /// symbols into the open block.  A lookahead reserve stays in the
    /// window so matches can extend into input that has not arrived yet,
    /// unless `drain` asks for everything out.  Returns bytes consumed.
    fn compress(&mut self,input: &[u8],out: &mut OutputBits,limit: usize,drain: bool) -> usize {
        let budget = limit.min(input.len());
        let mut consumed = 0;
        loop {
            let take = (budget - consumed).min(self.window.free_space());
            if take > 0 {
                self.window.copy_bytes(&input[consumed..consumed+take]);
                consumed += take;
            }
            let reserve = match drain && consumed == budget {
                true => 0,
                false => LOOKAHEAD_RESERVE
            };
            while self.window.bytes_pending() > reserve {
                let token = self.window.next_token();
                self.write_token(out,token);
            }
            if consumed == budget {
                return consumed;
            }
        }
    }
}

#[derive(Clone,Copy,PartialEq,Debug)]
enum DeflaterState {
    /// no decision made yet about this data
    NotStarted,
    /// ratio went bad mid-block, close the block cleanly
    SlowDownForIncompressible1,
    /// then dump the matcher's held bytes as a stored block
    SlowDownForIncompressible2,
    /// small write arrived, open a block for it
    StartingSmallData,
    /// streaming small writes straight through, no probes
    HandlingSmallData,
    /// compressing, re-checking the ratio on every probe
    CompressThenCheck,
    /// data was incompressible, probe before compressing again
    CheckingForIncompressible
}

/// Top level encoder: decides block by block between compressed and stored
/// output and owns the growing result until the caller drains it.
pub struct Deflater {
    encoder: MatchEncoder,
    out: OutputBits,
    state: DeflaterState,
    block_open: bool,
    finished: bool,
    small_data_cutoff: usize,
    probe_size: usize,
    bad_ratio: f64
}

impl Deflater {
    pub fn new(opt: &Options) -> Self {
        Self {
            encoder: MatchEncoder::new(),
            out: OutputBits::new(),
            state: DeflaterState::NotStarted,
            block_open: false,
            finished: false,
            small_data_cutoff: opt.small_data_cutoff,
            probe_size: opt.probe_size,
            bad_ratio: opt.bad_ratio
        }
    }
    pub fn finished(&self) -> bool {
        self.finished
    }
    /// compressed bytes ready for the sink, leaves partial bits behind
    pub fn take_output(&mut self) -> Vec<u8> {
        self.out.drain()
    }
    fn open_block(&mut self) {
        self.encoder.write_block_header(&mut self.out);
        self.block_open = true;
    }
    fn close_block(&mut self) {
        self.encoder.write_block_footer(&mut self.out);
        self.block_open = false;
    }
    /// compressed/raw ratio since the snapshot is acceptable; probes too
    /// small to judge always pass
    fn ratio_ok(&self,processed0: u64,bits0: u64) -> bool {
        let processed = self.encoder.window.processed() - processed0;
        if (processed as usize) < self.small_data_cutoff {
            return true;
        }
        let out_bytes = (self.out.bits_written() - bits0) as f64 / 8.0;
        out_bytes / processed as f64 <= self.bad_ratio
    }
    /// Consume all of `input`, appending compressed or stored bytes to the
    /// internal buffer.  Compressing arbitrary bytes cannot fail.
    pub fn deflate(&mut self,input: &[u8]) {
        debug_assert!(!self.finished);
        if input.len() > 0 && input.len() < self.small_data_cutoff {
            // probing is not worth it at this size
            match self.state {
                DeflaterState::NotStarted |
                DeflaterState::CheckingForIncompressible => self.state = DeflaterState::StartingSmallData,
                DeflaterState::CompressThenCheck => self.state = DeflaterState::HandlingSmallData,
                _ => {}
            }
        }
        let mut pos = 0;
        loop {
            match self.state {
                DeflaterState::NotStarted |
                DeflaterState::CheckingForIncompressible => {
                    if pos == input.len() {
                        return;
                    }
                    let in_mark = pos;
                    let out_mark = self.out.mark();
                    let bits0 = self.out.bits_written();
                    let processed0 = self.encoder.window.processed();
                    self.open_block();
                    pos += self.encoder.compress(&input[pos..],&mut self.out,self.probe_size,false);
                    if self.ratio_ok(processed0,bits0) {
                        self.state = DeflaterState::CompressThenCheck;
                    } else {
                        log::debug!("probe of {} bytes expanded, storing instead",pos - in_mark);
                        self.out.rewind(out_mark);
                        self.block_open = false;
                        self.encoder.window.flush();
                        write_stored(&mut self.out,&input[in_mark..pos],false);
                        self.state = DeflaterState::CheckingForIncompressible;
                    }
                }
                DeflaterState::CompressThenCheck => {
                    if pos == input.len() {
                        return;
                    }
                    let bits0 = self.out.bits_written();
                    let processed0 = self.encoder.window.processed();
                    pos += self.encoder.compress(&input[pos..],&mut self.out,self.probe_size,false);
                    if !self.ratio_ok(processed0,bits0) {
                        log::debug!("compression ratio went above {}, slowing down",self.bad_ratio);
                        self.state = DeflaterState::SlowDownForIncompressible1;
                    }
                }
                DeflaterState::SlowDownForIncompressible1 => {
                    self.close_block();
                    self.state = DeflaterState::SlowDownForIncompressible2;
                }
                DeflaterState::SlowDownForIncompressible2 => {
                    let history = self.encoder.window.pending_bytes().to_vec();
                    if history.len() > 0 {
                        write_stored(&mut self.out,&history,false);
                    }
                    self.encoder.window.flush();
                    self.state = DeflaterState::CheckingForIncompressible;
                }
                DeflaterState::StartingSmallData => {
                    self.open_block();
                    self.state = DeflaterState::HandlingSmallData;
                }
                DeflaterState::HandlingSmallData => {
                    if pos == input.len() {
                        return;
                    }
                    pos += self.encoder.compress(&input[pos..],&mut self.out,usize::MAX,false);
                }
            }
        }
    }
    /// Drain held input, close any open block, and terminate the stream
    /// with an empty final stored block.  Calling this twice writes the
    /// terminator only once.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        // settle any half-finished fallback transition
        loop {
            match self.state {
                DeflaterState::SlowDownForIncompressible1 => {
                    self.close_block();
                    self.state = DeflaterState::SlowDownForIncompressible2;
                }
                DeflaterState::SlowDownForIncompressible2 => {
                    let history = self.encoder.window.pending_bytes().to_vec();
                    if history.len() > 0 {
                        write_stored(&mut self.out,&history,false);
                    }
                    self.encoder.window.flush();
                    self.state = DeflaterState::CheckingForIncompressible;
                }
                DeflaterState::StartingSmallData => {
                    self.open_block();
                    self.state = DeflaterState::HandlingSmallData;
                }
                _ => break
            }
        }
        if self.encoder.window.bytes_pending() > 0 {
            self.encoder.compress(&[],&mut self.out,0,true);
        }
        if self.block_open {
            self.close_block();
        }
        write_stored(&mut self.out,&[],true);
        self.out.pad_to_byte();
        self.finished = true;
    }
}

// *************** TESTS *****************

#[test]
fn slots() {
    assert_eq!(length_slot(3),0);
    assert_eq!(length_slot(10),7);
    assert_eq!(length_slot(11),8);
    assert_eq!(length_slot(257),27);
    assert_eq!(length_slot(258),28);
    assert_eq!(distance_slot(1),0);
    assert_eq!(distance_slot(4),3);
    assert_eq!(distance_slot(5),4);
    assert_eq!(distance_slot(24576),28);
    assert_eq!(distance_slot(24577),29);
    assert_eq!(distance_slot(32768),29);
}

#[test]
fn empty_stream() {
    // nothing in, just the final empty stored block out
    let mut deflater = Deflater::new(&crate::STD_OPTIONS);
    deflater.finish();
    assert_eq!(deflater.take_output(),hex::decode("010000ffff").unwrap());
}

#[test]
fn finish_twice_is_harmless() {
    let mut deflater = Deflater::new(&crate::STD_OPTIONS);
    deflater.deflate(b"finish me twice");
    deflater.finish();
    let first = deflater.take_output();
    deflater.finish();
    assert_eq!(deflater.take_output().len(),0);
    assert!(first.len() > 0);
}

#[test]
fn repeated_run() {
    // 20 x 'A': header, literal, one match, end of block, terminator
    let mut deflater = Deflater::new(&crate::STD_OPTIONS);
    deflater.deflate(&[b'A';20]);
    deflater.finish();
    let compressed = deflater.take_output();
    assert_eq!(compressed,hex::decode("72c40200010000ffff").unwrap());
    assert!(compressed.len() < 20);
}

#[test]
fn incompressible_data_is_stored() {
    // pseudo random data costs at most the stored framing plus a short
    // expanded tail that was too small to probe
    let mut data = Vec::new();
    let mut seed = 0x2545f4914f6cdd1du64;
    while data.len() < 4096 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        data.extend_from_slice(&seed.to_le_bytes());
    }
    let mut deflater = Deflater::new(&crate::STD_OPTIONS);
    deflater.deflate(&data);
    deflater.finish();
    let compressed = deflater.take_output();
    assert!(compressed.len() < data.len() + 64);
    // the first block must have come out as stored, not huffman
    assert_eq!(compressed[0],0);
}
