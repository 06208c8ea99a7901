//! DEFLATE decoding
//!
//! The decoder is a resumable state machine: every call makes whatever
//! progress the available input allows and then reports how much it
//! consumed and produced, without ever blocking.  A multi-bit field is only
//! taken from the bit reader once it is present in full, so being starved
//! mid-field simply leaves the machine parked in the same state for the
//! next call.
//!
//! Unlike the encoder in this crate, which only emits static blocks, the
//! decoder handles all three block types of RFC 1951 including dynamic
//! Huffman tables, so it can expand streams from any conforming encoder.
//! Back references reach up to 32 KiB even though our own matcher stops at
//! 8 KiB.
//!
//! Any bitstream violation poisons the instance: DEFLATE cannot
//! resynchronize after an error, so every later call fails as well.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use crate::Error;
use crate::tools::bits::{InputBits,BitState};
use crate::tools::huffman::*;
use crate::tools::ring_buffer::RingBuffer;

/// farthest back a reference can reach
const MAX_DISTANCE: usize = 32768;
/// extra room so a whole match fits without draining first
const WINDOW_SLACK: usize = MAX_MATCH + 4;
const MAX_MATCH: usize = 258;

#[derive(FromPrimitive,Clone,Copy,PartialEq)]
enum BlockType {
    Stored = 0,
    Static = 1,
    Dynamic = 2
}

#[derive(Clone,Copy,PartialEq,Debug)]
enum InflaterState {
    /// give the format hook a chance to eat its header
    ReadingHeader,
    /// about to read the final-block bit
    ReadingBFinal,
    /// about to read the 2 block type bits
    ReadingBType,
    /// dynamic header: 5 bits of literal code count
    ReadingNumLitCodes,
    /// dynamic header: 5 bits of distance code count
    ReadingNumDistCodes,
    /// dynamic header: 4 bits of code length code count
    ReadingNumCodeLengthCodes,
    /// dynamic header: the 3 bit code length code lengths
    ReadingCodeLengthCodes,
    /// dynamic header: tree codes, at the top of the loop
    ReadingTreeCodesBefore,
    /// dynamic header: tree codes, holding a repeat code short of extra bits
    ReadingTreeCodesAfter,
    /// about to decode a literal or length symbol
    DecodeTop,
    /// have the length code, need its extra bits
    HaveInitialLength,
    /// have the full length, need the distance code
    HaveFullLength,
    /// have the distance code, need its extra bits
    HaveDistCode,
    /// stored block: discard bits to the byte boundary
    UncompressedAligning,
    UncompressedByte1,
    UncompressedByte2,
    UncompressedByte3,
    UncompressedByte4,
    /// stored block: copying the payload through
    DecodingUncompressed,
    /// final block done, the format hook may eat a footer
    StartReadingFooter,
    ReadingFooter,
    /// footer read, success reported once the window is drained and checked
    VerifyingFooter,
    Done
}

/// Container framing hooks for the decoder, modeling gzip-style wrappers
/// without baking any particular one into the codec.  `read_header` and
/// `read_footer` return `Ok(false)` when they need more input; whether the
/// footer starts on a byte boundary is the implementation's own business
/// (`InputBits::skip_to_byte_boundary` is available to it).
pub trait FormatReader: Send {
    fn read_header(&mut self,input: &mut InputBits<'_>) -> Result<bool,Error>;
    /// observe plaintext in production order, e.g. for a running checksum
    fn update(&mut self,data: &[u8]);
    fn read_footer(&mut self,input: &mut InputBits<'_>) -> Result<bool,Error>;
    /// final verdict once the footer has been read and all data handed over
    fn validate(&self) -> Result<(),Error>;
}

/// Ring of the last 32 KiB produced, serving both back references and the
/// hand-off of finished bytes to the caller.
pub struct OutputWindow {
    ring: RingBuffer<u8>,
    /// produced but not yet handed to the caller
    bytes_used: usize,
    /// lifetime total, bounds how far back a reference may reach
    total: u64
}

impl OutputWindow {
    pub fn new() -> Self {
        Self {
            ring: RingBuffer::create(0,MAX_DISTANCE + WINDOW_SLACK),
            bytes_used: 0,
            total: 0
        }
    }
    pub fn write_byte(&mut self,val: u8) {
        self.ring.set(0,val);
        self.ring.advance();
        self.bytes_used += 1;
        self.total += 1;
    }
    /// The defining LZ77 copy: `length` bytes from `distance` behind the
    /// cursor, one at a time since the ranges may overlap.
    pub fn write_length_distance(&mut self,length: usize,distance: usize) -> Result<(),Error> {
        if distance == 0 || distance > MAX_DISTANCE || distance as u64 > self.total {
            log::error!("back reference of {} reaches outside the window",distance);
            return Err(Error::InvalidData);
        }
        for _i in 0..length {
            let val = self.ring.get(-(distance as i64));
            self.write_byte(val);
        }
        Ok(())
    }
    /// verbatim bytes of a stored block, limited by free space and input
    pub fn copy_from(&mut self,input: &mut InputBits,length: usize) -> usize {
        let mut copied = 0;
        while copied < length && self.free_bytes() > 0 {
            match input.next_byte() {
                Some(val) => {
                    self.write_byte(val);
                    copied += 1;
                },
                None => break
            }
        }
        copied
    }
    /// bytes waiting to be handed to the caller
    pub fn available_bytes(&self) -> usize {
        self.bytes_used
    }
    pub fn free_bytes(&self) -> usize {
        self.ring.len() - self.bytes_used
    }
    /// hand decompressed bytes to the caller in production order
    pub fn copy_to(&mut self,out: &mut [u8]) -> usize {
        let count = out.len().min(self.bytes_used);
        for i in 0..count {
            out[i] = self.ring.get(i as i64 - self.bytes_used as i64);
        }
        self.bytes_used -= count;
        count
    }
}

/// The decompressor proper.  Owns its output window for life; input is
/// borrowed per call.
pub struct Inflater {
    output: OutputWindow,
    bits: BitState,
    state: InflaterState,
    failed: bool,
    bfinal: bool,
    block_type: BlockType,
    // stored block header bytes as they trickle in
    stored_header: [u8;4],
    block_length: usize,
    // dynamic header scratch, all persisted so any state can resume
    literal_length_code_count: usize,
    distance_code_count: usize,
    code_length_code_count: usize,
    code_length_tree_lengths: [u8;19],
    code_list: [u8;320],
    code_array_size: usize,
    loop_counter: usize,
    length_code: usize,
    code_length_tree: Option<HuffmanTree>,
    // decode state
    literal_length_tree: Option<HuffmanTree>,
    distance_tree: Option<HuffmanTree>,
    length: usize,
    distance_code: usize,
    format_reader: Option<Box<dyn FormatReader>>
}

impl Inflater {
    pub fn new() -> Self {
        Self::create(None)
    }
    /// decoder that defers to a format hook for container header and footer
    pub fn with_format_reader(reader: Box<dyn FormatReader>) -> Self {
        Self::create(Some(reader))
    }
    fn create(format_reader: Option<Box<dyn FormatReader>>) -> Self {
        Self {
            output: OutputWindow::new(),
            bits: BitState::default(),
            state: match format_reader.is_some() {
                true => InflaterState::ReadingHeader,
                false => InflaterState::ReadingBFinal
            },
            failed: false,
            bfinal: false,
            block_type: BlockType::Stored,
            stored_header: [0;4],
            block_length: 0,
            literal_length_code_count: 0,
            distance_code_count: 0,
            code_length_code_count: 0,
            code_length_tree_lengths: [0;19],
            code_list: [0;320],
            code_array_size: 0,
            loop_counter: 0,
            length_code: 0,
            code_length_tree: None,
            literal_length_tree: None,
            distance_tree: None,
            length: 0,
            distance_code: 0,
            format_reader
        }
    }
    pub fn finished(&self) -> bool {
        self.state == InflaterState::Done
    }
    /// Drive the state machine with whatever is available.  Returns
    /// (bytes consumed, bytes written).  Returning (0,0) before `finished`
    /// means more input is needed.  A malformed stream fails this and every
    /// subsequent call.
    pub fn inflate(&mut self,input: &[u8],out: &mut [u8]) -> Result<(usize,usize),Error> {
        if self.failed {
            return Err(Error::InvalidData);
        }
        let mut bits = InputBits::resume(input,self.bits);
        let result = self.run(&mut bits,out);
        self.bits = bits.suspend();
        let mut consumed = bits.bytes_consumed();
        if self.finished() {
            // whole bytes the register read ahead were never part of the stream
            consumed -= bits.unused_whole_bytes().min(consumed);
            self.bits = BitState::default();
        }
        match result {
            Ok(written) => Ok((consumed,written)),
            Err(e) => {
                log::error!("stream is corrupt: {}",e);
                self.failed = true;
                Err(e)
            }
        }
    }
    fn run(&mut self,bits: &mut InputBits,out: &mut [u8]) -> Result<usize,Error> {
        let mut written = 0;
        let mut need_input = false;
        loop {
            let count = self.output.copy_to(&mut out[written..]);
            if count > 0 {
                if let Some(reader) = self.format_reader.as_mut() {
                    reader.update(&out[written..written+count]);
                }
                written += count;
            }
            if written == out.len() || self.finished() || need_input {
                break;
            }
            need_input = !self.decode(bits)?;
        }
        // success is only reported after the footer, if any, checks out
        if self.state == InflaterState::VerifyingFooter && self.output.available_bytes() == 0 {
            if let Some(reader) = self.format_reader.as_ref() {
                reader.validate()?;
            }
            self.state = InflaterState::Done;
        }
        Ok(written)
    }
    /// One pass at the state machine, `Ok(false)` when input ran dry.
    fn decode(&mut self,bits: &mut InputBits) -> Result<bool,Error> {
        if let Some(reader) = self.format_reader.as_mut() {
            match self.state {
                InflaterState::ReadingHeader => {
                    if !reader.read_header(bits)? {
                        return Ok(false);
                    }
                    self.state = InflaterState::ReadingBFinal;
                },
                InflaterState::StartReadingFooter |
                InflaterState::ReadingFooter => {
                    self.state = InflaterState::ReadingFooter;
                    if !reader.read_footer(bits)? {
                        return Ok(false);
                    }
                    self.state = InflaterState::VerifyingFooter;
                    return Ok(true);
                },
                InflaterState::VerifyingFooter => {
                    // waiting for the window to drain, nothing to decode
                    return Ok(false);
                },
                _ => {}
            }
        }
        if self.state == InflaterState::ReadingBFinal {
            match bits.get_bits(1) {
                None => return Ok(false),
                Some(val) => {
                    self.bfinal = val == 1;
                    self.state = InflaterState::ReadingBType;
                }
            }
        }
        if self.state == InflaterState::ReadingBType {
            let val = match bits.get_bits(2) {
                None => return Ok(false),
                Some(val) => val
            };
            self.block_type = match BlockType::from_u32(val) {
                Some(block_type) => block_type,
                None => {
                    log::error!("block type {} is not defined",val);
                    return Err(Error::UnknownBlockType);
                }
            };
            match self.block_type {
                BlockType::Dynamic => self.state = InflaterState::ReadingNumLitCodes,
                BlockType::Static => {
                    self.literal_length_tree = Some(static_literal_tree().clone());
                    self.distance_tree = Some(static_distance_tree().clone());
                    self.state = InflaterState::DecodeTop;
                },
                BlockType::Stored => self.state = InflaterState::UncompressedAligning
            }
        }
        if self.block_type == BlockType::Dynamic && matches!(self.state,
            InflaterState::ReadingNumLitCodes |
            InflaterState::ReadingNumDistCodes |
            InflaterState::ReadingNumCodeLengthCodes |
            InflaterState::ReadingCodeLengthCodes |
            InflaterState::ReadingTreeCodesBefore |
            InflaterState::ReadingTreeCodesAfter) {
            if !self.decode_dynamic_header(bits)? {
                return Ok(false);
            }
        }
        let (can_continue,end_of_block) = match self.block_type {
            BlockType::Stored => self.decode_stored(bits)?,
            _ => self.decode_block(bits)?
        };
        if end_of_block && self.bfinal {
            self.state = match self.format_reader.is_some() {
                true => InflaterState::StartReadingFooter,
                false => InflaterState::Done
            };
        }
        Ok(can_continue)
    }
    /// The dynamic block header: two code counts, the code length alphabet's
    /// own little table, then the run length coded code lengths of the
    /// literal and distance tables.
    fn decode_dynamic_header(&mut self,bits: &mut InputBits) -> Result<bool,Error> {
        loop {
            match self.state {
                InflaterState::ReadingNumLitCodes => {
                    match bits.get_bits(5) {
                        None => return Ok(false),
                        Some(val) => {
                            self.literal_length_code_count = val as usize + 257;
                            self.state = InflaterState::ReadingNumDistCodes;
                        }
                    }
                },
                InflaterState::ReadingNumDistCodes => {
                    match bits.get_bits(5) {
                        None => return Ok(false),
                        Some(val) => {
                            self.distance_code_count = val as usize + 1;
                            self.state = InflaterState::ReadingNumCodeLengthCodes;
                        }
                    }
                },
                InflaterState::ReadingNumCodeLengthCodes => {
                    match bits.get_bits(4) {
                        None => return Ok(false),
                        Some(val) => {
                            self.code_length_code_count = val as usize + 4;
                            self.loop_counter = 0;
                            self.state = InflaterState::ReadingCodeLengthCodes;
                        }
                    }
                },
                InflaterState::ReadingCodeLengthCodes => {
                    while self.loop_counter < self.code_length_code_count {
                        match bits.get_bits(3) {
                            None => return Ok(false),
                            Some(val) => {
                                self.code_length_tree_lengths[CODE_LENGTH_ORDER[self.loop_counter]] = val as u8;
                                self.loop_counter += 1;
                            }
                        }
                    }
                    for i in self.code_length_code_count..CODE_LENGTH_ORDER.len() {
                        self.code_length_tree_lengths[CODE_LENGTH_ORDER[i]] = 0;
                    }
                    self.code_length_tree = Some(HuffmanTree::new(&self.code_length_tree_lengths)?);
                    self.code_array_size = self.literal_length_code_count + self.distance_code_count;
                    self.loop_counter = 0;
                    self.state = InflaterState::ReadingTreeCodesBefore;
                },
                InflaterState::ReadingTreeCodesBefore |
                InflaterState::ReadingTreeCodesAfter => {
                    while self.loop_counter < self.code_array_size {
                        if self.state == InflaterState::ReadingTreeCodesBefore {
                            // set when ReadingCodeLengthCodes completed
                            let tree = self.code_length_tree.as_ref().expect("tree was built");
                            match tree.next_symbol(bits)? {
                                None => return Ok(false),
                                Some(symbol) => self.length_code = symbol as usize
                            }
                        }
                        if self.length_code <= 15 {
                            self.code_list[self.loop_counter] = self.length_code as u8;
                            self.loop_counter += 1;
                        } else {
                            let repeat = match self.length_code {
                                16 => match bits.get_bits(2) {
                                    None => {
                                        self.state = InflaterState::ReadingTreeCodesAfter;
                                        return Ok(false);
                                    },
                                    Some(val) => val as usize + 3
                                },
                                17 => match bits.get_bits(3) {
                                    None => {
                                        self.state = InflaterState::ReadingTreeCodesAfter;
                                        return Ok(false);
                                    },
                                    Some(val) => val as usize + 3
                                },
                                _ => match bits.get_bits(7) {
                                    None => {
                                        self.state = InflaterState::ReadingTreeCodesAfter;
                                        return Ok(false);
                                    },
                                    Some(val) => val as usize + 11
                                }
                            };
                            if self.length_code == 16 && self.loop_counter == 0 {
                                log::error!("repeat code with nothing to repeat");
                                return Err(Error::InvalidData);
                            }
                            if self.loop_counter + repeat > self.code_array_size {
                                log::error!("repeat runs past the declared code count");
                                return Err(Error::InvalidData);
                            }
                            let fill = match self.length_code {
                                16 => self.code_list[self.loop_counter - 1],
                                _ => 0
                            };
                            for _i in 0..repeat {
                                self.code_list[self.loop_counter] = fill;
                                self.loop_counter += 1;
                            }
                        }
                        self.state = InflaterState::ReadingTreeCodesBefore;
                    }
                    let mut literal_lengths = [0u8;288];
                    literal_lengths[..self.literal_length_code_count]
                        .copy_from_slice(&self.code_list[..self.literal_length_code_count]);
                    if literal_lengths[END_OF_BLOCK] == 0 {
                        log::error!("dynamic block has no end-of-block code");
                        return Err(Error::InvalidHuffmanData);
                    }
                    let mut distance_lengths = [0u8;32];
                    distance_lengths[..self.distance_code_count]
                        .copy_from_slice(&self.code_list[self.literal_length_code_count..self.code_array_size]);
                    self.literal_length_tree = Some(HuffmanTree::new(&literal_lengths)?);
                    self.distance_tree = Some(HuffmanTree::new(&distance_lengths)?);
                    self.state = InflaterState::DecodeTop;
                    return Ok(true);
                },
                _ => {
                    log::error!("decoder state {:?} does not belong to the header",self.state);
                    return Err(Error::InvalidData);
                }
            }
        }
    }
    /// Decode literals and back references until the block ends, the input
    /// runs dry, or the window gets too full to hold another match.
    fn decode_block(&mut self,bits: &mut InputBits) -> Result<(bool,bool),Error> {
        let mut free = self.output.free_bytes();
        while free > MAX_MATCH {
            match self.state {
                InflaterState::DecodeTop => {
                    // set when the block header was read
                    let tree = self.literal_length_tree.as_ref().expect("tree was built");
                    let symbol = match tree.next_symbol(bits)? {
                        None => return Ok((false,false)),
                        Some(symbol) => symbol as usize
                    };
                    if symbol < END_OF_BLOCK {
                        self.output.write_byte(symbol as u8);
                        free -= 1;
                    } else if symbol == END_OF_BLOCK {
                        self.state = InflaterState::ReadingBFinal;
                        return Ok((true,true));
                    } else {
                        let slot = symbol - 257;
                        if slot >= LENGTH_BASE.len() {
                            log::error!("length code {} is not defined",symbol);
                            return Err(Error::InvalidData);
                        }
                        self.length_code = slot;
                        self.state = InflaterState::HaveInitialLength;
                    }
                },
                InflaterState::HaveInitialLength => {
                    let extra = LENGTH_EXTRA[self.length_code] as u32;
                    self.length = match extra {
                        0 => LENGTH_BASE[self.length_code] as usize,
                        _ => match bits.get_bits(extra) {
                            None => return Ok((false,false)),
                            Some(val) => LENGTH_BASE[self.length_code] as usize + val as usize
                        }
                    };
                    self.state = InflaterState::HaveFullLength;
                },
                InflaterState::HaveFullLength => {
                    // set when the block header was read
                    let tree = self.distance_tree.as_ref().expect("tree was built");
                    let symbol = match tree.next_symbol(bits)? {
                        None => return Ok((false,false)),
                        Some(symbol) => symbol as usize
                    };
                    if symbol >= DIST_BASE.len() {
                        log::error!("distance code {} is not defined",symbol);
                        return Err(Error::InvalidData);
                    }
                    self.distance_code = symbol;
                    self.state = InflaterState::HaveDistCode;
                },
                InflaterState::HaveDistCode => {
                    let extra = DIST_EXTRA[self.distance_code] as u32;
                    let distance = match extra {
                        0 => DIST_BASE[self.distance_code] as usize,
                        _ => match bits.get_bits(extra) {
                            None => return Ok((false,false)),
                            Some(val) => DIST_BASE[self.distance_code] as usize + val as usize
                        }
                    };
                    self.output.write_length_distance(self.length,distance)?;
                    free -= self.length;
                    self.state = InflaterState::DecodeTop;
                },
                _ => {
                    log::error!("decoder state {:?} does not belong to a block body",self.state);
                    return Err(Error::InvalidData);
                }
            }
        }
        Ok((true,false))
    }
    /// Stored block: align, check the length against its complement, then
    /// pass the payload through untouched.
    fn decode_stored(&mut self,bits: &mut InputBits) -> Result<(bool,bool),Error> {
        if self.state == InflaterState::UncompressedAligning {
            bits.skip_to_byte_boundary();
            self.state = InflaterState::UncompressedByte1;
        }
        loop {
            let val = match self.state {
                InflaterState::DecodingUncompressed => {
                    let copied = self.output.copy_from(bits,self.block_length);
                    self.block_length -= copied;
                    if self.block_length == 0 {
                        self.state = InflaterState::ReadingBFinal;
                        return Ok((true,true));
                    }
                    // stalled on either input or a full window
                    return Ok((self.output.free_bytes() == 0,false));
                },
                _ => match bits.get_bits(8) {
                    None => return Ok((false,false)),
                    Some(val) => val as u8
                }
            };
            match self.state {
                InflaterState::UncompressedByte1 => {
                    self.stored_header[0] = val;
                    self.state = InflaterState::UncompressedByte2;
                },
                InflaterState::UncompressedByte2 => {
                    self.stored_header[1] = val;
                    self.state = InflaterState::UncompressedByte3;
                },
                InflaterState::UncompressedByte3 => {
                    self.stored_header[2] = val;
                    self.state = InflaterState::UncompressedByte4;
                },
                InflaterState::UncompressedByte4 => {
                    self.stored_header[3] = val;
                    let length = u16::from_le_bytes([self.stored_header[0],self.stored_header[1]]);
                    let check = u16::from_le_bytes([self.stored_header[2],self.stored_header[3]]);
                    if length != !check {
                        log::error!("stored block length {} does not match its complement",length);
                        return Err(Error::InvalidBlockLength);
                    }
                    self.block_length = length as usize;
                    self.state = InflaterState::DecodingUncompressed;
                },
                _ => {
                    log::error!("decoder state {:?} does not belong to a stored block",self.state);
                    return Err(Error::InvalidData);
                }
            }
        }
    }
}

// *************** TESTS *****************

#[cfg(test)]
use crate::tools::bits::OutputBits;

#[cfg(test)]
fn inflate_all(data: &[u8]) -> Result<Vec<u8>,Error> {
    let mut inflater = Inflater::new();
    let mut ans = Vec::new();
    let mut buf = [0u8;4096];
    let mut pos = 0;
    loop {
        let (consumed,written) = inflater.inflate(&data[pos..],&mut buf)?;
        pos += consumed;
        ans.extend_from_slice(&buf[..written]);
        if inflater.finished() && written == 0 {
            return Ok(ans);
        }
        if written == 0 && consumed == 0 {
            return Err(Error::TruncatedStream);
        }
    }
}

#[test]
fn stored_round_trip() {
    // one stored block written by hand: final, length 5
    let mut data = hex::decode("010500faff").unwrap();
    data.extend_from_slice(b"hello");
    assert_eq!(inflate_all(&data).expect("inflate failed"),b"hello");
}

#[test]
fn static_block_run() {
    // literal then a distance 1 match of 258 makes 259 copies
    let codes = canonical_codes(&STATIC_LITERAL_LENGTHS);
    let dcodes = canonical_codes(&STATIC_DISTANCE_LENGTHS);
    let mut out = OutputBits::new();
    out.write_bits(1,1);
    out.write_bits(2,1);
    let q = b'Q' as usize;
    out.write_bits(STATIC_LITERAL_LENGTHS[q] as u32,codes[q]);
    out.write_bits(STATIC_LITERAL_LENGTHS[285] as u32,codes[285]); // length 258
    out.write_bits(STATIC_DISTANCE_LENGTHS[0] as u32,dcodes[0]);  // distance 1
    out.write_bits(STATIC_LITERAL_LENGTHS[END_OF_BLOCK] as u32,codes[END_OF_BLOCK]);
    out.pad_to_byte();
    let expanded = inflate_all(&out.drain()).expect("inflate failed");
    assert_eq!(expanded,vec![b'Q';259]);
}

#[test]
fn long_distance_reference() {
    // a 300 byte repeat of data 10000 bytes back, farther than our own
    // matcher reaches but well within the decoder's 32 KiB window
    let codes = canonical_codes(&STATIC_LITERAL_LENGTHS);
    let dcodes = canonical_codes(&STATIC_DISTANCE_LENGTHS);
    let mut out = OutputBits::new();
    out.write_bits(1,1);
    out.write_bits(2,1);
    let mut expected = Vec::new();
    for i in 0..10000 {
        let sym = ((i * 7 + 13) % 256) as usize;
        out.write_bits(STATIC_LITERAL_LENGTHS[sym] as u32,codes[sym]);
        expected.push(sym as u8);
    }
    // 300 = 258 + 42, both at distance 10000 (slot 26, 12 extra bits)
    out.write_bits(STATIC_LITERAL_LENGTHS[285] as u32,codes[285]);
    out.write_bits(STATIC_DISTANCE_LENGTHS[26] as u32,dcodes[26]);
    out.write_bits(12,(10000 - DIST_BASE[26] as usize) as u32);
    out.write_bits(STATIC_LITERAL_LENGTHS[273] as u32,codes[273]); // length base 35
    out.write_bits(3,42 - 35);
    out.write_bits(STATIC_DISTANCE_LENGTHS[26] as u32,dcodes[26]);
    out.write_bits(12,(10000 - DIST_BASE[26] as usize) as u32);
    out.write_bits(STATIC_LITERAL_LENGTHS[END_OF_BLOCK] as u32,codes[END_OF_BLOCK]);
    out.pad_to_byte();
    for i in 0..300 {
        expected.push(expected[i]);
    }
    let expanded = inflate_all(&out.drain()).expect("inflate failed");
    assert_eq!(expanded,expected);
}

#[cfg(test)]
fn dynamic_block_bytes() -> Vec<u8> {
    // hand built dynamic block for "abb": literal tree has 'a' at 1 bit,
    // 'b' and end-of-block at 2 bits; the single distance code is unused
    let mut out = OutputBits::new();
    out.write_bits(1,1);
    out.write_bits(2,2);
    out.write_bits(5,0);  // 257 literal codes
    out.write_bits(5,0);  // 1 distance code
    out.write_bits(4,14); // 18 code length codes
    // code length alphabet: symbols 0,1,2,18 all get 2 bit codes
    let mut cl_lengths = [0u8;19];
    for sym in [0usize,1,2,18] {
        cl_lengths[sym] = 2;
    }
    for i in 0..18 {
        out.write_bits(3,cl_lengths[CODE_LENGTH_ORDER[i]] as u32);
    }
    let cl_codes = canonical_codes(&cl_lengths);
    let mut put = |out: &mut OutputBits,sym: usize| out.write_bits(2,cl_codes[sym]);
    // 97 zeros, then length 1 for 'a', 2 for 'b'
    put(&mut out,18);
    out.write_bits(7,97 - 11);
    put(&mut out,1);
    put(&mut out,2);
    // 157 zeros to reach symbol 256, sent as 138 + 19
    put(&mut out,18);
    out.write_bits(7,138 - 11);
    put(&mut out,18);
    out.write_bits(7,19 - 11);
    put(&mut out,2); // end of block gets 2 bits
    put(&mut out,0); // the lone distance code is absent
    // data: a=0, b=10, b, end of block=11 (codes written reversed)
    let lit_lengths = {
        let mut lengths = [0u8;288];
        lengths[97] = 1;
        lengths[98] = 2;
        lengths[256] = 2;
        lengths
    };
    let lit_codes = canonical_codes(&lit_lengths);
    out.write_bits(1,lit_codes[97]);
    out.write_bits(2,lit_codes[98]);
    out.write_bits(2,lit_codes[98]);
    out.write_bits(2,lit_codes[256]);
    out.pad_to_byte();
    out.drain()
}

#[test]
fn dynamic_block() {
    let expanded = inflate_all(&dynamic_block_bytes()).expect("inflate failed");
    assert_eq!(expanded,b"abb");
}

#[test]
fn dynamic_block_one_byte_at_a_time() {
    // every state must suspend and resume cleanly
    let data = dynamic_block_bytes();
    let mut inflater = Inflater::new();
    let mut ans = Vec::new();
    let mut buf = [0u8;16];
    for i in 0..data.len() {
        let mut piece = &data[i..i+1];
        loop {
            let (consumed,written) = inflater.inflate(piece,&mut buf).expect("inflate failed");
            ans.extend_from_slice(&buf[..written]);
            piece = &piece[consumed..];
            if piece.len() == 0 && written == 0 {
                break;
            }
        }
    }
    assert!(inflater.finished());
    assert_eq!(ans,b"abb");
}

#[test]
fn reserved_block_type_fails() {
    // type bits 11
    let result = inflate_all(&[0x07,0x00]);
    assert!(matches!(result,Err(Error::UnknownBlockType)));
}

#[test]
fn stored_length_mismatch_fails() {
    let result = inflate_all(&[0x01,0x05,0x00,0x00,0x00]);
    assert!(matches!(result,Err(Error::InvalidBlockLength)));
}

#[test]
fn corrupt_instance_stays_failed() {
    let mut inflater = Inflater::new();
    let mut buf = [0u8;16];
    assert!(inflater.inflate(&[0x07,0x00],&mut buf).is_err());
    assert!(inflater.inflate(&[0x01,0x00],&mut buf).is_err());
}

#[test]
fn distance_before_start_fails() {
    // first symbol is already a back reference, there is nothing to copy
    let codes = canonical_codes(&STATIC_LITERAL_LENGTHS);
    let dcodes = canonical_codes(&STATIC_DISTANCE_LENGTHS);
    let mut out = OutputBits::new();
    out.write_bits(1,1);
    out.write_bits(2,1);
    out.write_bits(STATIC_LITERAL_LENGTHS[257] as u32,codes[257]); // length 3
    out.write_bits(STATIC_DISTANCE_LENGTHS[0] as u32,dcodes[0]);  // distance 1
    out.pad_to_byte();
    let result = inflate_all(&out.drain());
    assert!(matches!(result,Err(Error::InvalidData)));
}
