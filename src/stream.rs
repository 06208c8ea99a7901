//! Byte stream adapters over the codec
//!
//! `DeflateWriter` compresses everything written to it into an underlying
//! sink; `DeflateReader` decompresses everything read from an underlying
//! source.  Closing the writer (explicitly with `finish`, or by dropping
//! it) drains the encoder, writes the terminating empty stored block, and
//! appends any format footer, so the stream always has an unambiguous end.
//!
//! The module level `compress`/`expand` functions and their slice variants
//! run a whole stream through in one call and report byte counts.
//!
//! `BackgroundReader`/`BackgroundWriter` put an asynchronous begin/end
//! surface over the same synchronous cores by running them on a thread.
//! They refuse a second operation while one is in flight rather than
//! queueing it silently.
//!
//! Optional container framing (e.g. a gzip style wrapper with a checksum)
//! is injected through the `FormatWriter` and `FormatReader` traits; the
//! codec itself stays format agnostic.

use std::io::{Cursor,Read,Write};
use crate::{Options,Error,DYNERR};
use crate::deflate::Deflater;
use crate::inflate::Inflater;
pub use crate::inflate::FormatReader;

/// Container framing hooks for the encoder.
pub trait FormatWriter: Send {
    /// bytes to put in front of the compressed body
    fn header(&mut self) -> Vec<u8>;
    /// observe plaintext in consumption order, e.g. for a running checksum
    fn update(&mut self,data: &[u8]);
    /// bytes to append after the final block
    fn footer(&mut self) -> Vec<u8>;
}

/// Compressing adapter around a byte sink.
pub struct DeflateWriter<W: Write> {
    inner: Option<W>,
    deflater: Deflater,
    format: Option<Box<dyn FormatWriter>>,
    header_written: bool,
    finished: bool,
    total_in: u64,
    total_out: u64
}

impl <W: Write> DeflateWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_options(inner,&crate::STD_OPTIONS)
    }
    pub fn with_options(inner: W,opt: &Options) -> Self {
        Self {
            inner: Some(inner),
            deflater: Deflater::new(opt),
            format: None,
            header_written: false,
            finished: false,
            total_in: 0,
            total_out: 0
        }
    }
    pub fn with_format(inner: W,format: Box<dyn FormatWriter>,opt: &Options) -> Self {
        let mut ans = Self::with_options(inner,opt);
        ans.format = Some(format);
        ans
    }
    /// raw bytes accepted so far
    pub fn total_in(&self) -> u64 {
        self.total_in
    }
    /// compressed bytes handed to the sink so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }
    fn sink(&mut self) -> &mut W {
        self.inner.as_mut().expect("sink is present until into_inner")
    }
    fn write_header_once(&mut self) -> std::io::Result<()> {
        if !self.header_written {
            self.header_written = true;
            if let Some(format) = self.format.as_mut() {
                let header = format.header();
                self.total_out += header.len() as u64;
                self.sink().write_all(&header)?;
            }
        }
        Ok(())
    }
    fn drain(&mut self) -> std::io::Result<()> {
        let bytes = self.deflater.take_output();
        if bytes.len() > 0 {
            self.total_out += bytes.len() as u64;
            self.sink().write_all(&bytes)?;
        }
        Ok(())
    }
    /// Close out the stream: drain the encoder, write the final empty
    /// stored block, append the format footer.  Calling this again (or
    /// dropping the writer afterwards) does nothing.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.write_header_once()?;
        self.deflater.finish();
        self.drain()?;
        if let Some(format) = self.format.as_mut() {
            let footer = format.footer();
            self.total_out += footer.len() as u64;
            self.sink().write_all(&footer)?;
        }
        self.sink().flush()
    }
    /// finish the stream and hand back the sink
    pub fn into_inner(mut self) -> std::io::Result<W> {
        self.finish()?;
        Ok(self.inner.take().expect("sink is present until into_inner"))
    }
}

impl <W: Write> Write for DeflateWriter<W> {
    fn write(&mut self,buf: &[u8]) -> std::io::Result<usize> {
        if self.finished {
            return Err(std::io::Error::new(std::io::ErrorKind::Other,"write to a finished stream"));
        }
        self.write_header_once()?;
        if let Some(format) = self.format.as_mut() {
            format.update(buf);
        }
        self.deflater.deflate(buf);
        self.total_in += buf.len() as u64;
        self.drain()?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.drain()?;
        self.sink().flush()
    }
}

impl <W: Write> Drop for DeflateWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _ = self.finish();
        }
    }
}

/// Decompressing adapter around a byte source.
pub struct DeflateReader<R: Read> {
    inner: R,
    inflater: Inflater,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    total_in: u64,
    total_out: u64
}

impl <R: Read> DeflateReader<R> {
    pub fn new(inner: R) -> Self {
        Self::create(inner,Inflater::new())
    }
    pub fn with_format(inner: R,format: Box<dyn FormatReader>) -> Self {
        Self::create(inner,Inflater::with_format_reader(format))
    }
    fn create(inner: R,inflater: Inflater) -> Self {
        Self {
            inner,
            inflater,
            buf: vec![0;4096],
            start: 0,
            end: 0,
            total_in: 0,
            total_out: 0
        }
    }
    /// compressed bytes consumed so far, trailing bytes that were
    /// buffered but never part of the stream do not count
    pub fn total_in(&self) -> u64 {
        self.total_in
    }
    /// decompressed bytes handed out so far
    pub fn total_out(&self) -> u64 {
        self.total_out
    }
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl <R: Read> Read for DeflateReader<R> {
    fn read(&mut self,out: &mut [u8]) -> std::io::Result<usize> {
        if out.len() == 0 {
            return Ok(0);
        }
        loop {
            let (consumed,written) = self.inflater.inflate(&self.buf[self.start..self.end],out)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData,e))?;
            self.start += consumed;
            self.total_in += consumed as u64;
            if written > 0 {
                self.total_out += written as u64;
                return Ok(written);
            }
            if self.inflater.finished() {
                return Ok(0);
            }
            if self.start == self.end {
                let count = self.inner.read(&mut self.buf)?;
                if count == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData,Error::TruncatedStream));
                }
                self.start = 0;
                self.end = count;
            }
        }
    }
}

/// Asynchronous begin/end surface over `DeflateReader`.  The synchronous
/// core runs on a background thread; only one operation may be in flight,
/// a second `begin_read` fails rather than queueing.
pub struct BackgroundReader<R: Read + Send + 'static> {
    idle: Option<DeflateReader<R>>,
    pending: Option<std::thread::JoinHandle<(DeflateReader<R>,std::io::Result<Vec<u8>>)>>
}

impl <R: Read + Send + 'static> BackgroundReader<R> {
    pub fn new(reader: DeflateReader<R>) -> Self {
        Self {
            idle: Some(reader),
            pending: None
        }
    }
    /// start reading up to `count` decompressed bytes
    pub fn begin_read(&mut self,count: usize) -> Result<(),Error> {
        if self.pending.is_some() {
            return Err(Error::OperationInProgress);
        }
        let mut reader = self.idle.take().expect("reader is idle when nothing is in flight");
        self.pending = Some(std::thread::spawn(move || {
            let mut buf = vec![0;count];
            let ans = match reader.read(&mut buf) {
                Ok(count) => {
                    buf.truncate(count);
                    Ok(buf)
                },
                Err(e) => Err(e)
            };
            (reader,ans)
        }));
        Ok(())
    }
    /// wait for the pending read and take its result, empty means end of stream
    pub fn end_read(&mut self) -> Result<Vec<u8>,DYNERR> {
        let handle = match self.pending.take() {
            Some(handle) => handle,
            None => return Err(Box::new(Error::OperationNotStarted))
        };
        let (reader,ans) = handle.join().expect("background read panicked");
        self.idle = Some(reader);
        Ok(ans?)
    }
    /// take the reader back, fails while an operation is in flight
    pub fn into_inner(mut self) -> Result<DeflateReader<R>,Error> {
        match self.pending.is_some() {
            true => Err(Error::OperationInProgress),
            false => Ok(self.idle.take().expect("reader is idle when nothing is in flight"))
        }
    }
}

/// Asynchronous begin/end surface over `DeflateWriter`, same rules as
/// `BackgroundReader`.
pub struct BackgroundWriter<W: Write + Send + 'static> {
    idle: Option<DeflateWriter<W>>,
    pending: Option<std::thread::JoinHandle<(DeflateWriter<W>,std::io::Result<()>)>>
}

impl <W: Write + Send + 'static> BackgroundWriter<W> {
    pub fn new(writer: DeflateWriter<W>) -> Self {
        Self {
            idle: Some(writer),
            pending: None
        }
    }
    /// start compressing `data` in the background
    pub fn begin_write(&mut self,data: Vec<u8>) -> Result<(),Error> {
        if self.pending.is_some() {
            return Err(Error::OperationInProgress);
        }
        let mut writer = self.idle.take().expect("writer is idle when nothing is in flight");
        self.pending = Some(std::thread::spawn(move || {
            let ans = writer.write_all(&data);
            (writer,ans)
        }));
        Ok(())
    }
    /// wait for the pending write to land in the sink
    pub fn end_write(&mut self) -> Result<(),DYNERR> {
        let handle = match self.pending.take() {
            Some(handle) => handle,
            None => return Err(Box::new(Error::OperationNotStarted))
        };
        let (writer,ans) = handle.join().expect("background write panicked");
        self.idle = Some(writer);
        Ok(ans?)
    }
    /// finish the stream, fails while an operation is in flight
    pub fn finish(&mut self) -> Result<(),DYNERR> {
        match self.idle.as_mut() {
            Some(writer) => Ok(writer.finish()?),
            None => Err(Box::new(Error::OperationInProgress))
        }
    }
    pub fn into_inner(mut self) -> Result<DeflateWriter<W>,Error> {
        match self.pending.is_some() {
            true => Err(Error::OperationInProgress),
            false => Ok(self.idle.take().expect("writer is idle when nothing is in flight"))
        }
    }
}

/// Main compression function.
/// `expanded_in` is an object with the `Read` trait, usually `std::fs::File`, or `std::io::Cursor<&[u8]>`.
/// `compressed_out` is an object with the `Write` trait, usually `std::fs::File`, or `std::io::Cursor<Vec<u8>>`.
/// Returns (in_size,out_size) or error.
pub fn compress<R,W>(expanded_in: &mut R, compressed_out: &mut W, opt: &Options) -> Result<(u64,u64),DYNERR>
where R: Read, W: Write {
    let mut writer = DeflateWriter::with_options(compressed_out,opt);
    let mut buf = [0u8;16384];
    log::debug!("entering loop over input chunks");
    loop {
        match expanded_in.read(&mut buf) {
            Ok(0) => break,
            Ok(count) => writer.write_all(&buf[..count])?,
            Err(e) => return Err(Box::new(e))
        }
    }
    writer.finish()?;
    Ok((writer.total_in(),writer.total_out()))
}

/// Main decompression function.
/// `compressed_in` is an object with the `Read` trait, usually `std::fs::File`, or `std::io::Cursor<&[u8]>`.
/// `expanded_out` is an object with the `Write` trait, usually `std::fs::File`, or `std::io::Cursor<Vec<u8>>`.
/// Returns (in_size,out_size) or error.
pub fn expand<R,W>(compressed_in: &mut R, expanded_out: &mut W) -> Result<(u64,u64),DYNERR>
where R: Read, W: Write {
    let mut reader = DeflateReader::new(compressed_in);
    let mut buf = [0u8;16384];
    log::debug!("entering loop over output chunks");
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(count) => expanded_out.write_all(&buf[..count])?,
            Err(e) => return Err(Box::new(e))
        }
    }
    expanded_out.flush()?;
    Ok((reader.total_in(),reader.total_out()))
}

/// Convenience function, calls `compress` with a slice returning a Vec
pub fn compress_slice(slice: &[u8],opt: &Options) -> Result<Vec<u8>,DYNERR> {
    let mut src = Cursor::new(slice);
    let mut ans: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    compress(&mut src,&mut ans,opt)?;
    Ok(ans.into_inner())
}

/// Convenience function, calls `expand` with a slice returning a Vec
pub fn expand_slice(slice: &[u8]) -> Result<Vec<u8>,DYNERR> {
    let mut src = Cursor::new(slice);
    let mut ans: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    expand(&mut src,&mut ans)?;
    Ok(ans.into_inner())
}

// *************** TESTS *****************

#[cfg(test)]
use crate::STD_OPTIONS;

#[cfg(test)]
fn round_trip(data: &[u8]) {
    let compressed = compress_slice(data,&STD_OPTIONS).expect("compression failed");
    let expanded = expand_slice(&compressed).expect("expansion failed");
    assert_eq!(expanded,data);
}

#[cfg(test)]
fn pseudo_random(count: usize) -> Vec<u8> {
    let mut ans = Vec::new();
    let mut seed = 0x9e3779b97f4a7c15u64;
    while ans.len() < count {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        ans.extend_from_slice(&seed.to_le_bytes());
    }
    ans.truncate(count);
    ans
}

#[test]
fn empty_round_trip() {
    let compressed = compress_slice(&[],&STD_OPTIONS).expect("compression failed");
    assert_eq!(compressed,hex::decode("010000ffff").unwrap());
    assert_eq!(expand_slice(&compressed).expect("expansion failed"),Vec::<u8>::new());
}

#[test]
fn tiny_round_trips() {
    round_trip(b"x");
    round_trip(b"xy");
    round_trip(b"xyz");
    round_trip(b"I am Sam. Sam I am. I do not like this Sam I am.\n");
}

#[test]
fn repetitive_round_trip() {
    let compressed = compress_slice(&[b'A';20],&STD_OPTIONS).expect("compression failed");
    assert!(compressed.len() < 20);
    assert_eq!(expand_slice(&compressed).expect("expansion failed"),vec![b'A';20]);
    round_trip(&[b'B';258]);
    round_trip(&[b'C';259]);
    round_trip("hamlet act one scene one ".repeat(2000).as_bytes());
}

#[test]
fn window_slide_round_trip() {
    // long enough that the matcher window slides several times, with
    // repeats far enough apart to exercise long distances
    let mut data = Vec::new();
    let mut row = 0u32;
    while data.len() < 9000 {
        for i in 0..37 {
            data.push(((row * 29 + i * 11) % 253) as u8);
        }
        row = (row + 1) % 90;
    }
    round_trip(&data);
}

#[test]
fn random_data_round_trip_and_bound() {
    let data = pseudo_random(100000);
    let compressed = compress_slice(&data,&STD_OPTIONS).expect("compression failed");
    // stored fallback keeps the overhead to the block framing
    assert!(compressed.len() < data.len() + data.len() / 500 + 16);
    assert_eq!(expand_slice(&compressed).expect("expansion failed"),data);
}

#[test]
fn mixed_content_round_trip() {
    // compressible text, then random, then text again, across many writes
    let mut data = Vec::new();
    data.extend_from_slice("the quick brown fox jumps over the lazy dog. ".repeat(400).as_bytes());
    data.extend_from_slice(&pseudo_random(30000));
    data.extend_from_slice("pack my box with five dozen liquor jugs. ".repeat(400).as_bytes());
    let mut sink: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    let mut writer = DeflateWriter::new(&mut sink);
    for chunk in data.chunks(1000) {
        writer.write_all(chunk).expect("write failed");
    }
    writer.finish().expect("finish failed");
    drop(writer);
    assert_eq!(expand_slice(&sink.into_inner()).expect("expansion failed"),data);
}

#[test]
fn small_writes_round_trip() {
    // writes below the small data cutoff take the no-probe path
    let mut sink: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    let mut writer = DeflateWriter::new(&mut sink);
    for i in 0..100 {
        let line = format!("log line number {} with some repetition repetition\n",i);
        writer.write_all(line.as_bytes()).expect("write failed");
    }
    writer.finish().expect("finish failed");
    drop(writer);
    let expanded = expand_slice(&sink.into_inner()).expect("expansion failed");
    assert!(String::from_utf8(expanded).unwrap().ends_with("number 99 with some repetition repetition\n"));
}

#[test]
fn finish_is_idempotent() {
    let mut sink: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    let mut writer = DeflateWriter::new(&mut sink);
    writer.write_all(b"some data to finish").expect("write failed");
    writer.finish().expect("finish failed");
    let len_once = writer.total_out();
    writer.finish().expect("finish failed");
    assert_eq!(writer.total_out(),len_once);
    drop(writer);
    assert_eq!(expand_slice(&sink.into_inner()).expect("expansion failed"),b"some data to finish");
}

#[test]
fn drop_finishes_the_stream() {
    let mut sink: Cursor<Vec<u8>> = Cursor::new(Vec::new());
    {
        let mut writer = DeflateWriter::new(&mut sink);
        writer.write_all(b"dropped, not finished").expect("write failed");
    }
    assert_eq!(expand_slice(&sink.into_inner()).expect("expansion failed"),b"dropped, not finished");
}

#[test]
fn write_after_finish_fails() {
    let mut writer = DeflateWriter::new(Cursor::new(Vec::<u8>::new()));
    writer.finish().expect("finish failed");
    assert!(writer.write(b"too late").is_err());
}

#[test]
fn reader_reports_corrupt_stream() {
    // block type bits 11
    let mut reader = DeflateReader::new(Cursor::new(vec![0x07u8,0x00]));
    let mut buf = [0u8;16];
    let err = reader.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(),std::io::ErrorKind::InvalidData);
}

#[test]
fn reader_reports_truncation() {
    let mut compressed = compress_slice(b"truncate me please, somewhere in the middle",&STD_OPTIONS).expect("compression failed");
    compressed.truncate(compressed.len() - 3);
    let mut reader = DeflateReader::new(Cursor::new(compressed));
    let mut ans = Vec::new();
    assert!(reader.read_to_end(&mut ans).is_err());
}

#[test]
fn trailing_bytes_are_left_alone() {
    let mut compressed = compress_slice(b"payload",&STD_OPTIONS).expect("compression failed");
    let stream_len = compressed.len() as u64;
    compressed.extend_from_slice(b"trailing junk");
    let mut reader = DeflateReader::new(Cursor::new(compressed));
    let mut ans = Vec::new();
    reader.read_to_end(&mut ans).expect("expansion failed");
    assert_eq!(ans,b"payload");
    assert_eq!(reader.total_in(),stream_len);
}

#[test]
fn background_read_and_write() {
    let data = b"background data background data background data".to_vec();
    let mut writer = BackgroundWriter::new(DeflateWriter::new(Cursor::new(Vec::<u8>::new())));
    writer.begin_write(data.clone()).expect("begin failed");
    // a second operation on the same instance must be refused
    assert!(matches!(writer.begin_write(data.clone()),Err(Error::OperationInProgress)));
    writer.end_write().expect("end failed");
    writer.finish().expect("finish failed");
    let compressed = writer.into_inner().expect("writer busy")
        .into_inner().expect("finish failed").into_inner();

    let mut reader = BackgroundReader::new(DeflateReader::new(Cursor::new(compressed)));
    assert!(matches!(reader.end_read(),Err(_)));
    let mut ans = Vec::new();
    loop {
        reader.begin_read(16).expect("begin failed");
        assert!(matches!(reader.begin_read(16),Err(Error::OperationInProgress)));
        let piece = reader.end_read().expect("end failed");
        if piece.len() == 0 {
            break;
        }
        ans.extend_from_slice(&piece);
    }
    assert_eq!(ans,data);
}

// A toy container format for exercising the hooks: four magic bytes in
// front, a little endian Adler-32 of the plaintext behind.
#[cfg(test)]
struct ChecksumFormat {
    s1: u32,
    s2: u32,
    stored: Option<u32>
}

#[cfg(test)]
impl ChecksumFormat {
    fn new() -> Self {
        Self { s1: 1, s2: 0, stored: None }
    }
    fn sum(&self) -> u32 {
        self.s2 * 65536 + self.s1
    }
    fn accumulate(&mut self,data: &[u8]) {
        for val in data {
            self.s1 = (self.s1 + *val as u32) % 65521;
            self.s2 = (self.s2 + self.s1) % 65521;
        }
    }
}

#[cfg(test)]
impl FormatWriter for ChecksumFormat {
    fn header(&mut self) -> Vec<u8> {
        b"SFLT".to_vec()
    }
    fn update(&mut self,data: &[u8]) {
        self.accumulate(data);
    }
    fn footer(&mut self) -> Vec<u8> {
        self.sum().to_le_bytes().to_vec()
    }
}

#[cfg(test)]
impl FormatReader for ChecksumFormat {
    fn read_header(&mut self,input: &mut crate::tools::bits::InputBits<'_>) -> Result<bool,Error> {
        if input.available_bytes() < 4 {
            return Ok(false);
        }
        for expected in b"SFLT" {
            if input.next_byte() != Some(*expected) {
                return Err(Error::FileFormatMismatch);
            }
        }
        Ok(true)
    }
    fn update(&mut self,data: &[u8]) {
        self.accumulate(data);
    }
    fn read_footer(&mut self,input: &mut crate::tools::bits::InputBits<'_>) -> Result<bool,Error> {
        input.skip_to_byte_boundary();
        if input.available_bytes() < 4 {
            return Ok(false);
        }
        let mut stored = [0u8;4];
        for i in 0..4 {
            stored[i] = input.next_byte().expect("bytes were available");
        }
        self.stored = Some(u32::from_le_bytes(stored));
        Ok(true)
    }
    fn validate(&self) -> Result<(),Error> {
        match self.stored == Some(self.sum()) {
            true => Ok(()),
            false => Err(Error::FileFormatMismatch)
        }
    }
}

#[test]
fn format_hooks_round_trip() {
    let data = b"checksummed payload, checksummed payload".to_vec();
    let mut writer = DeflateWriter::with_format(Cursor::new(Vec::<u8>::new()),Box::new(ChecksumFormat::new()),&STD_OPTIONS);
    writer.write_all(&data).expect("write failed");
    let framed = writer.into_inner().expect("finish failed").into_inner();
    assert_eq!(&framed[0..4],b"SFLT");

    let mut reader = DeflateReader::with_format(Cursor::new(framed),Box::new(ChecksumFormat::new()));
    let mut ans = Vec::new();
    reader.read_to_end(&mut ans).expect("expansion failed");
    assert_eq!(ans,data);
}

#[test]
fn format_hooks_catch_corruption() {
    let data = b"checksummed payload, checksummed payload".to_vec();
    let mut writer = DeflateWriter::with_format(Cursor::new(Vec::<u8>::new()),Box::new(ChecksumFormat::new()),&STD_OPTIONS);
    writer.write_all(&data).expect("write failed");
    let mut framed = writer.into_inner().expect("finish failed").into_inner();
    let last = framed.len() - 1;
    framed[last] ^= 0xff;
    let mut reader = DeflateReader::with_format(Cursor::new(framed),Box::new(ChecksumFormat::new()));
    let mut ans = Vec::new();
    assert!(reader.read_to_end(&mut ans).is_err());
}
