//! Ring buffer for LZ type decoding windows
use num_traits::PrimInt;

pub struct RingBuffer<T: PrimInt> {
    buf: Vec<T>,
    pos: usize,
    n: usize
}

impl <T: PrimInt> RingBuffer<T> {
    pub fn create(fill: T,n: usize) -> Self {
        Self {
            buf: vec![fill;n],
            pos: 0,
            n
        }
    }
    /// capacity of the ring
    pub fn len(&self) -> usize {
        self.n
    }
    /// get absolute position of cursor + offset
    pub fn get_pos(&self,offset: i64) -> usize {
        (self.pos as i64 + offset).rem_euclid(self.n as i64) as usize
    }
    /// set absolute position of cursor
    pub fn set_pos(&mut self,pos: usize) {
        self.pos = pos % self.n;
    }
    /// get value at cursor + offset
    pub fn get(&self,offset: i64) -> T {
        self.buf[(self.pos as i64 + offset).rem_euclid(self.n as i64) as usize]
    }
    /// set value at cursor + offset
    pub fn set(&mut self,offset: i64,val: T) {
        self.buf[(self.pos as i64 + offset).rem_euclid(self.n as i64) as usize] = val;
    }
    /// advance cursor by 1
    pub fn advance(&mut self) {
        self.pos = (self.pos + 1) % self.n;
    }
}

#[test]
fn offset() {
    let mut ring: RingBuffer<u8> = RingBuffer::create(0,4);
    ring.set_pos(5);
    assert_eq!(ring.get_pos(0),1);
    assert_eq!(ring.get_pos(4),1);
    assert_eq!(ring.get_pos(3),0);
    assert_eq!(ring.get_pos(-4),1);
}

#[test]
fn wrapping() {
    // write around the seam and read it back through negative offsets
    let mut ring: RingBuffer<u8> = RingBuffer::create(0,4);
    for i in 0..6 {
        ring.set(0,i as u8);
        ring.advance();
    }
    assert_eq!(ring.get(-1),5);
    assert_eq!(ring.get(-2),4);
    assert_eq!(ring.get(-3),3);
}
