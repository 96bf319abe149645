//! Receive frame pool
//!
//! Received data is kept in fixed-size frames shared by all sockets. Frames are linked by
//! index, both in the free list and in per-socket receive chains. A stream chain is a
//! contiguous byte sequence, where the head frame offset marks data already consumed.
//! A datagram chain holds one datagram per frame.

use core::net::{IpAddr, SocketAddr};

use crate::addr;
use crate::core::Family;

/// Payload capacity of a single frame
pub const FRAME_CAPACITY: usize = 1500;

/// The pool cannot hold the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Exhausted;

struct Frame {
    data: [u8; FRAME_CAPACITY],
    len: u16,
    offset: u16,
    next: Option<u8>,
    source: SocketAddr,
    destination: Option<IpAddr>,
}

impl Frame {
    const fn new() -> Self {
        Self {
            data: [0; FRAME_CAPACITY],
            len: 0,
            offset: 0,
            next: None,
            source: addr::unspecified(Family::Inet),
            destination: None,
        }
    }

    fn payload(&self) -> &[u8] {
        &self.data[usize::from(self.offset)..usize::from(self.len)]
    }

    fn spare(&self) -> usize {
        FRAME_CAPACITY - usize::from(self.len)
    }
}

/// Metadata of a dequeued datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DatagramMeta {
    /// Bytes copied to the caller
    pub copied: usize,
    /// Full datagram length
    pub len: usize,
    pub source: SocketAddr,
    pub destination: Option<IpAddr>,
}

pub(crate) struct FramePool<const N: usize> {
    frames: [Frame; N],
    free_head: Option<u8>,
    free_count: usize,
}

impl<const N: usize> FramePool<N> {
    const _ASSERT: usize = u8::MAX as usize - N;

    pub fn new() -> Self {
        let _ = Self::_ASSERT;
        let mut frames: [Frame; N] = core::array::from_fn(|_| Frame::new());
        for (i, frame) in frames.iter_mut().enumerate() {
            frame.next = if i + 1 < N { Some((i + 1) as u8) } else { None };
        }
        Self {
            frames,
            free_head: if N > 0 { Some(0) } else { None },
            free_count: N,
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    fn alloc(&mut self) -> Option<u8> {
        let idx = self.free_head?;
        let frame = &mut self.frames[usize::from(idx)];
        self.free_head = frame.next;
        frame.len = 0;
        frame.offset = 0;
        frame.next = None;
        frame.destination = None;
        self.free_count -= 1;
        Some(idx)
    }

    fn release(&mut self, idx: u8) {
        let frame = &mut self.frames[usize::from(idx)];
        frame.next = self.free_head;
        self.free_head = Some(idx);
        self.free_count += 1;
    }

    fn frame(&self, idx: u8) -> &Frame {
        &self.frames[usize::from(idx)]
    }

    fn frame_mut(&mut self, idx: u8) -> &mut Frame {
        &mut self.frames[usize::from(idx)]
    }
}

/// Receive chain of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Chain {
    head: Option<u8>,
    tail: Option<u8>,
}

impl Chain {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn link<const N: usize>(&mut self, pool: &mut FramePool<N>, idx: u8) {
        match self.tail {
            Some(tail) => pool.frame_mut(tail).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn unlink_head<const N: usize>(&mut self, pool: &mut FramePool<N>) {
        if let Some(head) = self.head {
            self.head = pool.frame(head).next;
            if self.head.is_none() {
                self.tail = None;
            }
            pool.release(head);
        }
    }

    /// Returns every frame to the pool.
    pub fn clear<const N: usize>(&mut self, pool: &mut FramePool<N>) {
        while !self.is_empty() {
            self.unlink_head(pool);
        }
    }

    /// Number of queued bytes
    #[cfg(test)]
    pub fn len<const N: usize>(&self, pool: &FramePool<N>) -> usize {
        let mut total = 0;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let frame = pool.frame(idx);
            total += frame.payload().len();
            cursor = frame.next;
        }
        total
    }

    /// Appends stream data. Either all of `data` is queued or nothing is.
    pub fn append_stream<const N: usize>(
        &mut self,
        pool: &mut FramePool<N>,
        data: &[u8],
    ) -> Result<(), Exhausted> {
        let spare = self.tail.map_or(0, |tail| pool.frame(tail).spare());
        let needed = data.len().saturating_sub(spare).div_ceil(FRAME_CAPACITY);
        if needed > pool.free_count() {
            return Err(Exhausted);
        }

        let mut rest = data;
        if let Some(tail) = self.tail {
            rest = fill(pool.frame_mut(tail), rest);
        }
        while !rest.is_empty() {
            let idx = unwrap!(pool.alloc());
            rest = fill(pool.frame_mut(idx), rest);
            self.link(pool, idx);
        }
        Ok(())
    }

    /// Copies queued stream data into `bufs` in order.
    ///
    /// Consumed frames return to the pool unless `peek` is set.
    pub fn read_stream<const N: usize>(
        &mut self,
        pool: &mut FramePool<N>,
        bufs: &mut [&mut [u8]],
        peek: bool,
    ) -> usize {
        let mut copied = 0;
        let mut cursor = self.head;
        let mut offset_in_frame = 0;
        for buf in bufs.iter_mut() {
            let mut written = 0;
            while written < buf.len() {
                let Some(idx) = cursor else {
                    return copied;
                };
                let payload = &pool.frame(idx).payload()[offset_in_frame..];
                let n = payload.len().min(buf.len() - written);
                buf[written..written + n].copy_from_slice(&payload[..n]);
                written += n;
                copied += n;
                offset_in_frame += n;

                if offset_in_frame == pool.frame(idx).payload().len() {
                    cursor = pool.frame(idx).next;
                    offset_in_frame = 0;
                    if !peek {
                        self.unlink_head(pool);
                    }
                } else if !peek {
                    let frame = pool.frame_mut(idx);
                    frame.offset += n as u16;
                    offset_in_frame = 0;
                }
            }
        }
        copied
    }

    /// Appends one datagram.
    ///
    /// Fails if the pool is exhausted or the payload exceeds a frame.
    pub fn push_datagram<const N: usize>(
        &mut self,
        pool: &mut FramePool<N>,
        source: SocketAddr,
        destination: Option<IpAddr>,
        payload: &[u8],
    ) -> Result<(), Exhausted> {
        if payload.len() > FRAME_CAPACITY {
            return Err(Exhausted);
        }
        let idx = pool.alloc().ok_or(Exhausted)?;
        let frame = pool.frame_mut(idx);
        fill(frame, payload);
        frame.source = source;
        frame.destination = destination;
        self.link(pool, idx);
        Ok(())
    }

    /// Copies the head datagram into `bufs`, truncating silently.
    ///
    /// The datagram is consumed unless `peek` is set.
    pub fn read_datagram<const N: usize>(
        &mut self,
        pool: &mut FramePool<N>,
        bufs: &mut [&mut [u8]],
        peek: bool,
    ) -> Option<DatagramMeta> {
        let idx = self.head?;
        let frame = pool.frame(idx);
        let payload = frame.payload();
        let mut copied = 0;
        for buf in bufs.iter_mut() {
            let n = buf.len().min(payload.len() - copied);
            buf[..n].copy_from_slice(&payload[copied..copied + n]);
            copied += n;
        }
        let meta = DatagramMeta {
            copied,
            len: payload.len(),
            source: frame.source,
            destination: frame.destination,
        };
        if !peek {
            self.unlink_head(pool);
        }
        Some(meta)
    }
}

fn fill<'d>(frame: &mut Frame, data: &'d [u8]) -> &'d [u8] {
    let n = frame.spare().min(data.len());
    let start = usize::from(frame.len);
    frame.data[start..start + n].copy_from_slice(&data[..n]);
    frame.len += n as u16;
    &data[n..]
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::net::{Ipv4Addr, SocketAddrV4};
    use std::boxed::Box;
    use std::vec::Vec;

    use super::*;

    fn source() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 7))
    }

    #[test]
    fn test_stream_spans_frames() {
        let mut pool: Box<FramePool<4>> = Box::new(FramePool::new());
        let mut chain = Chain::new();
        let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();

        unwrap!(chain.append_stream(&mut pool, &data));
        assert_eq!(pool.free_count(), 2);
        assert_eq!(chain.len(&pool), 2000);

        let mut first = [0u8; 1000];
        assert_eq!(chain.read_stream(&mut pool, &mut [&mut first], false), 1000);
        assert_eq!(&first[..], &data[..1000]);
        assert_eq!(pool.free_count(), 2);

        let mut second = [0u8; 1500];
        assert_eq!(chain.read_stream(&mut pool, &mut [&mut second], false), 1000);
        assert_eq!(&second[..1000], &data[1000..]);
        assert!(chain.is_empty());
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_stream_fills_tail_first() {
        let mut pool: Box<FramePool<2>> = Box::new(FramePool::new());
        let mut chain = Chain::new();
        unwrap!(chain.append_stream(&mut pool, &[1, 2, 3]));
        unwrap!(chain.append_stream(&mut pool, &[4, 5]));
        assert_eq!(pool.free_count(), 1);

        let big = [0u8; FRAME_CAPACITY * 2];
        assert_eq!(chain.append_stream(&mut pool, &big), Err(Exhausted));
        assert_eq!(chain.len(&pool), 5);
    }

    #[test]
    fn test_stream_peek_and_scatter() {
        let mut pool: Box<FramePool<2>> = Box::new(FramePool::new());
        let mut chain = Chain::new();
        unwrap!(chain.append_stream(&mut pool, b"hello world"));

        let mut peeked = [0u8; 5];
        assert_eq!(chain.read_stream(&mut pool, &mut [&mut peeked], true), 5);
        assert_eq!(&peeked, b"hello");
        assert_eq!(chain.len(&pool), 11);

        let mut a = [0u8; 6];
        let mut b = [0u8; 8];
        assert_eq!(chain.read_stream(&mut pool, &mut [&mut a, &mut b], false), 11);
        assert_eq!(&a, b"hello ");
        assert_eq!(&b[..5], b"world");
        assert!(chain.is_empty());
    }

    #[test]
    fn test_datagram_whole_message() {
        let mut pool: Box<FramePool<2>> = Box::new(FramePool::new());
        let mut chain = Chain::new();
        unwrap!(chain.push_datagram(&mut pool, source(), None, &[1; 100]));
        unwrap!(chain.push_datagram(&mut pool, source(), None, &[2; 10]));
        assert!(chain.push_datagram(&mut pool, source(), None, &[3; 1]).is_err());

        let mut buf = [0u8; 40];
        let meta = unwrap!(chain.read_datagram(&mut pool, &mut [&mut buf], false));
        assert_eq!((meta.copied, meta.len), (40, 100));
        assert_eq!(meta.source, source());
        assert_eq!(buf, [1; 40]);

        let meta = unwrap!(chain.read_datagram(&mut pool, &mut [&mut buf], true));
        assert_eq!((meta.copied, meta.len), (10, 10));
        let meta = unwrap!(chain.read_datagram(&mut pool, &mut [&mut buf], false));
        assert_eq!(meta.len, 10);
        assert!(chain.read_datagram(&mut pool, &mut [&mut buf], false).is_none());
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_oversized_datagram() {
        let mut pool: Box<FramePool<1>> = Box::new(FramePool::new());
        let mut chain = Chain::new();
        let big = [0u8; FRAME_CAPACITY + 1];
        assert_eq!(
            chain.push_datagram(&mut pool, source(), None, &big),
            Err(Exhausted)
        );
        assert_eq!(pool.free_count(), 1);
    }
}
