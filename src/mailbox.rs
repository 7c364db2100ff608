//! EK-PAR - Shared-Memory Mailbox Channel
//!
//! Single-slot, latest-value transport between exactly one writer core and
//! one reader core. A new write always replaces any unread message.
//!
//! ## Region Layout
//!
//! ```text
//! +----------------------+-------------------+--------------------+
//! | ChannelHeader (32 B) | typed header `H`  | payload bytes      |
//! +----------------------+-------------------+--------------------+
//! ```
//!
//! The header carries the `transmitted` / `acknowledged` counters. A message is
//! pending iff they differ. Payload bytes are guarded by a sequence counter
//! (odd = write in progress) so the reader can detect a write that lands
//! while it is copying:
//!
//! - Writer: sequence -> ODD, copy, bump `transmitted`, sequence -> EVEN
//! - Reader: sample sequence, copy into scratch, re-check sequence, then
//!   publish `acknowledged`
//!
//! Nothing here blocks or allocates.

use crate::types::*;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::{align_of, size_of};
use core::ptr::{self, NonNull};
use core::sync::atomic::{fence, AtomicU32, Ordering};

// ============================================================================
// Channel Header
// ============================================================================

/// Claim bit for the writer side
const WRITER_CLAIM: u32 = 1 << 0;
/// Claim bit for the reader side
const READER_CLAIM: u32 = 1 << 1;

/// Control block at the start of every mailbox region
#[repr(C)]
#[derive(Debug)]
pub struct ChannelHeader {
    /// Seqlock over the payload area (odd = write in progress)
    sequence: AtomicU32,
    /// Completed writes
    transmitted: AtomicU32,
    /// Value of `transmitted` at the last completed read
    acknowledged: AtomicU32,
    /// Payload length of the last write (excluding typed header)
    length: AtomicU32,
    /// Writer/reader claim bits
    claims: AtomicU32,
    _reserved: [u32; 3],
}

impl ChannelHeader {
    /// Create a zeroed header
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
            transmitted: AtomicU32::new(0),
            acknowledged: AtomicU32::new(0),
            length: AtomicU32::new(0),
            claims: AtomicU32::new(0),
            _reserved: [0; 3],
        }
    }

    fn claim(&self, bit: u32) -> Result<()> {
        if self.claims.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
            return Err(Error::AlreadyClaimed);
        }
        Ok(())
    }

    fn release(&self, bit: u32) {
        self.claims.fetch_and(!bit, Ordering::AcqRel);
    }
}

impl Default for ChannelHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes taken by the control block at the start of a region
pub const HEADER_SIZE: usize = size_of::<ChannelHeader>();

// ============================================================================
// Channel (shared by both sides)
// ============================================================================

/// View over a mapped mailbox region
struct Channel<'a> {
    header: &'a ChannelHeader,
    data: NonNull<u8>,
    capacity: usize,
    _region: PhantomData<&'a UnsafeCell<[u8]>>,
}

impl<'a> Channel<'a> {
    /// # Safety
    /// `ptr..ptr+len` must be a mapped region valid for `'a`, with a header
    /// that is either zeroed or was written by this module.
    unsafe fn from_raw(ptr: *mut u8, len: usize) -> Result<Self> {
        let base = NonNull::new(ptr).ok_or(Error::InvalidArg)?;
        if (ptr as usize) % align_of::<ChannelHeader>() != 0 {
            return Err(Error::Misaligned);
        }
        if len < HEADER_SIZE || len - HEADER_SIZE > u32::MAX as usize {
            return Err(Error::RegionTooSmall);
        }

        Ok(Self {
            header: &*(base.as_ptr() as *const ChannelHeader),
            data: NonNull::new_unchecked(base.as_ptr().add(HEADER_SIZE)),
            capacity: len - HEADER_SIZE,
            _region: PhantomData,
        })
    }
}

/// Zero the control block of a raw region
///
/// Call once, from the side that maps the region first, before either end
/// is opened.
///
/// # Safety
/// `ptr` must point to at least [`HEADER_SIZE`] writable bytes aligned for
/// [`ChannelHeader`], and no writer or reader may be open on it.
pub unsafe fn format_region(ptr: *mut u8, len: usize) -> Result<()> {
    if ptr.is_null() {
        return Err(Error::InvalidArg);
    }
    if (ptr as usize) % align_of::<ChannelHeader>() != 0 {
        return Err(Error::Misaligned);
    }
    if len < HEADER_SIZE {
        return Err(Error::RegionTooSmall);
    }
    ptr::write(ptr as *mut ChannelHeader, ChannelHeader::new());
    Ok(())
}

// ============================================================================
// Message
// ============================================================================

/// Message copied out of a mailbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Message<'s, H = ()> {
    /// Fixed-layout header (unit for untyped channels)
    pub header: H,
    /// Payload bytes, borrowed from the caller's scratch buffer
    pub payload: &'s [u8],
}

// ============================================================================
// Writer
// ============================================================================

/// Producer end of a mailbox
///
/// At most one writer exists per region; the claim is released on drop.
pub struct Writer<'a, H = ()> {
    channel: Channel<'a>,
    _header: PhantomData<H>,
}

// SAFETY: the writer is the only producer of its region (claim bit) and only
// touches the region through atomics and the seqlock protocol.
unsafe impl<H: Send> Send for Writer<'_, H> {}

impl<'a, H: Copy> Writer<'a, H> {
    /// Open the writer end of a mapped region
    ///
    /// # Safety
    /// `ptr..ptr+len` must stay mapped for `'a` and its header must have been
    /// zeroed (see [`format_region`]) or previously used by this module with
    /// the same header type `H`.
    pub unsafe fn open(ptr: *mut u8, len: usize) -> Result<Self> {
        let channel = Channel::from_raw(ptr, len)?;
        if channel.capacity < size_of::<H>() {
            return Err(Error::RegionTooSmall);
        }
        channel.header.claim(WRITER_CLAIM)?;
        Ok(Self {
            channel,
            _header: PhantomData,
        })
    }

    /// Largest payload accepted by [`Writer::write`]
    pub fn capacity(&self) -> usize {
        self.channel.capacity - size_of::<H>()
    }

    /// Publish a message, replacing any unread one
    ///
    /// Never blocks. Payloads larger than [`Writer::capacity`] are rejected
    /// and nothing is written.
    pub fn write(&mut self, header: H, payload: &[u8]) -> Result<()> {
        if payload.len() > self.capacity() {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                capacity: self.capacity(),
            });
        }

        let control = self.channel.header;
        let seq = control.sequence.load(Ordering::Relaxed);

        // Sequence to ODD (write in progress)
        control.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: bounds checked above; this writer is the only producer.
        unsafe {
            let base = self.channel.data.as_ptr();
            ptr::write_unaligned(base as *mut H, header);
            ptr::copy_nonoverlapping(payload.as_ptr(), base.add(size_of::<H>()), payload.len());
        }
        control.length.store(payload.len() as u32, Ordering::Relaxed);
        control.transmitted.fetch_add(1, Ordering::Relaxed);

        // Sequence to EVEN (write complete)
        control.sequence.store(seq.wrapping_add(2), Ordering::Release);
        Ok(())
    }
}

impl<'a> Writer<'a, ()> {
    /// Publish an untyped message
    pub fn write_bytes(&mut self, payload: &[u8]) -> Result<()> {
        self.write((), payload)
    }
}

impl<H> Drop for Writer<'_, H> {
    fn drop(&mut self) {
        self.channel.header.release(WRITER_CLAIM);
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Consumer end of a mailbox
///
/// At most one reader exists per region; the claim is released on drop.
pub struct Reader<'a, H = ()> {
    channel: Channel<'a>,
    _header: PhantomData<H>,
}

// SAFETY: see `Writer`; the reader only copies out and publishes
// `acknowledged`, which no other party writes.
unsafe impl<H: Send> Send for Reader<'_, H> {}

impl<'a, H: Copy> Reader<'a, H> {
    /// Open the reader end of a mapped region
    ///
    /// # Safety
    /// Same contract as [`Writer::open`].
    pub unsafe fn open(ptr: *mut u8, len: usize) -> Result<Self> {
        let channel = Channel::from_raw(ptr, len)?;
        if channel.capacity < size_of::<H>() {
            return Err(Error::RegionTooSmall);
        }
        channel.header.claim(READER_CLAIM)?;
        Ok(Self {
            channel,
            _header: PhantomData,
        })
    }

    /// Largest payload the writer can publish; a scratch buffer of this
    /// size never fails with `BufferTooSmall`
    pub fn capacity(&self) -> usize {
        self.channel.capacity - size_of::<H>()
    }

    /// Payload length of the unread message, or `None` if nothing is pending
    ///
    /// Never blocks. An empty message reports `Some(0)`.
    pub fn pending_size(&self) -> Option<usize> {
        let control = self.channel.header;
        let _ = control.sequence.load(Ordering::Acquire);
        let transmitted = control.transmitted.load(Ordering::Relaxed);
        if transmitted == control.acknowledged.load(Ordering::Relaxed) {
            return None;
        }
        Some(control.length.load(Ordering::Relaxed) as usize)
    }

    /// Copy the unread message into `scratch` and acknowledge it
    ///
    /// Returns `Ok(None)` when nothing is pending. The copy completes before
    /// the acknowledgment is published. A write landing mid-copy is retried
    /// up to [`READ_RETRIES`] times, after which `Error::Busy` is returned and
    /// the message stays pending.
    pub fn read<'s>(&mut self, scratch: &'s mut [u8]) -> Result<Option<Message<'s, H>>> {
        let control = self.channel.header;

        for _ in 0..READ_RETRIES {
            let seq_before = control.sequence.load(Ordering::Acquire);
            if seq_before & 1 != 0 {
                // Write in progress, try again
                core::hint::spin_loop();
                continue;
            }

            let transmitted = control.transmitted.load(Ordering::Relaxed);
            if transmitted == control.acknowledged.load(Ordering::Relaxed) {
                return Ok(None);
            }

            let len = control.length.load(Ordering::Relaxed) as usize;
            if len > self.capacity() {
                // Length belongs to a write we raced with
                continue;
            }
            if len > scratch.len() {
                return Err(Error::BufferTooSmall {
                    needed: len,
                    available: scratch.len(),
                });
            }

            // SAFETY: `len` bounded by the region capacity and the scratch
            // length; torn copies are discarded by the sequence check below.
            let header = unsafe {
                let base = self.channel.data.as_ptr();
                let header = ptr::read_unaligned(base as *const H);
                ptr::copy_nonoverlapping(base.add(size_of::<H>()), scratch.as_mut_ptr(), len);
                header
            };

            fence(Ordering::Acquire);
            if control.sequence.load(Ordering::Relaxed) != seq_before {
                // Torn read, retry
                continue;
            }

            control.acknowledged.store(transmitted, Ordering::Release);
            return Ok(Some(Message {
                header,
                payload: &scratch[..len],
            }));
        }

        Err(Error::Busy)
    }

    /// Acknowledge the unread message without copying it
    ///
    /// Returns whether a message was dropped. A write racing the discard
    /// stays pending.
    pub fn discard(&mut self) -> bool {
        let control = self.channel.header;
        let transmitted = control.transmitted.load(Ordering::Acquire);
        if transmitted == control.acknowledged.load(Ordering::Relaxed) {
            return false;
        }
        control.acknowledged.store(transmitted, Ordering::Release);
        true
    }
}

impl<H> Drop for Reader<'_, H> {
    fn drop(&mut self) {
        self.channel.header.release(READER_CLAIM);
    }
}

// ============================================================================
// Statically Sized Region
// ============================================================================

/// Mailbox storage with a compile-time capacity
///
/// `const`-constructible so it can live in a `static` placed in the shared
/// memory section of both cores.
#[repr(C, align(8))]
pub struct MailboxBuffer<const N: usize> {
    header: ChannelHeader,
    data: UnsafeCell<[u8; N]>,
}

// SAFETY: all access goes through a single claimed writer and reader.
unsafe impl<const N: usize> Sync for MailboxBuffer<N> {}

impl<const N: usize> MailboxBuffer<N> {
    /// Create an empty mailbox
    pub const fn new() -> Self {
        Self {
            header: ChannelHeader::new(),
            data: UnsafeCell::new([0; N]),
        }
    }

    fn base(&self) -> *mut u8 {
        self as *const Self as *mut u8
    }

    /// Claim the writer end
    pub fn writer<H: Copy>(&self) -> Result<Writer<'_, H>> {
        // SAFETY: `self` is a correctly laid out, aligned region borrowed for
        // the writer's lifetime.
        unsafe { Writer::open(self.base(), HEADER_SIZE + N) }
    }

    /// Claim the reader end
    pub fn reader<H: Copy>(&self) -> Result<Reader<'_, H>> {
        // SAFETY: as for `writer`.
        unsafe { Reader::open(self.base(), HEADER_SIZE + N) }
    }
}

impl<const N: usize> Default for MailboxBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Heap Region (std)
// ============================================================================

/// Run-time sized mailbox storage for host builds and tests
#[cfg(feature = "std")]
pub struct MailboxRegion {
    words: Box<[UnsafeCell<u64>]>,
    len: usize,
}

// SAFETY: all access goes through a single claimed writer and reader.
#[cfg(feature = "std")]
unsafe impl Sync for MailboxRegion {}

#[cfg(feature = "std")]
impl MailboxRegion {
    /// Allocate a zeroed region able to carry `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        let len = HEADER_SIZE + capacity;
        let words = (0..len.div_ceil(8)).map(|_| UnsafeCell::new(0u64)).collect();
        Self { words, len }
    }

    /// Bytes available for header and payload
    pub fn capacity(&self) -> usize {
        self.len - HEADER_SIZE
    }

    fn base(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }

    /// Claim the writer end
    pub fn writer<H: Copy>(&self) -> Result<Writer<'_, H>> {
        // SAFETY: the words are 8-byte aligned, zero-initialized and live as
        // long as the borrow.
        unsafe { Writer::open(self.base(), self.len) }
    }

    /// Claim the reader end
    pub fn reader<H: Copy>(&self) -> Result<Reader<'_, H>> {
        // SAFETY: as for `writer`.
        unsafe { Reader::open(self.base(), self.len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct FrameHeader {
        value_int: i32,
        value_double: f64,
    }

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 32);
    }

    #[test]
    fn test_reader_nothing_pending() {
        let region = MailboxRegion::new(200);
        let mut reader = region.reader::<()>().unwrap();
        assert_eq!(reader.pending_size(), None);

        let mut scratch = [0u8; 200];
        assert!(reader.read(&mut scratch).unwrap().is_none());
    }

    #[test]
    fn test_round_trip() {
        let region = MailboxRegion::new(200);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();

        let greeting = b"Hello world from Bare-metal\0";
        writer.write_bytes(greeting).unwrap();
        assert_eq!(reader.pending_size(), Some(28));

        let mut scratch = [0u8; 200];
        let message = reader.read(&mut scratch).unwrap().unwrap();
        assert_eq!(message.payload, greeting);
        assert_eq!(reader.pending_size(), None);
    }

    #[test]
    fn test_empty_message() {
        let region = MailboxRegion::new(64);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();

        writer.write_bytes(&[]).unwrap();
        assert_eq!(reader.pending_size(), Some(0));

        let mut scratch = [0u8; 8];
        let message = reader.read(&mut scratch).unwrap();
        assert_eq!(message.map(|m| m.payload.len()), Some(0));
        assert!(reader.read(&mut scratch).unwrap().is_none());
    }

    #[test]
    fn test_latest_value_wins() {
        let region = MailboxRegion::new(64);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();

        writer.write_bytes(b"first").unwrap();
        writer.write_bytes(b"second").unwrap();
        writer.write_bytes(b"third").unwrap();

        let mut scratch = [0u8; 64];
        let message = reader.read(&mut scratch).unwrap().unwrap();
        assert_eq!(message.payload, b"third");
        assert!(reader.read(&mut scratch).unwrap().is_none());
    }

    #[test]
    fn test_typed_header() {
        let region = MailboxRegion::new(200);
        let mut writer = region.writer::<FrameHeader>().unwrap();
        let mut reader = region.reader::<FrameHeader>().unwrap();

        let header = FrameHeader {
            value_int: 1,
            value_double: 3.14,
        };
        writer.write(header, b"text").unwrap();
        assert_eq!(reader.pending_size(), Some(4));

        let mut scratch = [0u8; 200];
        let message = reader.read(&mut scratch).unwrap().unwrap();
        assert_eq!(message.header, header);
        assert_eq!(message.payload, b"text");
    }

    #[test]
    fn test_oversized_write_rejected() {
        let region = MailboxRegion::new(16);
        let mut writer = region.writer::<()>().unwrap();
        let reader = region.reader::<()>().unwrap();

        let result = writer.write_bytes(&[0u8; 17]);
        assert_eq!(
            result,
            Err(Error::PayloadTooLarge {
                len: 17,
                capacity: 16
            })
        );
        assert_eq!(reader.pending_size(), None);
    }

    #[test]
    fn test_scratch_too_small_keeps_message() {
        let region = MailboxRegion::new(64);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();

        writer.write_bytes(b"0123456789").unwrap();
        let mut small = [0u8; 4];
        assert_eq!(
            reader.read(&mut small),
            Err(Error::BufferTooSmall {
                needed: 10,
                available: 4
            })
        );
        assert_eq!(reader.pending_size(), Some(10));
    }

    #[test]
    fn test_discard_drops_pending() {
        let region = MailboxRegion::new(64);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();
        assert_eq!(reader.capacity(), 64);
        assert!(!reader.discard());

        writer.write_bytes(b"stale").unwrap();
        assert!(reader.discard());
        assert_eq!(reader.pending_size(), None);

        writer.write_bytes(b"fresh").unwrap();
        let mut scratch = [0u8; 64];
        assert_eq!(reader.read(&mut scratch).unwrap().unwrap().payload, b"fresh");
    }

    #[test]
    fn test_single_writer_claim() {
        let region = MailboxRegion::new(16);
        let writer = region.writer::<()>().unwrap();
        assert_eq!(region.writer::<()>().err(), Some(Error::AlreadyClaimed));
        drop(writer);
        assert!(region.writer::<()>().is_ok());
    }

    #[test]
    fn test_static_buffer() {
        static MAILBOX: MailboxBuffer<32> = MailboxBuffer::new();
        let mut writer = MAILBOX.writer::<()>().unwrap();
        let mut reader = MAILBOX.reader::<()>().unwrap();

        writer.write_bytes(b"ping").unwrap();
        let mut scratch = [0u8; 32];
        assert_eq!(reader.read(&mut scratch).unwrap().unwrap().payload, b"ping");
    }

    #[test]
    fn test_raw_region_rejects_misaligned() {
        let region = MailboxRegion::new(16);
        let misaligned = unsafe { region.base().add(1) };
        let result = unsafe { Writer::<()>::open(misaligned, HEADER_SIZE + 8) };
        assert_eq!(result.err(), Some(Error::Misaligned));
    }
}
