//! Property tests for the mailbox channel
//!
//! Tests invariants for:
//! - Latest-value semantics: only the last write is observed
//! - Pending state: `pending_size` is `None` iff nothing was written since the last read
//! - Capacity: oversized writes never publish

use ekpar::mailbox::*;
use ekpar::types::*;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

const CAPACITY: usize = 128;

fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=CAPACITY)
}

/// Either a write of a payload or a read
#[derive(Debug, Clone)]
enum Op {
    Write(Vec<u8>),
    Read,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![payload().prop_map(Op::Write), Just(Op::Read)]
}

// ============================================================================
// Latest-Value Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: after N writes without a read, exactly the last
    /// payload is observed, once
    #[test]
    fn last_write_wins(writes in prop::collection::vec(payload(), 1..20)) {
        let region = MailboxRegion::new(CAPACITY);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();

        for write in &writes {
            writer.write_bytes(write).unwrap();
        }

        let last = writes.last().unwrap();
        prop_assert_eq!(reader.pending_size(), Some(last.len()));

        let mut scratch = [0u8; CAPACITY];
        let message = reader.read(&mut scratch).unwrap().unwrap();
        prop_assert_eq!(message.payload, last.as_slice());
        prop_assert!(reader.read(&mut scratch).unwrap().is_none());
    }

    /// Pending iff a write happened since the last read, for any interleaving
    #[test]
    fn pending_tracks_unread_write(ops in prop::collection::vec(op(), 0..50)) {
        let region = MailboxRegion::new(CAPACITY);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();
        let mut scratch = [0u8; CAPACITY];
        let mut unread: Option<Vec<u8>> = None;

        for op in ops {
            match op {
                Op::Write(data) => {
                    writer.write_bytes(&data).unwrap();
                    unread = Some(data);
                }
                Op::Read => {
                    let message = reader.read(&mut scratch).unwrap();
                    prop_assert_eq!(message.map(|m| m.payload.to_vec()), unread.take());
                }
            }
            prop_assert_eq!(reader.pending_size(), unread.as_ref().map(Vec::len));
        }
    }

    /// Typed headers travel with their payload
    #[test]
    fn typed_header_round_trip(id in any::<u32>(), scale in any::<i64>(), data in payload()) {
        #[derive(Debug, Clone, Copy, PartialEq)]
        struct Header {
            id: u32,
            scale: i64,
        }

        let region = MailboxRegion::new(CAPACITY + core::mem::size_of::<Header>());
        let mut writer = region.writer::<Header>().unwrap();
        let mut reader = region.reader::<Header>().unwrap();

        writer.write(Header { id, scale }, &data).unwrap();
        let mut scratch = [0u8; CAPACITY];
        let message = reader.read(&mut scratch).unwrap().unwrap();
        prop_assert_eq!(message.header, Header { id, scale });
        prop_assert_eq!(message.payload, data.as_slice());
    }
}

// ============================================================================
// Capacity Property Tests
// ============================================================================

proptest! {
    /// Oversized writes are rejected and leave the previous message intact
    #[test]
    fn oversized_write_never_publishes(
        before in payload(),
        excess in 1usize..64,
    ) {
        let region = MailboxRegion::new(CAPACITY);
        let mut writer = region.writer::<()>().unwrap();
        let mut reader = region.reader::<()>().unwrap();

        writer.write_bytes(&before).unwrap();
        let oversized = vec![0xAA; CAPACITY + excess];
        prop_assert_eq!(
            writer.write_bytes(&oversized),
            Err(Error::PayloadTooLarge { len: CAPACITY + excess, capacity: CAPACITY })
        );

        let mut scratch = [0u8; CAPACITY];
        let message = reader.read(&mut scratch).unwrap().unwrap();
        prop_assert_eq!(message.payload, before.as_slice());
    }
}
