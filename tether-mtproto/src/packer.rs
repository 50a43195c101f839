//! Batching of queued messages into `msg_container`s.
//!
//! The packer is a FIFO. Each call to [`MessagePacker::pop_batch`] assigns
//! message ids and sequence numbers to as many queued items as fit under the
//! protocol limits and returns one wire body: either the lone item's body or
//! a container holding all of them.

use std::collections::VecDeque;

use tether_tl::types::{CONTAINER_MESSAGE_HEADER, ContainerMessage, MsgContainer};
use tether_tl::{Identifiable, Serializable};

use crate::message::Message;
use crate::session::Session;

/// Largest body the server accepts in one message.
pub const MAXIMUM_SIZE: usize = 1_044_456 - 8;

/// Most messages a container may hold.
pub const MAXIMUM_LENGTH: usize = 100;

/// `msg_id`, `seq_no` and `bytes` before each body in a container.
pub const MESSAGE_OVERHEAD: usize = CONTAINER_MESSAGE_HEADER;

/// Constructor id and count at the start of a container.
pub const CONTAINER_OVERHEAD: usize = 4 + 4;

/// Something that can be queued in a [`MessagePacker`].
pub trait Packable {
    /// Serialized TL body.
    fn body(&self) -> &[u8];

    /// Whether the message needs an odd (acknowledged) sequence number.
    fn content_related(&self) -> bool { true }

    /// Cancelled items are dropped instead of being sent.
    fn is_cancelled(&self) -> bool { false }
}

/// An item with the id and sequence number it was sent under.
#[derive(Debug)]
pub struct Packed<T> {
    pub msg_id: i64,
    pub seq_no: i32,
    pub item: T,
}

/// One outgoing message, ready for encryption.
#[derive(Debug)]
pub struct Batch<T> {
    /// The message to encrypt: a container, or the single item itself.
    pub message: Message,
    /// Id of the wrapping container, when there is one.
    pub container_id: Option<i64>,
    /// Items in the order they were packed.
    pub items: Vec<Packed<T>>,
}

/// Result of one [`MessagePacker::pop_batch`] call.
#[derive(Debug)]
pub struct Popped<T> {
    pub batch: Option<Batch<T>>,
    /// Items too large to ever be sent. Their callers should be failed.
    pub rejected: Vec<T>,
}

/// FIFO of items waiting to be sent.
#[derive(Debug)]
pub struct MessagePacker<T> {
    queue: VecDeque<T>,
}

impl<T: Packable> Default for MessagePacker<T> {
    fn default() -> Self { Self::new() }
}

/// Whether a body of `len` bytes fits in a container at all.
pub fn fits(len: usize) -> bool {
    CONTAINER_OVERHEAD + MESSAGE_OVERHEAD + len <= MAXIMUM_SIZE
}

impl<T: Packable> MessagePacker<T> {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    /// Queue an item ahead of everything else, e.g. one being resent.
    pub fn push_front(&mut self, item: T) {
        self.queue.push_front(item);
    }

    pub fn len(&self) -> usize { self.queue.len() }

    pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    /// Remove and return every queued item matching `pred`.
    pub fn take_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let (taken, kept): (Vec<T>, Vec<T>) = self.queue.drain(..).partition(|item| pred(item));
        self.queue = kept.into();
        taken
    }

    /// Drain everything still queued.
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    /// Take as many queued items as fit into one message.
    pub fn pop_batch(&mut self, session: &mut Session) -> Popped<T> {
        let mut rejected = Vec::new();
        let mut picked: Vec<T> = Vec::new();
        let mut size = CONTAINER_OVERHEAD;

        while picked.len() < MAXIMUM_LENGTH {
            let Some(front) = self.queue.front() else { break };
            if front.is_cancelled() {
                self.queue.pop_front();
                continue;
            }
            let len = front.body().len();
            if !fits(len) {
                log::warn!("[tether] dropping {len}-byte message: exceeds {MAXIMUM_SIZE} bytes");
                rejected.extend(self.queue.pop_front());
                continue;
            }
            if size + MESSAGE_OVERHEAD + len > MAXIMUM_SIZE {
                break;
            }
            size += MESSAGE_OVERHEAD + len;
            picked.extend(self.queue.pop_front());
        }

        let items: Vec<Packed<T>> = picked
            .into_iter()
            .map(|item| Packed {
                msg_id: session.new_msg_id(),
                seq_no: session.next_seq_no(item.content_related()),
                item,
            })
            .collect();

        let batch = match items.len() {
            0 => None,
            1 => {
                let only = &items[0];
                let message = Message { id: only.msg_id, seq_no: only.seq_no, body: only.item.body().to_vec() };
                Some(Batch { message, container_id: None, items })
            }
            n => {
                let container = MsgContainer {
                    messages: items
                        .iter()
                        .map(|p| ContainerMessage { msg_id: p.msg_id, seqno: p.seq_no, body: p.item.body().to_vec() })
                        .collect(),
                };
                let id = session.new_msg_id();
                let seq_no = session.next_seq_no(false);
                let body = container.to_bytes();
                debug_assert!(body.len() <= MAXIMUM_SIZE);
                log::trace!(
                    "[tether] packed {n} messages into container {id:#x} ({} bytes, ctor {:#x})",
                    body.len(),
                    MsgContainer::CONSTRUCTOR_ID
                );
                Some(Batch { message: Message { id, seq_no, body }, container_id: Some(id), items })
            }
        };

        Popped { batch, rejected }
    }
}
