//! Matching table between incoming messages and posted receives.
//!
//! A message becomes visible as soon as its header arrives. A posted
//! receive claims the earliest unclaimed message with its tag; a message
//! whose header arrives while a receive is waiting is claimed by the
//! earliest such receive. Per-tag order is therefore arrival order.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use fieldcast_wire::{Part, Tag};

/// Header of a message that is visible but not yet claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub tag: Tag,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Unclaimed,
    Request(u64),
    /// Cancelled after bytes started arriving; the rest is dropped.
    Discard,
}

#[derive(Debug)]
struct Incoming {
    tag: Tag,
    len: usize,
    received: usize,
    payload: BytesMut,
    claim: Claim,
}

impl Incoming {
    fn is_complete(&self) -> bool {
        self.received == self.len
    }
}

#[derive(Debug, Clone, Copy)]
struct Posted {
    id: u64,
    tag: Tag,
}

/// Where a receive request stands.
#[derive(Debug)]
pub(crate) enum RecvState {
    /// Posted; no message matched yet.
    Waiting,
    /// Matched a message whose body is still arriving.
    Receiving,
    /// Matched message fully arrived and handed over.
    Complete(Bytes),
    /// The id is neither posted nor matched.
    Unknown,
}

/// Outcome of cancelling a receive at the table level.
#[derive(Debug)]
pub(crate) enum Withdrawn {
    /// Removed before any data was attached.
    Unposted,
    /// The matched message had partly arrived and will be discarded.
    Discarding,
    /// The matched message had fully arrived.
    Completed(Bytes),
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct Inbox {
    messages: VecDeque<Incoming>,
    posted: Vec<Posted>,
}

impl Inbox {
    /// Feed one decoded part from the stream.
    pub(crate) fn accept(&mut self, part: Part) {
        match part {
            Part::Header(header) => {
                let claim = match self.posted.iter().position(|p| p.tag == header.tag) {
                    Some(pos) => Claim::Request(self.posted.remove(pos).id),
                    None => Claim::Unclaimed,
                };
                tracing::trace!(tag = header.tag, len = header.len, ?claim, "message header");
                self.messages.push_back(Incoming {
                    tag: header.tag,
                    len: header.len,
                    received: 0,
                    payload: BytesMut::new(),
                    claim,
                });
                self.reap_discarded();
            }
            Part::Body(chunk) => {
                // Body parts always belong to the newest message.
                if let Some(msg) = self.messages.back_mut() {
                    msg.received += chunk.len();
                    if msg.claim != Claim::Discard {
                        if msg.payload.is_empty() {
                            msg.payload.reserve(msg.len);
                        }
                        msg.payload.extend_from_slice(&chunk);
                    }
                }
                self.reap_discarded();
            }
        }
    }

    fn reap_discarded(&mut self) {
        self.messages
            .retain(|m| !(m.claim == Claim::Discard && m.is_complete()));
    }

    /// Post a receive for `tag`, matching an unclaimed message if present.
    pub(crate) fn post(&mut self, id: u64, tag: Tag) {
        if let Some(msg) = self
            .messages
            .iter_mut()
            .find(|m| m.claim == Claim::Unclaimed && m.tag == tag)
        {
            msg.claim = Claim::Request(id);
        } else {
            self.posted.push(Posted { id, tag });
        }
    }

    /// Check a receive; a complete message is removed and returned.
    pub(crate) fn poll(&mut self, id: u64) -> RecvState {
        if self.posted.iter().any(|p| p.id == id) {
            return RecvState::Waiting;
        }
        let Some(pos) = self
            .messages
            .iter()
            .position(|m| m.claim == Claim::Request(id))
        else {
            return RecvState::Unknown;
        };
        if !self.messages[pos].is_complete() {
            return RecvState::Receiving;
        }
        match self.messages.remove(pos) {
            Some(msg) => RecvState::Complete(msg.payload.freeze()),
            None => RecvState::Unknown,
        }
    }

    /// Withdraw a receive.
    pub(crate) fn cancel(&mut self, id: u64) -> Withdrawn {
        if let Some(pos) = self.posted.iter().position(|p| p.id == id) {
            self.posted.remove(pos);
            return Withdrawn::Unposted;
        }
        let Some(pos) = self
            .messages
            .iter()
            .position(|m| m.claim == Claim::Request(id))
        else {
            return Withdrawn::Unknown;
        };
        if self.messages[pos].is_complete() {
            return match self.messages.remove(pos) {
                Some(msg) => Withdrawn::Completed(msg.payload.freeze()),
                None => Withdrawn::Unknown,
            };
        }
        let msg = &mut self.messages[pos];
        msg.claim = Claim::Discard;
        msg.payload = BytesMut::new();
        Withdrawn::Discarding
    }

    /// Earliest unclaimed message, optionally filtered by tag.
    pub(crate) fn probe(&self, tag: Option<Tag>) -> Option<Status> {
        self.messages
            .iter()
            .find(|m| m.claim == Claim::Unclaimed && tag.is_none_or(|t| t == m.tag))
            .map(|m| Status {
                tag: m.tag,
                len: m.len,
            })
    }

    /// Any message whose header arrived but nobody has received.
    pub(crate) fn has_unclaimed(&self) -> bool {
        self.messages.iter().any(|m| m.claim == Claim::Unclaimed)
    }

    /// Messages currently tracked, including ones being discarded.
    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use fieldcast_wire::{Header, IMAGE, QUIT};

    use super::*;

    fn header(tag: Tag, len: usize) -> Part {
        Part::Header(Header { tag, len })
    }

    fn body(bytes: &'static [u8]) -> Part {
        Part::Body(Bytes::from_static(bytes))
    }

    #[test]
    fn posted_receive_claims_later_header() {
        let mut inbox = Inbox::default();
        inbox.post(1, IMAGE);
        assert!(matches!(inbox.poll(1), RecvState::Waiting));

        inbox.accept(header(IMAGE, 3));
        assert!(matches!(inbox.poll(1), RecvState::Receiving));
        assert_eq!(inbox.probe(None), None);

        inbox.accept(body(b"abc"));
        match inbox.poll(1) {
            RecvState::Complete(payload) => assert_eq!(payload.as_ref(), b"abc"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(inbox.len(), 0);
    }

    #[test]
    fn receive_claims_earliest_unclaimed_of_its_tag() {
        let mut inbox = Inbox::default();
        inbox.accept(header(IMAGE, 1));
        inbox.accept(body(b"a"));
        inbox.accept(header(QUIT, 1));
        inbox.accept(body(b"q"));
        inbox.accept(header(IMAGE, 1));
        inbox.accept(body(b"b"));

        assert_eq!(inbox.probe(None), Some(Status { tag: IMAGE, len: 1 }));
        assert_eq!(inbox.probe(Some(QUIT)), Some(Status { tag: QUIT, len: 1 }));

        inbox.post(7, IMAGE);
        inbox.post(8, IMAGE);
        inbox.post(9, QUIT);

        assert!(matches!(inbox.poll(8), RecvState::Complete(p) if p.as_ref() == b"b"));
        assert!(matches!(inbox.poll(7), RecvState::Complete(p) if p.as_ref() == b"a"));
        assert!(matches!(inbox.poll(9), RecvState::Complete(p) if p.as_ref() == b"q"));
        assert!(!inbox.has_unclaimed());
    }

    #[test]
    fn cancel_partially_received_discards_remainder() {
        let mut inbox = Inbox::default();
        inbox.post(1, IMAGE);
        inbox.accept(header(IMAGE, 4));
        inbox.accept(body(b"ab"));

        assert!(matches!(inbox.cancel(1), Withdrawn::Discarding));
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.probe(None), None);

        inbox.accept(body(b"cd"));
        assert_eq!(inbox.len(), 0);

        inbox.accept(header(IMAGE, 1));
        assert_eq!(inbox.probe(None), Some(Status { tag: IMAGE, len: 1 }));
    }

    #[test]
    fn cancel_before_match_and_after_completion() {
        let mut inbox = Inbox::default();
        inbox.post(1, IMAGE);
        assert!(matches!(inbox.cancel(1), Withdrawn::Unposted));

        // A cancelled receive no longer claims arriving messages.
        inbox.accept(header(IMAGE, 1));
        inbox.accept(body(b"x"));
        assert!(inbox.has_unclaimed());

        inbox.post(2, IMAGE);
        assert!(matches!(inbox.cancel(2), Withdrawn::Completed(p) if p.as_ref() == b"x"));
        assert!(matches!(inbox.cancel(2), Withdrawn::Unknown));
        assert!(matches!(inbox.poll(2), RecvState::Unknown));
    }

    #[test]
    fn zero_length_message_completes_on_header() {
        let mut inbox = Inbox::default();
        inbox.post(3, QUIT);
        inbox.accept(header(QUIT, 0));
        assert!(matches!(inbox.poll(3), RecvState::Complete(p) if p.is_empty()));
    }
}
