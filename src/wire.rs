//! Frame encoding.
//!
//! Every frame starts with a one-byte [`Tag`]. Application bytes only ever
//! travel behind a DATA or RETRY tag, so a join request can never be
//! mistaken for telemetry.
//!
//! ```text
//! DATA         [0x00][round u32 le][application bytes...]
//! RETRY        [0x01][round u32 le][application bytes...]
//! ACK          [0x02][echo of the acknowledged frame...]
//! TURN         [0x03][target][session u32 le][round u32 le]
//! JOIN_REQUEST [0x04][joiner]
//! JOIN_ACK     [0x05][target][session u32 le][round u32 le][flags][count][members...]
//! ```
//!
//! The round counts token hand-offs within a network. Every TURN carries a
//! round above anything its sender has seen, so a re-sent or outdated TURN
//! can be told apart from a new one.

use std::fmt;

use crate::types::{NodeId, SessionId};

/// JOIN_ACK flag: the joiner receives the token right away.
const FLAG_HAND_OFF: u8 = 0x01;

/// Leading byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Application payload broadcast by the token holder.
    Data = 0x00,
    /// Re-broadcast of the current turn's payload.
    Retry = 0x01,
    /// Acknowledgement echoing the frame it acknowledges.
    Ack = 0x02,
    /// Token hand-off naming the next holder.
    Turn = 0x03,
    /// Request to be admitted to the network.
    JoinRequest = 0x04,
    /// Answer to a join request.
    JoinAck = 0x05,
}

impl TryFrom<u8> for Tag {
    type Error = WireError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x00 => Self::Data,
            0x01 => Self::Retry,
            0x02 => Self::Ack,
            0x03 => Self::Turn,
            0x04 => Self::JoinRequest,
            0x05 => Self::JoinAck,
            other => return Err(WireError::UnknownTag(other)),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "DATA",
            Self::Retry => "RETRY",
            Self::Ack => "ACK",
            Self::Turn => "TURN",
            Self::JoinRequest => "JOIN_REQUEST",
            Self::JoinAck => "JOIN_ACK",
        })
    }
}

/// Errors raised while decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Zero-length frame.
    #[error("empty frame")]
    Empty,

    /// Leading byte is not a known tag.
    #[error("unknown tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Frame shorter than its tag requires.
    #[error("{tag} frame truncated: need {needed} bytes, got {got}")]
    Truncated {
        /// Tag of the frame.
        tag: Tag,
        /// Minimum length for this tag.
        needed: usize,
        /// Actual length.
        got: usize,
    },

    /// Frame longer than its tag allows.
    #[error("{tag} frame has {extra} trailing bytes")]
    Trailing {
        /// Tag of the frame.
        tag: Tag,
        /// Number of unexpected bytes.
        extra: usize,
    },

    /// A target or member field holds the broadcast address.
    #[error("{tag} frame names the broadcast address")]
    BroadcastNode {
        /// Tag of the frame.
        tag: Tag,
    },
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Application payload of the current turn.
    Data {
        /// Round of the token the sender holds.
        round: u32,
        /// Sealed application bytes.
        body: Vec<u8>,
    },
    /// Re-broadcast of the current turn's payload.
    Retry {
        /// Round of the token the sender holds.
        round: u32,
        /// Sealed application bytes.
        body: Vec<u8>,
    },
    /// Acknowledgement carrying the acknowledged frame verbatim.
    Ack(Vec<u8>),
    /// Token hand-off.
    Turn {
        /// The node receiving the token.
        target: NodeId,
        /// Network instance the sender belongs to.
        session: SessionId,
        /// Round of the token being handed over.
        round: u32,
    },
    /// Admission request.
    JoinRequest {
        /// The node asking to join.
        joiner: NodeId,
    },
    /// Admission answer.
    JoinAck {
        /// The joiner being answered.
        target: NodeId,
        /// Network instance the joiner should adopt.
        session: SessionId,
        /// Latest token round the answering node has seen.
        round: u32,
        /// The joiner holds the token as soon as it accepts.
        hand_off: bool,
        /// Every node the answering node believes eligible, joiner included.
        members: Vec<NodeId>,
    },
}

impl Message {
    /// Returns the frame's tag.
    pub const fn tag(&self) -> Tag {
        match self {
            Self::Data { .. } => Tag::Data,
            Self::Retry { .. } => Tag::Retry,
            Self::Ack(_) => Tag::Ack,
            Self::Turn { .. } => Tag::Turn,
            Self::JoinRequest { .. } => Tag::JoinRequest,
            Self::JoinAck { .. } => Tag::JoinAck,
        }
    }

    /// Serializes the frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.tag() as u8];
        match self {
            Self::Data { round, body } | Self::Retry { round, body } => {
                buf.extend_from_slice(&round.to_le_bytes());
                buf.extend_from_slice(body);
            }
            Self::Ack(echo) => buf.extend_from_slice(echo),
            Self::Turn { target, session, round } => {
                buf.push(target.get());
                buf.extend_from_slice(&session.get().to_le_bytes());
                buf.extend_from_slice(&round.to_le_bytes());
            }
            Self::JoinRequest { joiner } => buf.push(joiner.get()),
            Self::JoinAck { target, session, round, hand_off, members } => {
                buf.push(target.get());
                buf.extend_from_slice(&session.get().to_le_bytes());
                buf.extend_from_slice(&round.to_le_bytes());
                buf.push(if *hand_off { FLAG_HAND_OFF } else { 0 });
                // Universe size is capped well below 256 by config validation.
                buf.push(members.len() as u8);
                buf.extend(members.iter().map(|id| id.get()));
            }
        }
        buf
    }

    /// Parses a frame.
    ///
    /// # Errors
    ///
    /// Returns a [`WireError`] for empty, unknown, short, long or otherwise
    /// malformed frames.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (&first, rest) = bytes.split_first().ok_or(WireError::Empty)?;
        let tag = Tag::try_from(first)?;

        match tag {
            Tag::Data | Tag::Retry => {
                at_least(tag, bytes, 5)?;
                let (round, body) = (word(&rest[..4]), rest[4..].to_vec());
                match tag {
                    Tag::Data => Ok(Self::Data { round, body }),
                    _ => Ok(Self::Retry { round, body }),
                }
            }
            Tag::Ack => Ok(Self::Ack(rest.to_vec())),
            Tag::Turn => {
                exact(tag, bytes, 10)?;
                Ok(Self::Turn {
                    target: node(tag, rest[0])?,
                    session: SessionId::new(word(&rest[1..5])),
                    round: word(&rest[5..9]),
                })
            }
            Tag::JoinRequest => {
                exact(tag, bytes, 2)?;
                Ok(Self::JoinRequest { joiner: node(tag, rest[0])? })
            }
            Tag::JoinAck => {
                at_least(tag, bytes, 12)?;
                let count = usize::from(rest[10]);
                exact(tag, bytes, 12 + count)?;
                let members =
                    rest[11..].iter().map(|&raw| node(tag, raw)).collect::<Result<Vec<_>, _>>()?;
                Ok(Self::JoinAck {
                    target: node(tag, rest[0])?,
                    session: SessionId::new(word(&rest[1..5])),
                    round: word(&rest[5..9]),
                    hand_off: rest[9] & FLAG_HAND_OFF != 0,
                    members,
                })
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data { round, body } | Self::Retry { round, body } => {
                write!(f, "{}(round {round}, {} bytes)", self.tag(), body.len())
            }
            Self::Ack(echo) => write!(f, "ACK({} bytes)", echo.len()),
            Self::Turn { target, session, round } => {
                write!(f, "TURN(to {target}, session {session}, round {round})")
            }
            Self::JoinRequest { joiner } => write!(f, "JOIN_REQUEST(from {joiner})"),
            Self::JoinAck { target, hand_off, members, .. } => {
                write!(f, "JOIN_ACK(to {target}, {} members, hand_off {hand_off})", members.len())
            }
        }
    }
}

/// Returns true if `echo` acknowledges the DATA or RETRY frame of `round`
/// carrying `body`. The comparison is byte for byte.
pub fn echoes_payload(echo: &[u8], round: u32, body: &[u8]) -> bool {
    match echo.split_first() {
        Some((&tag, rest)) if tag == Tag::Data as u8 || tag == Tag::Retry as u8 => {
            rest.len() >= 4 && rest[..4] == round.to_le_bytes() && rest[4..] == *body
        }
        _ => false,
    }
}

const fn at_least(tag: Tag, bytes: &[u8], needed: usize) -> Result<(), WireError> {
    if bytes.len() < needed {
        return Err(WireError::Truncated { tag, needed, got: bytes.len() });
    }
    Ok(())
}

const fn exact(tag: Tag, bytes: &[u8], len: usize) -> Result<(), WireError> {
    if bytes.len() < len {
        return Err(WireError::Truncated { tag, needed: len, got: bytes.len() });
    }
    if bytes.len() > len {
        return Err(WireError::Trailing { tag, extra: bytes.len() - len });
    }
    Ok(())
}

const fn node(tag: Tag, raw: u8) -> Result<NodeId, WireError> {
    let id = NodeId::new(raw);
    if id.is_broadcast() {
        return Err(WireError::BroadcastNode { tag });
    }
    Ok(id)
}

fn word(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn data(round: u32, body: &[u8]) -> Message {
        Message::Data { round, body: body.to_vec() }
    }

    #[test]
    fn test_data_frame_layout() {
        assert_eq!(data(2, &[0x05, 0x07]).encode(), vec![0x00, 2, 0, 0, 0, 0x05, 0x07]);
        let retry = Message::Retry { round: 0x0100, body: vec![0x05] };
        assert_eq!(retry.encode(), vec![0x01, 0, 1, 0, 0, 0x05]);
        assert_eq!(Message::decode(&retry.encode()), Ok(retry));
    }

    #[test]
    fn test_turn_frame_layout() {
        let turn = Message::Turn {
            target: NodeId::new(3),
            session: SessionId::new(0x0403_0201),
            round: 0x0807_0605,
        };
        assert_eq!(turn.encode(), vec![0x03, 3, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(Message::decode(&turn.encode()), Ok(turn));
    }

    #[test]
    fn test_join_ack_frame() {
        let ack = Message::JoinAck {
            target: NodeId::new(2),
            session: SessionId::new(7),
            round: 9,
            hand_off: true,
            members: vec![NodeId::new(1), NodeId::new(2)],
        };
        let bytes = ack.encode();
        assert_eq!(bytes, vec![0x05, 2, 7, 0, 0, 0, 9, 0, 0, 0, FLAG_HAND_OFF, 2, 1, 2]);
        assert_eq!(Message::decode(&bytes), Ok(ack));
    }

    #[test]
    fn test_ack_carries_frame_verbatim() {
        let data = data(1, &[9, 9]).encode();
        let ack = Message::Ack(data.clone()).encode();
        assert_eq!(ack[0], Tag::Ack as u8);
        assert_eq!(&ack[1..], data.as_slice());
    }

    #[rstest]
    #[case::empty(&[], WireError::Empty)]
    #[case::unknown(&[0x09, 1], WireError::UnknownTag(0x09))]
    #[case::short_turn(&[0x03, 2, 0], WireError::Truncated { tag: Tag::Turn, needed: 10, got: 3 })]
    #[case::short_data(&[0x00, 1, 0], WireError::Truncated { tag: Tag::Data, needed: 5, got: 3 })]
    #[case::long_join(&[0x04, 2, 2], WireError::Trailing { tag: Tag::JoinRequest, extra: 1 })]
    #[case::broadcast_joiner(&[0x04, 0xFF], WireError::BroadcastNode { tag: Tag::JoinRequest })]
    #[case::member_count(
        &[0x05, 2, 1, 0, 0, 0, 4, 0, 0, 0, 0, 3, 1, 2],
        WireError::Truncated { tag: Tag::JoinAck, needed: 15, got: 14 }
    )]
    fn decode_rejects(#[case] bytes: &[u8], #[case] expected: WireError) {
        assert_eq!(Message::decode(bytes), Err(expected));
    }

    #[rstest]
    #[case::data(&[0x00, 4, 0, 0, 0, 0x05, 0x07], true)]
    #[case::retry(&[0x01, 4, 0, 0, 0, 0x05, 0x07], true)]
    #[case::corrupted(&[0x00, 4, 0, 0, 0, 0x05, 0x08], false)]
    #[case::other_round(&[0x00, 3, 0, 0, 0, 0x05, 0x07], false)]
    #[case::short(&[0x00, 4, 0, 0, 0, 0x05], false)]
    #[case::headless(&[0x00, 4, 0], false)]
    #[case::wrong_tag(&[0x03, 4, 0, 0, 0, 0x05, 0x07], false)]
    #[case::empty(&[], false)]
    fn echo_check(#[case] echo: &[u8], #[case] accepted: bool) {
        assert_eq!(echoes_payload(echo, 4, &[0x05, 0x07]), accepted);
    }
}
