//! Log-to-domain-event decoder.
//!
//! The program emits events as `Program data: <base64>` log lines. The first
//! 8 bytes of the decoded payload are a discriminator identifying the event
//! kind; the rest is a fixed-offset little-endian layout. Anything that does
//! not decode cleanly yields no event: foreign logs, unknown discriminators
//! and truncated payloads are all dropped, logged at debug level, and never
//! surfaced as errors.
//!
//! Payloads longer than the documented layout are accepted and the extra
//! bytes ignored, so newer program builds that append fields keep decoding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

/// Log line prefix carrying an event payload.
const PROGRAM_DATA_MARKER: &str = "Program data: ";

// Event discriminators: sha256("event:<Name>")[0..8].
const LOBBY_CREATED: [u8; 8] = [109, 169, 16, 50, 169, 242, 237, 65];
const PLAYER_JOINED: [u8; 8] = [39, 144, 49, 106, 108, 210, 183, 38];
const LOBBY_RESOLVED: [u8; 8] = [155, 179, 219, 168, 63, 242, 104, 137];
const LOBBY_REFUNDED: [u8; 8] = [37, 99, 34, 76, 175, 241, 3, 174];

/// A typed event observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    Created(LobbyCreated),
    Joined(PlayerJoined),
    Resolved(LobbyResolved),
    Refunded(LobbyRefunded),
}

impl DomainEvent {
    /// The ledger address of the match this event concerns.
    pub fn match_id(&self) -> &str {
        match self {
            DomainEvent::Created(e) => &e.lobby,
            DomainEvent::Joined(e) => &e.lobby,
            DomainEvent::Resolved(e) => &e.lobby,
            DomainEvent::Refunded(e) => &e.lobby,
        }
    }
}

/// A lobby was created with the creator staked on side 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyCreated {
    pub lobby: String,
    pub lobby_id: u64,
    pub creator: String,
    pub stake_lamports: u64,
    /// Players per side.
    pub team_size: u8,
    /// Unix seconds, ledger clock.
    pub created_at: i64,
}

/// A player joined a side; `is_full` marks the join that filled the lobby,
/// and only then is `randomness_account` meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerJoined {
    pub lobby: String,
    pub player: String,
    pub side: u8,
    pub team1_count: u8,
    pub team2_count: u8,
    pub is_full: bool,
    pub randomness_account: String,
}

/// The program consumed randomness and settled the pot on-ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyResolved {
    pub lobby: String,
    pub winner_side: u8,
    pub randomness_value: u64,
    pub total_pot: u64,
    pub platform_fee: u64,
    pub payout_per_winner: u64,
}

/// Stakes were returned to all participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyRefunded {
    pub lobby: String,
    pub refunded_count: u8,
    pub total_refunded: u64,
}

/// Decode one raw log line into a domain event, or `None` if the line does
/// not carry one of ours.
pub fn decode_log_line(line: &str) -> Option<DomainEvent> {
    let encoded = line.strip_prefix(PROGRAM_DATA_MARKER)?;
    let payload = match BASE64.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(error = %err, "Dropping log line with undecodable payload");
            return None;
        }
    };
    if payload.len() < 8 {
        debug!(len = payload.len(), "Dropping payload shorter than a discriminator");
        return None;
    }

    let (discriminator, body) = payload.split_at(8);
    let discriminator: [u8; 8] = discriminator.try_into().ok()?;
    let event = match discriminator {
        LOBBY_CREATED => decode_created(body).map(DomainEvent::Created),
        PLAYER_JOINED => decode_joined(body).map(DomainEvent::Joined),
        LOBBY_RESOLVED => decode_resolved(body).map(DomainEvent::Resolved),
        LOBBY_REFUNDED => decode_refunded(body).map(DomainEvent::Refunded),
        // Some other program's event, or one we do not track.
        _ => return None,
    };
    if event.is_none() {
        debug!(len = payload.len(), "Dropping truncated event payload");
    }
    event
}

fn decode_created(body: &[u8]) -> Option<LobbyCreated> {
    let mut r = Reader::new(body);
    Some(LobbyCreated {
        lobby: r.pubkey()?,
        lobby_id: r.u64()?,
        creator: r.pubkey()?,
        stake_lamports: r.u64()?,
        team_size: r.u8()?,
        created_at: r.i64()?,
    })
}

fn decode_joined(body: &[u8]) -> Option<PlayerJoined> {
    let mut r = Reader::new(body);
    Some(PlayerJoined {
        lobby: r.pubkey()?,
        player: r.pubkey()?,
        side: r.u8()?,
        team1_count: r.u8()?,
        team2_count: r.u8()?,
        is_full: r.bool()?,
        randomness_account: r.pubkey()?,
    })
}

fn decode_resolved(body: &[u8]) -> Option<LobbyResolved> {
    let mut r = Reader::new(body);
    Some(LobbyResolved {
        lobby: r.pubkey()?,
        winner_side: r.u8()?,
        randomness_value: r.u64()?,
        total_pot: r.u64()?,
        platform_fee: r.u64()?,
        payout_per_winner: r.u64()?,
    })
}

fn decode_refunded(body: &[u8]) -> Option<LobbyRefunded> {
    let mut r = Reader::new(body);
    Some(LobbyRefunded {
        lobby: r.pubkey()?,
        refunded_count: r.u8()?,
        total_refunded: r.u64()?,
    })
}

/// Fixed-offset little-endian reader over an event body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn pubkey(&mut self) -> Option<String> {
        let bytes = self.take(32)?;
        Some(bs58::encode(bytes).into_string())
    }

    fn u64(&mut self) -> Option<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    fn i64(&mut self) -> Option<i64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }

    fn u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn bool(&mut self) -> Option<bool> {
        Some(self.u8()? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_line(discriminator: [u8; 8], body: &[u8]) -> String {
        let mut payload = discriminator.to_vec();
        payload.extend_from_slice(body);
        format!("{PROGRAM_DATA_MARKER}{}", BASE64.encode(payload))
    }

    fn created_body(team_size: u8) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[1u8; 32]); // lobby
        body.extend_from_slice(&7u64.to_le_bytes()); // lobby_id
        body.extend_from_slice(&[2u8; 32]); // creator
        body.extend_from_slice(&100u64.to_le_bytes()); // stake
        body.push(team_size);
        body.extend_from_slice(&1_700_000_000i64.to_le_bytes()); // created_at
        body
    }

    #[test]
    fn decodes_created_event() {
        let line = encode_line(LOBBY_CREATED, &created_body(1));
        let event = decode_log_line(&line);
        let Some(DomainEvent::Created(created)) = event else {
            panic!("expected Created, got {event:?}");
        };
        assert_eq!(created.lobby, bs58::encode([1u8; 32]).into_string());
        assert_eq!(created.lobby_id, 7);
        assert_eq!(created.creator, bs58::encode([2u8; 32]).into_string());
        assert_eq!(created.stake_lamports, 100);
        assert_eq!(created.team_size, 1);
        assert_eq!(created.created_at, 1_700_000_000);
    }

    #[test]
    fn decodes_joined_event() {
        let mut body = Vec::new();
        body.extend_from_slice(&[1u8; 32]); // lobby
        body.extend_from_slice(&[3u8; 32]); // player
        body.push(1); // side
        body.push(1); // team1_count
        body.push(1); // team2_count
        body.push(1); // is_full
        body.extend_from_slice(&[9u8; 32]); // randomness account
        let line = encode_line(PLAYER_JOINED, &body);
        let Some(DomainEvent::Joined(joined)) = decode_log_line(&line) else {
            panic!("expected Joined");
        };
        assert_eq!(joined.side, 1);
        assert!(joined.is_full);
        assert_eq!(
            joined.randomness_account,
            bs58::encode([9u8; 32]).into_string()
        );
    }

    #[test]
    fn decodes_resolved_event() {
        let mut body = Vec::new();
        body.extend_from_slice(&[1u8; 32]);
        body.push(1); // winner_side
        body.extend_from_slice(&42u64.to_le_bytes()); // randomness_value
        body.extend_from_slice(&200u64.to_le_bytes()); // total_pot
        body.extend_from_slice(&2u64.to_le_bytes()); // platform_fee
        body.extend_from_slice(&198u64.to_le_bytes()); // payout_per_winner
        let line = encode_line(LOBBY_RESOLVED, &body);
        let Some(DomainEvent::Resolved(resolved)) = decode_log_line(&line) else {
            panic!("expected Resolved");
        };
        assert_eq!(resolved.winner_side, 1);
        assert_eq!(resolved.randomness_value, 42);
        assert_eq!(resolved.payout_per_winner, 198);
    }

    #[test]
    fn ignores_lines_without_marker() {
        assert_eq!(decode_log_line("Program log: Instruction: JoinSide"), None);
        assert_eq!(decode_log_line(""), None);
    }

    #[test]
    fn ignores_unknown_discriminator() {
        let line = encode_line([0xFF; 8], &created_body(1));
        assert_eq!(decode_log_line(&line), None);
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut body = created_body(1);
        body.truncate(40);
        let line = encode_line(LOBBY_CREATED, &body);
        assert_eq!(decode_log_line(&line), None);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert_eq!(decode_log_line("Program data: !!!not-base64!!!"), None);
    }

    #[test]
    fn tolerates_trailing_bytes() {
        let mut body = created_body(2);
        body.extend_from_slice(&[0xAB; 16]); // future fields
        let line = encode_line(LOBBY_CREATED, &body);
        let Some(DomainEvent::Created(created)) = decode_log_line(&line) else {
            panic!("expected Created");
        };
        assert_eq!(created.team_size, 2);
    }
}
