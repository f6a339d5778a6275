// =============================================================================
// Upstream Adapters — translate raw fabric envelopes into typed events
// =============================================================================
//
// The upstream feed pushes JSON envelopes of the form `{ room, content }`.
// Each adapter function here owns one room shape and never blocks; a missing
// required field yields a skip with a typed reason rather than a panic or a
// retry, mirroring the manual `serde_json::Value` field extraction style the
// teacher used for kline/aggTrade parsing.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CandidateSource, MarketTick, TokenCandidate};

/// Internal typed event produced by an adapter from one fabric message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpstreamEvent {
    NewToken {
        address: String,
        symbol: Option<String>,
        name: Option<String>,
        liquidity_usd: Option<f64>,
        market_cap_usd: Option<f64>,
        price_usd: Option<f64>,
    },
    SurgeUpdate {
        address: String,
        symbol: String,
        rank: Option<i64>,
        jump: Option<f64>,
        price_usd: Option<f64>,
        volume: Option<f64>,
    },
    WhaleTrade {
        address: String,
        symbol: Option<String>,
        action: WhaleAction,
        amount_usd: f64,
        profit_usd: f64,
    },
    FeeUpdate {
        kind: FeeKind,
        value_sol: f64,
    },
    BlockHash {
        hash: String,
    },
    MarketTick(MarketTick),
    /// `update_pulse_v2`: forwarded to telemetry only, never a candidate
    /// source.
    BulkPulse {
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhaleAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeKind {
    JitoBribe,
    SolPriority,
}

/// Why a raw message was skipped instead of producing an [`UpstreamEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnrecognizedRoom(String),
    MissingField(&'static str),
    WrongShape(&'static str),
    NotJson,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnrecognizedRoom(room) => write!(f, "unrecognized room: {room}"),
            Self::MissingField(name) => write!(f, "missing field: {name}"),
            Self::WrongShape(what) => write!(f, "wrong shape: {what}"),
            Self::NotJson => write!(f, "content is not valid JSON"),
        }
    }
}

/// Parse a raw `{ room, content }` envelope into zero or more typed events.
/// Several rooms (whale feed, bulk pulse) carry arrays and fan out to
/// multiple events from one envelope.
pub fn parse_envelope(decoded: &Value) -> Result<Vec<UpstreamEvent>, SkipReason> {
    let room = decoded
        .get("room")
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingField("room"))?;
    let content = decoded
        .get("content")
        .ok_or(SkipReason::MissingField("content"))?;

    if let Some(address) = room.strip_prefix("b-") {
        return Ok(vec![parse_market_tick(address, content)?]);
    }

    match room {
        "new_pairs" => parse_new_pairs(content),
        "surge-updates" => Ok(vec![parse_surge_update(content)?]),
        "jito-bribe-fee" => Ok(vec![parse_fee_update(FeeKind::JitoBribe, content)?]),
        "sol-priority-fee" => Ok(vec![parse_fee_update(FeeKind::SolPriority, content)?]),
        "block_hash" => Ok(vec![parse_block_hash(content)?]),
        "connection_monitor" => Ok(vec![]),
        "update_pulse_v2" => Ok(vec![parse_bulk_pulse(content)?]),
        other => Err(SkipReason::UnrecognizedRoom(other.to_string())),
    }
}

fn parse_new_pairs(content: &Value) -> Result<Vec<UpstreamEvent>, SkipReason> {
    match content {
        Value::Array(items) => {
            let mut events = Vec::with_capacity(items.len());
            for item in items {
                events.push(parse_single_new_pair(item)?);
            }
            Ok(events)
        }
        Value::Object(_) => Ok(vec![parse_single_new_pair(content)?]),
        _ => Err(SkipReason::WrongShape("new_pairs content")),
    }
}

fn parse_single_new_pair(item: &Value) -> Result<UpstreamEvent, SkipReason> {
    let address = item
        .get("address")
        .or_else(|| item.get("token"))
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingField("address|token"))?
        .to_string();

    Ok(UpstreamEvent::NewToken {
        address,
        symbol: item.get("symbol").and_then(Value::as_str).map(str::to_string),
        name: item.get("name").and_then(Value::as_str).map(str::to_string),
        liquidity_usd: item.get("liquidity").and_then(Value::as_f64),
        market_cap_usd: item.get("marketCap").and_then(Value::as_f64),
        price_usd: item.get("priceUsd").and_then(Value::as_f64),
    })
}

fn parse_surge_update(content: &Value) -> Result<UpstreamEvent, SkipReason> {
    let address = content
        .get("address")
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingField("address"))?
        .to_string();
    let symbol = content
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingField("symbol"))?
        .to_string();

    Ok(UpstreamEvent::SurgeUpdate {
        address,
        symbol,
        rank: content.get("rank").and_then(Value::as_i64),
        jump: content.get("jump").and_then(Value::as_f64),
        price_usd: content.get("priceUsd").and_then(Value::as_f64),
        volume: content.get("volume").and_then(Value::as_f64),
    })
}

fn parse_market_tick(address: &str, content: &Value) -> Result<UpstreamEvent, SkipReason> {
    let price_usd = content.as_f64().ok_or(SkipReason::WrongShape("b-<address> price"))?;
    Ok(UpstreamEvent::MarketTick(MarketTick {
        address: address.to_string(),
        price_usd,
        volume_usd: 0.0,
        ts: chrono::Utc::now().timestamp_millis(),
    }))
}

fn parse_fee_update(kind: FeeKind, content: &Value) -> Result<UpstreamEvent, SkipReason> {
    let value_sol = content.as_f64().ok_or(SkipReason::WrongShape("fee content"))?;
    Ok(UpstreamEvent::FeeUpdate { kind, value_sol })
}

fn parse_block_hash(content: &Value) -> Result<UpstreamEvent, SkipReason> {
    let hash = content
        .as_str()
        .ok_or(SkipReason::WrongShape("block_hash content"))?
        .to_string();
    Ok(UpstreamEvent::BlockHash { hash })
}

fn parse_bulk_pulse(content: &Value) -> Result<UpstreamEvent, SkipReason> {
    let count = content.as_array().map(|a| a.len()).unwrap_or(0);
    Ok(UpstreamEvent::BulkPulse { count })
}

/// Parse one element of the whale feed's 28-field array schema. Only the
/// fields the scoring pipeline needs are extracted; the rest are ignored.
pub fn parse_whale_trade(item: &Value) -> Result<UpstreamEvent, SkipReason> {
    let address = item
        .get("fromToken")
        .and_then(Value::as_str)
        .or_else(|| item.get("toToken").and_then(Value::as_str))
        .ok_or(SkipReason::MissingField("fromToken|toToken"))?
        .to_string();

    let action_str = item
        .get("action")
        .and_then(Value::as_str)
        .ok_or(SkipReason::MissingField("action"))?;
    let action = match action_str {
        "buy" => WhaleAction::Buy,
        "sell" => WhaleAction::Sell,
        _ => return Err(SkipReason::WrongShape("action must be buy|sell")),
    };

    let amount_usd = item
        .get("solAmount")
        .and_then(Value::as_f64)
        .ok_or(SkipReason::MissingField("solAmount"))?;
    let profit_usd = item.get("profitUsd").and_then(Value::as_f64).unwrap_or(0.0);

    Ok(UpstreamEvent::WhaleTrade {
        address,
        symbol: item.get("symbol").and_then(Value::as_str).map(str::to_string),
        action,
        amount_usd,
        profit_usd,
    })
}

/// Convert a [`UpstreamEvent::NewToken`]/`SurgeUpdate` into a canonical
/// [`TokenCandidate`] ready for Token Intake. Returns `None` for events that
/// never produce a candidate (market ticks, fees, block hashes).
pub fn to_candidate(event: &UpstreamEvent, now_ms: i64) -> Option<TokenCandidate> {
    match event {
        UpstreamEvent::NewToken {
            address,
            symbol,
            name,
            liquidity_usd,
            price_usd,
            ..
        } => Some(TokenCandidate {
            address: address.clone(),
            symbol: symbol.clone().unwrap_or_default().to_lowercase(),
            name: name.clone().unwrap_or_default(),
            first_seen_at: now_ms,
            initial_liquidity_usd: liquidity_usd.unwrap_or(0.0),
            initial_price_usd: *price_usd,
            source: CandidateSource::NewPairs,
        }),
        UpstreamEvent::SurgeUpdate {
            address,
            symbol,
            price_usd,
            ..
        } => Some(TokenCandidate {
            address: address.clone(),
            symbol: symbol.to_lowercase(),
            name: String::new(),
            first_seen_at: now_ms,
            initial_liquidity_usd: 0.0,
            initial_price_usd: *price_usd,
            source: CandidateSource::SurgeUpdate,
        }),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_new_pairs_single_object() {
        let env = json!({
            "room": "new_pairs",
            "content": { "address": "A1", "symbol": "FOO", "liquidity": 50000.0 }
        });
        let events = parse_envelope(&env).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            UpstreamEvent::NewToken { address, liquidity_usd, .. } => {
                assert_eq!(address, "A1");
                assert_eq!(*liquidity_usd, Some(50000.0));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_new_pairs_array() {
        let env = json!({
            "room": "new_pairs",
            "content": [
                { "address": "A1" },
                { "token": "A2" },
            ]
        });
        let events = parse_envelope(&env).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn missing_address_is_a_skip_not_a_panic() {
        let env = json!({ "room": "new_pairs", "content": { "symbol": "FOO" } });
        let err = parse_envelope(&env).unwrap_err();
        assert_eq!(err, SkipReason::MissingField("address|token"));
    }

    #[test]
    fn parses_market_tick_room() {
        let env = json!({ "room": "b-A1", "content": 0.0042 });
        let events = parse_envelope(&env).unwrap();
        match &events[0] {
            UpstreamEvent::MarketTick(tick) => {
                assert_eq!(tick.address, "A1");
                assert!((tick.price_usd - 0.0042).abs() < f64::EPSILON);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unrecognized_room_is_a_typed_skip() {
        let env = json!({ "room": "mystery", "content": {} });
        assert_eq!(
            parse_envelope(&env).unwrap_err(),
            SkipReason::UnrecognizedRoom("mystery".to_string())
        );
    }

    #[test]
    fn connection_monitor_room_yields_no_events() {
        let env = json!({ "room": "connection_monitor", "content": 1_700_000_000_000i64 });
        assert_eq!(parse_envelope(&env).unwrap().len(), 0);
    }

    #[test]
    fn bulk_pulse_never_becomes_a_candidate() {
        let event = UpstreamEvent::BulkPulse { count: 10 };
        assert!(to_candidate(&event, 0).is_none());
    }

    #[test]
    fn whale_trade_requires_valid_action() {
        let item = json!({
            "fromToken": "A1",
            "action": "sideways",
            "solAmount": 1.0,
        });
        assert!(parse_whale_trade(&item).is_err());
    }

    #[test]
    fn whale_trade_parses_buy() {
        let item = json!({
            "fromToken": "A1",
            "symbol": "FOO",
            "action": "buy",
            "solAmount": 12.5,
            "profitUsd": 3.2,
        });
        match parse_whale_trade(&item).unwrap() {
            UpstreamEvent::WhaleTrade { action, amount_usd, profit_usd, .. } => {
                assert_eq!(action, WhaleAction::Buy);
                assert!((amount_usd - 12.5).abs() < f64::EPSILON);
                assert!((profit_usd - 3.2).abs() < f64::EPSILON);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn new_token_to_candidate_lowercases_symbol() {
        let event = UpstreamEvent::NewToken {
            address: "A1".to_string(),
            symbol: Some("FOO".to_string()),
            name: Some("Foo Coin".to_string()),
            liquidity_usd: Some(1000.0),
            market_cap_usd: None,
            price_usd: Some(0.01),
        };
        let candidate = to_candidate(&event, 1_000).unwrap();
        assert_eq!(candidate.symbol, "foo");
        assert_eq!(candidate.source, CandidateSource::NewPairs);
    }
}
