//! Trading session and instrument classification.
//!
//! Sessions are derived purely from the bar's UTC hour so the mapping can
//! never drift between replay runs. They feed threshold/min-RR lookup only;
//! structure identity never touches them.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::bar::Timeframe;

/// Major trading session, by UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Session {
    Asian,
    London,
    NewYork,
}

impl Session {
    /// Session for a UTC timestamp.
    /// Asian 00-06, London 07-11, New York 12-20; 21-23 rolls into the
    /// following Asian session.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Session {
        match ts.hour() {
            0..=6 => Session::Asian,
            7..=11 => Session::London,
            12..=20 => Session::NewYork,
            _ => Session::Asian,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Asian => "ASIAN",
            Session::London => "LONDON",
            Session::NewYork => "NEW_YORK",
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse instrument class for threshold lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentClass {
    Forex,
    Metals,
    Indices,
    Crypto,
}

impl InstrumentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentClass::Forex => "FOREX",
            InstrumentClass::Metals => "METALS",
            InstrumentClass::Indices => "INDICES",
            InstrumentClass::Crypto => "CRYPTO",
        }
    }
}

impl std::fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookup key for session/timeframe-scoped tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub session: Session,
    pub class: InstrumentClass,
    pub timeframe: Timeframe,
}

impl SessionContext {
    pub fn new(session: Session, class: InstrumentClass, timeframe: Timeframe) -> Self {
        Self { session, class, timeframe }
    }
}
