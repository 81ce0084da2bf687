use serde::{Deserialize, Serialize};

pub type ClientId = u32;

/// Client classification driving discounts and limit tiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Segment {
    /// Lowest-privilege segment, used whenever a client has none
    #[default]
    #[serde(rename = "MIN")]
    Retail,
    #[serde(rename = "CORP")]
    Corporate,
    #[serde(rename = "VIP")]
    Vip,
}

impl Segment {
    /// Resolve a segment code, falling back to `Retail` for anything unknown
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "CORP" | "CORPORATE" | "CORPORATIVO" => Segment::Corporate,
            "VIP" => Segment::Vip,
            _ => Segment::Retail,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Segment::Retail => "MIN",
            Segment::Corporate => "CORP",
            Segment::Vip => "VIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub segment: Option<Segment>,
}

impl Client {
    pub fn new(id: ClientId, segment: Segment) -> Self {
        Self {
            id,
            segment: Some(segment),
        }
    }

    /// Segment used for pricing and limits
    pub fn effective_segment(&self) -> Segment {
        self.segment.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Currency {
    pub code: String,
    /// Fractional digits amounts in this currency are kept to
    pub decimals: u32,
    pub is_base: bool,
}

impl Currency {
    pub fn foreign(code: &str, decimals: u32) -> Self {
        Self {
            code: code.to_string(),
            decimals,
            is_base: false,
        }
    }

    pub fn base(code: &str, decimals: u32) -> Self {
        Self {
            code: code.to_string(),
            decimals,
            is_base: true,
        }
    }
}
