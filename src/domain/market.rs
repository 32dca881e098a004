use serde::{Deserialize, Serialize};

/// Contract direction. Brokers call these CALL (price ends higher) and PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "up")]
    Call,
    #[serde(alias = "down")]
    Put,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Call => "call",
            Direction::Put => "put",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

/// Strip any configured broker suffix from an asset name ("EURUSD-OTC" -> "EURUSD")
pub fn base_pair<'a>(asset: &'a str, suffixes: &[String]) -> &'a str {
    suffixes
        .iter()
        .filter(|s| !s.is_empty())
        .find_map(|s| asset.strip_suffix(s.as_str()))
        .unwrap_or(asset)
}
