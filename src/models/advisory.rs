use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Unknown labels degrade to HOLD.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "BUY" => Signal::Buy,
            "SELL" => Signal::Sell,
            _ => Signal::Hold,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Signal::Buy => "🟢 BUY",
            Signal::Sell => "🔴 SELL",
            Signal::Hold => "🟡 HOLD",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advisory {
    pub signal: Signal,
    pub justification: String,
}

impl Advisory {
    pub fn hold(justification: impl Into<String>) -> Self {
        Self {
            signal: Signal::Hold,
            justification: justification.into(),
        }
    }
}
