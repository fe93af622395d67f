//! Instrument precision and tick-unit tables.

use std::fmt;
use std::str::FromStr;

const CRYPTO_DECIMALS: i32 = 8;

/// Market an instrument trades on. Decides price/quantity precision and
/// the tick unit used for limit-order offsets and repricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Market {
    /// Integer prices and whole-share quantities.
    #[default]
    Equity,
    /// Eight-decimal prices and quantities.
    Crypto,
}

impl Market {
    pub fn round_price(self, price: f64) -> f64 {
        match self {
            Market::Equity => price.round(),
            Market::Crypto => round_decimals(price, CRYPTO_DECIMALS),
        }
    }

    /// Round a quantity to what can actually be ordered. Always rounds down.
    pub fn floor_quantity(self, quantity: f64) -> f64 {
        if quantity <= 0.0 {
            return 0.0;
        }
        match self {
            // the epsilons absorb representation error, e.g. 99 * (1/3) or 0.3 * 1e8
            Market::Equity => (quantity + 1e-9).floor(),
            Market::Crypto => {
                let scale = 10f64.powi(CRYPTO_DECIMALS);
                ((quantity * scale) + 1e-6).floor() / scale
            }
        }
    }

    /// Minimum price increment at `price`.
    pub fn tick_unit(self, price: f64) -> f64 {
        match self {
            Market::Equity => {
                if price < 2_000.0 {
                    1.0
                } else if price < 5_000.0 {
                    5.0
                } else if price < 20_000.0 {
                    10.0
                } else if price < 50_000.0 {
                    50.0
                } else if price < 200_000.0 {
                    100.0
                } else if price < 500_000.0 {
                    500.0
                } else {
                    1_000.0
                }
            }
            Market::Crypto => {
                if price >= 2_000_000.0 {
                    1_000.0
                } else if price >= 1_000_000.0 {
                    500.0
                } else if price >= 500_000.0 {
                    100.0
                } else if price >= 100_000.0 {
                    50.0
                } else if price >= 10_000.0 {
                    10.0
                } else if price >= 1_000.0 {
                    1.0
                } else if price >= 100.0 {
                    0.1
                } else if price >= 10.0 {
                    0.01
                } else if price >= 1.0 {
                    0.001
                } else {
                    0.0001
                }
            }
        }
    }

    /// Snap `price` onto the tick grid at its level.
    pub fn snap_to_tick(self, price: f64) -> f64 {
        let unit = self.tick_unit(price);
        self.round_price((price / unit).round() * unit)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Equity => write!(f, "equity"),
            Market::Crypto => write!(f, "crypto"),
        }
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "equity" | "stock" => Ok(Market::Equity),
            "crypto" | "coin" => Ok(Market::Crypto),
            other => Err(format!("unknown market '{}'", other)),
        }
    }
}

fn round_decimals(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
