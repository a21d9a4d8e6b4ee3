use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Underlying index traded (§3, §4.E). Each has its own strike grid spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Underlying {
    Nifty,
    BankNifty,
}

impl Underlying {
    /// Strike grid spacing in index points (50 for NIFTY, 100 for BANKNIFTY).
    pub fn strike_step(&self) -> Decimal {
        match self {
            Underlying::Nifty => Decimal::from(50),
            Underlying::BankNifty => Decimal::from(100),
        }
    }

    pub fn lot_size_default(&self) -> u32 {
        match self {
            Underlying::Nifty => 75,
            Underlying::BankNifty => 15,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Underlying::Nifty => "NIFTY",
            Underlying::BankNifty => "BANKNIFTY",
        }
    }
}

impl fmt::Display for Underlying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Option side, also used as breakout direction (§4.C): a close above the
/// inside-bar range high resolves to CE, below the range low resolves to PE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Ce,
    Pe,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Ce => "CE",
            Side::Pe => "PE",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Moneyness offset direction used by the Strike Resolver (§4.E): ATM, or N
/// steps in-the-money / out-of-the-money from ATM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Moneyness {
    Atm,
    Itm(u32),
    Otm(u32),
}

/// A resolved strike on the underlying's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strike(pub i64);

impl Strike {
    pub fn value(&self) -> Decimal {
        Decimal::from(self.0)
    }
}

/// An option contract identified by underlying, expiry, strike and side.
/// `tradingsymbol` is the broker-facing identifier; callers should compare
/// contracts via canonicalized tradingsymbols (§4.K), not this struct's
/// derived equality, when matching against broker-reported positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: Underlying,
    pub expiry: NaiveDate,
    pub strike: Strike,
    pub side: Side,
    pub tradingsymbol: String,
}

impl OptionContract {
    pub fn new(underlying: Underlying, expiry: NaiveDate, strike: Strike, side: Side) -> Self {
        let tradingsymbol = format!(
            "{}{}{}{}",
            underlying.symbol(),
            expiry.format("%d%b%y").to_string().to_uppercase(),
            strike.0,
            side.as_str()
        );
        Self {
            underlying,
            expiry,
            strike,
            side,
            tradingsymbol,
        }
    }
}
