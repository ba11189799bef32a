//! Trade and depth-level primitives.

/// A single aggregated trade event, post-parse.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trade {
    pub id: i64,
    pub price: f64,
    pub quantity: f64,
    /// Exchange trade time, unix milliseconds.
    pub time_ms: i64,
    /// True when the resting order was a bid, i.e. the aggressor sold.
    pub is_maker_buyer: bool,
}

impl Trade {
    /// Signed taker quantity: negative when the aggressor sold.
    #[inline]
    pub fn signed_delta(&self) -> f64 {
        if self.is_maker_buyer {
            -self.quantity
        } else {
            self.quantity
        }
    }
}

/// One bid or ask level of the L2 book.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}
