//! Canonical binary wire format for snapshots.
//!
//! MessagePack-compatible and append-only. The layout is fixed:
//!
//! ```text
//! FixArray(9)
//!   [0] price       float64
//!   [1] cvd         float64
//!   [2] time_ms     int64
//!   [3] candle_1s   FixArray(9) [time, o, h, l, c, buy_vol, sell_vol, delta, avg_score]
//!   [4] candle_1m   FixArray(9)
//!   [5] orderbook   FixArray(5) [best_bid, best_ask, spread, imbalance, score]
//!   [6] oi          FixArray(4) [oi, oi_delta_short, oi_delta_long, behavior]
//!   [7] final_score float64
//!   [8] htf         FixArray(5) of candle FixArray(9), order 5m/15m/1h/4h/1d
//! ```
//!
//! Floats are always `0xCB` + 8 big-endian bytes. Integers use the positive
//! fixint for 0..=127, the negative fixint for -32..=-1, and `0xD3` + 8
//! big-endian bytes otherwise. Encoding is allocation-free past the caller's
//! buffer, so one buffer can be reused across all observers.

use crate::errors::ParseError;

use super::snapshot::{CandleSnapshot, OiSnapshot, OrderbookSnapshot, Snapshot, NUM_HTF};

/// Worst-case encoded size of a snapshot; a good starting buffer capacity.
pub const SNAPSHOT_WIRE_CAPACITY: usize = 704;

const FIXARRAY_4: u8 = 0x94;
const FIXARRAY_5: u8 = 0x95;
const FIXARRAY_9: u8 = 0x99;
const MARKER_F64: u8 = 0xcb;
const MARKER_I64: u8 = 0xd3;
const MARKER_U32: u8 = 0xce;

impl Snapshot {
    /// Append the wire encoding of this snapshot to `buf`.
    pub fn append_msgpack(&self, buf: &mut Vec<u8>) {
        buf.push(FIXARRAY_9);
        append_f64(buf, self.price);
        append_f64(buf, self.cvd);
        append_i64(buf, self.time_ms);
        append_candle(buf, &self.candle_1s);
        append_candle(buf, &self.candle_1m);
        append_orderbook(buf, &self.orderbook);
        append_oi(buf, &self.oi);
        append_f64(buf, self.final_score);

        buf.push(FIXARRAY_5);
        for candle in &self.htf {
            append_candle(buf, candle);
        }
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SNAPSHOT_WIRE_CAPACITY);
        self.append_msgpack(&mut buf);
        buf
    }
}

fn append_f64(buf: &mut Vec<u8>, v: f64) {
    buf.push(MARKER_F64);
    buf.extend_from_slice(&v.to_bits().to_be_bytes());
}

fn append_i64(buf: &mut Vec<u8>, v: i64) {
    if (0..=127).contains(&v) {
        buf.push(v as u8);
        return;
    }
    if (-32..0).contains(&v) {
        buf.push(v as u8);
        return;
    }
    buf.push(MARKER_I64);
    buf.extend_from_slice(&v.to_be_bytes());
}

fn append_candle(buf: &mut Vec<u8>, c: &CandleSnapshot) {
    buf.push(FIXARRAY_9);
    append_i64(buf, c.time);
    append_f64(buf, c.open);
    append_f64(buf, c.high);
    append_f64(buf, c.low);
    append_f64(buf, c.close);
    append_f64(buf, c.buy_vol);
    append_f64(buf, c.sell_vol);
    append_f64(buf, c.delta);
    append_f64(buf, c.avg_score);
}

fn append_orderbook(buf: &mut Vec<u8>, o: &OrderbookSnapshot) {
    buf.push(FIXARRAY_5);
    append_f64(buf, o.best_bid);
    append_f64(buf, o.best_ask);
    append_f64(buf, o.spread);
    append_f64(buf, o.imbalance);
    append_i64(buf, i64::from(o.score));
}

fn append_oi(buf: &mut Vec<u8>, o: &OiSnapshot) {
    buf.push(FIXARRAY_4);
    append_f64(buf, o.oi);
    append_f64(buf, o.oi_delta_short);
    append_f64(buf, o.oi_delta_long);
    append_i64(buf, i64::from(o.behavior));
}

/// The hydration count header: a bare MessagePack uint32, always the
/// 5-byte `0xCE` form regardless of magnitude.
pub fn count_header(n: u32) -> [u8; 5] {
    let be = n.to_be_bytes();
    [MARKER_U32, be[0], be[1], be[2], be[3]]
}

/// Parse a hydration count header.
pub fn decode_count_header(buf: &[u8]) -> Result<u32, ParseError> {
    if buf.len() != 5 || buf[0] != MARKER_U32 {
        return Err(ParseError::MsgPack("expected uint32 count header".into()));
    }
    Ok(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]))
}

/// Decode one snapshot frame. Accepts exactly what the encoder emits.
pub fn decode_snapshot(buf: &[u8]) -> Result<Snapshot, ParseError> {
    let mut r = Reader { buf, pos: 0 };
    let snap = r.read_snapshot()?;
    if r.pos != buf.len() {
        return Err(ParseError::MsgPack(format!(
            "trailing bytes after snapshot: {}",
            buf.len() - r.pos
        )));
    }
    Ok(snap)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn byte(&mut self) -> Result<u8, ParseError> {
        let b = self
            .buf
            .get(self.pos)
            .copied()
            .ok_or_else(|| ParseError::MsgPack("unexpected end of frame".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&[u8], ParseError> {
        if self.pos + n > self.buf.len() {
            return Err(ParseError::MsgPack("unexpected end of frame".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn expect_array(&mut self, len: u8) -> Result<(), ParseError> {
        let marker = self.byte()?;
        if marker != 0x90 | len {
            return Err(ParseError::MsgPack(format!(
                "expected FixArray({len}), got 0x{marker:02x}"
            )));
        }
        Ok(())
    }

    fn read_f64(&mut self) -> Result<f64, ParseError> {
        let marker = self.byte()?;
        if marker != MARKER_F64 {
            return Err(ParseError::MsgPack(format!(
                "expected float64, got 0x{marker:02x}"
            )));
        }
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_bits(u64::from_be_bytes(raw)))
    }

    fn read_i64(&mut self) -> Result<i64, ParseError> {
        let marker = self.byte()?;
        if marker <= 0x7f {
            return Ok(i64::from(marker));
        }
        if marker >= 0xe0 {
            return Ok(i64::from(marker as i8));
        }
        if marker != MARKER_I64 {
            return Err(ParseError::MsgPack(format!(
                "expected int64, got 0x{marker:02x}"
            )));
        }
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    fn read_candle(&mut self) -> Result<CandleSnapshot, ParseError> {
        self.expect_array(9)?;
        Ok(CandleSnapshot {
            time: self.read_i64()?,
            open: self.read_f64()?,
            high: self.read_f64()?,
            low: self.read_f64()?,
            close: self.read_f64()?,
            buy_vol: self.read_f64()?,
            sell_vol: self.read_f64()?,
            delta: self.read_f64()?,
            avg_score: self.read_f64()?,
        })
    }

    fn read_snapshot(&mut self) -> Result<Snapshot, ParseError> {
        self.expect_array(9)?;
        let price = self.read_f64()?;
        let cvd = self.read_f64()?;
        let time_ms = self.read_i64()?;
        let candle_1s = self.read_candle()?;
        let candle_1m = self.read_candle()?;

        self.expect_array(5)?;
        let orderbook = OrderbookSnapshot {
            best_bid: self.read_f64()?,
            best_ask: self.read_f64()?,
            spread: self.read_f64()?,
            imbalance: self.read_f64()?,
            score: self.read_i64()? as i32,
        };

        self.expect_array(4)?;
        let oi = OiSnapshot {
            oi: self.read_f64()?,
            oi_delta_short: self.read_f64()?,
            oi_delta_long: self.read_f64()?,
            behavior: self.read_i64()? as u8,
        };

        let final_score = self.read_f64()?;

        self.expect_array(5)?;
        let mut htf = [CandleSnapshot::default(); NUM_HTF];
        for slot in &mut htf {
            *slot = self.read_candle()?;
        }

        Ok(Snapshot {
            price,
            time_ms,
            cvd,
            candle_1s,
            candle_1m,
            orderbook,
            oi,
            final_score,
            htf,
        })
    }
}
