//! Pure indicator functions over OHLCV series.
//!
//! Series functions return vectors aligned to their input. The `latest_*`
//! helpers return `None` when the input is too short, which callers turn
//! into "no signal" rather than an error.

use crate::models::Candle;

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period <= 1 {
        return prices.to_vec();
    }
    if prices.len() < period {
        return vec![prices[0]; prices.len()];
    }

    let mut sma_values = Vec::with_capacity(prices.len());
    for _ in 0..period - 1 {
        sma_values.push(prices[0]);
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

pub fn latest_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }
    calculate_ema(prices, period).last().copied()
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(macd, signal)| macd - signal)
        .collect();

    (macd_line, signal_line, histogram)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub previous_histogram: f64,
}

pub fn latest_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdReading> {
    if fast_period == 0 || slow_period <= fast_period || signal_period == 0 {
        return None;
    }
    if prices.len() < slow_period + signal_period {
        return None;
    }
    let (macd_line, signal_line, histogram) =
        calculate_macd(prices, fast_period, slow_period, signal_period);
    let n = histogram.len();
    Some(MacdReading {
        macd: macd_line[n - 1],
        signal: signal_line[n - 1],
        histogram: histogram[n - 1],
        previous_histogram: histogram[n - 2],
    })
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Wilder RSI. Values before the first full period are padded with 50.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }
    if period == 0 || prices.len() <= period {
        return vec![50.0; prices.len()];
    }

    let mut rsi_values = vec![50.0; prices.len()];
    let mut sum_gain = 0.0f64;
    let mut sum_loss = 0.0f64;
    for i in 1..=period {
        let delta = prices[i] - prices[i - 1];
        if delta >= 0.0 {
            sum_gain += delta;
        } else {
            sum_loss += -delta;
        }
    }

    let mut avg_gain = sum_gain / period as f64;
    let mut avg_loss = sum_loss / period as f64;
    rsi_values[period] = rsi_from_avgs(avg_gain, avg_loss);

    for i in (period + 1)..prices.len() {
        let delta = prices[i] - prices[i - 1];
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { -delta } else { 0.0 };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        rsi_values[i] = rsi_from_avgs(avg_gain, avg_loss);
    }

    rsi_values
}

pub fn latest_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() <= period {
        return None;
    }
    calculate_rsi(prices, period).last().copied()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BollingerReading {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerReading {
    /// Position of `price` inside the bands: 0 at the lower band, 1 at the upper.
    pub fn percent_b(&self, price: f64) -> f64 {
        let width = self.upper - self.lower;
        if width <= 0.0 {
            0.5
        } else {
            (price - self.lower) / width
        }
    }
}

pub fn calculate_bollinger_bands(
    prices: &[f64],
    period: usize,
    std_dev: f64,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if period == 0 || prices.len() < period {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let sma = calculate_sma(prices, period);
    let mut upper = Vec::with_capacity(prices.len() + 1 - period);
    let mut middle = Vec::with_capacity(prices.len() + 1 - period);
    let mut lower = Vec::with_capacity(prices.len() + 1 - period);

    for i in (period - 1)..prices.len() {
        let window = &prices[i + 1 - period..=i];
        let mean = sma[i];
        let variance = window.iter().map(|&val| (val - mean).powi(2)).sum::<f64>() / period as f64;
        let standard_deviation = variance.sqrt();

        upper.push(mean + std_dev * standard_deviation);
        middle.push(mean);
        lower.push(mean - std_dev * standard_deviation);
    }

    (upper, middle, lower)
}

pub fn latest_bollinger(prices: &[f64], period: usize, std_dev: f64) -> Option<BollingerReading> {
    let (upper, middle, lower) = calculate_bollinger_bands(prices, period, std_dev);
    Some(BollingerReading {
        upper: *upper.last()?,
        middle: *middle.last()?,
        lower: *lower.last()?,
    })
}

/// ATR as the simple mean of true range, one value per complete window.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() <= period {
        return Vec::new();
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| {
            let (prev, current) = (&pair[0], &pair[1]);
            (current.high - current.low)
                .max((current.high - prev.close).abs())
                .max((current.low - prev.close).abs())
        })
        .collect();

    let mut atr_values = Vec::with_capacity(true_ranges.len() + 1 - period);
    let mut window_sum: f64 = true_ranges[..period].iter().sum();
    atr_values.push(window_sum / period as f64);
    for i in period..true_ranges.len() {
        window_sum += true_ranges[i] - true_ranges[i - period];
        atr_values.push(window_sum / period as f64);
    }

    atr_values
}

pub fn latest_atr(candles: &[Candle], period: usize) -> Option<f64> {
    calculate_atr(candles, period).last().copied()
}

/// Current volume divided by the mean of the previous `lookback` volumes.
pub fn volume_ratio(volumes: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || volumes.len() <= lookback {
        return None;
    }
    let current = *volumes.last()?;
    let history = &volumes[volumes.len() - 1 - lookback..volumes.len() - 1];
    let average = history.iter().sum::<f64>() / lookback as f64;
    if average <= 0.0 {
        return None;
    }
    Some(current / average)
}

/// Approximate order-flow delta: up-candle volume minus down-candle volume.
pub fn volume_delta(candles: &[Candle]) -> f64 {
    candles
        .iter()
        .map(|c| {
            if c.is_bullish() {
                c.volume
            } else if c.is_bearish() {
                -c.volume
            } else {
                0.0
            }
        })
        .sum()
}

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeProfile {
    pub price_low: f64,
    pub price_high: f64,
    pub bin_width: f64,
    pub bins: Vec<f64>,
    pub total_volume: f64,
    pub poc_index: usize,
    pub value_area_low: f64,
    pub value_area_high: f64,
}

impl VolumeProfile {
    pub fn bin_center(&self, index: usize) -> f64 {
        self.price_low + (index as f64 + 0.5) * self.bin_width
    }

    pub fn poc_price(&self) -> f64 {
        self.bin_center(self.poc_index)
    }

    /// Local volume maxima at or above the mean bin volume, in price order.
    pub fn high_volume_nodes(&self) -> Vec<usize> {
        let n = self.bins.len();
        let mean = self.total_volume / n as f64;
        (0..n)
            .filter(|&i| {
                let volume = self.bins[i];
                let left = if i > 0 { self.bins[i - 1] } else { f64::MIN };
                let right = if i + 1 < n { self.bins[i + 1] } else { f64::MIN };
                volume >= mean && volume >= left && volume >= right && volume > 0.0
            })
            .collect()
    }
}

/// Volume-by-price histogram. Each candle's volume is spread evenly over the
/// bins its high-low range touches.
pub fn calculate_volume_profile(
    candles: &[Candle],
    bin_count: usize,
    value_area_ratio: f64,
) -> Option<VolumeProfile> {
    if candles.is_empty() || bin_count == 0 {
        return None;
    }
    let price_low = candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let price_high = candles
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);
    if !price_low.is_finite() || !price_high.is_finite() || price_high <= price_low {
        return None;
    }

    let bin_width = (price_high - price_low) / bin_count as f64;
    let index_of = |price: f64| -> usize {
        let raw = ((price - price_low) / bin_width).floor();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(bin_count - 1)
        }
    };

    let mut bins = vec![0.0; bin_count];
    for candle in candles {
        if candle.volume <= 0.0 {
            continue;
        }
        let first = index_of(candle.low);
        let last = index_of(candle.high);
        let share = candle.volume / (last - first + 1) as f64;
        for bin in &mut bins[first..=last] {
            *bin += share;
        }
    }

    let total_volume: f64 = bins.iter().sum();
    if total_volume <= 0.0 {
        return None;
    }

    let poc_index = bins
        .iter()
        .enumerate()
        .fold(0usize, |best, (i, &v)| if v > bins[best] { i } else { best });

    let target = total_volume * value_area_ratio.clamp(0.0, 1.0);
    let (mut lo, mut hi) = (poc_index, poc_index);
    let mut covered = bins[poc_index];
    while covered < target {
        let above = if hi + 1 < bin_count { Some(bins[hi + 1]) } else { None };
        let below = if lo > 0 { Some(bins[lo - 1]) } else { None };
        match (above, below) {
            (Some(up), Some(down)) if up >= down => {
                hi += 1;
                covered += up;
            }
            (Some(_), Some(down)) => {
                lo -= 1;
                covered += down;
            }
            (Some(up), None) => {
                hi += 1;
                covered += up;
            }
            (None, Some(down)) => {
                lo -= 1;
                covered += down;
            }
            (None, None) => break,
        }
    }

    Some(VolumeProfile {
        price_low,
        price_high,
        bin_width,
        value_area_low: price_low + lo as f64 * bin_width,
        value_area_high: price_low + (hi + 1) as f64 * bin_width,
        bins,
        total_volume,
        poc_index,
    })
}
