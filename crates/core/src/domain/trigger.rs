// Trigger Settings & Command-Line Encoding
//
// The acquisition executable takes each channel's high/low thresholds packed
// into one 32-bit word (high in the upper half) and the multiplier as a 16.16
// fixed-point word. Tokens carry a 0x prefix because the executable parses
// integer options with base auto-detection.

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};
use super::session::CommandLine;

/// Fixed-point scale of the multiplier register (16 fractional bits)
pub const MULTIPLIER_SCALE: f64 = 65536.0;

const REGISTER_MODULUS: f64 = 4_294_967_296.0;

/// Reduce `value` modulo 2^`bits` (two's-complement bit pattern).
///
/// Values outside the signed range of `bits` wrap silently.
pub fn wrap_twos_complement(value: i64, bits: u32) -> u64 {
    debug_assert!(bits > 0 && bits < 64);
    value.rem_euclid(1i64 << bits) as u64
}

/// Encode a floating multiplier as a 32-bit 16.16 fixed-point hex token.
///
/// The scaled value is truncated toward zero before wrapping.
pub fn encode_multiplier(multiplier: f64) -> Result<String> {
    if !multiplier.is_finite() {
        return Err(DomainError::Validation(format!(
            "Multiplier must be a finite number, got {}",
            multiplier
        )));
    }

    // Integer-valued, so the f64 remainder is exact even beyond the i64 range
    let scaled = (multiplier * MULTIPLIER_SCALE).trunc();
    let word = scaled.rem_euclid(REGISTER_MODULUS) as u64;
    Ok(format!("0x{:08x}", word))
}

/// High/low trigger thresholds of one ADC channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub high: i64,
    pub low: i64,
}

impl ThresholdPair {
    pub fn new(high: i64, low: i64) -> Self {
        Self { high, low }
    }

    /// Parse a pair from text-field values
    pub fn parse(high: &str, low: &str) -> Result<Self> {
        Ok(Self {
            high: parse_level("high", high)?,
            low: parse_level("low", low)?,
        })
    }

    /// Packed register token: high half then low half, 16 bits each
    pub fn encode(&self) -> String {
        format!(
            "0x{:04x}{:04x}",
            wrap_twos_complement(self.high, 16),
            wrap_twos_complement(self.low, 16)
        )
    }
}

fn parse_level(which: &str, text: &str) -> Result<i64> {
    text.trim().parse::<i64>().map_err(|_| {
        DomainError::Validation(format!(
            "Threshold {} level must be an integer, got '{}'",
            which, text
        ))
    })
}

/// Numeric parameters of one acquisition run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSettings {
    pub channel_a: ThresholdPair,
    pub channel_b: ThresholdPair,
    pub channel_c: ThresholdPair,
    /// Passed to the executable verbatim (no validation)
    pub acq_size: String,
    pub multiplier: f64,
    pub soft_trigger: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            channel_a: ThresholdPair::new(9000, -300),
            channel_b: ThresholdPair::new(9000, -500),
            channel_c: ThresholdPair::new(9000, -500),
            acq_size: "0x200000".to_string(),
            multiplier: 3.1,
            soft_trigger: false,
        }
    }
}

impl TriggerSettings {
    /// Build settings from raw text-field values
    pub fn from_fields(
        levels: [(&str, &str); 3],
        acq_size: &str,
        multiplier: &str,
        soft_trigger: bool,
    ) -> Result<Self> {
        let [a, b, c] = levels;
        let multiplier = multiplier.trim().parse::<f64>().map_err(|_| {
            DomainError::Validation(format!(
                "Multiplier must be a number, got '{}'",
                multiplier
            ))
        })?;

        Ok(Self {
            channel_a: ThresholdPair::parse(a.0, a.1)?,
            channel_b: ThresholdPair::parse(b.0, b.1)?,
            channel_c: ThresholdPair::parse(c.0, c.1)?,
            acq_size: acq_size.to_string(),
            multiplier,
            soft_trigger,
        })
    }

    /// Argument list for the acquisition executable
    ///
    /// The trailing argument is `-t` with soft trigger enabled and an empty
    /// string otherwise, matching the historical invocation.
    pub fn to_args(&self) -> Result<Vec<String>> {
        let soft_trigger = if self.soft_trigger { "-t" } else { "" };

        Ok(vec![
            "-a".to_string(),
            self.channel_a.encode(),
            "-b".to_string(),
            self.channel_b.encode(),
            "-c".to_string(),
            self.channel_c.encode(),
            "-s".to_string(),
            self.acq_size.clone(),
            "-m".to_string(),
            encode_multiplier(self.multiplier)?,
            soft_trigger.to_string(),
        ])
    }

    pub fn command_line(&self, program: impl Into<std::path::PathBuf>) -> Result<CommandLine> {
        Ok(CommandLine::new(program, self.to_args()?))
    }
}
