//! Conversions between raw register words and physical quantities.
//!
//! Fractional quantities use the "integer plus fraction" pairs that host
//! measurement frameworks exchange ([`IntPlusMicro`], [`IntPlusNano`]), so
//! values round-trip through text without floating point drift.
//!
//! | Quantity      | Raw encoding                         | Exposed as              |
//! |---------------|--------------------------------------|-------------------------|
//! | Temperature   | 15-bit magnitude, 0.02 K/LSB, bit 15 = error | raw + offset/scale |
//! | Emissivity    | `round(16384 * e)`                   | [`IntPlusNano`]         |
//! | IIR bandwidth | 3-bit table index                    | [`IntPlusMicro`]        |

use std::fmt;
use std::str::FromStr;

use crate::error::{Mlx90615Error, Result};
use crate::registers::{Register, ERROR_FLAG, MAGNITUDE_MASK};

/// Kelvin offset in LSB units: -273.15 K / 0.02 K = -13657.5.
pub const TEMPERATURE_OFFSET: IntPlusMicro = IntPlusMicro {
    integer: -13657,
    micro: 500_000,
};

/// Temperature scale in milli-Kelvin per LSB (0.02 K).
pub const TEMPERATURE_SCALE: i32 = 20;

/// Raw emissivity word representing exactly 1.0.
pub const EMISSIVITY_RAW_MAX: u16 = 16384;

/// One emissivity LSB in nano-units, `1 / 16384 ~ 0.000061035`.
pub const EMISSIVITY_RESOLUTION_NANO: u32 = 61035;

/// IIR bandwidth in percent, indexed by the 3-bit configuration field.
///
/// Index 0 is forbidden by the device.
pub const FILTER_BANDWIDTHS: [u8; 8] = [0, 100, 50, 33, 25, 20, 16, 14];

const AVAILABLE_FILTER_BANDWIDTHS: &str = "1.0 0.5 0.33 0.25 0.2 0.16 0.14";

macro_rules! fixed_point {
    ($(#[$meta:meta])* $name:ident, $frac:ident, $digits:literal, $unit:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name {
            /// Integer part; carries the sign unless it is zero
            pub integer: i32,
            /// Fractional part; negative only when `integer` is zero
            pub $frac: i32,
        }

        impl $name {
            /// Fractional units per whole unit.
            pub const UNIT: i64 = $unit;

            /// Create a value from its parts.
            pub const fn new(integer: i32, $frac: i32) -> Self {
                Self { integer, $frac }
            }

            /// Total value in fractional units.
            pub const fn to_fraction_units(self) -> i64 {
                let whole = self.integer as i64 * Self::UNIT;
                if self.integer < 0 {
                    whole - self.$frac as i64
                } else {
                    whole + self.$frac as i64
                }
            }

            /// Approximate value as a float.
            pub fn as_f64(self) -> f64 {
                self.to_fraction_units() as f64 / Self::UNIT as f64
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.integer == 0 && self.$frac < 0 {
                    write!(f, "-0.{:0width$}", self.$frac.unsigned_abs(), width = $digits)
                } else {
                    write!(
                        f,
                        "{}.{:0width$}",
                        self.integer,
                        self.$frac.unsigned_abs(),
                        width = $digits
                    )
                }
            }
        }

        impl FromStr for $name {
            type Err = Mlx90615Error;

            fn from_str(s: &str) -> Result<Self> {
                let (integer, fraction) = parse_fixed_point(s, $digits)?;
                Ok(Self {
                    integer,
                    $frac: fraction,
                })
            }
        }
    };
}

fixed_point!(
    /// Value with six fractional digits, e.g. `0.330000`.
    IntPlusMicro,
    micro,
    6,
    1_000_000
);

fixed_point!(
    /// Value with nine fractional digits, e.g. `0.999936405`.
    IntPlusNano,
    nano,
    9,
    1_000_000_000
);

/// Parse decimal text into an integer/fraction pair with `digits` fractional digits.
///
/// Extra fractional digits are truncated.
fn parse_fixed_point(text: &str, digits: usize) -> Result<(i32, i32)> {
    let invalid = || Mlx90615Error::invalid_argument(format!("'{}' is not a decimal number", text));

    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_text, frac_text) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    if int_text.is_empty() && frac_text.is_empty() {
        return Err(invalid());
    }
    if !int_text.bytes().chain(frac_text.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let integer: i32 = if int_text.is_empty() {
        0
    } else {
        int_text.parse().map_err(|_| invalid())?
    };

    let mut fraction: i32 = 0;
    for position in 0..digits {
        let digit = frac_text.as_bytes().get(position).map_or(0, |b| i32::from(b - b'0'));
        fraction = fraction * 10 + digit;
    }

    Ok(match (negative, integer) {
        (false, _) => (integer, fraction),
        (true, 0) => (0, -fraction),
        (true, _) => (-integer, fraction),
    })
}

/// A validated temperature reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Temperature {
    raw: u16,
}

impl Temperature {
    /// The raw register word (error flag clear).
    pub const fn raw(self) -> u16 {
        self.raw
    }

    /// `(raw + offset) * scale` in milli-Celsius.
    pub const fn millicelsius(self) -> i32 {
        let offset = TEMPERATURE_OFFSET.to_fraction_units();
        let shifted = self.raw as i64 * IntPlusMicro::UNIT + offset;
        (shifted * TEMPERATURE_SCALE as i64 / IntPlusMicro::UNIT) as i32
    }

    /// Absolute temperature in milli-Kelvin.
    pub const fn millikelvin(self) -> i32 {
        self.raw as i32 * TEMPERATURE_SCALE
    }

    /// Temperature in degrees Celsius.
    pub fn celsius(self) -> f64 {
        f64::from(self.millicelsius()) / 1000.0
    }

    /// Temperature in Kelvin.
    pub fn kelvin(self) -> f64 {
        f64::from(self.millikelvin()) / 1000.0
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} °C", self.celsius())
    }
}

/// Reject a temperature word whose error flag is set.
pub fn check_error_flag(register: Register, raw: u16) -> Result<u16> {
    if raw & ERROR_FLAG != 0 {
        return Err(Mlx90615Error::HardwareFault { register, raw });
    }
    Ok(raw)
}

/// Validate a temperature word read from `register`.
pub fn raw_to_temperature(register: Register, raw: u16) -> Result<Temperature> {
    check_error_flag(register, raw).map(|raw| Temperature { raw })
}

/// Decode the raw IR word (sign bit 15, 15-bit magnitude).
pub fn decode_raw_ir(raw: u16) -> i16 {
    let magnitude = (raw & MAGNITUDE_MASK) as i16;
    if raw & ERROR_FLAG != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Convert the emissivity word to a fraction of 1.0.
pub fn raw_to_emissivity(raw: u16) -> IntPlusNano {
    if raw == EMISSIVITY_RAW_MAX {
        return IntPlusNano::new(1, 0);
    }
    // Words above 16384 are never written by this driver; keep them normalized.
    let total = i64::from(raw) * i64::from(EMISSIVITY_RESOLUTION_NANO);
    IntPlusNano::new(
        (total / IntPlusNano::UNIT) as i32,
        (total % IntPlusNano::UNIT) as i32,
    )
}

/// Convert an emissivity in `[0.0, 1.0]` to its register word.
pub fn emissivity_to_raw(value: IntPlusNano) -> Result<u16> {
    let IntPlusNano { integer, nano } = value;
    if integer < 0 || nano < 0 || i64::from(nano) >= IntPlusNano::UNIT {
        return Err(Mlx90615Error::invalid_argument(format!(
            "emissivity {} is negative or malformed",
            value
        )));
    }
    if integer > 1 || (integer == 1 && nano != 0) {
        return Err(Mlx90615Error::invalid_argument(format!(
            "emissivity {} exceeds 1.0",
            value
        )));
    }
    let raw = integer as u32 * u32::from(EMISSIVITY_RAW_MAX) + nano as u32 / EMISSIVITY_RESOLUTION_NANO;
    Ok(raw as u16)
}

/// Check that `index` selects one of the seven usable filter settings.
pub fn validate_filter_index(index: u8) -> Result<u8> {
    match index {
        1..=7 => Ok(index),
        0 => Err(Mlx90615Error::invalid_argument(
            "filter index 0 is reserved by the device",
        )),
        _ => Err(Mlx90615Error::invalid_argument(format!(
            "filter index {} is out of range 1-7",
            index
        ))),
    }
}

/// Bandwidth of filter setting `index`, where 1.0 means no attenuation of spikes.
pub fn filter_index_to_bandwidth(index: u8) -> Result<IntPlusMicro> {
    let percent = i32::from(FILTER_BANDWIDTHS[usize::from(validate_filter_index(index)?)]);
    Ok(IntPlusMicro::new(percent / 100, (percent % 100) * 10_000))
}

/// Filter index whose bandwidth matches `value`.
///
/// The fraction is truncated to whole percent before the table lookup, so
/// `0.339999` selects the `0.330000` setting.
pub fn bandwidth_to_filter_index(value: IntPlusMicro) -> Result<u8> {
    let IntPlusMicro { integer, micro } = value;
    if !(0..=1).contains(&integer) || micro < 0 || i64::from(micro) >= IntPlusMicro::UNIT {
        return Err(Mlx90615Error::invalid_argument(format!(
            "filter bandwidth {} is outside 0.0-1.0",
            value
        )));
    }
    let percent = integer * 100 + micro / 10_000;
    FILTER_BANDWIDTHS
        .iter()
        .enumerate()
        .skip(1)
        .find(|&(_, &bandwidth)| i32::from(bandwidth) == percent)
        .map(|(index, _)| index as u8)
        .ok_or_else(|| {
            Mlx90615Error::invalid_argument(format!(
                "filter bandwidth {} is not one of {}",
                value, AVAILABLE_FILTER_BANDWIDTHS
            ))
        })
}

/// Space-separated list of the bandwidths accepted by [`bandwidth_to_filter_index`].
pub const fn available_filter_bandwidths() -> &'static str {
    AVAILABLE_FILTER_BANDWIDTHS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_conversion() {
        // 25.01 °C = 298.16 K = 14908 * 0.02 K
        let t = raw_to_temperature(Register::Ambient, 14908).unwrap();
        assert_eq!(t.millikelvin(), 298_160);
        assert_eq!(t.millicelsius(), 25_010);
        assert!((t.celsius() - 25.01).abs() < 1e-9);

        let zero = raw_to_temperature(Register::Object, 0).unwrap();
        assert_eq!(zero.millicelsius(), -273_150);
    }

    #[test]
    fn test_error_flag_is_fault() {
        for raw in [0x8000u16, 0x8001, 0xBA3C, 0xFFFF] {
            let err = raw_to_temperature(Register::Object, raw).unwrap_err();
            assert_eq!(
                err,
                Mlx90615Error::HardwareFault {
                    register: Register::Object,
                    raw
                }
            );
        }
        assert!(raw_to_temperature(Register::Object, 0x7FFF).is_ok());
    }

    #[test]
    fn test_offset_constant() {
        assert_eq!(TEMPERATURE_OFFSET.to_string(), "-13657.500000");
        assert!((TEMPERATURE_OFFSET.as_f64() + 13657.5).abs() < 1e-9);
    }

    #[test]
    fn test_raw_ir_sign_magnitude() {
        assert_eq!(decode_raw_ir(0x0123), 0x0123);
        assert_eq!(decode_raw_ir(0x8123), -0x0123);
        assert_eq!(decode_raw_ir(0x8000), 0);
    }

    #[test]
    fn test_emissivity_boundaries() {
        assert_eq!(raw_to_emissivity(16384), IntPlusNano::new(1, 0));
        assert_eq!(raw_to_emissivity(0), IntPlusNano::new(0, 0));
        assert_eq!(raw_to_emissivity(16383), IntPlusNano::new(0, 999_936_405));
        assert_eq!(raw_to_emissivity(16385), IntPlusNano::new(1, 58_475));
    }

    #[test]
    fn test_emissivity_round_trip() {
        for raw in 0..=EMISSIVITY_RAW_MAX {
            assert_eq!(emissivity_to_raw(raw_to_emissivity(raw)).unwrap(), raw);
        }
    }

    #[test]
    fn test_emissivity_rejects_out_of_domain() {
        for value in [
            IntPlusNano::new(1, 1),
            IntPlusNano::new(2, 0),
            IntPlusNano::new(-1, 0),
            IntPlusNano::new(0, -5),
            IntPlusNano::new(0, 1_000_000_000),
        ] {
            assert!(emissivity_to_raw(value).unwrap_err().is_invalid_argument());
        }
    }

    #[test]
    fn test_emissivity_truncates() {
        // 0.95 * 16384 = 15564.8
        assert_eq!(emissivity_to_raw(IntPlusNano::new(0, 950_000_000)).unwrap(), 15564);
    }

    #[test]
    fn test_filter_round_trip() {
        for index in 1..=7 {
            let bandwidth = filter_index_to_bandwidth(index).unwrap();
            assert_eq!(bandwidth_to_filter_index(bandwidth).unwrap(), index);
        }
        assert_eq!(filter_index_to_bandwidth(1).unwrap(), IntPlusMicro::new(1, 0));
        assert_eq!(filter_index_to_bandwidth(3).unwrap(), IntPlusMicro::new(0, 330_000));
    }

    #[test]
    fn test_filter_rejects_reserved() {
        assert!(filter_index_to_bandwidth(0).unwrap_err().is_invalid_argument());
        assert!(filter_index_to_bandwidth(8).unwrap_err().is_invalid_argument());
        assert!(bandwidth_to_filter_index(IntPlusMicro::new(0, 0)).is_err());
        assert!(bandwidth_to_filter_index(IntPlusMicro::new(0, 400_000)).is_err());
        assert!(bandwidth_to_filter_index(IntPlusMicro::new(2, 0)).is_err());
    }

    #[test]
    fn test_bandwidth_truncates_to_whole_percent() {
        assert_eq!(bandwidth_to_filter_index(IntPlusMicro::new(0, 339_999)).unwrap(), 3);
        assert_eq!(bandwidth_to_filter_index(IntPlusMicro::new(0, 509_999)).unwrap(), 2);
        assert_eq!(bandwidth_to_filter_index(IntPlusMicro::new(1, 0)).unwrap(), 1);
        // 0.329999 truncates to 32 percent, which is not a setting
        assert!(bandwidth_to_filter_index(IntPlusMicro::new(0, 329_999)).is_err());
    }

    #[test]
    fn test_available_bandwidths_parse_to_indices() {
        let indices: Vec<u8> = available_filter_bandwidths()
            .split_whitespace()
            .map(|s| bandwidth_to_filter_index(s.parse().unwrap()).unwrap())
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_fixed_point_text() {
        assert_eq!("0.5".parse::<IntPlusMicro>().unwrap(), IntPlusMicro::new(0, 500_000));
        assert_eq!("1".parse::<IntPlusMicro>().unwrap(), IntPlusMicro::new(1, 0));
        assert_eq!(".25".parse::<IntPlusMicro>().unwrap(), IntPlusMicro::new(0, 250_000));
        assert_eq!("-0.5".parse::<IntPlusMicro>().unwrap(), IntPlusMicro::new(0, -500_000));
        assert_eq!("-2.5".parse::<IntPlusMicro>().unwrap(), IntPlusMicro::new(-2, 500_000));
        assert_eq!(
            "0.9999999999".parse::<IntPlusNano>().unwrap(),
            IntPlusNano::new(0, 999_999_999)
        );
        assert!("abc".parse::<IntPlusMicro>().is_err());
        assert!("".parse::<IntPlusMicro>().is_err());
        assert!("1.2.3".parse::<IntPlusMicro>().is_err());

        assert_eq!(IntPlusNano::new(0, 999_936_405).to_string(), "0.999936405");
        assert_eq!(IntPlusMicro::new(0, -500_000).to_string(), "-0.500000");
    }
}
