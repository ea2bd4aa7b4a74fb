//! Storage temperature specifications
//!
//! Specs arrive as free text on item masters, "2-8°C", "68°F",
//! "25°C/60%RH" and the like. They are parsed once into an explicit
//! range and checked against readings in Celsius.

use std::fmt;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
    Kelvin,
}

impl TemperatureUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
            TemperatureUnit::Kelvin => "K",
        }
    }

    pub fn to_celsius(&self, value: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => value,
            TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            TemperatureUnit::Kelvin => value - 273.15,
        }
    }

    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
            TemperatureUnit::Kelvin => celsius + 273.15,
        }
    }
}

/// A storage condition, normalised to Celsius on parse.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureSpec {
    pub min_c: f64,
    pub max_c: f64,
    pub humidity_pct: Option<f64>,
}

impl TemperatureSpec {
    pub fn range(min_c: f64, max_c: f64) -> Self {
        Self {
            min_c,
            max_c,
            humidity_pct: None,
        }
    }

    /// A point target widened by a symmetric tolerance.
    pub fn target(celsius: f64, tolerance: f64) -> Self {
        Self::range(celsius - tolerance, celsius + tolerance)
    }

    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let malformed = || ValidationError::MalformedTemperature(text.to_string());

        let trimmed = text.trim();
        let (temp_part, humidity_part) = match trimmed.split_once('/') {
            Some((t, h)) => (t.trim(), Some(h.trim())),
            None => (trimmed, None),
        };

        let humidity_pct = match humidity_part {
            Some(part) => {
                let digits = part
                    .trim_end_matches("RH")
                    .trim_end_matches('%')
                    .trim();
                Some(digits.parse::<f64>().map_err(|_| malformed())?)
            }
            None => None,
        };

        let (numbers, unit) = if let Some(stripped) = temp_part.strip_suffix("°C") {
            (stripped, TemperatureUnit::Celsius)
        } else if let Some(stripped) = temp_part.strip_suffix("°F") {
            (stripped, TemperatureUnit::Fahrenheit)
        } else if let Some(stripped) = temp_part.strip_suffix('C') {
            (stripped, TemperatureUnit::Celsius)
        } else if let Some(stripped) = temp_part.strip_suffix('F') {
            (stripped, TemperatureUnit::Fahrenheit)
        } else if let Some(stripped) = temp_part.strip_suffix('K') {
            (stripped, TemperatureUnit::Kelvin)
        } else {
            return Err(malformed());
        };
        let numbers = numbers.trim();
        if numbers.is_empty() {
            return Err(malformed());
        }

        // A '-' after the first character separates a range, a leading
        // one is a sign. "2-8" and "-20" both parse.
        let separator = numbers
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '-')
            .map(|(pos, _)| pos);
        let (low, high) = match separator {
            Some(pos) => (numbers[..pos].trim(), numbers[pos + 1..].trim()),
            None => (numbers, numbers),
        };

        let low: f64 = low.parse().map_err(|_| malformed())?;
        let high: f64 = high.parse().map_err(|_| malformed())?;
        if low > high {
            return Err(malformed());
        }

        Ok(Self {
            min_c: unit.to_celsius(low),
            max_c: unit.to_celsius(high),
            humidity_pct,
        })
    }

    pub fn contains(&self, reading_c: f64) -> bool {
        reading_c >= self.min_c && reading_c <= self.max_c
    }

    /// Signed distance from the range, zero when compliant.
    pub fn deviation(&self, reading_c: f64) -> f64 {
        if reading_c < self.min_c {
            reading_c - self.min_c
        } else if reading_c > self.max_c {
            reading_c - self.max_c
        } else {
            0.0
        }
    }
}

impl fmt::Display for TemperatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min_c == self.max_c {
            write!(f, "{}°C", self.min_c)?;
        } else {
            write!(f, "{}-{}°C", self.min_c, self.max_c)?;
        }
        if let Some(rh) = self.humidity_pct {
            write!(f, "/{rh}%RH")?;
        }
        Ok(())
    }
}
