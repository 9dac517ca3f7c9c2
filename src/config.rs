//! Capture configuration.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::traits::ColorSpace;

/// Selects which capture device a session attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceQuery {
    /// First device in discovery order.
    #[default]
    Default,
    /// Nth device when sorted by display name.
    Index(usize),
    /// First device whose display name matches exactly.
    Name(String),
}

impl fmt::Display for DeviceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("<default>"),
            Self::Index(idx) => write!(f, "at index {idx}"),
            Self::Name(name) => write!(f, "with name '{name}'"),
        }
    }
}

impl FromStr for DeviceQuery {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Default);
        }
        Ok(s.parse::<usize>()
            .map_or_else(|_| Self::Name(s.to_owned()), Self::Index))
    }
}

/// Configuration for a capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    query: DeviceQuery,
    color_space: ColorSpace,
    buffer_count: u32,
    poll_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            query: DeviceQuery::Default,
            color_space: ColorSpace::Rgb,
            buffer_count: 4,
            poll_timeout: Duration::from_millis(250),
        }
    }
}

impl CaptureConfig {
    /// Set the device selection query.
    #[must_use]
    pub fn with_query(mut self, query: DeviceQuery) -> Self {
        self.query = query;
        self
    }

    /// Select the nth device sorted by name.
    #[must_use]
    pub fn with_index(self, index: usize) -> Self {
        self.with_query(DeviceQuery::Index(index))
    }

    /// Select a device by exact display name.
    #[must_use]
    pub fn with_name<S: Into<String>>(self, name: S) -> Self {
        self.with_query(DeviceQuery::Name(name.into()))
    }

    /// Set the colour space used when `open` is not given one.
    #[must_use]
    pub const fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    /// Set the number of driver buffers used for streaming.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Set how long the producer waits for a frame before rechecking cancellation.
    #[must_use]
    pub const fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    // Getters
    /// Device selection.
    pub const fn query(&self) -> &DeviceQuery {
        &self.query
    }

    /// Colour space used when `open` is not given one.
    pub const fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Number of driver buffers to request.
    pub const fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// How long the producer waits for a frame before checking for cancellation.
    pub const fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing() {
        assert_eq!("".parse::<DeviceQuery>(), Ok(DeviceQuery::Default));
        assert_eq!("2".parse::<DeviceQuery>(), Ok(DeviceQuery::Index(2)));
        assert_eq!(
            "USB Camera".parse::<DeviceQuery>(),
            Ok(DeviceQuery::Name("USB Camera".to_owned()))
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.query(), &DeviceQuery::Default);
        assert_eq!(config.color_space(), ColorSpace::Rgb);
        assert_eq!(config.buffer_count(), 4);
        assert_eq!(config.poll_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_config_builder() {
        let config = CaptureConfig::default()
            .with_name("Integrated Camera")
            .with_color_space(ColorSpace::Greyscale)
            .with_buffer_count(2);
        assert_eq!(
            config.query(),
            &DeviceQuery::Name("Integrated Camera".to_owned())
        );
        assert_eq!(config.color_space(), ColorSpace::Greyscale);
        assert_eq!(config.buffer_count(), 2);
    }
}
