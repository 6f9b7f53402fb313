//! Logging statistics from planning runs
mod cli;

pub use cli::CLILogger;

use enum_map::Enum;
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

/// Planning events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
pub enum Event {
    /// One optimization update of the plan.
    Epoch,
    /// A restart of planning from a new state.
    Replan,
}

/// A value that can be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum Loggable {
    /// Nothing. No data to log.
    /// Logging Nothing data may still produce a placeholder entry for the name.
    Nothing,
    /// A scalar value. Aggregate by taking means.
    Scalar(f64),
    /// A message. Aggregated by counting occurrences.
    Message(Cow<'static, str>),
}

impl From<f64> for Loggable {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<f32> for Loggable {
    fn from(value: f32) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<&'static str> for Loggable {
    fn from(message: &'static str) -> Self {
        Self::Message(message.into())
    }
}

impl From<String> for Loggable {
    fn from(message: String) -> Self {
        Self::Message(message.into())
    }
}

/// Log statistics from a planning run.
pub trait Logger {
    /// Log a value.
    ///
    /// # Args
    /// * `event` - The event associated with this value.
    /// * `name` - The name that identifies this value.
    /// * `value` - The value to log.
    ///
    /// # Returns
    /// May return an error if the logged value is structurally incompatible
    /// with previous values logged under the same name.
    fn log<'a>(&mut self, event: Event, name: &'a str, value: Loggable)
        -> Result<(), LogError<'a>>;

    /// Mark the end of an event.
    fn done(&mut self, event: Event);
}

/// Logger that does nothing
impl Logger for () {
    fn log<'a>(&mut self, _: Event, _: &'a str, _: Loggable) -> Result<(), LogError<'a>> {
        Ok(())
    }

    fn done(&mut self, _: Event) {}
}

impl<T: Logger + ?Sized> Logger for &mut T {
    fn log<'a>(
        &mut self,
        event: Event,
        name: &'a str,
        value: Loggable,
    ) -> Result<(), LogError<'a>> {
        T::log(self, event, name, value)
    }

    fn done(&mut self, event: Event) {
        T::done(self, event)
    }
}

/// A logged value is incompatible with earlier values of the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct LogError<'a> {
    name: &'a str,
    value: Loggable,
    expected: String,
}

impl<'a> LogError<'a> {
    pub fn new(name: &'a str, value: Loggable, expected: String) -> Self {
        Self {
            name,
            value,
            expected,
        }
    }
}

impl<'a> fmt::Display for LogError<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\": incompatible value {:?}, expected {}",
            self.name, self.value, self.expected
        )
    }
}

impl<'a> Error for LogError<'a> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_logger_accepts_anything() {
        let mut logger = ();
        logger.log(Event::Epoch, "x", 1.0.into()).unwrap();
        logger.log(Event::Epoch, "x", "message".into()).unwrap();
        logger.done(Event::Epoch);
    }

    #[test]
    fn log_error_display() {
        let error = LogError::new("x", Loggable::Nothing, "Scalar".into());
        assert_eq!(
            error.to_string(),
            "\"x\": incompatible value Nothing, expected Scalar"
        );
    }
}
