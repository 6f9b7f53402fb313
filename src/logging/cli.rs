//! Command-line logger
use super::{Event, LogError, Loggable, Logger};
use crate::utils::stats::OnlineMeanVariance;
use enum_map::{enum_map, EnumMap};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use yansi::Paint;

/// Logger that writes summaries to stdout.
///
/// Values logged under the same name during one event are replaced, not aggregated;
/// the last one is committed when the event is done.
pub struct CLILogger {
    events: EnumMap<Event, EventLog>,

    display_period: Duration,
    last_display_time: Instant,
}

impl CLILogger {
    pub fn new(display_period: Duration) -> Self {
        Self {
            events: enum_map! { _ => EventLog::new() },
            display_period,
            last_display_time: Instant::now(),
        }
    }

    /// Display the summary and clear all stored data.
    pub fn display(&mut self) {
        let elapsed = self.last_display_time.elapsed();
        for (event, event_log) in self.events.iter_mut() {
            let summary_size = event_log.index - event_log.summary_start_index;
            if summary_size == 0 {
                continue;
            }
            println!();
            println!(
                "==== {:?}s {} - {} ({:?} / event) ====",
                event,
                event_log.summary_start_index,
                event_log.index - 1,
                elapsed / u32::try_from(summary_size).unwrap_or(u32::MAX)
            );
            for (name, aggregator) in &mut event_log.aggregators {
                println!("{:<24} {}", Paint::fixed(35, name), aggregator);
                aggregator.clear();
            }
            event_log.summary_start_index = event_log.index;
        }
        self.last_display_time = Instant::now();
    }
}

impl fmt::Debug for CLILogger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CLILogger")
            .field("display_period", &self.display_period)
            .finish()
    }
}

impl Logger for CLILogger {
    fn log<'a>(
        &mut self,
        event: Event,
        name: &'a str,
        value: Loggable,
    ) -> Result<(), LogError<'a>> {
        let aggregators = &mut self.events[event].aggregators;
        if let Some(aggregator) = aggregators.get_mut(name) {
            if let Err((value, expected)) = aggregator.update(value) {
                return Err(LogError::new(name, value, expected));
            }
        } else {
            aggregators.insert(name.into(), Aggregator::new(value));
        }
        Ok(())
    }

    fn done(&mut self, event: Event) {
        let event_log = &mut self.events[event];
        event_log.index += 1;
        for aggregator in event_log.aggregators.values_mut() {
            aggregator.commit();
        }

        if self.last_display_time.elapsed() >= self.display_period {
            self.display();
        }
    }
}

impl Drop for CLILogger {
    fn drop(&mut self) {
        // Flush any values not yet displayed
        self.display();
    }
}

struct EventLog {
    /// Global index for this event
    index: u64,
    /// Value of `index` at the start of this summary period
    summary_start_index: u64,
    aggregators: BTreeMap<String, Aggregator>,
}

impl EventLog {
    #[allow(clippy::missing_const_for_fn)] // BTreeMap const new not stabilized
    fn new() -> Self {
        Self {
            index: 0,
            summary_start_index: 0,
            aggregators: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Aggregator {
    Nothing,
    Scalar {
        stats: ScalarStats,
        pending: Option<f64>,
    },
    Messages {
        counts: BTreeMap<Cow<'static, str>, u64>,
        pending: Option<Cow<'static, str>>,
    },
}

impl Aggregator {
    fn new(value: Loggable) -> Self {
        match value {
            Loggable::Nothing => Self::Nothing,
            Loggable::Scalar(x) => Self::Scalar {
                stats: ScalarStats::default(),
                pending: Some(x),
            },
            Loggable::Message(message) => Self::Messages {
                counts: BTreeMap::new(),
                pending: Some(message),
            },
        }
    }

    /// Update an aggregator with a logged value within an event.
    ///
    /// Returns `Err((value, expected))` if the value is incompatible with this aggregator.
    fn update(&mut self, value: Loggable) -> Result<(), (Loggable, String)> {
        match (self, value) {
            (Self::Nothing, Loggable::Nothing) => {}
            (Self::Scalar { pending, .. }, Loggable::Scalar(x)) => *pending = Some(x),
            (Self::Messages { pending, .. }, Loggable::Message(m)) => *pending = Some(m),
            (aggregator, value) => return Err((value, aggregator.expected().into())),
        }
        Ok(())
    }

    const fn expected(&self) -> &'static str {
        match self {
            Self::Nothing => "Nothing",
            Self::Scalar { .. } => "Scalar",
            Self::Messages { .. } => "Message",
        }
    }

    /// Commit the pending value into the aggregate.
    fn commit(&mut self) {
        match self {
            Self::Nothing => {}
            Self::Scalar { stats, pending } => {
                if let Some(x) = pending.take() {
                    stats.push(x);
                }
            }
            Self::Messages { counts, pending } => {
                if let Some(message) = pending.take() {
                    *counts.entry(message).or_insert(0) += 1;
                }
            }
        }
    }

    /// Clear the aggregated values (but not the pending values)
    fn clear(&mut self) {
        match self {
            Self::Nothing => {}
            Self::Scalar { stats, .. } => *stats = ScalarStats::default(),
            Self::Messages { counts, .. } => counts.clear(),
        }
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Nothing => Ok(()),
            Self::Scalar { stats, .. } => fmt::Display::fmt(stats, f),
            Self::Messages { counts, .. } => {
                for (message, count) in counts {
                    write!(f, "[x{}] {}  ", count, message)?;
                }
                Ok(())
            }
        }
    }
}

/// Summary statistics of a scalar.
#[derive(Debug, Clone, PartialEq)]
struct ScalarStats {
    moments: OnlineMeanVariance<f64>,
    min: f64,
    max: f64,
}

impl Default for ScalarStats {
    fn default() -> Self {
        Self {
            moments: OnlineMeanVariance::default(),
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl ScalarStats {
    fn push(&mut self, x: f64) {
        self.moments.push(x);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }
}

impl fmt::Display for ScalarStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.moments.count() {
            0 => write!(f, "-"),
            1 => write!(f, "{:.4}", self.moments.mean()),
            n => write!(
                f,
                "{:.4} ± {:.4}  [{:.4}, {:.4}]  (n={})",
                self.moments.mean(),
                Paint::fixed(253, self.moments.stddev()),
                self.min,
                self.max,
                n
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> CLILogger {
        CLILogger::new(Duration::from_secs(3600))
    }

    #[test]
    fn scalars_are_aggregated_per_event() {
        let mut logger = logger();
        for x in [1.0, 2.0, 6.0] {
            logger.log(Event::Epoch, "return", x.into()).unwrap();
            logger.done(Event::Epoch);
        }
        match &logger.events[Event::Epoch].aggregators["return"] {
            Aggregator::Scalar { stats, pending } => {
                assert_eq!(*pending, None);
                assert_eq!(stats.moments.count(), 3);
                assert_eq!(stats.moments.mean(), 3.0);
                assert_eq!((stats.min, stats.max), (1.0, 6.0));
            }
            a => panic!("unexpected aggregator {:?}", a),
        }
        assert_eq!(logger.events[Event::Epoch].index, 3);
    }

    #[test]
    fn last_value_within_event_wins() {
        let mut logger = logger();
        logger.log(Event::Epoch, "x", 1.0.into()).unwrap();
        logger.log(Event::Epoch, "x", 5.0.into()).unwrap();
        logger.done(Event::Epoch);
        assert_eq!(
            logger.events[Event::Epoch].aggregators["x"].to_string(),
            "5.0000"
        );
    }

    #[test]
    fn incompatible_value() {
        let mut logger = logger();
        logger.log(Event::Epoch, "x", 1.0.into()).unwrap();
        let err = logger.log(Event::Epoch, "x", "text".into()).unwrap_err();
        assert_eq!(err, LogError::new("x", "text".into(), "Scalar".into()));
    }

    #[test]
    fn messages_are_counted() {
        let mut logger = logger();
        for status in ["optimizing", "optimizing", "converged"] {
            logger.log(Event::Epoch, "status", status.into()).unwrap();
            logger.done(Event::Epoch);
        }
        assert_eq!(
            logger.events[Event::Epoch].aggregators["status"].to_string(),
            "[x1] converged  [x2] optimizing  "
        );
    }

    #[test]
    fn display_clears() {
        let mut logger = logger();
        logger.log(Event::Replan, "x", 1.0.into()).unwrap();
        logger.done(Event::Replan);
        logger.display();
        let log = &logger.events[Event::Replan];
        assert_eq!(log.summary_start_index, 1);
        assert_eq!(log.aggregators["x"].to_string(), "-");
    }
}
