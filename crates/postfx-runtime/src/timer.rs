//! Non-blocking GPU timing of a technique.
//!
//! A [`GpuTimer`] owns three queries: a disjoint interval and a begin and end
//! timestamp. Results are collected whenever they happen to be ready, never by
//! waiting, so measurements lag the work they describe by the device's
//! latency. A new measurement is only started once the previous one has been
//! collected.
//!
//! ```text
//! Idle --begin--> Recording --end--> InFlight --results ready--> Idle
//! ```

use tracing::trace;

use crate::backend::{DeviceObject, DeviceResult, GpuDevice, Query, QueryData, QueryKind};

/// Fixed-window moving average.
#[derive(Debug, Clone)]
pub struct MovingAverage<const N: usize> {
    samples: [u64; N],
    index: usize,
    filled: usize,
}

impl<const N: usize> MovingAverage<N> {
    pub fn new() -> Self {
        Self {
            samples: [0; N],
            index: 0,
            filled: 0,
        }
    }

    pub fn append(&mut self, sample: u64) {
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % N;
        self.filled = (self.filled + 1).min(N);
    }

    /// Average of the recorded samples, zero when empty.
    pub fn get(&self) -> u64 {
        if self.filled == 0 {
            return 0;
        }
        let sum: u128 = self.samples[..self.filled].iter().map(|&s| u128::from(s)).sum();
        (sum / self.filled as u128) as u64
    }

    /// Number of recorded samples, up to the window size.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }
}

impl<const N: usize> Default for MovingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Window of the per-technique GPU duration average.
pub const DURATION_WINDOW: usize = 60;

/// Per-technique GPU duration average, in nanoseconds.
pub type DurationAverage = MovingAverage<DURATION_WINDOW>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    Recording,
    InFlight,
}

/// Begin/end/disjoint query triple.
#[derive(Debug)]
pub struct GpuTimer {
    disjoint: Query,
    begin: Query,
    end: Query,
    state: TimerState,
}

impl GpuTimer {
    /// Creates the three queries, releasing any already created on failure.
    pub fn new<D: GpuDevice>(device: &mut D) -> DeviceResult<Self> {
        let disjoint = device.create_query(QueryKind::TimestampDisjoint)?;
        let begin = match device.create_query(QueryKind::Timestamp) {
            Ok(query) => query,
            Err(err) => {
                device.release(DeviceObject::Query(disjoint));
                return Err(err);
            }
        };
        let end = match device.create_query(QueryKind::Timestamp) {
            Ok(query) => query,
            Err(err) => {
                device.release(DeviceObject::Query(begin));
                device.release(DeviceObject::Query(disjoint));
                return Err(err);
            }
        };
        Ok(Self {
            disjoint,
            begin,
            end,
            state: TimerState::Idle,
        })
    }

    /// The `[disjoint, begin, end]` queries.
    pub fn queries(&self) -> [Query; 3] {
        [self.disjoint, self.begin, self.end]
    }

    /// Whether a measurement has been submitted and not yet collected.
    pub fn is_in_flight(&self) -> bool {
        self.state == TimerState::InFlight
    }

    /// Collects the outstanding measurement if all three results are ready.
    ///
    /// Returns the duration in nanoseconds; `None` if nothing was collected or
    /// the interval was disjoint.
    pub fn poll<D: GpuDevice>(&mut self, device: &mut D) -> Option<u64> {
        if self.state != TimerState::InFlight {
            return None;
        }

        let disjoint = device.query_data(self.disjoint);
        let begin = device.query_data(self.begin);
        let end = device.query_data(self.end);

        let (
            Some(QueryData::Disjoint { frequency, disjoint }),
            Some(QueryData::Timestamp(t0)),
            Some(QueryData::Timestamp(t1)),
        ) = (disjoint, begin, end)
        else {
            return None;
        };

        self.state = TimerState::Idle;
        if disjoint || frequency == 0 {
            trace!(disjoint, frequency, "timestamp sample discarded");
            return None;
        }

        let ticks = u128::from(t1.saturating_sub(t0));
        Some((ticks * 1_000_000_000 / u128::from(frequency)) as u64)
    }

    /// Polls and folds a completed sample into `average`.
    pub fn collect<D: GpuDevice, const N: usize>(&mut self, device: &mut D, average: &mut MovingAverage<N>) {
        if let Some(duration) = self.poll(device) {
            average.append(duration);
        }
    }

    /// Starts a measurement unless one is still outstanding.
    pub fn begin<D: GpuDevice>(&mut self, device: &mut D) -> bool {
        if self.state != TimerState::Idle {
            return false;
        }
        device.begin_query(self.disjoint);
        device.end_query(self.begin);
        self.state = TimerState::Recording;
        true
    }

    /// Ends the measurement started by the matching [`GpuTimer::begin`].
    pub fn end<D: GpuDevice>(&mut self, device: &mut D) -> bool {
        if self.state != TimerState::Recording {
            return false;
        }
        device.end_query(self.end);
        device.end_query(self.disjoint);
        self.state = TimerState::InFlight;
        true
    }

    pub fn release<D: GpuDevice>(self, device: &mut D) {
        device.release(DeviceObject::Query(self.end));
        device.release(DeviceObject::Query(self.begin));
        device.release(DeviceObject::Query(self.disjoint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, ObjectKind, SoftwareDevice};

    #[test]
    fn moving_average_window() {
        let mut avg = MovingAverage::<3>::new();
        assert_eq!(avg.get(), 0);
        avg.append(3);
        avg.append(6);
        assert_eq!(avg.get(), 4);
        avg.append(9);
        avg.append(12);
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.get(), 9);
    }

    #[test]
    fn begin_is_skipped_while_in_flight() {
        let mut device = SoftwareDevice::new();
        let mut timer = GpuTimer::new(&mut device).unwrap();

        assert!(timer.begin(&mut device));
        device.draw(3);
        assert!(timer.end(&mut device));
        assert!(timer.is_in_flight());

        device.take_commands();
        assert!(!timer.begin(&mut device));
        assert!(!timer.end(&mut device));
        assert!(device.commands().is_empty());
    }

    #[test]
    fn sample_is_collected_once_ready() {
        let mut device = SoftwareDevice::new();
        let mut timer = GpuTimer::new(&mut device).unwrap();
        let mut avg = DurationAverage::new();

        timer.begin(&mut device);
        device.draw(3);
        device.draw(3);
        timer.end(&mut device);

        timer.collect(&mut device, &mut avg);
        assert!(avg.is_empty());
        assert!(timer.is_in_flight());

        device.advance_frame();
        timer.collect(&mut device, &mut avg);
        // 2000 ticks at 10 MHz
        assert_eq!(avg.get(), 200_000);
        assert!(!timer.is_in_flight());
    }

    #[test]
    fn disjoint_interval_is_discarded() {
        let mut device = SoftwareDevice::new();
        let mut timer = GpuTimer::new(&mut device).unwrap();

        device.mark_next_interval_disjoint();
        timer.begin(&mut device);
        device.draw(3);
        timer.end(&mut device);
        device.advance_frame();

        assert_eq!(timer.poll(&mut device), None);
        assert!(!timer.is_in_flight());
        assert!(timer.begin(&mut device));
        assert!(matches!(device.commands().last(), Some(Command::EndQuery(_))));
    }

    #[test]
    fn creation_failure_leaves_queries_untouched() {
        let mut device = SoftwareDevice::new();
        device.create_query(QueryKind::Timestamp).unwrap();
        device.fail_next(ObjectKind::Query);
        assert!(GpuTimer::new(&mut device).is_err());
        assert_eq!(device.live_count(ObjectKind::Query), 1);
    }
}
