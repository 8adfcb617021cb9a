use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};

use crate::domain::entities::time_slot::SlotWindow;

/// Window requested by an admin when approving an hour-bound version
#[derive(Debug, Clone, PartialEq)]
pub enum SlotRequest {
    /// Absolute instants
    Instants {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Market-local wall-clock times; a missing date means "today"
    LocalTimes {
        date: Option<NaiveDate>,
        start: NaiveTime,
        end: NaiveTime,
    },
}

/// Market-local time arithmetic: trading dates, the daily close cutoff, slot resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketCalendar {
    offset: FixedOffset,
    close_time: NaiveTime,
}

impl MarketCalendar {
    pub fn new(offset: FixedOffset, close_time: NaiveTime) -> Self {
        Self { offset, close_time }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn close_time(&self) -> NaiveTime {
        self.close_time
    }

    /// Label stored on time slots, e.g. `+05:30`
    pub fn timezone_label(&self) -> String {
        self.offset.to_string()
    }

    /// Market-local calendar date of an instant
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.offset).time()
    }

    /// Instant of a market-local wall-clock time
    pub fn at_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = NaiveDateTime::new(date, time);
        Utc.from_utc_datetime(&(local - Duration::seconds(self.offset.local_minus_utc() as i64)))
    }

    /// Market-close cutoff of a trading date
    pub fn close_instant(&self, date: NaiveDate) -> DateTime<Utc> {
        self.at_local(date, self.close_time)
    }

    /// Whether the market of `now`'s trading date has closed
    pub fn is_after_close(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_instant(self.local_date(now))
    }

    /// Turn an approval request into a concrete window
    pub fn resolve_slot(&self, request: &SlotRequest, now: DateTime<Utc>) -> Result<SlotWindow, String> {
        let (scheduled_date, start, end) = match request {
            SlotRequest::Instants { start, end } => (self.local_date(*start), *start, *end),
            SlotRequest::LocalTimes { date, start, end } => {
                let date = date.unwrap_or_else(|| self.local_date(now));
                (date, self.at_local(date, *start), self.at_local(date, *end))
            }
        };

        let window = SlotWindow::new(scheduled_date, start, end, self.timezone_label())?;
        if window.end_time <= now {
            return Err(format!(
                "Slot ending at {} has already ended",
                window.end_time
            ));
        }
        Ok(window)
    }
}

impl Default for MarketCalendar {
    /// Indian market hours: UTC+05:30, close at 15:30
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(330 * 60).unwrap_or_else(|| Utc.fix()),
            close_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}
