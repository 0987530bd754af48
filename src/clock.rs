use time::OffsetDateTime;

/// A source of wall-clock time for provenance attributes.
pub trait Clock: Send + Sync + 'static {
    fn now_utc(&self) -> OffsetDateTime;
}

/// A clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that always reports the same instant. Used for reproducible output.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl FixedClock {
    pub fn from_unix(seconds: i64) -> Self {
        Self(OffsetDateTime::from_unix_timestamp(seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`, the form used in history lines and date attributes.
pub fn iso8601(at: OffsetDateTime) -> String {
    let at = at.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Format epoch seconds, or `None` when out of range or not finite.
pub fn iso8601_from_epoch(seconds: f64) -> Option<String> {
    if !seconds.is_finite() {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(seconds.floor() as i64)
        .ok()
        .map(iso8601)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_utc_seconds() {
        assert_eq!(iso8601_from_epoch(0.0).as_deref(), Some("1970-01-01T00:00:00Z"));
        assert_eq!(
            iso8601_from_epoch(1_393_990_217.9).as_deref(),
            Some("2014-03-05T03:30:17Z")
        );
        assert_eq!(iso8601_from_epoch(f64::NAN), None);
    }

    #[test]
    fn fixed_clock_is_stable() {
        let clock = FixedClock::from_unix(1_400_000_000);
        assert_eq!(clock.now_utc(), clock.now_utc());
        assert_eq!(iso8601(clock.now_utc()), "2014-05-13T16:53:20Z");
    }
}
