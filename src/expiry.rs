//! Turns a second-count into the human string shown next to an unstarred
//! version, e.g. `"expires in 2 hours"`.

fn format_unit(value: i64, unit: &str) -> String {
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural}")
}

fn format_approximate(mut seconds: i64) -> String {
    if seconds >= 60 {
        seconds = (seconds + 30) / 60;
    } else {
        return format_unit(seconds, "second");
    }
    if seconds >= 60 {
        seconds = (seconds + 30) / 60;
    } else {
        return format_unit(seconds, "minute");
    }
    if seconds >= 24 {
        seconds = (seconds + 12) / 24;
    } else {
        return format_unit(seconds, "hour");
    }
    format_unit(seconds, "day")
}

/// `seconds <= 0` is `"expired"`; otherwise rounds up through
/// seconds/minutes/hours/days with a round-half-up cascade.
pub fn format_expiry(seconds: i64) -> String {
    if seconds <= 0 {
        "expired".to_owned()
    } else {
        format!("expires in {}", format_approximate(seconds))
    }
}
