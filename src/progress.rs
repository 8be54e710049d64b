#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSample {
    pub elapsed_secs: f64,
}

/// Pulls the encoder's cumulative `time=HH:MM:SS.ff` stamp out of one
/// diagnostic line.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    line.match_indices("time=")
        .find_map(|(i, token)| parse_timestamp(&line[i + token.len()..]))
        .map(|elapsed_secs| ProgressSample { elapsed_secs })
}

fn parse_timestamp(s: &str) -> Option<f64> {
    let (hours, rest) = take_digits(s)?;
    let rest = rest.strip_prefix(':')?;
    let (minutes, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix(':')?;
    let (whole, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix('.')?;
    let (fraction, _) = take_digits(rest)?;

    let seconds: f64 = format!("{}.{}", whole, fraction).parse().ok()?;
    Some(hours.parse::<f64>().ok()? * 3600.0 + minutes.parse::<f64>().ok()? * 60.0 + seconds)
}

fn take_digits(s: &str) -> Option<(&str, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    match end {
        0 => None,
        _ => Some(s.split_at(end)),
    }
}
