const DEFAULT_AUDIO_KBPS: u64 = 128;

/// Estimated output size in megabytes, from the explicit bitrates in `args`.
///
/// Returns `None` without a `-b:v <n>k` target (quality-based encodes have no
/// predictable size) or without a usable duration.
pub fn estimate_size_mb(duration_secs: f64, args: &str) -> Option<f64> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return None;
    }

    let video_kbps = find_bitrate_kbps(args, "-b:v")?;
    let audio_kbps = find_bitrate_kbps(args, "-b:a").unwrap_or(DEFAULT_AUDIO_KBPS);

    let mb = ((video_kbps + audio_kbps) as f64) * duration_secs / 8.0 / 1024.0;
    Some((mb * 100.0).round() / 100.0)
}

/// Value of the first `<flag> <int>k` pair in `args`, in kbps.
pub fn find_bitrate_kbps(args: &str, flag: &str) -> Option<u64> {
    let mut tokens = args.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token != flag {
            continue;
        }
        if let Some(value) = tokens.peek() {
            let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() && value[digits.len()..].starts_with('k') {
                if let Ok(kbps) = digits.parse() {
                    return Some(kbps);
                }
            }
        }
    }
    None
}
