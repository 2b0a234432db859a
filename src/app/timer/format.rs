const MS_PER_SECOND: u64 = 1_000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;

/// `HH:MM:SS` with seconds floored; hours keep growing past 99.
pub fn format_hh_mm_ss(ms: u64) -> String {
    let hours = ms / MS_PER_HOUR;
    let minutes = (ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (ms % MS_PER_MINUTE) / MS_PER_SECOND;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Reads keypad entry as right-aligned `HHMMSS` digits: `"130"` is 1 min 30 s and
/// `"10000"` is 1 h. Non-digits are ignored; anything beyond six digits keeps the last six.
pub fn parse_hhmmss_digits(input: &str) -> u64 {
    let digits: Vec<u64> = input
        .chars()
        .filter_map(|ch| ch.to_digit(10))
        .map(u64::from)
        .collect();
    let digits = &digits[digits.len().saturating_sub(6)..];
    let mut padded = [0u64; 6];
    padded[6 - digits.len()..].copy_from_slice(digits);

    let hours = padded[0] * 10 + padded[1];
    let minutes = padded[2] * 10 + padded[3];
    let seconds = padded[4] * 10 + padded[5];
    hours * MS_PER_HOUR + minutes * MS_PER_MINUTE + seconds * MS_PER_SECOND
}
