use std::io::{BufRead, BufReader, Lines, Read};

use chrono::{NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

use crate::error::{ExtractError, Result};
use crate::models::TelemetryFrame;
use crate::services::TelemetryParser;

/// Parser for DJI subtitle telemetry files.
///
/// Each caption block is a fixed-size group of non-blank lines: index,
/// `start --> end` time range, a metadata line with `FrameCnt`/`DiffTime`
/// pairs, the embedded absolute timestamp, and one or more continuation
/// lines of bracketed `[key: value, ...]` groups closed by `</font>`.
pub struct SrtParser {
    bracket_pattern: Regex,
    whitespace_pattern: Regex,
    date_pattern: Regex,
}

impl SrtParser {
    pub fn new() -> Self {
        Self {
            bracket_pattern: Regex::new(r"\[[^\]]*\]").unwrap(),
            whitespace_pattern: Regex::new(r"\s+").unwrap(),
            date_pattern: Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap(),
        }
    }

    /// Streaming entry point: one frame per completed caption block, lazily.
    pub fn frames<R: Read>(
        &self,
        reader: R,
        skip: usize,
        limit: Option<usize>,
    ) -> SrtFrames<BufReader<R>> {
        SrtFrames {
            lines: BufReader::new(reader).lines(),
            state: BlockState::Id,
            current: None,
            body: String::new(),
            seen: 0,
            skip,
            limit,
            accepted: 0,
            bracket_pattern: self.bracket_pattern.clone(),
            whitespace_pattern: self.whitespace_pattern.clone(),
            date_pattern: self.date_pattern.clone(),
        }
    }
}

impl Default for SrtParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryParser for SrtParser {
    /// Batch entry point: collects the streaming iterator.
    fn parse_reader<R: Read>(
        &self,
        reader: R,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryFrame>> {
        self.frames(reader, skip, limit).collect()
    }
}

enum BlockState {
    Id,
    TimeRange,
    Meta,
    Timestamp,
    Body,
}

/// Lazy frame iterator over caption blocks. An incomplete trailing block is
/// dropped silently at end of input.
pub struct SrtFrames<B: BufRead> {
    lines: Lines<B>,
    state: BlockState,
    current: Option<TelemetryFrame>,
    body: String,
    seen: usize,
    skip: usize,
    limit: Option<usize>,
    accepted: usize,
    bracket_pattern: Regex,
    whitespace_pattern: Regex,
    date_pattern: Regex,
}

impl<B: BufRead> Iterator for SrtFrames<B> {
    type Item = Result<TelemetryFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if Some(self.accepted) == self.limit {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match self.state {
                BlockState::Id => {
                    let index: u32 = match line.parse() {
                        Ok(index) => index,
                        Err(_) => {
                            return Some(Err(ExtractError::MalformedInput(format!(
                                "caption index line is not a number: {line:?}"
                            ))))
                        }
                    };
                    self.seen += 1;
                    // Caption indices are 1-based; frame ids are 0-based.
                    self.current = Some(TelemetryFrame::new(index.saturating_sub(1)));
                    self.state = BlockState::TimeRange;
                }
                BlockState::TimeRange => {
                    if let Err(err) = self.parse_time_range(line) {
                        return Some(Err(err));
                    }
                    self.state = BlockState::Meta;
                }
                BlockState::Meta => {
                    if line.contains("<font size=") {
                        if let Err(err) = self.parse_meta_line(line) {
                            return Some(Err(err));
                        }
                        self.state = BlockState::Timestamp;
                    } else {
                        // Blocks without a font tag carry the timestamp here.
                        if let Err(err) = self.parse_timestamp_line(line) {
                            return Some(Err(err));
                        }
                        self.state = BlockState::Body;
                    }
                }
                BlockState::Timestamp => {
                    if let Err(err) = self.parse_timestamp_line(line) {
                        return Some(Err(err));
                    }
                    self.state = BlockState::Body;
                }
                BlockState::Body => {
                    self.body.push_str(line);
                    self.body.push(' ');
                    if line.contains("</font>") {
                        let frame = self.finish_block();
                        self.state = BlockState::Id;
                        if self.seen > self.skip {
                            self.accepted += 1;
                            return Some(Ok(frame));
                        }
                    }
                }
            }
        }
    }
}

impl<B: BufRead> SrtFrames<B> {
    fn parse_time_range(&mut self, line: &str) -> Result<()> {
        let (start, end) = line.split_once("-->").ok_or_else(|| {
            ExtractError::MalformedInput(format!("caption time range without '-->': {line:?}"))
        })?;
        let parse = |part: &str| -> Result<f64> {
            let time = NaiveTime::parse_from_str(part.trim(), "%H:%M:%S,%3f").map_err(|_| {
                ExtractError::MalformedInput(format!("unparseable caption time: {part:?}"))
            })?;
            Ok((time - NaiveTime::MIN).num_milliseconds() as f64)
        };
        let frame = self.current.as_mut().expect("frame started");
        frame.start_time_ms = Some(parse(start)?);
        frame.end_time_ms = Some(parse(end)?);
        Ok(())
    }

    /// Parses the `FrameCnt : 1, DiffTime : 33ms` pairs, stopping at the
    /// first embedded absolute timestamp if the device writes one inline.
    fn parse_meta_line(&mut self, line: &str) -> Result<()> {
        let start = line.find("FrameCnt").ok_or_else(|| {
            ExtractError::MalformedInput(format!("metadata line without FrameCnt: {line:?}"))
        })?;
        let mut frame = self.current.take().expect("frame started");
        for chunk in line[start..].split(',') {
            if self.date_pattern.is_match(chunk) {
                break;
            }
            if let Some((key, value)) = chunk.split_once(':') {
                apply_value(&mut frame, &key.trim().to_lowercase(), value);
            }
        }
        self.current = Some(frame);
        Ok(())
    }

    fn parse_timestamp_line(&mut self, line: &str) -> Result<()> {
        // Millisecond precision: the relevant prefix is 23 characters.
        let head = line.get(..23).unwrap_or(line);
        let naive = NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S,%3f")
            .or_else(|_| NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S%.3f"))
            .map_err(|_| {
                ExtractError::MalformedInput(format!("unparseable caption timestamp: {head:?}"))
            })?;
        let frame = self.current.as_mut().expect("frame started");
        frame.timestamp = Some(Utc.from_utc_datetime(&naive));
        Ok(())
    }

    fn finish_block(&mut self) -> TelemetryFrame {
        let mut frame = self.current.take().expect("frame started");
        let body = self.body.replace("</font>", "");
        self.body.clear();

        for group in self.bracket_pattern.find_iter(&body) {
            let group = group.as_str().trim_matches(|c| c == '[' || c == ']');
            let group = self.whitespace_pattern.replace_all(group, " ");
            self.parse_bracket_group(&mut frame, &group);
        }
        frame
    }

    /// Parses one bracket group: a flat `key: value` pair, a comma-separated
    /// list (optionally prefixed by a group name before the first colon), or
    /// a whitespace-separated pair run.
    fn parse_bracket_group(&self, frame: &mut TelemetryFrame, group: &str) {
        match group.matches(':').count() {
            0 => {}
            1 => {
                if let Some((key, value)) = group.split_once(':') {
                    apply_value(frame, &key.trim().to_lowercase(), value);
                }
            }
            _ if group.contains(',') => {
                let mut parts: Vec<String> = group.split(',').map(str::to_string).collect();
                let mut base = None;
                if parts[0].matches(':').count() > 1 {
                    let first = parts.remove(0);
                    let colon = first.find(':').expect("counted above");
                    base = Some(first[..colon].trim().to_string());
                    parts.insert(0, first[colon + 1..].to_string());
                }
                for part in parts {
                    let Some((key, value)) = part.split_once(':') else {
                        continue;
                    };
                    let key = match &base {
                        Some(base) => format!("{}_{}", base, key.trim()),
                        None => key.trim().to_string(),
                    };
                    apply_value(frame, &key.to_lowercase(), value);
                }
            }
            _ => {
                let flat = group.replace(": ", " ");
                let tokens: Vec<&str> = flat.split(' ').filter(|t| !t.is_empty()).collect();
                for pair in tokens.chunks(2) {
                    if let [key, value] = pair {
                        apply_value(frame, &key.trim().to_lowercase(), value);
                    }
                }
            }
        }
    }
}

/// Numeric-shape check for caption values: digits plus `.`, `-`, `+` only.
fn parse_number(value: &str) -> Option<f64> {
    let digits: String = value
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '+'))
        .collect();
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        value.parse().ok()
    } else {
        None
    }
}

fn apply_value(frame: &mut TelemetryFrame, key: &str, raw: &str) {
    let raw = raw.trim();
    // The M2EA writes "longtitude"; normalize to the canonical key.
    let key = if key == "longtitude" { "longitude" } else { key };
    let number = parse_number(raw);
    match key {
        "framecnt" => frame.frame_cnt = number,
        "difftime" => frame.diff_time = Some(raw.to_string()),
        "iso" => frame.iso = number,
        "shutter" => frame.shutter = Some(raw.to_string()),
        "fnum" => frame.fnum = number,
        "ev" => frame.ev = number,
        "ct" => frame.ct = number,
        "color_md" => frame.color_md = Some(raw.to_string()),
        "focal_len" => frame.focal_len = number,
        "dzoom" => frame.dzoom = number,
        "dzoom_ratio" => frame.dzoom_ratio = number,
        "latitude" => frame.latitude = number,
        "longitude" => frame.longitude = number,
        "altitude" => frame.altitude = number,
        "rel_alt" => frame.rel_alt = number,
        "abs_alt" => frame.abs_alt = number,
        "gb_yaw" => frame.gimbal_yaw = number,
        "gb_pitch" => frame.gimbal_pitch = number,
        "gb_roll" => frame.gimbal_roll = number,
        "drone_speedx" => frame.x_speed = number,
        "drone_speedy" => frame.y_speed = number,
        "drone_speedz" => frame.z_speed = number,
        // Keys outside the fixed frame field set are ignored.
        _ => {}
    }
}
