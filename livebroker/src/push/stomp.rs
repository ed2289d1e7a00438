//! STOMP 1.2 frames, as carried over a WebSocket.

use std::fmt::Write;

use crate::push::{PushError, PushResult};

pub const ACCEPT_VERSION: &str = "1.2";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new<S: Into<String>>(command: S) -> Frame {
        Frame {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, k: K, v: V) -> Frame {
        self.headers.push((k.into(), v.into()));
        self
    }

    pub fn body<S: Into<String>>(mut self, body: S) -> Frame {
        self.body = body.into();
        self
    }

    /// The value of header `k`. When a header is repeated the first one wins.
    pub fn get(&self, k: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name == k)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        let raw = escapes_disabled(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (k, v) in self.headers.iter() {
            match raw {
                true => {
                    let _ = writeln!(out, "{k}:{v}");
                }
                false => {
                    let _ = writeln!(out, "{}:{}", escape(k), escape(v));
                }
            }
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            let _ = writeln!(out, "content-length:{}", self.body.len());
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

pub fn connect(host: &str) -> Frame {
    Frame::new("CONNECT")
        .header("accept-version", ACCEPT_VERSION)
        .header("host", host)
        .header("heart-beat", "0,0")
}

pub fn subscribe(id: &str, destination: &str) -> Frame {
    Frame::new("SUBSCRIBE")
        .header("id", id)
        .header("destination", destination)
        .header("ack", "auto")
}

/// CONNECT and CONNECTED frames carry their headers unescaped.
fn escapes_disabled(command: &str) -> bool {
    command == "CONNECT" || command == "CONNECTED"
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> PushResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(PushError::Protocol(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

/// Parses every frame in `input`. Heart-beats (bare end-of-lines between
/// frames) are skipped.
pub fn parse(input: &str) -> PushResult<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, tail) = parse_one(rest)?;
        frames.push(frame);
        rest = tail;
    }
}

fn take_line(s: &str) -> PushResult<(&str, &str)> {
    let end = s
        .find('\n')
        .ok_or_else(|| PushError::Protocol("unterminated frame header".to_owned()))?;
    let line = s[..end].strip_suffix('\r').unwrap_or(&s[..end]);
    Ok((line, &s[end + 1..]))
}

fn parse_one(input: &str) -> PushResult<(Frame, &str)> {
    let (command, mut rest) = take_line(input)?;
    let mut frame = Frame::new(command);
    let raw = escapes_disabled(command);

    loop {
        let (line, tail) = take_line(rest)?;
        rest = tail;
        if line.is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| PushError::Protocol(format!("malformed header line {line:?}")))?;
        let (k, v) = match raw {
            true => (k.to_owned(), v.to_owned()),
            false => (unescape(k)?, unescape(v)?),
        };
        frame.headers.push((k, v));
    }

    let body_len = match frame.get("content-length") {
        Some(n) => Some(
            n.trim()
                .parse::<usize>()
                .map_err(|_| PushError::Protocol(format!("bad content-length {n:?}")))?,
        ),
        None => None,
    };
    let end = match body_len {
        Some(n) => n,
        None => rest
            .find('\0')
            .ok_or_else(|| PushError::Protocol("unterminated frame body".to_owned()))?,
    };
    let body = rest
        .get(..end)
        .ok_or_else(|| PushError::Protocol("frame body shorter than content-length".to_owned()))?;
    let tail = rest[end..]
        .strip_prefix('\0')
        .ok_or_else(|| PushError::Protocol("frame body not followed by NUL".to_owned()))?;
    frame.body = body.to_owned();
    Ok((frame, tail))
}
