//! Registry of who currently holds the active-clients gate.
//!
//! Two views are kept, both mutated only under the gate's state lock:
//! - a table keyed by identifier with the net number of holds per identifier (dumped on panic);
//! - a circular text log of timestamped increment/decrement records (dumped on request).

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::panic::Location;
use std::time::Instant;

use crate::config::PowerConfig;
use crate::endpoints::ClientType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// A hardware endpoint, named after its client.
    Endpoint,
    /// An anonymous call site; recorded in the table but not in the text log.
    Simple,
    /// A named power resource.
    Resource,
    /// Driver-internal holds (proxy vote, tag process, ...).
    Special,
}

impl ClientKind {
    fn label(self) -> &'static str {
        match self {
            ClientKind::Endpoint => "ENDPOINT",
            ClientKind::Simple => "SIMPLE",
            ClientKind::Resource => "RESOURCE",
            ClientKind::Special => "SPECIAL",
        }
    }
}

/// Identity of a holder of the gate, with the call site that took or dropped the hold.
///
/// Constructors are `#[track_caller]`, so the recorded location is the line that built the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId {
    kind: ClientKind,
    name: Cow<'static, str>,
    file: &'static str,
    line: u32,
}

impl ClientId {
    #[track_caller]
    pub fn endpoint(client: ClientType) -> Self {
        Self::at(ClientKind::Endpoint, Cow::Borrowed(client.name()))
    }

    #[track_caller]
    pub fn simple() -> Self {
        let loc = Location::caller();
        Self::at(
            ClientKind::Simple,
            Cow::Owned(format!("{}:{}", short_file(loc.file()), loc.line())),
        )
    }

    #[track_caller]
    pub fn resource(name: impl Into<Cow<'static, str>>) -> Self {
        Self::at(ClientKind::Resource, name.into())
    }

    #[track_caller]
    pub fn special(name: impl Into<Cow<'static, str>>) -> Self {
        Self::at(ClientKind::Special, name.into())
    }

    #[track_caller]
    fn at(kind: ClientKind, name: Cow<'static, str>) -> Self {
        let loc = Location::caller();
        Self {
            kind,
            name,
            file: short_file(loc.file()),
            line: loc.line(),
        }
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn short_file(path: &'static str) -> &'static str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLogEntry {
    pub kind: ClientKind,
    /// Net holds. Negative only if a release was logged before its acquire, which is a bug.
    pub count: i32,
}

#[derive(Debug)]
pub struct ClientLogRegistry {
    table: HashMap<String, ClientLogEntry>,
    lines: Vec<String>,
    head: usize,
    tail: usize,
    line_len: usize,
    name_len: usize,
    epoch: Instant,
}

impl ClientLogRegistry {
    pub fn new(cfg: &PowerConfig, epoch: Instant) -> Self {
        let capacity = cfg.log_lines.max(2);
        Self {
            table: HashMap::new(),
            lines: vec![String::new(); capacity],
            head: 0,
            tail: capacity - 1,
            line_len: cfg.log_line_len,
            name_len: cfg.log_name_len,
            epoch,
        }
    }

    pub fn log_inc(&mut self, id: &ClientId) {
        self.record(id, true);
    }

    pub fn log_dec(&mut self, id: &ClientId) {
        self.record(id, false);
    }

    fn record(&mut self, id: &ClientId, inc: bool) {
        let key = truncate(id.name(), self.name_len).to_string();
        let delta = if inc { 1 } else { -1 };

        let remove = match self.table.get_mut(&key) {
            Some(entry) => {
                entry.count += delta;
                entry.count == 0
            }
            None => {
                if !inc {
                    tracing::warn!(client = %key, "release logged for a client with no holds");
                }
                self.table.insert(
                    key.clone(),
                    ClientLogEntry {
                        kind: id.kind(),
                        count: delta,
                    },
                );
                false
            }
        };
        if remove {
            self.table.remove(&key);
        }

        if id.kind() != ClientKind::Simple {
            let t = self.epoch.elapsed();
            let line = format!(
                "[{:5}.{:06}] {} {}, {}: {}",
                t.as_secs(),
                t.subsec_micros(),
                if inc { '^' } else { 'v' },
                id.name(),
                id.file(),
                id.line()
            );
            self.insert_line(line);
        }
    }

    fn insert_line(&mut self, mut line: String) {
        let cap = self.lines.len();
        line.truncate(floor_char_boundary(&line, self.line_len));
        self.lines[self.head] = line;
        self.head = (self.head + 1) % cap;
        if self.tail == self.head {
            self.tail = (self.tail + 1) % cap;
        }
    }

    /// Net holds recorded for `name`, or `None` if it holds nothing.
    pub fn entry(&self, name: &str) -> Option<&ClientLogEntry> {
        self.table.get(truncate(name, self.name_len))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ClientLogEntry)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Text log records, oldest first.
    pub fn lines(&self) -> Vec<&str> {
        let cap = self.lines.len();
        let mut out = Vec::new();
        let mut idx = (self.tail + 1) % cap;
        while idx != self.head {
            out.push(self.lines[idx].as_str());
            idx = (idx + 1) % cap;
        }
        out
    }

    pub fn print_buffer(&self) -> String {
        let mut out = String::new();
        for line in self.lines() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Render the holder table followed by the gate's total count.
    pub fn print_table(&self, total: u32) -> String {
        let mut names: Vec<_> = self.table.keys().collect();
        names.sort();

        let mut out = String::from("\n---- Active Clients Table ----\n");
        for name in names {
            let entry = &self.table[name];
            let _ = writeln!(
                out,
                "{:<40} {:<3} {}",
                name,
                entry.count,
                entry.kind.label()
            );
        }
        let _ = write!(out, "\nTotal active clients count: {total}\n");
        out
    }

    /// Drop all text log records. The holder table is left intact.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = self.lines.len() - 1;
    }
}

fn truncate(s: &str, max: usize) -> &str {
    &s[..floor_char_boundary(s, max)]
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
