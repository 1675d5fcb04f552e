//! The read-only lookup tables the pass is driven by.
//!
//! All of them are loaded once, before the first function is touched, and
//! only ever read afterwards.

use core::{fmt::Debug, str::FromStr};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use aflgo_bolts::Error;
use hashbrown::{HashMap, HashSet};

use crate::location::LocationId;

fn open<P: AsRef<Path>>(path: P) -> Result<BufReader<File>, Error> {
    Ok(BufReader::new(File::open(path)?))
}

fn records<R: BufRead>(reader: R) -> impl Iterator<Item = Result<String, Error>> {
    reader
        .lines()
        .map(|line| line.map_err(Error::from))
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
}

/// The fuzzing targets, one `path:line` per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetList {
    targets: HashSet<LocationId>,
}

impl TargetList {
    /// Parses a target list. Records without a numeric line are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut targets = HashSet::new();
        for record in records(reader) {
            let record = record?;
            match LocationId::parse(&record) {
                Some(target) => {
                    targets.insert(target);
                }
                None => log::warn!("Ignoring malformed target `{record}`"),
            }
        }
        Ok(Self { targets })
    }

    /// Loads a target list from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_reader(open(path)?)
    }

    /// Whether `loc` is one of the targets (same base name, same line)
    #[must_use]
    pub fn contains(&self, loc: &LocationId) -> bool {
        self.targets.contains(loc)
    }

    /// Number of targets
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether there are no targets
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Block distances to the targets, as computed offline.
///
/// One `block_name,distance` record per line. Distances are kept as
/// `round(100 * distance)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistanceTable {
    distances: HashMap<LocationId, i64>,
}

impl DistanceTable {
    /// Parses a distance table
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut distances = HashMap::new();
        for record in records(reader) {
            let record = record?;
            let (name, distance) = record.split_once(',').ok_or_else(|| {
                Error::illegal_argument(format!("Distance record `{record}` has no ','"))
            })?;
            let distance: f64 = distance.trim().parse()?;
            match LocationId::parse(name) {
                Some(block) => {
                    distances.insert(block, (100.0 * distance).round() as i64);
                }
                None => log::debug!("Skipping distance for unlocated block `{name}`"),
            }
        }
        Ok(Self { distances })
    }

    /// Loads a distance table from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_reader(open(path)?)
    }

    /// The scaled distance of a block
    #[must_use]
    pub fn get(&self, block: &LocationId) -> Option<i64> {
        self.distances.get(block).copied()
    }

    /// Whether the block has a distance at all
    #[must_use]
    pub fn contains(&self, block: &LocationId) -> bool {
        self.distances.contains_key(block)
    }

    /// Number of blocks with a distance
    #[must_use]
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }
}

/// Events attached to source locations, one `path:line:event` per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTable<V> {
    events: HashMap<LocationId, V>,
}

/// Automaton mode: integer output events
pub type AutomatonEvents = EventTable<i32>;

/// Protocol mode: proposition names
pub type PropositionEvents = EventTable<String>;

impl<V> Default for EventTable<V> {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
        }
    }
}

impl<V> EventTable<V>
where
    V: FromStr,
    V::Err: Debug,
{
    /// Parses an event table. An event that does not parse is an error.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, Error> {
        let mut events = HashMap::new();
        for record in records(reader) {
            let record = record?;
            let Some((loc, event)) = record.rsplit_once(':') else {
                log::warn!("Ignoring malformed event `{record}`");
                continue;
            };
            let event: V = event.trim().parse().map_err(|err| {
                Error::illegal_argument(format!("Bad event in `{record}`: {err:?}"))
            })?;
            match LocationId::parse(loc) {
                Some(loc) => {
                    events.insert(loc, event);
                }
                None => log::warn!("Ignoring event at malformed location `{loc}`"),
            }
        }
        Ok(Self { events })
    }

    /// Loads an optional event table.
    ///
    /// A file that cannot be opened yields `Ok(None)`: the matching monitor
    /// mode just stays off.
    pub fn open_optional<P: AsRef<Path>>(path: P) -> Result<Option<Self>, Error> {
        let path = path.as_ref();
        match File::open(path) {
            Ok(file) => Self::from_reader(BufReader::new(file)).map(Some),
            Err(err) => {
                log::debug!("Not loading events from {}: {err}", path.display());
                Ok(None)
            }
        }
    }
}

impl<V> EventTable<V> {
    /// The event at `loc`
    #[must_use]
    pub fn get(&self, loc: &LocationId) -> Option<&V> {
        self.events.get(loc)
    }

    /// Number of event locations
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
