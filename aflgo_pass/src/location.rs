//! Stable, source-derived identities for instructions and blocks.
//!
//! A [`LocationId`] renders as `basename(file):line` and is the join key
//! between the preprocessing artifacts, the distance table and the LTL event
//! tables.

use core::fmt::{self, Display};

use crate::ir::{BasicBlock, DebugLoc, Instruction};

/// Files under this prefix are system headers and libraries, never interesting.
pub const SYSTEM_LIB_PREFIX: &str = "/usr/";

/// Function name prefixes the pass never looks into.
///
/// These are sanitizer, coverage and allocator support routines.
/// Instrumenting them would be circular or pointless.
pub const BLACKLIST: [&str; 8] = [
    "asan.",
    "llvm.",
    "sancov.",
    "__ubsan_handle_",
    "free",
    "malloc",
    "calloc",
    "realloc",
];

/// Whether a function of this name must be left alone
#[must_use]
pub fn is_blacklisted(name: &str) -> bool {
    BLACKLIST.iter().any(|prefix| name.starts_with(prefix))
}

/// Strips any directory prefix, `/` or `\` separated.
#[must_use]
pub fn basename(path: &str) -> &str {
    match path.rfind(|c: char| c == '/' || c == '\\') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// A normalized `file:line` identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId {
    file: String,
    line: u32,
}

impl LocationId {
    /// Builds an identity, stripping directories from `file`.
    #[must_use]
    pub fn new(file: &str, line: u32) -> Self {
        Self {
            file: basename(file).to_string(),
            line,
        }
    }

    /// Parses a `path:line` record as found in the input tables.
    ///
    /// A single trailing `:` (the renamed-block form `file:line:`) is accepted.
    #[must_use]
    pub fn parse(record: &str) -> Option<Self> {
        let record = record.trim();
        let record = record.strip_suffix(':').unwrap_or(record);
        let (file, line) = record.rsplit_once(':')?;
        let line = line.trim().parse().ok()?;
        let file = basename(file);
        if file.is_empty() {
            return None;
        }
        Some(Self::new(file, line))
    }

    /// Base name of the source file
    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Source line
    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// The label a block with this identity is renamed to: `file:line:`.
    #[must_use]
    pub fn block_label(&self) -> String {
        format!("{self}:")
    }
}

impl Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Derives the identity of a debug location.
///
/// Returns `None` without a location, for line 0, for an empty file name and
/// for anything under [`SYSTEM_LIB_PREFIX`].
///
/// The prefix is checked against the full path, before the directories are stripped.
#[must_use]
pub fn normalize(loc: Option<&DebugLoc>) -> Option<LocationId> {
    let loc = loc?;
    if loc.line == 0 || loc.file.starts_with(SYSTEM_LIB_PREFIX) {
        return None;
    }
    let file = basename(&loc.file);
    if file.is_empty() {
        return None;
    }
    Some(LocationId::new(file, loc.line))
}

/// Identity of a single instruction
#[must_use]
pub fn instruction_location(inst: &Instruction) -> Option<LocationId> {
    normalize(inst.loc.as_ref())
}

/// Identity of a block: that of its first instruction with a usable location.
#[must_use]
pub fn block_location(bb: &BasicBlock) -> Option<LocationId> {
    bb.instructions.iter().find_map(instruction_location)
}

#[cfg(test)]
mod tests {
    use crate::{
        ir::{BasicBlock, DebugLoc, Instruction, Op},
        location::{basename, block_location, is_blacklisted, normalize, LocationId},
    };

    #[test]
    fn test_normalize_rules() {
        assert_eq!(normalize(None), None);
        assert_eq!(normalize(Some(&DebugLoc::new("src/foo.c", 0))), None);
        assert_eq!(
            normalize(Some(&DebugLoc::new("/usr/include/stdio.h", 12))),
            None
        );
        assert_eq!(normalize(Some(&DebugLoc::new("src/", 3))), None);
        let id = normalize(Some(&DebugLoc::new("/home/u/src/foo.c", 10))).unwrap();
        assert_eq!(id.to_string(), "foo.c:10");
        assert_eq!(id.block_label(), "foo.c:10:");
    }

    #[test]
    fn test_normalize_idempotent() {
        let loc = DebugLoc::new("a\\b\\c/foo.c", 7);
        assert_eq!(normalize(Some(&loc)), normalize(Some(&loc)));
        assert_eq!(basename(basename("x/y/foo.c")), basename("x/y/foo.c"));
        let id = normalize(Some(&loc)).unwrap();
        assert_eq!(LocationId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn test_parse_records() {
        assert_eq!(
            LocationId::parse("/src/foo.c:10"),
            Some(LocationId::new("foo.c", 10))
        );
        assert_eq!(
            LocationId::parse("foo.c:10:"),
            Some(LocationId::new("foo.c", 10))
        );
        assert_eq!(LocationId::parse("foo.c"), None);
        assert_eq!(LocationId::parse("foo.c:ten"), None);
        assert_eq!(LocationId::parse(":10"), None);
    }

    #[test]
    fn test_block_location_first_usable() {
        let bb = BasicBlock::new(vec![
            Instruction::new(Op::LandingPad),
            Instruction::new(Op::Unreachable).with_loc("/usr/include/x.h", 4),
            Instruction::new(Op::Unreachable).with_loc("lib/bar.c", 0),
            Instruction::new(Op::Unreachable).with_loc("lib/bar.c", 21),
            Instruction::new(Op::Ret { value: None }).with_loc("lib/bar.c", 22),
        ]);
        assert_eq!(block_location(&bb), Some(LocationId::new("bar.c", 21)));
    }

    #[test]
    fn test_blacklist() {
        for name in ["llvm.dbg.value", "asan.module_ctor", "malloc", "freeaddrinfo"] {
            assert!(is_blacklisted(name), "{name}");
        }
        for name in ["main", "png_read_info", "my_free"] {
            assert!(!is_blacklisted(name), "{name}");
        }
    }
}
