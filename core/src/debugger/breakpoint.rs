use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::debugger::DebugError;
use crate::debugger::protocol::BreakpointInfo;
use crate::vm::{CodeBlock, FrameTrace, InstructionEvent};

/// When a breakpoint whose condition holds actually stops, based on how many
/// times it was reached with the condition holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCondition {
    /// `N`: only on the N-th hit.
    Equal(u64),
    /// `>N`
    Greater(u64),
    /// `>=N`
    AtLeast(u64),
    /// `%N`: every N-th hit. `%0` never matches.
    Every(u64),
}

impl HitCondition {
    pub fn is_met(self, hits: u64) -> bool {
        match self {
            HitCondition::Equal(n) => hits == n,
            HitCondition::Greater(n) => hits > n,
            HitCondition::AtLeast(n) => hits >= n,
            HitCondition::Every(n) => hits.checked_rem(n) == Some(0),
        }
    }
}

impl FromStr for HitCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let count = |digits: &str| {
            digits
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("expected N, >N, >=N or %N, got `{}`", s))
        };
        if let Some(rest) = s.strip_prefix(">=") {
            Ok(HitCondition::AtLeast(count(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(HitCondition::Greater(count(rest)?))
        } else if let Some(rest) = s.strip_prefix('%') {
            match count(rest)? {
                0 => Err("`%0` never matches".to_string()),
                n => Ok(HitCondition::Every(n)),
            }
        } else {
            Ok(HitCondition::Equal(count(s)?))
        }
    }
}

pub(crate) struct Breakpoint {
    pub(crate) id: u64,
    pub(crate) file: Arc<str>,
    pub(crate) line: u32,
    pub(crate) condition: Option<String>,
    pub(crate) hit_condition: Option<HitCondition>,
    /// Times reached with the condition holding.
    pub(crate) hits: u64,
    pub(crate) enabled: bool,
    /// First instruction of `line` in each loaded block of `file`.
    locations: HashMap<Uuid, usize>,
}

impl Breakpoint {
    pub(crate) fn verified(&self) -> bool {
        !self.locations.is_empty()
    }

    fn resolve(&mut self, block: &CodeBlock) {
        if let Some(index) = block.first_index_of_line(self.line) {
            self.locations.insert(block.id, index);
        }
    }

    /// Reached at its first instruction, or by a jump onto its line.
    fn matches(&self, frame: &FrameTrace, event: InstructionEvent) -> bool {
        if !self.enabled {
            return false;
        }
        if self.locations.get(&frame.block.id) == Some(&frame.ip()) {
            return true;
        }
        event.jumped && event.line_changed && frame.line() == self.line
    }
}

/// Breakpoints by file and line, plus every code block seen so far.
pub(crate) struct BreakpointSet {
    next_id: u64,
    by_file: HashMap<Arc<str>, BTreeMap<u32, Breakpoint>>,
    blocks: HashMap<Uuid, Arc<CodeBlock>>,
}

impl BreakpointSet {
    pub(crate) fn new() -> Self {
        BreakpointSet {
            next_id: 1,
            by_file: HashMap::new(),
            blocks: HashMap::new(),
        }
    }

    /// Register `block` and the blocks nested in it, resolving breakpoints
    /// against any that are new.
    pub(crate) fn load(&mut self, block: &Arc<CodeBlock>) {
        let mut pending = vec![block.clone()];
        while let Some(block) = pending.pop() {
            if self.blocks.contains_key(&block.id) {
                continue;
            }
            if let Some(file) = &block.file {
                if let Some(lines) = self.by_file.get_mut(&**file) {
                    for breakpoint in lines.values_mut() {
                        breakpoint.resolve(&block);
                    }
                }
            }
            pending.extend(block.nested_blocks());
            self.blocks.insert(block.id, block);
        }
    }

    pub(crate) fn contains_block(&self, id: &Uuid) -> bool {
        self.blocks.contains_key(id)
    }

    /// Set (or replace) the breakpoint at `file:line`. Replacing keeps the id
    /// and resets the hit count.
    pub(crate) fn set(
        &mut self,
        file: &str,
        line: u32,
        condition: Option<String>,
        hit_condition: Option<HitCondition>,
    ) -> Result<u64, DebugError> {
        let file_blocks: Vec<&Arc<CodeBlock>> = self
            .blocks
            .values()
            .filter(|block| block.file.as_deref() == Some(file))
            .collect();
        if !file_blocks.is_empty()
            && file_blocks
                .iter()
                .all(|block| block.first_index_of_line(line).is_none())
        {
            return Err(DebugError::NoCodeAtLine {
                file: file.to_string(),
                line,
            });
        }

        let lines = self.by_file.entry(Arc::from(file)).or_default();
        let id = match lines.get(&line) {
            Some(existing) => existing.id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        let mut breakpoint = Breakpoint {
            id,
            file: Arc::from(file),
            line,
            condition,
            hit_condition,
            hits: 0,
            enabled: true,
            locations: HashMap::new(),
        };
        for block in file_blocks {
            breakpoint.resolve(block);
        }
        debug!(
            id,
            file,
            line,
            verified = breakpoint.verified(),
            "breakpoint set"
        );
        lines.insert(line, breakpoint);
        Ok(id)
    }

    /// Remove the breakpoints of `file` whose line is not in `lines`.
    pub(crate) fn clear_except(&mut self, file: &str, lines: &[u32]) {
        if let Some(existing) = self.by_file.get_mut(file) {
            existing.retain(|line, _| lines.contains(line));
        }
    }

    pub(crate) fn set_enabled(&mut self, id: u64, enabled: bool) -> bool {
        match self.find_mut(id) {
            Some(breakpoint) => {
                breakpoint.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// The breakpoint `frame` has just reached, if any. At most one
    /// breakpoint exists per line.
    pub(crate) fn matching(&self, frame: &FrameTrace, event: InstructionEvent) -> Option<u64> {
        let file = frame.block.file.as_deref()?;
        let breakpoint = self.by_file.get(file)?.get(&frame.line())?;
        breakpoint.matches(frame, event).then_some(breakpoint.id)
    }

    pub(crate) fn find(&self, id: u64) -> Option<&Breakpoint> {
        self.by_file
            .values()
            .flat_map(BTreeMap::values)
            .find(|breakpoint| breakpoint.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: u64) -> Option<&mut Breakpoint> {
        self.by_file
            .values_mut()
            .flat_map(BTreeMap::values_mut)
            .find(|breakpoint| breakpoint.id == id)
    }

    pub(crate) fn infos(&self) -> Vec<BreakpointInfo> {
        let mut infos: Vec<BreakpointInfo> = self
            .by_file
            .values()
            .flat_map(BTreeMap::values)
            .map(|breakpoint| BreakpointInfo {
                id: breakpoint.id,
                verified: breakpoint.verified(),
                file: breakpoint.file.to_string(),
                line: breakpoint.line,
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Assembler;

    #[test]
    fn test_parse_hit_conditions() {
        assert_eq!("3".parse(), Ok(HitCondition::Equal(3)));
        assert_eq!(">2".parse(), Ok(HitCondition::Greater(2)));
        assert_eq!(">= 2".parse(), Ok(HitCondition::AtLeast(2)));
        assert_eq!("%4".parse(), Ok(HitCondition::Every(4)));
        assert!("%0".parse::<HitCondition>().is_err());
        assert!("often".parse::<HitCondition>().is_err());
    }

    #[test]
    fn test_hit_condition_semantics() {
        assert!(HitCondition::Equal(3).is_met(3));
        assert!(!HitCondition::Equal(3).is_met(4));
        assert!(HitCondition::Greater(2).is_met(3));
        assert!(!HitCondition::Greater(2).is_met(2));
        assert!(HitCondition::AtLeast(2).is_met(2));
        assert!(HitCondition::Every(2).is_met(4));
        assert!(!HitCondition::Every(2).is_met(3));
        assert!(!HitCondition::Every(0).is_met(0));
        assert!(!HitCondition::Every(0).is_met(5));
    }

    fn program() -> Arc<CodeBlock> {
        let mut asm = Assembler::new(Some("main.kelp"));
        asm.line(1).push(1).store("a");
        asm.line(2).function("f", &[], false, |f| {
            f.line(3).push(2).ret();
        });
        asm.store("f");
        asm.finish().block
    }

    #[test]
    fn test_breakpoints_resolve_in_nested_blocks() {
        let mut set = BreakpointSet::new();
        let early = set.set("main.kelp", 3, None, None).unwrap();
        assert!(!set.infos()[0].verified);

        set.load(&program());
        assert!(set.find(early).unwrap().verified());

        let late = set.set("main.kelp", 1, None, None).unwrap();
        assert!(set.find(late).unwrap().verified());
        assert_ne!(early, late);
    }

    #[test]
    fn test_no_code_at_line() {
        let mut set = BreakpointSet::new();
        set.load(&program());
        assert!(matches!(
            set.set("main.kelp", 42, None, None),
            Err(DebugError::NoCodeAtLine { line: 42, .. })
        ));
        // Unknown files are accepted unverified.
        assert!(set.set("other.kelp", 42, None, None).is_ok());
    }

    #[test]
    fn test_replace_keeps_id_and_clear_except() {
        let mut set = BreakpointSet::new();
        set.load(&program());
        let first = set.set("main.kelp", 1, None, None).unwrap();
        let again = set
            .set("main.kelp", 1, Some("a > 1".into()), None)
            .unwrap();
        assert_eq!(first, again);
        set.set("main.kelp", 3, None, None).unwrap();

        set.clear_except("main.kelp", &[3]);
        let lines: Vec<u32> = set.infos().iter().map(|info| info.line).collect();
        assert_eq!(lines, vec![3]);
        assert!(!set.set_enabled(first, false));
    }
}
