use std::fmt::Write as _;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use uuid::Uuid;

use crate::scope::SymbolTable;
use crate::vm::{Code, OpCode};

/// Namespace for content-addressed code block ids.
const CODE_NAMESPACE: Uuid = Uuid::from_u128(0x6b656c70_636f_6465_b10c_000000000001);

/// An immutable, compiled unit of code: a function body, a deferred block or
/// a top-level program.
pub struct CodeBlock {
    /// Content-addressed id, derived from the file name and the listing.
    pub id: Uuid,
    pub file: Option<Arc<str>>,
    pub codes: Vec<Code>,
}

impl CodeBlock {
    pub fn new(file: Option<Arc<str>>, codes: Vec<Code>) -> Self {
        let mut fingerprint = String::new();
        if let Some(file) = &file {
            fingerprint.push_str(file);
        }
        fingerprint.push('\n');
        for code in &codes {
            // Infallible for String.
            let _ = writeln!(
                fingerprint,
                "{:?} {}:{}",
                code.op, code.span.start_line, code.span.start_column
            );
        }
        CodeBlock {
            id: Uuid::new_v5(&CODE_NAMESPACE, fingerprint.as_bytes()),
            file,
            codes,
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Index of the first instruction attributed to `line`.
    pub fn first_index_of_line(&self, line: u32) -> Option<usize> {
        self.codes.iter().position(|code| code.line() == line)
    }

    /// Code blocks referenced directly by this one (function bodies and
    /// deferred blocks).
    pub fn nested_blocks(&self) -> Vec<Arc<CodeBlock>> {
        self.codes
            .iter()
            .filter_map(|code| match &code.op {
                OpCode::NewFunction(proto) => Some(proto.block.clone()),
                OpCode::Defer(block) => Some(block.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A compiled top-level unit: the code to run and the symbol table of its
/// outermost scope.
#[derive(Debug, Clone)]
pub struct Program {
    pub block: Arc<CodeBlock>,
    pub table: Arc<SymbolTable>,
}

impl core::fmt::Debug for CodeBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "CodeBlock {{")?;
        writeln!(f, "  id: {}", self.id)?;
        writeln!(f, "  file: {}", self.file.as_deref().unwrap_or("<script>"))?;

        // First pass: collect all jump targets to determine which addresses need labels
        let jump_targets: HashSet<usize> = self
            .codes
            .iter()
            .filter_map(|code| code.op.jump_target())
            .collect();

        // Assign label numbers to targets (sorted for deterministic output)
        let mut sorted_targets: Vec<_> = jump_targets.into_iter().collect();
        sorted_targets.sort();
        let label_map: HashMap<usize, usize> = sorted_targets
            .into_iter()
            .enumerate()
            .map(|(i, addr)| (addr, i))
            .collect();

        // Second pass: print instructions with labels
        writeln!(f, "  codes:")?;
        for (addr, code) in self.codes.iter().enumerate() {
            let label_prefix = match label_map.get(&addr) {
                Some(label_num) => format!("L{}:", label_num),
                None => String::new(),
            };
            match code.op.jump_target() {
                Some(target) => {
                    let target_label = label_map
                        .get(&target)
                        .map(|l| format!("L{}", l))
                        .unwrap_or_else(|| format!("@{}", target));
                    writeln!(
                        f,
                        "    {:4} {:>4}  {:?} (to {})  ; line {}",
                        addr,
                        label_prefix,
                        code.op,
                        target_label,
                        code.line()
                    )?;
                }
                None => writeln!(
                    f,
                    "    {:4} {:>4}  {:?}  ; line {}",
                    addr,
                    label_prefix,
                    code.op,
                    code.line()
                )?,
            }
        }

        write!(f, "}}")
    }
}
