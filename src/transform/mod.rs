//! Class rewriting: turns the live instruments targeting a class into calls
//! to the hook class.
//!
//! Line-bound instruments (breakpoints, logs, meters) are injected at the
//! first instruction of their line. Spans wrap a whole method: opened on
//! entry, closed before every return and in a catch-all handler that
//! rethrows.

mod inject;

use crate::bytecode::BytecodeError;
use crate::classfile::descriptor::{java_method_signature, MethodDescriptor};
use crate::classfile::{ClassFile, ClassFileError};
use crate::hooks::{HookRefs, DEFAULT_HOOK_CLASS};
use crate::instrument::ActiveLiveInstrument;
use crate::metadata;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    ClassFile(#[from] ClassFileError),
    #[error(transparent)]
    Bytecode(#[from] BytecodeError),
    /// `instruments` are the ids that were being placed in `method`.
    #[error("cannot instrument {method}: {source}")]
    Method {
        method: String,
        instruments: Vec<String>,
        #[source]
        source: BytecodeError,
    },
}

impl TransformError {
    /// Ids of the instruments the failure is attributed to; empty when the
    /// class as a whole could not be handled.
    pub fn instruments(&self) -> &[String] {
        match self {
            TransformError::Method { instruments, .. } => instruments,
            _ => &[],
        }
    }
}

/// Instruments sorted by line, and the spans, that apply to one class.
#[derive(Default)]
struct Plan<'a> {
    lines: BTreeMap<u16, Vec<&'a Arc<ActiveLiveInstrument>>>,
    spans: Vec<&'a Arc<ActiveLiveInstrument>>,
}

impl<'a> Plan<'a> {
    fn build(dotted_name: &str, instruments: &'a [Arc<ActiveLiveInstrument>]) -> Self {
        let mut plan = Plan::default();
        for active in instruments {
            let instrument = &active.instrument;
            if instrument.is_span() {
                plan.spans.push(active);
                continue;
            }
            if !instrument.location.matches_class(dotted_name) {
                continue;
            }
            match instrument.line().map(u16::try_from) {
                Some(Ok(line)) => plan.lines.entry(line).or_default().push(active),
                _ => debug!(id = %instrument.id, "instrument has no usable line"),
            }
        }
        plan
    }

    fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.spans.is_empty()
    }

    fn spans_for(&self, signature: &str) -> Vec<&'a Arc<ActiveLiveInstrument>> {
        self.spans
            .iter()
            .copied()
            .filter(|span| span.instrument.location.signature() == Some(signature))
            .collect()
    }
}

/// Rewrites class files for the instruments registered against them.
#[derive(Debug, Clone)]
pub struct LiveTransformer {
    hook_class: String,
}

impl Default for LiveTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_HOOK_CLASS)
    }
}

impl LiveTransformer {
    /// `hook_class` is the internal name the injected calls target.
    pub fn new(hook_class: impl Into<String>) -> Self {
        Self { hook_class: hook_class.into() }
    }

    pub fn hook_class(&self) -> &str {
        &self.hook_class
    }

    /// Returns the rewritten class, or `None` when no instrument applies to
    /// any of its code.
    ///
    /// `instruments` is expected in registration order; instruments on the
    /// same line run in that order.
    pub fn transform(
        &self,
        class_bytes: &[u8],
        instruments: &[Arc<ActiveLiveInstrument>],
    ) -> Result<Option<Vec<u8>>, TransformError> {
        if instruments.is_empty() {
            return Ok(None);
        }
        let mut class = ClassFile::parse(class_bytes)?;
        let internal_name = class.this_class_name()?.to_string();
        let dotted_name = internal_name.replace('/', ".");

        let plan = Plan::build(&dotted_name, instruments);
        if plan.is_empty() {
            return Ok(None);
        }

        let metadata = metadata::collect(&class)?;
        let requires_frames = class.requires_frames();
        let ClassFile { constant_pool, methods, .. } = &mut class;
        let hooks = HookRefs::add(constant_pool, &self.hook_class)?;
        let cx = inject::ClassContext {
            internal_name: &internal_name,
            dotted_name: &dotted_name,
            metadata: &metadata,
            hooks,
            requires_frames,
        };

        let mut injected = 0;
        for method in methods.iter_mut() {
            if method.code().is_none() {
                continue;
            }
            let name = method.name(constant_pool)?.to_string();
            let raw_descriptor = method.descriptor(constant_pool)?.to_string();
            let descriptor = MethodDescriptor::parse(&raw_descriptor)?;

            let mut spans = plan.spans_for(&java_method_signature(&internal_name, &name, &descriptor));
            if !spans.is_empty() && name == "<init>" {
                warn!(class = %dotted_name, "spans on constructors are not supported");
                spans.clear();
            }

            let placed = method.code().map(|code| inject::placed_ids(code, &plan.lines, &spans)).unwrap_or_default();
            let target = inject::MethodTarget { name: &name, raw_descriptor: &raw_descriptor, descriptor: &descriptor };
            injected += cx.inject(constant_pool, method, &target, &plan.lines, &spans).map_err(|source| {
                TransformError::Method { method: format!("{name}{raw_descriptor}"), instruments: placed, source }
            })?;
        }

        if injected == 0 {
            return Ok(None);
        }
        debug!(class = %dotted_name, injected, "class rewritten");
        Ok(Some(class.to_bytes()?))
    }
}
