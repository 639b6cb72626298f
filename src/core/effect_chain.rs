use std::collections::HashMap;

use log::debug;

use crate::error::{CompositorError, Result};
use crate::traits::{
    Effect, EffectKind, ParamHandle, RenderBackend, MATRIX_UNIFORM, POSITION_ATTRIBUTE,
    TEXTURE_MATRIX_UNIFORM, TEXTURE_SAMPLER_UNIFORM,
};

/// Parameter handles one slot needs for its draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandles {
    pub sampler: ParamHandle,
    pub texture_matrix: ParamHandle,
    pub position_matrix: ParamHandle,
    pub position_attribute: ParamHandle,
}

/// Ordered effects, one per layer slot, deduplicated by [`EffectKind`].
///
/// Slots asking for an already-registered kind share the first instance (and
/// its GPU program); each slot still resolves its own handles.
#[derive(Default)]
pub struct EffectChain {
    instances: Vec<Box<dyn Effect>>,
    by_kind: HashMap<EffectKind, usize>,
    slots: Vec<usize>,
    handles: Vec<Option<SlotHandles>>,
    released: bool,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot using `effect`, returning the slot index
    pub fn push(&mut self, effect: Box<dyn Effect>) -> usize {
        let kind = effect.kind();
        let instance = match self.by_kind.get(&kind) {
            Some(&existing) => existing,
            None => {
                self.instances.push(effect);
                let index = self.instances.len() - 1;
                self.by_kind.insert(kind, index);
                index
            }
        };
        self.slots.push(instance);
        self.handles.push(None);
        self.slots.len() - 1
    }

    /// Prepare each distinct effect once
    pub fn prepare(&mut self, backend: &mut dyn RenderBackend) -> Result<()> {
        for effect in &mut self.instances {
            effect.prepare(backend)?;
        }
        self.released = false;
        debug!(
            "prepared {} distinct effects for {} slots",
            self.instances.len(),
            self.slots.len()
        );
        Ok(())
    }

    /// Look up every slot's parameter handles. Requires `prepare`.
    pub fn resolve_handles(&mut self, backend: &dyn RenderBackend) -> Result<()> {
        for (slot, &instance) in self.slots.iter().enumerate() {
            let effect = &self.instances[instance];
            let lookup = |name: &str| {
                effect.parameter_handle(backend, name).ok_or_else(|| {
                    CompositorError::Backend(format!(
                        "effect {:?} has no parameter '{}'",
                        effect.kind(),
                        name
                    ))
                })
            };

            self.handles[slot] = Some(SlotHandles {
                sampler: lookup(TEXTURE_SAMPLER_UNIFORM)?,
                texture_matrix: lookup(TEXTURE_MATRIX_UNIFORM)?,
                position_matrix: lookup(MATRIX_UNIFORM)?,
                position_attribute: lookup(POSITION_ATTRIBUTE)?,
            });
        }
        Ok(())
    }

    pub fn effect(&self, slot: usize) -> Option<&dyn Effect> {
        let instance = *self.slots.get(slot)?;
        self.instances.get(instance).map(|e| e.as_ref())
    }

    pub fn handles(&self, slot: usize) -> Option<SlotHandles> {
        self.handles.get(slot).copied().flatten()
    }

    /// Index of the shared instance backing `slot`
    pub fn instance_index(&self, slot: usize) -> Option<usize> {
        self.slots.get(slot).copied()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of distinct effect instances
    pub fn distinct_len(&self) -> usize {
        self.instances.len()
    }

    /// Release every distinct instance. Later calls do nothing.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if self.released {
            return;
        }
        self.released = true;
        for effect in &mut self.instances {
            effect.release(backend);
        }
        for handles in &mut self.handles {
            *handles = None;
        }
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.by_kind.clear();
        self.slots.clear();
        self.handles.clear();
    }
}
