//! # In-Memory Escrow Store
//!
//! Escrows live behind one `Arc<Mutex<_>>` each so that mutations of
//! different escrows never contend. The outer `RwLock` guards only the
//! directory (id → handle, creation order, milestone → escrow index) and is
//! never held while an escrow lock is taken.
//!
//! Locks are `parking_lot` and are never held across `.await`.
//!
//! ## Lock Order
//!
//! escrow → instructions → ledger. Nothing acquires an escrow lock while
//! holding the instruction map or the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use mesc_core::{EscrowId, InstructionId, MilestoneId};
use parking_lot::{Mutex, RwLock};

use crate::escrow::Escrow;
use crate::payment::PaymentInstruction;

#[derive(Debug, Default)]
struct Directory {
    escrows: HashMap<EscrowId, Arc<Mutex<Escrow>>>,
    order: Vec<EscrowId>,
    milestones: HashMap<MilestoneId, EscrowId>,
}

/// Thread-safe, cloneable store of escrows and their payment instructions.
#[derive(Debug, Clone, Default)]
pub struct EscrowStore {
    directory: Arc<RwLock<Directory>>,
    instructions: Arc<RwLock<HashMap<InstructionId, PaymentInstruction>>>,
}

impl EscrowStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created escrow and index its milestones.
    pub fn insert(&self, escrow: Escrow) {
        let mut dir = self.directory.write();
        let id = escrow.id;
        for m in &escrow.milestones {
            dir.milestones.insert(m.id, id);
        }
        if dir
            .escrows
            .insert(id, Arc::new(Mutex::new(escrow)))
            .is_none()
        {
            dir.order.push(id);
        }
    }

    /// The lock handle for one escrow.
    pub(crate) fn handle(&self, id: EscrowId) -> Option<Arc<Mutex<Escrow>>> {
        self.directory.read().escrows.get(&id).cloned()
    }

    /// Index milestones added after creation (budget change, templates).
    pub(crate) fn index_milestones(&self, escrow: &Escrow) {
        let mut dir = self.directory.write();
        for m in &escrow.milestones {
            dir.milestones.entry(m.id).or_insert(escrow.id);
        }
    }

    /// Snapshot of one escrow.
    pub fn get(&self, id: EscrowId) -> Option<Escrow> {
        let handle = self.handle(id)?;
        let escrow = handle.lock().clone();
        Some(escrow)
    }

    /// Snapshots in creation order.
    pub fn list(&self, skip: usize, limit: usize) -> Vec<Escrow> {
        let handles: Vec<Arc<Mutex<Escrow>>> = {
            let dir = self.directory.read();
            dir.order
                .iter()
                .skip(skip)
                .take(limit)
                .filter_map(|id| dir.escrows.get(id).cloned())
                .collect()
        };
        handles.iter().map(|h| h.lock().clone()).collect()
    }

    /// Number of escrows.
    pub fn len(&self) -> usize {
        self.directory.read().order.len()
    }

    /// True when the store holds no escrows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Escrow owning `milestone_id`.
    pub fn escrow_for_milestone(&self, milestone_id: MilestoneId) -> Option<EscrowId> {
        self.directory.read().milestones.get(&milestone_id).copied()
    }

    // -- Payment instructions --------------------------------------------

    pub(crate) fn insert_instruction(&self, instruction: PaymentInstruction) {
        self.instructions.write().insert(instruction.id, instruction);
    }

    /// Snapshot of one instruction.
    pub fn instruction(&self, id: InstructionId) -> Option<PaymentInstruction> {
        self.instructions.read().get(&id).cloned()
    }

    /// Instructions of one escrow, oldest first.
    pub fn instructions_for(&self, escrow_id: EscrowId) -> Vec<PaymentInstruction> {
        let mut found: Vec<PaymentInstruction> = self
            .instructions
            .read()
            .values()
            .filter(|i| i.escrow_id == escrow_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }

    /// Run `f` against one instruction under the instruction write lock.
    /// Returns `None` if the instruction does not exist.
    pub(crate) fn with_instruction<R>(
        &self,
        id: InstructionId,
        f: impl FnOnce(&mut PaymentInstruction) -> R,
    ) -> Option<R> {
        self.instructions.write().get_mut(&id).map(f)
    }
}
