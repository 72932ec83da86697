//! Reversible plan edits.
//!
//! A command performs its edit when it is built and stays *pending* until
//! it is committed or rolled back. Solvers use this to try a placement,
//! inspect the consequences and back out again without leaving traces.
//! Committed commands can still be undone and redone.

use std::fmt;

use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::fixed::Quantity;
use crate::id::OperationPlanKey;
use crate::operationplan::{Activation, NewPlan};
use crate::plan::Plan;
use crate::state::HierarchyState;
use crate::time::Date;

// ---------------------------------------------------------------------------
// Command trait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Committed,
    RolledBack,
    Undone,
}

/// An edit of the plan that can be made permanent or reverted.
pub trait Command: fmt::Debug {
    /// Make the edit permanent.
    fn commit(&mut self, plan: &mut Plan) -> PlanResult<()>;

    /// Revert a pending edit. A rolled back command is spent.
    fn rollback(&mut self, plan: &mut Plan) -> PlanResult<()>;

    /// Revert the edit but keep the command around for [`Command::redo`].
    fn undo(&mut self, plan: &mut Plan) -> PlanResult<()>;

    /// Reapply an undone edit.
    fn redo(&mut self, plan: &mut Plan) -> PlanResult<()>;

    fn status(&self) -> CommandStatus;
}

fn expect_status(actual: CommandStatus, allowed: &[CommandStatus], action: &str) -> PlanResult<()> {
    if allowed.contains(&actual) {
        Ok(())
    } else {
        Err(PlanError::logic(format!("cannot {action} a command in state {actual:?}")))
    }
}

// ---------------------------------------------------------------------------
// CreateOperationPlan
// ---------------------------------------------------------------------------

/// Create an operationplan. Its flowplans and loadplans are on the
/// timelines right away; activation waits for the commit.
///
/// When the commit folds the new plan into an identical existing one, the
/// command keeps the existing plan's state from before and after the merge
/// so undo takes only the added quantity back off it.
#[derive(Debug)]
pub struct CreateOperationPlan {
    key: Option<OperationPlanKey>,
    status: CommandStatus,
    committed: bool,
    merged: Option<Merge>,
}

#[derive(Debug)]
struct Merge {
    before: HierarchyState,
    after: HierarchyState,
}

impl CreateOperationPlan {
    pub fn new(plan: &mut Plan, new: NewPlan) -> PlanResult<Self> {
        let key = plan.create_operationplan(new.with_flowloads())?;
        Ok(Self { key: Some(key), status: CommandStatus::Pending, committed: false, merged: None })
    }

    /// The plan holding the created quantity: the new plan, or the plan it
    /// was merged into. `None` once it was rolled back, or when the commit
    /// discarded it for being empty.
    pub fn key(&self) -> Option<OperationPlanKey> {
        self.key
    }

    /// Whether the commit merged the new plan into an existing one.
    pub fn is_merged(&self) -> bool {
        self.merged.is_some()
    }

    /// States of the activated plans the new one could be merged into.
    fn merge_candidates(plan: &Plan, key: OperationPlanKey) -> PlanResult<Vec<HierarchyState>> {
        let p = plan.plan_checked(key)?;
        let dates = p.dates();
        plan.operationplans_of(p.operation())
            .filter(|&k| k != key && plan.operationplan(k).is_some_and(|o| o.dates() == dates))
            .map(|k| plan.capture_state(k))
            .collect()
    }
}

impl Command for CreateOperationPlan {
    fn commit(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending], "commit")?;
        if let Some(key) = self.key {
            let candidates = Self::merge_candidates(plan, key)?;
            self.key = match plan.activate(key)? {
                Activation::Activated(k) => Some(k),
                Activation::Merged(survivor) => {
                    let before = candidates
                        .into_iter()
                        .find(|s| s.members().first().is_some_and(|&(k, _)| k == survivor))
                        .ok_or_else(|| PlanError::logic("merged into an unexpected operationplan"))?;
                    let after = plan.capture_state(survivor)?;
                    self.merged = Some(Merge { before, after });
                    Some(survivor)
                }
                Activation::Deleted => None,
            };
        }
        self.committed = true;
        self.status = CommandStatus::Committed;
        Ok(())
    }

    fn rollback(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending, CommandStatus::Undone], "roll back")?;
        if self.merged.take().is_some() {
            // Undo already put the merge target back as it was.
            self.key = None;
        } else if let Some(key) = self.key.take() {
            plan.delete_operationplan(key)?;
        }
        self.status = CommandStatus::RolledBack;
        Ok(())
    }

    fn undo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending, CommandStatus::Committed], "undo")?;
        if let Some(merge) = &self.merged {
            plan.restore_state(&merge.before)?;
        } else if let Some(key) = self.key {
            plan.plan_checked(key)?;
            plan.detach(key);
        }
        self.status = CommandStatus::Undone;
        Ok(())
    }

    fn redo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Undone], "redo")?;
        if let Some(merge) = &self.merged {
            plan.restore_state(&merge.after)?;
        } else if let Some(key) = self.key {
            plan.plan_checked(key)?;
            if self.committed {
                plan.reattach(key)?;
            } else {
                for k in plan.hierarchy(key) {
                    plan.create_flow_loads(k);
                }
            }
        }
        self.status =
            if self.committed { CommandStatus::Committed } else { CommandStatus::Pending };
        Ok(())
    }

    fn status(&self) -> CommandStatus {
        self.status
    }
}

// ---------------------------------------------------------------------------
// DeleteOperationPlan
// ---------------------------------------------------------------------------

/// Delete the hierarchy an operationplan belongs to. Until the commit the
/// hierarchy is only taken off the timelines and keeps its id.
#[derive(Debug)]
pub struct DeleteOperationPlan {
    top: OperationPlanKey,
    status: CommandStatus,
}

impl DeleteOperationPlan {
    pub fn new(plan: &mut Plan, key: OperationPlanKey) -> PlanResult<Self> {
        plan.plan_checked(key)?;
        let top = plan.top_owner(key);
        plan.detach(top);
        Ok(Self { top, status: CommandStatus::Pending })
    }
}

impl Command for DeleteOperationPlan {
    fn commit(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending], "commit")?;
        plan.delete_operationplan(self.top)?;
        self.status = CommandStatus::Committed;
        Ok(())
    }

    fn rollback(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending], "roll back")?;
        plan.plan_checked(self.top)?;
        plan.reattach(self.top)?;
        self.status = CommandStatus::RolledBack;
        Ok(())
    }

    /// Only a pending deletion can be undone; a committed one is final.
    fn undo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending], "undo")?;
        plan.plan_checked(self.top)?;
        plan.reattach(self.top)?;
        self.status = CommandStatus::Undone;
        Ok(())
    }

    fn redo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Undone], "redo")?;
        plan.plan_checked(self.top)?;
        plan.detach(self.top);
        self.status = CommandStatus::Pending;
        Ok(())
    }

    fn status(&self) -> CommandStatus {
        self.status
    }
}

// ---------------------------------------------------------------------------
// MoveOperationPlan
// ---------------------------------------------------------------------------

/// Resize and/or move an operationplan.
///
/// With both dates given the end anchors the placement and the start only
/// bounds it.
#[derive(Debug)]
pub struct MoveOperationPlan {
    before: HierarchyState,
    after: HierarchyState,
    status: CommandStatus,
}

impl MoveOperationPlan {
    pub fn new(
        plan: &mut Plan,
        key: OperationPlanKey,
        start: Option<Date>,
        end: Option<Date>,
        quantity: Option<Quantity>,
    ) -> PlanResult<Self> {
        let before = plan.capture_state(key)?;
        let result = Self::apply(plan, key, start, end, quantity);
        if let Err(e) = result {
            plan.restore_state(&before)?;
            return Err(e);
        }
        let after = plan.capture_state(key)?;
        Ok(Self { before, after, status: CommandStatus::Pending })
    }

    fn apply(
        plan: &mut Plan,
        key: OperationPlanKey,
        start: Option<Date>,
        end: Option<Date>,
        quantity: Option<Quantity>,
    ) -> PlanResult<()> {
        if let Some(q) = quantity {
            plan.set_quantity(key, q, false, true, true)?;
        }
        match (start, end) {
            (Some(_), Some(_)) => {
                let q = plan.plan_checked(key)?.quantity();
                plan.set_operationplan_parameters(key, q, start, end, true, true)?;
                plan.update(key);
            }
            (Some(s), None) => plan.set_start(key, s, false)?,
            (None, Some(e)) => plan.set_end(key, e, false)?,
            (None, None) => {}
        }
        Ok(())
    }

    pub fn before(&self) -> &HierarchyState {
        &self.before
    }

    pub fn after(&self) -> &HierarchyState {
        &self.after
    }
}

impl Command for MoveOperationPlan {
    fn commit(&mut self, _plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending], "commit")?;
        self.status = CommandStatus::Committed;
        Ok(())
    }

    fn rollback(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending, CommandStatus::Undone], "roll back")?;
        plan.restore_state(&self.before)?;
        self.status = CommandStatus::RolledBack;
        Ok(())
    }

    fn undo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Pending, CommandStatus::Committed], "undo")?;
        plan.restore_state(&self.before)?;
        self.status = CommandStatus::Undone;
        Ok(())
    }

    fn redo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status, &[CommandStatus::Undone], "redo")?;
        plan.restore_state(&self.after)?;
        self.status = CommandStatus::Committed;
        Ok(())
    }

    fn status(&self) -> CommandStatus {
        self.status
    }
}

// ---------------------------------------------------------------------------
// CommandList
// ---------------------------------------------------------------------------

/// A batch of commands handled as one.
///
/// Commit runs front to back; rollback and undo run back to front so every
/// command sees the plan as it left it.
#[derive(Debug, Default)]
pub struct CommandList {
    commands: Vec<Box<dyn Command>>,
    status: Option<CommandStatus>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: impl Command + 'static) {
        self.commands.push(Box::new(command));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> {
        self.commands.iter().map(|c| c.as_ref())
    }
}

impl Command for CommandList {
    fn commit(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status(), &[CommandStatus::Pending], "commit")?;
        for c in &mut self.commands {
            c.commit(plan)?;
        }
        debug!(commands = self.commands.len(), "command list committed");
        self.status = Some(CommandStatus::Committed);
        Ok(())
    }

    fn rollback(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status(), &[CommandStatus::Pending], "roll back")?;
        for c in self.commands.iter_mut().rev() {
            if c.status() == CommandStatus::Pending {
                c.rollback(plan)?;
            }
        }
        debug!(commands = self.commands.len(), "command list rolled back");
        self.status = Some(CommandStatus::RolledBack);
        Ok(())
    }

    fn undo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status(), &[CommandStatus::Pending, CommandStatus::Committed], "undo")?;
        for c in self.commands.iter_mut().rev() {
            c.undo(plan)?;
        }
        self.status = Some(CommandStatus::Undone);
        Ok(())
    }

    fn redo(&mut self, plan: &mut Plan) -> PlanResult<()> {
        expect_status(self.status(), &[CommandStatus::Undone], "redo")?;
        for c in &mut self.commands {
            c.redo(plan)?;
        }
        self.status = Some(
            if self.commands.iter().all(|c| c.status() == CommandStatus::Committed) {
                CommandStatus::Committed
            } else {
                CommandStatus::Pending
            },
        );
        Ok(())
    }

    fn status(&self) -> CommandStatus {
        self.status.unwrap_or(CommandStatus::Pending)
    }
}
