//! Keyboard and pointer bindings for the editor.

use crate::editor::Editor;
use crate::error::EditError;
use terraplan_protocol::{KeyInput, PointerClick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCommand {
    RotateSelected,
    DeleteSelected,
    Undo,
    Redo,
}

impl InputCommand {
    pub fn from_key(key: &KeyInput) -> Option<Self> {
        match key.key.to_ascii_lowercase().as_str() {
            "z" if key.primary() && key.shift => Some(Self::Redo),
            "z" if key.primary() => Some(Self::Undo),
            "r" if !key.primary() => Some(Self::RotateSelected),
            "delete" | "backspace" => Some(Self::DeleteSelected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputOutcome {
    Ignored,
    Applied(InputCommand),
    /// Nothing selected, or undo/redo with empty history.
    NoOp(InputCommand),
    Rejected(InputCommand, EditError),
}

impl Editor {
    pub fn handle_key(&mut self, key: &KeyInput) -> InputOutcome {
        let Some(cmd) = InputCommand::from_key(key) else {
            return InputOutcome::Ignored;
        };
        // Ok(false): the command had nothing to act on.
        let res = match cmd {
            InputCommand::RotateSelected => self.rotate_selected().map(|n| n > 0),
            InputCommand::DeleteSelected => Ok(self.delete_selected() > 0),
            InputCommand::Undo => self.undo().map(|()| true),
            InputCommand::Redo => self.redo().map(|()| true),
        };
        match res {
            Ok(true) => InputOutcome::Applied(cmd),
            Ok(false) | Err(EditError::EmptyHistory(_)) => InputOutcome::NoOp(cmd),
            Err(e) => InputOutcome::Rejected(cmd, e),
        }
    }

    /// Plain click selects, shift-click toggles, click on empty canvas clears.
    pub fn handle_click(&mut self, click: &PointerClick) -> Result<(), EditError> {
        match (&click.placed_id, click.shift) {
            (Some(id), true) => self.toggle_selection(id),
            (Some(id), false) => self.select(id),
            (None, true) => Ok(()),
            (None, false) => {
                self.clear_selection();
                Ok(())
            }
        }
    }
}
