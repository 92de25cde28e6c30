// src/state/command.rs
//
// Requests from the control thread to the engine.
//
// Commands are the only way a controller touches instrument parameters
// while audio is running. They are queued and applied between periods.

use std::path::PathBuf;

/// A control request.
///
/// Parameter paths are `<instrument>.<submodule>...<parameter>`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    // ═══════════════════════════════════════════
    // Parameters
    // ═══════════════════════════════════════════
    /// Describe every unlocked parameter, one line each.
    ListParams,

    /// Read one parameter's formatted value.
    GetParam { path: String },

    /// Set one parameter. Numeric text sets a number, anything else a
    /// choice name.
    SetParam { path: String, value: String },

    /// Restore every parameter to its default.
    ResetParams,

    // ═══════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════
    /// Save all instruments to `file`, or each to its own configured file.
    SaveParams { file: Option<PathBuf> },

    /// Load all instruments from `file`, or each from its own configured file.
    LoadParams { file: Option<PathBuf> },

    // ═══════════════════════════════════════════
    // Diagnostics
    // ═══════════════════════════════════════════
    /// Render each instrument's module tree as DOT.
    DumpDot,
}

/// Response to one [`Command`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommandResult {
    /// Command succeeded with nothing to report.
    Ok,

    /// Command succeeded and produced text.
    Text { text: String },

    /// Command failed.
    Error { message: String },
}

impl CommandResult {
    pub fn text(text: impl Into<String>) -> Self {
        CommandResult::Text { text: text.into() }
    }

    pub fn error(message: impl ToString) -> Self {
        CommandResult::Error {
            message: message.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, CommandResult::Error { .. })
    }
}
