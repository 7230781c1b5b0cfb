//! Command pattern interfaces
//!
//! Each subcommand parses its own arguments into a [`Command`] value; the
//! binary only picks the command and runs it.

use crate::error::PatchResult;

/// An executable CLI operation
pub trait Command {
    /// Execute the command
    ///
    /// # Returns
    /// Result indicating success or an error
    fn execute(&self) -> PatchResult<()>;
}

/// Creates commands from parsed CLI arguments
pub trait CommandFactory {
    /// Create the command selected by `args`
    ///
    /// # Arguments
    /// * `args` - CLI argument matches from clap
    ///
    /// # Returns
    /// A command that implements the Command trait, or an error
    fn create_command(&self, args: &clap::ArgMatches) -> PatchResult<Box<dyn Command>>;
}
