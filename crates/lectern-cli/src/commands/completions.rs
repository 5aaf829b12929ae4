use std::io::{self, Write};
use std::path::Path;

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let script = render_completions(shell);

    match output_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &script)?;
            println!("{}", path.display());
        }
        None => io::stdout().write_all(&script)?,
    }
    Ok(())
}

/// Completion script for the `lectern` binary.
pub fn render_completions(shell: CompletionShell) -> Vec<u8> {
    let mut command = Cli::command();
    let bin_name = command.get_name().to_string();
    let mut buffer = Vec::new();
    generate(Shell::from(shell), &mut command, bin_name, &mut buffer);
    buffer
}
